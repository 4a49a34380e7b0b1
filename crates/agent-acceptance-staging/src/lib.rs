pub mod lifecycle;
pub mod rebase;
pub mod staging;

pub use lifecycle::{
    LifecycleController, LifecycleReport, Pause, ServiceControl, ShellServiceControl, ThreadPause,
};
pub use rebase::{is_log_like, rebase_file, rebase_file_to, rebase_text, Rebaser, TimestampDialect};
pub use staging::{archive, clean_paths, stage_paths, verify_archive, ArchiveManifest, ArchivedFile};
