pub mod case;
pub mod context;
pub mod db;
pub mod diff;
pub mod error;
pub mod outcome;
pub mod record;
pub mod schema;
pub mod sql;
pub mod verify;

pub use case::{ActionType, CompareCase, Dialect, TestCase};
pub use context::{
    AgentPaths, LifecyclePlan, NetworkedEndpoint, RunContext, ServiceCommands, SettleDelays,
};
pub use db::{AcceptanceDb, CellValue, QueryRows};
pub use diff::{diff_databases, CountCheck, DiffReport, Finding};
pub use error::{AcceptanceError, DbError, Result};
pub use outcome::{now_local, CaseSummary, Outcome};
pub use record::{normalize_key, parse_rounded, RecordSet};
pub use schema::{ColumnSpec, TableSpec, ValueKind, COMPARISON_SPEC, CORRELATION_COLUMN};
pub use sql::build_statement;
pub use verify::{verify, VerificationReport};
