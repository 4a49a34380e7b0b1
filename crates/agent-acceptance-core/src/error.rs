use std::path::{Path, PathBuf};

/// Failure reported by a database connection implementation.
#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum DbError {
    #[error("failed to connect to {target}: {message}")]
    Connect { target: String, message: String },
    #[error("statement failed: {message} (sql: {sql})")]
    Statement { sql: String, message: String },
    #[error("commit failed: {0}")]
    Commit(String),
}

/// Faults that stop a test case. A failed assertion is not one of these;
/// it is reported through the `passed` flag of the relevant report.
#[derive(Debug, thiserror::Error)]
pub enum AcceptanceError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("environment error: {0}")]
    Environment(String),
    #[error("database error: {0}")]
    Database(#[from] DbError),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("i/o error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl AcceptanceError {
    pub fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io { path: path.to_path_buf(), source }
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Environment(_) => "environment",
            Self::Database(_) => "database",
            Self::Parse(_) => "parse",
            Self::Io { .. } => "io",
        }
    }
}

pub type Result<T, E = AcceptanceError> = std::result::Result<T, E>;
