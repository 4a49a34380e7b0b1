use std::path::{Path, PathBuf};
use std::time::Duration;

use agent_acceptance_core::{AcceptanceDb, CellValue, DbError, Dialect, QueryRows};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use tracing::debug;

/// Connection to the agent's embedded database file.
///
/// Opened inside an explicit transaction so nothing is durable until
/// [`AcceptanceDb::commit`].
pub struct SqliteDatabase {
    conn: Connection,
    path: PathBuf,
}

impl SqliteDatabase {
    /// Open an existing database file. A missing file is an error, never created.
    ///
    /// # Errors
    /// Returns [`DbError::Connect`] when the file cannot be opened or the
    /// transaction cannot begin.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        let connect_error = |err: rusqlite::Error| DbError::Connect {
            target: path.display().to_string(),
            message: err.to_string(),
        };

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_URI,
        )
        .map_err(connect_error)?;
        conn.busy_timeout(Duration::from_secs(5)).map_err(connect_error)?;
        conn.execute_batch("BEGIN").map_err(connect_error)?;

        debug!(path = %path.display(), "opened sqlite database");
        Ok(Self { conn, path: path.to_path_buf() })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn statement_error(sql: &str, err: &rusqlite::Error) -> DbError {
    DbError::Statement { sql: sql.to_string(), message: err.to_string() }
}

fn cell_from_ref(value: ValueRef<'_>) -> CellValue {
    match value {
        ValueRef::Null => CellValue::Null,
        ValueRef::Integer(value) => CellValue::Integer(value),
        ValueRef::Real(value) => CellValue::Real(value),
        ValueRef::Text(bytes) => CellValue::Text(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => CellValue::Blob(bytes.to_vec()),
    }
}

impl AcceptanceDb for SqliteDatabase {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn execute(&mut self, sql: &str) -> Result<u64, DbError> {
        let affected = self.conn.execute(sql, []).map_err(|err| statement_error(sql, &err))?;
        Ok(u64::try_from(affected).unwrap_or(u64::MAX))
    }

    fn query(&mut self, sql: &str) -> Result<QueryRows, DbError> {
        let mut stmt = self.conn.prepare(sql).map_err(|err| statement_error(sql, &err))?;
        let columns: Vec<String> =
            stmt.column_names().into_iter().map(str::to_string).collect();
        let width = columns.len();

        let mut rows = stmt.query([]).map_err(|err| statement_error(sql, &err))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(|err| statement_error(sql, &err))? {
            let mut cells = Vec::with_capacity(width);
            for index in 0..width {
                let value = row.get_ref(index).map_err(|err| statement_error(sql, &err))?;
                cells.push(cell_from_ref(value));
            }
            out.push(cells);
        }

        Ok(QueryRows { columns, rows: out })
    }

    fn commit(&mut self) -> Result<(), DbError> {
        if self.conn.is_autocommit() {
            return Ok(());
        }
        self.conn
            .execute_batch("COMMIT; BEGIN")
            .map_err(|err| DbError::Commit(err.to_string()))
    }

    fn close(self) -> Result<(), DbError> {
        if !self.conn.is_autocommit() {
            self.conn
                .execute_batch("ROLLBACK")
                .map_err(|err| DbError::Commit(err.to_string()))?;
        }
        self.conn.close().map_err(|(_, err)| DbError::Connect {
            target: self.path.display().to_string(),
            message: format!("close failed: {err}"),
        })?;
        debug!(path = %self.path.display(), "closed sqlite database");
        Ok(())
    }
}
