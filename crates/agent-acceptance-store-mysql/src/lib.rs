use agent_acceptance_core::{AcceptanceDb, CellValue, DbError, Dialect, NetworkedEndpoint, QueryRows};
use mysql::prelude::Queryable;
use mysql::{Conn, OptsBuilder, Value};
use tracing::{debug, info};

/// Connection to the networked database the agent pushes collected data to.
///
/// Auto-commit is switched off for the session right after connecting.
pub struct MySqlDatabase {
    conn: Conn,
    target: String,
}

impl MySqlDatabase {
    /// # Errors
    /// Returns [`DbError::Connect`] when the server is unreachable, rejects the
    /// credentials, or refuses to disable auto-commit.
    pub fn connect(endpoint: &NetworkedEndpoint, database: &str) -> Result<Self, DbError> {
        let target = format!("mysql://{}:{}/{database}", endpoint.host, endpoint.port);
        info!(%target, user = %endpoint.user, "connecting to networked database");

        let opts = OptsBuilder::new()
            .ip_or_hostname(Some(endpoint.host.as_str()))
            .tcp_port(endpoint.port)
            .user(Some(endpoint.user.as_str()))
            .pass(Some(endpoint.password.as_str()))
            .db_name(Some(database));

        let connect_error =
            |err: mysql::Error| DbError::Connect { target: target.clone(), message: err.to_string() };
        let mut conn = Conn::new(opts).map_err(connect_error)?;
        conn.query_drop("SET autocommit = 0").map_err(connect_error)?;

        Ok(Self { conn, target })
    }

    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }
}

fn statement_error(sql: &str, err: &mysql::Error) -> DbError {
    DbError::Statement { sql: sql.to_string(), message: err.to_string() }
}

fn cell_from_value(value: &Value) -> CellValue {
    match value {
        Value::NULL => CellValue::Null,
        Value::Int(value) => CellValue::Integer(*value),
        Value::UInt(value) => {
            i64::try_from(*value).map_or_else(|_| CellValue::Text(value.to_string()), CellValue::Integer)
        }
        Value::Float(value) => CellValue::Real(f64::from(*value)),
        Value::Double(value) => CellValue::Real(*value),
        // The text protocol delivers most columns as bytes.
        Value::Bytes(bytes) => match std::str::from_utf8(bytes) {
            Ok(text) => CellValue::Text(text.to_string()),
            Err(_) => CellValue::Blob(bytes.clone()),
        },
        Value::Date(year, month, day, hour, minute, second, _) => CellValue::Text(format!(
            "{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}"
        )),
        Value::Time(negative, days, hours, minutes, seconds, _) => {
            let sign = if *negative { "-" } else { "" };
            let hours = u32::from(*hours) + days * 24;
            CellValue::Text(format!("{sign}{hours:02}:{minutes:02}:{seconds:02}"))
        }
    }
}

impl AcceptanceDb for MySqlDatabase {
    fn dialect(&self) -> Dialect {
        Dialect::MySql
    }

    fn execute(&mut self, sql: &str) -> Result<u64, DbError> {
        self.conn.query_drop(sql).map_err(|err| statement_error(sql, &err))?;
        Ok(self.conn.affected_rows())
    }

    fn query(&mut self, sql: &str) -> Result<QueryRows, DbError> {
        let mut result = self.conn.query_iter(sql).map_err(|err| statement_error(sql, &err))?;
        let columns: Vec<String> = result
            .columns()
            .as_ref()
            .iter()
            .map(|column| column.name_str().into_owned())
            .collect();

        let mut rows = Vec::new();
        for row in result.by_ref() {
            let row = row.map_err(|err| statement_error(sql, &err))?;
            let cells = (0..row.len())
                .map(|index| row.as_ref(index).map_or(CellValue::Null, cell_from_value))
                .collect();
            rows.push(cells);
        }

        Ok(QueryRows { columns, rows })
    }

    fn commit(&mut self) -> Result<(), DbError> {
        self.conn.query_drop("COMMIT").map_err(|err| DbError::Commit(err.to_string()))
    }

    fn close(self) -> Result<(), DbError> {
        debug!(target = %self.target, "closing networked database connection");
        drop(self.conn);
        Ok(())
    }
}
