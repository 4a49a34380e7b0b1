use crate::case::Dialect;
use crate::error::DbError;

/// One cell as read back from either database.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl CellValue {
    /// Integer reading with driver semantics: NULL reads as 0, text is parsed.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Null => Some(0),
            Self::Integer(value) => Some(*value),
            Self::Real(value) => Some(value.trunc() as i64),
            Self::Text(value) => {
                let trimmed = value.trim();
                trimmed
                    .parse::<i64>()
                    .ok()
                    .or_else(|| trimmed.parse::<f64>().ok().map(|parsed| parsed.trunc() as i64))
            }
            Self::Blob(_) => None,
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<String> {
        match self {
            Self::Null => None,
            Self::Integer(value) => Some(value.to_string()),
            Self::Real(value) => Some(value.to_string()),
            Self::Text(value) => Some(value.clone()),
            Self::Blob(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        }
    }
}

/// Result of a query with its column names.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
}

impl QueryRows {
    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column.eq_ignore_ascii_case(name))
    }

    #[must_use]
    pub fn cell(&self, row: usize, column: &str) -> Option<&CellValue> {
        let index = self.column_index(column)?;
        self.rows.get(row).and_then(|cells| cells.get(index))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// A live connection opened with auto-commit disabled.
///
/// Work is only made durable by [`AcceptanceDb::commit`]; [`AcceptanceDb::close`]
/// consumes the connection.
pub trait AcceptanceDb {
    fn dialect(&self) -> Dialect;

    /// Run a data-modifying statement and return the affected row count.
    ///
    /// # Errors
    /// Returns the driver failure.
    fn execute(&mut self, sql: &str) -> Result<u64, DbError>;

    /// # Errors
    /// Returns the driver failure.
    fn query(&mut self, sql: &str) -> Result<QueryRows, DbError>;

    /// # Errors
    /// Returns the driver failure.
    fn commit(&mut self) -> Result<(), DbError>;

    /// # Errors
    /// Returns the driver failure raised while releasing the connection.
    fn close(self) -> Result<(), DbError>
    where
        Self: Sized;
}

/// Commit and close, keeping the first failure.
pub(crate) fn release<D: AcceptanceDb>(mut db: D) -> Result<(), DbError> {
    let committed = db.commit();
    let closed = db.close();
    committed.and(closed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_reads_follow_driver_conventions() {
        assert_eq!(CellValue::Null.as_integer(), Some(0));
        assert_eq!(CellValue::Text("42".into()).as_integer(), Some(42));
        assert_eq!(CellValue::Text("4.0".into()).as_integer(), Some(4));
        assert_eq!(CellValue::Text("abc".into()).as_integer(), None);
        assert_eq!(CellValue::Blob(vec![1]).as_integer(), None);
    }

    #[test]
    fn columns_are_found_case_insensitively() {
        let rows = QueryRows {
            columns: vec!["ObservationId".into(), "CollectionTimestamp".into()],
            rows: vec![vec![CellValue::Integer(1), CellValue::Text("t".into())]],
        };
        assert_eq!(rows.cell(0, "collectiontimestamp"), Some(&CellValue::Text("t".into())));
        assert_eq!(rows.cell(1, "ObservationId"), None);
    }
}
