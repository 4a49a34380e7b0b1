use serde::Serialize;
use tracing::{debug, error, info};

use crate::case::{ActionType, Dialect, TestCase};
use crate::db::{release, AcceptanceDb};
use crate::error::{AcceptanceError, Result};
use crate::sql::{build_statement, remaining_rows_statement};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct VerificationReport {
    pub case_id: String,
    pub action: ActionType,
    pub table: String,
    pub dialect: Dialect,
    pub statement: String,
    /// INSERT: required executions. SELECT: required row count. CLEAR: none.
    pub expected: Option<u32>,
    /// INSERT: affected rows per execution. SELECT: rows returned.
    /// CLEAR: rows deleted, then rows remaining.
    pub observed: Vec<u64>,
    pub passed: bool,
}

/// Run the case's statement on `db` and judge the result.
///
/// The connection is committed and closed on every path, including errors.
///
/// # Errors
/// Returns configuration/parse errors from statement building (before anything
/// executes) and database errors from the driver.
pub fn verify<D: AcceptanceDb>(case: &TestCase, mut db: D) -> Result<VerificationReport> {
    let dialect = db.dialect();
    info!(
        case = %case.id,
        action = %case.action,
        table = %case.table,
        dialect = dialect.as_str(),
        "running verification"
    );

    let result = run_action(case, &mut db, dialect);
    let released = release(db);

    match (result, released) {
        (Ok(report), Ok(())) => {
            info!(
                case = %report.case_id,
                expected = ?report.expected,
                observed = ?report.observed,
                passed = report.passed,
                "verification finished"
            );
            Ok(report)
        }
        (Err(err), _) => {
            error!(case = %case.id, error = %err, "verification failed");
            Err(err)
        }
        (Ok(_), Err(err)) => {
            error!(case = %case.id, error = %err, "failed to release connection");
            Err(err.into())
        }
    }
}

fn run_action<D: AcceptanceDb>(
    case: &TestCase,
    db: &mut D,
    dialect: Dialect,
) -> Result<VerificationReport> {
    let statement = build_statement(case, dialect)?;
    let mut report = VerificationReport {
        case_id: case.id.clone(),
        action: case.action,
        table: case.table.clone(),
        dialect,
        statement,
        expected: case.expected_rows,
        observed: Vec::new(),
        passed: false,
    };

    match case.action {
        ActionType::Insert => {
            let runs = expected_rows(case)?;
            for _ in 0..runs {
                let affected = db.execute(&report.statement)?;
                debug!(case = %case.id, affected, "insert executed");
                report.observed.push(affected);
            }
            report.passed = report.observed.iter().all(|affected| *affected == 1);
        }
        ActionType::Select => {
            let expected = expected_rows(case)?;
            let rows = db.query(&report.statement)?;
            debug!(case = %case.id, columns = ?rows.columns, "select returned {} rows", rows.len());
            for row in &rows.rows {
                debug!(case = %case.id, row = ?row);
            }
            let count = rows.len() as u64;
            report.observed.push(count);
            report.passed = count == u64::from(expected);
        }
        ActionType::Clear => {
            let deleted = db.execute(&report.statement)?;
            let remaining_sql = remaining_rows_statement(case, dialect)?;
            let remaining = db.query(&remaining_sql)?;
            let remaining = remaining
                .rows
                .first()
                .and_then(|row| row.first())
                .and_then(crate::db::CellValue::as_integer)
                .ok_or_else(|| {
                    AcceptanceError::Parse(format!(
                        "{}... remaining-row count query returned no number",
                        case.id
                    ))
                })?;
            info!(case = %case.id, deleted, remaining, "clear executed");
            report.observed.push(deleted);
            report.observed.push(u64::try_from(remaining).unwrap_or(u64::MAX));
            report.passed = remaining == 0;
        }
    }

    Ok(report)
}

fn expected_rows(case: &TestCase) -> Result<u32> {
    case.expected_rows.ok_or_else(|| {
        AcceptanceError::Config(format!("{}... \"Number of Rows\" is required", case.id))
    })
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::db::{CellValue, QueryRows};
    use crate::error::DbError;
    use crate::record::RecordSet;

    #[derive(Default)]
    struct Journal {
        executed: Vec<String>,
        commits: usize,
        closed: bool,
    }

    struct ScriptedDb {
        dialect: Dialect,
        affected: u64,
        query_rows: Vec<QueryRows>,
        fail_execute: bool,
        journal: Rc<RefCell<Journal>>,
    }

    impl ScriptedDb {
        fn new(dialect: Dialect, journal: &Rc<RefCell<Journal>>) -> Self {
            Self {
                dialect,
                affected: 1,
                query_rows: Vec::new(),
                fail_execute: false,
                journal: Rc::clone(journal),
            }
        }
    }

    impl AcceptanceDb for ScriptedDb {
        fn dialect(&self) -> Dialect {
            self.dialect
        }

        fn execute(&mut self, sql: &str) -> Result<u64, DbError> {
            self.journal.borrow_mut().executed.push(sql.to_string());
            if self.fail_execute {
                return Err(DbError::Statement { sql: sql.into(), message: "UNIQUE constraint failed".into() });
            }
            Ok(self.affected)
        }

        fn query(&mut self, sql: &str) -> Result<QueryRows, DbError> {
            self.journal.borrow_mut().executed.push(sql.to_string());
            Ok(if self.query_rows.is_empty() { QueryRows::default() } else { self.query_rows.remove(0) })
        }

        fn commit(&mut self) -> Result<(), DbError> {
            self.journal.borrow_mut().commits += 1;
            Ok(())
        }

        fn close(self) -> Result<(), DbError> {
            self.journal.borrow_mut().closed = true;
            Ok(())
        }
    }

    fn case(action: &str, rows: &str, extra: &[(&str, &str)]) -> Result<TestCase> {
        let mut record = RecordSet::new()
            .with("TestCaseNumber", "3")
            .with("ActionType", action)
            .with("TableName", "Observation")
            .with("NumberOfRows", rows);
        for (key, value) in extra {
            record.insert(key, *value);
        }
        TestCase::from_record(record)
    }

    fn count_rows(count: i64) -> QueryRows {
        QueryRows { columns: vec!["COUNT(*)".into()], rows: vec![vec![CellValue::Integer(count)]] }
    }

    #[test]
    fn insert_runs_once_per_expected_row() -> Result<()> {
        let journal = Rc::new(RefCell::new(Journal::default()));
        let db = ScriptedDb::new(Dialect::Sqlite, &journal);
        let report = verify(&case("INSERT", "3", &[("NodeId", "1")])?, db)?;

        assert!(report.passed);
        assert_eq!(report.observed, vec![1, 1, 1]);
        assert_eq!(journal.borrow().executed.len(), 3);
        assert_eq!(journal.borrow().commits, 1);
        assert!(journal.borrow().closed);
        Ok(())
    }

    #[test]
    fn insert_affecting_zero_rows_fails() -> Result<()> {
        let journal = Rc::new(RefCell::new(Journal::default()));
        let mut db = ScriptedDb::new(Dialect::Sqlite, &journal);
        db.affected = 0;
        let report = verify(&case("INSERT", "2", &[("NodeId", "1")])?, db)?;

        assert!(!report.passed);
        Ok(())
    }

    #[test]
    fn select_count_must_match_exactly() -> Result<()> {
        let journal = Rc::new(RefCell::new(Journal::default()));
        let mut db = ScriptedDb::new(Dialect::Sqlite, &journal);
        db.query_rows.push(QueryRows {
            columns: vec!["NodeId".into()],
            rows: vec![vec![CellValue::Integer(1)], vec![CellValue::Integer(1)]],
        });
        let report = verify(&case("SELECT", "1", &[("NodeId", "1")])?, db)?;

        assert!(!report.passed);
        assert_eq!(report.observed, vec![2]);
        Ok(())
    }

    #[test]
    fn clear_passes_when_nothing_remains() -> Result<()> {
        let journal = Rc::new(RefCell::new(Journal::default()));
        let mut db = ScriptedDb::new(Dialect::MySql, &journal);
        db.affected = 4;
        db.query_rows.push(count_rows(0));
        let report = verify(&case("CLEAR", "", &[("NodeId", "9")])?, db)?;

        assert!(report.passed);
        assert_eq!(report.observed, vec![4, 0]);
        assert_eq!(
            journal.borrow().executed,
            vec![
                "DELETE FROM Observation WHERE NodeId = 9".to_string(),
                "SELECT COUNT(*) FROM Observation WHERE NodeId = 9".to_string()
            ]
        );
        Ok(())
    }

    #[test]
    fn networked_clear_without_node_fails_before_executing() -> Result<()> {
        let journal = Rc::new(RefCell::new(Journal::default()));
        let db = ScriptedDb::new(Dialect::MySql, &journal);
        let result = verify(&case("CLEAR", "", &[])?, db);

        assert!(matches!(result, Err(AcceptanceError::Config(_))));
        assert!(journal.borrow().executed.is_empty());
        assert!(journal.borrow().closed);
        Ok(())
    }

    #[test]
    fn database_errors_propagate_after_cleanup() -> Result<()> {
        let journal = Rc::new(RefCell::new(Journal::default()));
        let mut db = ScriptedDb::new(Dialect::Sqlite, &journal);
        db.fail_execute = true;
        let result = verify(&case("INSERT", "1", &[("NodeId", "1")])?, db);

        assert!(matches!(result, Err(AcceptanceError::Database(_))));
        assert_eq!(journal.borrow().commits, 1);
        assert!(journal.borrow().closed);
        Ok(())
    }
}
