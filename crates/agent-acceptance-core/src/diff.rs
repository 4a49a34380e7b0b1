//! Structural comparison of an expected reference database against the
//! database an agent run produced.
//!
//! Rows are paired by position, so both sides are read with the ordering
//! declared by each [`TableSpec`]. Both databases must hold the same logical
//! rows in that order for a clean report.

use serde::Serialize;
use tracing::{error, info, warn};

use crate::db::{release, AcceptanceDb, CellValue, QueryRows};
use crate::error::{AcceptanceError, DbError, Result};
use crate::schema::{TableSpec, ValueKind, CORRELATION_COLUMN};

pub const MANUAL_REVIEW_NOTE: &str = "Blobs are not supported, please do a manual check here";
pub const COUNT_FAILED_NOTE: &str = "Count Test Failed for this table.";

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CountCheck {
    pub table: String,
    pub expected_count: usize,
    pub actual_count: usize,
    pub passed: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Finding {
    /// An integer or text column differs.
    Mismatch {
        table: String,
        /// 1-based position in the ordered result.
        row: usize,
        column: String,
        expected: Option<String>,
        expected_collection_timestamp: Option<String>,
        actual: Option<String>,
        actual_collection_timestamp: Option<String>,
    },
    /// A binary column that needs a human look; never affects the result.
    ManualReview {
        table: String,
        row: usize,
        column: String,
        expected_collection_timestamp: Option<String>,
        actual_collection_timestamp: Option<String>,
        note: String,
    },
    /// Row comparison skipped because the counts differ.
    CountFailed { table: String, note: String },
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DiffReport {
    pub count_checks: Vec<CountCheck>,
    pub findings: Vec<Finding>,
    pub counts_passed: bool,
    pub passed: bool,
}

impl DiffReport {
    pub fn mismatches(&self) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(|finding| matches!(finding, Finding::Mismatch { .. }))
    }
}

/// Compare `tables` between the two connections.
///
/// Both connections are committed and closed on every path.
///
/// # Errors
/// Returns a database error when a query fails or a declared column is missing.
pub fn diff_databases<E, A>(expected: E, actual: A, tables: &[TableSpec]) -> Result<DiffReport>
where
    E: AcceptanceDb,
    A: AcceptanceDb,
{
    let mut expected = expected;
    let mut actual = actual;

    let result = compare_tables(&mut expected, &mut actual, tables);
    let expected_released = release(expected);
    let actual_released = release(actual);

    match result {
        Ok(report) => {
            expected_released?;
            actual_released?;
            info!(
                counts_passed = report.counts_passed,
                passed = report.passed,
                findings = report.findings.len(),
                "database comparison finished"
            );
            Ok(report)
        }
        Err(err) => {
            error!(error = %err, "database comparison failed");
            Err(err)
        }
    }
}

fn compare_tables<E, A>(expected: &mut E, actual: &mut A, tables: &[TableSpec]) -> Result<DiffReport>
where
    E: AcceptanceDb,
    A: AcceptanceDb,
{
    let mut loaded = Vec::with_capacity(tables.len());
    let mut count_checks = Vec::with_capacity(tables.len());

    for table in tables {
        let sql = table.select_all_sql();
        let expected_rows = expected.query(&sql)?;
        let actual_rows = actual.query(&sql)?;
        let check = CountCheck {
            table: table.name.to_string(),
            expected_count: expected_rows.len(),
            actual_count: actual_rows.len(),
            passed: expected_rows.len() == actual_rows.len(),
        };
        if !check.passed {
            warn!(
                table = table.name,
                expected = check.expected_count,
                actual = check.actual_count,
                "row counts differ"
            );
        }
        count_checks.push(check);
        loaded.push((table, expected_rows, actual_rows));
    }

    let counts_passed = count_checks.iter().all(|check| check.passed);
    let mut passed = counts_passed;
    let mut findings = Vec::new();

    for ((table, expected_rows, actual_rows), check) in loaded.iter().zip(&count_checks) {
        if !check.passed {
            findings.push(Finding::CountFailed {
                table: table.name.to_string(),
                note: COUNT_FAILED_NOTE.to_string(),
            });
            continue;
        }
        passed &= compare_rows(table, expected_rows, actual_rows, &mut findings)?;
    }

    Ok(DiffReport { count_checks, findings, counts_passed, passed })
}

fn compare_rows(
    table: &TableSpec,
    expected: &QueryRows,
    actual: &QueryRows,
    findings: &mut Vec<Finding>,
) -> Result<bool> {
    let mut passed = true;

    for index in 0..expected.len().min(actual.len()) {
        let row = index + 1;
        let expected_stamp = expected.cell(index, CORRELATION_COLUMN).and_then(CellValue::as_text);
        let actual_stamp = actual.cell(index, CORRELATION_COLUMN).and_then(CellValue::as_text);

        for column in table.columns {
            let expected_cell = required_cell(expected, index, table, column.name)?;
            let actual_cell = required_cell(actual, index, table, column.name)?;

            let differs = match column.kind {
                ValueKind::Integer => expected_cell.as_integer() != actual_cell.as_integer(),
                ValueKind::Text => expected_cell.as_text() != actual_cell.as_text(),
                ValueKind::Binary => {
                    findings.push(Finding::ManualReview {
                        table: table.name.to_string(),
                        row,
                        column: column.name.to_string(),
                        expected_collection_timestamp: expected_stamp.clone(),
                        actual_collection_timestamp: actual_stamp.clone(),
                        note: MANUAL_REVIEW_NOTE.to_string(),
                    });
                    false
                }
            };

            if differs {
                passed = false;
                findings.push(Finding::Mismatch {
                    table: table.name.to_string(),
                    row,
                    column: column.name.to_string(),
                    expected: expected_cell.as_text(),
                    expected_collection_timestamp: expected_stamp.clone(),
                    actual: actual_cell.as_text(),
                    actual_collection_timestamp: actual_stamp.clone(),
                });
            }
        }
    }

    Ok(passed)
}

fn required_cell<'a>(
    rows: &'a QueryRows,
    index: usize,
    table: &TableSpec,
    column: &str,
) -> Result<&'a CellValue> {
    rows.cell(index, column).ok_or_else(|| {
        AcceptanceError::Database(DbError::Statement {
            sql: table.select_all_sql(),
            message: format!("column {column} is missing from {}", table.name),
        })
    })
}
