//! Literal SQL generated from a test case.
//!
//! Values come from the test sheet verbatim; statements are never
//! parameterised because the sheet may hold expressions (for example a
//! timestamp function on insert) that must reach the database unquoted.

use crate::case::{ActionType, Dialect, TestCase};
use crate::error::{AcceptanceError, Result};
use crate::record::parse_rounded;

/// Columns a case may set, in the order they appear in generated statements.
pub const FIELD_VOCABULARY: [&str; 19] = [
    "NodeId",
    "ObservationId",
    "DataPointId",
    "CollectionTimestamp",
    "ObservationHash",
    "ArchiveId",
    "StartLine",
    "EndArchive",
    "EndLine",
    "FileName",
    "Offset",
    "ContentsHash",
    "ModificationTime",
    "Content",
    "AttributeId",
    "AttributeValue",
    "AttributeValueString",
    "PropertyId",
    "PropertyValue",
];

/// Fields rendered as single-quoted string literals.
const QUOTED_FIELDS: [&str; 14] = [
    "ActionType",
    "DatabaseType",
    "TableName",
    "DataPointId",
    "ObservationHash",
    "FileName",
    "Content",
    "AttributeValue",
    "AttributeValueString",
    "PropertyValue",
    "LogSamplePath",
    "LogDestinationPath",
    "ModificationTime",
    "CollectionTimestamp",
];

/// Timestamp fields the store takes as bare expressions on INSERT only.
const UNQUOTED_ON_INSERT: [&str; 3] =
    ["StartArchiveCollectionTimestamp", "ModificationTime", "CollectionTimestamp"];

/// Build the statement for the case's action against `dialect`.
///
/// # Errors
/// Returns a configuration error for an INSERT with no vocabulary fields or a
/// networked CLEAR without `NodeId`, and a parse error for a non-numeric `NodeId`.
pub fn build_statement(case: &TestCase, dialect: Dialect) -> Result<String> {
    match case.action {
        ActionType::Insert => insert_statement(case),
        ActionType::Select => Ok(select_statement(case, dialect)),
        ActionType::Clear => clear_statement(case, dialect),
    }
}

fn present_fields(case: &TestCase) -> impl Iterator<Item = &'static str> + '_ {
    FIELD_VOCABULARY.into_iter().filter(|field| case.fields.has(field))
}

fn literal(case: &TestCase, field: &str) -> String {
    let raw = case.fields.get(field).unwrap_or_default();
    let quoted = QUOTED_FIELDS.contains(&field)
        && !(case.action == ActionType::Insert && UNQUOTED_ON_INSERT.contains(&field));
    if quoted {
        format!("'{raw}'")
    } else {
        raw.to_string()
    }
}

fn insert_statement(case: &TestCase) -> Result<String> {
    let fields: Vec<&str> = present_fields(case).collect();
    if fields.is_empty() {
        return Err(AcceptanceError::Config(format!(
            "{}... INSERT needs at least one column value",
            case.id
        )));
    }
    let values: Vec<String> = fields.iter().map(|field| literal(case, field)).collect();
    Ok(format!("INSERT INTO {}({}) VALUES({})", case.table, fields.join(", "), values.join(",")))
}

fn select_statement(case: &TestCase, dialect: Dialect) -> String {
    let operator = dialect.equality_operator();
    let predicates: Vec<String> = present_fields(case)
        .map(|field| format!("{field} {operator} {}", literal(case, field)))
        .collect();
    if predicates.is_empty() {
        format!("SELECT * FROM {}", case.table)
    } else {
        format!("SELECT * FROM {} WHERE {}", case.table, predicates.join(" AND "))
    }
}

fn clear_statement(case: &TestCase, dialect: Dialect) -> Result<String> {
    match clear_scope(case, dialect)? {
        Some(node_id) => Ok(format!("DELETE FROM {} WHERE NodeId = {node_id}", case.table)),
        None => Ok(format!("DELETE FROM {}", case.table)),
    }
}

/// Node filter a CLEAR is restricted to; mandatory on the networked dialect.
///
/// # Errors
/// See [`build_statement`].
pub fn clear_scope(case: &TestCase, dialect: Dialect) -> Result<Option<i64>> {
    match dialect {
        Dialect::Sqlite => Ok(None),
        Dialect::MySql => {
            let raw = case.fields.value("nodeid").ok_or_else(|| {
                AcceptanceError::Config(format!(
                    "{}... ActionType CLEAR must specify a NodeId for {} tests",
                    case.id,
                    dialect.as_str()
                ))
            })?;
            parse_rounded("nodeid", raw).map(Some)
        }
    }
}

/// Row count left in the scope a CLEAR just emptied.
///
/// # Errors
/// See [`build_statement`].
pub fn remaining_rows_statement(case: &TestCase, dialect: Dialect) -> Result<String> {
    match clear_scope(case, dialect)? {
        Some(node_id) => {
            Ok(format!("SELECT COUNT(*) FROM {} WHERE NodeId = {node_id}", case.table))
        }
        None => Ok(format!("SELECT COUNT(*) FROM {}", case.table)),
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::record::RecordSet;

    fn case(action: &str, fields: &[(&str, &str)]) -> Result<TestCase> {
        let mut record = RecordSet::new()
            .with("TestCaseNumber", "12")
            .with("ActionType", action)
            .with("TableName", "ObservationAttribute")
            .with("NumberOfRows", "1");
        for (key, value) in fields {
            record.insert(key, *value);
        }
        TestCase::from_record(record)
    }

    #[test]
    fn insert_leaves_timestamp_fields_unquoted() -> Result<()> {
        let case = case(
            "INSERT",
            &[
                ("AttributeValue", "on"),
                ("ObservationId", "4"),
                ("CollectionTimestamp", "datetime('now')"),
                ("DataPointId", "dp-1"),
            ],
        )?;

        assert_eq!(
            build_statement(&case, Dialect::Sqlite)?,
            "INSERT INTO ObservationAttribute(ObservationId, DataPointId, CollectionTimestamp, AttributeValue) \
             VALUES(4,'dp-1',datetime('now'),'on')"
        );
        Ok(())
    }

    #[test]
    fn select_quotes_timestamps_and_uses_dialect_operator() -> Result<()> {
        let case = case(
            "SELECT",
            &[("CollectionTimestamp", "2024-01-01T00:00:00"), ("NodeId", "3")],
        )?;

        assert_eq!(
            build_statement(&case, Dialect::Sqlite)?,
            "SELECT * FROM ObservationAttribute WHERE NodeId == 3 AND CollectionTimestamp == '2024-01-01T00:00:00'"
        );
        assert_eq!(
            build_statement(&case, Dialect::MySql)?,
            "SELECT * FROM ObservationAttribute WHERE NodeId = 3 AND CollectionTimestamp = '2024-01-01T00:00:00'"
        );
        Ok(())
    }

    #[test]
    fn select_without_fields_has_no_where_clause() -> Result<()> {
        let case = case("SELECT", &[])?;
        assert_eq!(build_statement(&case, Dialect::Sqlite)?, "SELECT * FROM ObservationAttribute");
        Ok(())
    }

    #[test]
    fn insert_without_fields_is_rejected() -> Result<()> {
        let case = case("INSERT", &[])?;
        assert!(matches!(build_statement(&case, Dialect::Sqlite), Err(AcceptanceError::Config(_))));
        Ok(())
    }

    #[test]
    fn clear_on_networked_dialect_requires_node_id() -> Result<()> {
        let unscoped = case("CLEAR", &[])?;
        assert!(matches!(
            build_statement(&unscoped, Dialect::MySql),
            Err(AcceptanceError::Config(message)) if message.contains("NodeId")
        ));
        assert_eq!(build_statement(&unscoped, Dialect::Sqlite)?, "DELETE FROM ObservationAttribute");

        let scoped = case("CLEAR", &[("NodeId", "17.0")])?;
        assert_eq!(
            build_statement(&scoped, Dialect::MySql)?,
            "DELETE FROM ObservationAttribute WHERE NodeId = 17"
        );
        assert_eq!(
            remaining_rows_statement(&scoped, Dialect::MySql)?,
            "SELECT COUNT(*) FROM ObservationAttribute WHERE NodeId = 17"
        );
        Ok(())
    }

    proptest! {
        #[test]
        fn columns_follow_vocabulary_order(mask in proptest::collection::vec(any::<bool>(), FIELD_VOCABULARY.len())) {
            let chosen: Vec<&str> = FIELD_VOCABULARY
                .iter()
                .zip(&mask)
                .filter_map(|(field, keep)| keep.then_some(*field))
                .collect();
            prop_assume!(!chosen.is_empty());

            // Insert in reverse to show sheet order does not matter.
            let pairs: Vec<(&str, &str)> = chosen.iter().rev().map(|field| (*field, "1")).collect();
            let case = case("INSERT", &pairs).map_err(|err| TestCaseError::fail(err.to_string()))?;
            let sql = build_statement(&case, Dialect::Sqlite).map_err(|err| TestCaseError::fail(err.to_string()))?;

            let expected = format!("({})", chosen.join(", "));
            prop_assert!(sql.contains(&expected), "{sql} should list {expected}");
        }
    }
}
