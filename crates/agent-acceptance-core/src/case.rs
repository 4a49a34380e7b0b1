use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::error::{AcceptanceError, Result};
use crate::record::{parse_rounded, RecordSet};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum ActionType {
    Insert,
    Select,
    Clear,
}

impl ActionType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Insert => "INSERT",
            Self::Select => "SELECT",
            Self::Clear => "CLEAR",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "INSERT" => Some(Self::Insert),
            "SELECT" => Some(Self::Select),
            "CLEAR" => Some(Self::Clear),
            _ => None,
        }
    }

    #[must_use]
    pub fn expects_row_count(self) -> bool {
        matches!(self, Self::Insert | Self::Select)
    }
}

impl Display for ActionType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// SQL flavour of the database a statement is built for.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    /// Embedded file database written by the agent.
    Sqlite,
    /// Networked database the agent pushes to.
    MySql,
}

impl Dialect {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::MySql => "mysql",
        }
    }

    #[must_use]
    pub fn equality_operator(self) -> &'static str {
        match self {
            Self::Sqlite => "==",
            Self::MySql => "=",
        }
    }
}

/// One operation test case, validated at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCase {
    pub id: String,
    pub action: ActionType,
    pub table: String,
    /// Present exactly when `action` is INSERT or SELECT.
    pub expected_rows: Option<u32>,
    pub fields: RecordSet,
}

impl TestCase {
    /// Validate a loaded row and turn it into a runnable case.
    ///
    /// # Errors
    /// Returns a configuration error when the action type is absent or unknown, the
    /// table name is absent, or the row count is missing for INSERT/SELECT; returns a
    /// parse error when the row count is not a non-negative number.
    pub fn from_record(record: RecordSet) -> Result<Self> {
        let id = record.get("testcasenumber").unwrap_or_default().to_string();
        let raw_action = record.value("actiontype").ok_or_else(|| {
            AcceptanceError::Config(format!(
                "{id}... unable to run this test, provide a value for the \"Action Type\" column"
            ))
        })?;
        let action = ActionType::parse(raw_action).ok_or_else(|| {
            AcceptanceError::Config(format!("{id}... unknown action type {raw_action:?}"))
        })?;
        let table = record
            .value("tablename")
            .ok_or_else(|| {
                AcceptanceError::Config(format!(
                    "{id}... unable to run this test, provide a value for the \"Table Name\" column"
                ))
            })?
            .to_string();

        let expected_rows = if action.expects_row_count() {
            let raw = record.value("numberofrows").ok_or_else(|| {
                AcceptanceError::Config(format!(
                    "{id}... unable to run this test, provide a value for the \"Number of Rows\" column"
                ))
            })?;
            let rows = parse_rounded("numberofrows", raw)?;
            let rows = u32::try_from(rows).map_err(|_| {
                AcceptanceError::Parse(format!(
                    "{id}... \"Number of Rows\" must be a non-negative integer, got {raw:?}"
                ))
            })?;
            Some(rows)
        } else {
            None
        };

        Ok(Self { id, action, table, expected_rows, fields: record })
    }

    /// The case is enabled in its sheet.
    #[must_use]
    pub fn included(&self) -> bool {
        self.fields.has("include")
    }

    #[must_use]
    pub fn rebase_dates(&self) -> bool {
        self.fields.has("updatedatesinlogs")
    }

    /// Scenario folder below the shared fixture root, when the case stages fixtures.
    #[must_use]
    pub fn source_folder(&self) -> Option<&str> {
        self.fields.value("logsourcepathpart2")
    }

    #[must_use]
    pub fn database_name(&self) -> Option<&str> {
        self.fields.value("databasename")
    }
}

/// One dual-database comparison case: an id and the scenario folder it replays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompareCase {
    pub id: String,
    pub scenario: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> RecordSet {
        RecordSet::new()
            .with("Test Case Number", "7")
            .with("Table Name", "Observation")
            .with("Include", "x")
    }

    #[test]
    fn select_case_requires_row_count() {
        let record = base().with("Action Type", "SELECT");
        let err = TestCase::from_record(record).err();
        assert!(matches!(err, Some(AcceptanceError::Config(message)) if message.contains("Number of Rows")));
    }

    #[test]
    fn missing_action_type_is_a_configuration_error() {
        let err = TestCase::from_record(base().with("Number of Rows", "1")).err();
        assert!(matches!(err, Some(AcceptanceError::Config(message)) if message.contains("Action Type")));
    }

    #[test]
    fn negative_row_count_is_rejected() {
        let record = base().with("Action Type", "INSERT").with("Number of Rows", "-1");
        assert!(matches!(TestCase::from_record(record), Err(AcceptanceError::Parse(_))));
    }

    #[test]
    fn clear_case_ignores_row_count() -> Result<()> {
        let case = TestCase::from_record(base().with("Action Type", " clear "))?;
        assert_eq!(case.action, ActionType::Clear);
        assert_eq!(case.expected_rows, None);
        assert!(case.included());
        assert!(!case.rebase_dates());
        Ok(())
    }

    #[test]
    fn spreadsheet_float_row_count_is_rounded() -> Result<()> {
        let case =
            TestCase::from_record(base().with("Action Type", "INSERT").with("Number of Rows", "3.0"))?;
        assert_eq!(case.expected_rows, Some(3));
        assert_eq!(case.id, "7");
        Ok(())
    }
}
