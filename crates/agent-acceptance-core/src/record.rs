use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{AcceptanceError, Result};

/// Normalise a column title or lookup key: lowercase, all whitespace removed.
#[must_use]
pub fn normalize_key(key: &str) -> String {
    key.chars().filter(|ch| !ch.is_whitespace()).flat_map(char::to_lowercase).collect()
}

/// One row of tabular test input, keyed case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, String>", into = "BTreeMap<String, String>")]
pub struct RecordSet {
    fields: BTreeMap<String, String>,
}

impl RecordSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: &str, value: impl Into<String>) {
        self.fields.insert(normalize_key(key), value.into());
    }

    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// Raw lookup; an empty value is still returned.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(&normalize_key(key)).map(String::as_str)
    }

    /// Lookup that treats an empty cell the same as a missing one.
    #[must_use]
    pub fn value(&self, key: &str) -> Option<&str> {
        self.get(key).filter(|value| !value.is_empty())
    }

    #[must_use]
    pub fn has(&self, key: &str) -> bool {
        self.value(key).is_some()
    }

    /// # Errors
    /// Returns a configuration error naming the column when it is absent or empty.
    pub fn require(&self, key: &str) -> Result<&str> {
        self.value(key).ok_or_else(|| {
            AcceptanceError::Config(format!("missing value for required field `{key}`"))
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(key, value)| (key.as_str(), value.as_str()))
    }
}

impl From<BTreeMap<String, String>> for RecordSet {
    fn from(raw: BTreeMap<String, String>) -> Self {
        let mut record = Self::new();
        for (key, value) in raw {
            record.insert(&key, value);
        }
        record
    }
}

impl From<RecordSet> for BTreeMap<String, String> {
    fn from(record: RecordSet) -> Self {
        record.fields
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for RecordSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut record = Self::new();
        for (key, value) in iter {
            record.insert(key.as_ref(), value);
        }
        record
    }
}

/// Parse a spreadsheet number ("5", "5.0", "4.6") and round it to the nearest
/// integer. Halves round up, so -2.5 becomes -2.
///
/// # Errors
/// Returns a parse error when the text is not a finite decimal number.
#[allow(clippy::cast_possible_truncation)]
pub fn parse_rounded(field: &str, raw: &str) -> Result<i64> {
    let parsed: f64 = raw.trim().parse().map_err(|_| {
        AcceptanceError::Parse(format!("field `{field}` is not a number: {raw:?}"))
    })?;
    if !parsed.is_finite() || parsed.abs() > 9.0e15 {
        return Err(AcceptanceError::Parse(format!("field `{field}` is out of range: {raw:?}")));
    }
    Ok((parsed + 0.5).floor() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookups_ignore_case_and_whitespace() {
        let record = RecordSet::new().with("Number Of Rows", "3").with("ActionType", "SELECT");

        assert_eq!(record.get("numberofrows"), Some("3"));
        assert_eq!(record.get("NUMBER of rows"), Some("3"));
        assert_eq!(record.get("action type"), Some("SELECT"));
        assert_eq!(record.get("tablename"), None);
    }

    #[test]
    fn empty_values_count_as_absent() {
        let record = RecordSet::new().with("include", "");

        assert_eq!(record.get("include"), Some(""));
        assert!(!record.has("include"));
        assert!(record.require("include").is_err());
    }

    #[test]
    fn rounding_accepts_spreadsheet_floats() -> Result<()> {
        assert_eq!(parse_rounded("n", "5.0")?, 5);
        assert_eq!(parse_rounded("n", " 4.5 ")?, 5);
        assert_eq!(parse_rounded("n", "2")?, 2);
        assert_eq!(parse_rounded("n", "-2.5")?, -2);
        assert_eq!(parse_rounded("n", "-2.6")?, -3);
        assert_eq!(parse_rounded("n", "-0.4")?, 0);
        assert!(parse_rounded("n", "two").is_err());
        assert!(parse_rounded("n", "NaN").is_err());
        Ok(())
    }
}
