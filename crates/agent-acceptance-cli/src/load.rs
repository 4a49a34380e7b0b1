use std::path::Path;

use agent_acceptance_core::{normalize_key, AcceptanceError, CompareCase, RecordSet, Result};
use calamine::{open_workbook_auto, Data, Reader};
use serde_yaml::Value as YamlValue;
use tracing::{debug, warn};

/// Sheet holding the key/value pairs of the global record.
pub const GLOBAL_SHEET: &str = "Test Data";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceFormat {
    Workbook,
    Yaml,
}

fn source_format(path: &Path) -> Result<SourceFormat> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match extension.as_str() {
        "xlsx" | "xlsm" | "xlsb" | "xls" | "ods" => Ok(SourceFormat::Workbook),
        "yaml" | "yml" => Ok(SourceFormat::Yaml),
        _ => Err(AcceptanceError::Config(format!(
            "unsupported input {}: expected a workbook or a YAML file",
            path.display()
        ))),
    }
}

/// Rows of one test sheet. `headers` are normalised; cells are rendered text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    /// One record per row keyed by header. Empty cells are left out.
    #[must_use]
    pub fn records(&self) -> Vec<RecordSet> {
        self.rows
            .iter()
            .map(|row| {
                self.headers
                    .iter()
                    .zip(row)
                    .filter(|(header, cell)| !header.is_empty() && !cell.is_empty())
                    .map(|(header, cell)| (header.as_str(), cell.clone()))
                    .collect()
            })
            .collect()
    }

    /// Comparison cases read by position: case id, then scenario name.
    /// Rows without an id are skipped.
    ///
    /// # Errors
    /// Returns a configuration error when a row with an id has no scenario.
    pub fn compare_cases(&self) -> Result<Vec<CompareCase>> {
        let mut cases = Vec::new();
        for row in &self.rows {
            let id = row.first().map(|cell| cell.trim()).unwrap_or_default();
            if id.is_empty() {
                continue;
            }
            let scenario = row.get(1).map(|cell| cell.trim()).unwrap_or_default();
            if scenario.is_empty() {
                return Err(AcceptanceError::Config(format!(
                    "{id}... comparison case has no scenario folder"
                )));
            }
            cases.push(CompareCase { id: id.to_string(), scenario: scenario.to_string() });
        }
        Ok(cases)
    }
}

/// Load the global record from a workbook's `Test Data` sheet or a YAML mapping.
///
/// # Errors
/// Returns an I/O error when the file cannot be read, a parse error when its
/// contents are malformed, and a configuration error when the sheet is missing.
pub fn load_global(path: &Path) -> Result<RecordSet> {
    let record: RecordSet = match source_format(path)? {
        SourceFormat::Workbook => {
            let rows = read_sheet(path, GLOBAL_SHEET)?;
            rows.into_iter()
                .filter_map(|row| {
                    let mut cells = row.into_iter();
                    let key = cells.next()?;
                    let value = cells.next().unwrap_or_default();
                    (!key.trim().is_empty()).then_some((key, value))
                })
                .collect()
        }
        SourceFormat::Yaml => {
            let mapping = match read_yaml(path)? {
                YamlValue::Mapping(mapping) => mapping,
                YamlValue::Null => serde_yaml::Mapping::new(),
                _ => {
                    return Err(AcceptanceError::Parse(format!(
                        "{} must hold a mapping of settings",
                        path.display()
                    )))
                }
            };
            let mut record = RecordSet::new();
            for (key, value) in &mapping {
                let key = yaml_key(key, path)?;
                if let Some(value) = yaml_scalar(value, &key, path)? {
                    record.insert(&key, value);
                }
            }
            record
        }
    };
    debug!(path = %path.display(), fields = record.len(), "loaded global settings");
    Ok(record)
}

/// Load the cases of one sheet.
///
/// A workbook is read from the sheet called `sheet`, first row as headers. A
/// YAML file holds either a sequence of mappings or a mapping from sheet name
/// to such a sequence.
///
/// # Errors
/// Returns an I/O error when the file cannot be read, a parse error when its
/// contents are malformed, and a configuration error when the sheet is missing.
pub fn load_table(path: &Path, sheet: &str) -> Result<Table> {
    let table = match source_format(path)? {
        SourceFormat::Workbook => {
            let mut rows = read_sheet(path, sheet)?.into_iter();
            let headers = rows.next().unwrap_or_default();
            Table {
                headers: headers.iter().map(|header| normalize_key(header)).collect(),
                rows: rows.filter(|row| row.iter().any(|cell| !cell.is_empty())).collect(),
            }
        }
        SourceFormat::Yaml => yaml_table(read_yaml(path)?, sheet, path)?,
    };
    debug!(path = %path.display(), sheet, rows = table.rows.len(), "loaded test sheet");
    Ok(table)
}

fn read_sheet(path: &Path, sheet: &str) -> Result<Vec<Vec<String>>> {
    let mut workbook = open_workbook_auto(path).map_err(|err| {
        AcceptanceError::Parse(format!("failed to open workbook {}: {err}", path.display()))
    })?;
    let name = workbook
        .sheet_names()
        .iter()
        .find(|name| name.trim().eq_ignore_ascii_case(sheet))
        .cloned()
        .ok_or_else(|| {
            AcceptanceError::Config(format!("{} has no sheet named `{sheet}`", path.display()))
        })?;
    let range = workbook.worksheet_range(&name).map_err(|err| {
        AcceptanceError::Parse(format!("failed to read sheet `{name}` of {}: {err}", path.display()))
    })?;
    Ok(range.rows().map(|row| row.iter().map(cell_to_string).collect()).collect())
}

fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.trim().to_string(),
        Data::Float(f) => {
            if f.fract() == 0.0 {
                format!("{f:.0}")
            } else {
                format!("{f}")
            }
        }
        Data::Int(i) => format!("{i}"),
        Data::Bool(b) => {
            if *b {
                "TRUE".to_string()
            } else {
                "FALSE".to_string()
            }
        }
        Data::Error(e) => {
            warn!(error = ?e, "spreadsheet cell holds an error value");
            String::new()
        }
        Data::DateTime(dt) => format!("{dt}"),
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
    }
}

fn read_yaml(path: &Path) -> Result<YamlValue> {
    let raw = std::fs::read_to_string(path).map_err(|err| AcceptanceError::io(path, err))?;
    serde_yaml::from_str(&raw)
        .map_err(|err| AcceptanceError::Parse(format!("invalid YAML in {}: {err}", path.display())))
}

fn yaml_table(document: YamlValue, sheet: &str, path: &Path) -> Result<Table> {
    let entries = match document {
        YamlValue::Sequence(entries) => entries,
        YamlValue::Mapping(mut mapping) => {
            let key = mapping
                .keys()
                .find(|key| key.as_str().is_some_and(|name| normalize_key(name) == normalize_key(sheet)))
                .cloned()
                .ok_or_else(|| {
                    AcceptanceError::Config(format!(
                        "{} has no section named `{sheet}`",
                        path.display()
                    ))
                })?;
            match mapping.remove(&key) {
                Some(YamlValue::Sequence(entries)) => entries,
                Some(YamlValue::Null) | None => Vec::new(),
                Some(_) => {
                    return Err(AcceptanceError::Parse(format!(
                        "section `{sheet}` of {} must be a list of cases",
                        path.display()
                    )))
                }
            }
        }
        YamlValue::Null => Vec::new(),
        _ => {
            return Err(AcceptanceError::Parse(format!(
                "{} must hold a list of cases",
                path.display()
            )))
        }
    };

    let mut table = Table::default();
    let mut parsed: Vec<Vec<(usize, String)>> = Vec::with_capacity(entries.len());
    for entry in &entries {
        let YamlValue::Mapping(mapping) = entry else {
            return Err(AcceptanceError::Parse(format!(
                "every case in {} must be a mapping",
                path.display()
            )));
        };
        let mut cells = Vec::with_capacity(mapping.len());
        for (key, value) in mapping {
            let header = normalize_key(&yaml_key(key, path)?);
            let column = match table.headers.iter().position(|known| *known == header) {
                Some(column) => column,
                None => {
                    table.headers.push(header.clone());
                    table.headers.len() - 1
                }
            };
            if let Some(value) = yaml_scalar(value, &header, path)? {
                cells.push((column, value));
            }
        }
        parsed.push(cells);
    }

    let width = table.headers.len();
    table.rows = parsed
        .into_iter()
        .map(|cells| {
            let mut row = vec![String::new(); width];
            for (column, value) in cells {
                row[column] = value;
            }
            row
        })
        .collect();
    Ok(table)
}

fn yaml_key(key: &YamlValue, path: &Path) -> Result<String> {
    match key {
        YamlValue::String(key) => Ok(key.clone()),
        YamlValue::Number(key) => Ok(key.to_string()),
        _ => Err(AcceptanceError::Parse(format!("{} has a non-scalar key", path.display()))),
    }
}

/// Render a YAML scalar as cell text. `null` and `false` leave the cell empty.
fn yaml_scalar(value: &YamlValue, key: &str, path: &Path) -> Result<Option<String>> {
    match value {
        YamlValue::Null | YamlValue::Bool(false) => Ok(None),
        YamlValue::Bool(true) => Ok(Some("TRUE".to_string())),
        YamlValue::Number(number) => Ok(Some(number.to_string())),
        YamlValue::String(text) => Ok(Some(text.trim().to_string())),
        YamlValue::Tagged(tagged) => yaml_scalar(&tagged.value, key, path),
        YamlValue::Sequence(_) | YamlValue::Mapping(_) => Err(AcceptanceError::Parse(format!(
            "field `{key}` in {} must be a single value",
            path.display()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn write(dir: &Path, name: &str, contents: &str) -> Result<std::path::PathBuf> {
        let path = dir.join(name);
        fs::write(&path, contents).map_err(|err| AcceptanceError::io(&path, err))?;
        Ok(path)
    }

    fn scratch() -> Result<tempfile::TempDir> {
        tempfile::tempdir().map_err(|err| AcceptanceError::io(Path::new("."), err))
    }

    #[test]
    fn global_yaml_scalars_become_text() -> Result<()> {
        let dir = scratch()?;
        let path = write(
            dir.path(),
            "global.yaml",
            "Service Name: AgentSvc\nWait Minutes For Project Client Data Push: 2.0\nPort Number: 3306\nLog Source File Part 1:\n",
        )?;

        let global = load_global(&path)?;
        assert_eq!(global.get("servicename"), Some("AgentSvc"));
        assert_eq!(global.get("waitminutesforprojectclientdatapush"), Some("2.0"));
        assert_eq!(global.get("portnumber"), Some("3306"));
        assert!(!global.has("logsourcefilepart1"));
        Ok(())
    }

    #[test]
    fn yaml_sections_are_selected_by_sheet_name() -> Result<()> {
        let dir = scratch()?;
        let path = write(
            dir.path(),
            "cases.yaml",
            "DataCollection Tests:\n  - Test Case Number: 1\n    Action Type: SELECT\n    Include: true\n  - Test Case Number: 2\n    Table Name: Observation\n    Include: false\nPurge Tests: []\n",
        )?;

        let table = load_table(&path, "DataCollection Tests")?;
        assert_eq!(table.headers, vec!["testcasenumber", "actiontype", "include", "tablename"]);
        let records = table.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get("include"), Some("TRUE"));
        assert_eq!(records[0].get("tablename"), None);
        assert_eq!(records[1].get("include"), None);
        assert_eq!(records[1].get("tablename"), Some("Observation"));

        assert!(load_table(&path, "Purge Tests")?.rows.is_empty());
        assert!(matches!(load_table(&path, "DataPush Tests"), Err(AcceptanceError::Config(_))));
        Ok(())
    }

    #[test]
    fn comparison_cases_are_positional() -> Result<()> {
        let table = Table {
            headers: vec!["testcase".into(), "scenario".into()],
            rows: vec![
                vec!["1".into(), "Baseline".into()],
                vec![String::new(), String::new()],
                vec!["2".into(), " Restart ".into()],
            ],
        };

        let cases = table.compare_cases()?;
        assert_eq!(
            cases,
            vec![
                CompareCase { id: "1".into(), scenario: "Baseline".into() },
                CompareCase { id: "2".into(), scenario: "Restart".into() },
            ]
        );

        let broken = Table { headers: Vec::new(), rows: vec![vec!["3".into()]] };
        assert!(matches!(broken.compare_cases(), Err(AcceptanceError::Config(_))));
        Ok(())
    }

    #[test]
    fn nested_values_are_rejected() -> Result<()> {
        let dir = scratch()?;
        let path = write(dir.path(), "global.yml", "Service Name: [a, b]\n")?;
        assert!(matches!(load_global(&path), Err(AcceptanceError::Parse(_))));
        Ok(())
    }

    #[test]
    fn unknown_extensions_are_configuration_errors() {
        assert!(matches!(
            load_global(Path::new("settings.toml")),
            Err(AcceptanceError::Config(_))
        ));
    }

    #[test]
    fn whole_floats_render_without_fraction() {
        assert_eq!(cell_to_string(&Data::Float(5.0)), "5");
        assert_eq!(cell_to_string(&Data::Float(4.5)), "4.5");
        assert_eq!(cell_to_string(&Data::String(" x ".into())), "x");
        assert_eq!(cell_to_string(&Data::Bool(true)), "TRUE");
        assert_eq!(cell_to_string(&Data::Empty), "");
    }
}
