use std::fs;
use std::path::PathBuf;

use agent_acceptance_core::{CaseSummary, CompareCase, DiffReport};
use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use tracing::info;
use ulid::Ulid;

use crate::with_contract_version;

/// Writes run results as pretty JSON documents below one directory.
#[derive(Debug, Clone)]
pub struct ReportSink {
    dir: PathBuf,
    run_id: Ulid,
}

#[derive(Debug, Serialize)]
struct SuiteDocument<'a> {
    run_id: String,
    suite: &'a str,
    generated_at: String,
    passed: bool,
    cases: &'a [CaseSummary],
}

#[derive(Debug, Serialize)]
struct ComparisonDocument<'a> {
    run_id: String,
    generated_at: String,
    case_id: &'a str,
    scenario: &'a str,
    #[serde(flatten)]
    report: &'a DiffReport,
}

impl ReportSink {
    #[must_use]
    pub fn new(dir: PathBuf) -> Self {
        Self { dir, run_id: Ulid::new() }
    }

    #[must_use]
    pub fn run_id(&self) -> Ulid {
        self.run_id
    }

    /// `<dir>/<suite>-results.json`.
    ///
    /// # Errors
    /// Returns an error when the directory or file cannot be written.
    pub fn write_suite(&self, suite: &str, cases: &[CaseSummary]) -> Result<PathBuf> {
        let document = SuiteDocument {
            run_id: self.run_id.to_string(),
            suite,
            generated_at: generated_at()?,
            passed: cases.iter().all(|case| case.passed),
            cases,
        };
        self.write(&format!("{suite}-results.json"), serde_json::to_value(document)?)
    }

    /// `<dir>/sqlite-compare-<case>.json`.
    ///
    /// # Errors
    /// Returns an error when the directory or file cannot be written.
    pub fn write_comparison(&self, case: &CompareCase, report: &DiffReport) -> Result<PathBuf> {
        let document = ComparisonDocument {
            run_id: self.run_id.to_string(),
            generated_at: generated_at()?,
            case_id: &case.id,
            scenario: &case.scenario,
            report,
        };
        let name = format!("sqlite-compare-{}.json", file_safe(&case.id));
        self.write(&name, serde_json::to_value(document)?)
    }

    fn write(&self, name: &str, value: Value) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir).with_context(|| {
            format!("failed to create report directory {}", self.dir.display())
        })?;
        let path = self.dir.join(name);
        let bytes = serde_json::to_vec_pretty(&with_contract_version(value))?;
        fs::write(&path, bytes)
            .with_context(|| format!("failed to write report {}", path.display()))?;
        info!(path = %path.display(), run_id = %self.run_id, "report written");
        Ok(path)
    }
}

fn generated_at() -> Result<String> {
    Ok(agent_acceptance_core::now_local().format(&Rfc3339)?)
}

fn file_safe(id: &str) -> String {
    id.chars()
        .map(|ch| if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' { ch } else { '_' })
        .collect()
}
