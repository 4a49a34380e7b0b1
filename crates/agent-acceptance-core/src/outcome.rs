use serde::Serialize;
use time::OffsetDateTime;

use crate::case::ActionType;

/// Local wall-clock time, falling back to UTC when the offset cannot be determined.
#[must_use]
pub fn now_local() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}

/// Pass/fail and timing for one case. Starts passing; any failed check flips it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub case_id: String,
    pub passed: bool,
    pub started_at: OffsetDateTime,
    pub ended_at: Option<OffsetDateTime>,
}

impl Outcome {
    #[must_use]
    pub fn start(case_id: impl Into<String>) -> Self {
        Self::start_at(case_id, now_local())
    }

    #[must_use]
    pub fn start_at(case_id: impl Into<String>, started_at: OffsetDateTime) -> Self {
        Self { case_id: case_id.into(), passed: true, started_at, ended_at: None }
    }

    /// Fold a check result in; a failure is sticky.
    pub fn record(&mut self, passed: bool) {
        self.passed &= passed;
    }

    pub fn fail(&mut self) {
        self.passed = false;
    }

    pub fn finish(&mut self) {
        if self.ended_at.is_none() {
            self.ended_at = Some(now_local());
        }
    }
}

/// What the report sink receives for an operation case.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CaseSummary {
    pub case_id: String,
    pub action: Option<ActionType>,
    /// Table name for operation cases, scenario name for comparison cases.
    pub subject: String,
    pub started_at: String,
    pub ended_at: Option<String>,
    pub passed: bool,
    pub error: Option<String>,
}
