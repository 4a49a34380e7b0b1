use agent_acceptance_core::{
    diff_databases, verify, AcceptanceError, CaseSummary, CompareCase, DiffReport, Outcome,
    RecordSet, Result, RunContext, TestCase, COMPARISON_SPEC,
};
use agent_acceptance_staging::{LifecycleController, Pause, ServiceControl};
use agent_acceptance_store_mysql::MySqlDatabase;
use agent_acceptance_store_sqlite::SqliteDatabase;
use clap::ValueEnum;
use time::format_description::well_known::Rfc3339;
use time::{OffsetDateTime, PrimitiveDateTime};
use tracing::{error, info, info_span, warn};

pub const NOT_INCLUDED: &str = "not included";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Suite {
    DataCollection,
    Purge,
    DataPush,
    SqliteCompare,
}

impl Suite {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DataCollection => "data-collection",
            Self::Purge => "purge",
            Self::DataPush => "data-push",
            Self::SqliteCompare => "sqlite-compare",
        }
    }

    /// Sheet the suite's cases are read from.
    #[must_use]
    pub fn sheet_name(self) -> &'static str {
        match self {
            Self::DataCollection => "DataCollection Tests",
            Self::Purge => "Purge Tests",
            Self::DataPush => "DataPush Tests",
            Self::SqliteCompare => "SQLite Compare Tests",
        }
    }

    /// Prefix of the archive folder name.
    #[must_use]
    pub fn archive_label(self) -> &'static str {
        match self {
            Self::DataCollection => "DataCollect",
            Self::Purge => "Purge",
            Self::DataPush => "DataPush",
            Self::SqliteCompare => "SqLiteDbCompare",
        }
    }
}

/// Result of one comparison case.
#[derive(Debug, Clone)]
pub struct ComparisonOutcome {
    pub case: CompareCase,
    pub summary: CaseSummary,
    pub report: Option<DiffReport>,
}

/// Runs a suite's cases one after another. A failing case never stops the run.
pub struct SuiteRunner<S, P> {
    ctx: RunContext,
    lifecycle: LifecycleController<S, P>,
}

impl<S: ServiceControl, P: Pause> SuiteRunner<S, P> {
    pub fn new(ctx: RunContext, control: S, pause: P) -> Self {
        let lifecycle = LifecycleController::new(
            ctx.service_name.clone(),
            ctx.agent_log_name.clone(),
            ctx.settle,
            control,
            pause,
        );
        Self { ctx, lifecycle }
    }

    /// Run INSERT/SELECT/CLEAR cases of an operation suite.
    pub fn run_operation_cases(&mut self, suite: Suite, records: Vec<RecordSet>) -> Vec<CaseSummary> {
        records.into_iter().map(|record| self.run_operation(suite, record)).collect()
    }

    /// Run dual-database comparison cases.
    pub fn run_compare_cases(&mut self, cases: &[CompareCase]) -> Vec<ComparisonOutcome> {
        cases.iter().map(|case| self.run_comparison(case)).collect()
    }

    fn run_operation(&mut self, suite: Suite, record: RecordSet) -> CaseSummary {
        let id = record.get("testcasenumber").unwrap_or_default().to_string();
        let span = info_span!("case", suite = suite.as_str(), case = %id);
        let _entered = span.enter();

        let mut outcome = Outcome::start(id);
        let case = match TestCase::from_record(record) {
            Ok(case) => case,
            Err(err) => return summarize(outcome, None, String::new(), Some(&err)),
        };

        if !case.included() {
            info!(case = %case.id, "case not included, skipping");
            outcome.fail();
            outcome.finish();
            let mut summary = summarize(outcome, Some(case.action), case.table, None);
            summary.error = Some(NOT_INCLUDED.to_string());
            return summary;
        }

        match self.execute_operation(suite, &case, outcome.started_at) {
            Ok(passed) => {
                outcome.record(passed);
                summarize(outcome, Some(case.action), case.table, None)
            }
            Err(err) => summarize(outcome, Some(case.action), case.table, Some(&err)),
        }
    }

    fn execute_operation(
        &mut self,
        suite: Suite,
        case: &TestCase,
        started: OffsetDateTime,
    ) -> Result<bool> {
        if let Some(part) = case.source_folder() {
            let fixture = self.ctx.fixture_folder(part)?;
            let label = format!("{} - Test Case {} {}", suite.archive_label(), case.id, case.action);
            let archive = self.ctx.archive_folder(&label, wall_clock(started));
            let plan = match suite {
                Suite::DataPush => self.ctx.data_push_plan(&fixture, archive),
                _ => self.ctx.data_collection_plan(&fixture, archive, case.rebase_dates()),
            };
            self.lifecycle.run(&plan, wall_clock(agent_acceptance_core::now_local()))?;
        }

        let report = match suite {
            Suite::DataPush => {
                let endpoint = self.ctx.networked.as_ref().ok_or_else(|| {
                    AcceptanceError::Config(
                        "data push cases need `mysqlserver` and `portnumber` settings".into(),
                    )
                })?;
                let database = case.database_name().ok_or_else(|| {
                    AcceptanceError::Config(format!(
                        "{}... provide a value for the \"Database Name\" column",
                        case.id
                    ))
                })?;
                verify(case, MySqlDatabase::connect(endpoint, database)?)?
            }
            _ => verify(case, SqliteDatabase::open(&self.ctx.agent_database())?)?,
        };
        Ok(report.passed)
    }

    fn run_comparison(&mut self, case: &CompareCase) -> ComparisonOutcome {
        let span = info_span!("case", suite = Suite::SqliteCompare.as_str(), case = %case.id);
        let _entered = span.enter();

        let mut outcome = Outcome::start(case.id.clone());
        match self.execute_comparison(case, outcome.started_at) {
            Ok(report) => {
                outcome.record(report.passed);
                if !report.counts_passed {
                    warn!(case = %case.id, "row counts differ between the databases");
                }
                ComparisonOutcome {
                    case: case.clone(),
                    summary: summarize(outcome, None, case.scenario.clone(), None),
                    report: Some(report),
                }
            }
            Err(err) => ComparisonOutcome {
                case: case.clone(),
                summary: summarize(outcome, None, case.scenario.clone(), Some(&err)),
                report: None,
            },
        }
    }

    fn execute_comparison(&mut self, case: &CompareCase, started: OffsetDateTime) -> Result<DiffReport> {
        let fixture = self.ctx.fixture_folder(&case.scenario)?;
        let label = format!(
            "{} - Test Case {} {}",
            Suite::SqliteCompare.archive_label(),
            case.id,
            case.scenario
        );
        let archive = self.ctx.archive_folder(&label, wall_clock(started));
        let plan = self.ctx.compare_plan(&fixture, archive);
        // Missing reference data fails the case before the agent is touched.
        let expected = SqliteDatabase::open(&RunContext::fixture_database(&fixture))?;
        self.lifecycle.run(&plan, wall_clock(agent_acceptance_core::now_local()))?;

        let actual = SqliteDatabase::open(&self.ctx.agent_database())?;
        diff_databases(expected, actual, &COMPARISON_SPEC)
    }
}

fn wall_clock(at: OffsetDateTime) -> PrimitiveDateTime {
    PrimitiveDateTime::new(at.date(), at.time())
}

fn rfc3339(at: OffsetDateTime) -> String {
    at.format(&Rfc3339).unwrap_or_else(|_| at.to_string())
}

fn summarize(
    mut outcome: Outcome,
    action: Option<agent_acceptance_core::ActionType>,
    subject: String,
    err: Option<&AcceptanceError>,
) -> CaseSummary {
    if let Some(err) = err {
        error!(case = %outcome.case_id, kind = err.kind(), error = %err, "case aborted");
        outcome.fail();
    }
    outcome.finish();
    info!(case = %outcome.case_id, passed = outcome.passed, "case finished");
    CaseSummary {
        case_id: outcome.case_id,
        action,
        subject,
        started_at: rfc3339(outcome.started_at),
        ended_at: outcome.ended_at.map(rfc3339),
        passed: outcome.passed,
        error: err.map(ToString::to_string),
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::rc::Rc;
    use std::time::Duration;

    use rusqlite::Connection;

    use super::*;

    type TestResult = std::result::Result<(), Box<dyn std::error::Error>>;

    const SCHEMA: &str = r"
CREATE TABLE Observation (
  NodeId INTEGER, ObservationId INTEGER, DataPointId TEXT,
  CollectionTimestamp TEXT, ObservationHash BLOB
);
CREATE TABLE ObservationAttribute (
  NodeId INTEGER, ObservationId INTEGER, DataPointId TEXT,
  CollectionTimestamp TEXT, AttributeId INTEGER, AttributeValue TEXT
);
CREATE TABLE ObservationArchive (
  NodeId INTEGER, ObservationId INTEGER, DataPointId TEXT,
  CollectionTimestamp TEXT, StartLine INTEGER, EndLine INTEGER
);
INSERT INTO Observation VALUES (1, 1, 'cpu', '2024-06-01T00:00:00', x'aa');
INSERT INTO ObservationAttribute VALUES (1, 1, 'cpu', '2024-06-01T00:00:00', 10, 'high');
";

    /// Stands in for the agent: on start it drops a database into the cache.
    struct FakeAgent {
        produced: PathBuf,
        cache: PathBuf,
        starts: Rc<RefCell<usize>>,
    }

    impl ServiceControl for FakeAgent {
        fn start(&mut self, _service: &str) -> Result<()> {
            *self.starts.borrow_mut() += 1;
            fs::create_dir_all(&self.cache).map_err(|err| AcceptanceError::io(&self.cache, err))?;
            let target = self.cache.join("Project.sqlite");
            fs::copy(&self.produced, &target).map_err(|err| AcceptanceError::io(&target, err))?;
            Ok(())
        }

        fn stop(&mut self, _service: &str) -> Result<()> {
            Ok(())
        }
    }

    struct NoPause;

    impl Pause for NoPause {
        fn pause(&mut self, _duration: Duration, _reason: &str) {}
    }

    struct Machine {
        _dir: tempfile::TempDir,
        root: PathBuf,
        ctx: RunContext,
    }

    fn seed(path: &Path) -> std::result::Result<(), rusqlite::Error> {
        Connection::open(path)?.execute_batch(SCHEMA)
    }

    fn machine() -> std::result::Result<Machine, Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let root = dir.path().to_path_buf();
        for folder in ["cache", "Logs", "agent-logs", "logs", "mcm", "fixtures/Scenario/Logs"] {
            fs::create_dir_all(root.join(folder))?;
        }
        fs::write(
            root.join("fixtures/Scenario/Logs/app.log"),
            "2023-01-01T10:00:00 A\n2023-01-02T10:00:05 B\n",
        )?;
        fs::create_dir_all(root.join("fixtures/Scenario/SQLite Files"))?;
        seed(&root.join("fixtures/Scenario/SQLite Files/project.sqlite"))?;
        seed(&root.join("produced.sqlite"))?;

        let global = RecordSet::new()
            .with("Agent Program Cache", "%AGENT_CACHE%")
            .with("Service Name", "AgentSvc")
            .with("Wait Minutes For Project Client Log Collection", "1")
            .with("Wait Minutes For Project Client Data Push", "1")
            .with("Agent Log Destination Path", root.join("agent-logs").display().to_string())
            .with("Log Destination File", root.join("logs").display().to_string())
            .with("MCM Log Folder Path", root.join("mcm").display().to_string())
            .with("Log Source File Part 1", root.join("fixtures").display().to_string());
        let vars = HashMap::from([("AGENT_CACHE".to_string(), root.join("cache").display().to_string())]);
        let ctx = RunContext::from_record(&global, root.join("work"), |name| vars.get(name).cloned())?;
        Ok(Machine { _dir: dir, root, ctx })
    }

    fn runner(machine: &Machine, starts: &Rc<RefCell<usize>>) -> SuiteRunner<FakeAgent, NoPause> {
        let agent = FakeAgent {
            produced: machine.root.join("produced.sqlite"),
            cache: machine.root.join("cache"),
            starts: Rc::clone(starts),
        };
        SuiteRunner::new(machine.ctx.clone(), agent, NoPause)
    }

    fn select(id: &str, rows: &str) -> RecordSet {
        RecordSet::new()
            .with("Test Case Number", id)
            .with("Action Type", "SELECT")
            .with("Table Name", "Observation")
            .with("Number of Rows", rows)
            .with("NodeId", "1")
            .with("Include", "x")
            .with("Log Source Path Part 2", "Scenario")
    }

    #[test]
    fn data_collection_case_runs_the_lifecycle_then_verifies() -> TestResult {
        let machine = machine()?;
        let starts = Rc::new(RefCell::new(0));
        let mut runner = runner(&machine, &starts);

        let summaries = runner.run_operation_cases(
            Suite::DataCollection,
            vec![select("1", "1"), select("2", "5")],
        );

        assert_eq!(*starts.borrow(), 2);
        assert!(summaries[0].passed, "{:?}", summaries[0]);
        assert!(!summaries[1].passed);
        assert_eq!(summaries[1].error, None);
        assert_eq!(summaries[0].subject, "Observation");
        assert!(summaries.iter().all(|summary| summary.ended_at.is_some()));

        let archives = machine.root.join("work/TestArchive/DataCollect - Test Case 1 SELECT");
        assert_eq!(fs::read_dir(archives)?.count(), 1);
        Ok(())
    }

    #[test]
    fn excluded_and_invalid_cases_do_not_stop_the_run() -> TestResult {
        let machine = machine()?;
        let starts = Rc::new(RefCell::new(0));
        let mut runner = runner(&machine, &starts);

        let excluded = select("1", "1").with("Include", "");
        let invalid = RecordSet::new().with("Test Case Number", "2").with("Include", "x");
        let summaries =
            runner.run_operation_cases(Suite::Purge, vec![excluded, invalid, select("3", "1")]);

        assert_eq!(summaries[0].error.as_deref(), Some(NOT_INCLUDED));
        assert!(!summaries[0].passed);
        assert!(summaries[1].error.as_deref().is_some_and(|error| error.contains("Action Type")));
        assert!(summaries[2].passed);
        assert_eq!(*starts.borrow(), 1);
        Ok(())
    }

    #[test]
    fn data_push_without_endpoint_is_reported_per_case() -> TestResult {
        let machine = machine()?;
        let starts = Rc::new(RefCell::new(0));
        let mut runner = runner(&machine, &starts);

        let case = select("7", "1").with("Log Source Path Part 2", "");
        let summaries = runner.run_operation_cases(Suite::DataPush, vec![case]);

        assert!(!summaries[0].passed);
        assert!(summaries[0].error.as_deref().is_some_and(|error| error.contains("mysqlserver")));
        assert_eq!(*starts.borrow(), 0);
        Ok(())
    }

    #[test]
    fn comparison_diffs_the_fixture_against_the_agent_output() -> TestResult {
        let machine = machine()?;
        let starts = Rc::new(RefCell::new(0));
        let mut runner = runner(&machine, &starts);

        let cases = vec![
            CompareCase { id: "1".into(), scenario: "Scenario".into() },
            CompareCase { id: "2".into(), scenario: "Missing".into() },
        ];
        let outcomes = runner.run_compare_cases(&cases);

        let report = outcomes[0].report.as_ref().ok_or("first comparison has no report")?;
        assert!(report.passed);
        assert!(report.counts_passed);
        assert_eq!(report.mismatches().count(), 0);
        assert!(outcomes[0].summary.passed);

        assert!(outcomes[1].report.is_none());
        assert!(!outcomes[1].summary.passed);
        assert!(outcomes[1].summary.error.is_some());
        Ok(())
    }

    #[test]
    fn comparison_without_reference_database_never_starts_the_agent() -> TestResult {
        let machine = machine()?;
        let logs = machine.root.join("fixtures/NoReference/Logs");
        fs::create_dir_all(&logs)?;
        fs::write(logs.join("app.log"), "2023-01-01T10:00:00 A\n")?;
        let starts = Rc::new(RefCell::new(0));
        let mut runner = runner(&machine, &starts);

        let outcomes = runner
            .run_compare_cases(&[CompareCase { id: "3".into(), scenario: "NoReference".into() }]);

        assert_eq!(*starts.borrow(), 0);
        assert!(outcomes[0].report.is_none());
        assert!(!outcomes[0].summary.passed);
        assert!(outcomes[0].summary.error.is_some());
        Ok(())
    }

    #[test]
    fn suites_name_their_sheets() {
        assert_eq!(Suite::DataCollection.sheet_name(), "DataCollection Tests");
        assert_eq!(Suite::SqliteCompare.archive_label(), "SqLiteDbCompare");
        assert_eq!(Suite::DataPush.as_str(), "data-push");
    }
}
