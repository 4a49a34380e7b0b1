use std::path::PathBuf;

use agent_acceptance_core::{diff_databases, now_local, RunContext, COMPARISON_SPEC};
use agent_acceptance_staging::{
    rebase_file_to, verify_archive, ShellServiceControl, ThreadPause, TimestampDialect,
};
use agent_acceptance_store_sqlite::SqliteDatabase;
use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::{json, Value};
use time::format_description::FormatItem;
use time::macros::format_description;
use time::PrimitiveDateTime;
use tracing::info;

mod load;
mod logging;
mod report;
mod runner;

use report::ReportSink;
use runner::{Suite, SuiteRunner};

const CLI_CONTRACT_VERSION: &str = "aat.v1";
const NOW_FORMAT: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");

#[derive(Debug, Parser)]
#[command(name = "aat")]
#[command(about = "Agent acceptance test runner")]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(long, global = true, default_value_t = false)]
    verbose: bool,

    /// Also write every log event as a JSON line to this file.
    #[arg(long, global = true)]
    log_json: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run one suite of test cases against the agent.
    Run(RunArgs),
    /// Rewrite a log file so its last timestamp becomes "now".
    Rebase(RebaseArgs),
    /// Compare two agent databases.
    Diff(DiffArgs),
    /// Re-hash an archive folder against its manifest.
    VerifyArchive(VerifyArchiveArgs),
}

#[derive(Debug, Args)]
struct RunArgs {
    /// Global settings: a workbook with a `Test Data` sheet, or YAML.
    #[arg(long)]
    config: PathBuf,
    /// Test cases: a workbook, or YAML. Defaults to the config file.
    #[arg(long)]
    cases: Option<PathBuf>,
    #[arg(long, value_enum)]
    suite: Suite,
    #[arg(long, default_value = "./reports")]
    report_dir: PathBuf,
    /// Root of the `TestArchive` folder. Defaults to the current directory.
    #[arg(long)]
    working_dir: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct RebaseArgs {
    #[arg(long = "input", default_value = "input.log")]
    input: PathBuf,
    #[arg(long, default_value = "output.log")]
    output: PathBuf,
    /// Timestamps look like `Sat Jun  1 09:30:00 2024`.
    #[arg(long, default_value_t = false)]
    agent_format: bool,
    /// Reference instant, `YYYY-MM-DDTHH:MM:SS`. Defaults to the local clock.
    #[arg(long)]
    now: Option<String>,
}

#[derive(Debug, Args)]
struct DiffArgs {
    #[arg(long)]
    expected: PathBuf,
    #[arg(long)]
    actual: PathBuf,
}

#[derive(Debug, Args)]
struct VerifyArchiveArgs {
    #[arg(long)]
    dir: PathBuf,
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose, cli.log_json.as_deref())?;

    match cli.command {
        Command::Run(args) => run_suite(args),
        Command::Rebase(args) => run_rebase(&args),
        Command::Diff(args) => run_diff(&args),
        Command::VerifyArchive(args) => run_verify_archive(&args),
    }
}

fn run_suite(args: RunArgs) -> Result<()> {
    let working_dir = match args.working_dir {
        Some(dir) => dir,
        None => std::env::current_dir().context("failed to resolve the current directory")?,
    };
    let global = load::load_global(&args.config)?;
    let ctx = RunContext::from_record(&global, working_dir, |name| std::env::var(name).ok())?;
    let cases_path = args.cases.unwrap_or_else(|| args.config.clone());
    let table = load::load_table(&cases_path, args.suite.sheet_name())?;

    let sink = ReportSink::new(args.report_dir);
    info!(
        suite = args.suite.as_str(),
        run_id = %sink.run_id(),
        cases = table.rows.len(),
        "starting suite"
    );

    let control = ShellServiceControl::new(ctx.service_commands.clone());
    let mut runner = SuiteRunner::new(ctx, control, ThreadPause);

    let (summaries, comparison_reports) = if args.suite == Suite::SqliteCompare {
        let outcomes = runner.run_compare_cases(&table.compare_cases()?);
        let mut written = Vec::new();
        for outcome in &outcomes {
            if let Some(report) = &outcome.report {
                written.push(sink.write_comparison(&outcome.case, report)?);
            }
        }
        (outcomes.into_iter().map(|outcome| outcome.summary).collect::<Vec<_>>(), written)
    } else {
        (runner.run_operation_cases(args.suite, table.records()), Vec::new())
    };

    let results = sink.write_suite(args.suite.as_str(), &summaries)?;
    let passed = summaries.iter().all(|summary| summary.passed);
    let failed = summaries.iter().filter(|summary| !summary.passed).count();

    emit_json(json!({
        "run_id": sink.run_id().to_string(),
        "suite": args.suite.as_str(),
        "passed": passed,
        "failed": failed,
        "results": results,
        "comparison_reports": comparison_reports,
        "cases": summaries,
    }))?;

    if !passed {
        bail!("{failed} of {} cases failed", summaries.len());
    }
    Ok(())
}

fn run_rebase(args: &RebaseArgs) -> Result<()> {
    let now = match &args.now {
        Some(raw) => PrimitiveDateTime::parse(raw, NOW_FORMAT)
            .with_context(|| format!("--now must look like 2024-06-01T09:30:00, got {raw:?}"))?,
        None => {
            let local = now_local();
            PrimitiveDateTime::new(local.date(), local.time())
        }
    };
    let dialect = if args.agent_format { TimestampDialect::Agent } else { TimestampDialect::Iso };

    rebase_file_to(&args.input, &args.output, dialect, now)?;

    emit_json(json!({
        "input": args.input,
        "output": args.output,
        "dialect": dialect.as_str(),
        "now": now.format(NOW_FORMAT)?,
    }))
}

fn run_diff(args: &DiffArgs) -> Result<()> {
    let expected = SqliteDatabase::open(&args.expected)?;
    let actual = SqliteDatabase::open(&args.actual)?;
    let report = diff_databases(expected, actual, &COMPARISON_SPEC)?;
    let passed = report.passed;

    emit_json(json!({
        "expected": args.expected,
        "actual": args.actual,
        "report": report,
    }))?;

    if !passed {
        bail!("databases differ");
    }
    Ok(())
}

fn run_verify_archive(args: &VerifyArchiveArgs) -> Result<()> {
    let changed = verify_archive(&args.dir)?;
    let passed = changed.is_empty();

    emit_json(json!({
        "dir": args.dir,
        "passed": passed,
        "changed": changed,
    }))?;

    if !passed {
        bail!("{} archived files changed since archiving", changed.len());
    }
    Ok(())
}
