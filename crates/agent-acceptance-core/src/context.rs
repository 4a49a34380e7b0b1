use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use time::macros::format_description;
use time::PrimitiveDateTime;

use crate::error::{AcceptanceError, Result};
use crate::record::{parse_rounded, RecordSet};

pub const DEFAULT_AGENT_LOG_NAME: &str = "agentProgramV3.log";
pub const DEFAULT_AGENT_DATABASE_FILE: &str = "Project.sqlite";
pub const DEFAULT_START_COMMAND: &str = "cmd /c net start {service}";
pub const DEFAULT_STOP_COMMAND: &str = "cmd /c net stop {service}";

const ARCHIVE_ROOT: &str = "TestArchive";
const FIXTURE_DATABASE: &str = "SQLite Files/project.sqlite";
const FIXTURE_LOG_FOLDERS: [&str; 5] = ["Agent Logs", "Logs", "DG", "RCP", "RCT"];

/// Directories the agent reads from and writes to on the machine under test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentPaths {
    pub cache: PathBuf,
    /// `<cache>/../Logs`, where the agent writes its own diagnostics.
    pub agent_logs: PathBuf,
    pub agent_log_destination: PathBuf,
    pub log_destination: PathBuf,
    pub mcm_log_folder: PathBuf,
    pub fixture_root: Option<PathBuf>,
    pub database_file: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SettleDelays {
    pub after_stop: Duration,
    pub after_clean: Duration,
    pub after_stage: Duration,
}

impl Default for SettleDelays {
    fn default() -> Self {
        Self {
            after_stop: Duration::from_secs(10),
            after_clean: Duration::from_secs(5),
            after_stage: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceCommands {
    pub start: Vec<String>,
    pub stop: Vec<String>,
}

impl ServiceCommands {
    #[must_use]
    pub fn from_templates(start: &str, stop: &str) -> Self {
        Self { start: split_template(start), stop: split_template(stop) }
    }
}

impl Default for ServiceCommands {
    fn default() -> Self {
        Self::from_templates(DEFAULT_START_COMMAND, DEFAULT_STOP_COMMAND)
    }
}

fn split_template(template: &str) -> Vec<String> {
    template.split_whitespace().map(str::to_string).collect()
}

/// Host, port and credentials for the networked database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkedEndpoint {
    pub host: String,
    pub port: u16,
    pub user: String,
    #[serde(skip_serializing)]
    pub password: String,
}

/// Everything a run needs to know about the machine under test.
///
/// Built once from the global record; nothing downstream reads the process
/// environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunContext {
    pub working_dir: PathBuf,
    pub service_name: String,
    pub paths: AgentPaths,
    pub data_collection_wait: Duration,
    pub data_push_wait: Duration,
    pub settle: SettleDelays,
    pub service_commands: ServiceCommands,
    pub agent_log_name: String,
    pub networked: Option<NetworkedEndpoint>,
}

/// The inputs of one stop → clean → stage → start → wait → archive → stop cycle.
///
/// `copy_sources` and `copy_destinations` are positionally paired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LifecyclePlan {
    pub wait: Duration,
    pub clean: Vec<PathBuf>,
    pub copy_sources: Vec<PathBuf>,
    pub copy_destinations: Vec<PathBuf>,
    pub archive_destination: PathBuf,
    pub archive: Vec<PathBuf>,
    pub rebase_dates: bool,
}

impl RunContext {
    /// Build the context from the global record.
    ///
    /// `env` resolves the environment variable named by `agentprogramcache`.
    ///
    /// # Errors
    /// Returns a configuration error when a required key is missing or the cache
    /// variable is unset, and a parse error for malformed numbers.
    pub fn from_record<F>(global: &RecordSet, working_dir: PathBuf, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let cache_var: String = global
            .require("agentprogramcache")?
            .chars()
            .filter(|ch| *ch != '%' && *ch != '/')
            .collect();
        let cache = env(&cache_var).filter(|value| !value.is_empty()).ok_or_else(|| {
            AcceptanceError::Config(format!(
                "environment variable `{cache_var}` for the agent cache is not set"
            ))
        })?;
        let cache = PathBuf::from(cache);
        let agent_logs = cache.join("..").join("Logs");

        let paths = AgentPaths {
            agent_logs,
            agent_log_destination: PathBuf::from(global.require("agentlogdestinationpath")?),
            log_destination: PathBuf::from(global.require("logdestinationfile")?),
            mcm_log_folder: PathBuf::from(global.require("mcmlogfolderpath")?),
            fixture_root: global.value("logsourcefilepart1").map(PathBuf::from),
            database_file: global
                .value("agentdatabasefile")
                .unwrap_or(DEFAULT_AGENT_DATABASE_FILE)
                .to_string(),
            cache,
        };

        let settle = SettleDelays {
            after_stop: seconds_or(global, "stopsettleseconds", SettleDelays::default().after_stop)?,
            after_clean: seconds_or(
                global,
                "cleansettleseconds",
                SettleDelays::default().after_clean,
            )?,
            after_stage: seconds_or(
                global,
                "stagesettleseconds",
                SettleDelays::default().after_stage,
            )?,
        };

        let networked = match global.value("mysqlserver") {
            Some(host) => {
                let port = parse_rounded("portnumber", global.require("portnumber")?)?;
                let port = u16::try_from(port).map_err(|_| {
                    AcceptanceError::Parse(format!("field `portnumber` is not a TCP port: {port}"))
                })?;
                Some(NetworkedEndpoint {
                    host: host.to_string(),
                    port,
                    user: global.value("mysqluser").unwrap_or("root").to_string(),
                    password: global.value("mysqlpassword").unwrap_or_default().to_string(),
                })
            }
            None => None,
        };

        Ok(Self {
            working_dir,
            service_name: global.require("servicename")?.to_string(),
            data_collection_wait: minutes(global, "waitminutesforprojectclientlogcollection")?,
            data_push_wait: minutes(global, "waitminutesforprojectclientdatapush")?,
            settle,
            service_commands: ServiceCommands::from_templates(
                global.value("servicestartcommand").unwrap_or(DEFAULT_START_COMMAND),
                global.value("servicestopcommand").unwrap_or(DEFAULT_STOP_COMMAND),
            ),
            agent_log_name: global
                .value("agentlogname")
                .unwrap_or(DEFAULT_AGENT_LOG_NAME)
                .to_string(),
            networked,
            paths,
        })
    }

    /// Database file the agent produces in its cache.
    #[must_use]
    pub fn agent_database(&self) -> PathBuf {
        self.paths.cache.join(&self.paths.database_file)
    }

    /// Fixture folder for an operation case (`<fixture root><part 2>`).
    ///
    /// # Errors
    /// Returns a configuration error when `logsourcefilepart1` was not configured.
    pub fn fixture_folder(&self, part: &str) -> Result<PathBuf> {
        let root = self.paths.fixture_root.as_ref().ok_or_else(|| {
            AcceptanceError::Config("`logsourcefilepart1` is required to stage fixtures".into())
        })?;
        Ok(root.join(part))
    }

    /// Reference database shipped with a fixture folder.
    #[must_use]
    pub fn fixture_database(fixture: &Path) -> PathBuf {
        fixture.join(FIXTURE_DATABASE)
    }

    /// `<working dir>/TestArchive/<label>/<start time with dashes>`.
    #[must_use]
    pub fn archive_folder(&self, label: &str, started: PrimitiveDateTime) -> PathBuf {
        self.working_dir.join(ARCHIVE_ROOT).join(label).join(archive_stamp(started))
    }

    fn operation_clean_paths(&self) -> Vec<PathBuf> {
        vec![
            self.paths.agent_log_destination.clone(),
            self.paths.log_destination.clone(),
            self.paths.mcm_log_folder.clone(),
            self.paths.cache.clone(),
            self.paths.agent_logs.clone(),
        ]
    }

    fn log_fixture_pairs(&self, fixture: &Path) -> (Vec<PathBuf>, Vec<PathBuf>) {
        let sources = FIXTURE_LOG_FOLDERS.iter().map(|folder| fixture.join(folder)).collect();
        let destinations = vec![
            self.paths.agent_log_destination.clone(),
            self.paths.log_destination.clone(),
            self.paths.mcm_log_folder.clone(),
            self.paths.mcm_log_folder.clone(),
            self.paths.mcm_log_folder.clone(),
        ];
        (sources, destinations)
    }

    #[must_use]
    pub fn data_collection_plan(
        &self,
        fixture: &Path,
        archive_destination: PathBuf,
        rebase_dates: bool,
    ) -> LifecyclePlan {
        let (copy_sources, copy_destinations) = self.log_fixture_pairs(fixture);
        LifecyclePlan {
            wait: self.data_collection_wait,
            clean: self.operation_clean_paths(),
            copy_sources,
            copy_destinations,
            archive_destination,
            archive: vec![
                self.paths.log_destination.clone(),
                self.paths.agent_log_destination.clone(),
                self.paths.mcm_log_folder.clone(),
                self.paths.cache.clone(),
                self.paths.agent_logs.clone(),
            ],
            rebase_dates,
        }
    }

    #[must_use]
    pub fn data_push_plan(&self, fixture: &Path, archive_destination: PathBuf) -> LifecyclePlan {
        LifecyclePlan {
            wait: self.data_push_wait,
            clean: self.operation_clean_paths(),
            copy_sources: vec![Self::fixture_database(fixture)],
            copy_destinations: vec![self.paths.cache.clone()],
            archive_destination,
            archive: vec![self.paths.cache.clone(), self.paths.agent_logs.clone()],
            rebase_dates: false,
        }
    }

    #[must_use]
    pub fn compare_plan(&self, fixture: &Path, archive_destination: PathBuf) -> LifecyclePlan {
        let (copy_sources, copy_destinations) = self.log_fixture_pairs(fixture);
        LifecyclePlan {
            wait: self.data_collection_wait,
            clean: vec![
                self.paths.agent_log_destination.clone(),
                self.paths.log_destination.clone(),
                self.paths.mcm_log_folder.clone(),
                self.paths.cache.clone(),
            ],
            copy_sources,
            copy_destinations,
            archive_destination,
            archive: vec![
                fixture.join("Logs"),
                self.paths.cache.clone(),
                self.paths.agent_logs.clone(),
            ],
            rebase_dates: false,
        }
    }
}

fn minutes(global: &RecordSet, key: &str) -> Result<Duration> {
    let value = parse_rounded(key, global.require(key)?)?;
    let value = u64::try_from(value)
        .map_err(|_| AcceptanceError::Parse(format!("field `{key}` must not be negative")))?;
    Ok(Duration::from_secs(value * 60))
}

fn seconds_or(global: &RecordSet, key: &str, default: Duration) -> Result<Duration> {
    match global.value(key) {
        Some(raw) => {
            let value = parse_rounded(key, raw)?;
            let value = u64::try_from(value)
                .map_err(|_| AcceptanceError::Parse(format!("field `{key}` must not be negative")))?;
            Ok(Duration::from_secs(value))
        }
        None => Ok(default),
    }
}

fn archive_stamp(started: PrimitiveDateTime) -> String {
    let format = format_description!("[year]-[month]-[day]T[hour]-[minute]-[second]");
    started.format(&format).unwrap_or_else(|_| started.to_string().replace(':', "-"))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use time::macros::datetime;

    use super::*;

    fn global() -> RecordSet {
        RecordSet::new()
            .with("Agent Program Cache", "%AGENT_CACHE%")
            .with("Service Name", "AgentSvc")
            .with("Wait Minutes For Project Client Log Collection", "2.0")
            .with("Wait Minutes For Project Client Data Push", "1")
            .with("Agent Log Destination Path", "/agent/logs")
            .with("Log Destination File", "/var/logs")
            .with("MCM Log Folder Path", "/mcm")
            .with("Log Source File Part 1", "/fixtures")
    }

    fn env() -> impl Fn(&str) -> Option<String> {
        let vars = HashMap::from([("AGENT_CACHE".to_string(), "/agent/cache".to_string())]);
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn context_resolves_cache_through_injected_environment() -> Result<()> {
        let ctx = RunContext::from_record(&global(), PathBuf::from("/work"), env())?;

        assert_eq!(ctx.paths.cache, PathBuf::from("/agent/cache"));
        assert_eq!(ctx.paths.agent_logs, PathBuf::from("/agent/cache/../Logs"));
        assert_eq!(ctx.data_collection_wait, Duration::from_secs(120));
        assert_eq!(ctx.data_push_wait, Duration::from_secs(60));
        assert_eq!(ctx.settle, SettleDelays::default());
        assert_eq!(ctx.service_commands.start, vec!["cmd", "/c", "net", "start", "{service}"]);
        assert_eq!(ctx.agent_database(), PathBuf::from("/agent/cache/Project.sqlite"));
        assert!(ctx.networked.is_none());
        Ok(())
    }

    #[test]
    fn unset_cache_variable_is_a_configuration_error() {
        let result = RunContext::from_record(&global(), PathBuf::from("/work"), |_| None);
        assert!(matches!(result, Err(AcceptanceError::Config(_))));
    }

    #[test]
    fn networked_endpoint_needs_a_port() {
        let record = global().with("MySql Server", "db.local");
        let result = RunContext::from_record(&record, PathBuf::from("/work"), env());
        assert!(matches!(result, Err(AcceptanceError::Config(_))));
    }

    #[test]
    fn data_collection_plan_pairs_fixture_folders_with_destinations() -> Result<()> {
        let ctx = RunContext::from_record(&global(), PathBuf::from("/work"), env())?;
        let fixture = ctx.fixture_folder("case-1")?;
        let archive = ctx.archive_folder("DataCollect - Test Case 1 SELECT", datetime!(2024-06-01 10:15:30));
        let plan = ctx.data_collection_plan(&fixture, archive.clone(), true);

        assert_eq!(plan.copy_sources.len(), plan.copy_destinations.len());
        assert_eq!(plan.copy_sources[0], PathBuf::from("/fixtures/case-1/Agent Logs"));
        assert_eq!(plan.copy_destinations[4], PathBuf::from("/mcm"));
        assert_eq!(plan.clean.len(), 5);
        assert!(plan.rebase_dates);
        assert_eq!(
            archive,
            PathBuf::from("/work/TestArchive/DataCollect - Test Case 1 SELECT/2024-06-01T10-15-30")
        );
        Ok(())
    }

    #[test]
    fn data_push_plan_seeds_the_cache_with_the_fixture_database() -> Result<()> {
        let ctx = RunContext::from_record(&global(), PathBuf::from("/work"), env())?;
        let plan = ctx.data_push_plan(Path::new("/fixtures/push"), PathBuf::from("/archive"));

        assert_eq!(
            plan.copy_sources,
            vec![PathBuf::from("/fixtures/push/SQLite Files/project.sqlite")]
        );
        assert_eq!(plan.copy_destinations, vec![PathBuf::from("/agent/cache")]);
        assert_eq!(plan.wait, Duration::from_secs(60));
        assert!(!plan.rebase_dates);
        Ok(())
    }
}
