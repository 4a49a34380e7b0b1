use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use agent_acceptance_core::{AcceptanceError, LifecyclePlan, Result, ServiceCommands, SettleDelays};
use serde::Serialize;
use time::PrimitiveDateTime;
use tracing::{debug, info, warn};

use crate::rebase::Rebaser;
use crate::staging::{archive, clean_paths, stage_paths, ArchiveManifest};

/// Starts and stops the agent service. Neither call waits for the service to
/// change state; callers pause afterwards.
pub trait ServiceControl {
    /// # Errors
    /// Returns an environment error when the control command cannot be launched.
    fn start(&mut self, service: &str) -> Result<()>;

    /// # Errors
    /// Returns an environment error when the control command cannot be launched.
    fn stop(&mut self, service: &str) -> Result<()>;
}

/// Blocking wait between lifecycle steps.
pub trait Pause {
    fn pause(&mut self, duration: Duration, reason: &str);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadPause;

impl Pause for ThreadPause {
    fn pause(&mut self, duration: Duration, reason: &str) {
        info!(seconds = duration.as_secs(), reason, "waiting");
        thread::sleep(duration);
    }
}

/// Runs the configured start/stop command lines with `{service}` replaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellServiceControl {
    commands: ServiceCommands,
}

impl ShellServiceControl {
    #[must_use]
    pub fn new(commands: ServiceCommands) -> Self {
        Self { commands }
    }

    fn launch(template: &[String], service: &str) -> Result<()> {
        let argv = render(template, service);
        let (program, args) = argv.split_first().ok_or_else(|| {
            AcceptanceError::Config("service control command is empty".into())
        })?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|err| {
                AcceptanceError::Environment(format!("failed to launch `{}`: {err}", argv.join(" ")))
            })?;

        let command = argv.join(" ");
        debug!(%command, pid = child.id(), "service command launched");
        thread::spawn(move || match child.wait() {
            Ok(status) => debug!(%command, %status, "service command exited"),
            Err(err) => warn!(%command, error = %err, "failed to reap service command"),
        });
        Ok(())
    }
}

fn render(template: &[String], service: &str) -> Vec<String> {
    template.iter().map(|part| part.replace("{service}", service)).collect()
}

impl ServiceControl for ShellServiceControl {
    fn start(&mut self, service: &str) -> Result<()> {
        info!(service, "starting service");
        Self::launch(&self.commands.start, service)
    }

    fn stop(&mut self, service: &str) -> Result<()> {
        info!(service, "stopping service");
        Self::launch(&self.commands.stop, service)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LifecycleReport {
    pub cleaned: usize,
    pub staged_files: usize,
    pub archive: ArchiveManifest,
}

/// Drives one stop, clean, stage, start, wait, archive, stop cycle.
pub struct LifecycleController<S, P> {
    service_name: String,
    agent_log_name: String,
    settle: SettleDelays,
    control: S,
    pause: P,
}

impl<S: ServiceControl, P: Pause> LifecycleController<S, P> {
    pub fn new(
        service_name: impl Into<String>,
        agent_log_name: impl Into<String>,
        settle: SettleDelays,
        control: S,
        pause: P,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            agent_log_name: agent_log_name.into(),
            settle,
            control,
            pause,
        }
    }

    /// Run `plan`. Log timestamps, when rebased, are aligned to `now`.
    ///
    /// Failures while stopping, cleaning, staging or starting abort the cycle.
    /// The service is stopped again, and given time to settle, even when
    /// archiving fails.
    ///
    /// # Errors
    /// Returns the first environment, configuration, I/O or parse error hit.
    pub fn run(&mut self, plan: &LifecyclePlan, now: PrimitiveDateTime) -> Result<LifecycleReport> {
        info!(service = %self.service_name, "beginning agent tasks");

        self.control.stop(&self.service_name)?;
        self.pause.pause(self.settle.after_stop, "service stop");

        let cleaned = clean_paths(&plan.clean)?;
        self.pause.pause(self.settle.after_clean, "clean");

        let rebaser = plan.rebase_dates.then(|| Rebaser::new(self.agent_log_name.clone(), now));
        let staged = stage_paths(&plan.copy_sources, &plan.copy_destinations, rebaser.as_ref())?;
        self.pause.pause(self.settle.after_stage, "stage");

        self.control.start(&self.service_name)?;
        self.pause.pause(plan.wait, "agent processing");

        let archived = archive(&plan.archive_destination, &plan.archive);
        self.control.stop(&self.service_name)?;
        self.pause.pause(self.settle.after_stop, "service stop");
        let archive = archived?;

        info!(
            service = %self.service_name,
            cleaned,
            staged = staged.len(),
            archive = %plan.archive_destination.display(),
            "ending agent tasks"
        );
        Ok(LifecycleReport { cleaned, staged_files: staged.len(), archive })
    }
}
