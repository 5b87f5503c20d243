//! Starting the target program and reaping it afterwards

use std::os::unix::process::CommandExt;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crate::collaborators::{KillOutcome, SystemOps, TracedLauncher};
use crate::config::RunConfiguration;
use crate::error::{ErrorList, StartraceError, TrialStage};
use crate::files::ensure_exists_and_open;
use crate::trace_channel::TraceSession;

const REAP_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// How long to wait for the group to die after SIGKILL
const KILL_WAIT: Duration = Duration::from_secs(2);

/// Proof that reaping a launched process is over
///
/// Only produced by [`LaunchedProcess::wait`] or [`LaunchedProcess::reap`];
/// required to tear down a [`TraceSession`]. `status` is `None` when the
/// process could not be collected.
#[derive(Debug)]
pub struct Reaped {
    status: Option<ExitStatus>,
}

impl Reaped {
    pub fn status(&self) -> Option<ExitStatus> {
        self.status
    }

    #[cfg(test)]
    pub(crate) fn assume_exited() -> Self {
        Self { status: None }
    }
}

/// Command tokens to execute, with the package-run wrapper prepended when
/// requested
pub fn target_command(config: &RunConfiguration, system: &dyn SystemOps) -> Vec<String> {
    if config.use_snap_run {
        system.wrap_package_run(&config.command)
    } else {
        config.command.clone()
    }
}

/// Discard the package's cached namespace before launching, if requested
///
/// Keyed on the command as typed (the package name), not the wrapped one.
pub fn discard_namespace_if_requested(
    config: &RunConfiguration,
    system: &dyn SystemOps,
) -> Result<(), StartraceError> {
    if !config.discard_snap_ns {
        return Ok(());
    }
    if !config.use_snap_run {
        return Err(StartraceError::Config(
            "cannot use --discard-snap-ns without --use-snap-run".to_string(),
        ));
    }
    let package = config.base_command();
    tracing::debug!(package, "discarding snap namespace");
    system
        .discard_namespace(package)
        .map_err(|reason| StartraceError::NamespaceDiscard {
            name: package.to_string(),
            reason,
        })
}

/// Build the unstarted command: tracer-wrapped when a session is given,
/// direct otherwise, with stdio wired up
pub fn build_command(
    config: &RunConfiguration,
    target: &[String],
    tracer: &dyn TracedLauncher,
    session: Option<&TraceSession>,
) -> Result<Command, StartraceError> {
    let mut cmd = match session {
        Some(session) => tracer
            .launch_traced(session.pipe_path(), target)
            .map_err(|e| StartraceError::TraceSetup(format!("{:#}", e)))?,
        None => {
            let (program, args) = target.split_first().ok_or_else(|| {
                StartraceError::Config("a command to run is required".to_string())
            })?;
            let mut cmd = Command::new(program);
            cmd.args(args);
            cmd
        }
    };

    cmd.stdin(Stdio::inherit());
    cmd.stdout(log_destination(config.stdout_log.as_deref())?);
    cmd.stderr(log_destination(config.stderr_log.as_deref())?);
    Ok(cmd)
}

fn log_destination(path: Option<&std::path::Path>) -> Result<Stdio, StartraceError> {
    match path {
        Some(path) => ensure_exists_and_open(path, false)
            .map(Stdio::from)
            .map_err(StartraceError::CommandLog),
        None => Ok(Stdio::inherit()),
    }
}

/// A started target program
#[derive(Debug)]
pub struct LaunchedProcess {
    child: Child,
    started: Instant,
}

impl LaunchedProcess {
    /// Spawn `cmd` as the leader of a new process group, timestamping just
    /// before process creation
    pub fn spawn(mut cmd: Command) -> Result<Self, StartraceError> {
        let program = cmd.get_program().to_string_lossy().into_owned();
        cmd.process_group(0);
        let started = Instant::now();
        let child = cmd
            .spawn()
            .map_err(|source| StartraceError::Launch { program, source })?;
        tracing::debug!(pid = child.id(), "process started");
        Ok(Self { child, started })
    }

    pub fn id(&self) -> u32 {
        self.child.id()
    }

    pub fn started(&self) -> Instant {
        self.started
    }

    /// Block until the process exits on its own
    pub fn wait(mut self, errors: &mut ErrorList) -> Reaped {
        match self.child.wait() {
            Ok(status) => Reaped {
                status: Some(status),
            },
            Err(e) => {
                errors.record(TrialStage::Reap, e);
                Reaped { status: None }
            }
        }
    }

    /// Give the process `grace` to exit after teardown, then kill its whole
    /// process group
    ///
    /// Never blocks for longer than `grace` plus a short bounded wait after
    /// the kill.
    pub fn reap(
        mut self,
        grace: Duration,
        system: &dyn SystemOps,
        errors: &mut ErrorList,
    ) -> Reaped {
        match self.poll_exit(grace) {
            Ok(Some(status)) => {
                return Reaped {
                    status: Some(status),
                }
            }
            Ok(None) => {}
            Err(e) => errors.record(TrialStage::Reap, e),
        }

        let pgid = self.child.id() as i32;
        errors.record(
            TrialStage::Reap,
            format!(
                "pid {} still running {:?} after teardown, killing its process group",
                pgid, grace
            ),
        );
        match system.kill_group(pgid) {
            Ok(KillOutcome::Killed) => {}
            Ok(KillOutcome::AlreadyExited) => {
                tracing::debug!(pgid, "process group already gone");
            }
            Err(e) => errors.record(TrialStage::Reap, e),
        }

        match self.poll_exit(KILL_WAIT) {
            Ok(Some(status)) => Reaped {
                status: Some(status),
            },
            Ok(None) => {
                errors.record(
                    TrialStage::Reap,
                    format!("pid {} survived SIGKILL, abandoning it", pgid),
                );
                Reaped { status: None }
            }
            Err(e) => {
                errors.record(TrialStage::Reap, e);
                Reaped { status: None }
            }
        }
    }

    /// Poll for exit until `limit` passes. A limit too large to represent
    /// means no deadline.
    fn poll_exit(&mut self, limit: Duration) -> std::io::Result<Option<ExitStatus>> {
        let deadline = Instant::now().checked_add(limit);
        loop {
            if let Some(status) = self.child.try_wait()? {
                return Ok(Some(status));
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Ok(None);
            }
            thread::sleep(REAP_POLL_INTERVAL);
        }
    }
}
