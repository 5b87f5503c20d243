//! Trial runner: one full launch, measure, teardown cycle per trial
//!
//! Step order for a trial:
//!
//! 1. prepare script (failure recorded)
//! 2. trace session, when tracing (setup failure is fatal)
//! 3. build the command, discard the snap namespace if asked (fatal on failure)
//! 4. flush caches (fatal: timing would be meaningless)
//! 5. start the process
//! 6. wait for natural exit, or wait for the window and run the
//!    [`TerminationCascade`]
//! 7. reap the process (its whole process group is killed if it lingers),
//!    then collect the trace, waiting at most the reap timeout for the stream
//!    to end
//! 8. restore script (failure recorded)

use std::sync::Arc;
use std::time::Duration;

use crate::cascade::TerminationCascade;
use crate::collaborators::Collaborators;
use crate::config::RunConfiguration;
use crate::error::{ErrorList, Result, StartraceError, TrialStage};
use crate::launcher::{self, LaunchedProcess};
use crate::results::{Execution, OutputResult};
use crate::trace_channel::TraceSession;
use crate::window_spec::WindowSpec;

/// Runs trials against one configuration and one set of collaborators
pub struct TrialRunner<'a> {
    config: &'a RunConfiguration,
    tools: &'a Collaborators,
    reap_timeout: Duration,
}

impl<'a> TrialRunner<'a> {
    pub fn new(config: &'a RunConfiguration, tools: &'a Collaborators) -> Self {
        Self {
            config,
            tools,
            reap_timeout: Duration::from_secs(10),
        }
    }

    /// Grace period for the launched process to exit after teardown
    ///
    /// Also bounds the wait for the trace stream to end once the process is
    /// gone.
    pub fn with_reap_timeout(mut self, timeout: Duration) -> Self {
        self.reap_timeout = timeout;
        self
    }

    /// Run `1 + additional_iterations` trials in order
    ///
    /// Stops at the first fatal error; trial errors never stop the run.
    pub fn run_all(&self) -> Result<OutputResult> {
        self.config.validate()?;
        let mut output = OutputResult::new();
        for index in 0..self.config.trials() {
            let run = self.run_trial(index)?;
            output.push(run);
        }
        Ok(output)
    }

    /// Run a single trial
    pub fn run_trial(&self, index: u32) -> Result<Execution> {
        let config = self.config;
        let tools = self.tools;
        config.validate()?;
        tracing::info!(trial = index + 1, total = config.trials(), "starting trial");

        let mut errors = ErrorList::new(config.show_errors);

        if let Some(script) = &config.prepare {
            if let Err(e) = tools.system.run_script(&script.path, &script.args) {
                errors.record(TrialStage::PrepareScript, e);
            }
        }

        let target = launcher::target_command(config, tools.system.as_ref());

        let session = if config.trace {
            let session = TraceSession::open(Arc::clone(&tools.parser))?;
            Some(session.with_drain_timeout(self.reap_timeout))
        } else {
            None
        };

        let cmd = launcher::build_command(
            config,
            &target,
            tools.tracer.as_ref(),
            session.as_ref(),
        )?;
        launcher::discard_namespace_if_requested(config, tools.system.as_ref())?;

        // class derivation uses the command as typed, not the wrapped one
        let spec = WindowSpec::resolve(
            config.window_class.as_deref(),
            config.window_name.as_deref(),
            config.base_command(),
        );

        tools
            .system
            .flush_caches()
            .map_err(StartraceError::CacheFlush)?;

        let process = LaunchedProcess::spawn(cmd)?;
        let started = process.started();

        let (time_to_display, reaped) = if config.window_wait {
            let mut cascade =
                TerminationCascade::new(tools.windows.as_ref(), tools.system.as_ref(), &spec);
            cascade.step(&mut errors);
            let time_to_display = started.elapsed();
            tracing::debug!(?time_to_display, %spec, "window wait finished");

            let report = cascade.run_to_completion(&mut errors);
            tracing::debug!(?report, "cascade finished");
            let reaped = process.reap(self.reap_timeout, tools.system.as_ref(), &mut errors);
            (time_to_display, reaped)
        } else {
            let reaped = process.wait(&mut errors);
            (started.elapsed(), reaped)
        };

        let execve_timing = match session {
            Some(session) => match session.finish(&reaped) {
                Ok(timing) => Some(timing),
                Err(e) => {
                    errors.record(TrialStage::TraceParse, e);
                    None
                }
            },
            None => None,
        };

        if let Some(script) = &config.restore {
            if let Err(e) = tools.system.run_script(&script.path, &script.args) {
                errors.record(TrialStage::RestoreScript, e);
            }
        }

        tracing::info!(
            trial = index + 1,
            ?time_to_display,
            errors = errors.len(),
            "trial finished"
        );
        Ok(Execution::new(execve_timing, time_to_display, errors.into_vec()))
    }
}
