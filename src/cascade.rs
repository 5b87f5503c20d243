//! Escalating teardown of the launched program's windows and processes
//!
//! Transitions:
//!
//! - WaitingWindow to WindowFound, or to WindowWaitFailed
//! - WindowFound to PidResolution, then CloseAttempted, then KillAttempted
//! - KillAttempted to Done, or to FallbackManagerClose when forced
//! - WindowWaitFailed to FallbackManagerClose
//! - FallbackManagerClose to Done
//!
//! Every failure is recorded in the trial's [`ErrorList`] and sets
//! `force_fallback`; nothing aborts the cascade. The fallback runs at most
//! once and its own failure is terminal.

use crate::collaborators::{KillOutcome, SystemOps, WindowId, WindowManager};
use crate::error::{ErrorList, TrialStage};
use crate::window_spec::WindowSpec;

/// Where the cascade currently is
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CascadeState {
    WaitingWindow,
    WindowFound { windows: Vec<WindowId> },
    WindowWaitFailed,
    /// Pids resolved for every window that could be resolved
    PidResolution {
        windows: Vec<WindowId>,
        pids: Vec<i32>,
    },
    CloseAttempted { pids: Vec<i32> },
    KillAttempted,
    FallbackManagerClose,
    Done,
}

/// What the cascade did, for logging and assertions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CascadeReport {
    pub windows: Vec<WindowId>,
    pub pids: Vec<i32>,
    pub killed: usize,
    pub fallback_invoked: bool,
}

/// One trial's teardown state machine
pub struct TerminationCascade<'a> {
    windows: &'a dyn WindowManager,
    system: &'a dyn SystemOps,
    spec: &'a WindowSpec,
    state: CascadeState,
    force_fallback: bool,
    report: CascadeReport,
}

impl<'a> TerminationCascade<'a> {
    pub fn new(
        windows: &'a dyn WindowManager,
        system: &'a dyn SystemOps,
        spec: &'a WindowSpec,
    ) -> Self {
        Self {
            windows,
            system,
            spec,
            state: CascadeState::WaitingWindow,
            force_fallback: false,
            report: CascadeReport::default(),
        }
    }

    pub fn state(&self) -> &CascadeState {
        &self.state
    }

    pub fn force_fallback(&self) -> bool {
        self.force_fallback
    }

    /// Advance by one transition
    pub fn step(&mut self, errors: &mut ErrorList) -> &CascadeState {
        let current = std::mem::replace(&mut self.state, CascadeState::Done);
        self.state = match current {
            CascadeState::WaitingWindow => self.wait_for_window(errors),
            CascadeState::WindowFound { windows } => self.resolve_pids(windows, errors),
            CascadeState::WindowWaitFailed => CascadeState::FallbackManagerClose,
            CascadeState::PidResolution { windows, pids } => {
                self.close_windows(&windows, errors);
                CascadeState::CloseAttempted { pids }
            }
            CascadeState::CloseAttempted { pids } => {
                self.kill_pids(&pids, errors);
                CascadeState::KillAttempted
            }
            CascadeState::KillAttempted if self.force_fallback => {
                CascadeState::FallbackManagerClose
            }
            CascadeState::KillAttempted => CascadeState::Done,
            CascadeState::FallbackManagerClose => {
                self.fallback_close(errors);
                CascadeState::Done
            }
            CascadeState::Done => CascadeState::Done,
        };
        tracing::debug!(state = ?self.state, force_fallback = self.force_fallback, "cascade step");
        &self.state
    }

    /// Drive the cascade until `Done` and return what happened
    pub fn run_to_completion(mut self, errors: &mut ErrorList) -> CascadeReport {
        while self.state != CascadeState::Done {
            self.step(errors);
        }
        self.report
    }

    fn wait_for_window(&mut self, errors: &mut ErrorList) -> CascadeState {
        match self.windows.wait_for_window(self.spec) {
            Ok(windows) => {
                self.report.windows = windows.clone();
                CascadeState::WindowFound { windows }
            }
            Err(e) => {
                errors.record(TrialStage::WindowWait, e);
                // without window ids there is nothing to close directly
                self.force_fallback = true;
                CascadeState::WindowWaitFailed
            }
        }
    }

    fn resolve_pids(&mut self, windows: Vec<WindowId>, errors: &mut ErrorList) -> CascadeState {
        let mut pids = Vec::with_capacity(windows.len());
        for window in &windows {
            match self.windows.pid_for_window(window) {
                Ok(pid) => pids.push(pid),
                Err(e) => {
                    errors.record(
                        TrialStage::PidResolution,
                        format!("wid {}: {:#}", window, e),
                    );
                    self.force_fallback = true;
                }
            }
        }
        self.report.pids = pids.clone();
        CascadeState::PidResolution { windows, pids }
    }

    fn close_windows(&mut self, windows: &[WindowId], errors: &mut ErrorList) {
        for window in windows {
            if let Err(e) = self.windows.close_window(window) {
                errors.record(TrialStage::WindowClose, format!("wid {}: {:#}", window, e));
                self.force_fallback = true;
            }
        }
    }

    fn kill_pids(&mut self, pids: &[i32], errors: &mut ErrorList) {
        for &pid in pids {
            match self.system.kill(pid) {
                Ok(KillOutcome::Killed) => self.report.killed += 1,
                Ok(KillOutcome::AlreadyExited) => {
                    tracing::debug!(pid, "window process already exited");
                }
                Err(e) => {
                    errors.record(TrialStage::Kill, format!("pid {}: {:#}", pid, e));
                    self.force_fallback = true;
                }
            }
        }
    }

    fn fallback_close(&mut self, errors: &mut ErrorList) {
        let name = self.spec.value();
        tracing::info!(name, "closing window through window manager");
        self.report.fallback_invoked = true;
        if let Err(e) = self.windows.close_by_name(name) {
            errors.record(TrialStage::FallbackClose, e);
        }
    }
}
