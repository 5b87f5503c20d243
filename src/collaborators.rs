//! Seams between the orchestrator and the outside world
//!
//! Every external tool the trial runner talks to sits behind one of these
//! traits so each orchestration step can be driven by fakes in tests. The
//! concrete implementations live in [`crate::strace`], [`crate::xdotool`]
//! and [`crate::system`].

use anyhow::Result;
use std::fmt;
use std::fs::File;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use crate::config::ToolConfig;
use crate::strace::{ExecveTiming, StraceLauncher, StraceParser};
use crate::system::HostSystem;
use crate::window_spec::WindowSpec;
use crate::xdotool::XdoWindowManager;

/// Opaque window handle as reported by the window manager
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WindowId(pub String);

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of signalling a process that was alive a moment ago
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillOutcome {
    Killed,
    AlreadyExited,
}

/// Builds the tracer-wrapped command for a traced launch
pub trait TracedLauncher {
    /// Return an unstarted command that runs `command` under the tracer,
    /// with trace output written to `pipe`
    fn launch_traced(&self, pipe: &Path, command: &[String]) -> Result<Command>;
}

/// Turns a raw trace stream into an [`ExecveTiming`]
///
/// Called from the background reader thread with the read end of the trace
/// pipe. Must read `trace` until end-of-stream before returning.
pub trait TraceParser: Send + Sync {
    fn parse(&self, trace: File, follow_pid: Option<i32>) -> Result<ExecveTiming>;
}

/// Window discovery and teardown
pub trait WindowManager {
    /// Block until a window matching `spec` is visible. May time out.
    fn wait_for_window(&self, spec: &WindowSpec) -> Result<Vec<WindowId>>;

    fn pid_for_window(&self, window: &WindowId) -> Result<i32>;

    /// Ask the window to close gracefully
    fn close_window(&self, window: &WindowId) -> Result<()>;

    /// Manager-level close of every window matching `name`
    fn close_by_name(&self, name: &str) -> Result<()>;
}

/// Host operations around the timed region
pub trait SystemOps {
    fn flush_caches(&self) -> Result<()>;

    fn run_script(&self, script: &Path, args: &[String]) -> Result<()>;

    /// Drop the package manager's cached mount namespace for `package`
    fn discard_namespace(&self, package: &str) -> Result<()>;

    /// Wrap `command` so it runs through the package manager
    fn wrap_package_run(&self, command: &[String]) -> Vec<String>;

    /// Send a termination signal to `pid`
    fn kill(&self, pid: i32) -> Result<KillOutcome>;

    /// Send a termination signal to every process in group `pgid`
    ///
    /// The launched command leads its own group, so this reaches the tracer,
    /// the target and anything they forked.
    fn kill_group(&self, pgid: i32) -> Result<KillOutcome>;
}

/// All collaborators used by a run
pub struct Collaborators {
    pub tracer: Box<dyn TracedLauncher>,
    pub parser: Arc<dyn TraceParser>,
    pub windows: Box<dyn WindowManager>,
    pub system: Box<dyn SystemOps>,
}

impl Collaborators {
    /// The real tool stack: strace, xdotool/wmctrl, and the host system
    pub fn from_config(tools: &ToolConfig) -> Self {
        Self {
            tracer: Box::new(StraceLauncher::new(tools)),
            parser: Arc::new(StraceParser::new()),
            windows: Box::new(XdoWindowManager::new(tools)),
            system: Box::new(HostSystem::new(tools)),
        }
    }
}

