//! Run configuration
//!
//! [`RunConfiguration`] is built once per invocation from the CLI and shared
//! read-only by every trial. [`ToolConfig`] holds the collaborator tool paths
//! and tunables, loaded from an optional TOML file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::cli::RunArgs;
use crate::error::StartraceError;

/// How results are rendered at the end of the run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Json,
    Table,
}

/// A lifecycle hook run before or after each trial
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Script {
    pub path: PathBuf,
    pub args: Vec<String>,
}

/// Immutable per-invocation settings
#[derive(Debug, Clone)]
pub struct RunConfiguration {
    /// Target command, at least one token
    pub command: Vec<String>,
    pub prepare: Option<Script>,
    pub restore: Option<Script>,
    pub window_class: Option<String>,
    pub window_name: Option<String>,
    pub trace: bool,
    pub window_wait: bool,
    pub use_snap_run: bool,
    pub discard_snap_ns: bool,
    pub stdout_log: Option<PathBuf>,
    pub stderr_log: Option<PathBuf>,
    pub output_mode: OutputMode,
    /// `None` writes results to stdout
    pub output_file: Option<PathBuf>,
    pub show_errors: bool,
    pub additional_iterations: u32,
}

impl RunConfiguration {
    /// Create a configuration for `command` with every option off except
    /// tracing and window waiting
    pub fn new(command: Vec<String>) -> Self {
        Self {
            command,
            prepare: None,
            restore: None,
            window_class: None,
            window_name: None,
            trace: true,
            window_wait: true,
            use_snap_run: false,
            discard_snap_ns: false,
            stdout_log: None,
            stderr_log: None,
            output_mode: OutputMode::Table,
            output_file: None,
            show_errors: false,
            additional_iterations: 0,
        }
    }

    /// Build from the `run` subcommand plus the global flags
    pub fn from_cli(args: RunArgs, show_errors: bool, additional_iterations: u32) -> Self {
        let script = |path: Option<String>, args: Vec<String>| {
            path.filter(|p| !p.is_empty()).map(|p| Script {
                path: PathBuf::from(p),
                args,
            })
        };

        Self {
            prepare: script(args.prepare_script, args.prepare_script_args),
            restore: script(args.restore_script, args.restore_script_args),
            window_class: args.class_name,
            window_name: args.window_name,
            trace: !args.no_trace,
            window_wait: !args.no_window_wait,
            use_snap_run: args.use_snap_run,
            discard_snap_ns: args.discard_snap_ns,
            stdout_log: args.cmd_stdout,
            stderr_log: args.cmd_stderr,
            output_mode: if args.json {
                OutputMode::Json
            } else {
                OutputMode::Table
            },
            output_file: args.output_file.filter(|p| !p.as_os_str().is_empty()),
            show_errors,
            additional_iterations,
            command: args.command,
        }
    }

    /// Total number of trials: one plus the additional iterations
    pub fn trials(&self) -> u32 {
        self.additional_iterations.saturating_add(1)
    }

    /// First command token as given by the user
    pub fn base_command(&self) -> &str {
        self.command.first().map(String::as_str).unwrap_or_default()
    }

    /// Reject option combinations that cannot produce a meaningful run
    pub fn validate(&self) -> Result<(), StartraceError> {
        if self.command.is_empty() || self.command[0].is_empty() {
            return Err(StartraceError::Config(
                "a command to run is required".to_string(),
            ));
        }
        if self.discard_snap_ns && !self.use_snap_run {
            return Err(StartraceError::Config(
                "cannot use --discard-snap-ns without --use-snap-run".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_sudo() -> bool {
    true
}
fn default_strace() -> String {
    "strace".to_string()
}
fn default_xdotool() -> String {
    "xdotool".to_string()
}
fn default_wmctrl() -> String {
    "wmctrl".to_string()
}
fn default_snap() -> String {
    "snap".to_string()
}
fn default_snap_discard_ns() -> String {
    "/usr/lib/snapd/snap-discard-ns".to_string()
}
fn default_window_timeout_secs() -> u64 {
    60
}
fn default_window_poll_interval_ms() -> u64 {
    100
}
fn default_reap_timeout_secs() -> u64 {
    10
}
fn default_drop_caches() -> bool {
    true
}

/// External tool locations and tunables
///
/// # Example
/// ```
/// use startrace::config::ToolConfig;
///
/// let tools: ToolConfig = toml::from_str("sudo = false\nwindow_timeout_secs = 5").unwrap();
/// assert!(!tools.sudo);
/// assert_eq!(tools.window_timeout_secs, 5);
/// assert_eq!(tools.strace, "strace");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolConfig {
    /// Run privileged steps (tracer, cache flush, namespace discard) via sudo
    #[serde(default = "default_sudo")]
    pub sudo: bool,
    #[serde(default = "default_strace")]
    pub strace: String,
    #[serde(default = "default_xdotool")]
    pub xdotool: String,
    #[serde(default = "default_wmctrl")]
    pub wmctrl: String,
    #[serde(default = "default_snap")]
    pub snap: String,
    #[serde(default = "default_snap_discard_ns")]
    pub snap_discard_ns: String,
    /// How long the window manager keeps searching before giving up
    #[serde(default = "default_window_timeout_secs")]
    pub window_timeout_secs: u64,
    #[serde(default = "default_window_poll_interval_ms")]
    pub window_poll_interval_ms: u64,
    /// Grace period for the launched process to exit after teardown
    #[serde(default = "default_reap_timeout_secs")]
    pub reap_timeout_secs: u64,
    /// Free page/dentry/inode caches before each timed launch
    #[serde(default = "default_drop_caches")]
    pub drop_caches: bool,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            sudo: default_sudo(),
            strace: default_strace(),
            xdotool: default_xdotool(),
            wmctrl: default_wmctrl(),
            snap: default_snap(),
            snap_discard_ns: default_snap_discard_ns(),
            window_timeout_secs: default_window_timeout_secs(),
            window_poll_interval_ms: default_window_poll_interval_ms(),
            reap_timeout_secs: default_reap_timeout_secs(),
            drop_caches: default_drop_caches(),
        }
    }
}

impl ToolConfig {
    /// Load from a TOML file. Missing keys take their defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let tools: ToolConfig = toml::from_str(&contents)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        tools.validate()?;
        Ok(tools)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), StartraceError> {
        if self.window_poll_interval_ms == 0 {
            return Err(StartraceError::Config(
                "window_poll_interval_ms must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}
