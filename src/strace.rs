//! strace integration: traced launches and execve timing extraction
//!
//! The tracer is run as `strace -f -ttt -e trace=execve,execveat -o <pipe>`,
//! so every line it writes looks like
//!
//! ```text
//! 4242 1571234567.123456 execve("/usr/bin/gedit", ["gedit"], 0x7ffd /* 40 vars */) = 0
//! 4242 1571234569.654321 +++ exited with 0 +++
//! ```
//!
//! [`StraceParser`] reads those lines until end-of-stream and turns them into
//! per-executable runtimes plus the total traced time.

use anyhow::{bail, Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::process::Command;
use std::sync::OnceLock;
use std::time::Duration;

use crate::collaborators::{TraceParser, TracedLauncher};
use crate::config::ToolConfig;

/// Runtime of one executable image within the trace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExeRuntime {
    pub pid: i32,
    pub exe: String,
    /// Offset of the exec from the first traced event
    #[serde(with = "crate::duration_serde")]
    pub start: Duration,
    #[serde(with = "crate::duration_serde")]
    pub runtime: Duration,
}

/// Execve-level breakdown of a traced launch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExecveTiming {
    /// Time between the first and last traced event
    #[serde(with = "crate::duration_serde")]
    pub total_time: Duration,
    /// One entry per successful exec, ordered by start
    pub exe_runtimes: Vec<ExeRuntime>,
}

impl ExecveTiming {
    /// Render the breakdown as an aligned table
    pub fn display<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        let exe_width = self
            .exe_runtimes
            .iter()
            .map(|r| r.exe.len())
            .max()
            .unwrap_or(0)
            .max("Exe".len());

        writeln!(
            w,
            "{:<8}  {:<14}  {:<14}  {:<width$}",
            "PID",
            "Start",
            "Runtime",
            "Exe",
            width = exe_width
        )?;
        for run in &self.exe_runtimes {
            writeln!(
                w,
                "{:<8}  {:<14}  {:<14}  {:<width$}",
                run.pid,
                format!("{:?}", run.start),
                format!("{:?}", run.runtime),
                run.exe,
                width = exe_width
            )?;
        }
        writeln!(w, "Total time: {:?}", self.total_time)
    }
}

/// What a single trace line says happened
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    /// Successful exec of `exe`
    Exec { exe: String },
    /// Exec started but its result is on a later line
    ExecUnfinished { exe: String },
    /// Result line for an earlier unfinished exec
    ExecResumed { success: bool },
    /// Process ended (exit or fatal signal)
    Exit,
    /// Timestamped but irrelevant (failed exec, signal delivery, ...)
    Other,
}

/// A parsed trace line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceLine {
    pub pid: i32,
    /// Microseconds since the epoch
    pub timestamp_us: u64,
    pub event: TraceEvent,
}

fn line_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?:\[pid\s+)?(?:(\d+)\]?\s+)?(\d+)\.(\d{1,9})\s+(.*)$")
            .unwrap_or_else(|e| unreachable!("static regex is valid: {}", e))
    })
}

fn exec_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"^execve(?:at)?\((?:[^,"]*,\s*)?"((?:[^"\\]|\\.)*)""#)
            .unwrap_or_else(|e| unreachable!("static regex is valid: {}", e))
    })
}

/// Parse one line of `strace -f -ttt` output
///
/// Returns `None` for lines without a pid/timestamp prefix.
///
/// # Example
/// ```
/// use startrace::strace::{parse_line, TraceEvent};
///
/// let line = parse_line(r#"77 100.500000 execve("/bin/true", ["true"], 0x0 /* 1 var */) = 0"#).unwrap();
/// assert_eq!(line.pid, 77);
/// assert_eq!(line.timestamp_us, 100_500_000);
/// assert_eq!(line.event, TraceEvent::Exec { exe: "/bin/true".to_string() });
/// ```
pub fn parse_line(line: &str) -> Option<TraceLine> {
    let caps = line_regex().captures(line.trim_end())?;
    let pid = match caps.get(1) {
        Some(m) => m.as_str().parse().ok()?,
        None => 0,
    };
    let secs: u64 = caps[2].parse().ok()?;
    let frac = &caps[3];
    // normalise the fraction to microseconds
    let micros: u64 = format!("{:0<6}", &frac[..frac.len().min(6)]).parse().ok()?;
    let timestamp_us = secs.checked_mul(1_000_000)?.checked_add(micros)?;
    let rest = &caps[4];

    Some(TraceLine {
        pid,
        timestamp_us,
        event: classify(rest),
    })
}

fn classify(rest: &str) -> TraceEvent {
    if rest.starts_with("+++ exited") || rest.starts_with("+++ killed") {
        return TraceEvent::Exit;
    }
    if rest.starts_with("<... execve") {
        return TraceEvent::ExecResumed {
            success: call_succeeded(rest),
        };
    }
    if let Some(caps) = exec_regex().captures(rest) {
        let exe = caps[1].to_string();
        if rest.ends_with("<unfinished ...>") {
            return TraceEvent::ExecUnfinished { exe };
        }
        if call_succeeded(rest) {
            return TraceEvent::Exec { exe };
        }
    }
    TraceEvent::Other
}

fn call_succeeded(rest: &str) -> bool {
    rest.rsplit_once(" = ")
        .map(|(_, result)| result.trim_start().starts_with('0'))
        .unwrap_or(false)
}

/// Accumulates trace lines into an [`ExecveTiming`]
#[derive(Debug, Default)]
pub struct ExecveTimingBuilder {
    follow_pid: Option<i32>,
    first_us: Option<u64>,
    last_us: u64,
    /// pid -> (exe, exec timestamp)
    open: HashMap<i32, (String, u64)>,
    /// pid -> (exe, timestamp) of an exec awaiting its result
    pending: HashMap<i32, (String, u64)>,
    runtimes: Vec<ExeRuntime>,
}

impl ExecveTimingBuilder {
    /// `follow_pid` restricts executable segments to one pid
    pub fn new(follow_pid: Option<i32>) -> Self {
        Self {
            follow_pid,
            ..Default::default()
        }
    }

    pub fn push(&mut self, line: TraceLine) {
        let first = *self.first_us.get_or_insert(line.timestamp_us);
        self.last_us = self.last_us.max(line.timestamp_us).max(first);

        if self.follow_pid.is_some_and(|p| p != line.pid) {
            return;
        }

        match line.event {
            TraceEvent::Exec { exe } => self.start_exe(line.pid, exe, line.timestamp_us),
            TraceEvent::ExecUnfinished { exe } => {
                self.pending.insert(line.pid, (exe, line.timestamp_us));
            }
            TraceEvent::ExecResumed { success } => {
                if let Some((exe, ts)) = self.pending.remove(&line.pid) {
                    if success {
                        self.start_exe(line.pid, exe, ts);
                    }
                }
            }
            TraceEvent::Exit => self.close_exe(line.pid, line.timestamp_us),
            TraceEvent::Other => {}
        }
    }

    fn start_exe(&mut self, pid: i32, exe: String, ts: u64) {
        self.close_exe(pid, ts);
        self.open.insert(pid, (exe, ts));
    }

    fn close_exe(&mut self, pid: i32, ts: u64) {
        if let Some((exe, started)) = self.open.remove(&pid) {
            let first = self.first_us.unwrap_or(started);
            self.runtimes.push(ExeRuntime {
                pid,
                exe,
                start: Duration::from_micros(started.saturating_sub(first)),
                runtime: Duration::from_micros(ts.saturating_sub(started)),
            });
        }
    }

    /// Close every open segment at the last seen timestamp
    pub fn finish(mut self) -> Result<ExecveTiming> {
        let Some(first) = self.first_us else {
            bail!("no trace data received");
        };
        let last = self.last_us;
        let mut pids: Vec<i32> = self.open.keys().copied().collect();
        pids.sort_unstable();
        for pid in pids {
            self.close_exe(pid, last);
        }
        self.runtimes.sort_by_key(|r| (r.start, r.pid));

        Ok(ExecveTiming {
            total_time: Duration::from_micros(last - first),
            exe_runtimes: self.runtimes,
        })
    }
}

/// Parse a complete trace stream
pub fn parse_execve_timings<R: BufRead>(
    mut reader: R,
    follow_pid: Option<i32>,
) -> Result<ExecveTiming> {
    let mut builder = ExecveTimingBuilder::new(follow_pid);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let n = reader
            .read_until(b'\n', &mut buf)
            .context("Failed to read trace stream")?;
        if n == 0 {
            break;
        }
        if let Some(line) = parse_line(&String::from_utf8_lossy(&buf)) {
            builder.push(line);
        }
    }
    builder.finish()
}

/// [`TraceParser`] for strace output read from a named pipe
#[derive(Debug, Default, Clone, Copy)]
pub struct StraceParser;

impl StraceParser {
    pub fn new() -> Self {
        Self
    }
}

impl TraceParser for StraceParser {
    fn parse(&self, trace: File, follow_pid: Option<i32>) -> Result<ExecveTiming> {
        parse_execve_timings(BufReader::new(trace), follow_pid)
    }
}

/// [`TracedLauncher`] that wraps the command in strace
#[derive(Debug, Clone)]
pub struct StraceLauncher {
    strace: String,
    sudo: bool,
}

impl StraceLauncher {
    pub fn new(tools: &ToolConfig) -> Self {
        Self {
            strace: tools.strace.clone(),
            sudo: tools.sudo,
        }
    }

    /// Full argv of the traced launch, tracer first
    pub fn argv(&self, pipe: &Path, command: &[String]) -> Vec<String> {
        let mut argv = Vec::new();
        if self.sudo {
            argv.extend(["sudo".to_string(), "-E".to_string(), self.strace.clone()]);
            // strace drops back to the invoking user for the traced program
            if let Some(user) = invoking_user() {
                argv.extend(["-u".to_string(), user]);
            }
        } else {
            argv.push(self.strace.clone());
        }
        argv.extend(
            ["-f", "-ttt", "-e", "trace=execve,execveat", "-o"]
                .iter()
                .map(|s| s.to_string()),
        );
        argv.push(pipe.to_string_lossy().into_owned());
        argv.push("--".to_string());
        argv.extend(command.iter().cloned());
        argv
    }
}

fn invoking_user() -> Option<String> {
    ["SUDO_USER", "USER"]
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .find(|u| !u.is_empty() && u != "root")
}

impl TracedLauncher for StraceLauncher {
    fn launch_traced(&self, pipe: &Path, command: &[String]) -> Result<Command> {
        if command.is_empty() {
            bail!("Command array is empty");
        }
        let argv = self.argv(pipe, command);
        tracing::debug!(?argv, "traced launch");
        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..]);
        Ok(cmd)
    }
}
