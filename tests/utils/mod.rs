// Fake collaborators for driving the trial runner without strace, X11 or root
//
// Every fake records what it was asked to do in a shared log so tests can
// assert on call order and counts after the run.

#![allow(dead_code)] // each test binary uses a different subset

use anyhow::{anyhow, Context, Result};
use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use startrace::collaborators::{
    Collaborators, KillOutcome, SystemOps, TracedLauncher, WindowId, WindowManager,
};
use startrace::strace::StraceParser;
use startrace::window_spec::WindowSpec;
use std::path::Path;
use std::process::Command;
use std::sync::{Arc, Mutex};

/// Shared, ordered record of collaborator calls
#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.entries()
            .iter()
            .filter(|e| e.starts_with(prefix))
            .count()
    }

    pub fn position(&self, prefix: &str) -> Option<usize> {
        self.entries().iter().position(|e| e.starts_with(prefix))
    }
}

/// Stand-in for strace: a shell that writes canned trace lines into the pipe
pub struct FakeTracer {
    pub lines: Vec<String>,
    /// Shell run after the lines are written, with `$pipe` still set
    pub tail: Option<String>,
    pub log: CallLog,
}

impl FakeTracer {
    pub fn new(lines: &[&str], log: CallLog) -> Self {
        Self {
            lines: lines.iter().map(|l| l.to_string()).collect(),
            tail: None,
            log,
        }
    }

    /// Sample trace, then the tracer lingers with a forked child that keeps
    /// the pipe open
    pub fn lingering(log: CallLog) -> Self {
        Self {
            tail: Some(r#"(sleep 30 > "$pipe") & sleep 30"#.to_string()),
            ..Self::sample_trace(log)
        }
    }

    /// Trace whose first and last events are 2.5s apart
    pub fn sample_trace(log: CallLog) -> Self {
        Self::new(
            &[
                r#"100 1000.000000 execve("/usr/bin/sample-app", ["sample-app"], 0x7ffd /* 3 vars */) = 0"#,
                "100 1002.500000 +++ exited with 0 +++",
            ],
            log,
        )
    }
}

impl TracedLauncher for FakeTracer {
    fn launch_traced(&self, pipe: &Path, command: &[String]) -> Result<Command> {
        self.log.push(format!("launch_traced {}", command.join(" ")));
        let mut script =
            r#"pipe="$1"; shift; for l in "$@"; do printf '%s\n' "$l"; done > "$pipe""#.to_string();
        if let Some(tail) = &self.tail {
            script.push_str("; ");
            script.push_str(tail);
        }
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(script)
            .arg("sh")
            .arg(pipe)
            .args(&self.lines);
        Ok(cmd)
    }
}

/// How the fake window manager answers
#[derive(Clone, Default)]
pub struct WindowScript {
    pub wait_fails: bool,
    pub windows: Vec<String>,
    pub pid_fails: bool,
    pub close_fails: bool,
    pub fallback_fails: bool,
}

pub struct FakeWindows {
    pub script: WindowScript,
    pub log: CallLog,
}

impl WindowManager for FakeWindows {
    fn wait_for_window(&self, spec: &WindowSpec) -> Result<Vec<WindowId>> {
        self.log.push(format!("wait {}", spec));
        if self.script.wait_fails {
            return Err(anyhow!("no window appeared within 0s"));
        }
        Ok(self
            .script
            .windows
            .iter()
            .map(|w| WindowId(w.clone()))
            .collect())
    }

    fn pid_for_window(&self, window: &WindowId) -> Result<i32> {
        self.log.push(format!("pid {}", window));
        if self.script.pid_fails {
            return Err(anyhow!("BadWindow (invalid Window parameter)"));
        }
        // pid far outside any real range; FakeSystem treats it as exited
        Ok(4_000_000)
    }

    fn close_window(&self, window: &WindowId) -> Result<()> {
        self.log.push(format!("close {}", window));
        if self.script.close_fails {
            return Err(anyhow!("close refused"));
        }
        Ok(())
    }

    fn close_by_name(&self, name: &str) -> Result<()> {
        self.log.push(format!("fallback {}", name));
        if self.script.fallback_fails {
            return Err(anyhow!("wmctrl: cannot find window"));
        }
        Ok(())
    }
}

pub struct FakeSystem {
    pub flush_fails: bool,
    pub log: CallLog,
}

impl SystemOps for FakeSystem {
    fn flush_caches(&self) -> Result<()> {
        self.log.push("flush");
        if self.flush_fails {
            return Err(anyhow!("permission denied"));
        }
        Ok(())
    }

    fn run_script(&self, script: &Path, args: &[String]) -> Result<()> {
        self.log
            .push(format!("script {} {}", script.display(), args.join(" ")));
        if script.to_string_lossy().contains("broken") {
            return Err(anyhow!("exit status 1"));
        }
        Ok(())
    }

    fn discard_namespace(&self, package: &str) -> Result<()> {
        self.log.push(format!("discard {}", package));
        Ok(())
    }

    fn wrap_package_run(&self, command: &[String]) -> Vec<String> {
        let mut wrapped = vec!["snap".to_string(), "run".to_string()];
        wrapped.extend(command.iter().cloned());
        wrapped
    }

    fn kill(&self, pid: i32) -> Result<KillOutcome> {
        self.log.push(format!("kill {}", pid));
        Ok(KillOutcome::AlreadyExited)
    }

    /// Real signal: the launched processes are real and must not outlive the test
    fn kill_group(&self, pgid: i32) -> Result<KillOutcome> {
        self.log.push(format!("kill_group {}", pgid));
        match killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
            Ok(()) => Ok(KillOutcome::Killed),
            Err(Errno::ESRCH) => Ok(KillOutcome::AlreadyExited),
            Err(e) => Err(e).with_context(|| format!("killpg {}", pgid)),
        }
    }
}

/// Build a collaborator set around the fakes, all sharing `log`
pub fn collaborators(
    tracer: FakeTracer,
    windows: WindowScript,
    flush_fails: bool,
    log: &CallLog,
) -> Collaborators {
    Collaborators {
        tracer: Box::new(tracer),
        parser: Arc::new(StraceParser::new()),
        windows: Box::new(FakeWindows {
            script: windows,
            log: log.clone(),
        }),
        system: Box::new(FakeSystem {
            flush_fails,
            log: log.clone(),
        }),
    }
}

pub fn command(tokens: &[&str]) -> Vec<String> {
    tokens.iter().map(|s| s.to_string()).collect()
}
