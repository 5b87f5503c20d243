//! Window manager access through xdotool, with wmctrl as the fallback closer

use anyhow::{bail, Context, Result};
use std::thread;
use std::time::{Duration, Instant};

use crate::collaborators::{WindowId, WindowManager};
use crate::config::ToolConfig;
use crate::system::run_checked;
use crate::window_spec::WindowSpec;

/// [`WindowManager`] backed by the xdotool and wmctrl binaries
#[derive(Debug, Clone)]
pub struct XdoWindowManager {
    xdotool: String,
    wmctrl: String,
    timeout: Duration,
    poll_interval: Duration,
}

impl XdoWindowManager {
    pub fn new(tools: &ToolConfig) -> Self {
        Self {
            xdotool: tools.xdotool.clone(),
            wmctrl: tools.wmctrl.clone(),
            timeout: Duration::from_secs(tools.window_timeout_secs),
            poll_interval: Duration::from_millis(tools.window_poll_interval_ms),
        }
    }

    /// One search pass
    ///
    /// xdotool exits 1 silently when nothing matches, so an empty result is
    /// not an error. A failing exit that explains itself on stderr (no
    /// display, bad arguments) is.
    fn search(&self, spec: &WindowSpec) -> Result<Vec<WindowId>> {
        let flag = match spec {
            WindowSpec::Class(_) => "--class",
            WindowSpec::Name(_) => "--name",
        };
        let output = std::process::Command::new(&self.xdotool)
            .args(["search", "--onlyvisible", flag, spec.value()])
            .output()
            .with_context(|| format!("Failed to execute {}", self.xdotool))?;
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() && !stderr.trim().is_empty() {
            bail!(
                "{} search failed ({}): {}",
                self.xdotool,
                output.status,
                stderr.trim()
            );
        }
        Ok(parse_window_ids(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// One window id per non-empty line
pub fn parse_window_ids(stdout: &str) -> Vec<WindowId> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|l| WindowId(l.to_string()))
        .collect()
}

impl WindowManager for XdoWindowManager {
    fn wait_for_window(&self, spec: &WindowSpec) -> Result<Vec<WindowId>> {
        // an unrepresentable deadline means wait forever
        let deadline = Instant::now().checked_add(self.timeout);
        loop {
            let windows = self.search(spec)?;
            if !windows.is_empty() {
                tracing::debug!(%spec, count = windows.len(), "window found");
                return Ok(windows);
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                bail!(
                    "no window with {} appeared within {:?}",
                    spec,
                    self.timeout
                );
            }
            thread::sleep(self.poll_interval);
        }
    }

    fn pid_for_window(&self, window: &WindowId) -> Result<i32> {
        let out = run_checked(&self.xdotool, &["getwindowpid", window.0.as_str()])?;
        out.trim()
            .parse()
            .with_context(|| format!("Invalid pid {:?} for window {}", out.trim(), window))
    }

    fn close_window(&self, window: &WindowId) -> Result<()> {
        run_checked(&self.xdotool, &["windowclose", window.0.as_str()])?;
        Ok(())
    }

    fn close_by_name(&self, name: &str) -> Result<()> {
        run_checked(&self.wmctrl, &["-c", name])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    /// Fake xdotool that answers from a shell script
    fn fake_tools(dir: &TempDir, xdotool_body: &str) -> ToolConfig {
        let path = dir.path().join("xdotool");
        fs::write(&path, format!("#!/bin/sh\n{}\n", xdotool_body)).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        ToolConfig {
            xdotool: path.to_string_lossy().into_owned(),
            wmctrl: "false".to_string(),
            window_timeout_secs: 0,
            window_poll_interval_ms: 10,
            ..ToolConfig::default()
        }
    }

    #[test]
    fn test_parse_window_ids() {
        let ids = parse_window_ids("73400321\n\n73400400\n");
        assert_eq!(
            ids,
            vec![
                WindowId("73400321".to_string()),
                WindowId("73400400".to_string())
            ]
        );
    }

    #[test]
    fn test_wait_for_window_found() {
        let dir = TempDir::new().unwrap();
        let wm = XdoWindowManager::new(&fake_tools(&dir, "echo 12345"));
        let windows = wm
            .wait_for_window(&WindowSpec::Class("gedit".to_string()))
            .unwrap();
        assert_eq!(windows, vec![WindowId("12345".to_string())]);
    }

    #[test]
    fn test_wait_for_window_times_out() {
        let dir = TempDir::new().unwrap();
        let wm = XdoWindowManager::new(&fake_tools(&dir, "exit 1"));
        let err = wm
            .wait_for_window(&WindowSpec::Name("Nothing".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("name Nothing"));
    }

    #[test]
    fn test_search_failure_with_stderr_is_reported() {
        let dir = TempDir::new().unwrap();
        let mut tools = fake_tools(&dir, "echo \"Can't open display\" >&2; exit 1");
        // would poll for a minute if the failure were taken as "no match yet"
        tools.window_timeout_secs = 60;
        let wm = XdoWindowManager::new(&tools);

        let started = Instant::now();
        let err = wm
            .wait_for_window(&WindowSpec::Class("gedit".to_string()))
            .unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(err.to_string().contains("Can't open display"));
    }

    #[test]
    fn test_wait_for_window_with_unbounded_timeout() {
        let dir = TempDir::new().unwrap();
        let mut tools = fake_tools(&dir, "echo 12345");
        tools.window_timeout_secs = u64::MAX;
        let wm = XdoWindowManager::new(&tools);

        let windows = wm
            .wait_for_window(&WindowSpec::Class("gedit".to_string()))
            .unwrap();
        assert_eq!(windows, vec![WindowId("12345".to_string())]);
    }

    #[test]
    fn test_pid_for_window() {
        let dir = TempDir::new().unwrap();
        let wm = XdoWindowManager::new(&fake_tools(&dir, "echo 4242"));
        assert_eq!(wm.pid_for_window(&WindowId("1".to_string())).unwrap(), 4242);
    }

    #[test]
    fn test_pid_for_window_garbage() {
        let dir = TempDir::new().unwrap();
        let wm = XdoWindowManager::new(&fake_tools(&dir, "echo not-a-pid"));
        assert!(wm.pid_for_window(&WindowId("1".to_string())).is_err());
    }

    #[test]
    fn test_close_by_name_failure() {
        let dir = TempDir::new().unwrap();
        let wm = XdoWindowManager::new(&fake_tools(&dir, "true"));
        assert!(wm.close_by_name("gedit").is_err());
    }
}
