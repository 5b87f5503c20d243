//! Host-level operations: cache flushing, hook scripts, snap namespaces,
//! signalling, and running helper tools

use anyhow::{bail, Context, Result};
use nix::errno::Errno;
use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::Pid;
use std::env;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::collaborators::{KillOutcome, SystemOps};
use crate::config::ToolConfig;

/// Run `program` with `args`, failing on a non-zero exit
///
/// Returns stdout. The error carries the combined output so hook and tool
/// failures are diagnosable from the error list alone.
pub fn run_checked<S: AsRef<OsStr>>(program: &str, args: &[S]) -> Result<String> {
    let output = Command::new(program)
        .args(args)
        .output()
        .with_context(|| format!("Failed to execute {}", program))?;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let combined = format!("{}{}", stdout, stderr);
        bail!(
            "{} failed ({}): {}",
            program,
            output.status,
            combined.trim()
        );
    }
    Ok(stdout)
}

/// Search `PATH` for an executable named `name`
pub fn find_in_path(name: &str) -> Option<PathBuf> {
    use std::os::unix::fs::PermissionsExt;

    let path_var = env::var_os("PATH")?;
    env::split_paths(&path_var)
        .map(|dir| dir.join(name))
        .find(|candidate| {
            candidate
                .metadata()
                .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
                .unwrap_or(false)
        })
}

/// [`SystemOps`] against the real host
#[derive(Debug, Clone)]
pub struct HostSystem {
    sudo: bool,
    drop_caches: bool,
    snap: String,
    snap_discard_ns: String,
}

impl HostSystem {
    pub fn new(tools: &ToolConfig) -> Self {
        Self {
            sudo: tools.sudo,
            drop_caches: tools.drop_caches,
            snap: tools.snap.clone(),
            snap_discard_ns: tools.snap_discard_ns.clone(),
        }
    }

    fn privileged(&self, program: &str, args: &[&str]) -> Result<String> {
        if self.sudo {
            let mut full = vec![program];
            full.extend_from_slice(args);
            run_checked("sudo", &full)
        } else {
            run_checked(program, args)
        }
    }
}

impl SystemOps for HostSystem {
    fn flush_caches(&self) -> Result<()> {
        if !self.drop_caches {
            tracing::debug!("cache flush disabled by configuration");
            return Ok(());
        }
        self.privileged("sh", &["-c", "sync && echo 3 > /proc/sys/vm/drop_caches"])
            .context("Failed to drop page caches")?;
        Ok(())
    }

    fn run_script(&self, script: &Path, args: &[String]) -> Result<()> {
        let program = script.to_string_lossy();
        run_checked(&program, args)?;
        Ok(())
    }

    fn discard_namespace(&self, package: &str) -> Result<()> {
        self.privileged(&self.snap_discard_ns, &[package])
            .with_context(|| format!("Failed to discard namespace of {}", package))?;
        Ok(())
    }

    fn wrap_package_run(&self, command: &[String]) -> Vec<String> {
        let mut wrapped = vec![self.snap.clone(), "run".to_string()];
        wrapped.extend(command.iter().cloned());
        wrapped
    }

    fn kill(&self, pid: i32) -> Result<KillOutcome> {
        match kill(Pid::from_raw(pid), Signal::SIGKILL) {
            Ok(()) => Ok(KillOutcome::Killed),
            Err(Errno::ESRCH) => Ok(KillOutcome::AlreadyExited),
            Err(e) => Err(e).with_context(|| format!("Failed to send SIGKILL to {}", pid)),
        }
    }

    fn kill_group(&self, pgid: i32) -> Result<KillOutcome> {
        if self.sudo {
            // the group leader is sudo itself, owned by root
            let target = format!("-{}", pgid);
            run_checked("sudo", &["kill", "-KILL", "--", target.as_str()])
                .with_context(|| format!("Failed to send SIGKILL to group {}", pgid))?;
            return Ok(KillOutcome::Killed);
        }
        match killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
            Ok(()) => Ok(KillOutcome::Killed),
            Err(Errno::ESRCH) => Ok(KillOutcome::AlreadyExited),
            Err(e) => Err(e).with_context(|| format!("Failed to send SIGKILL to group {}", pgid)),
        }
    }
}
