// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Subprocess spawning and process-group termination.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tether_core::TetherError;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

/// Time a process group gets to exit after SIGINT.
pub const INTERRUPT_GRACE: Duration = Duration::from_secs(5);
/// Time a process group gets to exit after SIGTERM, before SIGKILL.
pub const TERMINATE_GRACE: Duration = Duration::from_secs(7);

/// Spawn `argv` directly (no shell) in its own process group, with exactly
/// `env` as its environment.
pub fn spawn(
    argv: &[String],
    cwd: &Path,
    env: &BTreeMap<String, String>,
) -> Result<Child, TetherError> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| TetherError::InvalidInput("empty argv".to_string()))?;

    let mut cmd = Command::new(program);
    cmd.args(args)
        .current_dir(cwd)
        .env_clear()
        .envs(env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);

    cmd.spawn().map_err(|e| TetherError::JobExecutionFailed {
        exit_code: None,
        output: format!("failed to start {program}: {e}"),
    })
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: libc::c_int) -> bool {
    let Ok(pgid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    // SAFETY: killpg has no memory-safety preconditions; a stale pgid
    // yields ESRCH.
    unsafe { libc::killpg(pgid, signal) == 0 }
}

/// Whether a process with `pid` still exists.
#[cfg(unix)]
pub fn pid_is_alive(pid: i64) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }
    // SAFETY: signal 0 performs only the existence and permission check.
    if unsafe { libc::kill(pid, 0) } == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
pub fn pid_is_alive(_pid: i64) -> bool {
    false
}

/// A token identifying the process currently holding `pid`: its start time.
///
/// Linux reads `starttime` from `/proc/<pid>/stat`; other unix systems ask
/// `ps` for `lstart`. `None` when the process is gone or unreadable.
#[cfg(target_os = "linux")]
pub fn pid_start_token(pid: i64) -> Option<String> {
    if pid <= 0 {
        return None;
    }
    let stat = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    // `comm` may hold spaces or parens; fields resume after the last ')'.
    let (_, fields) = stat.rsplit_once(')')?;
    fields.split_whitespace().nth(19).map(str::to_string)
}

#[cfg(all(unix, not(target_os = "linux")))]
pub fn pid_start_token(pid: i64) -> Option<String> {
    if pid <= 0 {
        return None;
    }
    let out = std::process::Command::new("ps")
        .args(["-o", "lstart=", "-p", &pid.to_string()])
        .stderr(Stdio::null())
        .output()
        .ok()?;
    let token = String::from_utf8_lossy(&out.stdout).trim().to_string();
    (!token.is_empty()).then_some(token)
}

#[cfg(not(unix))]
pub fn pid_start_token(_pid: i64) -> Option<String> {
    None
}

/// Whether the live process at `pid` is the one recorded with `token`.
/// A missing token never matches.
pub fn pid_matches_token(pid: i64, token: Option<&str>) -> bool {
    match token {
        Some(expected) => pid_start_token(pid).as_deref() == Some(expected),
        None => false,
    }
}

/// Restart check for a `RUNNING` row: the pid is alive and, when a token was
/// recorded, it still matches. Rows without a token keep the slot.
pub fn is_live_orphan(pid: i64, token: Option<&str>) -> bool {
    pid_is_alive(pid) && (token.is_none() || pid_matches_token(pid, token))
}

/// Stop a process group this process did not spawn (an orphan from a
/// previous run), escalating like [`terminate`]. Returns whether the leader
/// is gone.
pub async fn terminate_group(pid: i64) -> bool {
    #[cfg(unix)]
    {
        let Ok(leader) = u32::try_from(pid) else {
            return true;
        };
        for (signal, grace) in [
            (libc::SIGINT, INTERRUPT_GRACE),
            (libc::SIGTERM, TERMINATE_GRACE),
            (libc::SIGKILL, INTERRUPT_GRACE),
        ] {
            if !pid_is_alive(pid) {
                return true;
            }
            debug!(pid, signal, "signalling orphan process group");
            if !signal_group(leader, signal) {
                return !pid_is_alive(pid);
            }
            if wait_for_exit(pid, grace).await {
                return true;
            }
        }
        false
    }
    #[cfg(not(unix))]
    {
        !pid_is_alive(pid)
    }
}

#[cfg(unix)]
async fn wait_for_exit(pid: i64, within: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    while tokio::time::Instant::now() < deadline {
        if !pid_is_alive(pid) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    !pid_is_alive(pid)
}

/// Stop `child` and everything in its process group: SIGINT, then SIGTERM,
/// then SIGKILL, waiting [`INTERRUPT_GRACE`] and [`TERMINATE_GRACE`] between
/// stages.
pub async fn terminate(child: &mut Child) -> Option<ExitStatus> {
    if let Ok(Some(status)) = child.try_wait() {
        return Some(status);
    }
    let Some(pid) = child.id() else {
        return child.wait().await.ok();
    };

    #[cfg(unix)]
    {
        for (signal, grace) in [
            (libc::SIGINT, INTERRUPT_GRACE),
            (libc::SIGTERM, TERMINATE_GRACE),
        ] {
            debug!(pid, signal, "signalling process group");
            if !signal_group(pid, signal) {
                break;
            }
            if let Ok(Ok(status)) = tokio::time::timeout(grace, child.wait()).await {
                // Stragglers in the group would keep the pipes open.
                signal_group(pid, libc::SIGKILL);
                return Some(status);
            }
        }
        signal_group(pid, libc::SIGKILL);
    }

    if let Err(e) = child.start_kill() {
        debug!(pid, error = %e, "start_kill after group kill");
    }
    match child.wait().await {
        Ok(status) => Some(status),
        Err(e) => {
            warn!(pid, error = %e, "failed to reap terminated process");
            None
        }
    }
}

/// Kills a process group when dropped, unless disarmed.
///
/// `kill_on_drop` only reaches the direct child; this reaches its
/// descendants too, so a dropped chat turn leaves nothing behind.
pub struct ProcessGroupGuard {
    pid: Option<u32>,
}

impl ProcessGroupGuard {
    pub fn new(pid: Option<u32>) -> Self {
        Self { pid }
    }

    pub fn disarm(&mut self) {
        self.pid = None;
    }
}

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        #[cfg(unix)]
        if let Some(pid) = self.pid.take() {
            signal_group(pid, libc::SIGKILL);
        }
    }
}
