//! Bounded waiting and signal escalation for child processes.
//!
//! A well-behaved engine exits on its own after the quit command. One that
//! doesn't gets SIGTERM, and whatever survives the second grace period gets
//! SIGKILL. Every wait in here has a deadline.

use std::os::unix::process::ExitStatusExt;
use std::process::{Child, ExitStatus};
use std::time::{Duration, Instant};

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tracing::{debug, warn};

use parley_types::ParleyError;

/// Timing for the termination sequence.
#[derive(Debug, Clone)]
pub struct TerminateConfig {
    /// How long to wait for a voluntary exit before sending SIGTERM.
    pub grace_period: Duration,
    /// How long to wait after SIGTERM before sending SIGKILL.
    pub term_timeout: Duration,
    /// Polling interval while waiting.
    pub poll_interval: Duration,
}

impl Default for TerminateConfig {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(30),
            term_timeout: Duration::from_secs(2),
            poll_interval: Duration::from_millis(10),
        }
    }
}

/// Protected PIDs that must never be signalled.
const PROTECTED_PIDS: [u32; 2] = [0, 1];

fn validate_pid(pid: u32) -> Result<Pid, ParleyError> {
    if PROTECTED_PIDS.contains(&pid) {
        return Err(ParleyError::IoError(format!(
            "refusing to signal protected PID {pid}"
        )));
    }
    let raw = i32::try_from(pid)
        .map_err(|_| ParleyError::IoError(format!("PID {pid} out of range")))?;
    Ok(Pid::from_raw(raw))
}

/// Map an exit status to a single code: the exit code, or `-signum` when
/// the process was killed by a signal.
pub fn exit_code_of(status: ExitStatus) -> i32 {
    match status.code() {
        Some(code) => code,
        None => -status.signal().unwrap_or(0),
    }
}

/// Exit code of a process the harness had to signal.
///
/// An engine that handles SIGTERM by exiting cleanly still reports
/// `-SIGTERM`, so a forced shutdown never reads as success.
pub fn forced_exit_code(status: ExitStatus) -> i32 {
    match exit_code_of(status) {
        0 => -(Signal::SIGTERM as i32),
        code => code,
    }
}

/// Poll `child` until it exits or `deadline` passes.
pub fn wait_until(
    child: &mut Child,
    deadline: Instant,
    poll_interval: Duration,
) -> Result<Option<ExitStatus>, ParleyError> {
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(Some(status)),
            Ok(None) => {}
            Err(e) => return Err(ParleyError::IoError(format!("waitpid: {e}"))),
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        std::thread::sleep(poll_interval);
    }
}

/// Wait for a voluntary exit, then escalate SIGTERM -> SIGKILL.
///
/// Returns the final exit status and whether a signal had to be sent.
pub fn terminate_with_escalation(
    child: &mut Child,
    config: &TerminateConfig,
) -> Result<(ExitStatus, bool), ParleyError> {
    let deadline = Instant::now() + config.grace_period;
    if let Some(status) = wait_until(child, deadline, config.poll_interval)? {
        return Ok((status, false));
    }

    let pid = validate_pid(child.id())?;
    warn!(
        pid = child.id(),
        grace = ?config.grace_period,
        "process did not exit within grace period, sending SIGTERM"
    );
    match signal::kill(pid, Signal::SIGTERM) {
        Ok(()) => {}
        Err(nix::errno::Errno::ESRCH) => debug!(pid = child.id(), "process already gone"),
        Err(e) => warn!(pid = child.id(), error = %e, "SIGTERM failed"),
    }

    let deadline = Instant::now() + config.term_timeout;
    if let Some(status) = wait_until(child, deadline, config.poll_interval)? {
        return Ok((status, true));
    }

    warn!(pid = child.id(), "process survived SIGTERM, sending SIGKILL");
    child
        .kill()
        .map_err(|e| ParleyError::IoError(format!("kill SIGKILL: {e}")))?;
    let status = child
        .wait()
        .map_err(|e| ParleyError::IoError(format!("waitpid after SIGKILL: {e}")))?;
    Ok((status, true))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::{Command, Stdio};

    #[test]
    fn forced_clean_exit_reports_sigterm() {
        assert_eq!(forced_exit_code(ExitStatus::from_raw(0)), -(Signal::SIGTERM as i32));
        assert_eq!(forced_exit_code(ExitStatus::from_raw(3 << 8)), 3);
        assert_eq!(forced_exit_code(ExitStatus::from_raw(9)), -9);
    }

    fn quick() -> TerminateConfig {
        TerminateConfig {
            grace_period: Duration::from_millis(100),
            term_timeout: Duration::from_millis(500),
            poll_interval: Duration::from_millis(5),
        }
    }

    #[test]
    fn protected_pids_are_rejected() {
        assert!(validate_pid(0).is_err());
        assert!(validate_pid(1).is_err());
        assert!(validate_pid(4242).is_ok());
    }

    #[test]
    fn voluntary_exit_needs_no_signal() {
        let mut child = Command::new("/bin/sh")
            .args(["-c", "exit 3"])
            .stdout(Stdio::null())
            .spawn()
            .expect("spawn failed");
        let (status, signalled) =
            terminate_with_escalation(&mut child, &quick()).expect("terminate failed");
        assert!(!signalled);
        assert_eq!(exit_code_of(status), 3);
    }

    #[test]
    fn sleeping_child_is_terminated() {
        let mut child = Command::new("/bin/sleep")
            .arg("30")
            .spawn()
            .expect("spawn failed");
        let (status, signalled) =
            terminate_with_escalation(&mut child, &quick()).expect("terminate failed");
        assert!(signalled);
        assert_eq!(exit_code_of(status), -(Signal::SIGTERM as i32));
    }

    #[test]
    fn sigterm_ignoring_child_is_killed() {
        let mut child = Command::new("/bin/sh")
            .args(["-c", "trap '' TERM; sleep 30"])
            .spawn()
            .expect("spawn failed");
        // Let the shell install its trap before we signal it.
        std::thread::sleep(Duration::from_millis(100));
        let (status, signalled) =
            terminate_with_escalation(&mut child, &quick()).expect("terminate failed");
        assert!(signalled);
        assert_eq!(exit_code_of(status), -(Signal::SIGKILL as i32));
    }

    #[test]
    fn wait_until_returns_none_before_exit() {
        let mut child = Command::new("/bin/sleep")
            .arg("30")
            .spawn()
            .expect("spawn failed");
        let deadline = Instant::now() + Duration::from_millis(20);
        let status = wait_until(&mut child, deadline, Duration::from_millis(5)).expect("wait");
        assert!(status.is_none());
        child.kill().ok();
        child.wait().ok();
    }
}
