//! Child-process plumbing: spawn, signal, reap, classify.
//!
//! Children are spawned with the daemon's OSC URL exported as
//! `NSM_URL`. The daemon never blocks on a child: exits are collected
//! by a non-blocking `waitpid` drain, driven from the event loop by a
//! SIGCHLD stream. A liveness probe (`kill(pid, 0)`) backs up the
//! signal path for processes that disappear without one, e.g. after
//! re-parenting.

use std::process::Command;

use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use tracing::debug;

/// Exit code produced by a child whose exec failed. Rust reports exec
/// failure from `spawn()` directly, but wrapper scripts that `exec` a
/// missing binary still surface it as this code.
pub const LAUNCH_ERROR_EXIT_CODE: i32 = 255;

/// Raw exit information for one reaped child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    /// Normal termination with the given exit code.
    Exited(i32),
    /// Terminated by a signal.
    Signaled(Signal),
}

/// What an exit means for the owning client record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    /// Clean zero exit.
    CleanExit,
    /// The exec-failure sentinel: the program could not be started.
    LaunchError,
    /// Killed by one of the shutdown signals (TERM/HUP/INT/KILL).
    Killed,
    /// Any other signal or non-zero exit.
    Crashed,
}

/// Classify a reaped exit.
#[must_use]
pub fn classify_exit(kind: ExitKind) -> ExitOutcome {
    match kind {
        ExitKind::Exited(0) => ExitOutcome::CleanExit,
        ExitKind::Exited(LAUNCH_ERROR_EXIT_CODE) => ExitOutcome::LaunchError,
        ExitKind::Exited(_) => ExitOutcome::Crashed,
        ExitKind::Signaled(
            Signal::SIGTERM | Signal::SIGHUP | Signal::SIGINT | Signal::SIGKILL,
        ) => ExitOutcome::Killed,
        ExitKind::Signaled(_) => ExitOutcome::Crashed,
    }
}

/// One child collected by [`reap_children`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReapedChild {
    pub pid: u32,
    pub kind: ExitKind,
}

/// Spawn `executable` with `NSM_URL` set, returning its PID.
///
/// The child handle is dropped; the daemon reaps through `waitpid`.
///
/// # Errors
///
/// Returns the spawn error when the executable cannot be started,
/// which the caller records as a launch error.
pub fn spawn_client(executable: &str, nsm_url: &str) -> std::io::Result<u32> {
    let child = Command::new(executable).env("NSM_URL", nsm_url).spawn()?;
    Ok(child.id())
}

/// Drain every child that has exited. Never blocks.
#[must_use]
pub fn reap_children() -> Vec<ReapedChild> {
    let mut reaped = Vec::new();
    loop {
        match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::Exited(pid, code)) => reaped.push(ReapedChild {
                pid: pid.as_raw() as u32,
                kind: ExitKind::Exited(code),
            }),
            Ok(WaitStatus::Signaled(pid, signal, _)) => reaped.push(ReapedChild {
                pid: pid.as_raw() as u32,
                kind: ExitKind::Signaled(signal),
            }),
            Ok(WaitStatus::StillAlive) => break,
            Ok(other) => {
                debug!(?other, "ignoring non-exit wait status");
            }
            Err(_) => break,
        }
    }
    reaped
}

/// Liveness probe: signal 0 reports whether the PID still exists.
#[must_use]
pub fn process_is_running(pid: u32) -> bool {
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

/// Deliver a signal to a client process.
pub fn send_signal(pid: u32, signal: Signal) -> nix::Result<()> {
    kill(Pid::from_raw(pid as i32), signal)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_covers_the_exit_matrix() {
        assert_eq!(classify_exit(ExitKind::Exited(0)), ExitOutcome::CleanExit);
        assert_eq!(
            classify_exit(ExitKind::Exited(LAUNCH_ERROR_EXIT_CODE)),
            ExitOutcome::LaunchError
        );
        assert_eq!(classify_exit(ExitKind::Exited(1)), ExitOutcome::Crashed);
        assert_eq!(
            classify_exit(ExitKind::Signaled(Signal::SIGTERM)),
            ExitOutcome::Killed
        );
        assert_eq!(
            classify_exit(ExitKind::Signaled(Signal::SIGKILL)),
            ExitOutcome::Killed
        );
        assert_eq!(
            classify_exit(ExitKind::Signaled(Signal::SIGSEGV)),
            ExitOutcome::Crashed
        );
    }

    #[test]
    fn spawn_failure_is_reported_synchronously() {
        let result = spawn_client("nonexistent_command_12345", "osc.udp://localhost:1/");
        assert!(result.is_err());
    }

    #[test]
    fn spawn_exports_the_daemon_url() {
        let child = Command::new("sh")
            .args(["-c", "test \"$NSM_URL\" = osc.udp://localhost:7777/"])
            .env("NSM_URL", "osc.udp://localhost:7777/")
            .spawn()
            .unwrap();
        let status = waitpid(Pid::from_raw(child.id() as i32), None).unwrap();
        assert!(matches!(status, WaitStatus::Exited(_, 0)));
    }

    #[test]
    fn child_is_probed_and_reaped() {
        let child = Command::new("sleep").arg("30").spawn().unwrap();
        let pid = child.id();
        assert!(process_is_running(pid));

        send_signal(pid, Signal::SIGKILL).unwrap();
        // Reap directly rather than through the -1 drain so parallel
        // tests cannot steal each other's children.
        let status = waitpid(Pid::from_raw(pid as i32), None).unwrap();
        assert!(matches!(
            status,
            WaitStatus::Signaled(_, Signal::SIGKILL, _)
        ));
        assert!(!process_is_running(pid));
    }
}
