//! Background snapshot agent (component C9): a long-lived process that
//! takes a snapshot on a fixed interval, recording its pid for `status`/
//! `stop` and logging to a file since its stdout is detached. Grounded in
//! the teacher's daemon bootstrap in `src/bin/proxmox_backup_manager/datastore.rs`
//! (pid file discipline) and its signal handling conventions.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use log::{info, warn};
use nix::sys::signal::kill;
use nix::unistd::Pid;

use chrono::Utc;

use crate::atomic::write_atomic;
use crate::engine::{Engine, SnapshotOutcome};
use crate::error::FractylError;
use crate::lock;
use crate::repo::Repo;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentStatus {
    Running(i32, Option<u64>),
    Stopped,
}

fn read_pid_file(path: &PathBuf) -> Result<Option<(i32, Option<u64>)>> {
    match fs::read_to_string(path) {
        Ok(s) => {
            let mut lines = s.lines();
            let pid: i32 = lines
                .next()
                .unwrap_or("")
                .trim()
                .parse()
                .map_err(|_| FractylError::Corrupt(format!("malformed agent pid file {:?}", path)))?;
            let interval = lines.next().and_then(|l| l.trim().parse().ok());
            Ok(Some((pid, interval)))
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn process_alive(pid: i32) -> bool {
    kill(Pid::from_raw(pid), None).is_ok()
}

/// `status()` (spec section 4.9): inspects the pid file and probes
/// liveness, it does not trust the file's mere existence.
pub fn status(repo: &Repo) -> Result<AgentStatus> {
    match read_pid_file(&repo.agent_pid_path())? {
        Some((pid, interval)) if process_alive(pid) => Ok(AgentStatus::Running(pid, interval)),
        _ => Ok(AgentStatus::Stopped),
    }
}

/// `stop()`: sends `SIGTERM` to the recorded pid and removes the stale pid
/// file if the process is already gone.
pub fn stop(repo: &Repo) -> Result<AgentStatus> {
    match status(repo)? {
        AgentStatus::Running(pid, interval) => {
            kill(Pid::from_raw(pid), nix::sys::signal::Signal::SIGTERM)
                .with_context(|| format!("sending SIGTERM to agent pid {}", pid))?;
            Ok(AgentStatus::Running(pid, interval))
        }
        AgentStatus::Stopped => {
            let _ = fs::remove_file(repo.agent_pid_path());
            Ok(AgentStatus::Stopped)
        }
    }
}

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_shutdown_signal(_sig: libc::c_int) {
    SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
}

/// Installs `SIGTERM`/`SIGINT` handlers that flip a shared flag polled by
/// [`run_foreground`]'s loop, mirroring the teacher's raw `libc::signal`
/// usage for graceful worker shutdown.
fn install_signal_handlers() {
    let handler = handle_shutdown_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
    unsafe {
        libc::signal(libc::SIGTERM, handler);
        libc::signal(libc::SIGINT, handler);
    }
}

/// Runs the agent loop in the calling process: writes the pid file, installs
/// signal handlers, then snapshots every `interval` until asked to stop.
/// Intended to be called from a process already detached by the caller
/// (spec section 4.9 leaves daemonization to the CLI's process model).
pub fn run_foreground(repo: Repo, interval: Duration) -> Result<()> {
    if let Ok(AgentStatus::Running(pid, _)) = status(&repo) {
        bail!(FractylError::Busy(pid));
    }

    let pid = std::process::id() as i32;
    let contents = format!("{}\n{}\n", pid, interval.as_secs());
    write_atomic(&repo.agent_pid_path(), contents.as_bytes(), 0o644)
        .context("writing agent pid file")?;
    install_signal_handlers();

    let engine = Engine::open(repo.clone());
    info!("fractyl agent started, pid {}, interval {:?}", pid, interval);

    let result = run_loop(&repo, &engine, interval);

    let _ = fs::remove_file(repo.agent_pid_path());
    info!("fractyl agent stopped, pid {}", pid);
    result
}

/// `loop { sleep(interval); if acquire(repo) == Busy { skip }; try snapshot; release }`
/// (spec section 4.9). The lock is held only for the duration of one
/// snapshot attempt, not across the sleep.
fn run_loop(repo: &Repo, engine: &Engine, interval: Duration) -> Result<()> {
    loop {
        if !sleep_checking_shutdown(interval) {
            return Ok(());
        }

        let handle = match lock::acquire(&repo.lock_path()) {
            Ok(handle) => handle,
            Err(err) => {
                if err.downcast_ref::<FractylError>().map_or(false, |e| matches!(e, FractylError::Busy(_))) {
                    warn!("agent cycle skipped: repository busy");
                    continue;
                }
                return Err(err);
            }
        };

        let description = format!("Auto-snapshot {}", Utc::now().to_rfc3339());
        match engine.snapshot(&description) {
            Ok(SnapshotOutcome::Created { id, diff }) => {
                info!(
                    "agent snapshot {} ({} added, {} modified, {} removed)",
                    &id[..8.min(id.len())],
                    diff.added.len(),
                    diff.modified.len(),
                    diff.removed.len()
                );
            }
            Ok(SnapshotOutcome::NoChanges) => {}
            Err(err) => warn!("agent snapshot failed: {:#}", err),
        }
        handle.release();

        if SHUTDOWN_REQUESTED.load(Ordering::SeqCst) {
            return Ok(());
        }
    }
}

/// Sleeps in short slices so a signal arriving mid-interval is noticed
/// promptly rather than after the full interval elapses. Returns `false` if
/// shutdown was requested during the sleep.
fn sleep_checking_shutdown(interval: Duration) -> bool {
    const SLICE: Duration = Duration::from_millis(200);
    let mut remaining = interval;
    while remaining > Duration::ZERO {
        if SHUTDOWN_REQUESTED.load(Ordering::SeqCst) {
            return false;
        }
        let step = remaining.min(SLICE);
        std::thread::sleep(step);
        remaining -= step;
    }
    !SHUTDOWN_REQUESTED.load(Ordering::SeqCst)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn status_is_stopped_without_pid_file() {
        let dir = tempdir().unwrap();
        let repo = Repo::init(dir.path()).unwrap();
        assert_eq!(status(&repo).unwrap(), AgentStatus::Stopped);
    }

    #[test]
    fn status_ignores_dead_pid() {
        let dir = tempdir().unwrap();
        let repo = Repo::init(dir.path()).unwrap();
        fs::write(repo.agent_pid_path(), b"2000000000\n").unwrap();
        assert_eq!(status(&repo).unwrap(), AgentStatus::Stopped);
    }

    #[test]
    fn status_detects_self_as_running() {
        let dir = tempdir().unwrap();
        let repo = Repo::init(dir.path()).unwrap();
        let pid = std::process::id() as i32;
        fs::write(repo.agent_pid_path(), format!("{}\n180\n", pid)).unwrap();
        assert_eq!(status(&repo).unwrap(), AgentStatus::Running(pid, Some(180)));
    }

    #[test]
    fn stop_without_running_agent_clears_stale_file() {
        let dir = tempdir().unwrap();
        let repo = Repo::init(dir.path()).unwrap();
        fs::write(repo.agent_pid_path(), b"2000000001\n").unwrap();
        assert_eq!(stop(&repo).unwrap(), AgentStatus::Stopped);
        assert!(!repo.agent_pid_path().is_file());
    }
}
