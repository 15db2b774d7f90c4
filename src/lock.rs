//! Exclusive, PID-stamped, stale-tolerant repository lock (component C3).
//!
//! Grounded in the teacher's `lock_file`/`file_set_contents` pair
//! (src/tools.rs): an exclusive-create lock file plus a liveness probe
//! standing in for the teacher's `flock` timeout loop, generalized to allow
//! reclaiming a lock abandoned by a dead holder.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use nix::sys::signal::kill;
use nix::unistd::Pid;

use crate::error::FractylError;

/// Owns the on-disk lock file for as long as it is held. Dropping (or
/// explicitly calling [`LockHandle::release`]) unlinks the file, but only if
/// it still names our own pid -- a safety net against releasing a lock that
/// was stolen out from under a crashed holder by a subsequent process.
pub struct LockHandle {
    path: PathBuf,
    pid: i32,
}

impl LockHandle {
    /// Unlink the lock file if we still own it. Equivalent to dropping the
    /// handle; kept as an explicit method to document the release point at
    /// call sites.
    pub fn release(self) {
        // Drop does the actual work.
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        if let Ok(Some(pid)) = read_holder(&self.path) {
            if pid == self.pid {
                let _ = fs::remove_file(&self.path);
            }
        }
    }
}

fn read_holder(path: &Path) -> Result<Option<i32>> {
    match fs::read_to_string(path) {
        Ok(contents) => {
            let pid: i32 = contents
                .trim()
                .parse()
                .map_err(|_| FractylError::Corrupt(format!("malformed lock file {:?}", path)))?;
            Ok(Some(pid))
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn process_alive(pid: i32) -> bool {
    kill(Pid::from_raw(pid), None).is_ok()
}

fn create_exclusive(path: &Path, pid: i32) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    file.write_all(format!("{}\n", pid).as_bytes())?;
    file.sync_all().ok();
    Ok(())
}

/// Non-blocking acquire: creates the lock file exclusively, or reclaims it
/// once if the recorded holder is not alive on this host.
pub fn acquire(path: &Path) -> Result<LockHandle> {
    try_acquire(path, true)
}

fn try_acquire(path: &Path, allow_stale_retry: bool) -> Result<LockHandle> {
    let pid = std::process::id() as i32;
    match create_exclusive(path, pid) {
        Ok(()) => Ok(LockHandle { path: path.to_path_buf(), pid }),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            match read_holder(path)? {
                Some(holder_pid) if process_alive(holder_pid) => {
                    bail!(FractylError::Busy(holder_pid));
                }
                _ if allow_stale_retry => {
                    // Holder is dead (or the file vanished between the
                    // exclusive-create failure and our read): reclaim once.
                    let _ = fs::remove_file(path);
                    try_acquire(path, false)
                }
                _ => {
                    let holder_pid = read_holder(path)?.unwrap_or(pid);
                    bail!(FractylError::Busy(holder_pid));
                }
            }
        }
        Err(e) => Err(e.into()),
    }
}

/// Peek at the lock without acquiring it.
pub fn check(path: &Path) -> Result<Option<i32>> {
    match read_holder(path)? {
        Some(pid) if process_alive(pid) => Ok(Some(pid)),
        _ => Ok(None),
    }
}

/// Poll [`acquire`] at 100ms intervals for up to `timeout`.
pub fn acquire_wait(path: &Path, timeout: Duration) -> Result<LockHandle> {
    let start = Instant::now();
    loop {
        match acquire(path) {
            Ok(handle) => return Ok(handle),
            Err(err) => {
                let is_busy = err.downcast_ref::<FractylError>().map_or(false, |e| matches!(e, FractylError::Busy(_)));
                if !is_busy || start.elapsed() >= timeout {
                    return Err(err);
                }
                std::thread::sleep(Duration::from_millis(100));
            }
        }
    }
}
