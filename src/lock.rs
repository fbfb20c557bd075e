//! Advisory file lock with a bounded wait.
//!
//! The lock lives in a sidecar `<path>.lock` file so the guarded file itself
//! can be created, appended or replaced freely while the lock is held.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::trace;

use crate::error::{PollError, Result};

/// Lock wait for the per-fetch CSV log.
pub const FETCH_LOG_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// Lock wait for batch output files.
pub const OUTPUT_LOCK_TIMEOUT: Duration = Duration::from_secs(60);

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Exclusive advisory lock, released on drop.
#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Locks `<target>.lock`, retrying until `timeout` elapses.
    pub fn acquire(target: &Path, timeout: Duration) -> Result<Self> {
        let path = lock_path(target);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let deadline = Instant::now() + timeout;
        loop {
            match try_lock_exclusive(&file) {
                Ok(true) => {
                    trace!(lock = %path.display(), "Lock acquired");
                    return Ok(Self { file, path });
                }
                Ok(false) => {}
                Err(e) => return Err(PollError::Io(e)),
            }

            if Instant::now() >= deadline {
                return Err(PollError::LockTimeout {
                    path: path.clone(),
                    timeout,
                });
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        unlock(&self.file);
        trace!(lock = %self.path.display(), "Lock released");
        // The lock file stays on disk; removing it would let a waiter lock a
        // deleted inode while a newcomer creates a fresh one.
    }
}

fn lock_path(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_os_string();
    name.push(".lock");
    PathBuf::from(name)
}

#[cfg(unix)]
fn try_lock_exclusive(file: &File) -> std::io::Result<bool> {
    use std::os::unix::io::AsRawFd;

    let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if result == 0 {
        return Ok(true);
    }
    let err = std::io::Error::last_os_error();
    if err.kind() == std::io::ErrorKind::WouldBlock {
        Ok(false)
    } else {
        Err(err)
    }
}

#[cfg(unix)]
fn unlock(file: &File) {
    use std::os::unix::io::AsRawFd;

    unsafe {
        libc::flock(file.as_raw_fd(), libc::LOCK_UN);
    }
}

#[cfg(not(unix))]
fn try_lock_exclusive(file: &File) -> std::io::Result<bool> {
    match file.try_lock() {
        Ok(()) => Ok(true),
        Err(std::fs::TryLockError::WouldBlock) => Ok(false),
        Err(std::fs::TryLockError::Error(e)) => Err(e),
    }
}

#[cfg(not(unix))]
fn unlock(file: &File) {
    let _ = file.unlock();
}
