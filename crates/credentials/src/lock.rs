//! Advisory writer lock on the store directory.
//!
//! Writers serialize on an exclusive `flock` of `.lock`. Acquisition polls
//! with `LOCK_NB` until the configured timeout, then fails with
//! `LockTimeout`. The lock is released when the guard is dropped (closing
//! the descriptor releases it too, so a crashed writer never wedges the
//! store).

use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::error::{CredentialError, IoContext, Result};
use crate::fsio::FILE_MODE;

pub const LOCK_FILE: &str = ".lock";

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Held exclusive lock; released on drop
#[derive(Debug)]
pub struct StoreLock {
    file: File,
    path: PathBuf,
}

fn flock(file: &File, operation: libc::c_int) -> std::io::Result<()> {
    // SAFETY: the descriptor is owned by `file` and valid for the call.
    let rc = unsafe { libc::flock(file.as_raw_fd(), operation) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

impl StoreLock {
    /// Acquire the lock file at `path`, waiting at most `timeout`
    pub fn acquire(path: &Path, timeout: Duration) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .mode(FILE_MODE)
            .open(path)
            .io_context(|| format!("Failed to open lock file {}", path.display()))?;

        let started = Instant::now();
        loop {
            match flock(&file, libc::LOCK_EX | libc::LOCK_NB) {
                Ok(()) => {
                    debug!(path = %path.display(), waited_ms = started.elapsed().as_millis() as u64, "store lock acquired");
                    return Ok(Self {
                        file,
                        path: path.to_path_buf(),
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    let waited = started.elapsed();
                    if waited >= timeout {
                        return Err(CredentialError::LockTimeout {
                            path: path.to_path_buf(),
                            waited,
                        });
                    }
                    thread::sleep(POLL_INTERVAL.min(timeout - waited));
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(CredentialError::io(
                        format!("Failed to lock {}", path.display()),
                        e,
                    ))
                }
            }
        }
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = flock(&self.file, libc::LOCK_UN);
        debug!(path = %self.path.display(), "store lock released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_second_writer_times_out() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(LOCK_FILE);

        let _held = StoreLock::acquire(&path, Duration::from_millis(100)).unwrap();

        // flock locks belong to the open file description, so a second open
        // in the same process contends like another process would.
        let started = Instant::now();
        let result = StoreLock::acquire(&path, Duration::from_millis(150));
        assert!(matches!(result, Err(CredentialError::LockTimeout { .. })));
        assert!(started.elapsed() >= Duration::from_millis(150));
    }

    #[test]
    fn test_lock_released_on_drop() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(LOCK_FILE);

        {
            let _held = StoreLock::acquire(&path, Duration::from_millis(100)).unwrap();
        }

        assert!(StoreLock::acquire(&path, Duration::from_millis(100)).is_ok());
    }

    #[test]
    fn test_waiter_gets_lock_after_release() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(LOCK_FILE);

        let held = StoreLock::acquire(&path, Duration::from_millis(100)).unwrap();
        let waiter_path = path.clone();
        let waiter = thread::spawn(move || StoreLock::acquire(&waiter_path, Duration::from_secs(5)).is_ok());

        thread::sleep(Duration::from_millis(100));
        drop(held);

        assert!(waiter.join().unwrap());
    }
}
