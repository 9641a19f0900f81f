//! Exclusive lock on a state directory.
//!
//! Two installer processes sharing one registry file would overwrite each
//! other's state, so whoever opens a state directory holds an advisory
//! `flock` on `<dir>/.lock` until the guard is dropped.

use std::fs::{File, OpenOptions};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::{InstallerError, Result};

/// File-lock guard that releases the lock on drop.
#[derive(Debug)]
pub struct StateLock {
    file: File,
    path: PathBuf,
}

impl StateLock {
    /// Acquire the lock, polling until `timeout` elapses.
    pub fn acquire(path: &Path, timeout: Duration) -> Result<StateLock> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .map_err(|e| InstallerError::Lock {
                path: path.to_path_buf(),
                reason: format!("cannot open lock file: {}", e),
            })?;

        let fd = file.as_raw_fd();
        let deadline = Instant::now() + timeout;
        loop {
            let ret = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
            if ret == 0 {
                debug!(path = %path.display(), "state lock acquired");
                return Ok(StateLock {
                    file,
                    path: path.to_path_buf(),
                });
            }
            if Instant::now() >= deadline {
                return Err(InstallerError::Lock {
                    path: path.to_path_buf(),
                    reason: format!("timed out after {}ms", timeout.as_millis()),
                });
            }
            std::thread::sleep(Duration::from_millis(25));
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        unsafe {
            libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_times_out_until_release() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(".lock");
        let first = StateLock::acquire(&path, Duration::from_millis(100)).unwrap();

        let err = StateLock::acquire(&path, Duration::from_millis(60)).unwrap_err();
        assert!(matches!(err, InstallerError::Lock { .. }));

        drop(first);
        let again = StateLock::acquire(&path, Duration::from_millis(100)).unwrap();
        assert_eq!(again.path(), path.as_path());
    }

    #[test]
    fn creates_missing_parent() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join(".lock");
        assert!(StateLock::acquire(&path, Duration::from_millis(10)).is_ok());
    }
}
