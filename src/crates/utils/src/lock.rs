//! Advisory file locking with a bounded wait, used to guard `status.csv` and
//! the cancel sentinel from concurrent readers/writers.

use crate::error::{Result, UtilsError};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::time::{Duration, Instant};

/// A held advisory lock on a file; the lock is released when dropped.
pub struct FileLock {
    file: File,
}

impl FileLock {
    /// Try to acquire an exclusive lock on `path`, polling until `timeout`
    /// elapses. The lock file is created if it does not already exist.
    pub fn acquire(path: impl AsRef<Path>, timeout: Duration) -> Result<Self> {
        let path_ref = path.as_ref();
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(path_ref)?;

        let deadline = Instant::now() + timeout;
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => return Ok(FileLock { file }),
                Err(_) if Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(50));
                }
                Err(_) => {
                    return Err(UtilsError::LockTimeout {
                        path: path_ref.display().to_string(),
                        timeout_secs: timeout.as_secs(),
                    })
                }
            }
        }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn acquires_uncontended_lock() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".test.lock");
        let lock = FileLock::acquire(&path, Duration::from_secs(1));
        assert!(lock.is_ok());
    }

    #[test]
    fn times_out_on_contention() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".test.lock");
        let _held = FileLock::acquire(&path, Duration::from_secs(1)).unwrap();
        let second = FileLock::acquire(&path, Duration::from_millis(100));
        assert!(second.is_err());
    }
}
