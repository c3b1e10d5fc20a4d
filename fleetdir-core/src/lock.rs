//! Advisory cross-process file locks.
//!
//! Every persisted record is guarded by a sibling `<name>.lock` file. Readers
//! take a shared lock and writers take an exclusive one. Every acquisition is
//! bounded by a timeout.
//!
//! Locks are released when the returned [`LockGuard`] is dropped. The lock
//! file itself is never removed.
//!
//! # Example
//!
//! ```rust,ignore
//! use fleetdir_core::lock::FileLock;
//! use std::time::Duration;
//!
//! let lock = FileLock::new("/home/alice/.fleetdir-token");
//! let guard = lock.acquire_exclusive(Duration::from_secs(5))?;
//! // write the record
//! drop(guard);
//! ```

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, trace};

/// Default time to wait for a lock before giving up.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Default delay between non-blocking lock attempts.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(678);

/// Error type for lock operations.
#[derive(Debug, Error)]
pub enum LockError {
    /// The lock was held by someone else for the whole timeout.
    #[error("timed out after {timeout:?} waiting for lock on {path}")]
    Timeout { path: PathBuf, timeout: Duration },

    /// Opening the lock file or calling into the OS failed.
    #[error("lock I/O error: {0}")]
    Io(#[from] io::Error),
}

/// How a lock is held.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// Timing parameters for lock acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockSettings {
    pub timeout: Duration,
    pub retry_interval: Duration,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_LOCK_TIMEOUT,
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }
}

/// Advisory lock over a single target file.
#[derive(Debug, Clone)]
pub struct FileLock {
    lock_path: PathBuf,
    retry_interval: Duration,
}

impl FileLock {
    /// Create a lock for `target`, backed by `<target>.lock`.
    pub fn new(target: impl AsRef<Path>) -> Self {
        Self::with_retry_interval(target, DEFAULT_RETRY_INTERVAL)
    }

    pub fn with_retry_interval(target: impl AsRef<Path>, retry_interval: Duration) -> Self {
        let mut lock_path = target.as_ref().as_os_str().to_owned();
        lock_path.push(".lock");
        Self {
            lock_path: PathBuf::from(lock_path),
            retry_interval,
        }
    }

    /// Path of the sibling lock file.
    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// Acquire a shared lock, retrying until `timeout` elapses.
    ///
    /// Shared holders coexist with each other but not with an exclusive holder.
    pub fn acquire_shared(&self, timeout: Duration) -> Result<LockGuard, LockError> {
        self.acquire(LockMode::Shared, timeout)
    }

    /// Acquire an exclusive lock, retrying until `timeout` elapses.
    pub fn acquire_exclusive(&self, timeout: Duration) -> Result<LockGuard, LockError> {
        self.acquire(LockMode::Exclusive, timeout)
    }

    fn acquire(&self, mode: LockMode, timeout: Duration) -> Result<LockGuard, LockError> {
        let file = self.open_lock_file()?;
        let deadline = Instant::now() + timeout;

        loop {
            if sys::try_lock(&file, mode)? {
                debug!("Acquired {:?} lock on {:?}", mode, self.lock_path);
                return Ok(LockGuard {
                    file: Some(file),
                    path: self.lock_path.clone(),
                    mode,
                });
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(LockError::Timeout {
                    path: self.lock_path.clone(),
                    timeout,
                });
            }

            trace!("Lock on {:?} is busy, retrying", self.lock_path);
            thread::sleep(self.retry_interval.min(deadline - now));
        }
    }

    fn open_lock_file(&self) -> io::Result<File> {
        if let Some(parent) = self.lock_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&self.lock_path)
    }
}

/// A held lock. Released on drop.
#[derive(Debug)]
pub struct LockGuard {
    file: Option<File>,
    path: PathBuf,
    mode: LockMode,
}

impl LockGuard {
    pub fn mode(&self) -> LockMode {
        self.mode
    }

    pub fn is_held(&self) -> bool {
        self.file.is_some()
    }

    /// Release the lock. Calling this more than once is a no-op.
    pub fn release(&mut self) {
        if let Some(file) = self.file.take() {
            if let Err(e) = sys::unlock(&file) {
                // Closing the descriptor below drops the lock regardless.
                debug!("Explicit unlock of {:?} failed: {}", self.path, e);
            }
            debug!("Released {:?} lock on {:?}", self.mode, self.path);
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(unix)]
mod sys {
    use super::LockMode;
    use std::fs::File;
    use std::io;
    use std::os::unix::io::AsRawFd;

    pub(super) fn try_lock(file: &File, mode: LockMode) -> io::Result<bool> {
        let op = match mode {
            LockMode::Shared => libc::LOCK_SH,
            LockMode::Exclusive => libc::LOCK_EX,
        } | libc::LOCK_NB;

        // SAFETY: the descriptor is owned by `file` and open for the call.
        let rc = unsafe { libc::flock(file.as_raw_fd(), op) };
        if rc == 0 {
            return Ok(true);
        }

        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(code) if code == libc::EWOULDBLOCK || code == libc::EINTR => Ok(false),
            _ => Err(err),
        }
    }

    pub(super) fn unlock(file: &File) -> io::Result<()> {
        // SAFETY: as above.
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_UN) };
        if rc == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }
}

#[cfg(not(unix))]
mod sys {
    use super::LockMode;
    use std::fs::File;
    use std::io;

    pub(super) fn try_lock(_file: &File, _mode: LockMode) -> io::Result<bool> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "advisory file locks are only supported on unix",
        ))
    }

    pub(super) fn unlock(_file: &File) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SHORT: Duration = Duration::from_millis(300);

    fn test_lock() -> (FileLock, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let lock = FileLock::with_retry_interval(
            temp_dir.path().join("record"),
            Duration::from_millis(50),
        );
        (lock, temp_dir)
    }

    #[test]
    fn test_lock_path_is_sibling() {
        let lock = FileLock::new("/home/alice/.fleetdir-token");
        assert_eq!(lock.lock_path(), Path::new("/home/alice/.fleetdir-token.lock"));
    }

    #[test]
    fn test_shared_holders_coexist() {
        let (lock, _temp) = test_lock();

        let first = lock.acquire_shared(SHORT).unwrap();
        let second = lock.acquire_shared(SHORT).unwrap();

        assert!(first.is_held());
        assert!(second.is_held());
        assert_eq!(second.mode(), LockMode::Shared);
    }

    #[test]
    fn test_exclusive_blocks_shared_until_timeout() {
        let (lock, _temp) = test_lock();
        let _holder = lock.acquire_exclusive(SHORT).unwrap();

        let started = Instant::now();
        let result = lock.acquire_shared(SHORT);

        assert!(matches!(result, Err(LockError::Timeout { .. })));
        assert!(started.elapsed() >= SHORT);
        assert!(started.elapsed() < SHORT + Duration::from_secs(2));
    }

    #[test]
    fn test_shared_blocks_exclusive() {
        let (lock, _temp) = test_lock();
        let _reader = lock.acquire_shared(SHORT).unwrap();

        let result = lock.acquire_exclusive(SHORT);
        assert!(matches!(result, Err(LockError::Timeout { .. })));
    }

    #[test]
    fn test_release_allows_next_holder() {
        let (lock, _temp) = test_lock();

        let mut holder = lock.acquire_exclusive(SHORT).unwrap();
        holder.release();
        assert!(!holder.is_held());

        // Second release is a no-op.
        holder.release();

        let next = lock.acquire_exclusive(SHORT).unwrap();
        assert!(next.is_held());
    }

    #[test]
    fn test_waiter_acquires_after_holder_drops() {
        let (lock, _temp) = test_lock();
        let holder = lock.acquire_exclusive(SHORT).unwrap();

        let waiter_lock = lock.clone();
        let waiter = thread::spawn(move || {
            waiter_lock
                .acquire_exclusive(Duration::from_secs(3))
                .map(|guard| guard.mode())
        });

        thread::sleep(Duration::from_millis(150));
        drop(holder);

        let mode = waiter.join().unwrap().unwrap();
        assert_eq!(mode, LockMode::Exclusive);
    }

    #[test]
    fn test_lock_file_is_kept() {
        let (lock, _temp) = test_lock();

        drop(lock.acquire_exclusive(SHORT).unwrap());

        assert!(lock.lock_path().exists());
    }
}
