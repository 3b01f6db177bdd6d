//! Advisory file locks guarding a vector collection.
//!
//! Uses flock() on a `<name>.lock` file next to the collection.
//! - Open store handle: holds a shared lock for its lifetime
//! - Clear: needs an exclusive lock, taken without blocking
//! - Append: blocks for an exclusive lock on the collection file itself
//!
//! A clear that cannot get the exclusive lock means another session still
//! has the collection open.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

#[cfg(unix)]
use std::os::unix::io::AsRawFd;

/// Lock mode requested on the lock file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// A held file lock that releases on drop
#[derive(Debug)]
pub struct FileLock {
    file: File,
}

impl FileLock {
    /// Try to take a shared lock. Fails with `WouldBlock` while someone holds
    /// the exclusive lock.
    pub fn try_shared(lock_path: &Path) -> io::Result<Self> {
        Self::try_acquire(lock_path, LockMode::Shared)
    }

    /// Try to take an exclusive lock. Fails with `WouldBlock` while any other
    /// handle (shared or exclusive) is held.
    pub fn try_exclusive(lock_path: &Path) -> io::Result<Self> {
        Self::try_acquire(lock_path, LockMode::Exclusive)
    }

    /// Wait for an exclusive lock on an already open file.
    ///
    /// `file` should be a clone of the handle being guarded so the lock
    /// covers the same open file.
    pub fn exclusive_on(file: File) -> io::Result<Self> {
        Self::lock(&file, LockMode::Exclusive, true)?;
        Ok(FileLock { file })
    }

    fn try_acquire(lock_path: &Path, mode: LockMode) -> io::Result<Self> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(lock_path)?;

        Self::lock(&file, mode, false)?;

        Ok(FileLock { file })
    }

    #[cfg(unix)]
    fn lock(file: &File, mode: LockMode, wait: bool) -> io::Result<()> {
        let mut op = match mode {
            LockMode::Shared => libc::LOCK_SH,
            LockMode::Exclusive => libc::LOCK_EX,
        };
        if !wait {
            op |= libc::LOCK_NB;
        }
        let fd = file.as_raw_fd();
        let result = unsafe { libc::flock(fd, op) };
        if result != 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock
                || err.raw_os_error() == Some(libc::EWOULDBLOCK)
                || err.raw_os_error() == Some(libc::EAGAIN)
            {
                return Err(io::Error::new(
                    io::ErrorKind::WouldBlock,
                    "collection is locked by another session",
                ));
            }
            return Err(err);
        }
        Ok(())
    }

    // No locking outside unix: clear can never report a blocked collection there.
    #[cfg(not(unix))]
    fn lock(_file: &File, _mode: LockMode, _wait: bool) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(unix)]
impl Drop for FileLock {
    fn drop(&mut self) {
        let fd = self.file.as_raw_fd();
        // Release the lock - ignore errors on drop
        unsafe { libc::flock(fd, libc::LOCK_UN) };
    }
}

/// Whether an error from [`FileLock`] means "held elsewhere".
pub fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_shared_locks_coexist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.lock");

        let a = FileLock::try_shared(&path);
        let b = FileLock::try_shared(&path);
        assert!(a.is_ok());
        assert!(b.is_ok());
    }

    #[test]
    fn test_shared_blocks_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.lock");

        let shared = FileLock::try_shared(&path).unwrap();
        let err = FileLock::try_exclusive(&path).unwrap_err();
        assert!(is_contended(&err));

        drop(shared);

        let exclusive = FileLock::try_exclusive(&path);
        assert!(exclusive.is_ok(), "exclusive lock should succeed after release");
    }

    #[test]
    fn test_exclusive_blocks_shared() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.lock");

        let _exclusive = FileLock::try_exclusive(&path).unwrap();
        let err = FileLock::try_shared(&path).unwrap_err();
        assert!(is_contended(&err));
    }

    #[test]
    fn test_exclusive_on_open_file_is_released_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.vec");
        let file = File::create(&path).unwrap();

        let held = FileLock::exclusive_on(file.try_clone().unwrap()).unwrap();
        let other = File::open(&path).unwrap();
        let busy = unsafe { libc::flock(other.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        assert_ne!(busy, 0, "a second open file must not get the lock");

        drop(held);
        let free = unsafe { libc::flock(other.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        assert_eq!(free, 0);
    }
}
