//! Advisory locking of a container's file descriptor before an in-place
//! write. Before any in-place write the container is locked with an
//! exclusive advisory lock on its file descriptor; failure to acquire is
//! reported as [`Error::AlreadyLocked`]. The lock is released on close.

use std::fs::File;

use fs2::FileExt;

use crate::error::{Error, Result};

/// An exclusive advisory lock held on a container's underlying file,
/// released automatically when dropped.
pub struct ExclusiveLock<'a> {
    file: &'a File,
}

impl<'a> ExclusiveLock<'a> {
    /// Attempts to acquire the lock without blocking, returning
    /// [`Error::AlreadyLocked`] if another handle already holds it.
    pub fn try_acquire(file: &'a File) -> Result<Self> {
        file.try_lock_exclusive().map_err(|_| Error::AlreadyLocked)?;
        Ok(Self { file })
    }
}

impl Drop for ExclusiveLock<'_> {
    fn drop(&mut self) {
        let _ = FileExt::unlock(self.file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_lock_attempt_fails_while_first_is_held() {
        let file = tempfile::tempfile().unwrap();
        let lock1 = ExclusiveLock::try_acquire(&file).unwrap();
        let lock2 = ExclusiveLock::try_acquire(&file);
        assert!(lock2.is_err());
        drop(lock1);
        let lock3 = ExclusiveLock::try_acquire(&file);
        assert!(lock3.is_ok());
    }
}
