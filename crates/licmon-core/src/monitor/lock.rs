//! Host-wide exclusive lock guarding the poller.
//!
//! Uses `flock(LOCK_EX | LOCK_NB)` on a well-known file. The kernel drops
//! the lock when the holder exits, so a crashed poller never blocks a new
//! one. The file itself is left in place on release; removing it would let a
//! second process lock a fresh inode while a third still holds the old one.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use thiserror::Error;
use tracing::debug;

/// Errors from taking the poller lock
#[derive(Debug, Error)]
pub enum LockError {
    /// Another poller holds the lock
    #[error("poller lock {path:?} is held by another process (pid {})", fmt_holder(.holder))]
    Contended { path: PathBuf, holder: Option<u32> },

    /// The lock file could not be opened or written
    #[error("poller lock {path:?} unusable: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn fmt_holder(holder: &Option<u32>) -> String {
    holder
        .map(|pid| pid.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

impl LockError {
    /// Contention is the expected outcome for a duplicate launch
    pub fn is_contention(&self) -> bool {
        matches!(self, LockError::Contended { .. })
    }
}

/// Held poller lock; released when dropped
pub struct SingletonLock {
    file: Flock<File>,
    path: PathBuf,
}

impl std::fmt::Debug for SingletonLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingletonLock")
            .field("path", &self.path)
            .finish()
    }
}

impl SingletonLock {
    /// Try once to take the lock without blocking
    pub fn try_acquire(path: &Path) -> Result<Self, LockError> {
        let io_err = |source: std::io::Error| LockError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(io_err)?;

        let mut file = match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(locked) => locked,
            Err((file, errno)) if errno == Errno::EWOULDBLOCK => {
                return Err(LockError::Contended {
                    path: path.to_path_buf(),
                    holder: read_holder(&file),
                });
            }
            Err((_, errno)) => return Err(io_err(std::io::Error::from(errno))),
        };

        // Record our pid for operators and for contention messages
        file.set_len(0).map_err(io_err)?;
        file.seek(SeekFrom::Start(0)).map_err(io_err)?;
        write!(file, "{}", std::process::id()).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;

        debug!("Acquired poller lock {:?}", path);
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Lock file location
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release explicitly (dropping has the same effect)
    pub fn release(self) {
        debug!("Releasing poller lock {:?}", self.path);
        drop(self.file);
    }
}

fn read_holder(mut file: &File) -> Option<u32> {
    let mut content = String::new();
    file.read_to_string(&mut content).ok()?;
    content.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_is_contended() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("poller.lock");

        let held = SingletonLock::try_acquire(&path).unwrap();
        let err = SingletonLock::try_acquire(&path).unwrap_err();
        assert!(err.is_contention());
        match err {
            LockError::Contended { holder, .. } => {
                assert_eq!(holder, Some(std::process::id()));
            }
            other => panic!("unexpected error: {}", other),
        }
        drop(held);
    }

    #[test]
    fn test_release_makes_lock_reclaimable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run").join("poller.lock");

        let first = SingletonLock::try_acquire(&path).unwrap();
        first.release();
        let second = SingletonLock::try_acquire(&path).unwrap();
        assert_eq!(second.path(), path.as_path());

        // File stays behind after release
        drop(second);
        assert!(path.exists());
    }

    #[test]
    fn test_lock_file_holds_pid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("poller.lock");
        fs::write(&path, "999999999 stale content").unwrap();

        let _held = SingletonLock::try_acquire(&path).unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            std::process::id().to_string()
        );
    }

    #[test]
    fn test_unwritable_location_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, "").unwrap();

        let err = SingletonLock::try_acquire(&blocker.join("poller.lock")).unwrap_err();
        assert!(!err.is_contention());
    }
}
