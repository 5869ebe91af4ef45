//! Cross-process, non-blocking exclusive session locks.
//!
//! A lock is an OS advisory lock (`flock` on Unix, `LockFileEx` on Windows)
//! taken on a lock file that is opened or created in one call. The OS drops
//! the lock when the owning process exits, so a lock file left behind by a
//! crashed process never keeps a session busy: existence of the file means
//! nothing, only the lock does.

use std::{
    fs::{File, OpenOptions},
    io,
    path::{Path, PathBuf},
};

use {fs4::fs_std::FileExt, tracing::debug};

use crate::error::{Error, Result};

/// How often to retry when a releaser unlinked the file we just locked.
const UNLINK_RACE_RETRIES: usize = 3;

/// An acquired session lock.
///
/// Dropping the guard (or calling [`LockGuard::close`]) unlocks and closes the
/// descriptor but leaves the lock file on disk. [`LockGuard::release`] also
/// removes the lock file.
#[derive(Debug)]
pub struct LockGuard {
    file: File,
    path: PathBuf,
}

/// Try once to take the exclusive lock at `path`, creating the file if needed.
///
/// Returns `Ok(None)` when another holder owns the lock; nothing is left open
/// in that case.
pub fn acquire_lock(path: &Path) -> Result<Option<LockGuard>> {
    for _ in 0..UNLINK_RACE_RETRIES {
        let file = open_lock_file(path, true)
            .map_err(|e| Error::io("open lock file", path, e))?
            .ok_or_else(|| Error::io("open lock file", path, io::ErrorKind::NotFound.into()))?;

        if !try_lock(&file).map_err(|e| Error::io("lock", path, e))? {
            return Ok(None);
        }

        // A releaser may have unlinked the file between our open and lock.
        // Holding a lock on an unlinked inode would let a second process lock
        // a freshly created file at the same path, so start over.
        if still_linked(&file, path) {
            debug!(path = %path.display(), "lock acquired");
            return Ok(Some(LockGuard {
                file,
                path: path.to_path_buf(),
            }));
        }
        debug!(path = %path.display(), "lock file replaced while locking, retrying");
    }
    Ok(None)
}

/// Report whether some process currently holds the lock at `path`.
///
/// The probe never creates, removes, or modifies files: a missing lock file
/// means nobody holds the lock, and a successful test lock is dropped at once.
pub fn probe_lock(path: &Path) -> Result<bool> {
    let Some(file) = open_lock_file(path, false).map_err(|e| Error::io("open lock file", path, e))?
    else {
        return Ok(false);
    };
    let acquired = try_lock(&file).map_err(|e| Error::io("lock", path, e))?;
    if acquired {
        let _ = FileExt::unlock(&file);
    }
    Ok(!acquired)
}

impl LockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the lock file, then unlock.
    ///
    /// The file is unlinked while still locked so that a concurrent acquirer
    /// either fails on the held lock or notices the unlink and retries.
    pub fn release(self) -> Result<()> {
        let removed = match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::io("remove lock file", &self.path, e)),
        };
        debug!(path = %self.path.display(), "lock released");
        drop(self);
        removed
    }

    /// Unlock and close, keeping the lock file in place.
    pub fn close(self) {
        drop(self);
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

fn open_lock_file(path: &Path, create: bool) -> io::Result<Option<File>> {
    let mut opts = OpenOptions::new();
    opts.read(true).write(true).create(create);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o600);
    }
    match opts.open(path) {
        Ok(file) => Ok(Some(file)),
        Err(e) if !create && e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

fn try_lock(file: &File) -> io::Result<bool> {
    FileExt::try_lock_exclusive(file)
}

#[cfg(unix)]
fn still_linked(file: &File, path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;

    match (file.metadata(), std::fs::metadata(path)) {
        (Ok(held), Ok(named)) => held.dev() == named.dev() && held.ino() == named.ino(),
        _ => false,
    }
}

#[cfg(not(unix))]
fn still_linked(_file: &File, path: &Path) -> bool {
    path.exists()
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        std::sync::{Arc, Barrier},
    };

    #[test]
    fn second_acquire_is_refused_until_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.session.lock");

        let guard = acquire_lock(&path).unwrap().expect("first acquire");
        assert!(acquire_lock(&path).unwrap().is_none());
        assert!(probe_lock(&path).unwrap());

        guard.release().unwrap();
        assert!(!path.exists());
        assert!(!probe_lock(&path).unwrap());

        let again = acquire_lock(&path).unwrap().expect("reacquire");
        again.release().unwrap();
    }

    #[test]
    fn close_keeps_the_lock_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.session.lock");

        acquire_lock(&path).unwrap().unwrap().close();
        assert!(path.exists());
        assert!(!probe_lock(&path).unwrap());

        // A leftover file is not a held lock.
        let guard = acquire_lock(&path).unwrap().expect("stale file is acquirable");
        guard.release().unwrap();
    }

    #[test]
    fn probe_does_not_create_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.session.lock");
        assert!(!probe_lock(&path).unwrap());
        assert!(!path.exists());
    }

    #[test]
    fn probe_leaves_lock_acquirable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.session.lock");
        std::fs::write(&path, b"").unwrap();

        assert!(!probe_lock(&path).unwrap());
        let guard = acquire_lock(&path).unwrap().expect("probe must not keep the lock");
        guard.close();
    }

    #[test]
    fn racing_acquirers_have_exactly_one_winner() {
        let dir = tempfile::tempdir().unwrap();
        let path = Arc::new(dir.path().join("race.session.lock"));
        let threads = 8;
        let barrier = Arc::new(Barrier::new(threads));

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let path = Arc::clone(&path);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    acquire_lock(&path).unwrap()
                })
            })
            .collect();

        // Keep winners alive until every thread has tried.
        let guards: Vec<LockGuard> = handles
            .into_iter()
            .filter_map(|h| h.join().unwrap())
            .collect();
        assert_eq!(guards.len(), 1);
        for guard in guards {
            guard.release().unwrap();
        }
    }

    #[test]
    fn missing_parent_directory_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope").join("s.session.lock");
        assert!(matches!(acquire_lock(&path), Err(Error::Io { .. })));
    }
}
