//! Lock-holding read/write access to one session's data file.

use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use {tempfile::NamedTempFile, tracing::debug};

use crate::{
    error::{Error, Result},
    lock::{LockGuard, acquire_lock},
    paths::{SessionLayout, TEMP_FILE_PREFIX, sanitize_id},
};

/// Exclusive handle on a session, held for as long as the store is open.
///
/// The data file is an opaque blob. Writes replace it atomically, so other
/// processes reading without the lock see either the old or the new content.
#[derive(Debug)]
pub struct SessionStore {
    id: String,
    path: PathBuf,
    lock: LockGuard,
}

impl SessionStore {
    /// Take the session lock, creating the sessions directory if needed.
    ///
    /// Fails with [`Error::LockContention`] when another process has the
    /// session open.
    pub fn open(layout: &SessionLayout, id: &str) -> Result<Self> {
        let slug = sanitize_id(id)?;
        fs::create_dir_all(layout.dir())
            .map_err(|e| Error::io("create sessions directory", layout.dir(), e))?;

        let lock_path = layout.session_lock_file_path(&slug)?;
        let lock = acquire_lock(&lock_path)?.ok_or_else(|| Error::LockContention { id: slug.clone() })?;
        debug!(session_id = %slug, "session opened");
        Ok(Self {
            path: layout.session_file_path(&slug)?,
            id: slug,
            lock,
        })
    }

    /// The sanitized session ID.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the blob, or `None` if nothing was saved yet.
    pub fn load(&self) -> Result<Option<Vec<u8>>> {
        match fs::read(&self.path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::io("read session", &self.path, e)),
        }
    }

    /// Replace the blob via a synced temp file renamed over the data file.
    pub fn save(&self, data: &[u8]) -> Result<()> {
        let dir = self.path.parent().unwrap_or(Path::new("."));
        let mut tmp = tempfile::Builder::new()
            .prefix(TEMP_FILE_PREFIX)
            .tempfile_in(dir)
            .map_err(|e| Error::io("create temp file", dir, e))?;
        write_synced(&mut tmp, data).map_err(|e| Error::io("write temp file", tmp.path(), e))?;
        tmp.persist(&self.path)
            .map_err(|e| Error::io("replace session", &self.path, e.error))?;
        debug!(session_id = %self.id, bytes = data.len(), "session saved");
        Ok(())
    }

    /// Release the lock and remove the lock file.
    pub fn close(self) -> Result<()> {
        debug!(session_id = %self.id, "session closed");
        self.lock.release()
    }
}

fn write_synced(tmp: &mut NamedTempFile, data: &[u8]) -> io::Result<()> {
    tmp.write_all(data)?;
    tmp.as_file().sync_all()
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, crate::lock::probe_lock};

    #[test]
    fn open_save_load_close() {
        let dir = tempfile::tempdir().unwrap();
        let layout = SessionLayout::new(dir.path().join("sessions"));

        let store = SessionStore::open(&layout, "a/b").unwrap();
        assert_eq!(store.id(), "a_b");
        assert_eq!(store.load().unwrap(), None);

        store.save(b"one").unwrap();
        store.save(b"two").unwrap();
        assert_eq!(store.load().unwrap().as_deref(), Some(&b"two"[..]));

        let lock_path = layout.session_lock_file_path("a_b").unwrap();
        assert!(probe_lock(&lock_path).unwrap());

        store.close().unwrap();
        assert!(!lock_path.exists());
        assert!(layout.session_file_path("a_b").unwrap().exists());

        // No temp files left behind.
        let stray = fs::read_dir(layout.dir())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(TEMP_FILE_PREFIX))
            .count();
        assert_eq!(stray, 0);
    }

    #[test]
    fn second_open_is_contention() {
        let dir = tempfile::tempdir().unwrap();
        let layout = SessionLayout::new(dir.path());

        let first = SessionStore::open(&layout, "abc").unwrap();
        let err = SessionStore::open(&layout, "abc").unwrap_err();
        assert!(err.is_lock_contention());

        first.close().unwrap();
        SessionStore::open(&layout, "abc").unwrap().close().unwrap();
    }

    #[test]
    fn dropping_without_close_unlocks_but_keeps_lock_file() {
        let dir = tempfile::tempdir().unwrap();
        let layout = SessionLayout::new(dir.path());
        drop(SessionStore::open(&layout, "abc").unwrap());

        let lock_path = layout.session_lock_file_path("abc").unwrap();
        assert!(lock_path.exists());
        assert!(!probe_lock(&lock_path).unwrap());
    }

    #[test]
    fn invalid_id_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let layout = SessionLayout::new(dir.path());
        assert!(matches!(
            SessionStore::open(&layout, ".."),
            Err(Error::InvalidId { .. })
        ));
    }
}
