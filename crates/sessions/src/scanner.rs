use std::{
    fs, io,
    path::PathBuf,
    time::SystemTime,
};

use {serde::Serialize, tracing::warn};

use crate::{
    error::{Error, Result},
    lock::probe_lock,
    paths::{SESSION_FILE_SUFFIX, SessionLayout},
};

/// A session discovered on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    /// The file-name slug, which is the ID every other operation accepts.
    pub id: String,
    pub path: PathBuf,
    pub lock_path: PathBuf,
    pub size_bytes: u64,
    /// Data file modification time.
    #[serde(skip)]
    pub updated_at: SystemTime,
    /// Whether a live process holds the session lock.
    pub is_active: bool,
}

/// Enumerate every session data file under the layout's directory, most
/// recently updated first.
///
/// Activity is established with a non-mutating lock probe, so scanning never
/// creates, removes, or holds lock files. A missing directory is an empty
/// store.
pub fn scan_sessions(layout: &SessionLayout) -> Result<Vec<SessionInfo>> {
    let dir = layout.dir();
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(Error::io("read sessions directory", dir, e)),
    };

    let mut out = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| Error::io("read sessions directory", dir, e))?;
        let name = entry.file_name();
        let Some(slug) = name
            .to_str()
            .and_then(|n| n.strip_suffix(SESSION_FILE_SUFFIX))
            .filter(|s| !s.is_empty())
        else {
            continue;
        };

        // The file may vanish between listing and stat when another process
        // deletes it; that is not an error for a scan.
        let meta = match entry.metadata() {
            Ok(meta) if meta.is_file() => meta,
            Ok(_) => continue,
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(Error::io("stat session file", entry.path(), e)),
        };

        let lock_path = layout.lock_path_for_slug(slug);
        let is_active = match probe_lock(&lock_path) {
            Ok(active) => active,
            Err(e) => {
                // Report as active: a session we cannot probe must not be
                // treated as evictable.
                warn!(session_id = slug, error = %e, "lock probe failed");
                true
            },
        };

        out.push(SessionInfo {
            id: slug.to_string(),
            path: entry.path(),
            lock_path,
            size_bytes: meta.len(),
            updated_at: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            is_active,
        });
    }

    out.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
    Ok(out)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::lock::acquire_lock,
        std::{fs::File, time::Duration},
    };

    fn write_session(layout: &SessionLayout, id: &str, bytes: &[u8], age: Duration) {
        let path = layout.session_file_path(id).unwrap();
        fs::write(&path, bytes).unwrap();
        File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(SystemTime::now() - age)
            .unwrap();
    }

    #[test]
    fn empty_and_missing_directories_scan_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(scan_sessions(&SessionLayout::new(dir.path())).unwrap().is_empty());
        assert!(
            scan_sessions(&SessionLayout::new(dir.path().join("missing")))
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn newest_first_with_sizes_and_activity() {
        let dir = tempfile::tempdir().unwrap();
        let layout = SessionLayout::new(dir.path());
        write_session(&layout, "old", b"12345", Duration::from_secs(3600));
        write_session(&layout, "new", b"1", Duration::from_secs(10));
        fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();
        fs::write(layout.cleanup_lock_path(), b"").unwrap();

        let held = acquire_lock(&layout.session_lock_file_path("old").unwrap())
            .unwrap()
            .unwrap();

        let infos = scan_sessions(&layout).unwrap();
        let ids: Vec<_> = infos.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, ["new", "old"]);
        assert_eq!(infos[1].size_bytes, 5);
        assert!(infos[1].is_active);
        assert!(!infos[0].is_active);

        held.release().unwrap();
    }

    #[test]
    fn scanning_touches_no_lock_files() {
        let dir = tempfile::tempdir().unwrap();
        let layout = SessionLayout::new(dir.path());
        write_session(&layout, "a", b"{}", Duration::from_secs(1));

        scan_sessions(&layout).unwrap();
        assert!(!layout.session_lock_file_path("a").unwrap().exists());
    }
}
