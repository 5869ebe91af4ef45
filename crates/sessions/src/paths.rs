//! Deterministic mapping from session IDs to on-disk paths.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Suffix of session data files.
pub const SESSION_FILE_SUFFIX: &str = ".session.json";
/// Suffix of session lock files.
pub const LOCK_FILE_SUFFIX: &str = ".session.lock";
/// Name of the lock serialising concurrent cleaners.
pub const CLEANUP_LOCK_NAME: &str = ".cleanup.lock";
/// Prefix of temporary files written by [`crate::store::SessionStore::save`].
pub const TEMP_FILE_PREFIX: &str = ".tmp-session-";
/// Environment variable overriding the sessions directory.
pub const SESSIONS_DIR_ENV: &str = "OSM_SESSIONS_DIR";

const MAX_SLUG_BYTES: usize = 200;

/// A base directory holding one data file and one lock file per session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionLayout {
    dir: PathBuf,
}

impl SessionLayout {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Resolve the sessions directory.
    ///
    /// Precedence: `explicit` (the `--sessions-dir` flag), then
    /// `$OSM_SESSIONS_DIR`, then `configured` (`sessions.dir`), then
    /// `{user config dir}/one-shot-man/sessions`.
    pub fn resolve(explicit: Option<&Path>, configured: Option<&Path>) -> Result<Self> {
        if let Some(dir) = explicit {
            return Ok(Self::new(dir));
        }
        if let Some(dir) = std::env::var_os(SESSIONS_DIR_ENV).filter(|v| !v.is_empty()) {
            return Ok(Self::new(dir));
        }
        if let Some(dir) = configured {
            return Ok(Self::new(dir));
        }
        osm_config::user_config_dir()
            .map(|d| Self::new(d.join("one-shot-man").join("sessions")))
            .ok_or_else(|| Error::Config("cannot determine the user config directory".into()))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the data file for `id`.
    pub fn session_file_path(&self, id: &str) -> Result<PathBuf> {
        let slug = sanitize_id(id)?;
        Ok(self.dir.join(format!("{slug}{SESSION_FILE_SUFFIX}")))
    }

    /// Path of the lock file for `id`.
    pub fn session_lock_file_path(&self, id: &str) -> Result<PathBuf> {
        let slug = sanitize_id(id)?;
        Ok(self.dir.join(format!("{slug}{LOCK_FILE_SUFFIX}")))
    }

    pub fn cleanup_lock_path(&self) -> PathBuf {
        self.dir.join(CLEANUP_LOCK_NAME)
    }

    /// Lock path belonging to a data-file slug found on disk.
    pub(crate) fn lock_path_for_slug(&self, slug: &str) -> PathBuf {
        self.dir.join(format!("{slug}{LOCK_FILE_SUFFIX}"))
    }

    pub(crate) fn session_path_for_slug(&self, slug: &str) -> PathBuf {
        self.dir.join(format!("{slug}{SESSION_FILE_SUFFIX}"))
    }
}

/// Turn an arbitrary session ID into a file-name-safe slug.
///
/// Separators and characters unsafe on common filesystems become `_`, runs of
/// `_` collapse, trailing dots and spaces are trimmed, and reserved Windows
/// device names gain a `_` prefix. IDs that cannot yield a safe name are
/// rejected rather than mapped onto some other session.
pub fn sanitize_id(id: &str) -> Result<String> {
    let invalid = |reason| Error::InvalidId {
        id: id.to_string(),
        reason,
    };
    if id.trim().is_empty() {
        return Err(invalid("empty"));
    }

    let mut slug = String::with_capacity(id.len());
    for ch in id.chars() {
        let ch = if is_unsafe(ch) { '_' } else { ch };
        if ch == '_' && slug.ends_with('_') {
            continue;
        }
        slug.push(ch);
    }
    let slug = slug.trim_end_matches([' ', '.']);

    if slug.is_empty() || slug == "." || slug == ".." {
        return Err(invalid("does not contain a usable file name"));
    }
    if slug.len() > MAX_SLUG_BYTES {
        return Err(invalid("too long"));
    }
    if slug.starts_with(TEMP_FILE_PREFIX) {
        return Err(invalid("collides with temporary file names"));
    }
    if is_reserved_device_name(slug) {
        return Ok(format!("_{slug}"));
    }
    Ok(slug.to_string())
}

fn is_unsafe(ch: char) -> bool {
    matches!(ch, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|') || ch.is_control()
}

/// `CON`, `PRN`, `AUX`, `NUL`, `COM1`-`COM9`, `LPT1`-`LPT9`, with or without
/// an extension, compared case-insensitively.
fn is_reserved_device_name(slug: &str) -> bool {
    let stem = slug.split('.').next().unwrap_or(slug).to_ascii_uppercase();
    match stem.as_str() {
        "CON" | "PRN" | "AUX" | "NUL" => true,
        s if s.len() == 4 && (s.starts_with("COM") || s.starts_with("LPT")) => {
            matches!(s.as_bytes()[3], b'1'..=b'9')
        },
        _ => false,
    }
}
