//! Session storage and lifecycle.
//!
//! Each session is an opaque data file plus a lock file in one base
//! directory (`{id}.session.json`, `{id}.session.lock`). Separate processes
//! coordinate only through OS file locks on the lock files: a held lock marks
//! a session active, and active sessions are never deleted or evicted.

pub mod cleaner;
pub mod error;
pub mod id;
pub mod lock;
pub mod paths;
pub mod scanner;
pub mod scheduler;
pub mod store;

pub use {
    cleaner::{Cleaner, CleanupPolicy, CleanupReport, SkipReason, SkippedSession},
    error::{Error, Result},
    id::{IdSource, SessionId},
    lock::{LockGuard, acquire_lock, probe_lock},
    paths::{SessionLayout, sanitize_id},
    scanner::{SessionInfo, scan_sessions},
    scheduler::{CleanupScheduler, start_cleanup_scheduler},
    store::SessionStore,
};

/// Delete one idle session: its data file, then its lock file.
///
/// Once the data file is gone the delete counts as done; a lock file that
/// cannot be removed afterwards is only logged.
///
/// Refuses with [`Error::LockContention`] when the session is held. If the
/// data file cannot be removed, the lock file is left in place.
pub fn delete_session(layout: &SessionLayout, id: &str) -> Result<()> {
    let path = layout.session_file_path(id)?;
    let lock_path = layout.session_lock_file_path(id)?;
    let guard = acquire_lock(&lock_path)?.ok_or_else(|| Error::LockContention {
        id: id.to_string(),
    })?;

    if let Err(e) = std::fs::remove_file(&path) {
        guard.close();
        return Err(Error::io("remove session", path, e));
    }
    if let Err(e) = guard.release() {
        tracing::warn!(session_id = %id, error = %e, "session deleted but lock file remains");
    }
    Ok(())
}
