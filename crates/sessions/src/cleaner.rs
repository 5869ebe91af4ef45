//! Retention-policy eviction of idle sessions.

use std::{
    collections::HashSet,
    fmt, fs, io,
    path::Path,
    time::{Duration, SystemTime},
};

use {
    osm_config::SessionsConfig,
    tracing::{debug, info, warn},
};

use crate::{
    error::{Error, Result},
    lock::{acquire_lock, probe_lock},
    paths::{LOCK_FILE_SUFFIX, SESSION_FILE_SUFFIX, SessionLayout, TEMP_FILE_PREFIX, sanitize_id},
    scanner::{SessionInfo, scan_sessions},
};

const SECS_PER_DAY: u64 = 24 * 60 * 60;
const BYTES_PER_MB: u64 = 1024 * 1024;

/// Lock files younger than this are never treated as orphans: their creator
/// may not have written the data file yet.
pub const DEFAULT_MIN_ORPHAN_AGE: Duration = Duration::from_secs(5);

/// Retention limits. Zero or negative values disable a rule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupPolicy {
    pub max_age_days: i64,
    pub max_count: i64,
    pub max_size_mb: i64,
    /// Select without touching the filesystem.
    pub dry_run: bool,
    /// Ignore the limits and select every idle, non-excluded session.
    pub purge: bool,
}

impl CleanupPolicy {
    pub fn from_config(config: &SessionsConfig) -> Self {
        Self {
            max_age_days: config.max_age_days,
            max_count: config.max_count,
            max_size_mb: config.max_size_mb,
            dry_run: false,
            purge: false,
        }
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_purge(mut self, purge: bool) -> Self {
        self.purge = purge;
        self
    }
}

/// Why a selected session was left in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Its lock was taken between scan and removal.
    Locked,
    /// Removing the data file failed; its lock file was kept.
    RemoveFailed(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Locked => f.write_str("active or locked"),
            Self::RemoveFailed(e) => write!(f, "remove failed: {e}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedSession {
    pub id: String,
    pub reason: SkipReason,
}

/// Outcome of one cleanup run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Removed sessions, oldest first. On a dry run, the would-be removals.
    pub removed: Vec<String>,
    pub skipped: Vec<SkippedSession>,
    /// Lock files without a data file that were (or would be) deleted.
    pub orphaned_locks: Vec<String>,
}

/// Applies a [`CleanupPolicy`] to the sessions of one [`SessionLayout`].
#[derive(Debug, Clone)]
pub struct Cleaner {
    layout: SessionLayout,
    policy: CleanupPolicy,
    min_orphan_age: Duration,
}

impl Cleaner {
    pub fn new(layout: SessionLayout, policy: CleanupPolicy) -> Self {
        Self {
            layout,
            policy,
            min_orphan_age: DEFAULT_MIN_ORPHAN_AGE,
        }
    }

    pub fn with_min_orphan_age(mut self, age: Duration) -> Self {
        self.min_orphan_age = age;
        self
    }

    /// Run one cleanup pass, never touching `exclude_id` or active sessions.
    ///
    /// A real run holds the directory-wide cleanup lock for its duration and
    /// fails with [`Error::LockContention`] if another cleaner has it. A dry
    /// run takes no locks and leaves the filesystem unchanged.
    pub fn execute_cleanup(&self, exclude_id: Option<&str>) -> Result<CleanupReport> {
        let dir = self.layout.dir();
        if !dir.exists() {
            return Ok(CleanupReport::default());
        }

        let _cleanup_lock = if self.policy.dry_run {
            None
        } else {
            let path = self.layout.cleanup_lock_path();
            match acquire_lock(&path)? {
                Some(guard) => Some(guard),
                None => {
                    return Err(Error::LockContention {
                        id: "cleanup".into(),
                    });
                },
            }
        };

        // Excluded IDs are compared in slug form, as the scanner reports them.
        let exclude = exclude_id.and_then(|id| sanitize_id(id).ok());
        let sessions = scan_sessions(&self.layout)?;
        let selected = self.select(&sessions, exclude.as_deref(), SystemTime::now());

        let mut report = CleanupReport::default();
        for session in selected {
            if self.policy.dry_run {
                report.removed.push(session.id.clone());
                continue;
            }
            match remove_session(session) {
                None => {
                    info!(session_id = %session.id, "removed session");
                    report.removed.push(session.id.clone());
                },
                Some(reason) => {
                    warn!(session_id = %session.id, %reason, "skipped session");
                    report.skipped.push(SkippedSession {
                        id: session.id.clone(),
                        reason,
                    });
                },
            }
        }

        self.sweep_orphans(&mut report)?;
        debug!(
            removed = report.removed.len(),
            skipped = report.skipped.len(),
            orphaned_locks = report.orphaned_locks.len(),
            dry_run = self.policy.dry_run,
            "cleanup finished"
        );
        Ok(report)
    }

    /// Pick the sessions to evict, oldest first.
    ///
    /// Rules run in a fixed order: age, then count, then size, each seeing
    /// only the candidates earlier rules left unmarked.
    fn select<'a>(
        &self,
        sessions: &'a [SessionInfo],
        exclude: Option<&str>,
        now: SystemTime,
    ) -> Vec<&'a SessionInfo> {
        let (mut candidates, pinned): (Vec<&SessionInfo>, Vec<&SessionInfo>) = sessions
            .iter()
            .partition(|s| !s.is_active && Some(s.id.as_str()) != exclude);
        // Oldest first; ties broken by ID for a stable order.
        candidates.sort_by(|a, b| a.updated_at.cmp(&b.updated_at).then_with(|| a.id.cmp(&b.id)));

        let mut marked: HashSet<&str> = HashSet::new();
        let p = &self.policy;

        if p.purge {
            marked.extend(candidates.iter().map(|s| s.id.as_str()));
        }

        if p.max_age_days > 0 {
            let max_age = Duration::from_secs((p.max_age_days as u64).saturating_mul(SECS_PER_DAY));
            if let Some(cutoff) = now.checked_sub(max_age) {
                marked.extend(
                    candidates
                        .iter()
                        .filter(|s| s.updated_at < cutoff)
                        .map(|s| s.id.as_str()),
                );
            }
        }

        if p.max_count > 0 {
            let remaining: Vec<&&SessionInfo> = candidates
                .iter()
                .filter(|s| !marked.contains(s.id.as_str()))
                .collect();
            let excess = remaining.len().saturating_sub(p.max_count as usize);
            marked.extend(remaining.iter().take(excess).map(|s| s.id.as_str()));
        }

        if p.max_size_mb > 0 {
            let cap = (p.max_size_mb as u64).saturating_mul(BYTES_PER_MB);
            // Pinned sessions cannot be evicted but still occupy the budget.
            let mut total: u64 = pinned.iter().map(|s| s.size_bytes).sum::<u64>()
                + candidates
                    .iter()
                    .filter(|s| !marked.contains(s.id.as_str()))
                    .map(|s| s.size_bytes)
                    .sum::<u64>();
            for s in &candidates {
                if total <= cap {
                    break;
                }
                if marked.insert(s.id.as_str()) {
                    total -= s.size_bytes;
                }
            }
        }

        candidates
            .into_iter()
            .filter(|s| marked.contains(s.id.as_str()))
            .collect()
    }

    /// Delete lock files whose session is gone, and stale temp files.
    fn sweep_orphans(&self, report: &mut CleanupReport) -> Result<()> {
        let dir = self.layout.dir();
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(Error::io("read sessions directory", dir, e)),
        };

        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let path = entry.path();

            if name.starts_with(TEMP_FILE_PREFIX)
                && !name.ends_with(SESSION_FILE_SUFFIX)
                && !name.ends_with(LOCK_FILE_SUFFIX)
            {
                if !self.policy.dry_run && self.is_old_enough(&path) {
                    match fs::remove_file(&path) {
                        Ok(()) => debug!(path = %path.display(), "removed stale temp file"),
                        Err(e) => warn!(path = %path.display(), error = %e, "failed to remove temp file"),
                    }
                }
                continue;
            }

            let Some(slug) = name.strip_suffix(LOCK_FILE_SUFFIX).filter(|s| !s.is_empty()) else {
                continue;
            };
            if self.layout.session_path_for_slug(slug).exists() || !self.is_old_enough(&path) {
                continue;
            }
            if self.policy.dry_run {
                // Report only what a real run could take.
                if matches!(probe_lock(&path), Ok(false)) {
                    report.orphaned_locks.push(slug.to_string());
                }
                continue;
            }
            // Only a lock we can take is an orphan; a held one belongs to a
            // process that has not written its session yet.
            if let Ok(Some(guard)) = acquire_lock(&path) {
                // Re-check under the lock: the holder may have just saved.
                if self.layout.session_path_for_slug(slug).exists() {
                    guard.close();
                    continue;
                }
                match guard.release() {
                    Ok(()) => {
                        debug!(session_id = slug, "removed orphaned lock");
                        report.orphaned_locks.push(slug.to_string());
                    },
                    Err(e) => warn!(session_id = slug, error = %e, "failed to remove orphaned lock"),
                }
            }
        }
        Ok(())
    }

    fn is_old_enough(&self, path: &Path) -> bool {
        fs::metadata(path)
            .and_then(|m| m.modified())
            .map(|mtime| mtime.elapsed().unwrap_or_default())
            .is_ok_and(|age| age >= self.min_orphan_age)
    }
}

/// Remove one session under its lock. `Some(_)` means it was skipped.
fn remove_session(session: &SessionInfo) -> Option<SkipReason> {
    let guard = match acquire_lock(&session.lock_path) {
        Ok(Some(guard)) => guard,
        Ok(None) => return Some(SkipReason::Locked),
        Err(e) => return Some(SkipReason::RemoveFailed(e.to_string())),
    };
    match fs::remove_file(&session.path) {
        Ok(()) => {},
        Err(e) if e.kind() == io::ErrorKind::NotFound => {},
        Err(e) => {
            // Keep the lock file so the surviving data file is not left
            // looking unowned.
            guard.close();
            return Some(SkipReason::RemoveFailed(e.to_string()));
        },
    }
    if let Err(e) = guard.release() {
        warn!(session_id = %session.id, error = %e, "session removed but lock file remains");
    }
    None
}
