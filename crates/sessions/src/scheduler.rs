//! Background cleanup inside a long-lived process.

use std::time::Duration;

use {
    osm_config::SessionsConfig,
    tokio::{sync::Mutex, task::JoinHandle, time::MissedTickBehavior},
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use crate::{
    cleaner::{Cleaner, CleanupPolicy},
    paths::SessionLayout,
};

/// Handle to the cleanup task started by [`start_cleanup_scheduler`].
///
/// Dropping the handle cancels the task without waiting for it; call
/// [`CleanupScheduler::stop`] to wait for an in-flight cycle to finish.
#[derive(Debug)]
pub struct CleanupScheduler {
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Start periodic cleanup of `layout` according to `config`.
///
/// Returns an inert handle when `config` is absent or auto-cleanup is
/// disabled. Otherwise spawns one task on the current Tokio runtime that
/// runs a cycle immediately and then every `cleanup_interval_hours`
/// (start-up only when the interval is not positive). `exclude_id` is never
/// removed, and active sessions are skipped by the cleaner itself.
pub fn start_cleanup_scheduler(
    config: Option<&SessionsConfig>,
    layout: SessionLayout,
    exclude_id: Option<String>,
) -> CleanupScheduler {
    let Some(config) = config.filter(|c| c.auto_cleanup_enabled) else {
        debug!("automatic session cleanup disabled");
        return CleanupScheduler::disabled();
    };
    let cleaner = Cleaner::new(layout, CleanupPolicy::from_config(config));
    CleanupScheduler::spawn(cleaner, exclude_id, config.cleanup_interval())
}

impl CleanupScheduler {
    /// A handle with nothing behind it.
    pub fn disabled() -> Self {
        Self {
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    /// Spawn the cleanup loop. `None` as the interval runs a single cycle.
    pub fn spawn(cleaner: Cleaner, exclude_id: Option<String>, interval: Option<Duration>) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            info!(
                interval_secs = interval.map(|i| i.as_secs()),
                "session cleanup scheduler started"
            );
            if token.is_cancelled() {
                return;
            }
            run_cycle(&cleaner, exclude_id.as_deref()).await;

            if let Some(interval) = interval {
                let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = ticker.tick() => run_cycle(&cleaner, exclude_id.as_deref()).await,
                    }
                }
            } else {
                token.cancelled().await;
            }
            debug!("session cleanup scheduler stopped");
        });

        Self {
            cancel,
            task: Mutex::new(Some(task)),
        }
    }

    /// Whether a task was started and has not been stopped.
    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
            && self
                .task
                .try_lock()
                .map(|t| t.as_ref().is_some_and(|h| !h.is_finished()))
                .unwrap_or(true)
    }

    /// Cancel the task and wait for it to exit.
    ///
    /// Once this returns the scheduler performs no further filesystem work.
    /// Safe to call repeatedly and on a disabled handle.
    pub async fn stop(&self) {
        self.cancel.cancel();
        // Hold the slot across the join so concurrent callers wait for it too.
        let mut slot = self.task.lock().await;
        if let Some(task) = slot.take()
            && let Err(e) = task.await
        {
            warn!(error = %e, "session cleanup task ended abnormally");
        }
    }
}

impl Drop for CleanupScheduler {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// One cleanup pass on the blocking pool. Errors are logged, never returned.
///
/// The `select!` in the loop only races cancellation against the tick, so a
/// cycle that has started always runs to completion before `stop` returns.
async fn run_cycle(cleaner: &Cleaner, exclude_id: Option<&str>) {
    let cleaner = cleaner.clone();
    let exclude_id = exclude_id.map(str::to_owned);
    let result =
        tokio::task::spawn_blocking(move || cleaner.execute_cleanup(exclude_id.as_deref())).await;
    match result {
        Ok(Ok(report)) => {
            if !report.removed.is_empty() || !report.orphaned_locks.is_empty() {
                info!(
                    removed = report.removed.len(),
                    skipped = report.skipped.len(),
                    orphaned_locks = report.orphaned_locks.len(),
                    "session cleanup cycle"
                );
            } else {
                debug!(skipped = report.skipped.len(), "session cleanup cycle, nothing removed");
            }
        },
        Ok(Err(e)) if e.is_lock_contention() => {
            debug!("another cleaner is running, skipping cycle");
        },
        Ok(Err(e)) => warn!(error = %e, "session cleanup failed"),
        Err(e) => warn!(error = %e, "session cleanup task panicked"),
    }
}
