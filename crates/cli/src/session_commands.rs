use std::{
    cmp::Reverse,
    fs,
    io::{self, BufRead, Write},
    path::Path,
    time::SystemTime,
};

use {
    anyhow::{Context, Result},
    clap::{Subcommand, ValueEnum},
    serde::{Deserialize, Serialize},
    time::{OffsetDateTime, format_description::well_known::Rfc3339},
    tokio::io::{AsyncBufRead, AsyncBufReadExt},
    tracing::{debug, info, warn},
};

use {
    osm_config::SessionsConfig,
    osm_sessions::{
        Cleaner, CleanupPolicy, Error, SessionId, SessionInfo, SessionLayout, SessionStore,
        scan_sessions, start_cleanup_scheduler,
    },
};

/// Everything a session command needs besides its arguments.
pub struct SessionContext {
    pub layout: SessionLayout,
    pub config: SessionsConfig,
}

#[derive(Subcommand)]
pub enum SessionAction {
    /// Show all existing sessions with metadata.
    List {
        #[arg(long, value_enum, default_value_t = ListFormat::Text)]
        format: ListFormat,
        #[arg(long, value_enum, default_value_t = ListSort::Default)]
        sort: ListSort,
    },
    /// Remove sessions according to the configured retention policy.
    Clean {
        /// Show what would be removed without touching anything.
        #[arg(long)]
        dry_run: bool,
        /// Assume yes to the confirmation prompt.
        #[arg(short = 'y', long = "yes")]
        yes: bool,
    },
    /// Remove every idle session, ignoring retention limits.
    Purge {
        #[arg(long)]
        dry_run: bool,
        #[arg(short = 'y', long = "yes")]
        yes: bool,
    },
    /// Delete specific sessions. Active sessions are refused.
    Delete {
        #[arg(required = true)]
        ids: Vec<String>,
        #[arg(long)]
        dry_run: bool,
        #[arg(short = 'y', long = "yes")]
        yes: bool,
    },
    /// Print the raw data of a session.
    Info { id: String },
    /// Print the sessions directory, or the data file of one session.
    Path { id: Option<String> },
    /// Print the session ID this terminal resolves to.
    Id {
        /// Use this session ID instead of auto-discovery.
        #[arg(long)]
        session: Option<String>,
    },
    /// Hold a session open and append stdin lines to its history.
    Attach {
        #[arg(long)]
        session: Option<String>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ListFormat {
    Text,
    Json,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ListSort {
    /// Newest first.
    Default,
    /// Active sessions first, then newest first.
    Active,
}

pub async fn handle_session(action: SessionAction, ctx: &SessionContext) -> Result<()> {
    let mut out = io::stdout().lock();
    match action {
        SessionAction::List { format, sort } => list(ctx, format, sort, &mut out),
        SessionAction::Clean { dry_run, yes } => {
            run_cleanup(ctx, false, dry_run, yes, &mut io::stdin().lock(), &mut out)
        },
        SessionAction::Purge { dry_run, yes } => {
            run_cleanup(ctx, true, dry_run, yes, &mut io::stdin().lock(), &mut out)
        },
        SessionAction::Delete { ids, dry_run, yes } => {
            delete(ctx, &ids, dry_run, yes, &mut io::stdin().lock(), &mut out)
        },
        SessionAction::Info { id } => show_info(ctx, &id, &mut out),
        SessionAction::Path { id } => show_path(ctx, id.as_deref(), &mut out),
        SessionAction::Id { session } => show_id(session.as_deref(), &mut out),
        SessionAction::Attach { session } => {
            let input = tokio::io::BufReader::new(tokio::io::stdin());
            attach(ctx, session.as_deref(), input, &mut out).await
        },
    }
}

// ── Prompts ─────────────────────────────────────────────────────────────────

/// Ask a y/N question. End of input counts as "no".
fn confirm(input: &mut impl BufRead, out: &mut impl Write, question: &str) -> Result<bool> {
    write!(out, "{question} (y/N): ")?;
    out.flush()?;
    let mut answer = String::new();
    input
        .read_line(&mut answer)
        .context("failed to read confirmation")?;
    let answer = answer.trim();
    Ok(answer.eq_ignore_ascii_case("y") || answer.eq_ignore_ascii_case("yes"))
}

fn rfc3339(t: SystemTime) -> Result<String> {
    Ok(OffsetDateTime::from(t).format(&Rfc3339)?)
}

// ── list ────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct SessionView<'a> {
    id: &'a str,
    path: &'a Path,
    lock_path: &'a Path,
    size_bytes: u64,
    updated_at: String,
    is_active: bool,
}

fn list(ctx: &SessionContext, format: ListFormat, sort: ListSort, out: &mut impl Write) -> Result<()> {
    let mut sessions = scan_sessions(&ctx.layout)?;
    if sort == ListSort::Active {
        sessions.sort_by(|a, b| {
            (!a.is_active, Reverse(a.updated_at), &a.id).cmp(&(!b.is_active, Reverse(b.updated_at), &b.id))
        });
    }

    match format {
        ListFormat::Json => {
            let views = sessions
                .iter()
                .map(|s| {
                    Ok(SessionView {
                        id: &s.id,
                        path: &s.path,
                        lock_path: &s.lock_path,
                        size_bytes: s.size_bytes,
                        updated_at: rfc3339(s.updated_at)?,
                        is_active: s.is_active,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            serde_json::to_writer_pretty(&mut *out, &views)?;
            writeln!(out)?;
        },
        ListFormat::Text => {
            if sessions.is_empty() {
                writeln!(out, "No sessions found")?;
            }
            for s in &sessions {
                write_line(out, s)?;
            }
        },
    }
    Ok(())
}

fn write_line(out: &mut impl Write, s: &SessionInfo) -> Result<()> {
    writeln!(
        out,
        "{}\t{}\t{} bytes\t{}",
        s.id,
        rfc3339(s.updated_at)?,
        s.size_bytes,
        if s.is_active {
            "active"
        } else {
            "idle"
        }
    )?;
    Ok(())
}

// ── clean / purge ───────────────────────────────────────────────────────────

fn run_cleanup(
    ctx: &SessionContext,
    purge: bool,
    dry_run: bool,
    yes: bool,
    input: &mut impl BufRead,
    out: &mut impl Write,
) -> Result<()> {
    if !dry_run && !yes {
        let question = if purge {
            "This will permanently purge sessions (ignoring retention). Proceed?"
        } else {
            "This will permanently remove sessions according to your configured policies. Proceed?"
        };
        if !confirm(input, out, question)? {
            writeln!(out, "aborted")?;
            return Ok(());
        }
    }

    let policy = CleanupPolicy::from_config(&ctx.config)
        .with_dry_run(dry_run)
        .with_purge(purge);
    let report = match Cleaner::new(ctx.layout.clone(), policy).execute_cleanup(None) {
        Ok(report) => report,
        Err(e) if e.is_lock_contention() => anyhow::bail!("another session cleanup is already running"),
        Err(e) => return Err(e.into()),
    };
    info!(
        removed = report.removed.len(),
        skipped = report.skipped.len(),
        dry_run,
        purge,
        "session cleanup finished"
    );

    if dry_run {
        let verb = if purge {
            "purged"
        } else {
            "removed"
        };
        writeln!(out, "Dry-run: the following would be {verb}:")?;
        for id in &report.removed {
            writeln!(out, "{id}")?;
        }
    } else {
        for id in &report.removed {
            writeln!(out, "removed: {id}")?;
        }
        for skipped in &report.skipped {
            writeln!(out, "skipped: {} ({})", skipped.id, skipped.reason)?;
        }
    }
    for id in &report.orphaned_locks {
        writeln!(out, "orphaned lock: {id}")?;
    }
    Ok(())
}

// ── delete ──────────────────────────────────────────────────────────────────

fn delete(
    ctx: &SessionContext,
    ids: &[String],
    dry_run: bool,
    yes: bool,
    input: &mut impl BufRead,
    out: &mut impl Write,
) -> Result<()> {
    let Some(first) = ids.first() else {
        anyhow::bail!("delete requires a session id");
    };
    if !dry_run && !yes {
        let question = if ids.len() > 1 {
            format!(
                "Are you sure you want to delete {} sessions? This is irreversible.",
                ids.len()
            )
        } else {
            format!("Are you sure you want to delete session '{first}'? This is irreversible.")
        };
        if !confirm(input, out, &question)? {
            writeln!(out, "aborted")?;
            return Ok(());
        }
    }

    let mut failed = Vec::new();
    for id in ids {
        if dry_run {
            ctx.layout.session_file_path(id)?;
            writeln!(out, "Dry-run: would delete session {id}")?;
            continue;
        }
        match osm_sessions::delete_session(&ctx.layout, id) {
            Ok(()) => writeln!(out, "deleted {id}")?,
            Err(e) => {
                warn!(session_id = %id, error = %e, "failed to delete session");
                failed.push((id.clone(), e.to_string()));
            },
        }
    }
    if !failed.is_empty() {
        return Err(Error::PartialFailure(failed).into());
    }
    Ok(())
}

// ── info / path / id ────────────────────────────────────────────────────────

fn show_info(ctx: &SessionContext, id: &str, out: &mut impl Write) -> Result<()> {
    let path = ctx.layout.session_file_path(id)?;
    let data = fs::read(&path).with_context(|| format!("failed to read {}", path.display()))?;
    out.write_all(&data)?;
    writeln!(out)?;
    Ok(())
}

fn show_path(ctx: &SessionContext, id: Option<&str>, out: &mut impl Write) -> Result<()> {
    match id {
        Some(id) => writeln!(out, "{}", ctx.layout.session_file_path(id)?.display())?,
        None => writeln!(out, "{}", ctx.layout.dir().display())?,
    }
    Ok(())
}

fn show_id(session: Option<&str>, out: &mut impl Write) -> Result<()> {
    let resolved = SessionId::resolve(session);
    writeln!(out, "{}\t{}", resolved.id, resolved.source)?;
    Ok(())
}

// ── attach ──────────────────────────────────────────────────────────────────

/// Persisted history blob written by `attach`.
#[derive(Debug, Serialize, Deserialize)]
struct SessionState {
    id: String,
    created_at: String,
    updated_at: String,
    #[serde(default)]
    history: Vec<HistoryEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct HistoryEntry {
    timestamp: String,
    command: String,
}

async fn attach<R>(
    ctx: &SessionContext,
    session: Option<&str>,
    input: R,
    out: &mut impl Write,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let resolved = SessionId::resolve(session);
    let store = SessionStore::open(&ctx.layout, &resolved.id)?;
    let mut state = match load_state(&store) {
        Ok(state) => state,
        Err(e) => {
            if let Err(close_err) = store.close() {
                warn!(error = %close_err, "failed to close session");
            }
            return Err(e);
        },
    };
    debug!(session_id = %store.id(), source = %resolved.source, entries = state.history.len(), "attached");

    let scheduler =
        start_cleanup_scheduler(Some(&ctx.config), ctx.layout.clone(), Some(store.id().to_string()));
    writeln!(out, "attached to session {} ({})", store.id(), resolved.source)?;
    out.flush()?;

    let result = append_lines(&store, &mut state, input).await;

    scheduler.stop().await;
    let entries = state.history.len();
    store.close()?;
    result?;
    writeln!(out, "saved {entries} history entries")?;
    Ok(())
}

/// The saved history, or a fresh one if nothing was saved yet.
fn load_state(store: &SessionStore) -> Result<SessionState> {
    match store.load()? {
        Some(data) => Ok(serde_json::from_slice(&data).map_err(|source| Error::Serialization {
            id: store.id().to_string(),
            source,
        })?),
        None => {
            let now = rfc3339(SystemTime::now())?;
            Ok(SessionState {
                id: store.id().to_string(),
                created_at: now.clone(),
                updated_at: now,
                history: Vec::new(),
            })
        },
    }
}

async fn append_lines<R>(store: &SessionStore, state: &mut SessionState, input: R) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await.context("failed to read input")? {
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }
        let now = rfc3339(SystemTime::now())?;
        state.history.push(HistoryEntry {
            timestamp: now.clone(),
            command: line.to_string(),
        });
        state.updated_at = now;
        store.save(&serde_json::to_vec_pretty(state)?)?;
    }
    Ok(())
}
