use std::{io, path::PathBuf};

/// Errors surfaced by the session storage subsystem.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The session ID cannot be turned into a safe file name.
    #[error("invalid session id {id:?}: {reason}")]
    InvalidId { id: String, reason: &'static str },

    /// Another process holds the lock this operation needs.
    #[error("session {id} appears active or locked")]
    LockContention { id: String },

    #[error("{op} {}: {source}", .path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The base directory or another setting could not be resolved.
    #[error("configuration error: {0}")]
    Config(String),

    /// Some IDs of a multi-ID operation failed; all were attempted.
    #[error("failed to delete: {}", format_failures(.0))]
    PartialFailure(Vec<(String, String)>),

    #[error("session {id}: {source}")]
    Serialization {
        id: String,
        #[source]
        source: serde_json::Error,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub(crate) fn io(op: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            op,
            path: path.into(),
            source,
        }
    }

    pub fn is_lock_contention(&self) -> bool {
        matches!(self, Self::LockContention { .. })
    }
}

fn format_failures(failures: &[(String, String)]) -> String {
    failures
        .iter()
        .map(|(id, msg)| format!("{id}: {msg}"))
        .collect::<Vec<_>>()
        .join("; ")
}
