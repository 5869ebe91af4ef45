use std::fmt;

use sha2::{Digest, Sha256};

/// Environment variable naming the session explicitly.
pub const SESSION_ID_ENV: &str = "OSM_SESSION_ID";

/// Where a resolved session ID came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdSource {
    ExplicitFlag,
    ExplicitEnv,
    Screen,
    Ssh,
    MacosTerminal,
    Random,
}

impl fmt::Display for IdSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ExplicitFlag => "explicit-flag",
            Self::ExplicitEnv => "explicit-env",
            Self::Screen => "screen",
            Self::Ssh => "ssh-env",
            Self::MacosTerminal => "macos-terminal",
            Self::Random => "uuid-fallback",
        })
    }
}

/// A session ID together with the method that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionId {
    pub id: String,
    pub source: IdSource,
}

impl SessionId {
    /// Resolve the session for this terminal from the process environment.
    pub fn resolve(explicit: Option<&str>) -> Self {
        Self::resolve_with(explicit, |name| std::env::var(name).ok())
    }

    /// Resolve using `env` for variable lookups.
    ///
    /// Order: explicit flag, `$OSM_SESSION_ID`, GNU screen (`$STY`), SSH
    /// (`$SSH_CONNECTION`, client port included so parallel connections from
    /// one host differ), macOS Terminal (`$TERM_SESSION_ID`), random UUID.
    /// Terminal-derived IDs are SHA-256 hex digests.
    pub fn resolve_with(explicit: Option<&str>, env: impl Fn(&str) -> Option<String>) -> Self {
        let var = |name: &str| env(name).filter(|v| !v.is_empty());

        if let Some(id) = explicit.filter(|s| !s.is_empty()) {
            return Self::new(id.to_string(), IdSource::ExplicitFlag);
        }
        if let Some(id) = var(SESSION_ID_ENV) {
            return Self::new(id, IdSource::ExplicitEnv);
        }
        if let Some(sty) = var("STY") {
            return Self::new(hash(&format!("screen:{sty}")), IdSource::Screen);
        }
        if let Some(conn) = var("SSH_CONNECTION") {
            let fields: Vec<&str> = conn.split_whitespace().collect();
            let stable = match fields.as_slice() {
                [client, client_port, server, server_port] => {
                    format!("ssh:{client}:{client_port}:{server}:{server_port}")
                },
                _ => format!("ssh:{conn}"),
            };
            return Self::new(hash(&stable), IdSource::Ssh);
        }
        if cfg!(target_os = "macos")
            && let Some(term) = var("TERM_SESSION_ID")
        {
            return Self::new(hash(&format!("terminal:{term}")), IdSource::MacosTerminal);
        }
        Self::new(uuid::Uuid::new_v4().to_string(), IdSource::Random)
    }

    fn new(id: String, source: IdSource) -> Self {
        Self { id, source }
    }
}

fn hash(input: &str) -> String {
    Sha256::digest(input.as_bytes())
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, std::collections::HashMap};

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn explicit_flag_beats_environment() {
        let resolved = SessionId::resolve_with(Some("mine"), env(&[(SESSION_ID_ENV, "env")]));
        assert_eq!(resolved.id, "mine");
        assert_eq!(resolved.source, IdSource::ExplicitFlag);
    }

    #[test]
    fn env_beats_terminal_detection() {
        let resolved = SessionId::resolve_with(None, env(&[(SESSION_ID_ENV, "env"), ("STY", "1.pts")]));
        assert_eq!(resolved.id, "env");
        assert_eq!(resolved.source, IdSource::ExplicitEnv);
    }

    #[test]
    fn ssh_ids_are_stable_and_port_sensitive() {
        let a = SessionId::resolve_with(None, env(&[("SSH_CONNECTION", "1.2.3.4 5000 5.6.7.8 22")]));
        let b = SessionId::resolve_with(None, env(&[("SSH_CONNECTION", "1.2.3.4 5000 5.6.7.8 22")]));
        let c = SessionId::resolve_with(None, env(&[("SSH_CONNECTION", "1.2.3.4 5001 5.6.7.8 22")]));
        assert_eq!(a, b);
        assert_ne!(a.id, c.id);
        assert_eq!(a.source, IdSource::Ssh);
        assert_eq!(a.id.len(), 64);
    }

    #[test]
    fn empty_values_fall_through_to_random() {
        let resolved = SessionId::resolve_with(Some(""), env(&[(SESSION_ID_ENV, "")]));
        assert_eq!(resolved.source, IdSource::Random);
        assert!(uuid::Uuid::parse_str(&resolved.id).is_ok());
    }
}
