use std::path::{Path, PathBuf};

use {
    anyhow::Context,
    tracing::{debug, warn},
};

use crate::{env_subst::substitute_env, schema::OsmConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &["osm.toml", "osm.yaml", "osm.yml", "osm.json"];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<OsmConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path).with_context(|| format!("failed to parse {}", path.display()))
}

/// Load config from `explicit` when given, otherwise from standard locations.
///
/// An explicit path must exist and parse. A discovered file that fails to
/// parse is logged and defaults are used instead.
pub fn load_or_discover(explicit: Option<&Path>) -> anyhow::Result<OsmConfig> {
    match explicit {
        Some(path) => {
            debug!(path = %path.display(), "loading explicit config");
            load_config(path)
        },
        None => Ok(discover_and_load()),
    }
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./osm.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/osm/osm.{toml,yaml,yml,json}` (user-global)
///
/// Returns `OsmConfig::default()` if no usable config file is found.
pub fn discover_and_load() -> OsmConfig {
    let Some(path) = find_config_file() else {
        debug!("no config file found, using defaults");
        return OsmConfig::default();
    };
    debug!(path = %path.display(), "loading config");
    match load_config(&path) {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!(path = %path.display(), error = %format!("{e:#}"), "failed to load config, using defaults");
            OsmConfig::default()
        },
    }
}

/// Find the first config file in standard locations.
pub fn find_config_file() -> Option<PathBuf> {
    find_in(Path::new(".")).or_else(|| config_dir().and_then(|dir| find_in(&dir)))
}

fn find_in(dir: &Path) -> Option<PathBuf> {
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.is_file())
}

/// Returns the osm config directory: `~/.config/osm/` on all platforms.
pub fn config_dir() -> Option<PathBuf> {
    home_dir().map(|h| h.join(".config").join("osm"))
}

/// Returns the platform user config directory (`$XDG_CONFIG_HOME`,
/// `~/Library/Application Support`, `%APPDATA%`).
pub fn user_config_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf())
}

fn home_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf())
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<OsmConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}
