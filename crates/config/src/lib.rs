//! Configuration loading for osm.
//!
//! Config files: TOML, YAML, or JSON, with `${VAR}` substitution.

pub mod env_subst;
pub mod loader;
pub mod schema;

pub use {
    loader::{
        config_dir, discover_and_load, find_config_file, load_config, load_or_discover,
        user_config_dir,
    },
    schema::{OsmConfig, SessionsConfig},
};
