//! Configuration for Muster.
//!
//! Provides TOML-based configuration with:
//! - Store backend selection and the definitions directory
//! - MCP tool server connections
//! - Orchestrator defaults (health checks, timeouts, backoff, recovery)
//! - Config file layering (user config + project-local overrides)

pub mod discovery;
pub mod error;
pub mod types;

pub use discovery::{
    CONFIG_DIR_ENV, ConfigLayer, ConfigSource, LoadedConfig, load_config, load_config_file,
    load_config_with_options, save_config, xdg_config_dir, xdg_config_path,
};
pub use error::{ConfigError, Result};
pub use types::*;
