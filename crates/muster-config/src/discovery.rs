//! Locating and layering config files.
//!
//! Layers, lowest precedence first:
//! 1. `<config dir>/config.toml`. The config dir is `MUSTER_CONFIG_DIR` or
//!    the platform default (`~/.config/muster` on Linux).
//! 2. `muster.toml` in the project directory (the working directory unless given).
//!
//! Command-line flags are applied by the binary on top of the result.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::{ConfigError, MusterConfig, Result};

const PROJECT_CONFIG_FILE: &str = "muster.toml";
const USER_CONFIG_FILE: &str = "config.toml";
const APP_NAME: &str = "muster";

/// Overrides the user config directory.
pub const CONFIG_DIR_ENV: &str = "MUSTER_CONFIG_DIR";

/// The layer a config file belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigLayer {
    User,
    Project,
}

impl fmt::Display for ConfigLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Project => write!(f, "project"),
        }
    }
}

/// One file that was looked for.
#[derive(Debug, Clone)]
pub struct ConfigSource {
    pub layer: ConfigLayer,
    pub path: PathBuf,
    /// Found, parsed and merged.
    pub loaded: bool,
}

/// The merged configuration and how it was assembled.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: MusterConfig,
    /// The user config directory in effect. Relative defaults (definitions,
    /// logs) hang off this directory.
    pub config_dir: PathBuf,
    /// Every candidate file, lowest precedence first.
    pub sources: Vec<ConfigSource>,
    /// Layers that were skipped because they did not parse.
    pub warnings: Vec<String>,
}

impl LoadedConfig {
    /// Paths of the files that were merged.
    pub fn loaded_from(&self) -> Vec<&Path> {
        self.sources
            .iter()
            .filter(|s| s.loaded)
            .map(|s| s.path.as_path())
            .collect()
    }

    pub fn source(&self, layer: ConfigLayer) -> Option<&ConfigSource> {
        self.sources.iter().find(|s| s.layer == layer)
    }
}

/// Discover, merge and validate both layers.
pub fn load_config(project_dir: Option<&Path>) -> Result<LoadedConfig> {
    load_config_with_options(project_dir, None)
}

/// Like [`load_config`], with `config_dir` taking precedence over
/// `MUSTER_CONFIG_DIR` and the platform default.
///
/// A layer that fails to parse is skipped with a warning. The merged result
/// must pass [`MusterConfig::validate`].
pub fn load_config_with_options(project_dir: Option<&Path>, config_dir: Option<&Path>) -> Result<LoadedConfig> {
    let config_dir = config_dir
        .map(Path::to_path_buf)
        .or_else(xdg_config_dir)
        .unwrap_or_else(|| PathBuf::from(".muster"));
    let project_dir = project_dir.map(Path::to_path_buf).unwrap_or_default();

    let candidates = [
        (ConfigLayer::User, config_dir.join(USER_CONFIG_FILE)),
        (ConfigLayer::Project, project_dir.join(PROJECT_CONFIG_FILE)),
    ];

    let mut loaded = LoadedConfig {
        config: MusterConfig::new(),
        config_dir,
        sources: Vec::with_capacity(candidates.len()),
        warnings: Vec::new(),
    };
    for (layer, path) in candidates {
        let merged = match read_layer(&path) {
            Ok(Some(layer_config)) => {
                loaded.config.merge(layer_config);
                true
            }
            Ok(None) => false,
            Err(e) => {
                loaded.warnings.push(format!("{} config skipped: {}", layer, e));
                false
            }
        };
        loaded.sources.push(ConfigSource {
            layer,
            path,
            loaded: merged,
        });
    }

    loaded.config.validate()?;
    Ok(loaded)
}

/// `None` when the file does not exist.
fn read_layer(path: &Path) -> Result<Option<MusterConfig>> {
    if !path.is_file() {
        return Ok(None);
    }
    load_config_file(path).map(Some)
}

/// Parse a single file without discovery or validation.
pub fn load_config_file(path: &Path) -> Result<MusterConfig> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    MusterConfig::from_toml(&text)
}

/// Write `config` to `path`, creating parent directories.
pub fn save_config(config: &MusterConfig, path: &Path) -> Result<()> {
    let write_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| ConfigError::Write { path, source }
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(write_err(parent))?;
    }
    std::fs::write(path, config.to_toml()?).map_err(write_err(path))
}

/// `<config dir>/config.toml`.
pub fn xdg_config_path() -> Option<PathBuf> {
    xdg_config_dir().map(|d| d.join(USER_CONFIG_FILE))
}

/// `MUSTER_CONFIG_DIR` when set and non-empty, else `<platform config dir>/muster`.
pub fn xdg_config_dir() -> Option<PathBuf> {
    match std::env::var_os(CONFIG_DIR_ENV) {
        Some(dir) if !dir.is_empty() => Some(PathBuf::from(dir)),
        _ => dirs::config_dir().map(|d| d.join(APP_NAME)),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_config_file_not_found() {
        let err = load_config_file(Path::new("/nonexistent/config.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_load_config_invalid_toml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "this is not valid toml {{{{").unwrap();

        let err = load_config_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_config_no_files() {
        let project = TempDir::new().unwrap();
        let config_dir = TempDir::new().unwrap();
        let loaded = load_config_with_options(Some(project.path()), Some(config_dir.path())).unwrap();
        assert!(loaded.config.store.is_none());
        assert!(loaded.loaded_from().is_empty());
        assert_eq!(loaded.config_dir, config_dir.path());
    }

    #[test]
    fn test_layered_merge() {
        let config_dir = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();
        fs::write(
            config_dir.path().join("config.toml"),
            "[logging]\nlevel = \"debug\"\n\n[orchestrator]\nfailure_threshold = 9\n",
        )
        .unwrap();
        fs::write(
            project.path().join("muster.toml"),
            "[orchestrator]\nfailure_threshold = 2\n",
        )
        .unwrap();

        let loaded = load_config_with_options(Some(project.path()), Some(config_dir.path())).unwrap();
        assert_eq!(loaded.config.orchestrator().failure_threshold, 2);
        assert_eq!(loaded.config.logging().level, "debug");
        assert_eq!(loaded.loaded_from().len(), 2);
    }

    #[test]
    fn test_malformed_layer_warns_but_continues() {
        let config_dir = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();
        fs::write(project.path().join("muster.toml"), "not valid toml {{{{").unwrap();

        let loaded = load_config_with_options(Some(project.path()), Some(config_dir.path())).unwrap();
        assert_eq!(loaded.warnings.len(), 1);
        assert!(loaded.warnings[0].starts_with("project config skipped"));
        assert!(!loaded.source(ConfigLayer::Project).unwrap().loaded);
    }

    #[test]
    fn test_invalid_merged_config_is_rejected() {
        let config_dir = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();
        fs::write(
            config_dir.path().join("config.toml"),
            "[[mcp.servers]]\nname = \"remote\"\ntransport = \"http\"\n",
        )
        .unwrap();

        let err = load_config_with_options(Some(project.path()), Some(config_dir.path())).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { section: "mcp.servers", .. }));
        assert!(err.to_string().contains("'remote'"));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/config.toml");
        let mut config = MusterConfig::new();
        config.workflow = Some(crate::WorkflowConfig {
            persist_incremental: true,
        });
        save_config(&config, &path).unwrap();
        assert!(load_config_file(&path).unwrap().workflow().persist_incremental);
    }

    #[test]
    #[serial]
    fn test_env_overrides_config_dir() {
        let dir = TempDir::new().unwrap();
        // SAFETY: serialised with other env-mutating tests
        unsafe { std::env::set_var(CONFIG_DIR_ENV, dir.path()) };
        assert_eq!(xdg_config_dir(), Some(dir.path().to_path_buf()));
        assert_eq!(xdg_config_path(), Some(dir.path().join("config.toml")));
        unsafe { std::env::remove_var(CONFIG_DIR_ENV) };
    }

    #[test]
    #[serial]
    fn test_default_dir_ends_with_app_name() {
        unsafe { std::env::remove_var(CONFIG_DIR_ENV) };
        if let Some(p) = xdg_config_dir() {
            assert!(p.ends_with("muster"));
        }
    }
}
