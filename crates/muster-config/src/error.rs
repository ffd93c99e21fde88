//! Errors raised while reading, writing or checking configuration.

use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("malformed config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("cannot render config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Parsed fine but cannot work at runtime.
    #[error("[{section}] {reason}")]
    Invalid { section: &'static str, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(section: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            section,
            reason: reason.into(),
        }
    }
}
