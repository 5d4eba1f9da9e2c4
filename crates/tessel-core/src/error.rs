//! Configuration error type.

use std::path::PathBuf;

use thiserror::Error;

/// Errors detected while loading or validating a [`FabricConfig`](crate::FabricConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The TOML text could not be parsed into the config tree.
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),
    /// The config file could not be read.
    #[error("cannot read config file {path}: {source}")]
    Read {
        /// File that failed to load.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
    /// A value parsed but violates an invariant.
    #[error("invalid [{section}] config: {reason}")]
    Invalid {
        /// Config section holding the bad value.
        section: &'static str,
        /// Which invariant was violated.
        reason: String,
    },
}

impl ConfigError {
    pub(crate) fn invalid(section: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            section,
            reason: reason.into(),
        }
    }
}
