//! Configuration errors.

use thiserror::Error;

/// Result type for `kloros-config` operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors raised while loading or validating operator configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file could not be read from disk.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path that failed to read.
        path: String,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// TOML parsing failed.
    #[error("failed to parse {path} as TOML: {source}")]
    Parse {
        /// Path that failed to parse.
        path: String,
        /// Underlying parse error.
        #[source]
        source: toml::de::Error,
    },

    /// An environment variable override had an unparseable value.
    #[error("invalid value for environment override {key}: {value}")]
    BadEnvOverride {
        /// The `KLOROS_*` variable name.
        key: String,
        /// The offending value.
        value: String,
    },

    /// The loaded configuration violates an operator-facing policy invariant.
    #[error("operator policy violation: {0}")]
    OperatorPolicyError(String),
}
