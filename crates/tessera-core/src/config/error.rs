//! # Tessera Core Configuration Errors
//!
//! Defines [`ConfigError`], covering I/O failures, (de)serialization
//! failures per format, and unsupported config file formats.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("i/o error during '{operation}' on '{path}': {source}")]
    Io {
        operation: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize config to {format}: {detail}")]
    Serialize { format: &'static str, detail: String },

    #[error("failed to deserialize config from {format}: {detail}")]
    Deserialize { format: &'static str, detail: String },

    #[error("unknown or unsupported config format for path: {path}")]
    UnsupportedFormat { path: PathBuf },
}

impl ConfigError {
    pub(crate) fn io(source: std::io::Error, operation: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        ConfigError::Io {
            operation: operation.into(),
            path: path.into(),
            source,
        }
    }
}
