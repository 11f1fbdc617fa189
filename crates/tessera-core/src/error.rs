//! # Tessera Core Errors
//!
//! Defines [`Error`], the crate-level aggregate over the plugin system and
//! configuration error types, plus the [`Result`] shorthand used at the
//! host-facing surface.

use std::result::Result as StdResult;

use thiserror::Error as ThisError;

use crate::config::ConfigError;
use crate::plugin_system::error::PluginSystemError;
use crate::plugin_system::version::VersionError;

#[derive(Debug, ThisError)]
pub enum Error {
    /// Specific, typed plugin system error
    #[error("plugin system error: {0}")]
    PluginSystem(#[from] PluginSystemError),

    /// Specific, typed configuration error
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Version parsing error
    #[error("version error: {0}")]
    Version(#[from] VersionError),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Other(msg.to_string())
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Other(msg)
    }
}

/// Shorthand for Result with our Error type
pub type Result<T> = StdResult<T, Error>;
