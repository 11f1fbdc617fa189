//! # Tessera Core Plugin System Errors
//!
//! Defines [`PluginSystemError`], the primary enum encompassing errors that
//! can surface from plugin operations: manifest parsing, dependency
//! resolution, contained runtime faults, registry operations, and manager
//! bookkeeping failures. The per-stage error types ([`ManifestError`],
//! [`ResolutionError`], [`PluginFault`], [`RegistryError`]) live in their
//! component modules and convert into this enum at the manager surface.

use std::path::PathBuf;

use crate::config::ConfigError;
use crate::plugin_system::manifest::ManifestError;
use crate::plugin_system::registry::RegistryError;
use crate::plugin_system::resolver::ResolutionError;
use crate::plugin_system::sandbox::PluginFault;
use crate::plugin_system::version::VersionError;

#[derive(Debug, thiserror::Error)]
pub enum PluginSystemError {
    #[error("manifest error: {0}")]
    Manifest(#[from] ManifestError),

    #[error("resolution failed for '{plugin_id}': {source}")]
    Resolution {
        plugin_id: String,
        #[source]
        source: ResolutionError,
    },

    #[error(transparent)]
    Fault(#[from] PluginFault),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("version parsing error: {0}")]
    Version(#[from] VersionError),

    #[error("plugin '{0}' is not active")]
    PluginNotActive(String),

    #[error("plugin '{0}' is not loaded")]
    PluginNotFound(String),

    #[error("plugin '{0}' is already loaded")]
    AlreadyLoaded(String),

    #[error("no plugin installed under identifier '{0}'")]
    NotInstalled(String),

    #[error("no entry point registered for symbol '{symbol}' (plugin '{plugin_id}')")]
    UnknownEntryPoint { plugin_id: String, symbol: String },

    #[error("i/o error during '{operation}' on '{path}': {source}")]
    Io {
        operation: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PluginSystemError {
    pub(crate) fn io(source: std::io::Error, operation: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        PluginSystemError::Io {
            operation: operation.into(),
            path: path.into(),
            source,
        }
    }
}
