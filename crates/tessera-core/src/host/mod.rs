//! # Tessera Host Collaborators
//!
//! The plugin manager never talks to the host application directly; the host
//! hands it a small set of collaborator interfaces at construction time.
//! This module defines those seams: the identity of the running host
//! ([`HostInfo`]), the command-registration sink plugins publish commands
//! through ([`CommandSink`]), and the leveled, plugin-tagged logging sink
//! ([`LogSink`]).
//!
//! The per-plugin configuration accessor lives in [`crate::config::scoped`].

use std::fmt;
use std::sync::{Arc, Mutex};

use crate::plugin_system::version::{HostVersion, VersionError};

/// Identity of the running host application, as seen by the plugin system.
#[derive(Debug, Clone)]
pub struct HostInfo {
    /// Host name matched against manifest `[compatibility]` entries
    pub name: String,
    /// Running host version
    pub version: HostVersion,
}

impl HostInfo {
    /// Create a host identity from a name and a `major.minor.patch` string.
    pub fn new(name: &str, version: &str) -> Result<Self, VersionError> {
        Ok(Self {
            name: name.to_string(),
            version: HostVersion::parse(version)?,
        })
    }
}

impl fmt::Display for HostInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} v{}", self.name, self.version)
    }
}

/// Command-registration sink supplied by the host.
///
/// Plugins granted the `commands` capability publish their commands through
/// this sink during activation; the manager tears the registrations down
/// again when the plugin is unloaded or faults.
pub trait CommandSink: Send + Sync {
    /// Register a command under the given plugin.
    fn register_command(&self, plugin_id: &str, command_id: &str, display_name: &str);

    /// Remove every command the given plugin registered.
    fn unregister_plugin(&self, plugin_id: &str);
}

/// Leveled logging sink accepting messages tagged with the originating plugin.
pub trait LogSink: Send + Sync {
    fn log(&self, plugin_id: &str, level: log::Level, message: &str);
}

/// Default [`LogSink`] forwarding to the `log` facade, with the plugin
/// identifier as the log target.
#[derive(Debug, Default, Clone)]
pub struct FacadeLogSink;

impl LogSink for FacadeLogSink {
    fn log(&self, plugin_id: &str, level: log::Level, message: &str) {
        log::log!(target: plugin_id, level, "{}", message);
    }
}

/// In-memory [`CommandSink`] keeping registrations in a table.
///
/// Used by the CLI host (which renders the table on `list`) and by tests.
#[derive(Debug, Default)]
pub struct MemoryCommandSink {
    commands: Mutex<Vec<RegisteredCommand>>,
}

/// One command registration as recorded by [`MemoryCommandSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredCommand {
    pub plugin_id: String,
    pub command_id: String,
    pub display_name: String,
}

impl MemoryCommandSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the current registrations.
    pub fn snapshot(&self) -> Vec<RegisteredCommand> {
        self.commands.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

impl CommandSink for MemoryCommandSink {
    fn register_command(&self, plugin_id: &str, command_id: &str, display_name: &str) {
        if let Ok(mut commands) = self.commands.lock() {
            commands.push(RegisteredCommand {
                plugin_id: plugin_id.to_string(),
                command_id: command_id.to_string(),
                display_name: display_name.to_string(),
            });
        }
    }

    fn unregister_plugin(&self, plugin_id: &str) {
        if let Ok(mut commands) = self.commands.lock() {
            commands.retain(|c| c.plugin_id != plugin_id);
        }
    }
}

/// Logger handed to every plugin at activation, tagging messages with the
/// plugin identifier before forwarding them to the host's [`LogSink`].
#[derive(Clone)]
pub struct PluginLogger {
    plugin_id: String,
    sink: Arc<dyn LogSink>,
}

impl PluginLogger {
    pub fn new(plugin_id: &str, sink: Arc<dyn LogSink>) -> Self {
        Self {
            plugin_id: plugin_id.to_string(),
            sink,
        }
    }

    pub fn debug(&self, message: &str) {
        self.sink.log(&self.plugin_id, log::Level::Debug, message);
    }

    pub fn info(&self, message: &str) {
        self.sink.log(&self.plugin_id, log::Level::Info, message);
    }

    pub fn warn(&self, message: &str) {
        self.sink.log(&self.plugin_id, log::Level::Warn, message);
    }

    pub fn error(&self, message: &str) {
        self.sink.log(&self.plugin_id, log::Level::Error, message);
    }
}

impl fmt::Debug for PluginLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginLogger")
            .field("plugin_id", &self.plugin_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests;
