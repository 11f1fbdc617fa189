//! # Tessera Core
//!
//! The plugin lifecycle manager of the Tessera terminal host: discovery,
//! manifest validation, dependency resolution, sandboxed activation, command
//! dispatch, and registry-driven install/update/uninstall of third-party
//! plugin packages. The host application talks to exactly one type,
//! [`PluginManager`], and supplies its side of the contract through the
//! collaborator traits in [`host`].

pub mod config;
pub mod error;
pub mod host;
pub mod plugin_system;
pub mod utils;

// Re-export key public types for the binary and plugin crates.
pub use error::{Error, Result};
pub use host::{CommandSink, FacadeLogSink, HostInfo, LogSink, MemoryCommandSink, PluginLogger};
pub use plugin_system::{
    ActivationContext, Capability, CapabilityHandles, EntryPointRegistry, LoadReport, ManagerConfig,
    PluginCallError, PluginEntry, PluginManager, PluginManifest, PluginState, SandboxConfig, UpdateOutcome,
};
