//! # Plugin Capabilities
//!
//! A plugin declares the capabilities it wants in its manifest; the host
//! approves a set of its own. A plugin is *granted* the intersection, and at
//! activation it receives exactly one handle per granted capability — a
//! capability that was not granted is simply never injected, so plugin code
//! has no object through which to reach the withheld functionality.
//!
//! The filesystem handle is rooted at the plugin's own `resources/`
//! directory; plugins never receive raw host paths.

use std::collections::BTreeSet;
use std::fmt;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use crate::config::PluginConfigScope;
use crate::host::{CommandSink, PluginLogger};

/// One privileged capability a plugin may be granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Capability {
    /// Outbound HTTP access through the host's client
    Network,
    /// Access to the plugin's own `resources/` directory
    Filesystem,
    /// Running the plugin's declared binary artifact
    Process,
    /// Registering commands with the host
    Commands,
    /// Reading and writing the plugin's scoped configuration
    Config,
}

impl Capability {
    /// Parse a manifest permission tag.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "network" => Some(Capability::Network),
            "filesystem" => Some(Capability::Filesystem),
            "process" => Some(Capability::Process),
            "commands" => Some(Capability::Commands),
            "config" => Some(Capability::Config),
            _ => None,
        }
    }

    /// The manifest tag for this capability.
    pub fn tag(&self) -> &'static str {
        match self {
            Capability::Network => "network",
            Capability::Filesystem => "filesystem",
            Capability::Process => "process",
            Capability::Commands => "commands",
            Capability::Config => "config",
        }
    }

    /// Every capability the host can approve.
    pub fn all() -> CapabilitySet {
        [
            Capability::Network,
            Capability::Filesystem,
            Capability::Process,
            Capability::Commands,
            Capability::Config,
        ]
        .into_iter()
        .collect()
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}

/// Ordered set of capabilities.
pub type CapabilitySet = BTreeSet<Capability>;

/// The granted set: declared ∩ host-approved.
pub fn granted(declared: &CapabilitySet, approved: &CapabilitySet) -> CapabilitySet {
    declared.intersection(approved).copied().collect()
}

/// Handle for registering commands with the host, bound to one plugin id.
#[derive(Clone)]
pub struct CommandsHandle {
    plugin_id: String,
    sink: Arc<dyn CommandSink>,
}

impl CommandsHandle {
    pub(crate) fn new(plugin_id: &str, sink: Arc<dyn CommandSink>) -> Self {
        Self {
            plugin_id: plugin_id.to_string(),
            sink,
        }
    }

    /// Register a command under this plugin's identifier.
    pub fn register(&self, command_id: &str, display_name: &str) {
        self.sink.register_command(&self.plugin_id, command_id, display_name);
    }
}

impl fmt::Debug for CommandsHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandsHandle")
            .field("plugin_id", &self.plugin_id)
            .finish_non_exhaustive()
    }
}

/// Filesystem handle confined to the plugin's `resources/` directory.
///
/// Relative paths only; any path escaping the root is rejected with
/// `PermissionDenied` before touching the filesystem.
#[derive(Debug, Clone)]
pub struct ResourcesHandle {
    root: PathBuf,
}

impl ResourcesHandle {
    pub(crate) fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// The confined root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Read a file relative to the resources root.
    pub fn read(&self, relative: &str) -> io::Result<Vec<u8>> {
        std::fs::read(self.resolve(relative)?)
    }

    /// Write a file relative to the resources root, creating parent
    /// directories as needed.
    pub fn write(&self, relative: &str, contents: &[u8]) -> io::Result<()> {
        let path = self.resolve(relative)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, contents)
    }

    fn resolve(&self, relative: &str) -> io::Result<PathBuf> {
        let rel = Path::new(relative);
        let escapes = rel.is_absolute()
            || rel
                .components()
                .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_) | Component::RootDir));
        if escapes {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("path '{}' escapes the plugin resources directory", relative),
            ));
        }
        Ok(self.root.join(rel))
    }
}

/// Outbound network handle backed by the host's shared HTTP client.
#[derive(Clone)]
pub struct NetworkHandle {
    client: reqwest::Client,
}

impl NetworkHandle {
    pub(crate) fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Fetch the body of a URL. The client carries the host's request timeout.
    pub async fn get(&self, url: &str) -> reqwest::Result<Vec<u8>> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }
}

impl fmt::Debug for NetworkHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkHandle").finish_non_exhaustive()
    }
}

/// Handle for running the plugin's declared binary artifact.
///
/// The program path and arguments come from the manifest's `[binary]` table;
/// plugin code cannot point this at anything else.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessHandle {
    pub(crate) fn new(program: PathBuf, args: Vec<String>) -> Self {
        Self { program, args }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Run the declared binary to completion, with optional extra arguments
    /// appended after the declared ones.
    pub async fn run(&self, extra_args: &[String]) -> io::Result<std::process::Output> {
        tokio::process::Command::new(&self.program)
            .args(&self.args)
            .args(extra_args)
            .output()
            .await
    }
}

/// The bundle of capability handles injected at activation.
///
/// Every field is `None` unless the matching capability was granted.
#[derive(Debug, Clone, Default)]
pub struct CapabilityHandles {
    pub commands: Option<CommandsHandle>,
    pub config: Option<PluginConfigScope>,
    pub resources: Option<ResourcesHandle>,
    pub network: Option<NetworkHandle>,
    pub process: Option<ProcessHandle>,
}

impl CapabilityHandles {
    /// True when no capability handle at all was injected.
    pub fn is_empty(&self) -> bool {
        self.commands.is_none()
            && self.config.is_none()
            && self.resources.is_none()
            && self.network.is_none()
            && self.process.is_none()
    }
}

/// Everything a plugin receives when its `initialize` runs: its identity,
/// the generation counter for this activation, a tagged logger, and the
/// granted capability handles.
#[derive(Debug, Clone)]
pub struct ActivationContext {
    pub plugin_id: String,
    pub generation: u64,
    pub log: PluginLogger,
    pub capabilities: CapabilityHandles,
}
