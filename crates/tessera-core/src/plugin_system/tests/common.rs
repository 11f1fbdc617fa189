#![cfg(test)]
// Shared fixtures for the plugin system tests: a scriptable entry point,
// descriptor builders, and a fully wired manager backed by temp directories.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use semver::Version;
use serde_json::json;
use tempfile::TempDir;

use crate::host::{FacadeLogSink, HostInfo, MemoryCommandSink};
use crate::plugin_system::capability::{ActivationContext, CapabilitySet};
use crate::plugin_system::discovery::CandidateKind;
use crate::plugin_system::manager::{ManagerConfig, PluginManager};
use crate::plugin_system::manifest::{EntryPoint, PluginDependency, PluginManifest};
use crate::plugin_system::sandbox::SandboxConfig;
use crate::plugin_system::traits::{EntryPointRegistry, PluginCallError, PluginEntry};
use crate::plugin_system::version::VersionRange;
use crate::plugin_system::DESCRIPTOR_FILE;

pub type Events = Arc<Mutex<Vec<String>>>;

pub fn new_events() -> Events {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn events_contain(events: &Events, needle: &str) -> bool {
    events.lock().unwrap().iter().any(|event| event == needle)
}

/// What a [`TestEntry`] does when its lifecycle operations run.
#[derive(Debug, Clone, Copy)]
pub enum Behavior {
    Ok,
    FailInit,
    PanicInit,
    SleepInit(Duration),
    /// Succeeds on first activation, fails once the generation is bumped
    FailInitOnReload,
    PanicInvoke,
    FailCleanup,
}

/// Scriptable entry point recording every call it receives.
pub struct TestEntry {
    label: String,
    behavior: Behavior,
    events: Events,
}

impl TestEntry {
    pub fn new(label: &str, behavior: Behavior, events: Events) -> Self {
        Self {
            label: label.to_string(),
            behavior,
            events,
        }
    }

    fn record(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

#[async_trait::async_trait]
impl PluginEntry for TestEntry {
    async fn initialize(&self, ctx: ActivationContext) -> Result<(), PluginCallError> {
        self.record(format!("init:{}:{}", self.label, ctx.generation));
        let caps = if ctx.capabilities.is_empty() { "none" } else { "some" };
        self.record(format!("caps:{}:{}", self.label, caps));
        if let Some(commands) = &ctx.capabilities.commands {
            commands.register("t.echo", "Echo");
        }

        match self.behavior {
            Behavior::FailInit => Err(PluginCallError::Init("refused".to_string())),
            Behavior::PanicInit => panic!("init panicked"),
            Behavior::SleepInit(duration) => {
                tokio::time::sleep(duration).await;
                Ok(())
            }
            Behavior::FailInitOnReload if ctx.generation > 0 => {
                Err(PluginCallError::Init("refused after reload".to_string()))
            }
            _ => Ok(()),
        }
    }

    fn invoke(&self, command_id: &str, args: serde_json::Value) -> Result<serde_json::Value, PluginCallError> {
        self.record(format!("invoke:{}:{}", self.label, command_id));
        match self.behavior {
            Behavior::PanicInvoke => panic!("invoke panicked"),
            _ => Ok(json!({ "plugin": self.label, "echo": args })),
        }
    }

    async fn cleanup(&self) -> Result<(), PluginCallError> {
        self.record(format!("cleanup:{}", self.label));
        match self.behavior {
            Behavior::FailCleanup => Err(PluginCallError::Cleanup("refused".to_string())),
            _ => Ok(()),
        }
    }

    fn manual(&self) -> Option<String> {
        Some(format!("# {}\n", self.label))
    }
}

/// A manager wired against temp directories, an in-memory command sink, and
/// scriptable entry points.
pub struct TestHost {
    pub manager: PluginManager,
    pub commands: Arc<MemoryCommandSink>,
    pub events: Events,
    pub plugin_root: PathBuf,
    pub config_root: PathBuf,
    _plugin_dir: TempDir,
    _config_dir: TempDir,
}

pub fn build_host(entries: &[(&str, Behavior)], sandbox: SandboxConfig, sources: Vec<String>) -> TestHost {
    let plugin_dir = TempDir::new().unwrap();
    let config_dir = TempDir::new().unwrap();
    let events = new_events();

    let mut registry = EntryPointRegistry::new();
    for &(symbol, behavior) in entries {
        let label = symbol.to_string();
        let events = Arc::clone(&events);
        registry.register(symbol, move || {
            Box::new(TestEntry::new(&label, behavior, Arc::clone(&events)))
        });
    }

    let mut config = ManagerConfig::new(plugin_dir.path(), config_dir.path());
    config.sandbox = sandbox;
    config.registry_sources = sources;

    let commands = Arc::new(MemoryCommandSink::new());
    let manager = PluginManager::new(
        HostInfo::new("tessera", "1.2.3").unwrap(),
        config,
        registry,
        commands.clone(),
        Arc::new(FacadeLogSink),
    )
    .unwrap();

    TestHost {
        manager,
        commands,
        events,
        plugin_root: plugin_dir.path().to_path_buf(),
        config_root: config_dir.path().to_path_buf(),
        _plugin_dir: plugin_dir,
        _config_dir: config_dir,
    }
}

pub fn default_host(entries: &[(&str, Behavior)]) -> TestHost {
    build_host(entries, SandboxConfig::default(), Vec::new())
}

/// Minimal valid descriptor with room for extra tables at the end.
pub fn descriptor(id: &str, version: &str, symbol: &str, extra: &str) -> String {
    format!(
        r#"id = "{id}"
version = "{version}"
author = "Test Author"
description = "A test plugin"
permissions = ["commands"]

[entry]
path = "entry.txt"
symbol = "{symbol}"
{extra}"#
    )
}

/// Create a directory-style plugin under the given root.
pub fn write_plugin(root: &Path, dir_name: &str, descriptor: &str) -> PathBuf {
    let dir = root.join(dir_name);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join(DESCRIPTOR_FILE), descriptor).unwrap();
    fs::write(dir.join("entry.txt"), "entry marker").unwrap();
    dir
}

/// Build an in-memory manifest for resolver tests; `deps` pairs are
/// (identifier, version constraint).
pub fn manifest(id: &str, version: &str, deps: &[(&str, &str)]) -> PluginManifest {
    PluginManifest {
        id: id.to_string(),
        name: id.to_string(),
        version: Version::parse(version).unwrap(),
        author: "Test Author".to_string(),
        description: "A test plugin".to_string(),
        category: "other".to_string(),
        tags: Vec::new(),
        permissions: CapabilitySet::new(),
        dependencies: deps
            .iter()
            .map(|(dep_id, constraint)| PluginDependency {
                id: dep_id.to_string(),
                range: VersionRange::from_constraint(constraint).unwrap(),
            })
            .collect(),
        compatibility: Vec::new(),
        entry: EntryPoint {
            path: PathBuf::from("entry.txt"),
            symbol: id.to_string(),
        },
        binary: None,
        enabled: true,
        license: "MIT".to_string(),
        root: PathBuf::from(id),
        kind: CandidateKind::Directory,
    }
}
