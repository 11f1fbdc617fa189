use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use semver::Version;

use crate::plugin_system::capability::CapabilitySet;
use crate::plugin_system::manifest::PluginManifest;
use crate::plugin_system::traits::PluginEntry;

/// Lifecycle state of one plugin instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginState {
    /// Admitted to a load plan, not yet initializing
    Created,
    /// `initialize` in flight
    Initializing,
    /// Initialized and accepting dispatch
    Active,
    /// `reload` in flight
    Reloading,
    /// `cleanup` in flight before removal
    Unloading,
    /// A fault or timeout occurred; excluded from dispatch until explicitly
    /// reloaded
    Faulted,
    /// Cleanup ran and the instance handle is released
    Destroyed,
}

impl PluginState {
    /// Terminal states accept no further lifecycle operations this session
    /// (other than an explicit reload for `Faulted`).
    pub fn is_terminal(&self) -> bool {
        matches!(self, PluginState::Faulted | PluginState::Destroyed)
    }

    pub fn is_active(&self) -> bool {
        matches!(self, PluginState::Active)
    }
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PluginState::Created => "created",
            PluginState::Initializing => "initializing",
            PluginState::Active => "active",
            PluginState::Reloading => "reloading",
            PluginState::Unloading => "unloading",
            PluginState::Faulted => "faulted",
            PluginState::Destroyed => "destroyed",
        };
        write!(f, "{}", name)
    }
}

/// The live state of one activated plugin.
///
/// Owned exclusively by the manager's [`InstanceTable`]; collaborators only
/// ever see capability-scoped handles, never the instance itself.
pub struct PluginInstance {
    pub manifest: Arc<PluginManifest>,
    pub entry: Arc<dyn PluginEntry>,
    pub granted: CapabilitySet,
    pub state: PluginState,
    /// Incremented on every reload; stale callbacks from a previous
    /// activation carry the old generation and can be detected
    pub generation: u64,
}

impl PluginInstance {
    pub fn new(
        manifest: Arc<PluginManifest>,
        entry: Arc<dyn PluginEntry>,
        granted: CapabilitySet,
        generation: u64,
    ) -> Self {
        Self {
            manifest,
            entry,
            granted,
            state: PluginState::Created,
            generation,
        }
    }

    pub fn id(&self) -> &str {
        &self.manifest.id
    }

    pub fn version(&self) -> &Version {
        &self.manifest.version
    }
}

impl fmt::Debug for PluginInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginInstance")
            .field("id", &self.manifest.id)
            .field("version", &self.manifest.version)
            .field("state", &self.state)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

/// Single-owner table of live instances, keyed by identifier.
///
/// Only the manager mutates it; sandboxed workers report results back by
/// return value and never touch the table directly.
#[derive(Debug, Default)]
pub struct InstanceTable {
    instances: HashMap<String, PluginInstance>,
}

impl InstanceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an instance. The identifier must not already be present —
    /// uniqueness across the active set is an invariant.
    pub fn insert(&mut self, instance: PluginInstance) -> Result<(), PluginInstance> {
        let id = instance.id().to_string();
        if self.instances.contains_key(&id) {
            return Err(instance);
        }
        self.instances.insert(id, instance);
        Ok(())
    }

    pub fn remove(&mut self, id: &str) -> Option<PluginInstance> {
        self.instances.remove(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.instances.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&PluginInstance> {
        self.instances.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut PluginInstance> {
        self.instances.get_mut(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &PluginInstance)> {
        self.instances.iter()
    }

    /// Identifiers in sorted order.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.instances.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Versions of all instances currently in `Active` state.
    pub fn active_versions(&self) -> std::collections::BTreeMap<String, Version> {
        self.instances
            .iter()
            .filter(|(_, instance)| instance.state.is_active())
            .map(|(id, instance)| (id.clone(), instance.version().clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}
