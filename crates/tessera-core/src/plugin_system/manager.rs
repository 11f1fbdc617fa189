//! # Plugin Manager
//!
//! The orchestrator owning the full plugin lifecycle. It is the sole
//! interface the host uses: discovery, activation, dispatch, reload/unload,
//! and registry-driven install/update/uninstall all go through
//! [`PluginManager`]. The instance table is mutated only here — sandboxed
//! workers report results back by return value and never touch shared state.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use semver::Version;
use tokio::task::JoinSet;
use tokio_stream::StreamExt;

use crate::config::{ConfigFormat, PluginConfigScope};
use crate::host::{CommandSink, HostInfo, LogSink, PluginLogger};
use crate::plugin_system::capability::{
    self, ActivationContext, Capability, CapabilityHandles, CapabilitySet, CommandsHandle, NetworkHandle,
    ProcessHandle, ResourcesHandle,
};
use crate::plugin_system::discovery::{self, CandidateKind, DiscoveryScanner};
use crate::plugin_system::error::PluginSystemError;
use crate::plugin_system::instance::{InstanceTable, PluginInstance, PluginState};
use crate::plugin_system::manifest::{self, ManifestError, PluginManifest};
use crate::plugin_system::registry::RegistryClient;
use crate::plugin_system::resolver::{self, ResolutionError};
use crate::plugin_system::sandbox::{FaultKind, PluginFault, Sandbox, SandboxConfig, SandboxOp};
use crate::plugin_system::traits::{EntryPointRegistry, PluginEntry};
use crate::plugin_system::SINGLE_FILE_EXTENSION;
use crate::utils::fs::remove_tree;

/// Construction-time settings for the manager, supplied by the host.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Directory scanned for plugins; created if missing
    pub plugin_root: PathBuf,
    /// Directory holding per-plugin config files
    pub config_root: PathBuf,
    /// Wall-clock budgets for sandboxed lifecycle calls
    pub sandbox: SandboxConfig,
    /// Registry sources consulted for bare identifiers, in order
    pub registry_sources: Vec<String>,
    /// Timeout applied to every registry network request
    pub network_timeout: Duration,
    /// Capabilities the host is willing to grant
    pub approved_capabilities: CapabilitySet,
}

impl ManagerConfig {
    pub fn new(plugin_root: impl Into<PathBuf>, config_root: impl Into<PathBuf>) -> Self {
        Self {
            plugin_root: plugin_root.into(),
            config_root: config_root.into(),
            sandbox: SandboxConfig::default(),
            registry_sources: Vec::new(),
            network_timeout: Duration::from_secs(30),
            approved_capabilities: Capability::all(),
        }
    }
}

/// Aggregate outcome of one `discover_and_load_all` pass. Partial success is
/// the norm: one broken plugin never prevents the rest from loading.
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Identifiers that reached `Active`, in activation order
    pub activated: Vec<String>,
    /// Identifiers skipped because they are disabled
    pub skipped_disabled: Vec<String>,
    /// Parse-time failures, keyed by candidate root
    pub manifest_errors: Vec<(PathBuf, ManifestError)>,
    /// Resolution-time rejections with reasons
    pub rejected: Vec<(String, ResolutionError)>,
    /// Contained activation faults
    pub faults: Vec<PluginFault>,
}

impl LoadReport {
    /// True when every discovered candidate activated.
    pub fn is_clean(&self) -> bool {
        self.manifest_errors.is_empty() && self.rejected.is_empty() && self.faults.is_empty()
    }
}

/// One row of `list()`: what the host renders.
#[derive(Debug, Clone)]
pub struct PluginStatus {
    pub id: String,
    pub version: Version,
    pub state: PluginState,
}

/// Outcome of `install`.
#[derive(Debug)]
pub struct InstallOutcome {
    pub id: String,
    /// Version now active, if the plugin activated in the follow-up pass
    pub version: Option<Version>,
    pub report: LoadReport,
}

/// Outcome of `update`.
#[derive(Debug)]
pub enum UpdateOutcome {
    Updated { id: String, old: Version, new: Version },
    UpToDate { id: String, current: Version },
}

/// The plugin lifecycle orchestrator.
pub struct PluginManager {
    host: HostInfo,
    plugin_root: PathBuf,
    config_root: PathBuf,
    approved: CapabilitySet,
    entry_points: EntryPointRegistry,
    sandbox: Sandbox,
    instances: InstanceTable,
    registry: RegistryClient,
    commands: Arc<dyn CommandSink>,
    logs: Arc<dyn LogSink>,
    /// Shared client backing plugins' network capability handles
    http: reqwest::Client,
}

impl PluginManager {
    pub fn new(
        host: HostInfo,
        config: ManagerConfig,
        entry_points: EntryPointRegistry,
        commands: Arc<dyn CommandSink>,
        logs: Arc<dyn LogSink>,
    ) -> Result<Self, PluginSystemError> {
        std::fs::create_dir_all(&config.plugin_root)
            .map_err(|e| PluginSystemError::io(e, "creating plugin root", &config.plugin_root))?;
        std::fs::create_dir_all(&config.config_root)
            .map_err(|e| PluginSystemError::io(e, "creating config root", &config.config_root))?;

        let registry = RegistryClient::new(&config.registry_sources, config.network_timeout)?;
        let http = reqwest::Client::builder()
            .timeout(config.network_timeout)
            .build()
            .map_err(|e| PluginSystemError::io(
                std::io::Error::other(e),
                "building http client",
                &config.plugin_root,
            ))?;

        Ok(Self {
            host,
            plugin_root: config.plugin_root,
            config_root: config.config_root,
            approved: config.approved_capabilities,
            entry_points,
            sandbox: Sandbox::new(config.sandbox),
            instances: InstanceTable::new(),
            registry,
            commands,
            logs,
            http,
        })
    }

    pub fn host(&self) -> &HostInfo {
        &self.host
    }

    pub fn plugin_root(&self) -> &std::path::Path {
        &self.plugin_root
    }

    // --- Discovery and activation ---

    /// Run Discovery → Parser → Resolver once, then activate every plan
    /// member in plan order. A rejection or activation fault for one
    /// identifier never blocks activation of the others.
    pub async fn discover_and_load_all(&mut self) -> Result<LoadReport, PluginSystemError> {
        let mut report = LoadReport::default();
        let manifests = self.collect_manifests(&mut report).await?;

        let resolution = resolver::resolve(&manifests, &self.host, &self.instances.active_versions());
        for (id, error) in &resolution.rejected {
            log::warn!("plugin '{}' rejected: {}", id, error);
        }
        report.rejected = resolution.rejected;

        let mut by_id: BTreeMap<String, PluginManifest> =
            manifests.into_iter().map(|m| (m.id.clone(), m)).collect();
        self.activate_in_waves(resolution.plan.order(), &mut by_id, &mut report).await;

        log::info!(
            "plugin pass complete: {} activated, {} disabled, {} malformed, {} rejected, {} faulted",
            report.activated.len(),
            report.skipped_disabled.len(),
            report.manifest_errors.len(),
            report.rejected.len(),
            report.faults.len(),
        );
        Ok(report)
    }

    /// Load a single installed plugin by identifier, resolving its
    /// dependencies against the currently active set.
    pub async fn load(&mut self, id: &str) -> Result<(), PluginSystemError> {
        if self.instances.contains(id) {
            return Err(PluginSystemError::AlreadyLoaded(id.to_string()));
        }
        let manifest = self
            .disk_manifest(id)
            .await?
            .ok_or_else(|| PluginSystemError::NotInstalled(id.to_string()))?;
        self.activate_single(manifest, 0).await
    }

    /// Unload a plugin: cleanup through the sandbox, drop its command
    /// registrations, release the instance. Cleanup faults are contained
    /// and logged; the instance is removed either way.
    pub async fn unload(&mut self, id: &str) -> Result<(), PluginSystemError> {
        let mut instance = self
            .instances
            .remove(id)
            .ok_or_else(|| PluginSystemError::PluginNotFound(id.to_string()))?;
        self.teardown(&mut instance).await;
        log::info!("unloaded plugin '{}'", id);
        Ok(())
    }

    /// Tear down the existing instance, re-parse its manifest from disk,
    /// and re-activate under a new generation.
    ///
    /// On any failure during re-activation the previous instance is NOT
    /// restored — running two generations of the same plugin's state
    /// concurrently is worse than ending up `Faulted`, which is surfaced to
    /// the caller and recoverable by another reload.
    pub async fn reload(&mut self, id: &str) -> Result<(), PluginSystemError> {
        let mut previous = self
            .instances
            .remove(id)
            .ok_or_else(|| PluginSystemError::PluginNotFound(id.to_string()))?;
        previous.state = PluginState::Reloading;
        let generation = previous.generation + 1;

        if let Err(fault) = self.sandbox.cleanup(id, Arc::clone(&previous.entry)).await {
            log::warn!("cleanup fault during reload of '{}': {}", id, fault);
        }
        self.commands.unregister_plugin(id);

        let reparsed = self.disk_manifest(id).await;
        let manifest = match reparsed {
            Ok(Some(m)) => m,
            Ok(None) => {
                self.park_faulted(previous, generation);
                return Err(PluginSystemError::NotInstalled(id.to_string()));
            }
            Err(e) => {
                self.park_faulted(previous, generation);
                return Err(e);
            }
        };

        let result = self.activate_single(manifest, generation).await;
        if result.is_err() && !self.instances.contains(id) {
            // Failures before the sandbox ran (rejection, unknown entry
            // point) leave no fresh instance; park the old shell as Faulted
            // so the identifier stays visible and reloadable.
            self.park_faulted(previous, generation);
        }
        result
    }

    // --- Dispatch ---

    /// Route a command to an `Active` plugin. Dispatch against an
    /// identifier in any other state fails with `PluginNotActive` without
    /// invoking the plugin.
    pub async fn dispatch(
        &mut self,
        id: &str,
        command_id: &str,
        args: serde_json::Value,
    ) -> Result<serde_json::Value, PluginSystemError> {
        let instance = self
            .instances
            .get(id)
            .filter(|instance| instance.state.is_active())
            .ok_or_else(|| PluginSystemError::PluginNotActive(id.to_string()))?;
        let entry = Arc::clone(&instance.entry);

        let invoked = self.sandbox.invoke(id, entry, command_id.to_string(), args).await;
        match invoked {
            Ok(value) => Ok(value),
            Err(fault) => {
                self.quarantine(id);
                Err(fault.into())
            }
        }
    }

    /// Fetch an `Active` plugin's manual, if it ships one.
    pub async fn manual(&mut self, id: &str) -> Result<Option<String>, PluginSystemError> {
        let instance = self
            .instances
            .get(id)
            .filter(|instance| instance.state.is_active())
            .ok_or_else(|| PluginSystemError::PluginNotActive(id.to_string()))?;
        let entry = Arc::clone(&instance.entry);

        let fetched = self.sandbox.manual(id, entry).await;
        match fetched {
            Ok(manual) => Ok(manual),
            Err(fault) => {
                self.quarantine(id);
                Err(fault.into())
            }
        }
    }

    // --- Introspection ---

    /// Every known plugin with its version and state, sorted by identifier.
    pub fn list(&self) -> Vec<PluginStatus> {
        let mut statuses: Vec<PluginStatus> = self
            .instances
            .iter()
            .map(|(id, instance)| PluginStatus {
                id: id.clone(),
                version: instance.version().clone(),
                state: instance.state,
            })
            .collect();
        statuses.sort_by(|a, b| a.id.cmp(&b.id));
        statuses
    }

    /// Identifiers currently in `Active` state, sorted.
    pub fn list_active(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .instances
            .iter()
            .filter(|(_, instance)| instance.state.is_active())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    // --- Enable / disable ---

    /// Persist a plugin as enabled. Takes effect on the next discovery pass.
    pub fn enable(&mut self, id: &str) -> Result<(), PluginSystemError> {
        self.scope(id).set("enabled", true)?;
        log::info!("plugin '{}' enabled", id);
        Ok(())
    }

    /// Persist a plugin as disabled, unloading it first if it is live.
    pub async fn disable(&mut self, id: &str) -> Result<(), PluginSystemError> {
        self.scope(id).set("enabled", false)?;
        if self.instances.contains(id) {
            self.unload(id).await?;
        }
        log::info!("plugin '{}' disabled", id);
        Ok(())
    }

    // --- Registry operations ---

    /// Resolve and fetch a plugin from a bare identifier or explicit source
    /// location, then feed it back through the normal discovery path.
    pub async fn install(&mut self, source: &str) -> Result<InstallOutcome, PluginSystemError> {
        let entry = self.registry.resolve(source).await?;
        self.registry.fetch(&entry, &self.plugin_root).await?;
        log::info!("installed plugin '{}' v{} from '{}'", entry.id, entry.latest, source);

        let report = self.discover_and_load_all().await?;
        let version = self
            .instances
            .get(&entry.id)
            .filter(|instance| instance.state.is_active())
            .map(|instance| instance.version().clone());
        Ok(InstallOutcome {
            id: entry.id,
            version,
            report,
        })
    }

    /// Update a plugin when the registry has a strictly newer version.
    /// Equal or older remote versions are a no-op.
    pub async fn update(&mut self, id: &str) -> Result<UpdateOutcome, PluginSystemError> {
        let on_disk = self
            .disk_manifest(id)
            .await?
            .ok_or_else(|| PluginSystemError::NotInstalled(id.to_string()))?;
        let current = on_disk.version.clone();

        let entry = self.registry.resolve(id).await?;
        if entry.latest <= current {
            return Ok(UpdateOutcome::UpToDate {
                id: id.to_string(),
                current,
            });
        }

        if self.instances.contains(id) {
            self.unload(id).await?;
        }
        self.registry.fetch(&entry, &self.plugin_root).await?;
        if on_disk.kind == CandidateKind::SingleFile {
            // The replacement is directory-shaped; drop the legacy file so
            // the identifier stays unique on the next scan.
            remove_tree(&on_disk.root)
                .map_err(|e| PluginSystemError::io(e, "removing superseded plugin file", &on_disk.root))?;
        }
        let report = self.discover_and_load_all().await?;
        for fault in &report.faults {
            log::warn!("fault while re-activating after update: {}", fault);
        }

        log::info!("updated plugin '{}': {} -> {}", id, current, entry.latest);
        Ok(UpdateOutcome::Updated {
            id: id.to_string(),
            old: current,
            new: entry.latest,
        })
    }

    /// Remove a plugin's on-disk tree, unloading it first if live. This is
    /// the only operation that deletes plugin-owned files.
    pub async fn uninstall(&mut self, id: &str) -> Result<(), PluginSystemError> {
        let live_root = self.instances.get(id).map(|instance| instance.manifest.root.clone());
        if self.instances.contains(id) {
            self.unload(id).await?;
        }
        let root = match live_root {
            Some(root) => root,
            None => {
                self.disk_manifest(id)
                    .await?
                    .ok_or_else(|| PluginSystemError::NotInstalled(id.to_string()))?
                    .root
            }
        };
        remove_tree(&root).map_err(|e| PluginSystemError::io(e, "removing plugin tree", &root))?;
        log::info!("uninstalled plugin '{}' ({})", id, root.display());
        Ok(())
    }

    /// Identifiers of installed plugins whose remote latest version
    /// strictly exceeds the installed one.
    pub async fn outdated(&self) -> Result<Vec<String>, PluginSystemError> {
        let installed = self.installed_versions().await?;
        Ok(self.registry.check_updates(&installed).await?)
    }

    // --- Shutdown ---

    /// Unload every instance, dependents before their dependencies.
    /// Cleanup always runs, whatever state an instance is in.
    pub async fn shutdown(&mut self) {
        let manifests: Vec<PluginManifest> = self
            .instances
            .iter()
            .map(|(_, instance)| (*instance.manifest).clone())
            .collect();
        let resolution = resolver::resolve(&manifests, &self.host, &BTreeMap::new());
        let mut order: Vec<String> = resolution.plan.order().to_vec();
        order.extend(resolution.rejected.into_iter().map(|(id, _)| id));

        for id in order.iter().rev() {
            if let Some(mut instance) = self.instances.remove(id) {
                self.teardown(&mut instance).await;
            }
        }
        for id in self.instances.ids() {
            if let Some(mut instance) = self.instances.remove(&id) {
                self.teardown(&mut instance).await;
            }
        }
        log::info!("plugin manager shut down");
    }

    // --- Internals ---

    fn scope(&self, id: &str) -> PluginConfigScope {
        PluginConfigScope::new(&self.config_root, id, ConfigFormat::Json)
    }

    /// Host-persisted enabled flag wins over the manifest default.
    fn effective_enabled(&self, manifest: &PluginManifest) -> bool {
        match self.scope(&manifest.id).get::<bool>("enabled") {
            Ok(Some(persisted)) => persisted,
            Ok(None) => manifest.enabled,
            Err(e) => {
                log::warn!("could not read enabled flag for '{}': {}", manifest.id, e);
                manifest.enabled
            }
        }
    }

    async fn collect_manifests(&self, report: &mut LoadReport) -> Result<Vec<PluginManifest>, PluginSystemError> {
        let scanner = DiscoveryScanner::new(&self.plugin_root);
        let stream = scanner
            .scan()
            .await
            .map_err(|e| PluginSystemError::io(e, "scanning plugin root", &self.plugin_root))?;
        tokio::pin!(stream);

        let mut manifests = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        while let Some(candidate) = stream.next().await {
            let root = candidate.root.clone();
            match manifest::parse(&candidate) {
                Ok(parsed) => {
                    if self.instances.contains(&parsed.id) {
                        // Live in some state already; reload is the way to
                        // replace it.
                        continue;
                    }
                    if !seen.insert(parsed.id.clone()) {
                        log::warn!(
                            "duplicate plugin identifier '{}' at '{}'; keeping the first candidate",
                            parsed.id,
                            root.display()
                        );
                        continue;
                    }
                    if !self.effective_enabled(&parsed) {
                        log::info!("plugin '{}' is disabled, skipping", parsed.id);
                        report.skipped_disabled.push(parsed.id);
                        continue;
                    }
                    manifests.push(parsed);
                }
                Err(e) => {
                    log::warn!("invalid plugin candidate at '{}': {}", root.display(), e);
                    report.manifest_errors.push((root, e));
                }
            }
        }
        Ok(manifests)
    }

    /// Activate plan members concurrently, wave by wave: a plugin may not
    /// begin `initialize` until all of its resolved dependencies are
    /// `Active`. A timeout or fault in one member never cancels its
    /// siblings.
    async fn activate_in_waves(
        &mut self,
        order: &[String],
        manifests: &mut BTreeMap<String, PluginManifest>,
        report: &mut LoadReport,
    ) {
        let mut pending: Vec<String> = order.iter().filter(|id| manifests.contains_key(*id)).cloned().collect();

        while !pending.is_empty() {
            let ready: Vec<String> = pending
                .iter()
                .filter(|id| manifests.get(*id).map(|m| self.dependencies_active(m)).unwrap_or(false))
                .cloned()
                .collect();

            if ready.is_empty() {
                // Every remaining member waits on a dependency that faulted
                // or never activated.
                for id in pending.drain(..) {
                    manifests.remove(&id);
                    let fault = PluginFault {
                        plugin_id: id.clone(),
                        operation: SandboxOp::Initialize,
                        kind: FaultKind::Error,
                        detail: "a dependency failed to activate".to_string(),
                    };
                    log::warn!("{}", fault);
                    report.faults.push(fault);
                }
                break;
            }

            let mut wave: JoinSet<(
                PluginManifest,
                Arc<dyn PluginEntry>,
                CapabilitySet,
                Result<(), PluginFault>,
            )> = JoinSet::new();

            for id in &ready {
                let Some(manifest) = manifests.remove(id) else { continue };
                match self.prepare_activation(&manifest, 0) {
                    Ok((entry, granted, ctx)) => {
                        let sandbox = self.sandbox.clone();
                        wave.spawn(async move {
                            let result = sandbox.initialize(&manifest.id, Arc::clone(&entry), ctx).await;
                            (manifest, entry, granted, result)
                        });
                    }
                    Err(e) => {
                        log::error!("cannot activate '{}': {}", manifest.id, e);
                        report.faults.push(PluginFault {
                            plugin_id: manifest.id.clone(),
                            operation: SandboxOp::Initialize,
                            kind: FaultKind::Error,
                            detail: e.to_string(),
                        });
                    }
                }
            }

            while let Some(joined) = wave.join_next().await {
                match joined {
                    Ok((manifest, entry, granted, result)) => {
                        self.finish_activation(manifest, entry, granted, result, 0, report);
                    }
                    Err(e) => log::error!("activation task failed to join: {}", e),
                }
            }

            pending.retain(|id| manifests.contains_key(id));
        }
    }

    fn dependencies_active(&self, manifest: &PluginManifest) -> bool {
        manifest.dependencies.iter().all(|dep| {
            self.instances
                .get(&dep.id)
                .map(|instance| instance.state.is_active())
                .unwrap_or(false)
        })
    }

    /// Resolve the entry point and build the activation context. Permission
    /// checks happen here: the context only ever carries handles for the
    /// granted set.
    fn prepare_activation(
        &self,
        manifest: &PluginManifest,
        generation: u64,
    ) -> Result<(Arc<dyn PluginEntry>, CapabilitySet, ActivationContext), PluginSystemError> {
        let factory = self
            .entry_points
            .resolve(&manifest.entry.symbol)
            .ok_or_else(|| PluginSystemError::UnknownEntryPoint {
                plugin_id: manifest.id.clone(),
                symbol: manifest.entry.symbol.clone(),
            })?;
        let entry: Arc<dyn PluginEntry> = Arc::from(factory());

        let granted = capability::granted(&manifest.permissions, &self.approved);
        let mut handles = CapabilityHandles::default();
        if granted.contains(&Capability::Commands) {
            handles.commands = Some(CommandsHandle::new(&manifest.id, Arc::clone(&self.commands)));
        }
        if granted.contains(&Capability::Config) {
            handles.config = Some(self.scope(&manifest.id));
        }
        if granted.contains(&Capability::Filesystem) {
            if let Some(resources) = manifest.resources_dir() {
                handles.resources = Some(ResourcesHandle::new(resources));
            }
        }
        if granted.contains(&Capability::Network) {
            handles.network = Some(NetworkHandle::new(self.http.clone()));
        }
        if granted.contains(&Capability::Process) {
            if let Some(binary) = manifest.binary.as_ref().filter(|binary| binary.enabled) {
                handles.process = Some(ProcessHandle::new(
                    manifest.root.join(&binary.path),
                    binary.args.clone(),
                ));
            }
        }

        let ctx = ActivationContext {
            plugin_id: manifest.id.clone(),
            generation,
            log: PluginLogger::new(&manifest.id, Arc::clone(&self.logs)),
            capabilities: handles,
        };
        Ok((entry, granted, ctx))
    }

    fn finish_activation(
        &mut self,
        manifest: PluginManifest,
        entry: Arc<dyn PluginEntry>,
        granted: CapabilitySet,
        result: Result<(), PluginFault>,
        generation: u64,
        report: &mut LoadReport,
    ) {
        let id = manifest.id.clone();
        let mut instance = PluginInstance::new(Arc::new(manifest), entry, granted, generation);
        match result {
            Ok(()) => {
                instance.state = PluginState::Active;
                log::info!("activated plugin '{}' v{}", id, instance.version());
                if self.instances.insert(instance).is_err() {
                    log::error!("instance table already holds '{}'; dropping the new activation", id);
                    return;
                }
                report.activated.push(id);
            }
            Err(fault) => {
                instance.state = PluginState::Faulted;
                self.commands.unregister_plugin(&id);
                let _ = self.instances.insert(instance);
                report.faults.push(fault);
            }
        }
    }

    /// Single-plugin activation used by `load` and `reload`.
    async fn activate_single(&mut self, manifest: PluginManifest, generation: u64) -> Result<(), PluginSystemError> {
        let resolution = resolver::resolve(
            std::slice::from_ref(&manifest),
            &self.host,
            &self.instances.active_versions(),
        );
        if let Some((plugin_id, error)) = resolution.rejected.into_iter().next() {
            return Err(PluginSystemError::Resolution {
                plugin_id,
                source: error,
            });
        }

        let (entry, granted, ctx) = self.prepare_activation(&manifest, generation)?;
        let id = manifest.id.clone();
        let result = self.sandbox.initialize(&id, Arc::clone(&entry), ctx).await;

        let mut report = LoadReport::default();
        self.finish_activation(manifest, entry, granted, result, generation, &mut report);
        match report.faults.into_iter().next() {
            Some(fault) => Err(fault.into()),
            None => Ok(()),
        }
    }

    /// Cleanup and release one instance that is already out of the table.
    async fn teardown(&mut self, instance: &mut PluginInstance) {
        if instance.state == PluginState::Destroyed {
            return;
        }
        instance.state = PluginState::Unloading;
        if let Err(fault) = self.sandbox.cleanup(instance.id(), Arc::clone(&instance.entry)).await {
            log::warn!("cleanup fault during unload: {}", fault);
        }
        self.commands.unregister_plugin(instance.id());
        instance.state = PluginState::Destroyed;
    }

    /// Mark a live instance `Faulted` and drop its command registrations.
    fn quarantine(&mut self, id: &str) {
        if let Some(instance) = self.instances.get_mut(id) {
            instance.state = PluginState::Faulted;
        }
        self.commands.unregister_plugin(id);
    }

    fn park_faulted(&mut self, mut instance: PluginInstance, generation: u64) {
        instance.state = PluginState::Faulted;
        instance.generation = generation;
        let _ = self.instances.insert(instance);
    }

    /// Find the installed manifest for an identifier, first by naming
    /// convention, then by a full scan for trees named otherwise.
    async fn disk_manifest(&self, id: &str) -> Result<Option<PluginManifest>, PluginSystemError> {
        let conventional = [
            self.plugin_root.join(id),
            self.plugin_root.join(format!("{}.{}", id, SINGLE_FILE_EXTENSION)),
        ];
        for path in conventional {
            if let Some(candidate) = discovery::candidate_at(&path).await {
                let parsed = manifest::parse(&candidate)?;
                if parsed.id == id {
                    return Ok(Some(parsed));
                }
            }
        }

        let scanner = DiscoveryScanner::new(&self.plugin_root);
        let stream = scanner
            .scan()
            .await
            .map_err(|e| PluginSystemError::io(e, "scanning plugin root", &self.plugin_root))?;
        tokio::pin!(stream);
        while let Some(candidate) = stream.next().await {
            if let Ok(parsed) = manifest::parse(&candidate) {
                if parsed.id == id {
                    return Ok(Some(parsed));
                }
            }
        }
        Ok(None)
    }

    /// Versions of everything installed on disk, whether loaded or not.
    async fn installed_versions(&self) -> Result<BTreeMap<String, Version>, PluginSystemError> {
        let scanner = DiscoveryScanner::new(&self.plugin_root);
        let stream = scanner
            .scan()
            .await
            .map_err(|e| PluginSystemError::io(e, "scanning plugin root", &self.plugin_root))?;
        tokio::pin!(stream);

        let mut versions = BTreeMap::new();
        while let Some(candidate) = stream.next().await {
            if let Ok(parsed) = manifest::parse(&candidate) {
                versions.entry(parsed.id).or_insert(parsed.version);
            }
        }
        Ok(versions)
    }
}

impl std::fmt::Debug for PluginManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginManager")
            .field("host", &self.host)
            .field("plugin_root", &self.plugin_root)
            .field("instances", &self.instances.len())
            .finish_non_exhaustive()
    }
}
