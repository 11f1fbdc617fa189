use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::plugin_system::capability::ActivationContext;

/// Error type a plugin entry point may return from its lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum PluginCallError {
    #[error("initialization failed: {0}")]
    Init(String),
    #[error("command failed: {0}")]
    Command(String),
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    #[error("cleanup failed: {0}")]
    Cleanup(String),
}

/// Core trait every plugin entry point implements.
///
/// All three lifecycle operations are driven exclusively through the sandbox
/// layer; implementations may assume `initialize` completes before any
/// `invoke`, and that `cleanup` may be called more than once (it must be
/// idempotent). Entry points take `&self` — use interior mutability for
/// plugin state.
#[async_trait]
pub trait PluginEntry: Send + Sync {
    /// Initialize the plugin with its activation context.
    async fn initialize(&self, ctx: ActivationContext) -> Result<(), PluginCallError>;

    /// Invoke one of the plugin's registered commands.
    fn invoke(&self, command_id: &str, args: serde_json::Value) -> Result<serde_json::Value, PluginCallError>;

    /// Release resources. Must tolerate being called from any state.
    async fn cleanup(&self) -> Result<(), PluginCallError>;

    /// Markdown manual for the plugin, if it ships one.
    fn manual(&self) -> Option<String> {
        None
    }
}

/// Factory producing a fresh entry-point object for one activation.
pub type EntryFactory = Arc<dyn Fn() -> Box<dyn PluginEntry> + Send + Sync>;

/// Table mapping manifest entry symbols to their factories.
///
/// Entry points are registered by the host (typically at startup, one per
/// compiled-in plugin crate) and resolved at activation time from the
/// `entry.symbol` field of a manifest. There is no loading of arbitrary
/// symbols from disk; a manifest naming an unregistered symbol fails to
/// activate.
#[derive(Clone, Default)]
pub struct EntryPointRegistry {
    factories: HashMap<String, EntryFactory>,
}

impl EntryPointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under the given symbol. Replacing an existing
    /// registration is allowed; the latest one wins.
    pub fn register<F>(&mut self, symbol: &str, factory: F)
    where
        F: Fn() -> Box<dyn PluginEntry> + Send + Sync + 'static,
    {
        if self.factories.insert(symbol.to_string(), Arc::new(factory)).is_some() {
            log::warn!("entry point '{}' was already registered; replacing", symbol);
        }
    }

    /// Look up the factory for a symbol.
    pub fn resolve(&self, symbol: &str) -> Option<EntryFactory> {
        self.factories.get(symbol).cloned()
    }

    /// Registered symbols, sorted.
    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.factories.keys().cloned().collect();
        symbols.sort();
        symbols
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl fmt::Debug for EntryPointRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryPointRegistry")
            .field("symbols", &self.symbols())
            .finish()
    }
}
