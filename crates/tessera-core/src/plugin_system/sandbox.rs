//! # Sandbox / Isolation Layer
//!
//! All plugin code runs behind this boundary. Each call executes on its own
//! tokio task so a hung plugin can be abandoned without stalling the control
//! path; panics are caught at the task boundary and `initialize`/`cleanup`
//! additionally run under a wall-clock budget. Whatever goes wrong inside
//! plugin code — an error return, a panic, a blown budget — comes back as a
//! [`PluginFault`] value, never as an unwinding panic into the host.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::plugin_system::capability::ActivationContext;
use crate::plugin_system::traits::{PluginCallError, PluginEntry};

/// Which sandboxed operation a fault was raised in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SandboxOp {
    #[error("initialize")]
    Initialize,
    #[error("invoke")]
    Invoke,
    #[error("cleanup")]
    Cleanup,
}

/// The shape of a contained fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FaultKind {
    /// The operation returned an error
    #[error("error")]
    Error,
    /// Plugin code panicked
    #[error("panic")]
    Panic,
    /// The wall-clock budget expired
    #[error("timeout")]
    Timeout,
    /// The execution unit was cancelled from outside
    #[error("cancelled")]
    Cancelled,
}

/// A contained plugin fault, reported instead of propagated.
#[derive(Debug, Clone, thiserror::Error)]
#[error("plugin '{plugin_id}' faulted during {operation} ({kind}): {detail}")]
pub struct PluginFault {
    pub plugin_id: String,
    pub operation: SandboxOp,
    pub kind: FaultKind,
    pub detail: String,
}

/// Wall-clock budgets for the bounded operations, supplied by the host.
#[derive(Debug, Clone, Copy)]
pub struct SandboxConfig {
    pub init_budget: Duration,
    pub cleanup_budget: Duration,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            init_budget: Duration::from_secs(5),
            cleanup_budget: Duration::from_secs(5),
        }
    }
}

/// Executes plugin entry-point operations under fault containment.
#[derive(Debug, Clone)]
pub struct Sandbox {
    config: SandboxConfig,
}

impl Sandbox {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Run `initialize` under the configured budget.
    pub async fn initialize(
        &self,
        plugin_id: &str,
        entry: Arc<dyn PluginEntry>,
        ctx: ActivationContext,
    ) -> Result<(), PluginFault> {
        let task = tokio::spawn(async move { entry.initialize(ctx).await });
        self.bounded(plugin_id, SandboxOp::Initialize, self.config.init_budget, task)
            .await
    }

    /// Run `cleanup` under the configured budget.
    pub async fn cleanup(&self, plugin_id: &str, entry: Arc<dyn PluginEntry>) -> Result<(), PluginFault> {
        let task = tokio::spawn(async move { entry.cleanup().await });
        self.bounded(plugin_id, SandboxOp::Cleanup, self.config.cleanup_budget, task)
            .await
    }

    /// Run one registered command. Fault-contained but not time-bounded.
    pub async fn invoke(
        &self,
        plugin_id: &str,
        entry: Arc<dyn PluginEntry>,
        command_id: String,
        args: serde_json::Value,
    ) -> Result<serde_json::Value, PluginFault> {
        let task = tokio::task::spawn_blocking(move || {
            panic::catch_unwind(AssertUnwindSafe(|| entry.invoke(&command_id, args)))
        });
        match task.await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(e))) => Err(self.fault(plugin_id, SandboxOp::Invoke, FaultKind::Error, e.to_string())),
            Ok(Err(payload)) => Err(self.fault(
                plugin_id,
                SandboxOp::Invoke,
                FaultKind::Panic,
                panic_message(payload),
            )),
            Err(join_error) => Err(self.join_fault(plugin_id, SandboxOp::Invoke, join_error)),
        }
    }

    /// Fetch the plugin's manual. Plugin code, so it stays behind the
    /// boundary like any invocation.
    pub async fn manual(&self, plugin_id: &str, entry: Arc<dyn PluginEntry>) -> Result<Option<String>, PluginFault> {
        let task = tokio::task::spawn_blocking(move || {
            panic::catch_unwind(AssertUnwindSafe(|| entry.manual()))
        });
        match task.await {
            Ok(Ok(manual)) => Ok(manual),
            Ok(Err(payload)) => Err(self.fault(
                plugin_id,
                SandboxOp::Invoke,
                FaultKind::Panic,
                panic_message(payload),
            )),
            Err(join_error) => Err(self.join_fault(plugin_id, SandboxOp::Invoke, join_error)),
        }
    }

    /// Await a spawned lifecycle task under a wall-clock budget. A blown
    /// budget aborts only this task — sibling plugins keep initializing.
    async fn bounded(
        &self,
        plugin_id: &str,
        operation: SandboxOp,
        budget: Duration,
        mut task: JoinHandle<Result<(), PluginCallError>>,
    ) -> Result<(), PluginFault> {
        let outcome = timeout(budget, &mut task).await;
        match outcome {
            Err(_elapsed) => {
                task.abort();
                Err(self.fault(
                    plugin_id,
                    operation,
                    FaultKind::Timeout,
                    format!("exceeded budget of {}ms", budget.as_millis()),
                ))
            }
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(e))) => Err(self.fault(plugin_id, operation, FaultKind::Error, e.to_string())),
            Ok(Err(join_error)) => Err(self.join_fault(plugin_id, operation, join_error)),
        }
    }

    fn fault(&self, plugin_id: &str, operation: SandboxOp, kind: FaultKind, detail: String) -> PluginFault {
        let fault = PluginFault {
            plugin_id: plugin_id.to_string(),
            operation,
            kind,
            detail,
        };
        log::error!("{}", fault);
        fault
    }

    fn join_fault(&self, plugin_id: &str, operation: SandboxOp, join_error: tokio::task::JoinError) -> PluginFault {
        if join_error.is_panic() {
            self.fault(plugin_id, operation, FaultKind::Panic, panic_message(join_error.into_panic()))
        } else {
            self.fault(plugin_id, operation, FaultKind::Cancelled, "execution unit cancelled".to_string())
        }
    }
}

/// Extract a printable message from a panic payload.
fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic reason".to_string()
    }
}
