//! Example Tessera plugin.
//!
//! Registers a single `hello.greet` command and keeps a greeting counter,
//! demonstrating the activation context, the `commands` capability handle,
//! and idempotent cleanup. A matching on-disk descriptor looks like:
//!
//! ```toml
//! id = "hello"
//! version = "0.1.0"
//! author = "Tessera Developers"
//! description = "Greets whoever asks"
//! permissions = ["commands"]
//!
//! [entry]
//! path = "entry.txt"
//! symbol = "hello"
//! ```

use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};

use tessera_core::{ActivationContext, PluginCallError, PluginEntry, PluginLogger};

#[derive(Default)]
struct HelloState {
    log: Option<PluginLogger>,
    greetings: u64,
}

/// Entry point registered under the `hello` symbol.
#[derive(Default)]
pub struct HelloEntry {
    state: Mutex<HelloState>,
}

impl HelloEntry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PluginEntry for HelloEntry {
    async fn initialize(&self, ctx: ActivationContext) -> Result<(), PluginCallError> {
        if let Some(commands) = &ctx.capabilities.commands {
            commands.register("hello.greet", "Say hello");
        }
        ctx.log.info("hello plugin initialized");

        let mut state = self
            .state
            .lock()
            .map_err(|_| PluginCallError::Init("state poisoned".to_string()))?;
        state.log = Some(ctx.log.clone());
        Ok(())
    }

    fn invoke(&self, command_id: &str, args: Value) -> Result<Value, PluginCallError> {
        match command_id {
            "hello.greet" => {
                let name = args
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or("world")
                    .to_string();
                let mut state = self
                    .state
                    .lock()
                    .map_err(|_| PluginCallError::Command("state poisoned".to_string()))?;
                state.greetings += 1;
                Ok(json!({
                    "greeting": format!("Hello, {}!", name),
                    "count": state.greetings,
                }))
            }
            other => Err(PluginCallError::UnknownCommand(other.to_string())),
        }
    }

    async fn cleanup(&self) -> Result<(), PluginCallError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| PluginCallError::Cleanup("state poisoned".to_string()))?;
        if let Some(log) = state.log.take() {
            log.info("hello plugin cleaned up");
        }
        state.greetings = 0;
        Ok(())
    }

    fn manual(&self) -> Option<String> {
        Some("# Hello Plugin\n\nDispatch `hello.greet` with `{\"name\": \"...\"}` to be greeted.\n".to_string())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tessera_core::{ActivationContext, CapabilityHandles, FacadeLogSink, PluginLogger};

    use super::*;

    fn ctx() -> ActivationContext {
        ActivationContext {
            plugin_id: "hello".to_string(),
            generation: 0,
            log: PluginLogger::new("hello", Arc::new(FacadeLogSink)),
            capabilities: CapabilityHandles::default(),
        }
    }

    #[tokio::test]
    async fn greets_and_counts() {
        let entry = HelloEntry::new();
        entry.initialize(ctx()).await.unwrap();

        let first = entry.invoke("hello.greet", json!({"name": "Ada"})).unwrap();
        assert_eq!(first["greeting"], "Hello, Ada!");
        assert_eq!(first["count"], 1);

        let second = entry.invoke("hello.greet", json!({})).unwrap();
        assert_eq!(second["greeting"], "Hello, world!");
        assert_eq!(second["count"], 2);
    }

    #[tokio::test]
    async fn unknown_command_is_rejected() {
        let entry = HelloEntry::new();
        entry.initialize(ctx()).await.unwrap();
        assert!(entry.invoke("hello.shout", json!({})).is_err());
    }

    #[tokio::test]
    async fn cleanup_is_idempotent() {
        let entry = HelloEntry::new();
        entry.initialize(ctx()).await.unwrap();
        entry.cleanup().await.unwrap();
        entry.cleanup().await.unwrap();
    }
}
