//! Command handlers binding the manager's host-facing operations to the CLI.

use tessera_core::plugin_system::manager::UpdateOutcome;
use tessera_core::plugin_system::PluginManager;
use tessera_core::MemoryCommandSink;

use crate::PluginCommand;

pub async fn run(
    manager: &mut PluginManager,
    commands: &MemoryCommandSink,
    command: PluginCommand,
) -> Result<(), tessera_core::Error> {
    match command {
        PluginCommand::List {} => {
            let report = manager.discover_and_load_all().await?;

            let statuses = manager.list();
            if statuses.is_empty() {
                println!("No plugins installed.");
            } else {
                println!("Plugins:");
                for status in &statuses {
                    println!("  - {} v{} [{}]", status.id, status.version, status.state);
                }
            }

            let registered = commands.snapshot();
            if !registered.is_empty() {
                println!("Commands:");
                for cmd in &registered {
                    println!("  - {}/{} ({})", cmd.plugin_id, cmd.command_id, cmd.display_name);
                }
            }

            for (root, error) in &report.manifest_errors {
                eprintln!("warning: {}: {}", root.display(), error);
            }
            for (id, reason) in &report.rejected {
                eprintln!("warning: '{}' rejected: {}", id, reason);
            }
            for fault in &report.faults {
                eprintln!("warning: {}", fault);
            }
            Ok(())
        }
        PluginCommand::Load { id } => {
            manager.load(&id).await?;
            println!("Loaded plugin '{}'.", id);
            Ok(())
        }
        PluginCommand::Unload { id } => {
            manager.unload(&id).await?;
            println!("Unloaded plugin '{}'.", id);
            Ok(())
        }
        PluginCommand::Reload { id } => {
            manager.reload(&id).await?;
            println!("Reloaded plugin '{}'.", id);
            Ok(())
        }
        PluginCommand::Enable { id } => {
            manager.enable(&id)?;
            println!("Plugin '{}' enabled; it will load on the next pass.", id);
            Ok(())
        }
        PluginCommand::Disable { id } => {
            manager.disable(&id).await?;
            println!("Plugin '{}' disabled.", id);
            Ok(())
        }
        PluginCommand::Install { source } => {
            let outcome = manager.install(&source).await?;
            match outcome.version {
                Some(version) => println!("Installed '{}' v{} and activated it.", outcome.id, version),
                None => println!(
                    "Installed '{}', but it did not activate; see warnings above.",
                    outcome.id
                ),
            }
            for fault in &outcome.report.faults {
                eprintln!("warning: {}", fault);
            }
            for (id, reason) in &outcome.report.rejected {
                eprintln!("warning: '{}' rejected: {}", id, reason);
            }
            Ok(())
        }
        PluginCommand::Update { id } => {
            match manager.update(&id).await? {
                UpdateOutcome::Updated { id, old, new } => {
                    println!("Updated '{}': {} -> {}", id, old, new);
                }
                UpdateOutcome::UpToDate { id, current } => {
                    println!("'{}' is already up to date (v{}).", id, current);
                }
            }
            Ok(())
        }
        PluginCommand::Uninstall { id } => {
            manager.uninstall(&id).await?;
            println!("Uninstalled plugin '{}'.", id);
            Ok(())
        }
        PluginCommand::Outdated {} => {
            let outdated = manager.outdated().await?;
            if outdated.is_empty() {
                println!("Everything is up to date.");
            } else {
                println!("Updates available:");
                for id in outdated {
                    println!("  - {}", id);
                }
            }
            Ok(())
        }
        PluginCommand::Dispatch { id, command_id, args } => {
            let args: serde_json::Value = serde_json::from_str(&args)
                .map_err(|e| tessera_core::Error::Other(format!("invalid JSON arguments: {}", e)))?;
            // The plugin must be active; run a discovery pass first so a
            // plain `dispatch` works on a fresh start.
            manager.discover_and_load_all().await?;
            let result = manager.dispatch(&id, &command_id, args).await?;
            println!("{}", serde_json::to_string_pretty(&result).unwrap_or_else(|_| result.to_string()));
            Ok(())
        }
        PluginCommand::Manual { id } => {
            manager.discover_and_load_all().await?;
            match manager.manual(&id).await? {
                Some(manual) => println!("{}", manual),
                None => println!("Plugin '{}' ships no manual.", id),
            }
            Ok(())
        }
    }
}
