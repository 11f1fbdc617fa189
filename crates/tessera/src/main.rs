mod cli; // Declare the cli module

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use log::error;

use tessera_core::plugin_system::manager::ManagerConfig;
use tessera_core::plugin_system::PluginManager;
use tessera_core::{EntryPointRegistry, FacadeLogSink, HostInfo, MemoryCommandSink};

/// Name plugins use in their `[compatibility]` tables
const HOST_NAME: &str = "tessera";

/// Tessera: a terminal host with a managed plugin system
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    /// Directory scanned for plugins (defaults to the user data dir)
    #[arg(long)]
    plugin_root: Option<PathBuf>,

    /// Directory holding per-plugin configuration (defaults to the user config dir)
    #[arg(long)]
    config_root: Option<PathBuf>,

    /// Registry source (base URL or local directory); may be repeated
    #[arg(long = "registry")]
    registries: Vec<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Manage plugins
    Plugin {
        #[command(subcommand)]
        command: PluginCommand,
    },
}

#[derive(Subcommand, Debug)]
enum PluginCommand {
    /// Discover, resolve, and activate everything, then list it
    List {},
    /// Load a single installed plugin
    Load { id: String },
    /// Unload a live plugin
    Unload { id: String },
    /// Reload a live plugin from disk
    Reload { id: String },
    /// Enable a plugin (persisted setting)
    Enable { id: String },
    /// Disable a plugin (persisted setting)
    Disable { id: String },
    /// Install a plugin from an identifier or source location
    Install { source: String },
    /// Update an installed plugin to the latest registry version
    Update { id: String },
    /// Remove an installed plugin from disk
    Uninstall { id: String },
    /// List installed plugins with a newer registry version
    Outdated {},
    /// Dispatch a command to an active plugin
    Dispatch {
        id: String,
        command_id: String,
        /// Command arguments as a JSON document
        #[arg(default_value = "{}")]
        args: String,
    },
    /// Print a plugin's manual, if it ships one
    Manual { id: String },
}

fn default_plugin_root() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tessera")
        .join("plugins")
}

fn default_config_root() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tessera")
        .join("plugins")
}

/// Entry points compiled into this host. Plugins installed from a registry
/// resolve against these symbols; a manifest naming anything else fails to
/// activate.
fn entry_points() -> EntryPointRegistry {
    let mut registry = EntryPointRegistry::new();
    registry.register("hello", || Box::new(hello_plugin::HelloEntry::new()));
    registry
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();

    let args = CliArgs::parse();

    let host = match HostInfo::new(HOST_NAME, env!("CARGO_PKG_VERSION")) {
        Ok(host) => host,
        Err(e) => {
            eprintln!("Failed to parse host version: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let mut config = ManagerConfig::new(
        args.plugin_root.unwrap_or_else(default_plugin_root),
        args.config_root.unwrap_or_else(default_config_root),
    );
    config.registry_sources = args.registries;

    let commands = Arc::new(MemoryCommandSink::new());
    let mut manager = match PluginManager::new(
        host,
        config,
        entry_points(),
        commands.clone(),
        Arc::new(FacadeLogSink),
    ) {
        Ok(manager) => manager,
        Err(e) => {
            eprintln!("Failed to initialize plugin manager: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let Commands::Plugin { command } = args.command;
    let outcome = cli::run(&mut manager, &commands, command).await;

    manager.shutdown().await;

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
