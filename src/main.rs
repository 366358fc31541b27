//! chat-memory - operator tool for the conversational memory subsystem
//!
//! Shows and validates the memory configuration and checks that the memory
//! directory loads. It reports counts only, never memory contents.

use anyhow::Result;
use chat_memory::{
    config::{MemoryConfigManager, MemorySystemConfig},
    memory::{FileMemoryStore, MemoryStats, MemoryStore},
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "chat-memory")]
#[command(version)]
#[command(about = "Long-term memory for conversational assistants")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "CHAT_MEMORY_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, env = "CHAT_MEMORY_LOG_JSON")]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show configuration
    Config {
        /// Show default configuration
        #[arg(long)]
        default: bool,
    },

    /// Validate the configuration file
    Validate,

    /// Run diagnostics on the configuration and memory directory
    Doctor,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("chat_memory={}", log_level).into()),
        )
        .with(cli.json_logs.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!cli.json_logs).then(|| tracing_subscriber::fmt::layer()))
        .init();

    run(cli).await
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.unwrap_or_else(MemoryConfigManager::default_path);
    let manager = MemoryConfigManager::new(config_path);

    match cli.command {
        Commands::Config { default } => {
            if default {
                show_config(&MemorySystemConfig::from_env())?;
            } else {
                let config = manager.load().await?;
                show_config(&config)?;
            }
        }
        Commands::Validate => {
            manager.load().await?;
            manager.validate_config().await?;
            println!("✓ {} is valid", manager.path().display());
        }
        Commands::Doctor => {
            run_doctor(&manager).await?;
        }
    }

    Ok(())
}

async fn run_doctor(manager: &MemoryConfigManager) -> Result<()> {
    println!("🔍 chat-memory doctor");
    println!();

    println!("Checking configuration...");
    let existed = manager.path().exists();
    let config = match manager.load().await {
        Ok(config) => config,
        Err(e) => {
            println!("  ✗ {}: {}", manager.path().display(), e);
            return Ok(());
        }
    };
    if existed {
        println!("  ✓ Configuration file found: {}", manager.path().display());
    } else {
        println!("  ℹ Wrote default configuration to {}", manager.path().display());
    }

    println!();
    println!("Checking memory directory...");
    let store_config = &config.store.config;
    let store = FileMemoryStore::new(store_config.memory_dir.clone(), store_config.backup_enabled);
    match store.initialize().await {
        Ok(()) => {
            println!("  ✓ {} loaded", store.memories_path().display());
            let all = store.get_all(None, None).await?;
            print_stats(&MemoryStats::from_memories(&all));
            if store_config.backup_enabled && store.backup_path().exists() {
                println!("  ✓ Backup present: {}", store.backup_path().display());
            }
            if !store.index_path().exists() && !all.is_empty() {
                println!("  ℹ No index file yet (rebuilt on next write)");
            }
            store.close().await?;
        }
        Err(e) => {
            println!("  ✗ Failed to load {}: {}", store.memories_path().display(), e);
            if store.backup_path().exists() {
                println!("  ℹ A backup exists at {}", store.backup_path().display());
            }
        }
    }

    println!();
    println!("Doctor check complete!");

    Ok(())
}

fn print_stats(stats: &MemoryStats) {
    println!("  Memories: {}", stats.total_memories);
    let mut by_type: Vec<_> = stats.by_type.iter().collect();
    by_type.sort_by_key(|(memory_type, _)| memory_type.as_str());
    for (memory_type, count) in by_type {
        println!("    {:<12} {}", memory_type.as_str(), count);
    }
    if let (Some(oldest), Some(newest)) = (stats.oldest_memory, stats.newest_memory) {
        println!("  Range: {} .. {}", oldest.to_rfc3339(), newest.to_rfc3339());
    }
}

fn show_config(config: &MemorySystemConfig) -> Result<()> {
    let json = serde_json::to_string_pretty(config)?;
    println!("{}", json);
    Ok(())
}
