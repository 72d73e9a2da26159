// src/main.rs

use anyhow::{Context, Result};
use clap::Parser;
use pallet::{Config, OperationKind, PackageManager};

mod cli;
mod commands;

use cli::{Cli, Commands, RepoCommands};

fn load_config(cli: &Cli) -> Result<Config> {
    let path = cli.config.clone().unwrap_or_else(Config::default_path);
    let mut config =
        Config::load(&path).with_context(|| format!("Failed to load {}", path.display()))?;
    if let Some(data_dir) = &cli.data_dir {
        let install_root_was_default =
            config.install_root == Config::with_data_dir(&config.data_dir).install_root;
        config.data_dir = data_dir.clone();
        if install_root_was_default {
            config.install_root = data_dir.join("root");
        }
    }
    Ok(config)
}

fn main() -> Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let manager = PackageManager::open(config)?;

    match cli.command {
        Commands::Repo(RepoCommands::Add { url, sync }) => {
            commands::cmd_repo_add(&manager, &url, sync)
        }
        Commands::Repo(RepoCommands::Remove { url }) => commands::cmd_repo_remove(&manager, &url),
        Commands::Repo(RepoCommands::List) => commands::cmd_repo_list(&manager),
        Commands::Sync { url } => commands::cmd_sync(&manager, url.as_deref()),
        Commands::Install { ids, dry_run } => {
            commands::cmd_apply(&manager, &ids, OperationKind::Install, dry_run)
        }
        Commands::Update { ids, dry_run } => {
            commands::cmd_apply(&manager, &ids, OperationKind::Update, dry_run)
        }
        Commands::Remove { ids, dry_run } => {
            commands::cmd_apply(&manager, &ids, OperationKind::Remove, dry_run)
        }
        Commands::Upgrade { dry_run } => commands::cmd_upgrade(&manager, dry_run),
        Commands::List {
            status,
            tag,
            search,
        } => commands::cmd_list(&manager, status.as_deref(), tag, search),
        Commands::Tags => commands::cmd_tags(&manager),
        Commands::CheckUpdates => commands::cmd_check_updates(&manager),
        Commands::Repair { dry_run } => commands::cmd_repair(&manager, dry_run),
        Commands::Watch => commands::cmd_watch(manager),
    }
}
