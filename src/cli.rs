// src/cli.rs
//! CLI definitions for the pallet package manager
//!
//! This module contains the command-line interface definitions using clap.
//! The command implementations are in the `commands` module.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "pallet")]
#[command(version)]
#[command(about = "Repository-driven package manager", long_about = None)]
pub struct Cli {
    /// Configuration file (default: platform config dir)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Override the data directory from the configuration
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Repository management
    #[command(subcommand)]
    Repo(RepoCommands),

    /// Refresh package metadata from one or all repositories
    Sync {
        /// Repository URL (default: all repositories)
        url: Option<String>,
    },

    /// Install packages by id
    Install {
        #[arg(required = true)]
        ids: Vec<i64>,

        /// Only show what would be done
        #[arg(long)]
        dry_run: bool,
    },

    /// Update installed packages to the given package ids
    Update {
        #[arg(required = true)]
        ids: Vec<i64>,

        #[arg(long)]
        dry_run: bool,
    },

    /// Remove installed packages by id
    Remove {
        #[arg(required = true)]
        ids: Vec<i64>,

        #[arg(long)]
        dry_run: bool,
    },

    /// Update every installed package that has a newer version
    Upgrade {
        #[arg(long)]
        dry_run: bool,
    },

    /// List known packages
    List {
        /// Only packages with this status (not-installed, installed, upgradable, pending)
        #[arg(long)]
        status: Option<String>,

        /// Only packages carrying this tag
        #[arg(long)]
        tag: Option<String>,

        /// Case-insensitive search in name, description and tags
        #[arg(long)]
        search: Option<String>,
    },

    /// List all tags
    Tags,

    /// Show installed packages with a newer version available
    CheckUpdates,

    /// Record installs whose files are present but were never recorded
    Repair {
        #[arg(long)]
        dry_run: bool,
    },

    /// Run periodic syncs at the configured interval until interrupted
    Watch,
}

#[derive(Subcommand)]
pub enum RepoCommands {
    /// Add a repository
    Add {
        /// Repository URL
        url: String,

        /// Sync right after adding
        #[arg(long)]
        sync: bool,
    },

    /// Remove a repository and its packages
    Remove { url: String },

    /// List repositories
    List,
}
