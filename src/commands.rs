// src/commands.rs
//! Command handlers for the pallet CLI

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use pallet::events::Event;
use pallet::{
    OperationKind, PackageFilter, PackageManager, PackageStatus, PendingOperation, PendingSet,
    notification_text,
};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::info;

/// Add a repository, optionally syncing it
pub fn cmd_repo_add(manager: &PackageManager, url: &str, sync: bool) -> Result<()> {
    let repo = manager.add_repository(url)?;
    println!("Added repository: {}", repo.url);
    if sync {
        cmd_sync(manager, Some(url))?;
    }
    Ok(())
}

pub fn cmd_repo_remove(manager: &PackageManager, url: &str) -> Result<()> {
    let repo = manager.remove_repository(url)?;
    println!("Removed repository: {} ({})", repo.name, repo.url);
    Ok(())
}

pub fn cmd_repo_list(manager: &PackageManager) -> Result<()> {
    let repos = manager.repositories()?;
    if repos.is_empty() {
        println!("No repositories configured");
        return Ok(());
    }

    println!("Repositories:");
    for repo in repos {
        let synced = repo.last_sync.as_deref().unwrap_or("never");
        println!("  {} (last sync: {})", repo.name, synced);
        println!("      {}", repo.url);
        if !repo.description.is_empty() {
            println!("      {}", repo.description);
        }
    }
    Ok(())
}

/// Sync one repository or all of them
pub fn cmd_sync(manager: &PackageManager, url: Option<&str>) -> Result<()> {
    let results = match url {
        Some(url) => vec![(url.to_string(), manager.sync_repository(url))],
        None => manager.sync_all()?,
    };
    if results.is_empty() {
        println!("No repositories to sync");
        return Ok(());
    }

    let mut failed = 0;
    for (url, result) in results {
        match result {
            Ok(s) => println!(
                "  [OK] {}: {} added, {} updated, {} removed",
                url, s.added, s.updated, s.removed
            ),
            Err(e) => {
                failed += 1;
                println!("  [FAILED] {}: {}", url, e);
            }
        }
    }
    if failed > 0 {
        anyhow::bail!("{} repositories failed to sync", failed);
    }
    Ok(())
}

fn print_plan(set: &PendingSet) {
    for (label, ops) in [
        ("Remove", &set.to_remove),
        ("Install", &set.to_install),
        ("Update", &set.to_update),
    ] {
        if ops.is_empty() {
            continue;
        }
        println!("{} ({}):", label, ops.len());
        for op in ops {
            println!("  {}-{}", op.name, op.version);
        }
    }
    println!("Download size: {} bytes", set.download_size);
}

/// Resolve, show and (unless `dry_run`) apply a batch of requests
pub fn cmd_apply(
    manager: &PackageManager,
    ids: &[i64],
    kind: OperationKind,
    dry_run: bool,
) -> Result<()> {
    let requests: Vec<(i64, OperationKind)> = ids.iter().map(|id| (*id, kind)).collect();
    let plan = manager.resolve(&requests)?;
    if plan.is_empty() {
        println!("Nothing to do");
        return Ok(());
    }

    print_plan(&PendingSet::from_operations(&plan));
    if dry_run {
        return Ok(());
    }
    run_plan(manager, &plan)
}

fn run_plan(manager: &PackageManager, plan: &[PendingOperation]) -> Result<()> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{pos}/{len}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_length(plan.len() as u64);
    spinner.enable_steady_tick(Duration::from_millis(100));

    let result = manager.apply_operations(plan, |index, op| {
        spinner.set_position(index as u64);
        spinner.set_message(op.to_string());
    });

    match result {
        Ok(applied) => {
            spinner.finish_with_message(format!("Applied {} operations", applied.len()));
            Ok(())
        }
        Err(e) => {
            spinner.abandon_with_message("Failed");
            Err(e.into())
        }
    }
}

pub fn cmd_upgrade(manager: &PackageManager, dry_run: bool) -> Result<()> {
    let targets = manager.upgrade_targets()?;
    if targets.is_empty() {
        println!("All installed packages are up to date");
        return Ok(());
    }
    cmd_apply(manager, &targets, OperationKind::Update, dry_run)
}

pub fn cmd_list(
    manager: &PackageManager,
    status: Option<&str>,
    tag: Option<String>,
    search: Option<String>,
) -> Result<()> {
    let status = status
        .map(PackageStatus::from_str)
        .transpose()
        .context("Invalid --status (expected not-installed, installed, upgradable or pending)")?;
    let filter = PackageFilter {
        status,
        tag,
        text: search,
    };

    let packages = manager.list_packages(&filter)?;
    if packages.is_empty() {
        println!("No packages found");
        return Ok(());
    }
    for (pkg, status) in packages {
        println!(
            "{:>6}  {}-{}  [{}]",
            pkg.id.unwrap_or_default(),
            pkg.name,
            pkg.version,
            status
        );
        if let Some(desc) = &pkg.description {
            println!("        {}", desc);
        }
    }
    Ok(())
}

pub fn cmd_tags(manager: &PackageManager) -> Result<()> {
    for tag in manager.tags()? {
        println!("{}", tag);
    }
    Ok(())
}

pub fn cmd_check_updates(manager: &PackageManager) -> Result<()> {
    let updates = manager.available_updates()?;
    if updates.is_empty() {
        println!("All installed packages are up to date");
        return Ok(());
    }
    println!("{}", notification_text(&updates));
    for pkg in updates {
        println!("  {} (id {})", pkg, pkg.id.unwrap_or_default());
    }
    Ok(())
}

pub fn cmd_repair(manager: &PackageManager, dry_run: bool) -> Result<()> {
    let unrecorded = manager.unrecorded_installs()?;
    if unrecorded.is_empty() {
        println!("No unrecorded installs");
        return Ok(());
    }
    for (path, manifest) in &unrecorded {
        println!(
            "  {}-{} ({})",
            manifest.package,
            manifest.version,
            path.display()
        );
    }
    if dry_run {
        return Ok(());
    }
    let repaired = manager.repair_unrecorded()?;
    println!("Recorded {} installs", repaired.len());
    Ok(())
}

/// Run the update scheduler and print events until the process is stopped
pub fn cmd_watch(manager: PackageManager) -> Result<()> {
    let manager = Arc::new(manager);
    let mut events = manager.subscribe();
    let _scheduler = manager.spawn_scheduler()?;
    info!(
        "Watching for updates every {}",
        manager.config().update_interval
    );

    loop {
        match events.blocking_recv() {
            Ok(Event::UpdatesAvailable { packages }) => println!("{}", notification_text(&packages)),
            Ok(Event::RepoSynced {
                repo,
                added,
                updated,
                removed,
            }) => println!("{repo}: {added} added, {updated} updated, {removed} removed"),
            Ok(Event::SyncFailed { repo, error }) => println!("{repo}: sync failed: {error}"),
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => info!("Skipped {} events", skipped),
            Err(RecvError::Closed) => return Ok(()),
        }
    }
}
