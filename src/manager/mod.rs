// src/manager/mod.rs

//! The package manager facade
//!
//! [`PackageManager`] owns Storage, the metadata fetcher, the processor and
//! the update notifier, and is the only type front ends need. Commands
//! mutate state and publish [`Event`]s; queries only read.

mod lock;
pub mod sync;

pub use lock::{DataDirLock, LOCK_FILE};
pub use sync::SyncSummary;

use crate::cancel::CancelToken;
use crate::config::Config;
use crate::db::models::{InstalledRecord, Package, PackageStatus, Repository};
use crate::db::{PackageFilter, Storage, Upsert};
use crate::error::{Error, Result};
use crate::events::{Event, EventBus, PackageRef};
use crate::processor::{CommandUnpacker, Manifest, PackageProcessor, ProcessorOptions, Unpacker};
use crate::repository::transport::parse_url;
use crate::repository::{RepoInfoFetcher, TransportRegistry};
use crate::resolver::{OperationKind, PendingManager, PendingOperation, PendingSet};
use crate::updates::{SchedulerHandle, UpdateScheduler, UpdatesNotificationManager};
use dashmap::DashMap;
use parking_lot::Mutex;
use rayon::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

pub struct PackageManager {
    config: Config,
    storage: Arc<Storage>,
    fetcher: RepoInfoFetcher,
    processor: PackageProcessor,
    updates: UpdatesNotificationManager,
    events: EventBus,
    /// One lock per repository URL so syncs of the same repository serialise
    sync_locks: DashMap<String, Arc<Mutex<()>>>,
    cancel: Mutex<CancelToken>,
    _lock: DataDirLock,
}

impl PackageManager {
    /// Open the data directory with the configured transports and unpacker
    pub fn open(config: Config) -> Result<Self> {
        let transports = TransportRegistry::with_defaults(&config.network)?;
        let unpacker = Arc::new(CommandUnpacker::from_config(&config.unpack));
        Self::with_parts(config, transports, unpacker)
    }

    /// Open with explicit transports and unpacker
    pub fn with_parts(
        config: Config,
        transports: TransportRegistry,
        unpacker: Arc<dyn Unpacker>,
    ) -> Result<Self> {
        config.validate()?;
        let lock = DataDirLock::acquire(&config.data_dir)?;
        let storage = Arc::new(Storage::open(&config.db_path())?);
        let events = EventBus::default();

        let fetcher = RepoInfoFetcher::new(transports.clone(), config.spool_dir());
        let processor = PackageProcessor::new(
            Arc::clone(&storage),
            transports,
            unpacker,
            ProcessorOptions::from_config(&config),
        )?;
        let updates = UpdatesNotificationManager::new(Arc::clone(&storage), events.clone());

        info!("Opened package database at {}", config.db_path().display());
        Ok(Self {
            config,
            storage,
            fetcher,
            processor,
            updates,
            events,
            sync_locks: DashMap::new(),
            cancel: Mutex::new(CancelToken::new()),
            _lock: lock,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Cancel every sync and batch currently running
    ///
    /// Work started afterwards gets a fresh token.
    pub fn cancel(&self) {
        let mut token = self.cancel.lock();
        token.cancel();
        *token = CancelToken::new();
        info!("Cancellation requested");
    }

    fn cancel_token(&self) -> CancelToken {
        self.cancel.lock().clone()
    }

    // -- repositories --------------------------------------------------------

    /// Register a repository; adding a known URL returns the existing one
    pub fn add_repository(&self, url: &str) -> Result<Repository> {
        let parsed = parse_url(url)?;
        if !self.fetcher.transports().supports(parsed.scheme()) {
            return Err(Error::NoHandler {
                scheme: parsed.scheme().to_string(),
                url: url.to_string(),
            });
        }

        match self.storage.add_repository(url)? {
            Upsert::Inserted(_) => info!("Added repository {}", url),
            _ => debug!("Repository {} already registered", url),
        }
        self.storage
            .repository(url)?
            .ok_or_else(|| Error::UnknownRepository {
                url: url.to_string(),
            })
    }

    /// Forget a repository and everything it advertised
    ///
    /// Installed packages from it stay installed as orphans.
    pub fn remove_repository(&self, url: &str) -> Result<Repository> {
        let removed = self.storage.remove_repository(url)?;
        self.sync_locks.remove(url);
        info!("Removed repository {}", url);
        Ok(removed)
    }

    pub fn repositories(&self) -> Result<Vec<Repository>> {
        self.storage.repositories()
    }

    // -- sync ----------------------------------------------------------------

    /// Sync every registered repository in parallel, then check for updates
    ///
    /// A failing repository does not stop the others; its error is in the
    /// returned list and published as [`Event::SyncFailed`].
    pub fn sync_all(&self) -> Result<Vec<(String, Result<SyncSummary>)>> {
        let repos = self.storage.repositories()?;
        let cancel = self.cancel_token();
        info!("Syncing {} repositories", repos.len());

        let results: Vec<(String, Result<SyncSummary>)> = repos
            .par_iter()
            .map(|repo| (repo.url.clone(), self.sync_one(&repo.url, &cancel)))
            .collect();

        self.updates.check()?;
        Ok(results)
    }

    pub fn sync_repository(&self, url: &str) -> Result<SyncSummary> {
        let cancel = self.cancel_token();
        let summary = self.sync_one(url, &cancel)?;
        self.updates.check()?;
        Ok(summary)
    }

    fn sync_one(&self, url: &str, cancel: &CancelToken) -> Result<SyncSummary> {
        let result = self.sync_locked(url, cancel);
        if let Err(e) = &result {
            warn!("Sync of {} failed: {}", url, e);
            self.events.emit(Event::SyncFailed {
                repo: url.to_string(),
                error: e.to_string(),
            });
        }
        result
    }

    fn sync_locked(&self, url: &str, cancel: &CancelToken) -> Result<SyncSummary> {
        let repo = self
            .storage
            .repository(url)?
            .ok_or_else(|| Error::UnknownRepository {
                url: url.to_string(),
            })?;
        let repo_id = repo.id.unwrap_or_default();

        let fetch = self.fetcher.fetch_repository(url, cancel)?;

        // Held only while merging: fetching runs on the rayon pool and must
        // not block a worker on this lock
        let lock = Arc::clone(self.sync_locks.entry(url.to_string()).or_default().value());
        let _held = lock.lock();
        let summary = sync::apply_fetch(&self.storage, repo_id, &fetch, cancel)?;

        if summary.has_changes() {
            self.events.emit(Event::RepoSynced {
                repo: url.to_string(),
                added: summary.added,
                updated: summary.updated,
                removed: summary.removed,
            });
        }
        info!(
            "Synced {}: {} added, {} updated, {} removed ({} components and {} packages skipped)",
            url,
            summary.added,
            summary.updated,
            summary.removed,
            summary.failed_components,
            summary.failed_packages
        );
        Ok(summary)
    }

    // -- requests ------------------------------------------------------------

    /// Resolve `requests` without applying anything
    pub fn resolve(&self, requests: &[(i64, OperationKind)]) -> Result<Vec<PendingOperation>> {
        PendingManager::new(&self.storage).resolve(requests)
    }

    pub fn preview(&self, requests: &[(i64, OperationKind)]) -> Result<PendingSet> {
        Ok(PendingSet::from_operations(&self.resolve(requests)?))
    }

    pub fn request_install(&self, ids: &[i64]) -> Result<Vec<PendingOperation>> {
        self.request(ids, OperationKind::Install)
    }

    pub fn request_update(&self, ids: &[i64]) -> Result<Vec<PendingOperation>> {
        self.request(ids, OperationKind::Update)
    }

    pub fn request_remove(&self, ids: &[i64]) -> Result<Vec<PendingOperation>> {
        self.request(ids, OperationKind::Remove)
    }

    /// Update every installed package to the newest known version
    pub fn request_upgrade_all(&self) -> Result<Vec<PendingOperation>> {
        self.request(&self.upgrade_targets()?, OperationKind::Update)
    }

    /// Package ids `request_upgrade_all` would update to
    pub fn upgrade_targets(&self) -> Result<Vec<i64>> {
        Ok(self
            .storage
            .upgradable()?
            .into_iter()
            .filter_map(|(_, newest)| newest.id)
            .collect())
    }

    fn request(&self, ids: &[i64], kind: OperationKind) -> Result<Vec<PendingOperation>> {
        let requests: Vec<(i64, OperationKind)> = ids.iter().map(|id| (*id, kind)).collect();
        let plan = self.resolve(&requests)?;
        self.apply_operations(&plan, |_, _| {})
    }

    /// Apply resolved operations in order, stopping at the first failure
    ///
    /// Operations applied before a failure stay applied. `on_start` is
    /// called with the index of each operation before it runs.
    pub fn apply_operations<F>(
        &self,
        plan: &[PendingOperation],
        mut on_start: F,
    ) -> Result<Vec<PendingOperation>>
    where
        F: FnMut(usize, &PendingOperation),
    {
        let cancel = self.cancel_token();
        let mut applied = Vec::with_capacity(plan.len());

        for (index, op) in plan.iter().enumerate() {
            cancel.check()?;
            on_start(index, op);

            if let Err(e) = self.processor.apply(op) {
                warn!("{} failed: {}", op, e);
                self.events.emit(Event::OperationFailed {
                    package: op.package_ref(),
                    error: e.to_string(),
                });
                return Err(e);
            }

            let package = op.package_ref();
            self.events.emit(match op.kind {
                OperationKind::Install => Event::PackageInstalled { package },
                OperationKind::Update => Event::PackageUpdated { package },
                OperationKind::Remove => Event::PackageRemoved { package },
            });
            applied.push(op.clone());
        }

        Ok(applied)
    }

    // -- queries -------------------------------------------------------------

    /// Packages matching `filter`; packages with a running operation show
    /// as [`PackageStatus::Pending`]
    pub fn list_packages(&self, filter: &PackageFilter) -> Result<Vec<(Package, PackageStatus)>> {
        let in_flight = self.processor.in_flight();
        if in_flight.is_empty() {
            return self.storage.list_packages(filter);
        }

        let unfiltered = PackageFilter {
            status: None,
            ..filter.clone()
        };
        Ok(self
            .storage
            .list_packages(&unfiltered)?
            .into_iter()
            .map(|(pkg, status)| {
                let pending = pkg.id.is_some_and(|id| in_flight.contains(&id));
                (pkg, if pending { PackageStatus::Pending } else { status })
            })
            .filter(|(pkg, status)| filter.matches(pkg, *status))
            .collect())
    }

    pub fn package(&self, id: i64) -> Result<Package> {
        self.storage.package(id)
    }

    pub fn package_status(&self, id: i64) -> Result<PackageStatus> {
        if self.processor.is_in_flight(id) {
            return Ok(PackageStatus::Pending);
        }
        self.storage.package_status(id)
    }

    pub fn tags(&self) -> Result<Vec<String>> {
        self.storage.tags()
    }

    pub fn installed(&self) -> Result<Vec<InstalledRecord>> {
        self.storage.installed_records()
    }

    /// Installed packages whose source package vanished upstream
    pub fn orphaned_installs(&self) -> Result<Vec<InstalledRecord>> {
        self.storage.orphaned_installs()
    }

    /// Available updates, without publishing anything
    pub fn available_updates(&self) -> Result<Vec<PackageRef>> {
        self.updates.available_updates()
    }

    /// Compute available updates and publish them
    pub fn check_updates(&self) -> Result<Vec<PackageRef>> {
        self.updates.check()
    }

    pub fn unrecorded_installs(&self) -> Result<Vec<(PathBuf, Manifest)>> {
        self.processor.unrecorded_installs()
    }

    pub fn repair_unrecorded(&self) -> Result<Vec<InstalledRecord>> {
        self.processor.repair_unrecorded()
    }

    // -- scheduling ----------------------------------------------------------

    /// Start automatic syncs at the configured interval
    pub fn spawn_scheduler(self: &Arc<Self>) -> Result<SchedulerHandle> {
        let scheduler = UpdateScheduler::load(Arc::clone(&self.storage), self.config.update_interval)?;
        let manager = Arc::clone(self);
        Ok(scheduler.spawn(move || manager.sync_all().map(|_| ())))
    }
}
