// src/processor/mod.rs

//! Applying resolved operations to the install root
//!
//! Each install or update downloads the payload, unpacks it into a private
//! staging directory and only then touches the install root, backing up
//! anything it overwrites. A failure before the copy leaves the root as it
//! was; a failure during the copy rolls the copy back.
//!
//! At most one operation per package id runs at a time. Operations on
//! different packages run on a bounded worker pool.

pub mod deploy;
pub mod manifest;
pub mod unpack;

pub use manifest::Manifest;
pub use unpack::{CommandUnpacker, Unpacker};

use crate::config::Config;
use crate::db::Storage;
use crate::db::models::{InstalledRecord, Package};
use crate::error::{Error, Result};
use crate::repository::TransportRegistry;
use crate::resolver::{OperationKind, PendingOperation};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use deploy::Deployment;
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Filesystem layout and limits for a [`PackageProcessor`]
#[derive(Debug, Clone)]
pub struct ProcessorOptions {
    pub install_root: PathBuf,
    pub manifests_dir: PathBuf,
    pub staging_dir: PathBuf,
    pub max_workers: usize,
}

impl ProcessorOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            install_root: config.install_root.clone(),
            manifests_dir: config.manifests_dir(),
            staging_dir: config.staging_dir(),
            max_workers: config.max_workers,
        }
    }
}

/// Removes the in-flight marker when the operation ends, however it ends
struct InFlightGuard<'a> {
    map: &'a DashMap<i64, OperationKind>,
    package_id: i64,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.map.remove(&self.package_id);
    }
}

pub struct PackageProcessor {
    storage: Arc<Storage>,
    transports: TransportRegistry,
    unpacker: Arc<dyn Unpacker>,
    options: ProcessorOptions,
    in_flight: DashMap<i64, OperationKind>,
    pool: rayon::ThreadPool,
}

impl PackageProcessor {
    pub fn new(
        storage: Arc<Storage>,
        transports: TransportRegistry,
        unpacker: Arc<dyn Unpacker>,
        options: ProcessorOptions,
    ) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(options.max_workers.max(1))
            .thread_name(|i| format!("pallet-worker-{i}"))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create worker pool: {e}")))?;

        Ok(Self {
            storage,
            transports,
            unpacker,
            options,
            in_flight: DashMap::new(),
            pool,
        })
    }

    pub fn options(&self) -> &ProcessorOptions {
        &self.options
    }

    /// Package ids with an operation currently running
    pub fn in_flight(&self) -> HashSet<i64> {
        self.in_flight.iter().map(|entry| *entry.key()).collect()
    }

    pub fn is_in_flight(&self, package_id: i64) -> bool {
        self.in_flight.contains_key(&package_id)
    }

    fn begin(&self, op: &PendingOperation) -> Result<InFlightGuard<'_>> {
        match self.in_flight.entry(op.package_id) {
            Entry::Occupied(_) => Err(Error::AlreadyInProgress {
                package: format!("{}-{}", op.name, op.version),
            }),
            Entry::Vacant(slot) => {
                slot.insert(op.kind);
                Ok(InFlightGuard {
                    map: &self.in_flight,
                    package_id: op.package_id,
                })
            }
        }
    }

    /// Apply one operation on the worker pool, blocking until it finishes
    pub fn apply(&self, op: &PendingOperation) -> Result<()> {
        let _guard = self.begin(op)?;
        debug!("Applying {}", op);
        self.pool.install(|| match op.kind {
            OperationKind::Install | OperationKind::Update => self.deploy_package(op.package_id),
            OperationKind::Remove => self.remove_package(op.package_id),
        })
    }

    pub fn install(&self, package_id: i64) -> Result<()> {
        self.apply_single(package_id, OperationKind::Install)
    }

    pub fn update(&self, package_id: i64) -> Result<()> {
        self.apply_single(package_id, OperationKind::Update)
    }

    pub fn remove(&self, package_id: i64) -> Result<()> {
        self.apply_single(package_id, OperationKind::Remove)
    }

    fn apply_single(&self, package_id: i64, kind: OperationKind) -> Result<()> {
        let pkg = self.storage.package(package_id)?;
        self.apply(&PendingOperation {
            package_id,
            kind,
            order_index: 0,
            name: pkg.name,
            version: pkg.version,
            size: pkg.size,
        })
    }

    /// Download, stage, unpack and copy a package, then record it
    fn deploy_package(&self, package_id: i64) -> Result<()> {
        let pkg = self.storage.package(package_id)?;
        if pkg.urls.is_empty() {
            return Err(Error::NoUrlsAvailable {
                package: pkg.to_string(),
            });
        }

        let staging_root = &self.options.staging_dir;
        fs::create_dir_all(staging_root).map_err(|e| Error::fs(staging_root, e))?;
        let staging = tempfile::Builder::new()
            .prefix(&format!("{}-", pkg.name))
            .tempdir_in(staging_root)
            .map_err(|e| Error::fs(staging_root, e))?;

        let archive = staging.path().join("archive");
        self.download(&pkg, &archive)?;

        let payload = staging.path().join("payload");
        fs::create_dir(&payload).map_err(|e| Error::fs(&payload, e))?;
        self.unpacker.unpack(&archive, &payload)?;
        let files = deploy::collect_files(&payload)?;
        debug!("{} staged {} files", pkg, files.len());

        let previous = self.storage.installed_record(&pkg.name)?;
        let old_manifest = previous.as_ref().and_then(|record| {
            Manifest::load(&record.manifest_path)
                .inspect_err(|e| warn!("Previous manifest of {} unreadable: {}", record.name, e))
                .ok()
        });

        let mut deployment =
            Deployment::new(&self.options.install_root, &staging.path().join("backup"));
        if let Err(e) = deployment.copy_all(&payload, &files) {
            warn!("Copy of {} failed, rolling back: {}", pkg, e);
            deployment.rollback();
            return Err(e);
        }

        let manifest_path = Manifest::path_for(&self.options.manifests_dir, &pkg.name);
        let mut manifest = Manifest::new(&pkg.name, &pkg.version, files.clone());
        if let Err(e) = manifest.save(&manifest_path) {
            deployment.rollback();
            return Err(e);
        }

        if let (Some(record), Some(old)) = (&previous, old_manifest) {
            let current: HashSet<&PathBuf> = files.iter().collect();
            let stale: Vec<PathBuf> = old
                .files
                .into_iter()
                .filter(|f| !current.contains(f))
                .collect();
            let failures = remove_files(&record.install_root, &stale);
            deploy::prune_empty_dirs(&record.install_root, &stale);

            // Stale files left on disk stay tracked so a later remove retries them
            if !failures.is_empty() {
                let failed: HashSet<&PathBuf> = failures.iter().map(|(path, _)| path).collect();
                for (path, reason) in &failures {
                    warn!("Could not remove stale file {} of {}: {}", path.display(), pkg, reason);
                }
                let leftover = stale
                    .iter()
                    .filter(|f| failed.contains(&record.install_root.join(f)));
                manifest.files.extend(leftover.cloned());
                manifest.files.sort();
                manifest.files.dedup();
                if let Err(e) = manifest.save(&manifest_path) {
                    warn!("Could not track stale files of {}: {}", pkg, e);
                }
            }
        }

        let mut record = InstalledRecord::new(
            package_id,
            pkg.name.clone(),
            pkg.version.clone(),
            self.options.install_root.clone(),
            manifest_path,
        );
        if let Err(e) = self.storage.record_install(&mut record) {
            error!("Files of {} are in place but could not be recorded: {}", pkg, e);
            return Err(e);
        }

        info!("Installed {}", pkg);
        Ok(())
    }

    /// Try each URL in order until one download succeeds
    fn download(&self, pkg: &Package, dest: &Path) -> Result<()> {
        let mut last_error = None;
        for url in &pkg.urls {
            match self.transports.fetch_str(url) {
                Ok(bytes) => {
                    fs::write(dest, &bytes).map_err(|e| Error::fs(dest, e))?;
                    debug!("Downloaded {} ({} bytes) from {}", pkg, bytes.len(), url);
                    return Ok(());
                }
                Err(e) => {
                    warn!("Download of {} from {} failed: {}", pkg, url, e);
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| Error::NoUrlsAvailable {
            package: pkg.to_string(),
        }))
    }

    fn remove_package(&self, package_id: i64) -> Result<()> {
        let pkg = self.storage.package(package_id)?;
        let record = self
            .storage
            .installed_record(&pkg.name)?
            .filter(|r| r.package_id == Some(package_id))
            .ok_or(Error::NotFound {
                entity: "Installed package",
                id: package_id,
            })?;
        self.remove_installed(&record)
    }

    /// Remove an install record's files, its manifest and finally the record
    ///
    /// Used directly for records whose package vanished upstream.
    pub fn remove_installed(&self, record: &InstalledRecord) -> Result<()> {
        let label = format!("{}-{}", record.name, record.version);
        let manifest = Manifest::load(&record.manifest_path).map_err(|e| {
            Error::RemoveIncomplete {
                package: label.clone(),
                failures: vec![(record.manifest_path.clone(), e.to_string())],
            }
        })?;

        let mut failures = remove_files(&record.install_root, &manifest.files);
        deploy::prune_empty_dirs(&record.install_root, &manifest.files);

        if failures.is_empty()
            && let Err(e) = fs::remove_file(&record.manifest_path)
            && e.kind() != io::ErrorKind::NotFound
        {
            failures.push((record.manifest_path.clone(), e.to_string()));
        }

        if !failures.is_empty() {
            warn!("Removal of {} left {} file(s) behind", label, failures.len());
            return Err(Error::RemoveIncomplete {
                package: label,
                failures,
            });
        }

        self.storage.delete_install(&record.name)?;
        info!("Removed {}", label);
        Ok(())
    }

    /// Manifests on disk with no matching install record
    ///
    /// These are left behind when files were copied but recording the
    /// install failed.
    pub fn unrecorded_installs(&self) -> Result<Vec<(PathBuf, Manifest)>> {
        let mut unrecorded = Vec::new();
        for (path, manifest) in Manifest::list(&self.options.manifests_dir)? {
            let recorded = self
                .storage
                .installed_record(&manifest.package)?
                .is_some_and(|r| r.version == manifest.version);
            if !recorded {
                unrecorded.push((path, manifest));
            }
        }
        Ok(unrecorded)
    }

    /// Create install records for every unrecorded manifest
    pub fn repair_unrecorded(&self) -> Result<Vec<InstalledRecord>> {
        let mut repaired = Vec::new();
        for (path, manifest) in self.unrecorded_installs()? {
            let package_id = self
                .storage
                .packages_by_name(&manifest.package)?
                .into_iter()
                .find(|p| p.version == manifest.version)
                .and_then(|p| p.id);

            let mut record = InstalledRecord {
                id: None,
                package_id,
                name: manifest.package.clone(),
                version: manifest.version.clone(),
                install_root: self.options.install_root.clone(),
                manifest_path: path,
                installed_at: chrono::Utc::now().to_rfc3339(),
            };
            self.storage.record_install(&mut record)?;
            info!("Recorded previously unrecorded install of {}-{}", record.name, record.version);
            repaired.push(record);
        }
        Ok(repaired)
    }
}

/// Delete files relative to `root`, collecting per-file failures
fn remove_files(root: &Path, files: &[PathBuf]) -> Vec<(PathBuf, String)> {
    let mut failures = Vec::new();
    for relative in files {
        let target = match deploy::safe_relative(relative) {
            Ok(rel) => root.join(rel),
            Err(e) => {
                failures.push((relative.clone(), e.to_string()));
                continue;
            }
        };
        match fs::remove_file(&target) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => failures.push((target, e.to_string())),
        }
    }
    failures
}
