// src/manager/sync.rs

//! Merging a fetched repository into Storage
//!
//! Each component is applied in its own transaction. Components or packages
//! that failed to fetch keep whatever Storage already had for them; only
//! entities the repository stopped advertising are deleted.

use crate::cancel::CancelToken;
use crate::db::models::{Component, InstalledRecord, Package, Repository};
use crate::db::{Storage, StorageWriter, Upsert};
use crate::error::Result;
use crate::repository::{FetchedComponent, PackageInfo, RepoFetch};
use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Outcome of syncing one repository
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    pub repo: String,
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    /// Repository name, description or maintainer changed
    pub metadata_updated: bool,
    pub failed_components: usize,
    pub failed_packages: usize,
}

impl SyncSummary {
    pub fn has_changes(&self) -> bool {
        self.metadata_updated || self.added + self.updated + self.removed > 0
    }
}

#[derive(Debug, Default)]
struct Changes {
    added: usize,
    updated: usize,
    removed: usize,
    failed: usize,
}

/// Build the stored form of a fetched package
pub fn package_from_info(component_id: i64, info: &PackageInfo) -> Package {
    let mut pkg = Package::new(component_id, info.name.clone(), info.version.clone());
    pkg.size = info.size;
    pkg.description = info.description.clone();
    pkg.set_tags(info.tags.iter().cloned());
    pkg.urls = info.urls.clone();
    pkg.dependencies = info.dependencies.clone();
    pkg
}

/// Apply a fetch report for the repository with id `repository_id`
pub fn apply_fetch(
    storage: &Storage,
    repository_id: i64,
    fetch: &RepoFetch,
    cancel: &CancelToken,
) -> Result<SyncSummary> {
    let mut summary = SyncSummary {
        repo: fetch.url.clone(),
        ..SyncSummary::default()
    };

    let repo = Repository {
        id: Some(repository_id),
        url: fetch.url.clone(),
        name: fetch.repo.name.clone(),
        description: fetch.repo.description.clone(),
        long_description: fetch.repo.long_description.clone(),
        maintainer_name: fetch.repo.maintainer_name.clone(),
        maintainer_email: fetch.repo.maintainer_email.clone(),
        last_sync: None,
    };
    if let Upsert::Updated(_) = storage.upsert_repository(&repo)? {
        debug!("Refreshed metadata of {}", fetch.url);
        summary.metadata_updated = true;
    }

    for (name, result) in &fetch.components {
        cancel.check()?;
        let component = match result {
            Ok(component) => component,
            Err(_) => {
                summary.failed_components += 1;
                continue;
            }
        };
        // A failed write rolls back this component only
        let changes = match storage.write(|w| apply_component(w, repository_id, component)) {
            Ok(changes) => changes,
            Err(e) => {
                warn!("Could not store component {} of {}: {}", name, fetch.url, e);
                summary.failed_components += 1;
                continue;
            }
        };
        debug!(
            "Component {}: +{} ~{} -{}",
            name, changes.added, changes.updated, changes.removed
        );
        summary.added += changes.added;
        summary.updated += changes.updated;
        summary.removed += changes.removed;
        summary.failed_packages += changes.failed;
    }

    let advertised: HashSet<String> = fetch.repo.components.iter().cloned().collect();
    summary.removed += storage.write(|w| {
        let mut removed = 0;
        for component in w.components_missing_from(repository_id, &advertised)? {
            removed += remove_component(w, &component)?;
        }
        w.set_last_sync(repository_id)?;
        Ok(removed)
    })?;

    Ok(summary)
}

fn apply_component(
    w: &StorageWriter<'_>,
    repository_id: i64,
    component: &FetchedComponent,
) -> Result<Changes> {
    let component_id = w
        .upsert_component(repository_id, &component.info.name)?
        .id();
    let mut changes = Changes::default();

    for (_, result) in &component.packages {
        let Ok(info) = result else {
            changes.failed += 1;
            continue;
        };
        let mut pkg = package_from_info(component_id, info);
        match w.upsert_package(&mut pkg)? {
            Upsert::Inserted(_) => changes.added += 1,
            Upsert::Updated(_) => changes.updated += 1,
            Upsert::Unchanged(_) => {}
        }
    }

    let advertised: HashSet<(String, String)> = component
        .packages
        .iter()
        .map(|(r, _)| (r.name.clone(), r.version.clone()))
        .collect();
    for pkg in w.packages_missing_from(component_id, &advertised)? {
        let id = pkg.id.unwrap_or_default();
        note_orphan(w, &pkg)?;
        w.remove_package(id)?;
        changes.removed += 1;
    }

    Ok(changes)
}

fn remove_component(w: &StorageWriter<'_>, component: &Component) -> Result<usize> {
    let id = component.id.unwrap_or_default();
    for pkg in Package::list_by_component(w.connection(), id)? {
        note_orphan(w, &pkg)?;
    }
    info!("Component {} is no longer advertised", component.name);
    w.remove_component(id)
}

fn note_orphan(w: &StorageWriter<'_>, pkg: &Package) -> Result<()> {
    let Some(id) = pkg.id else { return Ok(()) };
    if InstalledRecord::find_by_package(w.connection(), id)?.is_some() {
        info!("{} vanished upstream and stays installed as an orphan", pkg);
    } else {
        debug!("Dropping vanished package {}", pkg);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{Dependency, DependencyKind};
    use crate::error::Error;
    use crate::repository::{ComponentInfo, PackageRefInfo, RepoInfo};

    fn info(name: &str, version: &str) -> PackageInfo {
        PackageInfo {
            name: name.into(),
            version: version.into(),
            size: 10,
            description: None,
            tags: vec!["util".into()],
            dependencies: vec![Dependency::new("libc".into(), None, DependencyKind::Requires)],
            urls: vec![format!("mem:/{name}-{version}.pkg")],
        }
    }

    fn reference(name: &str, version: &str) -> PackageRefInfo {
        PackageRefInfo {
            name: name.into(),
            version: version.into(),
            location: format!("{name}.json.gz"),
        }
    }

    fn component(name: &str, packages: Vec<(PackageRefInfo, Result<PackageInfo>)>) -> FetchedComponent {
        FetchedComponent {
            info: ComponentInfo {
                name: name.into(),
                packages: packages.iter().map(|(r, _)| r.clone()).collect(),
            },
            packages,
        }
    }

    fn fetch_components(components: Vec<FetchedComponent>) -> RepoFetch {
        RepoFetch {
            url: "mem:/repo".into(),
            repo: RepoInfo {
                name: "Test".into(),
                description: "d".into(),
                long_description: String::new(),
                maintainer_name: "m".into(),
                maintainer_email: "m@example.org".into(),
                components: components.iter().map(|c| c.info.name.clone()).collect(),
            },
            components: components
                .into_iter()
                .map(|c| (c.info.name.clone(), Ok(c)))
                .collect(),
        }
    }

    fn fetch(packages: Vec<(PackageRefInfo, Result<PackageInfo>)>) -> RepoFetch {
        fetch_components(vec![component("main", packages)])
    }

    #[test]
    fn test_resync_is_idempotent() {
        let storage = Storage::in_memory().unwrap();
        let repo_id = storage.add_repository("mem:/repo").unwrap().id();
        let report = fetch(vec![
            (reference("a", "1.0"), Ok(info("a", "1.0"))),
            (reference("b", "2.0"), Ok(info("b", "2.0"))),
        ]);
        let cancel = CancelToken::new();

        let first = apply_fetch(&storage, repo_id, &report, &cancel).unwrap();
        assert_eq!((first.added, first.updated, first.removed), (2, 0, 0));

        let second = apply_fetch(&storage, repo_id, &report, &cancel).unwrap();
        assert!(!second.has_changes());
        assert_eq!(storage.all_packages().unwrap().len(), 2);
        assert_eq!(storage.repository("mem:/repo").unwrap().unwrap().name, "Test");
    }

    #[test]
    fn test_failed_package_keeps_stored_copy() {
        let storage = Storage::in_memory().unwrap();
        let repo_id = storage.add_repository("mem:/repo").unwrap().id();
        let cancel = CancelToken::new();
        apply_fetch(
            &storage,
            repo_id,
            &fetch(vec![(reference("a", "1.0"), Ok(info("a", "1.0")))]),
            &cancel,
        )
        .unwrap();

        let broken = fetch(vec![(
            reference("a", "1.0"),
            Err(Error::NetworkFetch {
                url: "mem:/repo/a".into(),
                reason: "timeout".into(),
            }),
        )]);
        let summary = apply_fetch(&storage, repo_id, &broken, &cancel).unwrap();
        assert_eq!(summary.failed_packages, 1);
        assert_eq!(summary.removed, 0);
        assert_eq!(storage.packages_by_name("a").unwrap().len(), 1);
    }

    #[test]
    fn test_changed_and_vanished_packages_counted() {
        let storage = Storage::in_memory().unwrap();
        let repo_id = storage.add_repository("mem:/repo").unwrap().id();
        let cancel = CancelToken::new();
        apply_fetch(
            &storage,
            repo_id,
            &fetch(vec![
                (reference("a", "1.0"), Ok(info("a", "1.0"))),
                (reference("b", "1.0"), Ok(info("b", "1.0"))),
            ]),
            &cancel,
        )
        .unwrap();

        let mut bigger = info("a", "1.0");
        bigger.size = 99;
        let summary = apply_fetch(
            &storage,
            repo_id,
            &fetch(vec![(reference("a", "1.0"), Ok(bigger))]),
            &cancel,
        )
        .unwrap();
        assert_eq!((summary.added, summary.updated, summary.removed), (0, 1, 1));
        assert!(storage.packages_by_name("b").unwrap().is_empty());
        assert_eq!(storage.packages_by_name("a").unwrap()[0].size, 99);
    }

    #[test]
    fn test_failed_component_write_does_not_abort_sync() {
        let storage = Storage::in_memory().unwrap();
        let repo_id = storage.add_repository("mem:/repo").unwrap().id();
        storage
            .read(|conn| {
                conn.execute_batch(
                    "CREATE TRIGGER reject_poison BEFORE INSERT ON packages
                     WHEN NEW.name = 'poison'
                     BEGIN SELECT RAISE(ABORT, 'disk says no'); END;",
                )?;
                Ok(())
            })
            .unwrap();

        let report = fetch_components(vec![
            component(
                "a",
                vec![
                    (reference("fine", "1.0"), Ok(info("fine", "1.0"))),
                    (reference("poison", "1.0"), Ok(info("poison", "1.0"))),
                ],
            ),
            component("b", vec![(reference("good", "1.0"), Ok(info("good", "1.0")))]),
        ]);
        let summary = apply_fetch(&storage, repo_id, &report, &CancelToken::new()).unwrap();

        assert_eq!(summary.failed_components, 1);
        assert_eq!(summary.added, 1);
        assert_eq!(storage.packages_by_name("good").unwrap().len(), 1);
        // Component `a` rolled back as a whole
        assert!(storage.packages_by_name("fine").unwrap().is_empty());
        assert!(storage.repository("mem:/repo").unwrap().unwrap().last_sync.is_some());
    }

    #[test]
    fn test_metadata_only_change_counts_as_change() {
        let storage = Storage::in_memory().unwrap();
        let repo_id = storage.add_repository("mem:/repo").unwrap().id();
        let cancel = CancelToken::new();
        let mut report = fetch(vec![(reference("a", "1.0"), Ok(info("a", "1.0")))]);
        apply_fetch(&storage, repo_id, &report, &cancel).unwrap();

        report.repo.maintainer_email = "new@example.org".into();
        let summary = apply_fetch(&storage, repo_id, &report, &cancel).unwrap();
        assert!(summary.metadata_updated);
        assert!(summary.has_changes());
        assert_eq!((summary.added, summary.updated, summary.removed), (0, 0, 0));

        let again = apply_fetch(&storage, repo_id, &report, &cancel).unwrap();
        assert!(!again.has_changes());
    }

    #[test]
    fn test_cancelled_sync_stops_before_components() {
        let storage = Storage::in_memory().unwrap();
        let repo_id = storage.add_repository("mem:/repo").unwrap().id();
        let cancel = CancelToken::new();
        cancel.cancel();
        let report = fetch(vec![(reference("a", "1.0"), Ok(info("a", "1.0")))]);

        assert!(matches!(
            apply_fetch(&storage, repo_id, &report, &cancel),
            Err(Error::Cancelled)
        ));
        assert!(storage.all_packages().unwrap().is_empty());
    }
}
