// src/db/storage.rs

//! Storage facade over the SQLite connection
//!
//! All access goes through one connection behind a mutex. Reads take the
//! lock for the duration of a query closure; writes additionally run inside
//! a transaction via [`Storage::write`], so a sync can apply each component
//! atomically while earlier components stay committed.

use super::models::{
    Component, Dependency, InstalledRecord, Package, PackageStatus, Repository, Setting,
};
use crate::error::{Error, Result};
use crate::version::Version;
use parking_lot::Mutex;
use rusqlite::{Connection, params};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::debug;

/// Outcome of an idempotent write keyed by natural key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Inserted(i64),
    Updated(i64),
    Unchanged(i64),
}

impl Upsert {
    pub fn id(&self) -> i64 {
        match *self {
            Upsert::Inserted(id) | Upsert::Updated(id) | Upsert::Unchanged(id) => id,
        }
    }

    pub fn is_change(&self) -> bool {
        !matches!(self, Upsert::Unchanged(_))
    }
}

/// Query filter for [`Storage::list_packages`]; empty fields match everything
#[derive(Debug, Clone, Default)]
pub struct PackageFilter {
    pub status: Option<PackageStatus>,
    pub tag: Option<String>,
    /// Case-insensitive substring of name, description or any tag
    pub text: Option<String>,
}

impl PackageFilter {
    pub fn matches(&self, pkg: &Package, status: PackageStatus) -> bool {
        if let Some(wanted) = self.status
            && wanted != status
        {
            return false;
        }
        if let Some(tag) = &self.tag
            && !pkg.tags.iter().any(|t| t == tag)
        {
            return false;
        }
        if let Some(text) = &self.text {
            let needle = text.to_lowercase();
            let hit = pkg.name.to_lowercase().contains(&needle)
                || pkg
                    .description
                    .as_deref()
                    .is_some_and(|d| d.to_lowercase().contains(&needle))
                || pkg.tags.iter().any(|t| t.to_lowercase().contains(&needle));
            if !hit {
                return false;
            }
        }
        true
    }
}

/// Writes available inside a [`Storage::write`] transaction
pub struct StorageWriter<'a> {
    conn: &'a Connection,
}

impl StorageWriter<'_> {
    pub fn connection(&self) -> &Connection {
        self.conn
    }

    /// Insert a repository by URL or refresh its descriptive metadata
    pub fn upsert_repository(&self, repo: &Repository) -> Result<Upsert> {
        match Repository::find_by_url(self.conn, &repo.url)? {
            None => {
                let mut repo = repo.clone();
                Ok(Upsert::Inserted(repo.insert(self.conn)?))
            }
            Some(existing) => {
                let id = existing.id.unwrap_or_default();
                if existing.metadata_differs(repo) {
                    repo.update_metadata(self.conn, id)?;
                    Ok(Upsert::Updated(id))
                } else {
                    Ok(Upsert::Unchanged(id))
                }
            }
        }
    }

    pub fn upsert_component(&self, repository_id: i64, name: &str) -> Result<Upsert> {
        match Component::find(self.conn, repository_id, name)? {
            Some(existing) => Ok(Upsert::Unchanged(existing.id.unwrap_or_default())),
            None => {
                let mut component = Component::new(repository_id, name.to_string());
                Ok(Upsert::Inserted(component.insert(self.conn)?))
            }
        }
    }

    /// Insert a package by `(component, name, version)` or refresh its details
    ///
    /// A newly inserted package re-attaches an orphaned install record with
    /// the same name and version.
    pub fn upsert_package(&self, pkg: &mut Package) -> Result<Upsert> {
        match Package::find_by_key(self.conn, pkg.component_id, &pkg.name, &pkg.version)? {
            None => {
                let id = pkg.insert(self.conn)?;
                let relinked = self.conn.execute(
                    "UPDATE installed SET package_id = ?1
                     WHERE name = ?2 AND version = ?3 AND package_id IS NULL",
                    params![id, &pkg.name, &pkg.version],
                )?;
                if relinked > 0 {
                    debug!("Re-attached install record for {}", pkg);
                }
                Ok(Upsert::Inserted(id))
            }
            Some(existing) => {
                let id = existing.id.unwrap_or_default();
                if existing.content_differs(pkg) {
                    pkg.replace_details(self.conn, id)?;
                    Ok(Upsert::Updated(id))
                } else {
                    pkg.id = Some(id);
                    Ok(Upsert::Unchanged(id))
                }
            }
        }
    }

    /// Delete a package row; an install record pointing at it is detached
    pub fn remove_package(&self, id: i64) -> Result<()> {
        if Package::delete(self.conn, id)? == 0 {
            return Err(Error::NotFound {
                entity: "Package",
                id,
            });
        }
        Ok(())
    }

    /// Delete a component and its packages, returning how many packages went
    pub fn remove_component(&self, id: i64) -> Result<usize> {
        let packages: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM packages WHERE component_id = ?1",
            [id],
            |row| row.get(0),
        )?;
        if Component::delete(self.conn, id)? == 0 {
            return Err(Error::NotFound {
                entity: "Component",
                id,
            });
        }
        Ok(packages as usize)
    }

    /// Stored components of a repository whose names are not in `names`
    pub fn components_missing_from(
        &self,
        repository_id: i64,
        names: &HashSet<String>,
    ) -> Result<Vec<Component>> {
        Ok(Component::list_by_repository(self.conn, repository_id)?
            .into_iter()
            .filter(|c| !names.contains(&c.name))
            .collect())
    }

    /// Stored packages of a component whose `(name, version)` is not in `keys`
    pub fn packages_missing_from(
        &self,
        component_id: i64,
        keys: &HashSet<(String, String)>,
    ) -> Result<Vec<Package>> {
        Ok(Package::list_by_component(self.conn, component_id)?
            .into_iter()
            .filter(|p| !keys.contains(&(p.name.clone(), p.version.clone())))
            .collect())
    }

    pub fn set_last_sync(&self, repository_id: i64) -> Result<()> {
        Repository::set_last_sync(self.conn, repository_id, &chrono::Utc::now().to_rfc3339())
    }

    pub fn record_install(&self, record: &mut InstalledRecord) -> Result<i64> {
        record.upsert(self.conn)
    }

    pub fn delete_install(&self, name: &str) -> Result<usize> {
        InstalledRecord::delete_by_name(self.conn, name)
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        Setting::set(self.conn, key, value)
    }
}

/// Durable store for repositories, packages and install records
pub struct Storage {
    conn: Mutex<Connection>,
}

impl Storage {
    /// Open (creating and migrating if needed) the database at `path`
    pub fn open(path: &Path) -> Result<Self> {
        super::init(path)?;
        let conn = super::open(path)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self {
            conn: Mutex::new(super::open_in_memory()?),
        })
    }

    /// Run a read-only closure against the connection
    pub fn read<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock();
        f(&conn)
    }

    /// Run `f` in one transaction; an error rolls back everything it wrote
    pub fn write<T>(&self, f: impl FnOnce(&StorageWriter<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.conn.lock();
        super::transaction(&mut conn, |tx| f(&StorageWriter { conn: &**tx }))
    }

    // -- repositories --------------------------------------------------------

    /// Register a repository URL; adding a known URL is a no-op
    pub fn add_repository(&self, url: &str) -> Result<Upsert> {
        self.write(|w| match Repository::find_by_url(w.conn, url)? {
            Some(existing) => Ok(Upsert::Unchanged(existing.id.unwrap_or_default())),
            None => {
                let mut repo = Repository::new(url.to_string());
                Ok(Upsert::Inserted(repo.insert(w.conn)?))
            }
        })
    }

    /// Remove a repository with all its components and packages
    pub fn remove_repository(&self, url: &str) -> Result<Repository> {
        self.write(|w| {
            let repo = Repository::find_by_url(w.conn, url)?.ok_or_else(|| {
                Error::UnknownRepository {
                    url: url.to_string(),
                }
            })?;
            Repository::delete(w.conn, repo.id.unwrap_or_default())?;
            Ok(repo)
        })
    }

    pub fn repository(&self, url: &str) -> Result<Option<Repository>> {
        self.read(|conn| Repository::find_by_url(conn, url))
    }

    pub fn repositories(&self) -> Result<Vec<Repository>> {
        self.read(Repository::list_all)
    }

    pub fn components(&self, repository_id: i64) -> Result<Vec<Component>> {
        self.read(|conn| Component::list_by_repository(conn, repository_id))
    }

    pub fn upsert_repository(&self, repo: &Repository) -> Result<Upsert> {
        self.write(|w| w.upsert_repository(repo))
    }

    pub fn upsert_component(&self, repository_id: i64, name: &str) -> Result<Upsert> {
        self.write(|w| w.upsert_component(repository_id, name))
    }

    pub fn upsert_package(&self, pkg: &mut Package) -> Result<Upsert> {
        self.write(|w| w.upsert_package(pkg))
    }

    pub fn remove_package(&self, id: i64) -> Result<()> {
        self.write(|w| w.remove_package(id))
    }

    // -- packages ------------------------------------------------------------

    pub fn package(&self, id: i64) -> Result<Package> {
        self.read(|conn| Package::find_by_id(conn, id))?
            .ok_or(Error::NotFound {
                entity: "Package",
                id,
            })
    }

    pub fn packages_by_name(&self, name: &str) -> Result<Vec<Package>> {
        self.read(|conn| Package::list_by_name(conn, name))
    }

    pub fn packages_in_component(&self, component_id: i64) -> Result<Vec<Package>> {
        self.read(|conn| Package::list_by_component(conn, component_id))
    }

    pub fn all_packages(&self) -> Result<Vec<Package>> {
        self.read(Package::list_all)
    }

    pub fn dependencies(&self, package_id: i64) -> Result<Vec<Dependency>> {
        self.read(|conn| Dependency::find_by_package(conn, package_id))
    }

    /// Packages with an edge of any kind pointing at `name`
    pub fn dependents(&self, name: &str) -> Result<Vec<(Package, Dependency)>> {
        self.read(|conn| {
            let mut out = Vec::new();
            for dep in Dependency::find_dependents(conn, name)? {
                if let Some(pkg) = Package::find_by_id(conn, dep.package_id)? {
                    out.push((pkg, dep));
                }
            }
            Ok(out)
        })
    }

    /// Distinct tags across all known packages
    pub fn tags(&self) -> Result<Vec<String>> {
        self.read(|conn| {
            let mut stmt = conn.prepare("SELECT DISTINCT tag FROM package_tags ORDER BY tag")?;
            let tags = stmt
                .query_map([], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            Ok(tags)
        })
    }

    /// Derived status of one package (never `Pending`; that is tracked in memory)
    pub fn package_status(&self, id: i64) -> Result<PackageStatus> {
        self.read(|conn| {
            let pkg = Package::find_by_id(conn, id)?.ok_or(Error::NotFound {
                entity: "Package",
                id,
            })?;
            let siblings = Package::list_by_name(conn, &pkg.name)?;
            let index = StatusIndex::build(conn, &siblings)?;
            Ok(index.status_of(&pkg))
        })
    }

    /// All packages matching `filter`, paired with their derived status
    pub fn list_packages(&self, filter: &PackageFilter) -> Result<Vec<(Package, PackageStatus)>> {
        self.read(|conn| {
            let packages = Package::list_all(conn)?;
            let index = StatusIndex::build(conn, &packages)?;
            Ok(packages
                .into_iter()
                .filter_map(|pkg| {
                    let status = index.status_of(&pkg);
                    filter.matches(&pkg, status).then_some((pkg, status))
                })
                .collect())
        })
    }

    /// Installed packages for which a strictly newer version is known,
    /// each paired with the newest candidate
    pub fn upgradable(&self) -> Result<Vec<(InstalledRecord, Package)>> {
        self.read(|conn| {
            let mut out = Vec::new();
            for record in InstalledRecord::list_all(conn)? {
                let candidates = Package::list_by_name(conn, &record.name)?;
                if let Some(best) = newest_above(&record.version, candidates) {
                    out.push((record, best));
                }
            }
            Ok(out)
        })
    }

    /// Hard dependency edges no known or installed package can satisfy
    pub fn unresolved_dependencies(&self) -> Result<Vec<(Package, Dependency)>> {
        self.read(|conn| {
            let mut available: HashMap<String, Vec<Version>> = HashMap::new();
            for pkg in Package::list_all(conn)? {
                if let Ok(v) = pkg.parsed_version() {
                    available.entry(pkg.name).or_default().push(v);
                }
            }
            for record in InstalledRecord::list_all(conn)? {
                if let Ok(v) = Version::parse(&record.version) {
                    available.entry(record.name).or_default().push(v);
                }
            }

            let mut out = Vec::new();
            for dep in Dependency::list_all(conn)? {
                if !dep.kind.is_hard() {
                    continue;
                }
                let constraint = dep.constraint().unwrap_or_default();
                let satisfied = available
                    .get(&dep.target_name)
                    .is_some_and(|vs| vs.iter().any(|v| constraint.satisfies(v)));
                if !satisfied && let Some(pkg) = Package::find_by_id(conn, dep.package_id)? {
                    out.push((pkg, dep));
                }
            }
            Ok(out)
        })
    }

    // -- install records -----------------------------------------------------

    pub fn installed_records(&self) -> Result<Vec<InstalledRecord>> {
        self.read(InstalledRecord::list_all)
    }

    pub fn installed_record(&self, name: &str) -> Result<Option<InstalledRecord>> {
        self.read(|conn| InstalledRecord::find_by_name(conn, name))
    }

    /// Install records whose package vanished upstream
    pub fn orphaned_installs(&self) -> Result<Vec<InstalledRecord>> {
        self.read(InstalledRecord::list_orphaned)
    }

    pub fn record_install(&self, record: &mut InstalledRecord) -> Result<i64> {
        self.write(|w| w.record_install(record))
    }

    pub fn delete_install(&self, name: &str) -> Result<usize> {
        self.write(|w| w.delete_install(name))
    }

    // -- settings ------------------------------------------------------------

    pub fn setting(&self, key: &str) -> Result<Option<String>> {
        self.read(|conn| Setting::get(conn, key))
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.write(|w| w.set_setting(key, value))
    }
}

/// Compare two stored version strings; unparsable versions sort as equal
pub(crate) fn compare_versions(a: &str, b: &str) -> Ordering {
    match (Version::parse(a), Version::parse(b)) {
        (Ok(a), Ok(b)) => a.compare(&b),
        _ => Ordering::Equal,
    }
}

/// Highest-versioned candidate strictly newer than `current` (ties: lowest id)
fn newest_above(current: &str, candidates: Vec<Package>) -> Option<Package> {
    candidates
        .into_iter()
        .filter(|p| compare_versions(&p.version, current) == Ordering::Greater)
        .min_by(|a, b| {
            compare_versions(&b.version, &a.version).then_with(|| a.id.cmp(&b.id))
        })
}

/// Precomputed install state used to derive package statuses
struct StatusIndex {
    installed: HashMap<String, InstalledRecord>,
    packages_by_name: HashMap<String, Vec<String>>,
}

impl StatusIndex {
    fn build(conn: &Connection, packages: &[Package]) -> Result<Self> {
        let installed = InstalledRecord::list_all(conn)?
            .into_iter()
            .map(|r| (r.name.clone(), r))
            .collect();
        let mut packages_by_name: HashMap<String, Vec<String>> = HashMap::new();
        for pkg in packages {
            packages_by_name
                .entry(pkg.name.clone())
                .or_default()
                .push(pkg.version.clone());
        }
        Ok(Self {
            installed,
            packages_by_name,
        })
    }

    fn status_of(&self, pkg: &Package) -> PackageStatus {
        match self.installed.get(&pkg.name) {
            Some(record) if record.package_id.is_some() && record.package_id == pkg.id => {
                let newer = self.packages_by_name.get(&pkg.name).is_some_and(|versions| {
                    versions
                        .iter()
                        .any(|v| compare_versions(v, &record.version) == Ordering::Greater)
                });
                if newer {
                    PackageStatus::Upgradable
                } else {
                    PackageStatus::Installed
                }
            }
            _ => PackageStatus::NotInstalled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::DependencyKind;

    fn seed(storage: &Storage) -> i64 {
        let repo_id = storage.add_repository("file:///srv/repo").unwrap().id();
        storage.upsert_component(repo_id, "main").unwrap().id()
    }

    fn pkg(component_id: i64, name: &str, version: &str) -> Package {
        let mut p = Package::new(component_id, name.to_string(), version.to_string());
        p.urls = vec![format!("file:///srv/repo/{name}-{version}.tar")];
        p
    }

    fn install(storage: &Storage, p: &Package) {
        let mut record = InstalledRecord::new(
            p.id.unwrap(),
            p.name.clone(),
            p.version.clone(),
            "/opt/root".into(),
            format!("/var/manifests/{}.json", p.name).into(),
        );
        storage.record_install(&mut record).unwrap();
    }

    #[test]
    fn test_upsert_outcomes() {
        let storage = Storage::in_memory().unwrap();
        let component_id = seed(&storage);

        let mut foo = pkg(component_id, "foo", "1.0");
        let first = storage.upsert_package(&mut foo).unwrap();
        assert!(matches!(first, Upsert::Inserted(_)));

        let mut again = pkg(component_id, "foo", "1.0");
        assert_eq!(storage.upsert_package(&mut again).unwrap(), Upsert::Unchanged(first.id()));

        let mut changed = pkg(component_id, "foo", "1.0");
        changed.size = 10;
        assert_eq!(storage.upsert_package(&mut changed).unwrap(), Upsert::Updated(first.id()));

        assert_eq!(storage.add_repository("file:///srv/repo").unwrap(), Upsert::Unchanged(1));
    }

    #[test]
    fn test_remove_missing_package_is_not_found() {
        let storage = Storage::in_memory().unwrap();
        let err = storage.remove_package(42).unwrap_err();
        assert!(matches!(err, Error::NotFound { entity: "Package", id: 42 }));
    }

    #[test]
    fn test_remove_unknown_repository() {
        let storage = Storage::in_memory().unwrap();
        let err = storage.remove_repository("http://nowhere").unwrap_err();
        assert_eq!(err.to_string(), "Unable to find repository with URL http://nowhere");
    }

    #[test]
    fn test_packages_missing_from() {
        let storage = Storage::in_memory().unwrap();
        let component_id = seed(&storage);
        storage.upsert_package(&mut pkg(component_id, "foo", "1.0")).unwrap();
        storage.upsert_package(&mut pkg(component_id, "bar", "2.0")).unwrap();

        let keys: HashSet<(String, String)> =
            [("foo".to_string(), "1.0".to_string())].into_iter().collect();
        let missing = storage
            .write(|w| w.packages_missing_from(component_id, &keys))
            .unwrap();
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].name, "bar");
    }

    #[test]
    fn test_status_and_upgradable() {
        let storage = Storage::in_memory().unwrap();
        let component_id = seed(&storage);

        let mut old = pkg(component_id, "foo", "1.0");
        storage.upsert_package(&mut old).unwrap();
        install(&storage, &old);
        assert_eq!(storage.package_status(old.id.unwrap()).unwrap(), PackageStatus::Installed);
        assert!(storage.upgradable().unwrap().is_empty());

        let mut new = pkg(component_id, "foo", "1.1");
        storage.upsert_package(&mut new).unwrap();
        assert_eq!(storage.package_status(old.id.unwrap()).unwrap(), PackageStatus::Upgradable);
        assert_eq!(storage.package_status(new.id.unwrap()).unwrap(), PackageStatus::NotInstalled);

        let upgradable = storage.upgradable().unwrap();
        assert_eq!(upgradable.len(), 1);
        assert_eq!(upgradable[0].1.version, "1.1");
    }

    #[test]
    fn test_orphan_and_relink() {
        let storage = Storage::in_memory().unwrap();
        let component_id = seed(&storage);

        let mut foo = pkg(component_id, "foo", "1.0");
        storage.upsert_package(&mut foo).unwrap();
        install(&storage, &foo);

        storage.remove_package(foo.id.unwrap()).unwrap();
        assert_eq!(storage.orphaned_installs().unwrap().len(), 1);

        let mut back = pkg(component_id, "foo", "1.0");
        storage.upsert_package(&mut back).unwrap();
        assert!(storage.orphaned_installs().unwrap().is_empty());
        assert_eq!(storage.package_status(back.id.unwrap()).unwrap(), PackageStatus::Installed);
    }

    #[test]
    fn test_unresolved_dependencies_ignore_soft_edges() {
        let storage = Storage::in_memory().unwrap();
        let component_id = seed(&storage);

        let mut bar = pkg(component_id, "bar", "2.0");
        bar.dependencies = vec![
            Dependency::new("foo".into(), Some(">=1.0".into()), DependencyKind::Requires),
            Dependency::new("docs".into(), None, DependencyKind::Recommends),
        ];
        storage.upsert_package(&mut bar).unwrap();

        let unresolved = storage.unresolved_dependencies().unwrap();
        assert_eq!(unresolved.len(), 1);
        assert_eq!(unresolved[0].1.target_name, "foo");

        storage.upsert_package(&mut pkg(component_id, "foo", "1.2")).unwrap();
        assert!(storage.unresolved_dependencies().unwrap().is_empty());
    }

    #[test]
    fn test_list_packages_filter() {
        let storage = Storage::in_memory().unwrap();
        let component_id = seed(&storage);

        let mut foo = pkg(component_id, "foo", "1.0");
        foo.set_tags(vec!["net".to_string()]);
        foo.description = Some("Network Tools".to_string());
        storage.upsert_package(&mut foo).unwrap();
        storage.upsert_package(&mut pkg(component_id, "bar", "2.0")).unwrap();

        let by_tag = storage
            .list_packages(&PackageFilter {
                tag: Some("net".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_tag.len(), 1);

        let by_text = storage
            .list_packages(&PackageFilter {
                text: Some("network".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_text[0].0.name, "foo");

        let installed = storage
            .list_packages(&PackageFilter {
                status: Some(PackageStatus::Installed),
                ..Default::default()
            })
            .unwrap();
        assert!(installed.is_empty());
        assert_eq!(storage.tags().unwrap(), vec!["net"]);
    }

    #[test]
    fn test_write_rolls_back_whole_closure() {
        let storage = Storage::in_memory().unwrap();
        let component_id = seed(&storage);

        let result: Result<()> = storage.write(|w| {
            w.upsert_package(&mut pkg(component_id, "foo", "1.0"))?;
            w.remove_package(9999)
        });
        assert!(result.is_err());
        assert!(storage.all_packages().unwrap().is_empty());
    }
}
