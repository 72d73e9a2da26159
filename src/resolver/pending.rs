// src/resolver/pending.rs

//! Turn install/update/remove requests into an ordered operation list
//!
//! Resolution works on a snapshot of Storage: every known package with its
//! dependencies, and every install record. Either the whole request set
//! resolves or nothing is returned.

use super::graph::{DependencyGraph, Direction};
use super::plan::{OperationKind, PendingOperation};
use crate::db::Storage;
use crate::db::models::{Dependency, InstalledRecord, Package};
use crate::error::{Error, Result};
use crate::version::{Version, VersionConstraint};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, VecDeque};
use tracing::debug;

/// Package name -> selected package id
type Selection = BTreeMap<String, i64>;

struct Snapshot {
    packages: HashMap<i64, Package>,
    by_name: HashMap<String, Vec<i64>>,
    installed: HashMap<String, InstalledRecord>,
    /// Target name -> ids of packages with a hard edge to it
    dependents: HashMap<String, Vec<i64>>,
}

impl Snapshot {
    fn load(storage: &Storage) -> Result<Self> {
        let mut packages = HashMap::new();
        let mut by_name: HashMap<String, Vec<i64>> = HashMap::new();
        let mut dependents: HashMap<String, Vec<i64>> = HashMap::new();

        for pkg in storage.all_packages()? {
            let id = pkg.id.unwrap_or_default();
            by_name.entry(pkg.name.clone()).or_default().push(id);
            for dep in pkg.dependencies.iter().filter(|d| d.kind.is_hard()) {
                dependents.entry(dep.target_name.clone()).or_default().push(id);
            }
            packages.insert(id, pkg);
        }

        let installed = storage
            .installed_records()?
            .into_iter()
            .map(|r| (r.name.clone(), r))
            .collect();

        Ok(Self {
            packages,
            by_name,
            installed,
            dependents,
        })
    }

    fn package(&self, id: i64) -> Result<&Package> {
        self.packages.get(&id).ok_or(Error::NotFound {
            entity: "Package",
            id,
        })
    }

    /// Whether this exact package is the installed one for its name
    fn is_installed(&self, pkg: &Package) -> bool {
        self.installed
            .get(&pkg.name)
            .is_some_and(|r| r.package_id.is_some() && r.package_id == pkg.id)
    }

    /// Highest version of `name` meeting `constraint`; ties go to the lowest id
    fn best_candidate(&self, name: &str, constraint: &VersionConstraint) -> Result<Option<&Package>> {
        let mut best: Option<(&Package, Version)> = None;
        for id in self.by_name.get(name).map(Vec::as_slice).unwrap_or_default() {
            let pkg = self.package(*id)?;
            let version = pkg.parsed_version()?;
            if !constraint.satisfies(&version) {
                continue;
            }
            let better = match &best {
                None => true,
                Some((current, current_version)) => match version.compare(current_version) {
                    Ordering::Greater => true,
                    Ordering::Equal => pkg.id < current.id,
                    Ordering::Less => false,
                },
            };
            if better {
                best = Some((pkg, version));
            }
        }
        Ok(best.map(|(pkg, _)| pkg))
    }

    fn hard_dependencies<'a>(&self, pkg: &'a Package) -> impl Iterator<Item = &'a Dependency> {
        pkg.dependencies.iter().filter(|d| d.kind.is_hard())
    }
}

fn unsatisfied(pkg: &Package, dep: &Dependency) -> Error {
    Error::Dependency {
        package: pkg.to_string(),
        dependency: dep.describe(),
    }
}

fn check_conflicts(installs: &Selection, removals: &Selection) -> Result<()> {
    match installs.keys().find(|name| removals.contains_key(*name)) {
        Some(name) => Err(Error::ConflictingOperations {
            package: name.clone(),
        }),
        None => Ok(()),
    }
}

/// Resolves request sets against Storage
pub struct PendingManager<'a> {
    storage: &'a Storage,
}

impl<'a> PendingManager<'a> {
    pub fn new(storage: &'a Storage) -> Self {
        Self { storage }
    }

    /// Resolve `requests` into an ordered list of operations
    ///
    /// Removals come first (dependents before their dependencies), then
    /// installs and updates (dependencies before dependents). Ties are
    /// broken by ascending package id. Requests for something already in
    /// the requested state are dropped.
    pub fn resolve(&self, requests: &[(i64, OperationKind)]) -> Result<Vec<PendingOperation>> {
        let snap = Snapshot::load(self.storage)?;

        let mut requests = requests.to_vec();
        requests.sort();
        requests.dedup();

        let mut installs = Selection::new();
        let mut removals = Selection::new();

        for (id, kind) in requests {
            let pkg = snap.package(id)?;
            match kind {
                OperationKind::Install | OperationKind::Update => {
                    if snap.is_installed(pkg) {
                        debug!("{} is already installed, skipping", pkg);
                        continue;
                    }
                    if let Some(&other) = installs.get(&pkg.name)
                        && other != id
                    {
                        return Err(Error::ConflictingOperations {
                            package: pkg.name.clone(),
                        });
                    }
                    installs.insert(pkg.name.clone(), id);
                }
                OperationKind::Remove => {
                    if !snap.is_installed(pkg) {
                        return Err(Error::NotFound {
                            entity: "Installed package",
                            id,
                        });
                    }
                    removals.insert(pkg.name.clone(), id);
                }
            }
        }

        check_conflicts(&installs, &removals)?;
        Self::close_installs(&snap, &mut installs, &removals)?;
        Self::close_removals(&snap, &mut removals)?;
        check_conflicts(&installs, &removals)?;
        Self::verify_selection(&snap, &installs)?;
        Self::verify_installed_dependents(&snap, &installs, &removals)?;

        let mut operations = Vec::with_capacity(installs.len() + removals.len());
        for id in Self::ordered(&snap, &removals, Direction::DependentsFirst)? {
            let pkg = snap.package(id)?;
            operations.push(Self::operation(pkg, OperationKind::Remove, operations.len()));
        }
        for id in Self::ordered(&snap, &installs, Direction::DependenciesFirst)? {
            let pkg = snap.package(id)?;
            let kind = if snap.installed.contains_key(&pkg.name) {
                OperationKind::Update
            } else {
                OperationKind::Install
            };
            operations.push(Self::operation(pkg, kind, operations.len()));
        }

        debug!("Resolved {} operation(s)", operations.len());
        Ok(operations)
    }

    fn operation(pkg: &Package, kind: OperationKind, order_index: usize) -> PendingOperation {
        PendingOperation {
            package_id: pkg.id.unwrap_or_default(),
            kind,
            order_index,
            name: pkg.name.clone(),
            version: pkg.version.clone(),
            size: pkg.size,
        }
    }

    /// Pull in every hard dependency not already satisfied by an install
    fn close_installs(snap: &Snapshot, installs: &mut Selection, removals: &Selection) -> Result<()> {
        let mut queue: VecDeque<i64> = installs.values().copied().collect();

        while let Some(id) = queue.pop_front() {
            let pkg = snap.package(id)?;
            for dep in snap.hard_dependencies(pkg) {
                let constraint = dep.constraint()?;

                if let Some(&chosen) = installs.get(&dep.target_name) {
                    if !constraint.satisfies(&snap.package(chosen)?.parsed_version()?) {
                        return Err(unsatisfied(pkg, dep));
                    }
                    continue;
                }

                if !removals.contains_key(&dep.target_name)
                    && let Some(record) = snap.installed.get(&dep.target_name)
                    && constraint.satisfies(&Version::parse(&record.version)?)
                {
                    continue;
                }

                let candidate = snap
                    .best_candidate(&dep.target_name, &constraint)?
                    .ok_or_else(|| unsatisfied(pkg, dep))?;
                let candidate_id = candidate.id.unwrap_or_default();
                debug!("{} pulls in {}", pkg, candidate);
                installs.insert(candidate.name.clone(), candidate_id);
                queue.push_back(candidate_id);
            }
        }
        Ok(())
    }

    /// Add every installed package that hard-depends on something removed
    fn close_removals(snap: &Snapshot, removals: &mut Selection) -> Result<()> {
        let mut queue: VecDeque<String> = removals.keys().cloned().collect();

        while let Some(name) = queue.pop_front() {
            for &dependent_id in snap.dependents.get(&name).map(Vec::as_slice).unwrap_or_default() {
                let dependent = snap.package(dependent_id)?;
                if snap.is_installed(dependent) && !removals.contains_key(&dependent.name) {
                    debug!("Removing {} because it requires {}", dependent, name);
                    removals.insert(dependent.name.clone(), dependent_id);
                    queue.push_back(dependent.name.clone());
                }
            }
        }
        Ok(())
    }

    /// Every selected package's edges into the selection must hold
    fn verify_selection(snap: &Snapshot, installs: &Selection) -> Result<()> {
        for &id in installs.values() {
            let pkg = snap.package(id)?;
            for dep in snap.hard_dependencies(pkg) {
                if let Some(&chosen) = installs.get(&dep.target_name)
                    && !dep
                        .constraint()?
                        .satisfies(&snap.package(chosen)?.parsed_version()?)
                {
                    return Err(unsatisfied(pkg, dep));
                }
            }
        }
        Ok(())
    }

    /// An update must not break installed packages that stay as they are
    fn verify_installed_dependents(
        snap: &Snapshot,
        installs: &Selection,
        removals: &Selection,
    ) -> Result<()> {
        for (name, &id) in installs {
            if !snap.installed.contains_key(name) {
                continue;
            }
            let new_version = snap.package(id)?.parsed_version()?;

            for &dependent_id in snap.dependents.get(name).map(Vec::as_slice).unwrap_or_default() {
                let dependent = snap.package(dependent_id)?;
                if !snap.is_installed(dependent)
                    || installs.contains_key(&dependent.name)
                    || removals.contains_key(&dependent.name)
                {
                    continue;
                }
                for dep in snap
                    .hard_dependencies(dependent)
                    .filter(|d| &d.target_name == name)
                {
                    if !dep.constraint()?.satisfies(&new_version) {
                        return Err(unsatisfied(dependent, dep));
                    }
                }
            }
        }
        Ok(())
    }

    /// Order a selection by its hard edges within the selection
    fn ordered(snap: &Snapshot, selection: &Selection, direction: Direction) -> Result<Vec<i64>> {
        let mut graph = DependencyGraph::new();
        let mut ids: Vec<i64> = selection.values().copied().collect();
        ids.sort_unstable();

        for &id in &ids {
            graph.add_node(id, snap.package(id)?.name.clone());
        }
        for &id in &ids {
            let pkg = snap.package(id)?;
            let from = graph.add_node(id, pkg.name.clone());
            for dep in snap.hard_dependencies(pkg) {
                if let Some(&target) = selection.get(&dep.target_name) {
                    let to = graph.add_node(target, dep.target_name.clone());
                    graph.add_edge(from, to);
                }
            }
        }

        Ok(graph
            .order(direction)?
            .into_iter()
            .map(|node| graph.node(node).key)
            .collect())
    }
}
