// src/repository/descriptor.rs

//! Repository, component and package descriptors
//!
//! Descriptors are JSON. They are deserialized into permissive raw structs
//! first and then validated field by field, so a missing field produces a
//! [`Error::Parse`] naming exactly what was absent.

use crate::db::models::{Dependency, DependencyKind};
use crate::error::{Error, Result};
use crate::version::{Version, VersionConstraint};
use serde::Deserialize;
use std::str::FromStr;
use url::Url;

/// Repository descriptor file, relative to the repository URL
pub const REPO_DESCRIPTOR: &str = "repo.json.gz";

/// Component descriptor file, relative to the component directory
pub const COMPONENT_DESCRIPTOR: &str = "component.json.gz";

/// Directory holding component subdirectories
pub const DISTS_DIR: &str = "dists";

#[derive(Debug, Deserialize)]
struct RawRepo {
    name: Option<String>,
    description: Option<String>,
    long_description: Option<String>,
    maintainer: Option<RawMaintainer>,
    components: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct RawMaintainer {
    name: Option<String>,
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawComponent {
    name: Option<String>,
    packages: Option<Vec<RawPackageRef>>,
}

#[derive(Debug, Deserialize)]
struct RawPackageRef {
    id: Option<String>,
    version: Option<String>,
    location: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawPackage {
    id: Option<String>,
    version: Option<String>,
    size: Option<u64>,
    description: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    dependencies: Vec<RawDependency>,
    urls: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct RawDependency {
    name: Option<String>,
    constraint: Option<String>,
    kind: Option<String>,
}

/// Validated repository descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoInfo {
    pub name: String,
    pub description: String,
    pub long_description: String,
    pub maintainer_name: String,
    pub maintainer_email: String,
    pub components: Vec<String>,
}

/// Validated component descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentInfo {
    pub name: String,
    pub packages: Vec<PackageRefInfo>,
}

/// A parsed component: its valid package entries plus the rejected ones
///
/// A rejected entry carries whatever fields it had, so its stored copy can
/// still be recognised.
#[derive(Debug)]
pub struct ParsedComponent {
    pub info: ComponentInfo,
    pub rejected: Vec<(PackageRefInfo, Error)>,
}

/// A package entry in a component listing
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PackageRefInfo {
    pub name: String,
    pub version: String,
    pub location: String,
}

/// Validated package descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageInfo {
    pub name: String,
    pub version: String,
    pub size: u64,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub dependencies: Vec<Dependency>,
    /// Absolute download URLs, in preference order
    pub urls: Vec<String>,
}

fn require(value: Option<String>, entity: &str, field: &str) -> Result<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(Error::Parse {
            entity: entity.to_string(),
            field: field.to_string(),
        }),
    }
}

fn decode<'a, T: Deserialize<'a>>(bytes: &'a [u8], entity: &str) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| Error::Parse {
        entity: entity.to_string(),
        field: format!("a valid descriptor ({e})"),
    })
}

fn check_version(version: &str, entity: &str) -> Result<()> {
    Version::parse(version).map(|_| ()).map_err(|_| Error::Parse {
        entity: entity.to_string(),
        field: "package version".to_string(),
    })
}

/// Parse the repository descriptor fetched from `repo_url`
pub fn parse_repo(bytes: &[u8], repo_url: &str) -> Result<RepoInfo> {
    let entity = format!("repository {repo_url}");
    let raw: RawRepo = decode(bytes, &entity)?;

    let name = require(raw.name, &entity, "repository name")?;
    let description = require(raw.description, &entity, "repository description")?;
    let maintainer = raw.maintainer.ok_or_else(|| Error::Parse {
        entity: entity.clone(),
        field: "maintainer name".to_string(),
    })?;
    let maintainer_name = require(maintainer.name, &entity, "maintainer name")?;
    let maintainer_email = require(maintainer.email, &entity, "maintainer email")?;
    let components = raw.components.ok_or_else(|| Error::Parse {
        entity: entity.clone(),
        field: "components".to_string(),
    })?;
    if components.iter().any(|c| c.trim().is_empty() || c.contains('/')) {
        return Err(Error::Parse {
            entity,
            field: "components".to_string(),
        });
    }

    Ok(RepoInfo {
        name,
        description,
        long_description: raw.long_description.unwrap_or_default(),
        maintainer_name,
        maintainer_email,
        components,
    })
}

/// Parse a component descriptor
///
/// Only a bad `name` or `packages` field fails the component; a bad
/// package entry is rejected on its own.
pub fn parse_component(bytes: &[u8], repo_url: &str, component: &str) -> Result<ParsedComponent> {
    let entity = format!("component {component} of {repo_url}");
    let raw: RawComponent = decode(bytes, &entity)?;

    let name = require(raw.name, &entity, "component name")?;
    let raw_packages = raw.packages.ok_or_else(|| Error::Parse {
        entity: entity.clone(),
        field: "packages".to_string(),
    })?;

    let mut packages = Vec::with_capacity(raw_packages.len());
    let mut rejected = Vec::new();
    for (index, entry) in raw_packages.into_iter().enumerate() {
        let seen = PackageRefInfo {
            name: entry.id.clone().unwrap_or_default(),
            version: entry.version.clone().unwrap_or_default(),
            location: entry.location.clone().unwrap_or_default(),
        };
        match parse_package_ref(entry, &entity, index) {
            Ok(reference) => packages.push(reference),
            Err(e) => rejected.push((seen, e)),
        }
    }

    Ok(ParsedComponent {
        info: ComponentInfo { name, packages },
        rejected,
    })
}

fn parse_package_ref(entry: RawPackageRef, component: &str, index: usize) -> Result<PackageRefInfo> {
    let entity = match entry.id.as_deref() {
        Some(id) if !id.trim().is_empty() => format!("package {id} in {component}"),
        _ => format!("package entry {index} in {component}"),
    };
    let name = require(entry.id, &entity, "package id")?;
    let version = require(entry.version, &entity, "package version")?;
    check_version(&version, &entity)?;
    let location = require(entry.location, &entity, "package location")?;
    Ok(PackageRefInfo {
        name,
        version,
        location,
    })
}

/// Parse a package descriptor; relative URLs are resolved against `base`
pub fn parse_package(bytes: &[u8], reference: &PackageRefInfo, base: &Url) -> Result<PackageInfo> {
    let entity = format!("package {}-{}", reference.name, reference.version);
    let raw: RawPackage = decode(bytes, &entity)?;

    let name = require(raw.id, &entity, "package id")?;
    let version = require(raw.version, &entity, "package version")?;
    if name != reference.name || version != reference.version {
        return Err(Error::Parse {
            entity,
            field: format!("matching package id (descriptor says {name}-{version})"),
        });
    }

    let size = raw.size.ok_or_else(|| Error::Parse {
        entity: entity.clone(),
        field: "package size".to_string(),
    })?;

    let mut dependencies = Vec::with_capacity(raw.dependencies.len());
    for dep in raw.dependencies {
        let target = require(dep.name, &entity, "dependency name")?;
        let kind = match dep.kind.as_deref() {
            None => DependencyKind::Requires,
            Some(kind) => DependencyKind::from_str(kind).map_err(|_| Error::Parse {
                entity: entity.clone(),
                field: format!("dependency type (Unknown dependency type `{kind}`)"),
            })?,
        };
        let constraint = dep.constraint.filter(|c| !c.trim().is_empty());
        if let Some(c) = &constraint {
            VersionConstraint::parse(c).map_err(|_| Error::Parse {
                entity: entity.clone(),
                field: format!("version constraint for {target}"),
            })?;
        }
        dependencies.push(Dependency::new(target, constraint, kind));
    }

    let mut urls = Vec::new();
    for url in raw.urls.unwrap_or_default() {
        let resolved = base.join(&url).map_err(|_| Error::Parse {
            entity: entity.clone(),
            field: format!("package URL `{url}`"),
        })?;
        urls.push(resolved.to_string());
    }

    let mut tags = raw.tags;
    tags.sort();
    tags.dedup();

    Ok(PackageInfo {
        name,
        version,
        size,
        description: raw.description.filter(|d| !d.is_empty()),
        tags,
        dependencies,
        urls,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPO: &str = r#"{
        "name": "Main",
        "description": "Main repository",
        "maintainer": {"name": "Ops", "email": "ops@example.org"},
        "components": ["core", "extra"]
    }"#;

    #[test]
    fn test_parse_repo() {
        let info = parse_repo(REPO.as_bytes(), "http://r").unwrap();
        assert_eq!(info.name, "Main");
        assert_eq!(info.components, vec!["core", "extra"]);
        assert!(info.long_description.is_empty());
    }

    #[test]
    fn test_missing_maintainer_email_is_named() {
        let json = r#"{"name":"x","description":"y","maintainer":{"name":"z"},"components":[]}"#;
        let err = parse_repo(json.as_bytes(), "http://r").unwrap_err();
        assert_eq!(err.to_string(), "Could not get maintainer email for repository http://r");
    }

    #[test]
    fn test_bad_package_entry_rejected_alone() {
        let json = r#"{"name":"core","packages":[
            {"id":"foo","version":"1.0","location":"foo.json"},
            {"id":"bad","version":"1.0"},
            {"version":"2.0","location":"x.json"}]}"#;
        let parsed = parse_component(json.as_bytes(), "http://r", "core").unwrap();

        assert_eq!(parsed.info.packages.len(), 1);
        assert_eq!(parsed.info.packages[0].name, "foo");
        assert_eq!(parsed.rejected.len(), 2);
        let (bad, err) = &parsed.rejected[0];
        assert_eq!((bad.name.as_str(), bad.version.as_str()), ("bad", "1.0"));
        assert_eq!(
            err.to_string(),
            "Could not get package location for package bad in component core of http://r"
        );
        assert!(matches!(&parsed.rejected[1].1, Error::Parse { field, .. } if field == "package id"));
    }

    #[test]
    fn test_component_without_packages_field_fails() {
        let json = r#"{"name":"core"}"#;
        let err = parse_component(json.as_bytes(), "http://r", "core").unwrap_err();
        assert!(matches!(err, Error::Parse { ref field, .. } if field == "packages"));
    }

    #[test]
    fn test_parse_package_resolves_urls_and_kinds() {
        let reference = PackageRefInfo {
            name: "bar".into(),
            version: "2.0".into(),
            location: "bar.json".into(),
        };
        let json = r#"{
            "id": "bar", "version": "2.0", "size": 10,
            "tags": ["b", "a", "b"],
            "dependencies": [
                {"name": "foo", "constraint": ">=1.0"},
                {"name": "docs", "kind": "recommends"}
            ],
            "urls": ["bar-2.0.tar", "https://mirror.example.org/bar-2.0.tar"]
        }"#;
        let base = Url::parse("http://r/dists/core/").unwrap();
        let info = parse_package(json.as_bytes(), &reference, &base).unwrap();

        assert_eq!(info.tags, vec!["a", "b"]);
        assert_eq!(info.urls[0], "http://r/dists/core/bar-2.0.tar");
        assert_eq!(info.urls[1], "https://mirror.example.org/bar-2.0.tar");
        assert_eq!(info.dependencies[0].kind, DependencyKind::Requires);
        assert_eq!(info.dependencies[1].kind, DependencyKind::Recommends);
    }

    #[test]
    fn test_unknown_dependency_kind_rejected() {
        let reference = PackageRefInfo {
            name: "bar".into(),
            version: "2.0".into(),
            location: "bar.json".into(),
        };
        let json = r#"{"id":"bar","version":"2.0","size":1,
                       "dependencies":[{"name":"foo","kind":"suggests"}]}"#;
        let base = Url::parse("http://r/dists/core/").unwrap();
        let err = parse_package(json.as_bytes(), &reference, &base).unwrap_err();
        assert!(err.to_string().contains("Unknown dependency type `suggests`"));
    }
}
