// src/db/models/dependency.rs

//! Dependency model - edges from a package to a target package name

use crate::error::{Error, Result};
use crate::version::VersionConstraint;
use rusqlite::{Connection, Row, params};
use std::str::FromStr;
use strum_macros::{AsRefStr, Display, EnumString};

/// Hard dependencies must be satisfied; soft ones are advisory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum DependencyKind {
    Requires,
    Recommends,
}

impl DependencyKind {
    pub fn is_hard(&self) -> bool {
        matches!(self, DependencyKind::Requires)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub id: Option<i64>,
    pub package_id: i64,
    pub target_name: String,
    pub version_constraint: Option<String>,
    pub kind: DependencyKind,
}

impl Dependency {
    pub fn new(
        target_name: String,
        version_constraint: Option<String>,
        kind: DependencyKind,
    ) -> Self {
        Self {
            id: None,
            package_id: 0,
            target_name,
            version_constraint,
            kind,
        }
    }

    /// Parsed constraint; absent means any version
    pub fn constraint(&self) -> Result<VersionConstraint> {
        match &self.version_constraint {
            Some(c) => VersionConstraint::parse(c),
            None => Ok(VersionConstraint::any()),
        }
    }

    /// Human-readable form, e.g. `foo >= 1.0`
    pub fn describe(&self) -> String {
        match &self.version_constraint {
            Some(c) if !c.trim().is_empty() => {
                match VersionConstraint::parse(c) {
                    Ok(parsed) => format!("{} {}", self.target_name, parsed),
                    Err(_) => format!("{} {}", self.target_name, c),
                }
            }
            _ => self.target_name.clone(),
        }
    }

    /// Same edge, ignoring row and owner ids
    pub fn same_edge(&self, other: &Dependency) -> bool {
        self.target_name == other.target_name
            && self.version_constraint == other.version_constraint
            && self.kind == other.kind
    }

    pub fn insert(&mut self, conn: &Connection, package_id: i64) -> Result<i64> {
        self.package_id = package_id;
        conn.execute(
            "INSERT INTO dependencies (package_id, target_name, version_constraint, kind)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                package_id,
                &self.target_name,
                &self.version_constraint,
                self.kind.as_ref(),
            ],
        )?;

        let id = conn.last_insert_rowid();
        self.id = Some(id);
        Ok(id)
    }

    pub fn find_by_package(conn: &Connection, package_id: i64) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT id, package_id, target_name, version_constraint, kind
             FROM dependencies WHERE package_id = ?1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map([package_id], Self::raw_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(Self::from_raw).collect()
    }

    /// All edges pointing at `target_name` (reverse dependencies)
    pub fn find_dependents(conn: &Connection, target_name: &str) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT id, package_id, target_name, version_constraint, kind
             FROM dependencies WHERE target_name = ?1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map([target_name], Self::raw_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(Self::from_raw).collect()
    }

    pub fn list_all(conn: &Connection) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT id, package_id, target_name, version_constraint, kind
             FROM dependencies ORDER BY package_id, id",
        )?;
        let rows = stmt
            .query_map([], Self::raw_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(Self::from_raw).collect()
    }

    pub fn delete_by_package(conn: &Connection, package_id: i64) -> Result<()> {
        conn.execute("DELETE FROM dependencies WHERE package_id = ?1", [package_id])?;
        Ok(())
    }

    #[allow(clippy::type_complexity)]
    fn raw_row(row: &Row) -> rusqlite::Result<(i64, i64, String, Option<String>, String)> {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
    }

    fn from_raw(
        (id, package_id, target_name, version_constraint, kind): (
            i64,
            i64,
            String,
            Option<String>,
            String,
        ),
    ) -> Result<Self> {
        let kind = DependencyKind::from_str(&kind).map_err(|_| {
            Error::storage(
                format!("dependency {id}"),
                format!("Unknown dependency type `{kind}`"),
            )
        })?;
        Ok(Self {
            id: Some(id),
            package_id,
            target_name,
            version_constraint,
            kind,
        })
    }
}
