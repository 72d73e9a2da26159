// src/db/models/package.rs

//! Package model - an installable unit advertised by a component
//!
//! Identity is `(component_id, name, version)` and never changes once the
//! row exists; size, description, tags, URLs and dependencies may be
//! refreshed by later syncs.

use super::dependency::Dependency;
use crate::error::Result;
use crate::events::PackageRef;
use crate::version::Version;
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::Serialize;
use std::fmt;
use strum_macros::{AsRefStr, Display, EnumString};

const COLUMNS: &str = "id, component_id, name, version, size, description";

/// Derived installation status of a package
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr, Serialize)]
#[strum(serialize_all = "kebab-case")]
pub enum PackageStatus {
    NotInstalled,
    Installed,
    Upgradable,
    Pending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Package {
    pub id: Option<i64>,
    pub component_id: i64,
    pub name: String,
    pub version: String,
    pub size: u64,
    pub description: Option<String>,
    /// Sorted and deduplicated
    pub tags: Vec<String>,
    /// Download locations, tried in order
    pub urls: Vec<String>,
    pub dependencies: Vec<Dependency>,
}

impl Package {
    pub fn new(component_id: i64, name: String, version: String) -> Self {
        Self {
            id: None,
            component_id,
            name,
            version,
            size: 0,
            description: None,
            tags: Vec::new(),
            urls: Vec::new(),
            dependencies: Vec::new(),
        }
    }

    pub fn set_tags<I: IntoIterator<Item = String>>(&mut self, tags: I) {
        let mut tags: Vec<String> = tags.into_iter().collect();
        tags.sort();
        tags.dedup();
        self.tags = tags;
    }

    pub fn parsed_version(&self) -> Result<Version> {
        Version::parse(&self.version)
    }

    pub fn to_ref(&self) -> PackageRef {
        PackageRef {
            id: self.id,
            name: self.name.clone(),
            version: self.version.clone(),
        }
    }

    /// Whether anything besides identity differs from `other`
    pub fn content_differs(&self, other: &Package) -> bool {
        self.size != other.size
            || self.description != other.description
            || self.tags != other.tags
            || self.urls != other.urls
            || self.dependencies.len() != other.dependencies.len()
            || self
                .dependencies
                .iter()
                .zip(&other.dependencies)
                .any(|(a, b)| !a.same_edge(b))
    }

    /// Insert the row together with tags, URLs and dependencies
    pub fn insert(&mut self, conn: &Connection) -> Result<i64> {
        conn.execute(
            "INSERT INTO packages (component_id, name, version, size, description)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                self.component_id,
                &self.name,
                &self.version,
                self.size as i64,
                &self.description,
            ],
        )?;

        let id = conn.last_insert_rowid();
        self.id = Some(id);
        self.insert_details(conn, id)?;
        Ok(id)
    }

    /// Overwrite mutable fields of an existing row with this package's
    pub fn replace_details(&mut self, conn: &Connection, id: i64) -> Result<()> {
        conn.execute(
            "UPDATE packages SET size = ?1, description = ?2 WHERE id = ?3",
            params![self.size as i64, &self.description, id],
        )?;
        conn.execute("DELETE FROM package_tags WHERE package_id = ?1", [id])?;
        conn.execute("DELETE FROM package_urls WHERE package_id = ?1", [id])?;
        Dependency::delete_by_package(conn, id)?;

        self.id = Some(id);
        self.insert_details(conn, id)
    }

    fn insert_details(&mut self, conn: &Connection, id: i64) -> Result<()> {
        for tag in &self.tags {
            conn.execute(
                "INSERT OR IGNORE INTO package_tags (package_id, tag) VALUES (?1, ?2)",
                params![id, tag],
            )?;
        }
        for (position, url) in self.urls.iter().enumerate() {
            conn.execute(
                "INSERT INTO package_urls (package_id, position, url) VALUES (?1, ?2, ?3)",
                params![id, position as i64, url],
            )?;
        }
        for dep in &mut self.dependencies {
            dep.insert(conn, id)?;
        }
        Ok(())
    }

    fn load_details(mut self, conn: &Connection) -> Result<Self> {
        let id = self.id.unwrap_or_default();

        let mut stmt =
            conn.prepare_cached("SELECT tag FROM package_tags WHERE package_id = ?1 ORDER BY tag")?;
        self.tags = stmt
            .query_map([id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;

        let mut stmt = conn.prepare_cached(
            "SELECT url FROM package_urls WHERE package_id = ?1 ORDER BY position",
        )?;
        self.urls = stmt
            .query_map([id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;

        self.dependencies = Dependency::find_by_package(conn, id)?;
        Ok(self)
    }

    pub fn find_by_id(conn: &Connection, id: i64) -> Result<Option<Self>> {
        let pkg = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM packages WHERE id = ?1"),
                [id],
                Self::from_row,
            )
            .optional()?;
        pkg.map(|p| p.load_details(conn)).transpose()
    }

    pub fn find_by_key(
        conn: &Connection,
        component_id: i64,
        name: &str,
        version: &str,
    ) -> Result<Option<Self>> {
        let pkg = conn
            .query_row(
                &format!(
                    "SELECT {COLUMNS} FROM packages
                     WHERE component_id = ?1 AND name = ?2 AND version = ?3"
                ),
                params![component_id, name, version],
                Self::from_row,
            )
            .optional()?;
        pkg.map(|p| p.load_details(conn)).transpose()
    }

    pub fn list_by_component(conn: &Connection, component_id: i64) -> Result<Vec<Self>> {
        Self::query_many(
            conn,
            &format!("SELECT {COLUMNS} FROM packages WHERE component_id = ?1 ORDER BY id"),
            params![component_id],
        )
    }

    pub fn list_by_name(conn: &Connection, name: &str) -> Result<Vec<Self>> {
        Self::query_many(
            conn,
            &format!("SELECT {COLUMNS} FROM packages WHERE name = ?1 ORDER BY id"),
            params![name],
        )
    }

    pub fn list_all(conn: &Connection) -> Result<Vec<Self>> {
        Self::query_many(
            conn,
            &format!("SELECT {COLUMNS} FROM packages ORDER BY id"),
            params![],
        )
    }

    fn query_many(conn: &Connection, sql: &str, args: impl rusqlite::Params) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(args, Self::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(|p| p.load_details(conn)).collect()
    }

    /// Delete a package row; tags, URLs and dependencies cascade
    pub fn delete(conn: &Connection, id: i64) -> Result<usize> {
        Ok(conn.execute("DELETE FROM packages WHERE id = ?1", [id])?)
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: Some(row.get(0)?),
            component_id: row.get(1)?,
            name: row.get(2)?,
            version: row.get(3)?,
            size: row.get::<_, i64>(4)?.max(0) as u64,
            description: row.get(5)?,
            tags: Vec::new(),
            urls: Vec::new(),
            dependencies: Vec::new(),
        })
    }
}

impl fmt::Display for Package {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.name, self.version)
    }
}
