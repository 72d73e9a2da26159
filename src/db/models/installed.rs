// src/db/models/installed.rs

//! InstalledRecord model - what is on disk and where its manifest lives
//!
//! One record per package name. `package_id` becomes NULL when the package
//! vanishes upstream; the record itself survives so the files stay tracked.

use crate::error::Result;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::PathBuf;

const COLUMNS: &str = "id, package_id, name, version, install_root, manifest_path, installed_at";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledRecord {
    pub id: Option<i64>,
    pub package_id: Option<i64>,
    pub name: String,
    pub version: String,
    pub install_root: PathBuf,
    pub manifest_path: PathBuf,
    pub installed_at: String,
}

impl InstalledRecord {
    pub fn new(
        package_id: i64,
        name: String,
        version: String,
        install_root: PathBuf,
        manifest_path: PathBuf,
    ) -> Self {
        Self {
            id: None,
            package_id: Some(package_id),
            name,
            version,
            install_root,
            manifest_path,
            installed_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Whether the package this was installed from is no longer advertised
    pub fn is_orphaned(&self) -> bool {
        self.package_id.is_none()
    }

    /// Insert, replacing any record for the same name (update path)
    pub fn upsert(&mut self, conn: &Connection) -> Result<i64> {
        conn.execute("DELETE FROM installed WHERE name = ?1", [&self.name])?;
        conn.execute(
            "INSERT INTO installed (package_id, name, version, install_root, manifest_path, installed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                self.package_id,
                &self.name,
                &self.version,
                self.install_root.to_string_lossy(),
                self.manifest_path.to_string_lossy(),
                &self.installed_at,
            ],
        )?;

        let id = conn.last_insert_rowid();
        self.id = Some(id);
        Ok(id)
    }

    pub fn find_by_name(conn: &Connection, name: &str) -> Result<Option<Self>> {
        let record = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM installed WHERE name = ?1"),
                [name],
                Self::from_row,
            )
            .optional()?;
        Ok(record)
    }

    pub fn find_by_package(conn: &Connection, package_id: i64) -> Result<Option<Self>> {
        let record = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM installed WHERE package_id = ?1"),
                [package_id],
                Self::from_row,
            )
            .optional()?;
        Ok(record)
    }

    pub fn list_all(conn: &Connection) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM installed ORDER BY name"))?;
        let records = stmt
            .query_map([], Self::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    pub fn list_orphaned(conn: &Connection) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM installed WHERE package_id IS NULL ORDER BY name"
        ))?;
        let records = stmt
            .query_map([], Self::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    pub fn delete_by_name(conn: &Connection, name: &str) -> Result<usize> {
        Ok(conn.execute("DELETE FROM installed WHERE name = ?1", [name])?)
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: Some(row.get(0)?),
            package_id: row.get(1)?,
            name: row.get(2)?,
            version: row.get(3)?,
            install_root: PathBuf::from(row.get::<_, String>(4)?),
            manifest_path: PathBuf::from(row.get::<_, String>(5)?),
            installed_at: row.get(6)?,
        })
    }
}
