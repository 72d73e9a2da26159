// src/db/models/repository.rs

//! Repository model - remote package metadata sources

use crate::error::Result;
use rusqlite::{Connection, OptionalExtension, Row, params};

const COLUMNS: &str = "id, url, name, description, long_description, maintainer_name,
                       maintainer_email, last_sync";

/// A remote repository, unique by URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repository {
    pub id: Option<i64>,
    pub url: String,
    pub name: String,
    pub description: String,
    pub long_description: String,
    pub maintainer_name: String,
    pub maintainer_email: String,
    pub last_sync: Option<String>,
}

impl Repository {
    /// A repository known only by URL; metadata arrives with the first sync
    pub fn new(url: String) -> Self {
        Self {
            id: None,
            name: url.clone(),
            url,
            description: String::new(),
            long_description: String::new(),
            maintainer_name: String::new(),
            maintainer_email: String::new(),
            last_sync: None,
        }
    }

    pub fn insert(&mut self, conn: &Connection) -> Result<i64> {
        conn.execute(
            "INSERT INTO repositories (url, name, description, long_description,
                                       maintainer_name, maintainer_email, last_sync)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                &self.url,
                &self.name,
                &self.description,
                &self.long_description,
                &self.maintainer_name,
                &self.maintainer_email,
                &self.last_sync,
            ],
        )?;

        let id = conn.last_insert_rowid();
        self.id = Some(id);
        Ok(id)
    }

    pub fn find_by_id(conn: &Connection, id: i64) -> Result<Option<Self>> {
        let repo = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM repositories WHERE id = ?1"),
                [id],
                Self::from_row,
            )
            .optional()?;
        Ok(repo)
    }

    pub fn find_by_url(conn: &Connection, url: &str) -> Result<Option<Self>> {
        let repo = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM repositories WHERE url = ?1"),
                [url],
                Self::from_row,
            )
            .optional()?;
        Ok(repo)
    }

    pub fn list_all(conn: &Connection) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM repositories ORDER BY id"))?;
        let repos = stmt
            .query_map([], Self::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(repos)
    }

    /// Whether the descriptive fields differ from `other`
    pub fn metadata_differs(&self, other: &Repository) -> bool {
        self.name != other.name
            || self.description != other.description
            || self.long_description != other.long_description
            || self.maintainer_name != other.maintainer_name
            || self.maintainer_email != other.maintainer_email
    }

    /// Update descriptive metadata (URL is the identity and never changes)
    pub fn update_metadata(&self, conn: &Connection, id: i64) -> Result<()> {
        conn.execute(
            "UPDATE repositories SET name = ?1, description = ?2, long_description = ?3,
             maintainer_name = ?4, maintainer_email = ?5 WHERE id = ?6",
            params![
                &self.name,
                &self.description,
                &self.long_description,
                &self.maintainer_name,
                &self.maintainer_email,
                id,
            ],
        )?;
        Ok(())
    }

    pub fn set_last_sync(conn: &Connection, id: i64, timestamp: &str) -> Result<()> {
        conn.execute(
            "UPDATE repositories SET last_sync = ?1 WHERE id = ?2",
            params![timestamp, id],
        )?;
        Ok(())
    }

    /// Delete a repository; components and packages cascade
    pub fn delete(conn: &Connection, id: i64) -> Result<usize> {
        Ok(conn.execute("DELETE FROM repositories WHERE id = ?1", [id])?)
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: Some(row.get(0)?),
            url: row.get(1)?,
            name: row.get(2)?,
            description: row.get(3)?,
            long_description: row.get(4)?,
            maintainer_name: row.get(5)?,
            maintainer_email: row.get(6)?,
            last_sync: row.get(7)?,
        })
    }
}
