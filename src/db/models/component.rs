// src/db/models/component.rs

//! Component model - named package groupings inside a repository

use crate::error::Result;
use rusqlite::{Connection, OptionalExtension, Row, params};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Component {
    pub id: Option<i64>,
    pub repository_id: i64,
    pub name: String,
}

impl Component {
    pub fn new(repository_id: i64, name: String) -> Self {
        Self {
            id: None,
            repository_id,
            name,
        }
    }

    pub fn insert(&mut self, conn: &Connection) -> Result<i64> {
        conn.execute(
            "INSERT INTO components (repository_id, name) VALUES (?1, ?2)",
            params![self.repository_id, &self.name],
        )?;

        let id = conn.last_insert_rowid();
        self.id = Some(id);
        Ok(id)
    }

    pub fn find(conn: &Connection, repository_id: i64, name: &str) -> Result<Option<Self>> {
        let component = conn
            .query_row(
                "SELECT id, repository_id, name FROM components
                 WHERE repository_id = ?1 AND name = ?2",
                params![repository_id, name],
                Self::from_row,
            )
            .optional()?;
        Ok(component)
    }

    pub fn find_by_id(conn: &Connection, id: i64) -> Result<Option<Self>> {
        let component = conn
            .query_row(
                "SELECT id, repository_id, name FROM components WHERE id = ?1",
                [id],
                Self::from_row,
            )
            .optional()?;
        Ok(component)
    }

    pub fn list_by_repository(conn: &Connection, repository_id: i64) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT id, repository_id, name FROM components
             WHERE repository_id = ?1 ORDER BY name",
        )?;
        let components = stmt
            .query_map([repository_id], Self::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(components)
    }

    /// Delete a component; its packages cascade
    pub fn delete(conn: &Connection, id: i64) -> Result<usize> {
        Ok(conn.execute("DELETE FROM components WHERE id = ?1", [id])?)
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: Some(row.get(0)?),
            repository_id: row.get(1)?,
            name: row.get(2)?,
        })
    }
}
