// src/db/mod.rs

//! Database layer: connection helpers, schema, models and the Storage facade

pub mod models;
pub mod schema;
mod storage;

pub use storage::{PackageFilter, Storage, StorageWriter, Upsert};

use crate::error::{Error, Result};
use rusqlite::{Connection, Transaction};
use std::path::Path;
use tracing::debug;

/// Create the database file (and parent directories) and apply migrations
pub fn init(db_path: &Path) -> Result<()> {
    if let Some(parent) = db_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|e| Error::fs(parent, e))?;
    }

    let conn = open(db_path)?;
    schema::migrate(&conn)?;
    debug!("Database initialized at {}", db_path.display());
    Ok(())
}

/// Open an existing database with the connection pragmas applied
pub fn open(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)
        .map_err(|e| Error::storage(format!("open {}", db_path.display()), e))?;
    configure(&conn)?;
    Ok(conn)
}

/// Open a private in-memory database with the schema applied
pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    configure(&conn)?;
    schema::migrate(&conn)?;
    Ok(conn)
}

fn configure(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "foreign_keys", "ON")?;
    // In-memory databases report "memory" and ignore WAL
    let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    Ok(())
}

/// Run `f` inside a transaction, committing on success and rolling back on error
pub fn transaction<T, F>(conn: &mut Connection, f: F) -> Result<T>
where
    F: FnOnce(&Transaction) -> Result<T>,
{
    let tx = conn.transaction()?;
    let value = f(&tx)?;
    tx.commit()?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_init_creates_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/state/pallet.db");
        init(&path).unwrap();
        assert!(path.exists());

        let conn = open(&path).unwrap();
        assert_eq!(schema::get_schema_version(&conn).unwrap(), schema::SCHEMA_VERSION);
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let mut conn = open_in_memory().unwrap();

        let result: Result<()> = transaction(&mut conn, |tx| {
            tx.execute("INSERT INTO settings (key, value) VALUES ('a', '1')", [])?;
            Err(Error::Cancelled)
        });
        assert!(result.is_err());

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM settings", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
