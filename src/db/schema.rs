// src/db/schema.rs

//! Database schema definitions and migrations
//!
//! Schema versions are applied in order and recorded in `schema_version`.

use crate::error::{Error, Result};
use rusqlite::Connection;
use tracing::{debug, info};

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

fn init_schema_version(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;
    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> Result<i32> {
    init_schema_version(conn)?;

    let version: Option<i32> = conn.query_row(
        "SELECT MAX(version) FROM schema_version",
        [],
        |row| row.get(0),
    )?;

    Ok(version.unwrap_or(0))
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    Ok(())
}

/// Apply all pending migrations to bring the database up to date
pub fn migrate(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;
    debug!("Current schema version: {}", current_version);

    if current_version >= SCHEMA_VERSION {
        return Ok(());
    }

    for version in (current_version + 1)..=SCHEMA_VERSION {
        info!("Applying migration to version {}", version);
        apply_migration(conn, version)?;
        set_schema_version(conn, version)?;
    }

    Ok(())
}

fn apply_migration(conn: &Connection, version: i32) -> Result<()> {
    match version {
        1 => migrate_v1(conn),
        _ => Err(Error::storage(
            "migration",
            format!("unknown schema version {version}"),
        )),
    }
}

/// Initial schema
///
/// - repositories / components / packages: synced metadata
/// - package_tags / package_urls: per-package sets and ordered lists
/// - dependencies: package -> target name edges
/// - installed: install records, surviving upstream removal of the package
/// - settings: scheduler and misc key/value state
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE repositories (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            url TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            long_description TEXT NOT NULL DEFAULT '',
            maintainer_name TEXT NOT NULL DEFAULT '',
            maintainer_email TEXT NOT NULL DEFAULT '',
            last_sync TEXT,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );

        CREATE TABLE components (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            repository_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            UNIQUE(repository_id, name),
            FOREIGN KEY (repository_id) REFERENCES repositories(id) ON DELETE CASCADE
        );

        CREATE TABLE packages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            component_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            version TEXT NOT NULL,
            size INTEGER NOT NULL DEFAULT 0,
            description TEXT,
            UNIQUE(component_id, name, version),
            FOREIGN KEY (component_id) REFERENCES components(id) ON DELETE CASCADE
        );

        CREATE INDEX idx_packages_name ON packages(name);

        CREATE TABLE package_tags (
            package_id INTEGER NOT NULL,
            tag TEXT NOT NULL,
            PRIMARY KEY (package_id, tag),
            FOREIGN KEY (package_id) REFERENCES packages(id) ON DELETE CASCADE
        );

        CREATE INDEX idx_package_tags_tag ON package_tags(tag);

        CREATE TABLE package_urls (
            package_id INTEGER NOT NULL,
            position INTEGER NOT NULL,
            url TEXT NOT NULL,
            PRIMARY KEY (package_id, position),
            FOREIGN KEY (package_id) REFERENCES packages(id) ON DELETE CASCADE
        );

        CREATE TABLE dependencies (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            package_id INTEGER NOT NULL,
            target_name TEXT NOT NULL,
            version_constraint TEXT,
            kind TEXT NOT NULL CHECK(kind IN ('requires', 'recommends')),
            FOREIGN KEY (package_id) REFERENCES packages(id) ON DELETE CASCADE
        );

        CREATE INDEX idx_dependencies_package ON dependencies(package_id);
        CREATE INDEX idx_dependencies_target ON dependencies(target_name);

        CREATE TABLE installed (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            package_id INTEGER UNIQUE,
            name TEXT NOT NULL UNIQUE,
            version TEXT NOT NULL,
            install_root TEXT NOT NULL,
            manifest_path TEXT NOT NULL,
            installed_at TEXT NOT NULL,
            FOREIGN KEY (package_id) REFERENCES packages(id) ON DELETE SET NULL
        );

        CREATE TABLE settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        ",
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrate_creates_all_tables() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap();

        for expected in [
            "components",
            "dependencies",
            "installed",
            "package_tags",
            "package_urls",
            "packages",
            "repositories",
            "settings",
        ] {
            assert!(tables.iter().any(|t| t == expected), "missing table {expected}");
        }
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_migrate_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        migrate(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_dependency_kind_checked() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        conn.execute_batch(
            "INSERT INTO repositories (url, name) VALUES ('file:///r', 'r');
             INSERT INTO components (repository_id, name) VALUES (1, 'main');
             INSERT INTO packages (component_id, name, version) VALUES (1, 'foo', '1.0');",
        )
        .unwrap();

        let result = conn.execute(
            "INSERT INTO dependencies (package_id, target_name, kind) VALUES (1, 'bar', 'conflicts')",
            [],
        );
        assert!(result.is_err());
    }
}
