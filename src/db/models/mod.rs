// src/db/models/mod.rs

//! Data models for database entities
//!
//! Each struct mirrors a table and carries its own CRUD helpers.

mod component;
mod dependency;
mod installed;
mod package;
mod repository;
mod setting;

pub use component::Component;
pub use dependency::{Dependency, DependencyKind};
pub use installed::InstalledRecord;
pub use package::{Package, PackageStatus};
pub use repository::Repository;
pub use setting::Setting;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema;
    use rusqlite::Connection;

    fn create_test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute("PRAGMA foreign_keys = ON", []).unwrap();
        schema::migrate(&conn).unwrap();
        conn
    }

    fn seed_component(conn: &Connection) -> i64 {
        let mut repo = Repository::new("file:///srv/repo".to_string());
        let repo_id = repo.insert(conn).unwrap();
        Component::new(repo_id, "main".to_string()).insert(conn).unwrap()
    }

    #[test]
    fn test_package_roundtrip_with_details() {
        let conn = create_test_db();
        let component_id = seed_component(&conn);

        let mut pkg = Package::new(component_id, "bar".to_string(), "2.0".to_string());
        pkg.size = 4096;
        pkg.set_tags(vec!["net".to_string(), "cli".to_string(), "net".to_string()]);
        pkg.urls = vec!["http://b/bar.tar".to_string(), "http://a/bar.tar".to_string()];
        pkg.dependencies = vec![Dependency::new(
            "foo".to_string(),
            Some(">=1.0".to_string()),
            DependencyKind::Requires,
        )];
        let id = pkg.insert(&conn).unwrap();

        let loaded = Package::find_by_id(&conn, id).unwrap().unwrap();
        assert_eq!(loaded.tags, vec!["cli", "net"]);
        assert_eq!(loaded.urls, vec!["http://b/bar.tar", "http://a/bar.tar"]);
        assert_eq!(loaded.dependencies.len(), 1);
        assert_eq!(loaded.dependencies[0].describe(), "foo >= 1.0");
        assert!(!loaded.content_differs(&pkg));
    }

    #[test]
    fn test_package_identity_is_unique() {
        let conn = create_test_db();
        let component_id = seed_component(&conn);

        Package::new(component_id, "foo".into(), "1.0".into())
            .insert(&conn)
            .unwrap();
        let dup = Package::new(component_id, "foo".into(), "1.0".into()).insert(&conn);
        assert!(dup.is_err());
    }

    #[test]
    fn test_installed_record_survives_package_delete() {
        let conn = create_test_db();
        let component_id = seed_component(&conn);
        let pkg_id = Package::new(component_id, "foo".into(), "1.0".into())
            .insert(&conn)
            .unwrap();

        InstalledRecord::new(
            pkg_id,
            "foo".into(),
            "1.0".into(),
            "/opt/root".into(),
            "/var/manifests/foo.json".into(),
        )
        .upsert(&conn)
        .unwrap();

        Package::delete(&conn, pkg_id).unwrap();

        let record = InstalledRecord::find_by_name(&conn, "foo").unwrap().unwrap();
        assert!(record.is_orphaned());
        assert_eq!(InstalledRecord::list_orphaned(&conn).unwrap().len(), 1);
    }

    #[test]
    fn test_dependency_kind_strings() {
        assert_eq!(DependencyKind::Requires.as_ref(), "requires");
        assert_eq!("recommends".parse::<DependencyKind>().unwrap(), DependencyKind::Recommends);
        assert!("conflicts".parse::<DependencyKind>().is_err());
        assert_eq!(PackageStatus::NotInstalled.to_string(), "not-installed");
    }

    #[test]
    fn test_settings_overwrite() {
        let conn = create_test_db();
        assert_eq!(Setting::get(&conn, "k").unwrap(), None);
        Setting::set(&conn, "k", "a").unwrap();
        Setting::set(&conn, "k", "b").unwrap();
        assert_eq!(Setting::get(&conn, "k").unwrap().as_deref(), Some("b"));
    }
}
