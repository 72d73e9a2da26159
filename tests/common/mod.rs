// tests/common/mod.rs

//! Shared fixtures for integration tests: on-disk repositories served over
//! `file://` URLs and a package manager rooted in a temporary directory.

#![allow(dead_code)]

use flate2::Compression;
use flate2::write::GzEncoder;
use pallet::config::NetworkSection;
use pallet::{CommandUnpacker, Config, PackageManager, TransportRegistry, Unpacker};
use serde_json::json;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use url::Url;

/// A package to publish in a fixture repository
#[derive(Debug, Clone)]
pub struct FixturePackage {
    pub name: String,
    pub version: String,
    /// `(name, constraint)` hard dependencies
    pub requires: Vec<(String, Option<String>)>,
    pub tags: Vec<String>,
    /// `(relative path, content)` payload files
    pub files: Vec<(String, String)>,
    /// Publish an archive the unpacker cannot read
    pub corrupt: bool,
}

impl FixturePackage {
    pub fn new(name: &str, version: &str) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            requires: Vec::new(),
            tags: Vec::new(),
            files: vec![(
                format!("usr/share/{name}/VERSION"),
                version.to_string(),
            )],
            corrupt: false,
        }
    }

    pub fn requires(mut self, name: &str, constraint: Option<&str>) -> Self {
        self.requires
            .push((name.to_string(), constraint.map(str::to_string)));
        self
    }

    pub fn tag(mut self, tag: &str) -> Self {
        self.tags.push(tag.to_string());
        self
    }

    pub fn file(mut self, path: &str, content: &str) -> Self {
        self.files.push((path.to_string(), content.to_string()));
        self
    }

    pub fn corrupt(mut self) -> Self {
        self.corrupt = true;
        self
    }

    fn archive_name(&self) -> String {
        format!("{}-{}.tar", self.name, self.version)
    }
}

fn gzip_json(path: &Path, value: &serde_json::Value) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(serde_json::to_vec(value).unwrap().as_slice())
        .unwrap();
    fs::write(path, encoder.finish().unwrap()).unwrap();
}

fn write_archive(path: &Path, pkg: &FixturePackage) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    if pkg.corrupt {
        fs::write(path, b"this is not a tar archive").unwrap();
        return;
    }
    let file = fs::File::create(path).unwrap();
    let mut builder = tar::Builder::new(file);
    for (name, content) in &pkg.files {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, name, content.as_bytes())
            .unwrap();
    }
    builder.finish().unwrap();
}

/// A repository on disk, reachable through a `file://` URL
pub struct FixtureRepo {
    dir: TempDir,
    url: String,
}

impl FixtureRepo {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let url = Url::from_directory_path(dir.path()).unwrap().to_string();
        Self { dir, url }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// (Re)write every descriptor and archive for `components`
    pub fn publish(&self, components: &[(&str, Vec<FixturePackage>)]) {
        let root = self.dir.path();
        let _ = fs::remove_dir_all(root.join("dists"));

        gzip_json(
            &root.join("repo.json.gz"),
            &json!({
                "name": "Fixture",
                "description": "Integration test repository",
                "long_description": "",
                "maintainer": {"name": "Tester", "email": "tester@example.org"},
                "components": components.iter().map(|(name, _)| *name).collect::<Vec<_>>(),
            }),
        );

        for (component, packages) in components {
            let dir = root.join("dists").join(component);
            let refs: Vec<_> = packages
                .iter()
                .map(|p| {
                    json!({
                        "id": p.name,
                        "version": p.version,
                        "location": format!("{}-{}.json.gz", p.name, p.version),
                    })
                })
                .collect();
            gzip_json(
                &dir.join("component.json.gz"),
                &json!({"name": component, "packages": refs}),
            );

            for pkg in packages {
                write_archive(&root.join("pool").join(pkg.archive_name()), pkg);
                let dependencies: Vec<_> = pkg
                    .requires
                    .iter()
                    .map(|(name, constraint)| {
                        json!({"name": name, "constraint": constraint, "kind": "requires"})
                    })
                    .collect();
                gzip_json(
                    &dir.join(format!("{}-{}.json.gz", pkg.name, pkg.version)),
                    &json!({
                        "id": pkg.name,
                        "version": pkg.version,
                        "size": 1024,
                        "description": format!("The {} package", pkg.name),
                        "tags": pkg.tags,
                        "dependencies": dependencies,
                        "urls": [format!("../../pool/{}", pkg.archive_name())],
                    }),
                );
            }
        }
    }
}

/// A package manager over a temporary data directory
pub struct TestEnv {
    pub dir: TempDir,
    pub manager: Arc<PackageManager>,
}

impl TestEnv {
    pub fn new() -> Self {
        Self::with_unpacker(Arc::new(CommandUnpacker::default()))
    }

    pub fn with_unpacker(unpacker: Arc<dyn Unpacker>) -> Self {
        let dir = TempDir::new().unwrap();
        let config = Config::with_data_dir(dir.path().join("data"));
        let transports = TransportRegistry::with_defaults(&NetworkSection::default()).unwrap();
        let manager = PackageManager::with_parts(config, transports, unpacker).unwrap();
        Self {
            dir,
            manager: Arc::new(manager),
        }
    }

    pub fn root(&self) -> PathBuf {
        self.manager.config().install_root.clone()
    }

    /// Id of the stored package `name-version`
    pub fn id_of(&self, name: &str, version: &str) -> i64 {
        self.manager
            .storage()
            .packages_by_name(name)
            .unwrap()
            .into_iter()
            .find(|p| p.version == version)
            .and_then(|p| p.id)
            .unwrap_or_else(|| panic!("{name}-{version} not in storage"))
    }

    /// Register and sync `repo`
    pub fn add_and_sync(&self, repo: &FixtureRepo) {
        self.manager.add_repository(repo.url()).unwrap();
        self.manager.sync_repository(repo.url()).unwrap();
    }

    /// Relative paths of every file under the install root
    pub fn root_files(&self) -> Vec<PathBuf> {
        let root = self.root();
        if !root.exists() {
            return Vec::new();
        }
        let mut files: Vec<PathBuf> = walkdir::WalkDir::new(&root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| !e.file_type().is_dir())
            .map(|e| e.path().strip_prefix(&root).unwrap().to_path_buf())
            .collect();
        files.sort();
        files
    }
}

/// Drain every event currently queued on `rx`
pub fn drain(rx: &mut tokio::sync::broadcast::Receiver<pallet::Event>) -> Vec<pallet::Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
