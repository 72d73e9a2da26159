// src/processor/manifest.rs

//! Installed-file manifests
//!
//! One JSON document per installed package name, listing every file the
//! package placed under the install root (relative paths).

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub package: String,
    pub version: String,
    pub files: Vec<PathBuf>,
}

impl Manifest {
    pub fn new(package: impl Into<String>, version: impl Into<String>, files: Vec<PathBuf>) -> Self {
        Self {
            package: package.into(),
            version: version.into(),
            files,
        }
    }

    /// `<dir>/<name>.json`
    pub fn path_for(dir: &Path, name: &str) -> PathBuf {
        dir.join(format!("{name}.json"))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read(path).map_err(|e| Error::fs(path, e))?;
        serde_json::from_slice(&content).map_err(|e| Error::FileSystem {
            path: path.to_path_buf(),
            reason: format!("invalid manifest: {e}"),
        })
    }

    /// Write through a temporary file and rename into place
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::fs(parent, e))?;
        }
        let json = serde_json::to_vec_pretty(self).map_err(|e| Error::FileSystem {
            path: path.to_path_buf(),
            reason: format!("failed to serialize manifest: {e}"),
        })?;

        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, json).map_err(|e| Error::fs(&temp_path, e))?;
        fs::rename(&temp_path, path).map_err(|e| Error::fs(path, e))?;
        Ok(())
    }

    /// All manifests in `dir`; unreadable ones are skipped
    pub fn list(dir: &Path) -> Result<Vec<(PathBuf, Manifest)>> {
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut manifests = Vec::new();
        for entry in fs::read_dir(dir).map_err(|e| Error::fs(dir, e))? {
            let path = entry.map_err(|e| Error::fs(dir, e))?.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            match Self::load(&path) {
                Ok(manifest) => manifests.push((path, manifest)),
                Err(e) => tracing::warn!("Skipping unreadable manifest: {}", e),
            }
        }
        manifests.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(manifests)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_save_load_and_list() {
        let dir = TempDir::new().unwrap();
        let path = Manifest::path_for(dir.path(), "foo");
        let manifest = Manifest::new("foo", "1.0", vec![PathBuf::from("usr/bin/foo")]);
        manifest.save(&path).unwrap();

        assert_eq!(Manifest::load(&path).unwrap(), manifest);
        std::fs::write(dir.path().join("junk.json"), b"{").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();

        let listed = Manifest::list(dir.path()).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].1.package, "foo");
    }
}
