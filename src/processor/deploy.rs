// src/processor/deploy.rs

//! Copying a staged tree into the install root, with rollback
//!
//! Every file that would be overwritten is first moved into a backup area
//! inside the staging directory. Until [`Deployment`] is dropped after a
//! successful commit, [`Deployment::rollback`] can delete what was copied
//! and put the backups back.

use crate::error::{Error, Result};
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Normalise a package-relative path, rejecting anything that could escape
/// the install root
pub fn safe_relative(path: &Path) -> Result<PathBuf> {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(c) => normalized.push(c),
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
            Component::ParentDir => {
                warn!("Path traversal attempt detected: {}", path.display());
                return Err(Error::FileSystem {
                    path: path.to_path_buf(),
                    reason: "path traversal detected".to_string(),
                });
            }
        }
    }

    if normalized.as_os_str().is_empty() {
        return Err(Error::FileSystem {
            path: path.to_path_buf(),
            reason: "empty path after normalization".to_string(),
        });
    }
    Ok(normalized)
}

/// Relative paths of every file and symlink under `staged`, sorted
pub fn collect_files(staged: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(staged).follow_links(false) {
        let entry = entry.map_err(|e| Error::FileSystem {
            path: staged.to_path_buf(),
            reason: e.to_string(),
        })?;
        if entry.file_type().is_dir() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(staged)
            .map_err(|e| Error::FileSystem {
                path: entry.path().to_path_buf(),
                reason: e.to_string(),
            })?;
        files.push(safe_relative(relative)?);
    }
    files.sort();
    Ok(files)
}

/// Move a file, falling back to copy and delete across filesystems
fn move_file(src: &Path, dst: &Path) -> io::Result<()> {
    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(_) => {
            copy_entry(src, dst)?;
            fs::remove_file(src)
        }
    }
}

/// Copy a regular file or recreate a symlink
fn copy_entry(src: &Path, dst: &Path) -> io::Result<()> {
    let meta = fs::symlink_metadata(src)?;
    if meta.file_type().is_symlink() {
        let target = fs::read_link(src)?;
        #[cfg(unix)]
        {
            std::os::unix::fs::symlink(target, dst)
        }
        #[cfg(not(unix))]
        {
            let _ = target;
            Err(io::Error::new(io::ErrorKind::Unsupported, "symlinks not supported"))
        }
    } else {
        fs::copy(src, dst).map(|_| ())
    }
}

/// An in-progress copy of one package's files into the install root
#[derive(Debug)]
pub struct Deployment {
    root: PathBuf,
    backup_dir: PathBuf,
    /// Absolute paths written by this deployment
    copied: Vec<PathBuf>,
    /// (target, backup) for every overwritten file
    backups: Vec<(PathBuf, PathBuf)>,
    /// Directories this deployment created, outermost first
    created_dirs: Vec<PathBuf>,
}

impl Deployment {
    pub fn new(root: &Path, backup_dir: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            backup_dir: backup_dir.to_path_buf(),
            copied: Vec::new(),
            backups: Vec::new(),
            created_dirs: Vec::new(),
        }
    }

    pub fn target(&self, relative: &Path) -> Result<PathBuf> {
        Ok(self.root.join(safe_relative(relative)?))
    }

    /// Copy every relative path in `files` from `staged` into the root
    pub fn copy_all(&mut self, staged: &Path, files: &[PathBuf]) -> Result<()> {
        for relative in files {
            self.copy_one(&staged.join(relative), relative)?;
        }
        debug!("Copied {} files into {}", files.len(), self.root.display());
        Ok(())
    }

    fn copy_one(&mut self, from: &Path, relative: &Path) -> Result<()> {
        let to = self.target(relative)?;
        let copy_err = |reason: String| Error::Copy {
            from: from.to_path_buf(),
            to: to.clone(),
            reason,
        };

        if let Some(parent) = to.parent() {
            self.create_parents(parent).map_err(|e| copy_err(e.to_string()))?;
        }

        if let Ok(meta) = fs::symlink_metadata(&to) {
            if meta.is_dir() {
                return Err(copy_err("a directory exists at the target path".to_string()));
            }
            let backup = self.backup_dir.join(relative);
            if let Some(parent) = backup.parent() {
                fs::create_dir_all(parent).map_err(|e| copy_err(format!("backup failed: {e}")))?;
            }
            move_file(&to, &backup).map_err(|e| copy_err(format!("backup failed: {e}")))?;
            self.backups.push((to.clone(), backup));
        }

        copy_entry(from, &to).map_err(|e| copy_err(e.to_string()))?;
        self.copied.push(to);
        Ok(())
    }

    fn create_parents(&mut self, dir: &Path) -> io::Result<()> {
        let mut missing: Vec<PathBuf> = dir
            .ancestors()
            .take_while(|p| !p.as_os_str().is_empty() && fs::symlink_metadata(p).is_err())
            .map(Path::to_path_buf)
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        fs::create_dir_all(dir)?;
        missing.reverse();
        self.created_dirs.extend(missing);
        Ok(())
    }

    /// Undo everything: delete copied files, restore backups, drop new dirs
    pub fn rollback(&mut self) {
        for path in self.copied.drain(..).rev() {
            if let Err(e) = fs::remove_file(&path)
                && e.kind() != io::ErrorKind::NotFound
            {
                warn!("Rollback could not remove {}: {}", path.display(), e);
            }
        }
        for (target, backup) in self.backups.drain(..).rev() {
            if let Err(e) = move_file(&backup, &target) {
                warn!(
                    "Rollback could not restore {} from {}: {}",
                    target.display(),
                    backup.display(),
                    e
                );
            }
        }
        for dir in self.created_dirs.drain(..).rev() {
            let _ = fs::remove_dir(&dir);
        }
    }
}

/// Remove now-empty parent directories of `files`, deepest first
///
/// Stops at `root`; a directory that is not empty is simply left alone.
pub fn prune_empty_dirs(root: &Path, files: &[PathBuf]) {
    let mut dirs: Vec<PathBuf> = files
        .iter()
        .flat_map(|f| f.ancestors().skip(1).map(Path::to_path_buf).collect::<Vec<_>>())
        .filter(|d| !d.as_os_str().is_empty())
        .collect();
    dirs.sort();
    dirs.dedup();
    dirs.sort_by_key(|d| std::cmp::Reverse(d.components().count()));

    for dir in dirs {
        let _ = fs::remove_dir(root.join(dir));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_safe_relative() {
        assert_eq!(safe_relative(Path::new("/usr/./bin/x")).unwrap(), PathBuf::from("usr/bin/x"));
        assert!(safe_relative(Path::new("usr/../../etc/passwd")).is_err());
        assert!(safe_relative(Path::new("/")).is_err());
    }

    #[test]
    fn test_rollback_restores_backups_and_removes_new_dirs() {
        let tmp = TempDir::new().unwrap();
        let staged = tmp.path().join("staged");
        let root = tmp.path().join("root");
        std::fs::create_dir_all(staged.join("etc")).unwrap();
        std::fs::create_dir_all(staged.join("opt/tool")).unwrap();
        std::fs::write(staged.join("etc/app.conf"), "new").unwrap();
        std::fs::write(staged.join("opt/tool/run"), "bin").unwrap();
        std::fs::create_dir_all(root.join("etc")).unwrap();
        std::fs::write(root.join("etc/app.conf"), "old").unwrap();

        let files = collect_files(&staged).unwrap();
        assert_eq!(files, vec![PathBuf::from("etc/app.conf"), PathBuf::from("opt/tool/run")]);

        let mut deployment = Deployment::new(&root, &tmp.path().join("backup"));
        deployment.copy_all(&staged, &files).unwrap();
        assert_eq!(std::fs::read_to_string(root.join("etc/app.conf")).unwrap(), "new");

        deployment.rollback();
        assert_eq!(std::fs::read_to_string(root.join("etc/app.conf")).unwrap(), "old");
        assert!(!root.join("opt").exists());
    }

    #[test]
    fn test_directory_in_the_way_is_copy_error() {
        let tmp = TempDir::new().unwrap();
        let staged = tmp.path().join("staged");
        let root = tmp.path().join("root");
        std::fs::create_dir_all(&staged).unwrap();
        std::fs::write(staged.join("data"), "x").unwrap();
        std::fs::create_dir_all(root.join("data/inner")).unwrap();

        let mut deployment = Deployment::new(&root, &tmp.path().join("backup"));
        let err = deployment
            .copy_all(&staged, &[PathBuf::from("data")])
            .unwrap_err();
        assert!(matches!(err, Error::Copy { ref to, .. } if to == &root.join("data")));
    }

    #[test]
    fn test_prune_keeps_non_empty_dirs() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        std::fs::create_dir_all(root.join("a/b")).unwrap();
        std::fs::create_dir_all(root.join("c")).unwrap();
        std::fs::write(root.join("c/keep"), "").unwrap();

        prune_empty_dirs(root, &[PathBuf::from("a/b/file"), PathBuf::from("c/gone")]);
        assert!(!root.join("a").exists());
        assert!(root.join("c/keep").exists());
    }
}
