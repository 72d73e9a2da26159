// src/manager/lock.rs

//! Exclusive lock on the data directory
//!
//! Only one [`super::PackageManager`] may own a data directory at a time.
//! The lock is an advisory `flock` on `<data_dir>/pallet.lock`, released
//! when the guard is dropped or the process exits.

use crate::error::{Error, Result};
use fs2::FileExt;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const LOCK_FILE: &str = "pallet.lock";

#[derive(Debug)]
pub struct DataDirLock {
    file: File,
    path: PathBuf,
}

impl DataDirLock {
    /// Take the lock without blocking; `Error::Locked` if someone holds it
    pub fn acquire(data_dir: &Path) -> Result<Self> {
        fs::create_dir_all(data_dir).map_err(|e| Error::fs(data_dir, e))?;
        let path = data_dir.join(LOCK_FILE);
        let file = File::create(&path).map_err(|e| Error::fs(&path, e))?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                debug!("Acquired data directory lock at {}", path.display());
                Ok(Self { file, path })
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Err(Error::Locked(path)),
            Err(e) => Err(Error::fs(&path, e)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DataDirLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!("Failed to release lock {}: {}", self.path.display(), e);
        }
    }
}
