// src/repository/fetcher.rs

//! Retrieve and parse everything a repository advertises
//!
//! The repository descriptor is fetched first; component descriptors are
//! then fetched in parallel, and within each component the package
//! descriptors are fetched in parallel as well. A failure below the
//! repository level only skips the failing entity.

use super::descriptor::{
    self, COMPONENT_DESCRIPTOR, ComponentInfo, DISTS_DIR, PackageInfo, PackageRefInfo,
    REPO_DESCRIPTOR, RepoInfo,
};
use super::transport::{TransportRegistry, parse_url};
use crate::cancel::CancelToken;
use crate::compression::decompress;
use crate::error::{Error, Result};
use rayon::prelude::*;
use std::io::Write;
use std::path::PathBuf;
use tracing::{debug, info, warn};
use url::Url;

/// A fetched component and the outcome of every package it lists
#[derive(Debug)]
pub struct FetchedComponent {
    pub info: ComponentInfo,
    pub packages: Vec<(PackageRefInfo, Result<PackageInfo>)>,
}

impl FetchedComponent {
    pub fn failed_packages(&self) -> usize {
        self.packages.iter().filter(|(_, r)| r.is_err()).count()
    }
}

/// Report for one repository: its descriptor plus a result per component
#[derive(Debug)]
pub struct RepoFetch {
    pub url: String,
    pub repo: RepoInfo,
    pub components: Vec<(String, Result<FetchedComponent>)>,
}

impl RepoFetch {
    pub fn failed_components(&self) -> usize {
        self.components.iter().filter(|(_, r)| r.is_err()).count()
    }
}

/// Fetches and validates repository metadata through a [`TransportRegistry`]
pub struct RepoInfoFetcher {
    transports: TransportRegistry,
    spool_dir: PathBuf,
}

impl RepoInfoFetcher {
    /// `spool_dir` receives fetched payloads while they are decompressed
    pub fn new(transports: TransportRegistry, spool_dir: impl Into<PathBuf>) -> Self {
        Self {
            transports,
            spool_dir: spool_dir.into(),
        }
    }

    pub fn transports(&self) -> &TransportRegistry {
        &self.transports
    }

    /// Fetch the repository descriptor only
    pub fn fetch_repo_info(&self, repo_url: &str) -> Result<RepoInfo> {
        let base = base_url(repo_url)?;
        let url = join(&base, REPO_DESCRIPTOR)?;
        let bytes = self.fetch_descriptor(&url)?;
        descriptor::parse_repo(&bytes, repo_url)
    }

    /// Fetch the repository descriptor and everything below it
    ///
    /// Only a repository-level failure is returned as `Err`; component and
    /// package failures are recorded in the report and logged.
    pub fn fetch_repository(&self, repo_url: &str, cancel: &CancelToken) -> Result<RepoFetch> {
        let base = base_url(repo_url)?;
        let repo = self.fetch_repo_info(repo_url)?;
        info!(
            "Fetched repository {} ({} components)",
            repo.name,
            repo.components.len()
        );

        let components = repo
            .components
            .par_iter()
            .map(|name| {
                let result = cancel
                    .check()
                    .and_then(|_| self.fetch_component(&base, repo_url, name, cancel));
                if let Err(e) = &result {
                    warn!("Skipping component {} of {}: {}", name, repo_url, e);
                }
                (name.clone(), result)
            })
            .collect();

        Ok(RepoFetch {
            url: repo_url.to_string(),
            repo,
            components,
        })
    }

    fn fetch_component(
        &self,
        base: &Url,
        repo_url: &str,
        name: &str,
        cancel: &CancelToken,
    ) -> Result<FetchedComponent> {
        let dir = join(base, &format!("{DISTS_DIR}/{name}/"))?;
        let url = join(&dir, COMPONENT_DESCRIPTOR)?;
        let bytes = self.fetch_descriptor(&url)?;
        let parsed = descriptor::parse_component(&bytes, repo_url, name)?;
        let info = parsed.info;
        debug!("Component {} lists {} packages", name, info.packages.len());

        let mut packages: Vec<(PackageRefInfo, Result<PackageInfo>)> = info
            .packages
            .par_iter()
            .map(|reference| {
                let result = cancel
                    .check()
                    .and_then(|_| self.fetch_package(&dir, reference));
                if let Err(e) = &result {
                    warn!(
                        "Skipping package {}-{} in {}: {}",
                        reference.name, reference.version, name, e
                    );
                }
                (reference.clone(), result)
            })
            .collect();
        for (reference, e) in parsed.rejected {
            warn!("Skipping package entry in {}: {}", name, e);
            packages.push((reference, Err(e)));
        }

        Ok(FetchedComponent { info, packages })
    }

    fn fetch_package(&self, dir: &Url, reference: &PackageRefInfo) -> Result<PackageInfo> {
        let url = join(dir, &reference.location)?;
        let bytes = self.fetch_descriptor(&url)?;
        descriptor::parse_package(&bytes, reference, dir)
    }

    /// Fetch `url` and decompress it
    ///
    /// The raw bytes are spooled to disk first; on a decompression failure
    /// the spool file is kept and named in the error.
    fn fetch_descriptor(&self, url: &Url) -> Result<Vec<u8>> {
        let bytes = self.transports.fetch(url)?;

        std::fs::create_dir_all(&self.spool_dir).map_err(|e| Error::fs(&self.spool_dir, e))?;
        let mut spool = tempfile::Builder::new()
            .prefix("fetch-")
            .tempfile_in(&self.spool_dir)
            .map_err(|e| Error::fs(&self.spool_dir, e))?;
        spool
            .write_all(&bytes)
            .map_err(|e| Error::fs(spool.path(), e))?;

        match decompress(&bytes, spool.path()) {
            Ok(data) => Ok(data),
            Err(e) => {
                if let Err(keep) = spool.keep() {
                    warn!("Could not keep spool file {}: {}", keep.file.path().display(), keep.error);
                }
                Err(e)
            }
        }
    }
}

/// Parse a repository URL and make sure it names a directory
pub fn base_url(repo_url: &str) -> Result<Url> {
    let mut url = parse_url(repo_url)?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

fn join(base: &Url, relative: &str) -> Result<Url> {
    base.join(relative).map_err(|e| Error::NetworkFetch {
        url: format!("{base}{relative}"),
        reason: format!("invalid URL: {e}"),
    })
}
