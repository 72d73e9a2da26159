// src/repository/mod.rs

//! Repository metadata retrieval
//!
//! Transports fetch raw bytes by URL scheme, descriptors validate the
//! fetched JSON, and the fetcher walks a repository's components and
//! packages in parallel.

pub mod descriptor;
pub mod fetcher;
pub mod transport;

pub use descriptor::{ComponentInfo, PackageInfo, PackageRefInfo, ParsedComponent, RepoInfo};
pub use fetcher::{FetchedComponent, RepoFetch, RepoInfoFetcher};
pub use transport::{FetchFn, HttpTransport, TransportRegistry};
