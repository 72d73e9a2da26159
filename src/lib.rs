// src/lib.rs

//! Pallet package manager core
//!
//! Keeps a local catalogue of packages advertised by remote repositories and
//! installs them into an install root with dependency resolution.
//!
//! # Architecture
//!
//! - Storage: all catalogue and install state in SQLite
//! - Fetching: repository, component and package descriptors over pluggable
//!   transports, in parallel
//! - Resolution: requests expand into an ordered list of operations before
//!   anything is touched
//! - Processing: download, unpack into a staging directory, copy with
//!   backups, record the install
//! - Events: every state change is published on a broadcast channel

pub mod cancel;
pub mod compression;
pub mod config;
pub mod db;
mod error;
pub mod events;
pub mod manager;
pub mod processor;
pub mod repository;
pub mod resolver;
pub mod updates;
pub mod version;

pub use cancel::CancelToken;
pub use config::Config;
pub use db::models::{InstalledRecord, Package, PackageStatus, Repository};
pub use db::{PackageFilter, Storage};
pub use error::{Error, Result};
pub use events::{Event, EventBus, PackageRef};
pub use manager::{PackageManager, SyncSummary};
pub use processor::{CommandUnpacker, Manifest, PackageProcessor, Unpacker};
pub use repository::{RepoInfoFetcher, TransportRegistry};
pub use resolver::{OperationKind, PendingManager, PendingOperation, PendingSet};
pub use updates::{UpdateInterval, UpdateScheduler, UpdatesNotificationManager, notification_text};
pub use version::{Version, VersionConstraint};
