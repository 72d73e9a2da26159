// src/resolver/plan.rs

//! Resolution plan data structures
//!
//! Contains the result types for dependency resolution.

use crate::events::PackageRef;
use serde::Serialize;
use std::fmt;
use strum_macros::{AsRefStr, Display, EnumString};

/// What to do with a package
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumString, AsRefStr, Serialize,
)]
#[strum(serialize_all = "lowercase")]
pub enum OperationKind {
    Install,
    Update,
    Remove,
}

/// A single resolved step, never persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingOperation {
    pub package_id: i64,
    pub kind: OperationKind,
    /// Position in the resolved batch, starting at 0
    pub order_index: usize,
    pub name: String,
    pub version: String,
    pub size: u64,
}

impl PendingOperation {
    pub fn package_ref(&self) -> PackageRef {
        PackageRef {
            id: Some(self.package_id),
            name: self.name.clone(),
            version: self.version.clone(),
        }
    }
}

impl fmt::Display for PendingOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}-{}", self.kind, self.name, self.version)
    }
}

/// Summary of a resolved batch for display
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PendingSet {
    pub to_install: Vec<PendingOperation>,
    pub to_update: Vec<PendingOperation>,
    pub to_remove: Vec<PendingOperation>,
    /// Sum of sizes of everything to be downloaded
    pub download_size: u64,
}

impl PendingSet {
    pub fn from_operations(operations: &[PendingOperation]) -> Self {
        let mut set = Self::default();
        for op in operations {
            match op.kind {
                OperationKind::Install => {
                    set.download_size += op.size;
                    set.to_install.push(op.clone());
                }
                OperationKind::Update => {
                    set.download_size += op.size;
                    set.to_update.push(op.clone());
                }
                OperationKind::Remove => set.to_remove.push(op.clone()),
            }
        }
        set
    }

    pub fn is_empty(&self) -> bool {
        self.to_install.is_empty() && self.to_update.is_empty() && self.to_remove.is_empty()
    }
}
