// src/resolver/mod.rs

//! Dependency resolution and operation ordering
//!
//! [`PendingManager`] expands install/update/remove requests into the full
//! set of operations they imply and orders them with [`DependencyGraph`].

pub mod graph;
pub mod pending;
pub mod plan;

pub use graph::{DependencyGraph, Direction, NodeId, PackageNode};
pub use pending::PendingManager;
pub use plan::{OperationKind, PendingOperation, PendingSet};
