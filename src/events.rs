// src/events.rs

//! State-change events published to subscribers (UI, loggers, tests)

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

/// Short identification of a package in events
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct PackageRef {
    pub id: Option<i64>,
    pub name: String,
    pub version: String,
}

impl std::fmt::Display for PackageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.name, self.version)
    }
}

/// Events emitted by the package manager
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A repository sync changed stored data
    RepoSynced {
        repo: String,
        added: usize,
        updated: usize,
        removed: usize,
    },
    /// A repository could not be synchronised at all
    SyncFailed { repo: String, error: String },
    PackageInstalled { package: PackageRef },
    PackageUpdated { package: PackageRef },
    PackageRemoved { package: PackageRef },
    OperationFailed { package: PackageRef, error: String },
    UpdatesAvailable { packages: Vec<PackageRef> },
}

/// Broadcast bus for [`Event`]s
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event; having no subscribers is not an error
    pub fn emit(&self, event: Event) {
        debug!("event: {:?}", event);
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
