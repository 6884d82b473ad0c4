//! Provisioning engine
//!
//! The engine materializes a graph's resources, runs its wait steps and
//! tears everything down. It is an external collaborator; this module only
//! defines the seam and ships an adapter for an engine binary plus an
//! in-process mock.

mod command;
mod mock;

pub use command::CommandEngine;
pub use mock::MockEngine;

use std::io;

use crate::graph::{GraphError, ProvisioningGraph};

/// Errors reported by an engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("graph {name:?} is invalid: {reason}")]
    Invalid { name: String, reason: String },

    #[error("graph {name:?} failed: {reason}")]
    Failed { name: String, reason: String },

    #[error("engine failed to start: {0}")]
    SpawnFailed(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Executes provisioning graphs.
///
/// Shared by reference across scheduler workers.
pub trait ProvisioningEngine: Send + Sync {
    /// A fresh identifier for one graph run.
    fn allocate_run_id(&self) -> String;

    /// Check a graph without creating anything.
    fn validate(&self, graph: &ProvisioningGraph) -> EngineResult<()>;

    /// Run a graph to completion, blocking until its wait steps resolve and
    /// its resources are cleaned up.
    fn execute(&self, graph: &ProvisioningGraph) -> EngineResult<()>;
}

/// Lowercase ULID, the run identifier format used throughout.
pub fn new_run_id() -> String {
    ulid::Ulid::new().to_string().to_lowercase()
}
