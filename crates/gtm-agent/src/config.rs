//! Agent configuration.

use std::path::PathBuf;

use gtm_protocol::storage::DEFAULT_STORAGE_ENDPOINT;

use crate::metadata::DEFAULT_METADATA_ENDPOINT;

/// Agent configuration settings.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Directory the scratch directory is created in.
    pub work_root: PathBuf,
    /// Base URL of the instance metadata service.
    pub metadata_endpoint: String,
    /// Storage JSON API endpoint.
    pub storage_endpoint: String,
    /// Use a filesystem object store rooted here instead of the HTTP store.
    pub storage_root: Option<PathBuf>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            work_root: PathBuf::from("/"),
            metadata_endpoint: DEFAULT_METADATA_ENDPOINT.to_string(),
            storage_endpoint: DEFAULT_STORAGE_ENDPOINT.to_string(),
            storage_root: None,
        }
    }
}
