//! Guest Test Agent
//!
//! Single-shot program started by the startup script of every test machine.
//! It reads its instructions from instance metadata, downloads and runs the
//! suite's test binary, converts the output into a JUnit report and uploads
//! the report where the test manager will look for it.
//!
//! The crate is usable as a library so the whole flow can be exercised in
//! process with [`StaticMetadata`] and a filesystem object store.

pub mod agent;
pub mod config;
pub mod metadata;

pub use agent::{build_test_args, console_line, random_suffix, Agent, AgentOutcome, WORK_DIR_ALPHABET};
pub use config::AgentConfig;
pub use metadata::{HttpMetadata, MetadataSource, StaticMetadata, DEFAULT_METADATA_ENDPOINT};

use gtm_protocol::{StorageError, UrlError};
use gtm_report::ReportError;

/// Errors that stop the agent.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("metadata server error: {0}")]
    Metadata(String),

    #[error("required metadata attribute {0} is not set")]
    MissingAttribute(&'static str),

    #[error("invalid object URL in metadata: {0}")]
    InvalidUrl(#[from] UrlError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("test binary failed to start: {0}")]
    SpawnFailed(String),

    #[error("could not convert test output: {0}")]
    Report(#[from] ReportError),
}

impl From<reqwest::Error> for AgentError {
    fn from(e: reqwest::Error) -> Self {
        AgentError::Metadata(e.to_string())
    }
}

/// Result type for agent operations.
pub type AgentResult<T> = Result<T, AgentError>;
