//! Fetches a workflow's report from object storage after the engine is done.

use std::sync::Arc;

use gtm_protocol::{GcsUrl, ObjectStore, StorageError};
use gtm_report::ReportError;

use crate::workflow::TestWorkflow;

/// Errors collecting a workflow's report.
#[derive(Debug, thiserror::Error)]
pub enum CollectError {
    #[error("workflow {0:?} has no report destination")]
    NoDestination(String),

    #[error("failed to download report: {0}")]
    Download(#[from] StorageError),

    #[error("report at {0} is not valid UTF-8")]
    NotUtf8(GcsUrl),

    #[error(transparent)]
    Report(#[from] ReportError),
}

/// Result type for report collection.
pub type CollectResult<T> = Result<T, CollectError>;

/// Reads reports written by the agents.
#[derive(Clone)]
pub struct ResultCollector {
    store: Arc<dyn ObjectStore>,
}

impl ResultCollector {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Download the report at the workflow's destination and return it as
    /// canonical JUnit XML.
    pub fn collect(&self, workflow: &TestWorkflow) -> CollectResult<String> {
        let destination = workflow
            .destination()
            .ok_or_else(|| CollectError::NoDestination(workflow.name().to_string()))?;
        let bytes = self.store.download(destination)?;
        let text = String::from_utf8(bytes).map_err(|_| CollectError::NotUtf8(destination.clone()))?;
        let (report, xml) = gtm_report::canonicalize(&text, workflow.name())?;

        let counts = report.counts();
        tracing::debug!(
            workflow = workflow.name(),
            image = workflow.image(),
            tests = counts.total,
            failed = counts.failed,
            "collected report"
        );
        Ok(xml)
    }
}
