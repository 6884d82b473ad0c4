//! Test suites
//!
//! A suite is a named configurator that builds the provisioning graph of a
//! [`TestWorkflow`]. The registry turns every suite × image pair into one
//! workflow, skipping suites excluded by the name filter and disabling
//! workflows whose setup fails.

mod image_validation;
mod oslogin;
mod shutdown_scripts;
mod ssh;

pub use image_validation::ImageValidation;
pub use oslogin::OsLogin;
pub use shutdown_scripts::{ShutdownScripts, SHUTDOWN_SCRIPT};
pub use ssh::Ssh;

use regex_lite::Regex;

use crate::workflow::{TestWorkflow, WorkflowError};

/// Errors returned by suite setup.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SuiteError {
    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error("suite {suite:?} does not support image {image:?}")]
    UnsupportedImage { suite: String, image: String },

    #[error("suite setup failed: {0}")]
    Failed(String),
}

/// Result type for suite setup.
pub type SuiteResult<T> = Result<T, SuiteError>;

/// Configures the workflow of one suite.
pub trait SuiteConfigurator: Send + Sync {
    fn name(&self) -> &str;

    /// Build the workflow's graph. Called once per image.
    fn configure(&self, workflow: &mut TestWorkflow) -> SuiteResult<()>;
}

/// Named suites in registration order.
#[derive(Default)]
pub struct SuiteRegistry {
    suites: Vec<Box<dyn SuiteConfigurator>>,
}

impl SuiteRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in suites.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(ImageValidation));
        registry.register(Box::new(OsLogin));
        registry.register(Box::new(Ssh));
        registry.register(Box::new(ShutdownScripts));
        registry
    }

    /// Add a suite. A suite registered under an existing name replaces it
    /// in place.
    pub fn register(&mut self, suite: Box<dyn SuiteConfigurator>) {
        match self.suites.iter().position(|s| s.name() == suite.name()) {
            Some(index) => self.suites[index] = suite,
            None => self.suites.push(suite),
        }
    }

    pub fn names(&self) -> Vec<&str> {
        self.suites.iter().map(|s| s.name()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&dyn SuiteConfigurator> {
        self.suites
            .iter()
            .find(|s| s.name() == name)
            .map(|s| s.as_ref())
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn SuiteConfigurator> {
        self.suites.iter().map(|s| s.as_ref())
    }

    pub fn len(&self) -> usize {
        self.suites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.suites.is_empty()
    }

    /// One workflow per image and suite, images outermost.
    ///
    /// Suites whose name does not match `filter` are marked skipped and
    /// never configured. A failed setup is logged and disables the workflow.
    pub fn build_workflows(&self, images: &[String], filter: Option<&Regex>) -> Vec<TestWorkflow> {
        let mut workflows = Vec::with_capacity(images.len() * self.suites.len());
        for image in images {
            for suite in &self.suites {
                let mut workflow = TestWorkflow::new(suite.name(), image.as_str());
                if filter.is_some_and(|f| !f.is_match(suite.name())) {
                    tracing::debug!(workflow = suite.name(), image = %image, "excluded by filter");
                    workflow.skip();
                } else if let Err(e) = suite.configure(&mut workflow) {
                    tracing::warn!(workflow = suite.name(), image = %image, error = %e, "suite setup failed");
                    workflow.fail_setup(e.to_string());
                }
                workflows.push(workflow);
            }
        }
        workflows
    }
}
