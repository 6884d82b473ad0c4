//! Handle for configuring one machine of a workflow.

use gtm_protocol::{RUN_FILTER_KEY, SHUTDOWN_SCRIPT_KEY, STARTUP_SCRIPT_KEY};

use super::{wait_step_name, TestWorkflow, WorkflowError, WorkflowResult};
use crate::graph::{InstanceSignal, SerialOutputMatch, StepKind};

/// A machine inside a [`TestWorkflow`].
///
/// Holds the workflow mutably, so a suite configures one machine at a time.
#[derive(Debug)]
pub struct TestVm<'a> {
    workflow: &'a mut TestWorkflow,
    name: String,
}

impl<'a> TestVm<'a> {
    pub(super) fn new(workflow: &'a mut TestWorkflow, name: &str) -> Self {
        Self {
            workflow,
            name: name.to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Set a metadata entry, replacing any previous value for `key`.
    pub fn add_metadata(&mut self, key: &str, value: &str) -> WorkflowResult<()> {
        let graph = self.workflow.graph_mut()?;
        let instance = graph
            .instance_mut(&self.name)
            .ok_or_else(|| WorkflowError::MachineNotFound(self.name.clone()))?;
        instance.metadata.insert(key.to_string(), value.to_string());
        Ok(())
    }

    /// Current value of a metadata entry.
    pub fn metadata(&self, key: &str) -> Option<&str> {
        self.workflow
            .graph()?
            .instance(&self.name)?
            .metadata
            .get(key)
            .map(String::as_str)
    }

    /// Run only the tests matching `filter` (a `-test.run` expression).
    pub fn run_tests(&mut self, filter: &str) -> WorkflowResult<()> {
        self.add_metadata(RUN_FILTER_KEY, filter)
    }

    pub fn set_startup_script(&mut self, script: &str) -> WorkflowResult<()> {
        self.add_metadata(STARTUP_SCRIPT_KEY, script)
    }

    pub fn set_shutdown_script(&mut self, script: &str) -> WorkflowResult<()> {
        self.add_metadata(SHUTDOWN_SCRIPT_KEY, script)
    }

    /// Add a wait step for this machine matching console output. Empty
    /// patterns are left out. The first machine of a workflow already has a
    /// wait step, so this fails for it.
    pub fn add_wait(
        &mut self,
        success: &str,
        failure: &str,
        status: &str,
        stopped: bool,
    ) -> WorkflowResult<()> {
        let graph = self.workflow.graph_mut()?;
        let creator = graph
            .creating_step(&self.name)
            .ok_or_else(|| WorkflowError::MachineNotFound(self.name.clone()))?
            .to_string();
        let step_name = wait_step_name(&self.name);
        if graph.has_step(&step_name) || !graph.wait_steps_for(&self.name).is_empty() {
            return Err(WorkflowError::WaitStepExists(self.name.clone()));
        }

        let signal = InstanceSignal {
            name: self.name.clone(),
            stopped,
            serial_output: SerialOutputMatch::from_patterns(success, failure, status),
        };
        graph.add_step_after(
            step_name,
            StepKind::WaitForInstancesSignal(vec![signal]),
            &[creator.as_str()],
        )?;
        Ok(())
    }
}
