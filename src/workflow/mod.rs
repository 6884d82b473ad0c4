//! Test workflows
//!
//! A [`TestWorkflow`] pairs a suite with an image and owns the provisioning
//! graph the suite builds. The graph does not exist until the first machine
//! is requested, and a workflow whose setup failed is disabled for good.
//!
//! The first machine created gets the standard chain
//! `create-disks` → `create-vms` → `wait-<machine>`. Later machines are
//! appended to the two creation steps and are provisioned in parallel; they
//! get a wait step only when a suite asks for one with [`TestVm::add_wait`].

mod vm;

use gtm_protocol::GcsUrl;

use crate::graph::{
    CreateInstances, Disk, GraphError, Instance, InstanceSignal, ProvisioningGraph, StepKind,
};

pub use vm::TestVm;

/// Step creating every boot disk.
pub const CREATE_DISKS_STEP: &str = "create-disks";

/// Step creating every machine.
pub const CREATE_VMS_STEP: &str = "create-vms";

/// Name of the wait step for machine `vm`.
pub fn wait_step_name(vm: &str) -> String {
    format!("wait-{}", vm)
}

/// Errors from building or finalizing a workflow.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkflowError {
    #[error("workflow {0:?} has no machines yet")]
    NotBuilt(String),

    #[error("workflow {0:?} is disabled")]
    Disabled(String),

    #[error("machine {0:?} already exists")]
    DuplicateMachine(String),

    #[error("machine {0:?} does not exist")]
    MachineNotFound(String),

    #[error("wait step already exists for machine {0:?}")]
    WaitStepExists(String),

    #[error("workflow {0:?} is already finalized")]
    AlreadyFinalized(String),

    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// Result type for workflow operations.
pub type WorkflowResult<T> = Result<T, WorkflowError>;

/// Lifecycle of a workflow's graph.
#[derive(Debug, Clone, Default)]
pub enum GraphState {
    /// No machine requested yet.
    #[default]
    Unbuilt,
    Built(ProvisioningGraph),
    /// Setup failed. Permanent.
    Disabled,
}

/// One suite run against one image.
#[derive(Debug, Clone)]
pub struct TestWorkflow {
    name: String,
    image: String,
    state: GraphState,
    skipped: bool,
    setup_error: Option<String>,
    destination: Option<GcsUrl>,
}

impl TestWorkflow {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            state: GraphState::Unbuilt,
            skipped: false,
            setup_error: None,
            destination: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    pub fn state(&self) -> &GraphState {
        &self.state
    }

    /// The graph, if one has been built and the workflow is not disabled.
    pub fn graph(&self) -> Option<&ProvisioningGraph> {
        match &self.state {
            GraphState::Built(graph) => Some(graph),
            _ => None,
        }
    }

    pub fn is_built(&self) -> bool {
        matches!(self.state, GraphState::Built(_))
    }

    pub fn is_disabled(&self) -> bool {
        matches!(self.state, GraphState::Disabled)
    }

    pub fn is_skipped(&self) -> bool {
        self.skipped
    }

    /// Exclude the workflow from execution.
    pub fn skip(&mut self) {
        self.skipped = true;
    }

    /// Drop the graph. The workflow rejects every later builder call.
    pub fn disable(&mut self) {
        self.state = GraphState::Disabled;
    }

    /// Disable the workflow, recording why its setup failed.
    pub fn fail_setup(&mut self, reason: impl Into<String>) {
        self.setup_error = Some(reason.into());
        self.disable();
    }

    pub fn setup_error(&self) -> Option<&str> {
        self.setup_error.as_deref()
    }

    /// Where the agent's report will be, once finalized.
    pub fn destination(&self) -> Option<&GcsUrl> {
        self.destination.as_ref()
    }

    pub(crate) fn set_destination(&mut self, destination: GcsUrl) {
        self.destination = Some(destination);
    }

    pub fn is_finalized(&self) -> bool {
        self.graph().is_some_and(|g| g.run_id.is_some())
    }

    /// Mutable access to the graph for operations that need one.
    pub fn graph_mut(&mut self) -> WorkflowResult<&mut ProvisioningGraph> {
        match &mut self.state {
            GraphState::Built(graph) => Ok(graph),
            GraphState::Unbuilt => Err(WorkflowError::NotBuilt(self.name.clone())),
            GraphState::Disabled => Err(WorkflowError::Disabled(self.name.clone())),
        }
    }

    /// Add a machine booting from the workflow's image.
    pub fn create_vm(&mut self, name: &str) -> WorkflowResult<TestVm<'_>> {
        match &mut self.state {
            GraphState::Disabled => return Err(WorkflowError::Disabled(self.name.clone())),
            GraphState::Unbuilt => {
                let graph = first_vm_graph(&self.name, &self.image, name)?;
                self.state = GraphState::Built(graph);
            }
            GraphState::Built(graph) => append_vm(graph, &self.image, name)?,
        }
        tracing::debug!(workflow = %self.name, vm = name, "created machine");
        Ok(TestVm::new(self, name))
    }

    /// Handle for a machine created earlier.
    pub fn vm(&mut self, name: &str) -> WorkflowResult<TestVm<'_>> {
        let graph = self.graph_mut()?;
        if graph.instance(name).is_none() {
            return Err(WorkflowError::MachineNotFound(name.to_string()));
        }
        Ok(TestVm::new(self, name))
    }

    /// Names of all machines, in creation order.
    pub fn vm_names(&self) -> Vec<String> {
        self.graph()
            .map(|g| g.instances().map(|i| i.name.clone()).collect())
            .unwrap_or_default()
    }

    /// Render the graph as engine JSON.
    pub fn to_json(&self) -> WorkflowResult<String> {
        match &self.state {
            GraphState::Built(graph) => Ok(graph.to_json()?),
            GraphState::Unbuilt => Err(WorkflowError::NotBuilt(self.name.clone())),
            GraphState::Disabled => Err(WorkflowError::Disabled(self.name.clone())),
        }
    }
}

/// Graph with the creation chain for the first machine and its wait step.
fn first_vm_graph(workflow: &str, image: &str, vm: &str) -> WorkflowResult<ProvisioningGraph> {
    let mut graph = ProvisioningGraph::new(workflow);
    graph.add_step(
        CREATE_DISKS_STEP,
        StepKind::CreateDisks(vec![Disk::new(vm, image)]),
    )?;
    graph.add_step_after(
        CREATE_VMS_STEP,
        StepKind::CreateInstances(CreateInstances {
            instances: vec![Instance::new(vm, vm)],
        }),
        &[CREATE_DISKS_STEP],
    )?;
    graph.add_step_after(
        wait_step_name(vm),
        StepKind::WaitForInstancesSignal(vec![InstanceSignal::stopped(vm)]),
        &[CREATE_VMS_STEP],
    )?;
    Ok(graph)
}

/// Add a disk and a machine to the existing creation steps.
fn append_vm(graph: &mut ProvisioningGraph, image: &str, vm: &str) -> WorkflowResult<()> {
    if graph.instance(vm).is_some() || graph.disks().any(|d| d.name == vm) {
        return Err(WorkflowError::DuplicateMachine(vm.to_string()));
    }

    if !matches!(
        graph.step(CREATE_DISKS_STEP).map(|s| &s.kind),
        Some(StepKind::CreateDisks(_))
    ) {
        return Err(GraphError::UnknownStep(CREATE_DISKS_STEP.to_string()).into());
    }
    if !matches!(
        graph.step(CREATE_VMS_STEP).map(|s| &s.kind),
        Some(StepKind::CreateInstances(_))
    ) {
        return Err(GraphError::UnknownStep(CREATE_VMS_STEP.to_string()).into());
    }

    if let Some(StepKind::CreateDisks(list)) =
        graph.step_mut(CREATE_DISKS_STEP).map(|s| &mut s.kind)
    {
        list.push(Disk::new(vm, image));
    }
    if let Some(StepKind::CreateInstances(create)) =
        graph.step_mut(CREATE_VMS_STEP).map(|s| &mut s.kind)
    {
        create.instances.push(Instance::new(vm, vm));
    }
    Ok(())
}

/// Configure the common case of one machine, named after the workflow,
/// running the whole suite.
pub fn single_vm_test(workflow: &mut TestWorkflow) -> WorkflowResult<()> {
    let name = workflow.name().to_string();
    workflow.create_vm(&name)?;
    Ok(())
}
