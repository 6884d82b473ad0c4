//! Provisioning graph
//!
//! A named DAG of steps handed to the external engine. Steps are keyed by
//! name; `dependencies` maps a step to the steps that must finish before it
//! starts.
//!
//! Structural rules checked by [`ProvisioningGraph::validate`]:
//! - every dependency names an existing step and the graph is acyclic
//! - disk and instance names are unique across the graph
//! - every instance boots from a disk created by an upstream step
//! - a wait step depends only on the steps creating the machines it waits
//!   for, and each machine has at most one wait step

pub mod step;

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use serde::Serialize;

use crate::logsink::WorkflowLogger;

pub use step::{
    AttachedDisk, CreateInstances, Disk, Instance, InstanceSignal, ObjectCopy, SerialOutputMatch,
    Step, StepKind,
};

/// Errors from graph construction and validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("step {0:?} already exists")]
    DuplicateStep(String),

    #[error("step {0:?} does not exist")]
    UnknownStep(String),

    #[error("step {0:?} cannot depend on itself")]
    SelfDependency(String),

    #[error("dependency {dependent:?} -> {dependency:?} would create a cycle")]
    Cycle {
        dependent: String,
        dependency: String,
    },

    #[error("{kind} {name:?} is defined more than once")]
    DuplicateResource { kind: &'static str, name: String },

    #[error("instance {instance:?} boots from disk {disk:?}, which no upstream step creates")]
    MissingDisk { instance: String, disk: String },

    #[error("wait step {step:?} is invalid: {reason}")]
    InvalidWait { step: String, reason: String },

    #[error("failed to render graph: {0}")]
    Render(String),
}

/// Result type for graph operations.
pub type GraphResult<T> = Result<T, GraphError>;

/// Where the engine sends its own logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct LogSettings {
    pub storage_logging: bool,
    pub cloud_logging: bool,
    pub stdout_logging: bool,
}

impl LogSettings {
    /// Every engine-side log destination off.
    pub fn disabled() -> Self {
        Self {
            storage_logging: false,
            cloud_logging: false,
            stdout_logging: false,
        }
    }
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            storage_logging: true,
            cloud_logging: true,
            stdout_logging: true,
        }
    }
}

/// A provisioning graph.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ProvisioningGraph {
    pub name: String,
    /// Assigned by the engine when the graph is finalized. Not part of the
    /// graph file.
    #[serde(skip)]
    pub run_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub sources: BTreeMap<String, String>,
    steps: BTreeMap<String, Step>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    dependencies: BTreeMap<String, BTreeSet<String>>,
    #[serde(flatten)]
    pub logging: LogSettings,
    #[serde(skip)]
    logger: Option<Arc<dyn WorkflowLogger>>,
}

impl ProvisioningGraph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            run_id: None,
            project: None,
            zone: None,
            sources: BTreeMap::new(),
            steps: BTreeMap::new(),
            dependencies: BTreeMap::new(),
            logging: LogSettings::default(),
            logger: None,
        }
    }

    /// Add a step with no dependencies.
    pub fn add_step(&mut self, name: impl Into<String>, kind: StepKind) -> GraphResult<()> {
        let name = name.into();
        if self.steps.contains_key(&name) {
            return Err(GraphError::DuplicateStep(name));
        }
        self.steps.insert(name, Step::new(kind));
        Ok(())
    }

    /// Add a step that runs after `after`. Nothing is added on error.
    pub fn add_step_after(
        &mut self,
        name: impl Into<String>,
        kind: StepKind,
        after: &[&str],
    ) -> GraphResult<()> {
        let name = name.into();
        for dependency in after {
            if *dependency == name {
                return Err(GraphError::SelfDependency(name));
            }
            if !self.steps.contains_key(*dependency) {
                return Err(GraphError::UnknownStep(dependency.to_string()));
            }
        }
        self.add_step(name.clone(), kind)?;
        if !after.is_empty() {
            self.dependencies
                .entry(name)
                .or_default()
                .extend(after.iter().map(|d| d.to_string()));
        }
        Ok(())
    }

    /// Make `dependent` wait for `dependency`.
    pub fn add_dependency(&mut self, dependent: &str, dependency: &str) -> GraphResult<()> {
        for name in [dependent, dependency] {
            if !self.steps.contains_key(name) {
                return Err(GraphError::UnknownStep(name.to_string()));
            }
        }
        if dependent == dependency {
            return Err(GraphError::SelfDependency(dependent.to_string()));
        }
        if self.depends_on(dependency, dependent) {
            return Err(GraphError::Cycle {
                dependent: dependent.to_string(),
                dependency: dependency.to_string(),
            });
        }
        self.dependencies
            .entry(dependent.to_string())
            .or_default()
            .insert(dependency.to_string());
        Ok(())
    }

    /// True when `step` transitively depends on `target`.
    pub fn depends_on(&self, step: &str, target: &str) -> bool {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([step]);
        while let Some(current) = queue.pop_front() {
            let Some(deps) = self.dependencies.get(current) else {
                continue;
            };
            for dep in deps {
                if dep == target {
                    return true;
                }
                if seen.insert(dep.as_str()) {
                    queue.push_back(dep);
                }
            }
        }
        false
    }

    pub fn step(&self, name: &str) -> Option<&Step> {
        self.steps.get(name)
    }

    pub fn step_mut(&mut self, name: &str) -> Option<&mut Step> {
        self.steps.get_mut(name)
    }

    pub fn has_step(&self, name: &str) -> bool {
        self.steps.contains_key(name)
    }

    pub fn steps(&self) -> impl Iterator<Item = (&str, &Step)> {
        self.steps.iter().map(|(name, step)| (name.as_str(), step))
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Direct dependencies of `name`.
    pub fn dependencies_of(&self, name: &str) -> impl Iterator<Item = &str> {
        self.dependencies
            .get(name)
            .into_iter()
            .flat_map(|deps| deps.iter().map(String::as_str))
    }

    pub fn disks(&self) -> impl Iterator<Item = &Disk> {
        self.steps.values().flat_map(|s| s.disks().iter())
    }

    pub fn instances(&self) -> impl Iterator<Item = &Instance> {
        self.steps.values().flat_map(|s| s.instances().iter())
    }

    pub fn instances_mut(&mut self) -> impl Iterator<Item = &mut Instance> {
        self.steps
            .values_mut()
            .filter_map(|s| match &mut s.kind {
                StepKind::CreateInstances(create) => Some(create.instances.iter_mut()),
                _ => None,
            })
            .flatten()
    }

    pub fn instance(&self, name: &str) -> Option<&Instance> {
        self.instances().find(|i| i.name == name)
    }

    pub fn instance_mut(&mut self, name: &str) -> Option<&mut Instance> {
        self.instances_mut().find(|i| i.name == name)
    }

    /// Name of the step creating instance `name`.
    pub fn creating_step(&self, instance: &str) -> Option<&str> {
        self.steps
            .iter()
            .find(|(_, s)| s.instances().iter().any(|i| i.name == instance))
            .map(|(name, _)| name.as_str())
    }

    /// Names of the wait steps watching instance `name`.
    pub fn wait_steps_for(&self, instance: &str) -> Vec<&str> {
        self.steps
            .iter()
            .filter(|(_, s)| s.signals().iter().any(|sig| sig.name == instance))
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn wait_step_count(&self) -> usize {
        self.steps
            .values()
            .filter(|s| matches!(s.kind, StepKind::WaitForInstancesSignal(_)))
            .count()
    }

    pub fn set_logger(&mut self, logger: Arc<dyn WorkflowLogger>) {
        self.logger = Some(logger);
    }

    pub fn logger(&self) -> Option<&Arc<dyn WorkflowLogger>> {
        self.logger.as_ref()
    }

    /// Send a line to the attached log sink, if any.
    pub fn log(&self, message: &str) {
        if let Some(logger) = &self.logger {
            logger.log(&self.name, message);
        }
    }

    /// Steps in an order where every step comes after its dependencies.
    /// Ties are broken by name.
    pub fn topological_order(&self) -> GraphResult<Vec<String>> {
        let mut remaining: HashMap<&str, usize> = HashMap::new();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
        for name in self.steps.keys() {
            remaining.insert(name, 0);
        }
        for (step, deps) in &self.dependencies {
            if !self.steps.contains_key(step) {
                return Err(GraphError::UnknownStep(step.clone()));
            }
            for dep in deps {
                if !self.steps.contains_key(dep) {
                    return Err(GraphError::UnknownStep(dep.clone()));
                }
                *remaining.entry(step).or_default() += 1;
                dependents.entry(dep).or_default().push(step);
            }
        }

        let mut ready: BTreeSet<&str> = remaining
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(name, _)| *name)
            .collect();
        let mut order = Vec::with_capacity(self.steps.len());
        while let Some(next) = ready.pop_first() {
            order.push(next.to_string());
            for dependent in dependents.get(next).into_iter().flatten() {
                if let Some(count) = remaining.get_mut(dependent) {
                    *count -= 1;
                    if *count == 0 {
                        ready.insert(dependent);
                    }
                }
            }
        }

        if order.len() != self.steps.len() {
            let stuck = remaining
                .iter()
                .filter(|(_, count)| **count > 0)
                .map(|(name, _)| *name)
                .min()
                .unwrap_or_default();
            let dependency = self
                .dependencies_of(stuck)
                .find(|d| !order.iter().any(|o| o == d))
                .unwrap_or_default();
            return Err(GraphError::Cycle {
                dependent: stuck.to_string(),
                dependency: dependency.to_string(),
            });
        }
        Ok(order)
    }

    /// Check the structural rules listed in the module docs.
    pub fn validate(&self) -> GraphResult<()> {
        self.topological_order()?;

        let mut disk_steps: HashMap<&str, &str> = HashMap::new();
        for (step_name, step) in &self.steps {
            for disk in step.disks() {
                if disk_steps.insert(&disk.name, step_name).is_some() {
                    return Err(GraphError::DuplicateResource {
                        kind: "disk",
                        name: disk.name.clone(),
                    });
                }
            }
        }

        let mut instance_steps: HashMap<&str, &str> = HashMap::new();
        for (step_name, step) in &self.steps {
            for instance in step.instances() {
                if instance_steps.insert(&instance.name, step_name).is_some() {
                    return Err(GraphError::DuplicateResource {
                        kind: "instance",
                        name: instance.name.clone(),
                    });
                }
                let disk = instance.boot_disk().unwrap_or_default();
                let upstream = disk_steps
                    .get(disk)
                    .is_some_and(|creator| self.depends_on(step_name, creator));
                if !upstream {
                    return Err(GraphError::MissingDisk {
                        instance: instance.name.clone(),
                        disk: disk.to_string(),
                    });
                }
            }
        }

        let mut waited: HashSet<&str> = HashSet::new();
        for (step_name, step) in &self.steps {
            let StepKind::WaitForInstancesSignal(signals) = &step.kind else {
                continue;
            };
            let invalid = |reason: String| GraphError::InvalidWait {
                step: step_name.clone(),
                reason,
            };
            if signals.is_empty() {
                return Err(invalid("no instances to wait for".to_string()));
            }
            let mut creators = BTreeSet::new();
            for signal in signals {
                let creator = instance_steps
                    .get(signal.name.as_str())
                    .ok_or_else(|| invalid(format!("unknown instance {:?}", signal.name)))?;
                if !waited.insert(&signal.name) {
                    return Err(invalid(format!(
                        "instance {:?} already has a wait step",
                        signal.name
                    )));
                }
                creators.insert(creator.to_string());
            }
            let deps: BTreeSet<String> = self.dependencies_of(step_name).map(String::from).collect();
            if deps != creators {
                return Err(invalid(format!(
                    "must depend on exactly {:?}, depends on {:?}",
                    creators, deps
                )));
            }
        }

        Ok(())
    }

    /// Render the graph in the engine's JSON workflow format.
    pub fn to_json(&self) -> GraphResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| GraphError::Render(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> ProvisioningGraph {
        let mut graph = ProvisioningGraph::new("wf");
        graph
            .add_step("create-disks", StepKind::CreateDisks(vec![Disk::new("vm", "img")]))
            .unwrap();
        graph
            .add_step_after(
                "create-vms",
                StepKind::CreateInstances(CreateInstances {
                    instances: vec![Instance::new("vm", "vm")],
                }),
                &["create-disks"],
            )
            .unwrap();
        graph
            .add_step_after(
                "wait-vm",
                StepKind::WaitForInstancesSignal(vec![InstanceSignal::stopped("vm")]),
                &["create-vms"],
            )
            .unwrap();
        graph
    }

    #[test]
    fn test_valid_chain() {
        let graph = chain();
        graph.validate().unwrap();
        assert_eq!(
            graph.topological_order().unwrap(),
            vec!["create-disks", "create-vms", "wait-vm"]
        );
        assert!(graph.depends_on("wait-vm", "create-disks"));
        assert!(!graph.depends_on("create-disks", "wait-vm"));
    }

    #[test]
    fn test_add_dependency_rejects_cycle() {
        let mut graph = chain();
        let err = graph.add_dependency("create-disks", "wait-vm").unwrap_err();
        assert!(matches!(err, GraphError::Cycle { .. }));
        assert!(matches!(
            graph.add_dependency("wait-vm", "wait-vm"),
            Err(GraphError::SelfDependency(_))
        ));
        assert!(matches!(
            graph.add_dependency("wait-vm", "nope"),
            Err(GraphError::UnknownStep(_))
        ));
        graph.validate().unwrap();
    }

    #[test]
    fn test_add_step_after_is_atomic() {
        let mut graph = chain();
        let err = graph
            .add_step_after(
                "copy",
                StepKind::CopyObjects(Vec::new()),
                &["wait-vm", "missing"],
            )
            .unwrap_err();
        assert_eq!(err, GraphError::UnknownStep("missing".to_string()));
        assert!(!graph.has_step("copy"));

        assert_eq!(
            graph.add_step("wait-vm", StepKind::CopyObjects(Vec::new())),
            Err(GraphError::DuplicateStep("wait-vm".to_string()))
        );
    }

    #[test]
    fn test_validate_rejects_wait_on_wrong_step() {
        let mut graph = chain();
        graph.add_dependency("wait-vm", "create-disks").unwrap();
        assert!(matches!(graph.validate(), Err(GraphError::InvalidWait { .. })));
    }

    #[test]
    fn test_validate_rejects_second_wait_for_machine() {
        let mut graph = chain();
        graph
            .add_step_after(
                "wait-again",
                StepKind::WaitForInstancesSignal(vec![InstanceSignal::stopped("vm")]),
                &["create-vms"],
            )
            .unwrap();
        assert!(matches!(graph.validate(), Err(GraphError::InvalidWait { .. })));
    }

    #[test]
    fn test_validate_rejects_missing_disk() {
        let mut graph = ProvisioningGraph::new("wf");
        graph
            .add_step(
                "create-vms",
                StepKind::CreateInstances(CreateInstances {
                    instances: vec![Instance::new("vm", "vm")],
                }),
            )
            .unwrap();
        assert!(matches!(graph.validate(), Err(GraphError::MissingDisk { .. })));
    }

    #[test]
    fn test_to_json_engine_format() {
        let mut graph = chain();
        graph.project = Some("proj".to_string());
        graph.run_id = Some("01run".to_string());
        graph.logging = LogSettings::disabled();
        let json: serde_json::Value = serde_json::from_str(&graph.to_json().unwrap()).unwrap();

        assert_eq!(json["Name"], "wf");
        assert_eq!(json["Project"], "proj");
        assert!(json.get("Zone").is_none());
        assert!(json.get("RunId").is_none());
        assert_eq!(json["Dependencies"]["create-vms"][0], "create-disks");
        assert_eq!(json["Steps"]["wait-vm"]["WaitForInstancesSignal"][0]["Stopped"], true);
        assert_eq!(json["StdoutLogging"], false);
    }

    #[test]
    fn test_instances_mut_reaches_all_steps() {
        let mut graph = chain();
        for instance in graph.instances_mut() {
            instance.metadata.insert("k".to_string(), "v".to_string());
        }
        assert_eq!(graph.instance("vm").unwrap().metadata["k"], "v");
        assert_eq!(graph.creating_step("vm"), Some("create-vms"));
        assert_eq!(graph.wait_steps_for("vm"), vec!["wait-vm"]);
    }
}
