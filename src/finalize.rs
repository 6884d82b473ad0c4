//! Finalization: stamp built graphs with run-time settings before submission.

use std::sync::Arc;

use gtm_protocol::{GcsUrl, OUTS_PATH_KEY, REPORT_FILE_NAME, TEST_BINARY_PATH_KEY};

use crate::engine::ProvisioningEngine;
use crate::graph::{step::STARTUP_SOURCE, LogSettings};
use crate::logsink::WorkflowLogger;
use crate::workflow::{TestWorkflow, WorkflowError, WorkflowResult};

/// Source name of the suite's test binary.
pub const TEST_BINARY_SOURCE: &str = "testbinary";

/// Value of the binary path key; the engine expands `${SOURCESPATH}`.
pub const TEST_BINARY_SOURCE_PATH: &str = "${SOURCESPATH}/testbinary";

/// Settings shared by every workflow of a run.
#[derive(Debug, Clone)]
pub struct FinalizeSettings {
    pub project: String,
    pub zone: String,
    /// Local path of the agent binary.
    pub agent_binary: String,
    /// Directory holding `<dir>/<dir>.test`, where `<dir>` is the suite name
    /// with hyphens replaced by underscores.
    pub suites_dir: String,
    /// Reports land under `<results_base>/<name>-<run_id>/outs/`.
    pub results_base: GcsUrl,
}

impl FinalizeSettings {
    /// Local path of a suite's test binary.
    pub fn test_binary_path(&self, suite: &str) -> String {
        let dir = suite.replace('-', "_");
        format!("{}/{}/{}.test", self.suites_dir.trim_end_matches('/'), dir, dir)
    }

    /// Report destination of a workflow run.
    pub fn destination(&self, name: &str, run_id: &str) -> GcsUrl {
        self.results_base
            .join(&format!("{}-{}", name, run_id))
            .join("outs")
            .join(REPORT_FILE_NAME)
    }
}

/// Stamps workflows with run-time settings.
pub struct Finalizer<'a> {
    settings: &'a FinalizeSettings,
    engine: &'a dyn ProvisioningEngine,
    logger: Arc<dyn WorkflowLogger>,
}

impl<'a> Finalizer<'a> {
    pub fn new(
        settings: &'a FinalizeSettings,
        engine: &'a dyn ProvisioningEngine,
        logger: Arc<dyn WorkflowLogger>,
    ) -> Self {
        Self {
            settings,
            engine,
            logger,
        }
    }

    /// Finalize one workflow. Returns `false` for workflows left untouched
    /// (skipped, unbuilt or disabled).
    pub fn finalize(&self, workflow: &mut TestWorkflow) -> WorkflowResult<bool> {
        if workflow.is_skipped() || !workflow.is_built() {
            return Ok(false);
        }
        if workflow.is_finalized() {
            return Err(WorkflowError::AlreadyFinalized(workflow.name().to_string()));
        }

        let name = workflow.name().to_string();
        let run_id = self.engine.allocate_run_id();
        let destination = self.settings.destination(&name, &run_id);
        let outs = destination
            .parent()
            .map(|p| p.to_string())
            .unwrap_or_else(|| destination.to_string());

        let graph = workflow.graph_mut()?;
        graph.run_id = Some(run_id.clone());
        graph.project = Some(self.settings.project.clone());
        graph.zone = Some(self.settings.zone.clone());
        graph
            .sources
            .insert(STARTUP_SOURCE.to_string(), self.settings.agent_binary.clone());
        graph.sources.insert(
            TEST_BINARY_SOURCE.to_string(),
            self.settings.test_binary_path(&name),
        );
        // Every machine of a workflow uploads to the same destination.
        for instance in graph.instances_mut() {
            instance
                .metadata
                .insert(TEST_BINARY_PATH_KEY.to_string(), TEST_BINARY_SOURCE_PATH.to_string());
            instance
                .metadata
                .insert(OUTS_PATH_KEY.to_string(), outs.clone());
        }
        graph.logging = LogSettings::disabled();
        graph.set_logger(Arc::clone(&self.logger));

        tracing::debug!(workflow = %name, image = workflow.image(), run_id = %run_id, "finalized workflow");
        workflow.set_destination(destination);
        Ok(true)
    }

    /// Finalize every workflow, returning how many were stamped.
    pub fn finalize_all(&self, workflows: &mut [TestWorkflow]) -> WorkflowResult<usize> {
        let mut count = 0;
        for workflow in workflows.iter_mut() {
            if self.finalize(workflow)? {
                count += 1;
            }
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MockEngine;
    use crate::logsink::BufferedLogger;

    fn settings() -> FinalizeSettings {
        FinalizeSettings {
            project: "proj".to_string(),
            zone: "us-west1-b".to_string(),
            agent_binary: "/opt/gtm/gtm-agent".to_string(),
            suites_dir: "/opt/gtm/suites/".to_string(),
            results_base: "gs://results/runs".parse().unwrap(),
        }
    }

    fn ssh_workflow() -> TestWorkflow {
        let mut wf = TestWorkflow::new("ssh", "debian-10");
        wf.create_vm("vm1").unwrap();
        wf.create_vm("vm2").unwrap();
        wf
    }

    #[test]
    fn test_finalize_stamps_graph() {
        let settings = settings();
        let engine = MockEngine::new();
        let logger = Arc::new(BufferedLogger::new());
        let finalizer = Finalizer::new(&settings, &engine, logger.clone());
        let mut wf = ssh_workflow();

        assert!(finalizer.finalize(&mut wf).unwrap());

        assert_eq!(
            wf.destination().unwrap().to_string(),
            "gs://results/runs/ssh-run0001/outs/junit.xml"
        );
        let graph = wf.graph().unwrap();
        assert_eq!(graph.run_id.as_deref(), Some("run0001"));
        assert_eq!(graph.project.as_deref(), Some("proj"));
        assert_eq!(graph.zone.as_deref(), Some("us-west1-b"));
        assert_eq!(graph.sources["startup"], "/opt/gtm/gtm-agent");
        assert_eq!(graph.sources["testbinary"], "/opt/gtm/suites/ssh/ssh.test");
        assert_eq!(graph.logging, LogSettings::disabled());
        for instance in graph.instances() {
            assert_eq!(instance.metadata[TEST_BINARY_PATH_KEY], "${SOURCESPATH}/testbinary");
            assert_eq!(
                instance.metadata[OUTS_PATH_KEY],
                "gs://results/runs/ssh-run0001/outs"
            );
        }

        graph.log("hello");
        assert_eq!(logger.entries_for("ssh").len(), 1);
    }

    #[test]
    fn test_binary_directories_use_underscores() {
        let settings = settings();
        assert_eq!(
            settings.test_binary_path("shutdown-scripts"),
            "/opt/gtm/suites/shutdown_scripts/shutdown_scripts.test"
        );
        assert_eq!(
            settings.test_binary_path("image-validation"),
            "/opt/gtm/suites/image_validation/image_validation.test"
        );
        assert_eq!(settings.test_binary_path("ssh"), "/opt/gtm/suites/ssh/ssh.test");
    }

    #[test]
    fn test_second_finalize_rejected() {
        let settings = settings();
        let engine = MockEngine::new();
        let finalizer = Finalizer::new(&settings, &engine, Arc::new(BufferedLogger::new()));
        let mut wf = ssh_workflow();

        finalizer.finalize(&mut wf).unwrap();
        assert_eq!(
            finalizer.finalize(&mut wf).unwrap_err(),
            WorkflowError::AlreadyFinalized("ssh".to_string())
        );
        assert_eq!(wf.graph().unwrap().run_id.as_deref(), Some("run0001"));
    }

    #[test]
    fn test_untouched_workflows() {
        let settings = settings();
        let engine = MockEngine::new();
        let finalizer = Finalizer::new(&settings, &engine, Arc::new(BufferedLogger::new()));

        let mut unbuilt = TestWorkflow::new("oslogin", "windows-2019");
        let mut disabled = ssh_workflow();
        disabled.disable();
        let mut skipped = ssh_workflow();
        skipped.skip();
        let mut workflows = vec![unbuilt.clone(), disabled, skipped, ssh_workflow()];

        assert!(!finalizer.finalize(&mut unbuilt).unwrap());
        assert_eq!(finalizer.finalize_all(&mut workflows).unwrap(), 1);
        assert!(workflows[0].destination().is_none());
        assert!(workflows[1].destination().is_none());
        assert!(workflows[2].graph().unwrap().run_id.is_none());
        assert!(workflows[3].is_finalized());
    }
}
