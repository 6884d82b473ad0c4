//! Scheduler
//!
//! Runs finalized workflows on a fixed pool of worker threads. Workers pull
//! from one shared pending queue and push exactly one [`TestResult`] per
//! workflow onto a result channel sized to the workflow count. The run
//! returns after every worker has drained the queue.

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::Mutex;
use std::thread;

use crate::collector::ResultCollector;
use crate::engine::ProvisioningEngine;
use crate::result::{Outcome, TestResult};
use crate::workflow::TestWorkflow;

/// Errors constructing a scheduler.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    #[error("parallelism must be at least 1")]
    ZeroParallelism,
}

/// Result type for scheduler construction.
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Fixed-size worker pool over an engine and a collector.
pub struct Scheduler<'a> {
    engine: &'a dyn ProvisioningEngine,
    collector: &'a ResultCollector,
    parallelism: usize,
}

impl<'a> Scheduler<'a> {
    pub fn new(
        engine: &'a dyn ProvisioningEngine,
        collector: &'a ResultCollector,
        parallelism: usize,
    ) -> SchedulerResult<Self> {
        if parallelism == 0 {
            return Err(SchedulerError::ZeroParallelism);
        }
        Ok(Self {
            engine,
            collector,
            parallelism,
        })
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    /// Decide the outcome of one workflow, running it if it has a graph.
    pub fn evaluate(&self, workflow: &TestWorkflow) -> TestResult {
        let name = workflow.name();
        let image = workflow.image();

        if workflow.is_skipped() {
            return TestResult::new(name, image, Outcome::Skipped, "");
        }
        let Some(graph) = workflow.graph() else {
            let reason = workflow.setup_error().unwrap_or("workflow was not set up");
            return TestResult::new(name, image, Outcome::SetupFailed, reason);
        };

        if let Err(e) = self.engine.execute(graph) {
            tracing::warn!(workflow = name, image, error = %e, "workflow failed");
            return TestResult::new(name, image, Outcome::WorkflowFailed, e.to_string());
        }
        match self.collector.collect(workflow) {
            Ok(report) => TestResult::new(name, image, Outcome::WorkflowSuccess, report),
            Err(e) => {
                tracing::warn!(workflow = name, image, error = %e, "result collection failed");
                TestResult::new(name, image, Outcome::WorkflowFailed, e.to_string())
            }
        }
    }

    /// Run every workflow and return one result each, in completion order.
    pub fn run(&self, workflows: Vec<TestWorkflow>) -> Vec<TestResult> {
        let total = workflows.len();
        if total == 0 {
            return Vec::new();
        }
        let workers = self.parallelism.min(total);

        let (pending_tx, pending_rx) = mpsc::channel();
        for workflow in workflows {
            // The receiver is alive until the end of this function.
            let _ = pending_tx.send(workflow);
        }
        drop(pending_tx);
        let pending = Mutex::new(pending_rx);
        let (result_tx, result_rx) = mpsc::sync_channel(total);

        tracing::info!(workflows = total, workers, "starting workflows");
        thread::scope(|scope| {
            for worker in 0..workers {
                let pending = &pending;
                let result_tx = result_tx.clone();
                scope.spawn(move || loop {
                    let next = match pending.lock() {
                        Ok(rx) => rx.recv(),
                        Err(poisoned) => poisoned.into_inner().recv(),
                    };
                    let Ok(workflow) = next else {
                        break;
                    };
                    tracing::debug!(
                        worker,
                        workflow = workflow.name(),
                        image = workflow.image(),
                        "running workflow"
                    );
                    let result = self.evaluate_contained(&workflow);
                    tracing::debug!(
                        worker,
                        workflow = workflow.name(),
                        image = workflow.image(),
                        outcome = %result.outcome,
                        "workflow finished"
                    );
                    if result_tx.send(result).is_err() {
                        break;
                    }
                });
            }
        });
        drop(result_tx);

        result_rx.iter().take(total).collect()
    }

    /// [`Self::evaluate`] with panics turned into a failed result.
    fn evaluate_contained(&self, workflow: &TestWorkflow) -> TestResult {
        panic::catch_unwind(AssertUnwindSafe(|| self.evaluate(workflow))).unwrap_or_else(|payload| {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            tracing::error!(workflow = workflow.name(), image = workflow.image(), %message, "workflow panicked");
            TestResult::new(
                workflow.name(),
                workflow.image(),
                Outcome::WorkflowFailed,
                format!("panic: {}", message),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use gtm_protocol::FsObjectStore;

    use crate::engine::MockEngine;

    fn collector(temp: &tempfile::TempDir) -> ResultCollector {
        ResultCollector::new(Arc::new(FsObjectStore::new(temp.path())))
    }

    fn built(name: &str) -> TestWorkflow {
        let mut wf = TestWorkflow::new(name, "debian-10");
        wf.create_vm("vm").unwrap();
        wf
    }

    #[test]
    fn test_zero_parallelism_rejected() {
        let temp = tempfile::tempdir().unwrap();
        let engine = MockEngine::new();
        let collector = collector(&temp);
        assert_eq!(
            Scheduler::new(&engine, &collector, 0).err(),
            Some(SchedulerError::ZeroParallelism)
        );
    }

    #[test]
    fn test_evaluate_outcomes() {
        let temp = tempfile::tempdir().unwrap();
        let engine = MockEngine::new().fail_graph("broken", "wait-vm timed out");
        let collector = collector(&temp);
        let scheduler = Scheduler::new(&engine, &collector, 1).unwrap();

        let mut skipped = built("skipped");
        skipped.skip();
        assert_eq!(scheduler.evaluate(&skipped).outcome, Outcome::Skipped);

        let mut setup = built("setup");
        setup.fail_setup("image windows-2019 is not supported");
        let result = scheduler.evaluate(&setup);
        assert_eq!(result.outcome, Outcome::SetupFailed);
        assert_eq!(result.payload, "image windows-2019 is not supported");

        let unbuilt = TestWorkflow::new("unbuilt", "debian-10");
        assert_eq!(scheduler.evaluate(&unbuilt).outcome, Outcome::SetupFailed);

        let result = scheduler.evaluate(&built("broken"));
        assert_eq!(result.outcome, Outcome::WorkflowFailed);
        assert!(result.payload.contains("wait-vm timed out"));

        // Executed but never finalized, so there is nothing to collect.
        let result = scheduler.evaluate(&built("unfinalized"));
        assert_eq!(result.outcome, Outcome::WorkflowFailed);
        assert!(result.payload.contains("no report destination"));

        assert_eq!(engine.executed(), vec!["broken", "unfinalized"]);
    }

    #[test]
    fn test_run_contains_panics() {
        let temp = tempfile::tempdir().unwrap();
        let engine = MockEngine::new().panic_on("boom");
        let collector = collector(&temp);
        let scheduler = Scheduler::new(&engine, &collector, 2).unwrap();

        let results = scheduler.run(vec![built("boom"), built("other")]);

        assert_eq!(results.len(), 2);
        let boom = results.iter().find(|r| r.name == "boom").unwrap();
        assert_eq!(boom.outcome, Outcome::WorkflowFailed);
        assert!(boom.payload.contains("mock engine panic for boom"));
    }

    #[test]
    fn test_run_empty() {
        let temp = tempfile::tempdir().unwrap();
        let engine = MockEngine::new();
        let collector = collector(&temp);
        let scheduler = Scheduler::new(&engine, &collector, 4).unwrap();
        assert!(scheduler.run(Vec::new()).is_empty());
    }
}
