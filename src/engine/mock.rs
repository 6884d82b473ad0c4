//! In-process engine for tests.
//!
//! Scriptable per graph name: fail, panic, or succeed. On success it can play
//! the agent's part by uploading a report to the `_test_outspath` of the
//! graph's first machine.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use gtm_protocol::{GcsUrl, ObjectStore, OUTS_PATH_KEY, REPORT_FILE_NAME};

use super::{EngineError, EngineResult, ProvisioningEngine};
use crate::graph::ProvisioningGraph;

/// Scriptable engine.
#[derive(Default)]
pub struct MockEngine {
    next_run: AtomicU64,
    failures: HashMap<String, String>,
    panics: HashSet<String>,
    reports: Option<(Arc<dyn ObjectStore>, String)>,
    report_overrides: HashMap<String, String>,
    delay: Option<Duration>,
    executed: Mutex<Vec<String>>,
    validated: Mutex<Vec<String>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `execute` fail for graphs named `name`.
    pub fn fail_graph(mut self, name: &str, reason: &str) -> Self {
        self.failures.insert(name.to_string(), reason.to_string());
        self
    }

    /// Make `execute` panic for graphs named `name`.
    pub fn panic_on(mut self, name: &str) -> Self {
        self.panics.insert(name.to_string());
        self
    }

    /// On successful execution, upload `report` where the agent would.
    pub fn with_report(mut self, store: Arc<dyn ObjectStore>, report: &str) -> Self {
        self.reports = Some((store, report.to_string()));
        self
    }

    /// Upload `report` instead of the default one for graphs named `name`.
    /// Only takes effect together with [`Self::with_report`].
    pub fn with_report_for(mut self, name: &str, report: &str) -> Self {
        self.report_overrides.insert(name.to_string(), report.to_string());
        self
    }

    /// Block each execution for `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Names of executed graphs, in call order.
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn execute_count(&self) -> usize {
        self.executed().len()
    }

    pub fn validated(&self) -> Vec<String> {
        self.validated.lock().map(|v| v.clone()).unwrap_or_default()
    }

    /// Highest number of executions observed running at once.
    pub fn max_concurrency(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    fn upload_report(&self, graph: &ProvisioningGraph) -> EngineResult<()> {
        let Some((store, default_report)) = &self.reports else {
            return Ok(());
        };
        let report = self.report_overrides.get(&graph.name).unwrap_or(default_report);
        let failed = |reason: String| EngineError::Failed {
            name: graph.name.clone(),
            reason,
        };
        let outs = graph
            .instances()
            .next()
            .and_then(|i| i.metadata.get(OUTS_PATH_KEY))
            .ok_or_else(|| failed("no outs path on first machine".to_string()))?;
        let outs: GcsUrl = outs.parse().map_err(|e| failed(format!("{}", e)))?;
        store
            .upload(&outs.join(REPORT_FILE_NAME), report.as_bytes())
            .map_err(|e| failed(e.to_string()))
    }
}

/// Decrements the active counter when an execution ends, panics included.
struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ProvisioningEngine for MockEngine {
    fn allocate_run_id(&self) -> String {
        format!("run{:04}", self.next_run.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn validate(&self, graph: &ProvisioningGraph) -> EngineResult<()> {
        if let Ok(mut validated) = self.validated.lock() {
            validated.push(graph.name.clone());
        }
        graph.validate()?;
        Ok(())
    }

    fn execute(&self, graph: &ProvisioningGraph) -> EngineResult<()> {
        if let Ok(mut executed) = self.executed.lock() {
            executed.push(graph.name.clone());
        }
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = ActiveGuard(&self.active);
        self.max_active.fetch_max(now, Ordering::SeqCst);

        graph.log("mock engine: execute");
        if let Some(delay) = self.delay {
            thread::sleep(delay);
        }
        if self.panics.contains(&graph.name) {
            panic!("mock engine panic for {}", graph.name);
        }
        if let Some(reason) = self.failures.get(&graph.name) {
            return Err(EngineError::Failed {
                name: graph.name.clone(),
                reason: reason.clone(),
            });
        }
        self.upload_report(graph)
    }
}
