//! Structured log sinks attached to provisioning graphs.
//!
//! The engine's own log destinations are switched off at finalization; its
//! output is routed through the graph's sink instead.

use std::fmt;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Receives log lines produced while a graph is validated or executed.
pub trait WorkflowLogger: Send + Sync + fmt::Debug {
    fn log(&self, workflow: &str, message: &str);
}

/// One captured log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub workflow: String,
    pub message: String,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {}",
            self.timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
            self.workflow,
            self.message
        )
    }
}

/// In-memory sink shared by all workers.
#[derive(Debug, Default)]
pub struct BufferedLogger {
    entries: Mutex<Vec<LogEntry>>,
}

impl BufferedLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        match self.entries.lock() {
            Ok(entries) => entries.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Entries logged for one workflow, in order.
    pub fn entries_for(&self, workflow: &str) -> Vec<LogEntry> {
        self.entries()
            .into_iter()
            .filter(|e| e.workflow == workflow)
            .collect()
    }
}

impl WorkflowLogger for BufferedLogger {
    fn log(&self, workflow: &str, message: &str) {
        let entry = LogEntry {
            timestamp: Utc::now(),
            workflow: workflow.to_string(),
            message: message.to_string(),
        };
        match self.entries.lock() {
            Ok(mut entries) => entries.push(entry),
            Err(poisoned) => poisoned.into_inner().push(entry),
        }
    }
}

/// Sink forwarding every line to `tracing` at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl WorkflowLogger for TracingLogger {
    fn log(&self, workflow: &str, message: &str) {
        tracing::debug!(workflow, "{}", message);
    }
}
