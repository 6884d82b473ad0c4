//! Guest Test Manager
//!
//! Builds one provisioning graph per test suite and image, submits the
//! graphs to a provisioning engine with bounded parallelism, and collects
//! the JUnit report each in-guest agent uploads when its tests finish.

pub mod collector;
pub mod config;
pub mod engine;
pub mod finalize;
pub mod graph;
pub mod logsink;
pub mod result;
pub mod scheduler;
pub mod suites;
pub mod workflow;

pub use collector::{CollectError, ResultCollector};
pub use config::{ConfigError, ConfigLayer, ManagerConfig};
pub use engine::{CommandEngine, EngineError, MockEngine, ProvisioningEngine};
pub use finalize::{FinalizeSettings, Finalizer};
pub use graph::{GraphError, ProvisioningGraph};
pub use logsink::{BufferedLogger, TracingLogger, WorkflowLogger};
pub use result::{Outcome, RunSummary, TestResult};
pub use scheduler::{Scheduler, SchedulerError};
pub use suites::{SuiteConfigurator, SuiteError, SuiteRegistry};
pub use workflow::{single_vm_test, TestVm, TestWorkflow, WorkflowError};
