//! Built-in defaults (lowest layer)

use std::path::PathBuf;

use gtm_protocol::storage::DEFAULT_STORAGE_ENDPOINT;

/// Values used when neither the config file nor the command line sets them.
#[derive(Debug, Clone)]
pub struct BuiltinDefaults {
    pub out_path: PathBuf,
    pub parallel_count: usize,
    pub engine_binary: PathBuf,
    /// Agent binary shipped alongside the manager.
    pub agent_binary: String,
    /// Directory of suite binaries. Suite `shutdown-scripts` lives at
    /// `shutdown_scripts/shutdown_scripts.test`.
    pub suites_dir: String,
    pub storage_endpoint: String,
    /// Where graph files are written for the engine.
    pub scratch_dir: PathBuf,
}

impl Default for BuiltinDefaults {
    fn default() -> Self {
        Self {
            out_path: PathBuf::from("junit.xml"),
            parallel_count: 5,
            engine_binary: PathBuf::from("daisy"),
            agent_binary: "/tmp/test_manager/gtm-agent".to_string(),
            suites_dir: "/tmp/test_manager/test_suites".to_string(),
            storage_endpoint: DEFAULT_STORAGE_ENDPOINT.to_string(),
            scratch_dir: std::env::temp_dir().join("test-manager"),
        }
    }
}

impl BuiltinDefaults {
    /// Report base used when none is configured.
    pub fn results_base(project: &str) -> String {
        format!("gs://{}-test-results", project)
    }
}
