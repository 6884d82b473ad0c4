//! Manager configuration
//!
//! Layers, lowest precedence first:
//! 1. Built-in defaults
//! 2. TOML config file (`--config`)
//! 3. CLI flags
//!
//! The merged layer is resolved into a [`ManagerConfig`]; required values
//! missing from every layer are reported as [`ConfigError::Missing`].

mod defaults;
mod layer;

pub use defaults::BuiltinDefaults;
pub use layer::{parse_images, ConfigLayer};

use std::io;
use std::path::PathBuf;

use gtm_protocol::GcsUrl;

use crate::finalize::FinalizeSettings;

/// Errors loading or resolving configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("missing required parameter: {0}")]
    Missing(&'static str),

    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Result type for configuration.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Fully resolved settings for one run.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub project: String,
    pub zone: String,
    pub images: Vec<String>,
    pub filter: Option<String>,
    pub out_path: PathBuf,
    pub parallel_count: usize,
    pub engine_binary: PathBuf,
    pub results_base: GcsUrl,
    pub storage_root: Option<PathBuf>,
    pub storage_endpoint: String,
    pub agent_binary: String,
    pub suites_dir: String,
    pub scratch_dir: PathBuf,
    pub access_token: Option<String>,
}

impl ManagerConfig {
    /// Resolve merged layers against the built-in defaults.
    pub fn resolve(layer: ConfigLayer) -> ConfigResult<Self> {
        let defaults = BuiltinDefaults::default();

        let project = required(layer.project, "project")?;
        let zone = required(layer.zone, "zone")?;
        let images: Vec<String> = layer
            .images
            .unwrap_or_default()
            .into_iter()
            .map(|i| i.trim().to_string())
            .filter(|i| !i.is_empty())
            .collect();
        if images.is_empty() {
            return Err(ConfigError::Missing("images"));
        }

        let parallel_count = layer.parallel_count.unwrap_or(defaults.parallel_count);
        if parallel_count == 0 {
            return Err(ConfigError::Invalid {
                field: "parallel_count",
                reason: "must be at least 1".to_string(),
            });
        }

        let results_base = layer
            .results_base
            .unwrap_or_else(|| BuiltinDefaults::results_base(&project));
        let results_base: GcsUrl = results_base.parse().map_err(|e| ConfigError::Invalid {
            field: "results_base",
            reason: format!("{}", e),
        })?;

        Ok(Self {
            project,
            zone,
            images,
            filter: layer.filter.filter(|f| !f.is_empty()),
            out_path: layer.out_path.unwrap_or(defaults.out_path),
            parallel_count,
            engine_binary: layer.engine_binary.unwrap_or(defaults.engine_binary),
            results_base,
            storage_root: layer.storage_root,
            storage_endpoint: layer.storage_endpoint.unwrap_or(defaults.storage_endpoint),
            agent_binary: layer.agent_binary.unwrap_or(defaults.agent_binary),
            suites_dir: layer.suites_dir.unwrap_or(defaults.suites_dir),
            scratch_dir: layer.scratch_dir.unwrap_or(defaults.scratch_dir),
            access_token: layer.access_token,
        })
    }

    /// Merge the optional file layer under the CLI layer, then resolve.
    pub fn load(file: Option<ConfigLayer>, cli: ConfigLayer) -> ConfigResult<Self> {
        Self::resolve(file.unwrap_or_default().merge(cli))
    }

    pub fn finalize_settings(&self) -> FinalizeSettings {
        FinalizeSettings {
            project: self.project.clone(),
            zone: self.zone.clone(),
            agent_binary: self.agent_binary.clone(),
            suites_dir: self.suites_dir.clone(),
            results_base: self.results_base.clone(),
        }
    }
}

fn required(value: Option<String>, name: &'static str) -> ConfigResult<String> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or(ConfigError::Missing(name))
}
