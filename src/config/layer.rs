//! One configuration layer (config file or command line)

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::{ConfigError, ConfigResult};

/// Partial configuration. Unset fields fall through to lower layers.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigLayer {
    pub project: Option<String>,
    pub zone: Option<String>,
    pub images: Option<Vec<String>>,
    pub filter: Option<String>,
    pub out_path: Option<PathBuf>,
    pub parallel_count: Option<usize>,
    pub engine_binary: Option<PathBuf>,
    pub results_base: Option<String>,
    pub storage_root: Option<PathBuf>,
    pub storage_endpoint: Option<String>,
    pub agent_binary: Option<String>,
    pub suites_dir: Option<String>,
    pub scratch_dir: Option<PathBuf>,
    #[serde(skip)]
    pub access_token: Option<String>,
}

impl ConfigLayer {
    /// Load a layer from a TOML file.
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::parse(&content)
    }

    /// Parse a layer from TOML text.
    pub fn parse(content: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Fields set in `overlay` win.
    pub fn merge(self, overlay: ConfigLayer) -> ConfigLayer {
        ConfigLayer {
            project: overlay.project.or(self.project),
            zone: overlay.zone.or(self.zone),
            images: overlay.images.or(self.images),
            filter: overlay.filter.or(self.filter),
            out_path: overlay.out_path.or(self.out_path),
            parallel_count: overlay.parallel_count.or(self.parallel_count),
            engine_binary: overlay.engine_binary.or(self.engine_binary),
            results_base: overlay.results_base.or(self.results_base),
            storage_root: overlay.storage_root.or(self.storage_root),
            storage_endpoint: overlay.storage_endpoint.or(self.storage_endpoint),
            agent_binary: overlay.agent_binary.or(self.agent_binary),
            suites_dir: overlay.suites_dir.or(self.suites_dir),
            scratch_dir: overlay.scratch_dir.or(self.scratch_dir),
            access_token: overlay.access_token.or(self.access_token),
        }
    }
}

/// Split a comma-separated image list, dropping empty entries.
pub fn parse_images(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
