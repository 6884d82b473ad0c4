//! Instance metadata access.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::Deserialize;

use crate::{AgentError, AgentResult};

/// Instance section of the metadata service.
pub const DEFAULT_METADATA_ENDPOINT: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance";

const METADATA_TIMEOUT: Duration = Duration::from_secs(10);

/// Source of the machine's own metadata.
pub trait MetadataSource: Send + Sync {
    /// Value of a custom attribute, `None` when the attribute is not set.
    fn attribute(&self, key: &str) -> AgentResult<Option<String>>;

    /// OAuth access token of the machine's default service account.
    fn access_token(&self) -> AgentResult<Option<String>> {
        Ok(None)
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Metadata server client.
#[derive(Debug, Clone)]
pub struct HttpMetadata {
    client: Client,
    endpoint: String,
}

impl HttpMetadata {
    pub fn new(endpoint: impl Into<String>) -> AgentResult<Self> {
        let client = Client::builder().timeout(METADATA_TIMEOUT).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        })
    }

    fn get(&self, path: &str) -> AgentResult<Option<reqwest::blocking::Response>> {
        let url = format!("{}/{}", self.endpoint, path);
        let response = self
            .client
            .get(&url)
            .header("Metadata-Flavor", "Google")
            .send()?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if !status.is_success() => Err(AgentError::Metadata(format!(
                "GET {} returned {}",
                url, status
            ))),
            _ => Ok(Some(response)),
        }
    }
}

impl MetadataSource for HttpMetadata {
    fn attribute(&self, key: &str) -> AgentResult<Option<String>> {
        match self.get(&format!("attributes/{}", key))? {
            Some(response) => Ok(Some(response.text()?)),
            None => Ok(None),
        }
    }

    fn access_token(&self) -> AgentResult<Option<String>> {
        match self.get("service-accounts/default/token")? {
            Some(response) => Ok(Some(response.json::<TokenResponse>()?.access_token)),
            None => Ok(None),
        }
    }
}

/// Fixed attribute map.
#[derive(Debug, Clone, Default)]
pub struct StaticMetadata {
    attributes: HashMap<String, String>,
}

impl StaticMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

impl MetadataSource for StaticMetadata {
    fn attribute(&self, key: &str) -> AgentResult<Option<String>> {
        Ok(self.attributes.get(key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_metadata_lookup() {
        let metadata = StaticMetadata::new().with("_test_run", "TestVm1");
        assert_eq!(
            metadata.attribute("_test_run").unwrap().as_deref(),
            Some("TestVm1")
        );
        assert_eq!(metadata.attribute("missing").unwrap(), None);
        assert_eq!(metadata.access_token().unwrap(), None);
    }

    #[test]
    fn test_http_metadata_trims_endpoint() {
        let metadata = HttpMetadata::new("http://169.254.169.254/computeMetadata/v1/instance/").unwrap();
        assert_eq!(
            metadata.endpoint,
            "http://169.254.169.254/computeMetadata/v1/instance"
        );
    }
}
