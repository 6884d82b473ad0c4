//! Object store speaking the storage JSON API over HTTP.

use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::{StatusCode, Url};

use super::{ObjectStore, StorageError, StorageResult};
use crate::url::GcsUrl;

/// Public endpoint of the storage JSON API.
pub const DEFAULT_STORAGE_ENDPOINT: &str = "https://storage.googleapis.com";

/// Request timeout for a single object transfer.
const TRANSFER_TIMEOUT: Duration = Duration::from_secs(300);

/// HTTP object store with optional bearer-token authentication.
#[derive(Debug, Clone)]
pub struct HttpObjectStore {
    client: Client,
    endpoint: Url,
    access_token: Option<String>,
}

impl HttpObjectStore {
    /// Create a store against `endpoint`, e.g. [`DEFAULT_STORAGE_ENDPOINT`].
    pub fn new(endpoint: &str, access_token: Option<String>) -> StorageResult<Self> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| StorageError::Http(format!("invalid endpoint {:?}: {}", endpoint, e)))?;
        if endpoint.cannot_be_a_base() {
            return Err(StorageError::Http(format!(
                "endpoint {} cannot be used as a base URL",
                endpoint
            )));
        }
        let client = Client::builder().timeout(TRANSFER_TIMEOUT).build()?;
        Ok(Self {
            client,
            endpoint,
            access_token,
        })
    }

    /// `<endpoint>/storage/v1/b/<bucket>/o/<object>?alt=media`
    fn media_url(&self, url: &GcsUrl) -> StorageResult<Url> {
        let object = url.require_object()?;
        let mut out = self.endpoint.clone();
        out.path_segments_mut()
            .map_err(|_| StorageError::Http("endpoint cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(["storage", "v1", "b", url.bucket(), "o", object]);
        out.query_pairs_mut().append_pair("alt", "media");
        Ok(out)
    }

    /// `<endpoint>/upload/storage/v1/b/<bucket>/o?uploadType=media&name=<object>`
    fn upload_url(&self, url: &GcsUrl) -> StorageResult<Url> {
        let object = url.require_object()?;
        let mut out = self.endpoint.clone();
        out.path_segments_mut()
            .map_err(|_| StorageError::Http("endpoint cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(["upload", "storage", "v1", "b", url.bucket(), "o"]);
        out.query_pairs_mut()
            .append_pair("uploadType", "media")
            .append_pair("name", object);
        Ok(out)
    }

    fn authorize(&self, request: reqwest::blocking::RequestBuilder) -> reqwest::blocking::RequestBuilder {
        match &self.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

impl ObjectStore for HttpObjectStore {
    fn download(&self, url: &GcsUrl) -> StorageResult<Vec<u8>> {
        let request = self.authorize(self.client.get(self.media_url(url)?));
        let response = request.send()?;
        match response.status() {
            StatusCode::NOT_FOUND => Err(StorageError::NotFound(url.clone())),
            status if !status.is_success() => Err(StorageError::Http(format!(
                "GET {} returned {}",
                url, status
            ))),
            _ => Ok(response.bytes()?.to_vec()),
        }
    }

    fn upload(&self, url: &GcsUrl, data: &[u8]) -> StorageResult<()> {
        let request = self
            .authorize(self.client.post(self.upload_url(url)?))
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(data.to_vec());
        let response = request.send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(StorageError::Http(format!("upload to {} returned {}", url, status)));
        }
        tracing::debug!(object = %url, bytes = data.len(), "uploaded object");
        Ok(())
    }
}
