//! `gs://bucket/object` URLs.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Scheme prefix for object URLs.
pub const GCS_SCHEME: &str = "gs://";

/// Errors parsing an object URL.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UrlError {
    #[error("URL {0:?} does not start with gs://")]
    MissingScheme(String),

    #[error("URL {0:?} has no bucket")]
    MissingBucket(String),

    #[error("URL {0:?} names a bucket but no object")]
    MissingObject(String),
}

/// A bucket plus an object path inside it.
///
/// The object path never has leading or trailing slashes. It may be empty,
/// in which case the URL refers to the bucket root and can only be used as
/// a base for [`GcsUrl::join`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GcsUrl {
    bucket: String,
    object: String,
}

impl GcsUrl {
    /// Build a URL from its parts.
    pub fn new(bucket: impl Into<String>, object: impl AsRef<str>) -> Result<Self, UrlError> {
        let bucket = bucket.into();
        if bucket.is_empty() || bucket.contains('/') {
            return Err(UrlError::MissingBucket(bucket));
        }
        Ok(Self {
            bucket,
            object: normalize_object(object.as_ref()),
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn object(&self) -> &str {
        &self.object
    }

    /// Append path segments to the object path.
    pub fn join(&self, segment: &str) -> GcsUrl {
        let segment = normalize_object(segment);
        let object = match (self.object.is_empty(), segment.is_empty()) {
            (_, true) => self.object.clone(),
            (true, false) => segment,
            (false, false) => format!("{}/{}", self.object, segment),
        };
        GcsUrl {
            bucket: self.bucket.clone(),
            object,
        }
    }

    /// Last path segment of the object, if any.
    pub fn file_name(&self) -> Option<&str> {
        self.object.rsplit('/').next().filter(|s| !s.is_empty())
    }

    /// The URL with its last path segment removed.
    pub fn parent(&self) -> Option<GcsUrl> {
        if self.object.is_empty() {
            return None;
        }
        let object = match self.object.rfind('/') {
            Some(idx) => self.object[..idx].to_string(),
            None => String::new(),
        };
        Some(GcsUrl {
            bucket: self.bucket.clone(),
            object,
        })
    }

    /// Fail unless the URL names an object rather than a bucket root.
    pub fn require_object(&self) -> Result<&str, UrlError> {
        if self.object.is_empty() {
            Err(UrlError::MissingObject(self.to_string()))
        } else {
            Ok(&self.object)
        }
    }
}

fn normalize_object(object: &str) -> String {
    object
        .split('/')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

impl FromStr for GcsUrl {
    type Err = UrlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix(GCS_SCHEME)
            .ok_or_else(|| UrlError::MissingScheme(s.to_string()))?;
        let (bucket, object) = match rest.split_once('/') {
            Some((bucket, object)) => (bucket, object),
            None => (rest, ""),
        };
        if bucket.is_empty() {
            return Err(UrlError::MissingBucket(s.to_string()));
        }
        GcsUrl::new(bucket, object)
    }
}

impl TryFrom<String> for GcsUrl {
    type Error = UrlError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<GcsUrl> for String {
    fn from(url: GcsUrl) -> Self {
        url.to_string()
    }
}

impl fmt::Display for GcsUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.object.is_empty() {
            write!(f, "{}{}", GCS_SCHEME, self.bucket)
        } else {
            write!(f, "{}{}/{}", GCS_SCHEME, self.bucket, self.object)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_object_url() {
        let url: GcsUrl = "gs://my-bucket/runs/ssh/junit.xml".parse().unwrap();
        assert_eq!(url.bucket(), "my-bucket");
        assert_eq!(url.object(), "runs/ssh/junit.xml");
        assert_eq!(url.file_name(), Some("junit.xml"));
        assert_eq!(url.to_string(), "gs://my-bucket/runs/ssh/junit.xml");
    }

    #[test]
    fn test_parse_bucket_root() {
        let url: GcsUrl = "gs://my-bucket/".parse().unwrap();
        assert_eq!(url.object(), "");
        assert_eq!(url.to_string(), "gs://my-bucket");
        assert!(url.require_object().is_err());
        assert!(url.parent().is_none());
    }

    #[test]
    fn test_parse_rejects_other_schemes() {
        assert_eq!(
            "s3://bucket/key".parse::<GcsUrl>(),
            Err(UrlError::MissingScheme("s3://bucket/key".to_string()))
        );
        assert!(matches!("gs:///key".parse::<GcsUrl>(), Err(UrlError::MissingBucket(_))));
    }

    #[test]
    fn test_join_normalizes_slashes() {
        let base: GcsUrl = "gs://b/base/".parse().unwrap();
        assert_eq!(base.join("/a//b/").to_string(), "gs://b/base/a/b");
        let root: GcsUrl = "gs://b".parse().unwrap();
        assert_eq!(root.join("x").to_string(), "gs://b/x");
        assert_eq!(root.join("").to_string(), "gs://b");
    }

    #[test]
    fn test_parent() {
        let url: GcsUrl = "gs://b/outs/junit.xml".parse().unwrap();
        assert_eq!(url.parent().unwrap().to_string(), "gs://b/outs");
        let top: GcsUrl = "gs://b/junit.xml".parse().unwrap();
        assert_eq!(top.parent().unwrap().to_string(), "gs://b");
    }

    #[test]
    fn test_serde_as_string() {
        let url: GcsUrl = "gs://b/o".parse().unwrap();
        let json = serde_json::to_string(&url).unwrap();
        assert_eq!(json, "\"gs://b/o\"");
        let back: GcsUrl = serde_json::from_str(&json).unwrap();
        assert_eq!(back, url);
        assert!(serde_json::from_str::<GcsUrl>("\"http://x\"").is_err());
    }
}
