//! Request/response types and the transport seam the runner talks through.

#[cfg(feature = "http-transport")]
pub mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::error::Result;

#[cfg(feature = "http-transport")]
pub use http::HttpTransport;

/// An authenticated or anonymous GET against a FHIR base URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FhirRequest {
    pub url: Url,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub bearer_token: Option<String>,
}

impl FhirRequest {
    /// `path` is appended to the base URL, which keeps its own path segments.
    pub fn new(base_url: &Url, path: impl Into<String>) -> Result<Self> {
        let path = path.into();
        let url = Url::parse(&format!(
            "{}/{}",
            base_url.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        ))?;
        Ok(Self {
            url,
            path,
            query: Vec::new(),
            bearer_token: None,
        })
    }

    pub fn with_query(mut self, query: Vec<(String, String)>) -> Self {
        self.query = query;
        self
    }

    pub fn with_bearer_token(mut self, token: Option<&str>) -> Self {
        self.bearer_token = token.map(str::to_string);
        self
    }

    pub fn query_value(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FhirResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl FhirResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    /// Parsed JSON body; `None` when the body is empty or not a JSON object.
    pub fn resource(&self) -> Option<Value> {
        if self.body.trim().is_empty() {
            return None;
        }
        serde_json::from_str::<Value>(&self.body)
            .ok()
            .filter(Value::is_object)
    }

    pub fn resource_type(&self) -> Option<String> {
        self.resource().and_then(|resource| {
            resource
                .get("resourceType")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Issues GET requests on behalf of the runner. Retry policy, if any, lives
/// in the implementation; the runner never retries transport errors.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, request: &FhirRequest) -> Result<FhirResponse>;
}
