use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use url::Url;

use crate::error::{ConformanceError, Result};
use crate::sequence::resolver::SearchParameterRegistry;

/// Environment variable that overrides the configured bearer token.
pub const TOKEN_ENV: &str = "FHIR_BEARER_TOKEN";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConformanceConfig {
    pub base_url: String,
    #[serde(default)]
    pub bearer_token: Option<String>,
    #[serde(default)]
    pub patient_ids: Vec<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub fallback_statuses: FallbackStatuses,
    #[serde(default)]
    pub search_parameters: SearchParameterRegistry,
}

fn default_request_timeout_secs() -> u64 {
    30
}

/// Ordered status codes per resource type, tried when a server rejects a
/// search for lacking a `status` parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FallbackStatuses(HashMap<String, Vec<String>>);

impl Default for FallbackStatuses {
    fn default() -> Self {
        let encounter = [
            "planned",
            "arrived",
            "triaged",
            "in-progress",
            "onleave",
            "finished",
            "cancelled",
            "entered-in-error",
            "unknown",
        ];
        Self::empty().with("Encounter", encounter.map(str::to_string).to_vec())
    }
}

impl FallbackStatuses {
    pub fn empty() -> Self {
        Self(HashMap::new())
    }

    pub fn with(mut self, resource_type: impl Into<String>, statuses: Vec<String>) -> Self {
        self.0.insert(resource_type.into(), statuses);
        self
    }

    pub fn statuses(&self, resource_type: &str) -> &[String] {
        self.0.get(resource_type).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn first(&self, resource_type: &str) -> Option<&str> {
        self.statuses(resource_type).first().map(String::as_str)
    }
}

impl Default for ConformanceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/fhir".to_string(),
            bearer_token: None,
            patient_ids: vec!["example".to_string()],
            request_timeout_secs: default_request_timeout_secs(),
            fallback_statuses: FallbackStatuses::default(),
            search_parameters: SearchParameterRegistry::default(),
        }
    }
}

impl ConformanceConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Load from a JSON file, then apply the token environment override.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_json(&content)
            .map_err(|e| ConformanceError::config(format!("{}: {e}", path.display())))?
            .with_token_override(std::env::var(TOKEN_ENV).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    pub fn with_patient_ids<I, S>(mut self, patient_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.patient_ids = patient_ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_secs = timeout.as_secs();
        self
    }

    pub fn with_fallback_statuses(mut self, fallback_statuses: FallbackStatuses) -> Self {
        self.fallback_statuses = fallback_statuses;
        self
    }

    pub fn with_search_parameters(mut self, search_parameters: SearchParameterRegistry) -> Self {
        self.search_parameters = search_parameters;
        self
    }

    /// A non-empty override replaces the configured token.
    pub fn with_token_override(mut self, token: Option<String>) -> Self {
        if let Some(token) = token.filter(|t| !t.trim().is_empty()) {
            self.bearer_token = Some(token);
        }
        self
    }

    /// Configured token, treating an empty string as unset.
    pub fn token(&self) -> Option<&str> {
        self.bearer_token
            .as_deref()
            .filter(|token| !token.trim().is_empty())
    }

    pub fn base_url(&self) -> Result<Url> {
        Ok(Url::parse(&self.base_url)?)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        let url = self.base_url()?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConformanceError::config(format!(
                "base_url must use http or https, found {}",
                url.scheme()
            )));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConformanceError::config(
                "request_timeout_secs must be greater than zero",
            ));
        }
        if self.patient_ids.iter().any(|id| id.trim().is_empty()) {
            return Err(ConformanceError::config("patient_ids must not contain blanks"));
        }
        Ok(())
    }
}
