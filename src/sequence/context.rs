use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::capability::CapabilityModel;
use crate::core::ConformanceConfig;
use crate::error::{ConformanceError, Result};
use crate::transport::{FhirRequest, Transport};

/// Everything a test needs from its environment: where the server is, how
/// to authenticate, which patients to use, and the transport to reach it.
#[derive(Clone)]
pub struct ExecutionContext {
    pub base_url: Url,
    bearer_token: Option<String>,
    pub patient_ids: Vec<String>,
    pub request_timeout: Duration,
    transport: Arc<dyn Transport>,
}

impl ExecutionContext {
    pub fn new(base_url: Url, transport: Arc<dyn Transport>) -> Self {
        Self {
            base_url,
            bearer_token: None,
            patient_ids: Vec::new(),
            request_timeout: Duration::from_secs(30),
            transport,
        }
    }

    pub fn from_config(config: &ConformanceConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        config.validate()?;
        let mut context = Self::new(config.base_url()?, transport)
            .with_patient_ids(config.patient_ids.iter().cloned())
            .with_request_timeout(config.request_timeout());
        context.bearer_token = config.token().map(str::to_string);
        Ok(context)
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        self.bearer_token = (!token.trim().is_empty()).then_some(token);
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
        self.request_timeout = timeout;
        self
    }

    pub fn token(&self) -> Option<&str> {
        self.bearer_token.as_deref()
    }

    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    /// Fetch `<base>/metadata` and read the declarations for `resource_type`.
    pub async fn fetch_capability_model(&self, resource_type: &str) -> Result<CapabilityModel> {
        let request = FhirRequest::new(&self.base_url, "metadata")?.with_bearer_token(self.token());
        let response = tokio::time::timeout(self.request_timeout, self.transport.get(&request))
            .await
            .map_err(|_| ConformanceError::timeout(self.request_timeout))??;

        if response.status != 200 {
            return Err(ConformanceError::transport(format!(
                "GET {} returned status {}",
                request.url, response.status
            )));
        }
        let statement = response
            .resource()
            .ok_or_else(|| ConformanceError::malformed("capability response has no JSON body"))?;
        CapabilityModel::from_capability_statement(&statement, resource_type)
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("base_url", &self.base_url.as_str())
            .field("has_token", &self.bearer_token.is_some())
            .field("patient_ids", &self.patient_ids)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}
