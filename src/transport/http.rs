use async_trait::async_trait;
use reqwest::header::ACCEPT;
use std::time::Duration;

use super::{FhirRequest, FhirResponse, Transport};
use crate::error::{ConformanceError, Result};

const FHIR_JSON: &str = "application/fhir+json";

/// reqwest-backed transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, timeout })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, request: &FhirRequest) -> Result<FhirResponse> {
        let mut builder = self
            .client
            .get(request.url.clone())
            .query(&request.query)
            .header(ACCEPT, FHIR_JSON);
        if let Some(token) = &request.bearer_token {
            builder = builder.bearer_auth(token);
        }

        tracing::debug!("GET {} {:?}", request.url, request.query);
        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ConformanceError::timeout(self.timeout)
            } else {
                ConformanceError::Http(e)
            }
        })?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.to_string(), value.to_string()))
            })
            .collect();
        let body = response.text().await?;

        Ok(FhirResponse {
            status,
            headers,
            body,
        })
    }
}
