use async_trait::async_trait;
use octofhir_conformance::*;
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

#[allow(dead_code)]
pub const BASE_URL: &str = "http://fhir.test/r4";
#[allow(dead_code)]
pub const TOKEN: &str = "test-token";

/// A scripted response: first stub whose path and query match wins.
#[derive(Debug, Clone)]
pub struct Stub {
    path: String,
    query: Option<Vec<(String, String)>>,
    authenticated: Option<bool>,
    delay: Option<Duration>,
    response: FhirResponse,
}

#[allow(dead_code)]
impl Stub {
    pub fn get(path: &str, status: u16, body: Value) -> Self {
        Self {
            path: path.to_string(),
            query: None,
            authenticated: None,
            delay: None,
            response: FhirResponse::new(status, body.to_string()),
        }
    }

    pub fn raw(path: &str, status: u16, body: &str) -> Self {
        Self {
            response: FhirResponse::new(status, body),
            ..Self::get(path, status, Value::Null)
        }
    }

    /// Only match requests carrying exactly these query parameters.
    pub fn with_query(mut self, query: &[(&str, &str)]) -> Self {
        self.query = Some(
            query
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );
        self
    }

    pub fn authenticated(mut self, authenticated: bool) -> Self {
        self.authenticated = Some(authenticated);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn matches(&self, request: &FhirRequest) -> bool {
        if self.path != request.path {
            return false;
        }
        if let Some(query) = &self.query {
            let mut expected = query.clone();
            let mut actual = request.query.clone();
            expected.sort();
            actual.sort();
            if expected != actual {
                return false;
            }
        }
        match self.authenticated {
            Some(authenticated) => authenticated == request.bearer_token.is_some(),
            None => true,
        }
    }
}

/// In-memory transport. Unmatched requests fail like a refused connection.
#[derive(Debug, Default)]
pub struct MockTransport {
    stubs: Mutex<Vec<Stub>>,
    calls: Mutex<Vec<FhirRequest>>,
}

#[allow(dead_code)]
impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn stub(&self, stub: Stub) {
        self.stubs.lock().unwrap().push(stub);
    }

    pub fn calls(&self) -> Vec<FhirRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn get(&self, request: &FhirRequest) -> Result<FhirResponse> {
        self.calls.lock().unwrap().push(request.clone());
        let stub = self
            .stubs
            .lock()
            .unwrap()
            .iter()
            .find(|stub| stub.matches(request))
            .cloned();

        let Some(stub) = stub else {
            return Err(ConformanceError::transport(format!(
                "connection refused: {} {:?}",
                request.url, request.query
            )));
        };
        if let Some(delay) = stub.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(stub.response)
    }
}

#[allow(dead_code)]
pub fn context(transport: Arc<MockTransport>) -> ExecutionContext {
    ExecutionContext::new(Url::parse(BASE_URL).unwrap(), transport)
        .with_bearer_token(TOKEN)
        .with_patient_ids(["85"])
}

/// Server model declaring the US Core Encounter searches.
#[allow(dead_code)]
pub fn encounter_server() -> CapabilityModel {
    CapabilityModel::from_capability_statement(&capability_statement(), "Encounter").unwrap()
}

#[allow(dead_code)]
pub fn runner(transport: Arc<MockTransport>) -> SequenceRunner {
    SequenceRunner::new(context(transport), encounter_server())
}

#[allow(dead_code)]
pub fn capability_statement() -> Value {
    let content = include_str!("../fixtures/us_core_capability_statement.json");
    serde_json::from_str(content).unwrap()
}

#[allow(dead_code)]
pub fn encounter(id: &str, patient: &str) -> Value {
    json!({
        "resourceType": "Encounter",
        "id": id,
        "meta": { "lastUpdated": "2024-03-01T10:15:00Z" },
        "identifier": [
            { "system": "http://hospital.example.org", "value": format!("enc-{id}") }
        ],
        "status": "finished",
        "class": {
            "system": "http://terminology.hl7.org/CodeSystem/v3-ActCode",
            "code": "AMB"
        },
        "type": [{
            "coding": [{ "system": "http://snomed.info/sct", "code": "185349003" }],
            "text": "Encounter for check up"
        }],
        "subject": { "reference": format!("Patient/{patient}") },
        "period": { "start": "2024-02-27T09:00:00Z", "end": "2024-02-27T09:30:00Z" }
    })
}

#[allow(dead_code)]
pub fn bundle(resources: &[Value]) -> Value {
    json!({
        "resourceType": "Bundle",
        "type": "searchset",
        "total": resources.len(),
        "entry": resources
            .iter()
            .map(|resource| json!({ "fullUrl": format!("{BASE_URL}/Encounter/{}", resource["id"].as_str().unwrap_or_default()), "resource": resource }))
            .collect::<Vec<_>>()
    })
}

#[allow(dead_code)]
pub fn operation_outcome(diagnostics: &str) -> Value {
    json!({
        "resourceType": "OperationOutcome",
        "issue": [{ "severity": "error", "code": "required", "diagnostics": diagnostics }]
    })
}

#[allow(dead_code)]
pub fn definition(definitions: &[TestDefinition], id: &str) -> TestDefinition {
    definitions
        .iter()
        .find(|definition| definition.id == id)
        .cloned()
        .unwrap_or_else(|| panic!("no test definition {id}"))
}
