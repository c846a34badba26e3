//! Execution state machine for a single test definition.
//!
//! Each run walks `applicability -> auth -> prerequisite data -> value
//! resolution -> request [-> status fallback] -> response validation` and
//! stops at the first check that produces a verdict. Checks are plain
//! functions returning `Check<T>`; the `Err` side carries the terminal
//! verdict, so the control flow reads as a list of guard clauses.

use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::context::ExecutionContext;
use super::extractor::{TestDefinition, TestKind};
use super::index::ExampleIndex;
use super::outcome::{Outcome, TestResult, Verdict, messages};
use super::resolver::{PATIENT_PARAM, SearchParameterRegistry, SearchValueResolver};
use crate::capability::CapabilityModel;
use crate::core::{ConformanceConfig, FallbackStatuses};
use crate::error::{ConformanceError, Result};
use crate::transport::{FhirRequest, FhirResponse, Transport};
use crate::validation::{BasicResourceValidator, StructuralValidator};

type Check<T> = std::result::Result<T, Verdict>;
type Query = Vec<(String, String)>;

const SUCCESS_CODES: &[u16] = &[200, 201];
const STATUS_PARAM: &str = "status";

pub struct SequenceRunner {
    context: ExecutionContext,
    server: CapabilityModel,
    validator: Arc<dyn StructuralValidator>,
    search_parameters: SearchParameterRegistry,
    fallback_statuses: FallbackStatuses,
}

impl SequenceRunner {
    /// `server` is what the server under test declares for the resource type.
    pub fn new(context: ExecutionContext, server: CapabilityModel) -> Self {
        Self {
            context,
            server,
            validator: Arc::new(BasicResourceValidator::new()),
            search_parameters: SearchParameterRegistry::builtin(),
            fallback_statuses: FallbackStatuses::default(),
        }
    }

    pub fn from_config(
        config: &ConformanceConfig,
        transport: Arc<dyn Transport>,
        server: CapabilityModel,
    ) -> Result<Self> {
        let context = ExecutionContext::from_config(config, transport)?;
        Ok(Self::new(context, server)
            .with_search_parameters(config.search_parameters.clone())
            .with_fallback_statuses(config.fallback_statuses.clone()))
    }

    pub fn with_validator(mut self, validator: Arc<dyn StructuralValidator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_search_parameters(mut self, search_parameters: SearchParameterRegistry) -> Self {
        self.search_parameters = search_parameters;
        self
    }

    pub fn with_fallback_statuses(mut self, fallback_statuses: FallbackStatuses) -> Self {
        self.fallback_statuses = fallback_statuses;
        self
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    pub fn server(&self) -> &CapabilityModel {
        &self.server
    }

    /// Run one definition. Always yields exactly one verdict; `index` only
    /// grows when the test passes.
    pub async fn run(&self, definition: &TestDefinition, index: &mut ExampleIndex) -> Outcome {
        info!("running {} {}", definition.resource_type, definition.id);

        let mut warnings = Vec::new();
        let verdict = match self.execute(definition, index, &mut warnings).await {
            Ok(()) => Verdict::Pass,
            Err(verdict) => verdict,
        };

        info!(
            "{} {} finished: {} ({} warnings)",
            definition.resource_type,
            definition.id,
            verdict,
            warnings.len()
        );
        Outcome::new(verdict, warnings)
    }

    /// Run definitions strictly in order; later tests see what earlier ones
    /// captured in `index`.
    pub async fn run_sequence(
        &self,
        definitions: &[TestDefinition],
        index: &mut ExampleIndex,
    ) -> Vec<TestResult> {
        let mut results = Vec::with_capacity(definitions.len());
        for definition in definitions {
            let outcome = self.run(definition, index).await;
            results.push(TestResult {
                id: definition.id.clone(),
                description: definition.description(),
                outcome,
            });
        }
        results
    }

    async fn execute(
        &self,
        definition: &TestDefinition,
        index: &mut ExampleIndex,
        warnings: &mut Vec<String>,
    ) -> Check<()> {
        self.check_applicability(definition)?;
        self.check_auth()?;

        match definition.kind {
            TestKind::UnauthorizedSearch => self.run_unauthorized_search(definition).await,
            TestKind::Read => self.run_read(definition, index).await,
            TestKind::Search if definition.is_patient_bound() => {
                self.run_patient_search(definition, index, warnings).await
            }
            TestKind::Search => self.run_derived_search(definition, index, warnings).await,
        }
    }

    fn check_applicability(&self, definition: &TestDefinition) -> Check<()> {
        let resource_type = &definition.resource_type;
        let same_type = self.server.resource_type() == resource_type;
        let (supported, operation) = match definition.kind {
            TestKind::Read => (same_type && self.server.supports_interaction("read"), "read"),
            TestKind::Search => (
                same_type && self.server.supports_search(&definition.parameters),
                "search",
            ),
            TestKind::UnauthorizedSearch => (
                same_type && self.server.supports_interaction("search-type"),
                "search",
            ),
        };

        if !supported {
            let expectation = definition.expectation();
            if expectation.is_mandatory() {
                warn!(
                    "{} {} is {} in the reference but not declared by the server",
                    resource_type, definition.id, expectation
                );
            } else {
                debug!(
                    "{} {} not declared by server ({} in reference)",
                    resource_type, definition.id, expectation
                );
            }
            return Err(Verdict::Skip(messages::not_supported(resource_type, operation)));
        }
        Ok(())
    }

    fn check_auth(&self) -> Check<()> {
        match self.context.token() {
            Some(_) => Ok(()),
            None => Err(Verdict::Omit(messages::NO_TOKEN.to_string())),
        }
    }

    async fn run_unauthorized_search(&self, definition: &TestDefinition) -> Check<()> {
        let query: Query = self
            .context
            .patient_ids
            .first()
            .map(|patient| vec![(PATIENT_PARAM.to_string(), patient.clone())])
            .unwrap_or_default();

        let response = self
            .send(self.request(&definition.resource_type, query, false)?)
            .await?;
        expect_status(&response, &[401])
    }

    /// Status, body, type and id of the returned resource. Structure is
    /// checked on search entries, not here.
    async fn run_read(&self, definition: &TestDefinition, index: &mut ExampleIndex) -> Check<()> {
        let resource_type = &definition.resource_type;
        let Some(id) = index.first_id().map(str::to_string) else {
            return Err(Verdict::Skip(messages::no_resources_for_patient(
                resource_type,
            )));
        };

        let response = self
            .send(self.request(&format!("{resource_type}/{id}"), Vec::new(), true)?)
            .await?;
        expect_status(&response, SUCCESS_CODES)?;

        let resource = response
            .resource()
            .ok_or_else(|| Verdict::Fail(messages::resource_missing(resource_type)))?;
        if resource.get("resourceType").and_then(Value::as_str) != Some(resource_type.as_str()) {
            return Err(Verdict::Fail(messages::wrong_resource_type(resource_type)));
        }
        if resource.get("id").and_then(Value::as_str) != Some(id.as_str()) {
            return Err(Verdict::Fail(messages::wrong_id(&id)));
        }

        index.record(&resource, None);
        Ok(())
    }

    /// Search whose values all come from the configured patients. This is the
    /// first search of a sequence, so an empty result is a Skip.
    async fn run_patient_search(
        &self,
        definition: &TestDefinition,
        index: &mut ExampleIndex,
        warnings: &mut Vec<String>,
    ) -> Check<()> {
        let resource_type = &definition.resource_type;
        let mut captured: Vec<(String, Value)> = Vec::new();

        for patient in &self.context.patient_ids {
            let query: Query = definition
                .parameters
                .iter()
                .map(|param| (param.clone(), patient.clone()))
                .collect();

            let entries = self.search(resource_type, &query, warnings).await?;
            if entries.is_empty() {
                debug!("no {} resources for patient {}", resource_type, patient);
                continue;
            }
            self.validate_entries(resource_type, &entries, &query)?;
            captured.extend(entries.into_iter().map(|entry| (patient.clone(), entry)));
        }

        if captured.is_empty() {
            return Err(Verdict::Skip(messages::no_resources_available(
                resource_type,
            )));
        }
        for (patient, resource) in &captured {
            index.record(resource, Some(patient));
        }
        Ok(())
    }

    /// Search whose values come from an example captured earlier.
    async fn run_derived_search(
        &self,
        definition: &TestDefinition,
        index: &mut ExampleIndex,
        warnings: &mut Vec<String>,
    ) -> Check<()> {
        let resource_type = &definition.resource_type;
        if index.is_empty() {
            return Err(Verdict::Skip(messages::no_resources_available(
                resource_type,
            )));
        }

        let (patient, query) = self.resolve_query(definition, index)?;
        let entries = self.search(resource_type, &query, warnings).await?;
        if entries.is_empty() {
            return Err(Verdict::Fail(messages::NO_RESOURCES_RETURNED.to_string()));
        }
        self.validate_entries(resource_type, &entries, &query)?;

        for resource in &entries {
            index.record(resource, patient.as_deref());
        }
        Ok(())
    }

    /// Query values from the first example that resolves every parameter.
    fn resolve_query(
        &self,
        definition: &TestDefinition,
        index: &ExampleIndex,
    ) -> Check<(Option<String>, Query)> {
        let resource_type = &definition.resource_type;
        let mut first_unresolved: Option<String> = None;

        'examples: for (_, entry) in index.iter() {
            let mut query = Query::with_capacity(definition.parameters.len());
            for param in &definition.parameters {
                let param_definition = self.search_parameters.definition(resource_type, param);
                let value = if param == PATIENT_PARAM {
                    entry.patient_id.clone().or_else(|| {
                        SearchValueResolver::resolve(&entry.resource, &param_definition.path)
                            .map(|reference| reference_id(&reference).to_string())
                    })
                } else {
                    SearchValueResolver::resolve(&entry.resource, &param_definition.path)
                };

                match value {
                    Some(value) => query.push((param.clone(), value)),
                    None => {
                        first_unresolved.get_or_insert(param_definition.path);
                        continue 'examples;
                    }
                }
            }
            let patient = query
                .iter()
                .find(|(name, _)| name == PATIENT_PARAM)
                .map(|(_, value)| value.clone())
                .or_else(|| entry.patient_id.clone());
            return Ok((patient, query));
        }

        let path = first_unresolved.unwrap_or_else(|| definition.parameters.join(", "));
        Err(Verdict::Skip(messages::unresolved_path(&path)))
    }

    /// Issue the search, applying the status fallback on a 400, and return
    /// the bundle entries of the requested type.
    async fn search(
        &self,
        resource_type: &str,
        query: &Query,
        warnings: &mut Vec<String>,
    ) -> Check<Vec<Value>> {
        let response = self
            .send(self.request(resource_type, query.clone(), true)?)
            .await?;
        if response.status != 400 {
            return bundle_entries(&response, resource_type);
        }

        if !is_operation_outcome(&response) {
            return Err(Verdict::Fail(
                messages::BAD_REQUEST_WITHOUT_OUTCOME.to_string(),
            ));
        }

        warn!(
            "{} search {:?} rejected with 400, retrying with status",
            resource_type, query
        );
        let warning = messages::undocumented_search(resource_type);
        if !warnings.contains(&warning) {
            warnings.push(warning);
        }

        let already_has_status = query.iter().any(|(name, _)| name == STATUS_PARAM);
        let fallback_status = self.fallback_statuses.first(resource_type);
        let Some(status) = fallback_status.filter(|_| !already_has_status) else {
            return Err(Verdict::Fail(messages::bad_response_code(
                SUCCESS_CODES,
                response.status,
            )));
        };

        let mut fallback_query = query.clone();
        fallback_query.push((STATUS_PARAM.to_string(), status.to_string()));
        let response = self
            .send(self.request(resource_type, fallback_query, true)?)
            .await?;
        bundle_entries(&response, resource_type)
    }

    fn validate_entries(&self, resource_type: &str, entries: &[Value], query: &Query) -> Check<()> {
        for entry in entries {
            self.validate_structure(entry, resource_type)?;
        }

        for entry in entries {
            let reference = format!(
                "{resource_type}/{}",
                entry.get("id").and_then(Value::as_str).unwrap_or("?")
            );
            for (name, requested) in query {
                let definition = self.search_parameters.definition(resource_type, name);
                let found = SearchValueResolver::resolve_all(entry, &definition.path);
                if !SearchValueResolver::matches(definition.param_type, requested, &found) {
                    return Err(Verdict::Fail(messages::value_mismatch(
                        name, &reference, &found, requested,
                    )));
                }
            }
        }
        Ok(())
    }

    fn validate_structure(&self, resource: &Value, resource_type: &str) -> Check<()> {
        let issues = self.validator.validate(resource, resource_type);
        if issues.is_empty() {
            return Ok(());
        }
        Err(Verdict::Fail(messages::invalid_resource(
            resource_type,
            &issues.join("; "),
        )))
    }

    fn request(&self, path: &str, query: Query, authenticated: bool) -> Check<FhirRequest> {
        let token = if authenticated { self.context.token() } else { None };
        FhirRequest::new(&self.context.base_url, path)
            .map(|request| request.with_query(query).with_bearer_token(token))
            .map_err(|e| Verdict::Fail(transport_failure(&e)))
    }

    /// One network call bounded by the context timeout. Transport errors are
    /// final; they are never retried here.
    async fn send(&self, request: FhirRequest) -> Check<FhirResponse> {
        debug!("GET {} {:?}", request.url, request.query);
        let timeout = self.context.request_timeout;
        match tokio::time::timeout(timeout, self.context.transport().get(&request)).await {
            Ok(Ok(response)) => {
                debug!("{} answered {}", request.url, response.status);
                Ok(response)
            }
            Ok(Err(e)) => Err(Verdict::Fail(transport_failure(&e))),
            Err(_) => Err(Verdict::Fail(ConformanceError::timeout(timeout).to_string())),
        }
    }
}

impl std::fmt::Debug for SequenceRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequenceRunner")
            .field("context", &self.context)
            .field("resource_type", &self.server.resource_type())
            .finish_non_exhaustive()
    }
}

/// Run independent resource-type sequences concurrently. Each sequence gets
/// its own example index; tests inside a sequence stay in order.
pub async fn run_sequences(
    sequences: &[(&SequenceRunner, Vec<TestDefinition>)],
) -> Vec<Vec<TestResult>> {
    let runs = sequences.iter().map(|(runner, definitions)| async move {
        let mut index = ExampleIndex::new();
        runner.run_sequence(definitions, &mut index).await
    });
    futures::future::join_all(runs).await
}

fn expect_status(response: &FhirResponse, expected: &[u16]) -> Check<()> {
    if expected.contains(&response.status) {
        return Ok(());
    }
    Err(Verdict::Fail(messages::bad_response_code(
        expected,
        response.status,
    )))
}

fn bundle_entries(response: &FhirResponse, resource_type: &str) -> Check<Vec<Value>> {
    expect_status(response, SUCCESS_CODES)?;

    let bundle = response.resource();
    let actual = bundle
        .as_ref()
        .and_then(|bundle| bundle.get("resourceType"))
        .and_then(Value::as_str)
        .unwrap_or("unknown");
    if actual != "Bundle" {
        return Err(Verdict::Fail(messages::not_a_bundle(actual)));
    }

    let entries = bundle
        .as_ref()
        .and_then(|bundle| bundle.get("entry"))
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| entry.get("resource"))
                .filter(|resource| {
                    resource.get("resourceType").and_then(Value::as_str) == Some(resource_type)
                })
                .cloned()
                .collect()
        })
        .unwrap_or_default();
    Ok(entries)
}

fn is_operation_outcome(response: &FhirResponse) -> bool {
    response.resource_type().as_deref() == Some("OperationOutcome")
}

fn transport_failure(error: &ConformanceError) -> String {
    if error.is_transport() {
        error.to_string()
    } else {
        format!("Transport error: {error}")
    }
}

fn reference_id(reference: &str) -> &str {
    reference.rsplit('/').next().unwrap_or(reference)
}
