mod common;

use common::*;
use octofhir_conformance::*;
use pretty_assertions::assert_eq;
use serde_json::json;
use url::Url;

fn ids(definitions: &[TestDefinition]) -> Vec<&str> {
    definitions.iter().map(|d| d.id.as_str()).collect()
}

#[test]
fn test_us_core_encounter_ordering() {
    let definitions =
        CapabilityMetadataExtractor::extract_from_statement(&capability_statement(), "Encounter")
            .unwrap();

    assert_eq!(
        ids(&definitions),
        [
            "unauthorized_search",
            "search_by_patient",
            "search_by__id",
            "search_by_class",
            "search_by_date",
            "search_by_identifier",
            "search_by_status",
            "search_by_type",
            "search_by_date_patient",
            "search_by_class_patient",
            "search_by_patient_type",
            "search_by_patient_status",
            "read",
        ]
    );

    let combo = definition(&definitions, "search_by_date_patient");
    assert_eq!(combo.parameters, ["date", "patient"]);
    assert_eq!(combo.expectation(), Expectation::Shall);
    assert!(matches!(combo.claim, CapabilityClaim::ComboSearch(_)));
    assert_eq!(
        definition(&definitions, "search_by_class").expectation(),
        Expectation::Should
    );
}

#[test]
fn test_extraction_is_deterministic() {
    let statement = capability_statement();
    let first = CapabilityMetadataExtractor::extract_from_statement(&statement, "Encounter").unwrap();
    let second = CapabilityMetadataExtractor::extract_from_statement(&statement, "Encounter").unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_undeclared_resource_type_yields_no_tests() {
    let definitions =
        CapabilityMetadataExtractor::extract_from_statement(&capability_statement(), "Observation")
            .unwrap();
    assert!(definitions.is_empty());
}

#[test]
fn test_malformed_statement_is_rejected() {
    let error = CapabilityMetadataExtractor::extract_from_statement(
        &json!({ "resourceType": "CapabilityStatement" }),
        "Encounter",
    )
    .unwrap_err();
    assert!(matches!(error, ConformanceError::MalformedCapability { .. }));

    let error = CapabilityMetadataExtractor::extract_from_statement(
        &json!({
            "resourceType": "CapabilityStatement",
            "rest": [{ "mode": "server", "resource": [{
                "type": "Encounter",
                "searchParam": [{ "type": "token" }]
            }]}]
        }),
        "Encounter",
    )
    .unwrap_err();
    assert!(matches!(error, ConformanceError::MalformedCapability { .. }));
}

#[tokio::test]
async fn test_sequences_run_independently() {
    let encounters = MockTransport::new();
    encounters.stub(Stub::get("Encounter", 200, bundle(&[encounter("1", "85")])));
    let encounter_runner = runner(encounters.clone());

    let empty = MockTransport::new();
    empty.stub(Stub::get("Encounter", 200, bundle(&[])));
    let empty_runner = runner(empty.clone());

    let search = CapabilityMetadataExtractor::extract(
        &CapabilityModel::new("Encounter")
            .with_search(&["patient"], Expectation::Shall)
            .unwrap()
            .with_interaction("read", Expectation::Shall),
    );

    let results = run_sequences(&[
        (&encounter_runner, search.clone()),
        (&empty_runner, search.clone()),
    ])
    .await;

    assert_eq!(results.len(), 2);
    assert!(results[0][0].outcome.is_pass());
    assert!(matches!(results[1][0].outcome.verdict, Verdict::Skip(_)));
    assert_eq!(results[1][1].id, "read");
    assert!(matches!(results[1][1].outcome.verdict, Verdict::Skip(_)));
    assert_eq!(encounters.call_count(), 2);
    assert_eq!(empty.call_count(), 1);
}

#[tokio::test]
async fn test_server_model_from_metadata() {
    let transport = MockTransport::new();
    transport.stub(Stub::get("metadata", 200, capability_statement()));
    let context = context(transport.clone());

    let model = context.fetch_capability_model("Encounter").await.unwrap();
    assert!(model.supports_interaction("read"));
    assert!(model.supports_search(&["status".to_string(), "patient".to_string()]));
    assert!(!model.supports_search(&["patient".to_string(), "type".to_string(), "class".to_string()]));
    assert_eq!(transport.calls()[0].url.as_str(), "http://fhir.test/r4/metadata");
}

#[tokio::test]
async fn test_metadata_failure_is_an_error() {
    let transport = MockTransport::new();
    transport.stub(Stub::get("metadata", 503, json!({})));
    let context = ExecutionContext::new(Url::parse(BASE_URL).unwrap(), transport);

    let error = context.fetch_capability_model("Encounter").await.unwrap_err();
    assert!(error.is_transport());
}
