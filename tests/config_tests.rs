use octofhir_conformance::*;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;

mod common;
use common::MockTransport;

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn test_load_config_from_file() {
    let file = write_config(
        r#"{
            "base_url": "https://fhir.example.org/r4",
            "bearer_token": "from-file",
            "patient_ids": ["85", "355"],
            "request_timeout_secs": 10,
            "fallback_statuses": { "Encounter": ["finished"] },
            "search_parameters": {
                "Encounter": {
                    "location": { "name": "location", "path": "location.location", "type": "reference" }
                }
            }
        }"#,
    );

    let config = ConformanceConfig::from_file(file.path()).unwrap();
    assert_eq!(config.patient_ids, ["85", "355"]);
    assert_eq!(config.request_timeout(), Duration::from_secs(10));
    assert_eq!(config.fallback_statuses.first("Encounter"), Some("finished"));

    let location = config.search_parameters.definition("Encounter", "location");
    assert_eq!(location.path, "location.location");
    assert_eq!(location.param_type, SearchParamType::Reference);
    // Replacing the registry drops the builtin paths for that resource type.
    assert_eq!(config.search_parameters.definition("Encounter", "date").path, "date");
}

#[test]
fn test_invalid_config_file_is_rejected() {
    let file = write_config(r#"{ "base_url": "ftp://fhir.example.org" }"#);
    let error = ConformanceConfig::from_file(file.path()).unwrap_err();
    assert!(matches!(error, ConformanceError::Config { .. }));

    let file = write_config("not json");
    assert!(ConformanceConfig::from_file(file.path()).is_err());

    assert!(ConformanceConfig::from_file("/definitely/not/here.json").is_err());
}

#[test]
fn test_runner_from_config() {
    let config = ConformanceConfig::new("https://fhir.example.org/r4/")
        .with_bearer_token("secret")
        .with_patient_ids(["85"])
        .with_request_timeout(Duration::from_secs(3));
    let transport = MockTransport::new();

    let runner =
        SequenceRunner::from_config(&config, transport, CapabilityModel::new("Encounter")).unwrap();
    let context = runner.context();
    assert_eq!(context.token(), Some("secret"));
    assert_eq!(context.patient_ids, ["85"]);
    assert_eq!(context.request_timeout, Duration::from_secs(3));
    assert_eq!(runner.server().resource_type(), "Encounter");
}

#[test]
fn test_runner_from_invalid_config_fails() {
    let config = ConformanceConfig::new("https://fhir.example.org").with_patient_ids([""]);
    let transport: Arc<dyn Transport> = MockTransport::new();
    assert!(SequenceRunner::from_config(&config, transport, CapabilityModel::new("Encounter")).is_err());
}
