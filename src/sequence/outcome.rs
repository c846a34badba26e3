use serde::{Deserialize, Serialize};
use std::fmt;

/// Classification of a single test execution. Exactly one per run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", content = "message", rename_all = "lowercase")]
pub enum Verdict {
    Pass,
    Fail(String),
    Skip(String),
    Omit(String),
}

impl Verdict {
    pub fn message(&self) -> Option<&str> {
        match self {
            Verdict::Pass => None,
            Verdict::Fail(message) | Verdict::Skip(message) | Verdict::Omit(message) => {
                Some(message)
            }
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Verdict::Pass => "pass",
            Verdict::Fail(_) => "fail",
            Verdict::Skip(_) => "skip",
            Verdict::Omit(_) => "omit",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.message() {
            Some(message) => write!(f, "{}: {}", self.label(), message),
            None => write!(f, "{}", self.label()),
        }
    }
}

/// Verdict plus the advisory warnings gathered on the way. Warnings never
/// change the verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub verdict: Verdict,
    pub warnings: Vec<String>,
}

impl Outcome {
    pub fn new(verdict: Verdict, warnings: Vec<String>) -> Self {
        Self { verdict, warnings }
    }

    pub fn is_pass(&self) -> bool {
        matches!(self.verdict, Verdict::Pass)
    }

    pub fn is_fail(&self) -> bool {
        matches!(self.verdict, Verdict::Fail(_))
    }

    pub fn message(&self) -> Option<&str> {
        self.verdict.message()
    }
}

/// Outcome of one test definition, as handed to whatever drives the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResult {
    pub id: String,
    pub description: String,
    pub outcome: Outcome,
}

/// Fixed message templates. Tests assert on these strings exactly.
pub mod messages {
    pub const NO_TOKEN: &str = "Do not test if no bearer token set";
    pub const BAD_REQUEST_WITHOUT_OUTCOME: &str =
        "Server returned a status of 400 without an OperationOutcome.";
    pub const NO_RESOURCES_RETURNED: &str = "No resources of this type were returned";

    pub fn not_supported(resource_type: &str, operation: &str) -> String {
        format!(
            "This server does not support {resource_type} {operation} operation(s) according to conformance statement."
        )
    }

    pub fn no_resources_for_patient(resource_type: &str) -> String {
        format!(
            "No {resource_type} resources could be found for this patient. Please use patients with more information."
        )
    }

    pub fn no_resources_available(resource_type: &str) -> String {
        format!(
            "No {resource_type} resources appear to be available. Please use patients with more information."
        )
    }

    pub fn unresolved_path(path: &str) -> String {
        format!("Could not resolve {path} in any resource.")
    }

    pub fn bad_response_code(expected: &[u16], found: u16) -> String {
        let expected = expected
            .iter()
            .map(u16::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        format!("Bad response code: expected {expected}, but found {found}.")
    }

    pub fn resource_missing(resource_type: &str) -> String {
        format!("Expected {resource_type} resource to be present.")
    }

    pub fn wrong_resource_type(resource_type: &str) -> String {
        format!("Expected resource to be of type {resource_type}.")
    }

    pub fn wrong_id(id: &str) -> String {
        format!("Expected resource to contain id: {id}")
    }

    pub fn not_a_bundle(actual: &str) -> String {
        format!("Expected FHIR Bundle but found: {actual}")
    }

    pub fn invalid_resource(resource_type: &str, detail: &str) -> String {
        format!("Invalid {resource_type}: {detail}")
    }

    pub fn value_mismatch(
        param: &str,
        reference: &str,
        found: &[String],
        requested: &str,
    ) -> String {
        format!(
            "{param} in {reference} ({}) does not match {param} requested ({requested})",
            found.join(", ")
        )
    }

    pub fn undocumented_search(resource_type: &str) -> String {
        format!(
            "The {resource_type} search interaction for this resource is not documented as requiring a status parameter in the CapabilityStatement."
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bad_response_code_lists_every_expected_status() {
        assert_eq!(
            messages::bad_response_code(&[200, 201], 401),
            "Bad response code: expected 200, 201, but found 401."
        );
        assert_eq!(
            messages::bad_response_code(&[401], 200),
            "Bad response code: expected 401, but found 200."
        );
    }

    #[test]
    fn test_verdict_serializes_with_tag_and_message() {
        let json = serde_json::to_value(Verdict::Skip("nothing".into())).unwrap();
        assert_eq!(json["result"], "skip");
        assert_eq!(json["message"], "nothing");

        let json = serde_json::to_value(Verdict::Pass).unwrap();
        assert_eq!(json["result"], "pass");
    }
}
