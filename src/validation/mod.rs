//! Structural checks applied to every resource a test receives.
//!
//! The runner only needs a list of violations per resource; schema-complete
//! validation is expected to come from a dedicated FHIR validator plugged in
//! through [`StructuralValidator`]. [`BasicResourceValidator`] covers the
//! base rules every resource must satisfy.

use chrono::DateTime;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::LazyLock;

// FHIR id pattern: [A-Za-z0-9\-\.]{1,64}
static ID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9\-\.]{1,64}$").expect("FHIR id pattern compiles"));

/// Checks a payload against the base structure of its declared type.
/// An empty list means the resource is structurally valid.
pub trait StructuralValidator: Send + Sync {
    fn validate(&self, resource: &Value, resource_type: &str) -> Vec<String>;
}

#[derive(Debug, Clone)]
pub struct BasicResourceValidator {
    required_elements: HashMap<String, Vec<String>>,
}

impl BasicResourceValidator {
    pub fn new() -> Self {
        let mut required_elements = HashMap::new();
        required_elements.insert(
            "Encounter".to_string(),
            vec!["status".to_string(), "class".to_string()],
        );
        Self { required_elements }
    }

    /// Require `element` at the top level of every `resource_type` instance.
    pub fn with_required_element(
        mut self,
        resource_type: impl Into<String>,
        element: impl Into<String>,
    ) -> Self {
        self.required_elements
            .entry(resource_type.into())
            .or_default()
            .push(element.into());
        self
    }

    fn validate_resource_type(&self, resource: &Value, expected: &str, issues: &mut Vec<String>) {
        match resource.get("resourceType") {
            Some(Value::String(actual)) if actual == expected => {}
            Some(Value::String(actual)) => issues.push(format!(
                "resourceType '{actual}' does not match expected type '{expected}'"
            )),
            Some(_) => issues.push("resourceType must be a string".to_string()),
            None => issues.push(format!(
                "required field 'resourceType' is missing, expected '{expected}'"
            )),
        }
    }

    fn validate_id(&self, resource: &Value, issues: &mut Vec<String>) {
        match resource.get("id") {
            None => {}
            Some(Value::String(id)) if ID_PATTERN.is_match(id) => {}
            Some(Value::String(id)) => {
                issues.push(format!("id '{id}' does not match the FHIR id format"))
            }
            Some(_) => issues.push("id must be a string".to_string()),
        }
    }

    fn validate_meta(&self, resource: &Value, issues: &mut Vec<String>) {
        let Some(last_updated) = resource.get("meta").and_then(|meta| meta.get("lastUpdated"))
        else {
            return;
        };
        let valid = last_updated
            .as_str()
            .is_some_and(|instant| DateTime::parse_from_rfc3339(instant).is_ok());
        if !valid {
            issues.push(format!(
                "meta.lastUpdated {last_updated} is not a valid instant"
            ));
        }
    }

    fn validate_required(&self, resource: &Value, resource_type: &str, issues: &mut Vec<String>) {
        let Some(required) = self.required_elements.get(resource_type) else {
            return;
        };
        for element in required {
            let present = match resource.get(element) {
                None | Some(Value::Null) => false,
                Some(Value::Array(items)) => !items.is_empty(),
                Some(Value::String(s)) => !s.is_empty(),
                Some(_) => true,
            };
            if !present {
                issues.push(format!("{resource_type}.{element} is required but missing"));
            }
        }
    }
}

impl Default for BasicResourceValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl StructuralValidator for BasicResourceValidator {
    fn validate(&self, resource: &Value, resource_type: &str) -> Vec<String> {
        let mut issues = Vec::new();

        if !resource.is_object() {
            issues.push(format!("expected a JSON object for {resource_type}"));
            return issues;
        }

        self.validate_resource_type(resource, resource_type, &mut issues);
        self.validate_id(resource, &mut issues);
        self.validate_meta(resource, &mut issues);
        self.validate_required(resource, resource_type, &mut issues);

        issues
    }
}
