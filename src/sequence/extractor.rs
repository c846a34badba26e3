//! Derives the ordered list of test definitions from a capability model.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::resolver::PATIENT_PARAM;
use crate::capability::{CapabilityClaim, CapabilityModel, Expectation, SearchClaim};
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestKind {
    /// Search without credentials; the server must answer 401.
    UnauthorizedSearch,
    Search,
    Read,
}

/// One executable test, built once per resource type and reused for every run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestDefinition {
    pub id: String,
    pub resource_type: String,
    pub kind: TestKind,
    /// Declared parameter order; empty for reads.
    pub parameters: Vec<String>,
    /// The claim this definition was derived from.
    pub claim: CapabilityClaim,
}

impl TestDefinition {
    pub fn read(resource_type: impl Into<String>, claim: CapabilityClaim) -> Self {
        Self {
            id: "read".to_string(),
            resource_type: resource_type.into(),
            kind: TestKind::Read,
            parameters: Vec::new(),
            claim,
        }
    }

    pub fn search(resource_type: impl Into<String>, claim: &SearchClaim) -> Self {
        let parameters = claim.parameters().to_vec();
        Self {
            id: format!("search_by_{}", parameters.join("_")),
            resource_type: resource_type.into(),
            kind: TestKind::Search,
            parameters,
            claim: CapabilityClaim::search(claim.clone()),
        }
    }

    pub fn unauthorized_search(resource_type: impl Into<String>, claim: CapabilityClaim) -> Self {
        Self {
            id: "unauthorized_search".to_string(),
            resource_type: resource_type.into(),
            kind: TestKind::UnauthorizedSearch,
            parameters: vec![PATIENT_PARAM.to_string()],
            claim,
        }
    }

    pub fn expectation(&self) -> Expectation {
        self.claim.expectation()
    }

    /// Search whose every value comes from the execution context, so it can
    /// run before any example has been captured.
    pub fn is_patient_bound(&self) -> bool {
        self.kind == TestKind::Search && self.parameters.iter().all(|p| p == PATIENT_PARAM)
    }

    pub fn description(&self) -> String {
        match self.kind {
            TestKind::UnauthorizedSearch => format!(
                "Server rejects {} search without authorization",
                self.resource_type
            ),
            TestKind::Search => format!(
                "Server returns valid results for {} search by {} ({})",
                self.resource_type,
                self.parameters.join("+"),
                self.expectation()
            ),
            TestKind::Read => format!(
                "Server returns correct {} resource from {} read interaction ({})",
                self.resource_type,
                self.resource_type,
                self.expectation()
            ),
        }
    }
}

pub struct CapabilityMetadataExtractor;

impl CapabilityMetadataExtractor {
    /// Ordered definitions: unauthorized search, single-parameter searches
    /// (patient-bound first, then declared order), combinations in declared
    /// order, read last. Only declared claims produce definitions.
    pub fn extract(model: &CapabilityModel) -> Vec<TestDefinition> {
        let resource_type = model.resource_type();
        let mut definitions = Vec::new();

        if let Some(search_type) = model.interaction("search-type") {
            definitions.push(TestDefinition::unauthorized_search(
                resource_type,
                CapabilityClaim::Interaction(search_type.clone()),
            ));
        }

        let mut seen: Vec<&SearchClaim> = Vec::new();
        let mut singles = Vec::new();
        let mut combos = Vec::new();
        for claim in model.searches() {
            if seen.iter().any(|existing| existing.covers(claim.parameters())) {
                tracing::debug!(
                    "ignoring duplicate {} search claim {:?}",
                    resource_type,
                    claim.parameters()
                );
                continue;
            }
            seen.push(claim);

            let definition = TestDefinition::search(resource_type, claim);
            if claim.is_combination() {
                combos.push(definition);
            } else {
                singles.push(definition);
            }
        }
        // Stable: declared order survives within each group.
        singles.sort_by_key(|definition| !definition.is_patient_bound());
        definitions.extend(singles);
        definitions.extend(combos);

        if let Some(read) = model.interaction("read") {
            definitions.push(TestDefinition::read(
                resource_type,
                CapabilityClaim::Interaction(read.clone()),
            ));
        }

        tracing::debug!(
            "extracted {} test definitions for {}",
            definitions.len(),
            resource_type
        );
        definitions
    }

    pub fn extract_from_statement(
        statement: &Value,
        resource_type: &str,
    ) -> Result<Vec<TestDefinition>> {
        let model = CapabilityModel::from_capability_statement(statement, resource_type)?;
        Ok(Self::extract(&model))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(definitions: &[TestDefinition]) -> Vec<&str> {
        definitions.iter().map(|d| d.id.as_str()).collect()
    }

    #[test]
    fn test_patient_search_is_hoisted_and_read_is_last() {
        let model = CapabilityModel::new("Encounter")
            .with_interaction("read", Expectation::Shall)
            .with_search(&["_id"], Expectation::Shall)
            .unwrap()
            .with_search(&["patient"], Expectation::Shall)
            .unwrap()
            .with_search(&["date", "patient"], Expectation::Shall)
            .unwrap()
            .with_search(&["identifier"], Expectation::Should)
            .unwrap();

        let definitions = CapabilityMetadataExtractor::extract(&model);
        assert_eq!(
            ids(&definitions),
            [
                "search_by_patient",
                "search_by__id",
                "search_by_identifier",
                "search_by_date_patient",
                "read"
            ]
        );
        assert_eq!(definitions[3].parameters, ["date", "patient"]);
        assert_eq!(definitions[2].expectation(), Expectation::Should);
    }

    #[test]
    fn test_nothing_is_fabricated() {
        let model = CapabilityModel::new("Encounter");
        assert!(CapabilityMetadataExtractor::extract(&model).is_empty());

        let model = CapabilityModel::new("Encounter")
            .with_search(&["patient"], Expectation::Shall)
            .unwrap();
        let definitions = CapabilityMetadataExtractor::extract(&model);
        assert_eq!(ids(&definitions), ["search_by_patient"]);
    }

    #[test]
    fn test_search_type_adds_unauthorized_search_first() {
        let model = CapabilityModel::new("Encounter")
            .with_interaction("search-type", Expectation::Shall)
            .with_search(&["patient"], Expectation::Shall)
            .unwrap();
        let definitions = CapabilityMetadataExtractor::extract(&model);
        assert_eq!(ids(&definitions), ["unauthorized_search", "search_by_patient"]);
        assert_eq!(definitions[0].kind, TestKind::UnauthorizedSearch);
    }

    #[test]
    fn test_duplicate_combinations_collapse() {
        let model = CapabilityModel::new("Encounter")
            .with_search(&["patient", "status"], Expectation::Shall)
            .unwrap()
            .with_search(&["status", "patient"], Expectation::Should)
            .unwrap();
        let definitions = CapabilityMetadataExtractor::extract(&model);
        assert_eq!(ids(&definitions), ["search_by_patient_status"]);
        assert_eq!(definitions[0].expectation(), Expectation::Shall);
    }
}
