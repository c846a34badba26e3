//! Parsed, immutable view of what a server declares for one resource type.
//!
//! Claims are kept as a closed enumeration built once at parse time so that
//! the extractor and the runner never consult raw extension lists.

pub mod statement;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::{ConformanceError, Result};
pub use statement::{CapabilityStatement, EXPECTATION_URL, SEARCH_COMBINATION_URL};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Expectation {
    Shall,
    Should,
    May,
    #[default]
    Unspecified,
}

impl Expectation {
    pub fn from_code(code: Option<&str>) -> Self {
        match code {
            Some("SHALL") => Expectation::Shall,
            Some("SHOULD") => Expectation::Should,
            Some("MAY") => Expectation::May,
            _ => Expectation::Unspecified,
        }
    }

    /// Only SHALL claims are contractual; the rest are advisory.
    pub fn is_mandatory(&self) -> bool {
        matches!(self, Expectation::Shall)
    }
}

impl fmt::Display for Expectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expectation::Shall => write!(f, "SHALL"),
            Expectation::Should => write!(f, "SHOULD"),
            Expectation::May => write!(f, "MAY"),
            Expectation::Unspecified => write!(f, "unspecified"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interaction {
    pub code: String,
    pub expectation: Expectation,
}

/// A declared search. Parameter order is the declared combination order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchClaim {
    parameters: Vec<String>,
    pub expectation: Expectation,
}

impl SearchClaim {
    pub fn new<I, S>(parameters: I, expectation: Expectation) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let parameters: Vec<String> = parameters.into_iter().map(Into::into).collect();
        if parameters.is_empty() {
            return Err(ConformanceError::malformed(
                "search claim must name at least one parameter",
            ));
        }
        if let Some(blank) = parameters.iter().find(|p| p.trim().is_empty()) {
            return Err(ConformanceError::malformed(format!(
                "search claim contains a blank parameter name: {blank:?}"
            )));
        }
        Ok(Self {
            parameters,
            expectation,
        })
    }

    pub fn parameters(&self) -> &[String] {
        &self.parameters
    }

    pub fn is_combination(&self) -> bool {
        self.parameters.len() > 1
    }

    /// Order-insensitive comparison against another parameter list.
    pub fn covers(&self, parameters: &[String]) -> bool {
        self.parameters.len() == parameters.len()
            && parameters.iter().all(|p| self.parameters.contains(p))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CapabilityClaim {
    Interaction(Interaction),
    SingleSearch(SearchClaim),
    ComboSearch(SearchClaim),
}

impl CapabilityClaim {
    pub fn search(claim: SearchClaim) -> Self {
        if claim.is_combination() {
            CapabilityClaim::ComboSearch(claim)
        } else {
            CapabilityClaim::SingleSearch(claim)
        }
    }

    pub fn expectation(&self) -> Expectation {
        match self {
            CapabilityClaim::Interaction(interaction) => interaction.expectation,
            CapabilityClaim::SingleSearch(claim) | CapabilityClaim::ComboSearch(claim) => {
                claim.expectation
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityModel {
    resource_type: String,
    claims: Vec<CapabilityClaim>,
}

impl CapabilityModel {
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            claims: Vec::new(),
        }
    }

    pub fn with_interaction(mut self, code: impl Into<String>, expectation: Expectation) -> Self {
        self.claims.push(CapabilityClaim::Interaction(Interaction {
            code: code.into(),
            expectation,
        }));
        self
    }

    pub fn with_search<S: AsRef<str>>(
        mut self,
        parameters: &[S],
        expectation: Expectation,
    ) -> Result<Self> {
        let claim = SearchClaim::new(parameters.iter().map(|p| p.as_ref()), expectation)?;
        self.claims.push(CapabilityClaim::search(claim));
        Ok(self)
    }

    /// Parse the server-mode declarations for `resource_type` out of a
    /// CapabilityStatement. A statement that does not mention the resource
    /// yields a model without claims.
    pub fn from_capability_statement(statement: &Value, resource_type: &str) -> Result<Self> {
        let statement: CapabilityStatement = serde_json::from_value(statement.clone())
            .map_err(|e| ConformanceError::malformed(e.to_string()))?;

        let rest = statement
            .rest
            .ok_or_else(|| ConformanceError::malformed("CapabilityStatement has no rest entry"))?;
        let server = rest
            .into_iter()
            .find(|rest| rest.mode == "server")
            .ok_or_else(|| {
                ConformanceError::malformed("CapabilityStatement has no server-mode rest entry")
            })?;

        let mut model = CapabilityModel::new(resource_type);
        let Some(resource) = server
            .resource
            .into_iter()
            .find(|resource| resource.resource_type == resource_type)
        else {
            tracing::debug!("{} is not declared by the capability statement", resource_type);
            return Ok(model);
        };

        for interaction in &resource.interaction {
            model.claims.push(CapabilityClaim::Interaction(Interaction {
                code: interaction.code.clone(),
                expectation: Expectation::from_code(statement::expectation_code(
                    &interaction.extension,
                )),
            }));
        }

        for param in &resource.search_param {
            let expectation = Expectation::from_code(statement::expectation_code(&param.extension));
            let claim = SearchClaim::new([param.name.clone()], expectation)?;
            model.claims.push(CapabilityClaim::SingleSearch(claim));
        }

        for combo in resource
            .extension
            .iter()
            .filter(|ext| ext.url == SEARCH_COMBINATION_URL)
        {
            let expectation = Expectation::from_code(statement::expectation_code(&combo.extension));
            let parameters: Vec<String> = combo
                .extension
                .iter()
                .filter(|ext| ext.url != EXPECTATION_URL)
                .filter_map(|ext| ext.value_string.clone())
                .collect();
            let claim = SearchClaim::new(parameters, expectation).map_err(|_| {
                ConformanceError::malformed(format!(
                    "search parameter combination for {resource_type} declares no parameters"
                ))
            })?;
            model.claims.push(CapabilityClaim::search(claim));
        }

        Ok(model)
    }

    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    pub fn claims(&self) -> &[CapabilityClaim] {
        &self.claims
    }

    pub fn interactions(&self) -> impl Iterator<Item = &Interaction> {
        self.claims.iter().filter_map(|claim| match claim {
            CapabilityClaim::Interaction(interaction) => Some(interaction),
            _ => None,
        })
    }

    pub fn searches(&self) -> impl Iterator<Item = &SearchClaim> {
        self.claims.iter().filter_map(|claim| match claim {
            CapabilityClaim::SingleSearch(claim) | CapabilityClaim::ComboSearch(claim) => {
                Some(claim)
            }
            _ => None,
        })
    }

    pub fn interaction(&self, code: &str) -> Option<&Interaction> {
        self.interactions().find(|interaction| interaction.code == code)
    }

    pub fn supports_interaction(&self, code: &str) -> bool {
        self.interaction(code).is_some()
    }

    pub fn supports_search(&self, parameters: &[String]) -> bool {
        self.searches().any(|claim| claim.covers(parameters))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn expectation(code: &str) -> Value {
        json!({ "url": EXPECTATION_URL, "valueCode": code })
    }

    fn statement(resource: Value) -> Value {
        json!({
            "resourceType": "CapabilityStatement",
            "rest": [{ "mode": "server", "resource": [resource] }]
        })
    }

    #[test]
    fn test_parses_interactions_searches_and_combinations() {
        let doc = statement(json!({
            "type": "Encounter",
            "interaction": [
                { "code": "read", "extension": [expectation("SHALL")] },
                { "code": "search-type", "extension": [expectation("SHALL")] }
            ],
            "searchParam": [
                { "name": "_id", "type": "token", "extension": [expectation("SHALL")] },
                { "name": "class", "type": "token", "extension": [expectation("SHOULD")] }
            ],
            "extension": [{
                "url": SEARCH_COMBINATION_URL,
                "extension": [
                    expectation("SHOULD"),
                    { "url": "required", "valueString": "date" },
                    { "url": "required", "valueString": "patient" }
                ]
            }]
        }));

        let model = CapabilityModel::from_capability_statement(&doc, "Encounter").unwrap();
        assert_eq!(model.resource_type(), "Encounter");
        assert_eq!(model.interactions().count(), 2);
        assert_eq!(
            model.interaction("read").map(|i| i.expectation),
            Some(Expectation::Shall)
        );

        let searches: Vec<_> = model.searches().collect();
        assert_eq!(searches.len(), 3);
        assert_eq!(searches[1].expectation, Expectation::Should);
        assert_eq!(searches[2].parameters(), ["date", "patient"]);
        assert!(matches!(
            model.claims().last(),
            Some(CapabilityClaim::ComboSearch(_))
        ));
    }

    #[test]
    fn test_only_shall_is_mandatory() {
        assert!(Expectation::from_code(Some("SHALL")).is_mandatory());
        assert!(!Expectation::from_code(Some("SHOULD")).is_mandatory());
        assert!(!Expectation::from_code(None).is_mandatory());
    }

    #[test]
    fn test_missing_expectation_is_unspecified() {
        let doc = statement(json!({
            "type": "Encounter",
            "interaction": [{ "code": "read" }]
        }));
        let model = CapabilityModel::from_capability_statement(&doc, "Encounter").unwrap();
        assert_eq!(
            model.interaction("read").map(|i| i.expectation),
            Some(Expectation::Unspecified)
        );
    }

    #[test]
    fn test_undeclared_resource_has_no_claims() {
        let doc = statement(json!({ "type": "Patient", "interaction": [{ "code": "read" }] }));
        let model = CapabilityModel::from_capability_statement(&doc, "Encounter").unwrap();
        assert!(model.claims().is_empty());
    }

    #[test]
    fn test_structural_gaps_fail_fast() {
        let no_rest = json!({ "resourceType": "CapabilityStatement" });
        assert!(matches!(
            CapabilityModel::from_capability_statement(&no_rest, "Encounter"),
            Err(ConformanceError::MalformedCapability { .. })
        ));

        let client_only = json!({ "rest": [{ "mode": "client", "resource": [] }] });
        assert!(CapabilityModel::from_capability_statement(&client_only, "Encounter").is_err());

        let nameless_param = statement(json!({
            "type": "Encounter",
            "searchParam": [{ "type": "token" }]
        }));
        assert!(CapabilityModel::from_capability_statement(&nameless_param, "Encounter").is_err());

        let empty_combo = statement(json!({
            "type": "Encounter",
            "extension": [{ "url": SEARCH_COMBINATION_URL, "extension": [expectation("SHALL")] }]
        }));
        assert!(CapabilityModel::from_capability_statement(&empty_combo, "Encounter").is_err());
    }

    #[test]
    fn test_search_support_ignores_parameter_order() {
        let model = CapabilityModel::new("Encounter")
            .with_search(&["date", "patient"], Expectation::Shall)
            .unwrap();
        assert!(model.supports_search(&["patient".to_string(), "date".to_string()]));
        assert!(!model.supports_search(&["patient".to_string()]));
    }

    #[test]
    fn test_empty_search_claim_is_rejected() {
        let empty: [&str; 0] = [];
        assert!(SearchClaim::new(empty, Expectation::Shall).is_err());
        assert!(SearchClaim::new(["  "], Expectation::Shall).is_err());
    }
}
