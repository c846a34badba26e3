//! Serde view of the CapabilityStatement subset the extractor consumes.

use serde::{Deserialize, Serialize};

pub const EXPECTATION_URL: &str =
    "http://hl7.org/fhir/StructureDefinition/capabilitystatement-expectation";

pub const SEARCH_COMBINATION_URL: &str =
    "http://hl7.org/fhir/StructureDefinition/capabilitystatement-search-parameter-combination";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityStatement {
    #[serde(default)]
    pub rest: Option<Vec<Rest>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rest {
    pub mode: String,
    #[serde(default)]
    pub resource: Vec<RestResource>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestResource {
    #[serde(rename = "type")]
    pub resource_type: String,
    #[serde(default)]
    pub interaction: Vec<RestInteraction>,
    #[serde(default)]
    pub search_param: Vec<RestSearchParam>,
    #[serde(default)]
    pub extension: Vec<Extension>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestInteraction {
    pub code: String,
    #[serde(default)]
    pub extension: Vec<Extension>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestSearchParam {
    pub name: String,
    #[serde(default)]
    pub extension: Vec<Extension>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Extension {
    pub url: String,
    #[serde(default)]
    pub value_code: Option<String>,
    #[serde(default)]
    pub value_string: Option<String>,
    #[serde(default)]
    pub extension: Vec<Extension>,
}

/// Expectation code carried by a list of extensions, if any.
pub fn expectation_code(extensions: &[Extension]) -> Option<&str> {
    extensions
        .iter()
        .find(|ext| ext.url == EXPECTATION_URL)
        .and_then(|ext| ext.value_code.as_deref())
}
