//! Turning example resources into query-ready search values.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Search parameter bound to the execution context instead of an example.
pub const PATIENT_PARAM: &str = "patient";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchParamType {
    Token,
    String,
    Reference,
    Date,
    Uri,
    Number,
    Quantity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchParamDefinition {
    pub name: String,
    /// Dotted element path, with or without the resource type prefix.
    pub path: String,
    #[serde(rename = "type")]
    pub param_type: SearchParamType,
}

impl SearchParamDefinition {
    pub fn new(
        name: impl Into<String>,
        path: impl Into<String>,
        param_type: SearchParamType,
    ) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            param_type,
        }
    }
}

/// Element paths and types for search parameters, per resource type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SearchParameterRegistry {
    by_type: HashMap<String, IndexMap<String, SearchParamDefinition>>,
}

impl Default for SearchParameterRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl SearchParameterRegistry {
    pub fn empty() -> Self {
        Self {
            by_type: HashMap::new(),
        }
    }

    /// Definitions for the US Core Encounter searches.
    pub fn builtin() -> Self {
        use SearchParamType::{Date, Reference, Token};

        let mut registry = Self::empty();
        for (name, path, param_type) in [
            ("_id", "id", Token),
            ("patient", "subject", Reference),
            ("date", "period", Date),
            ("identifier", "identifier", Token),
            ("status", "status", Token),
            ("class", "class", Token),
            ("type", "type", Token),
        ] {
            registry.insert("Encounter", SearchParamDefinition::new(name, path, param_type));
        }
        registry
    }

    pub fn insert(&mut self, resource_type: impl Into<String>, definition: SearchParamDefinition) {
        self.by_type
            .entry(resource_type.into())
            .or_default()
            .insert(definition.name.clone(), definition);
    }

    /// Definition for `name`; unknown parameters resolve by their own name
    /// as a token path.
    pub fn definition(&self, resource_type: &str, name: &str) -> SearchParamDefinition {
        if let Some(definition) = self
            .by_type
            .get(resource_type)
            .and_then(|params| params.get(name))
        {
            return definition.clone();
        }
        match name {
            "_id" => SearchParamDefinition::new(name, "id", SearchParamType::Token),
            _ => SearchParamDefinition::new(name, name, SearchParamType::Token),
        }
    }
}

pub struct SearchValueResolver;

impl SearchValueResolver {
    /// Walk `path` through `resource` and reduce the located element to a
    /// search value. Arrays contribute their first populated element; a
    /// missing segment yields `None`.
    pub fn resolve(resource: &Value, path: &str) -> Option<String> {
        let mut current = resource;
        for segment in Self::segments(resource, path) {
            current = Self::first_populated(current.get(segment)?)?;
        }
        Self::search_value(Self::first_populated(current)?)
    }

    /// Every search value reachable along `path`, across all array elements.
    pub fn resolve_all(resource: &Value, path: &str) -> Vec<String> {
        let mut current = vec![resource];
        for segment in Self::segments(resource, path) {
            current = current
                .into_iter()
                .filter_map(|value| value.get(segment))
                .flat_map(Self::flatten)
                .collect();
        }

        let mut values = Vec::new();
        for value in current.into_iter().flat_map(Self::flatten) {
            if let Some(codings) = value.get("coding").and_then(Value::as_array) {
                values.extend(codings.iter().filter_map(Self::search_value));
            }
            if let Some(found) = Self::search_value(value) {
                if !values.contains(&found) {
                    values.push(found);
                }
            }
        }
        values
    }

    /// Whether any of `found` satisfies `requested` under the parameter type.
    pub fn matches(param_type: SearchParamType, requested: &str, found: &[String]) -> bool {
        match param_type {
            SearchParamType::Token => found.iter().any(|f| Self::token_matches(requested, f)),
            SearchParamType::Reference => {
                let wanted = Self::reference_id(requested);
                found.iter().any(|f| Self::reference_id(f) == wanted)
            }
            SearchParamType::String => {
                let requested = requested.to_lowercase();
                found.iter().any(|f| f.to_lowercase().starts_with(&requested))
            }
            // Date prefixes and precision make equality meaningless here.
            SearchParamType::Date => true,
            SearchParamType::Uri | SearchParamType::Number | SearchParamType::Quantity => {
                found.iter().any(|f| f == requested)
            }
        }
    }

    fn segments<'a>(resource: &Value, path: &'a str) -> impl Iterator<Item = &'a str> {
        let resource_type = resource.get("resourceType").and_then(Value::as_str);
        let mut segments = path.split('.').filter(|s| !s.is_empty()).peekable();
        if resource_type.is_some() && segments.peek().copied() == resource_type {
            segments.next();
        }
        segments
    }

    fn first_populated(value: &Value) -> Option<&Value> {
        match value {
            Value::Array(items) => items.iter().find(|item| Self::is_populated(item)),
            other if Self::is_populated(other) => Some(other),
            _ => None,
        }
    }

    fn flatten(value: &Value) -> Vec<&Value> {
        match value {
            Value::Array(items) => items.iter().filter(|i| Self::is_populated(i)).collect(),
            other if Self::is_populated(other) => vec![other],
            _ => Vec::new(),
        }
    }

    fn is_populated(value: &Value) -> bool {
        match value {
            Value::Null => false,
            Value::String(s) => !s.is_empty(),
            Value::Array(items) => !items.is_empty(),
            Value::Object(map) => !map.is_empty(),
            Value::Bool(_) | Value::Number(_) => true,
        }
    }

    fn search_value(value: &Value) -> Option<String> {
        match value {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            Value::Object(map) => {
                let text = |key: &str| map.get(key).and_then(Value::as_str).filter(|s| !s.is_empty());

                // Period, then Range
                if let Some(start) = text("start").or_else(|| text("end")) {
                    return Some(start.to_string());
                }
                if let Some(low) = map.get("low").and_then(|low| low.get("value")) {
                    return Self::search_value(low);
                }
                // CodeableConcept
                if let Some(codings) = map.get("coding").and_then(Value::as_array) {
                    if let Some(token) = codings.iter().find_map(Self::search_value) {
                        return Some(token);
                    }
                    return text("text").map(str::to_string);
                }
                // Quantity carries a numeric value
                if let Some(number) = map.get("value").filter(|v| v.is_number()) {
                    return Self::search_value(number);
                }
                // Identifier
                if let Some(value) = text("value") {
                    return Some(Self::token(text("system"), value));
                }
                // Coding
                if let Some(code) = text("code") {
                    return Some(Self::token(text("system"), code));
                }
                text("reference").map(str::to_string)
            }
            _ => None,
        }
    }

    fn token(system: Option<&str>, code: &str) -> String {
        match system {
            Some(system) => format!("{system}|{code}"),
            None => code.to_string(),
        }
    }

    fn token_matches(requested: &str, found: &str) -> bool {
        if requested == found {
            return true;
        }
        match (requested.split_once('|'), found.split_once('|')) {
            (Some(_), Some(_)) => false,
            (Some((_, requested_code)), None) => requested_code == found,
            (None, Some((_, found_code))) => found_code == requested,
            (None, None) => false,
        }
    }

    fn reference_id(reference: &str) -> &str {
        reference.rsplit('/').next().unwrap_or(reference)
    }
}
