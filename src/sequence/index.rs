use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A resource captured by an earlier test, with the patient it was found for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExampleEntry {
    pub patient_id: Option<String>,
    pub resource: Value,
}

/// Session-local, append-only store of example resources for one resource
/// type. Entries keep insertion order and are never replaced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExampleIndex {
    entries: IndexMap<String, ExampleEntry>,
}

impl ExampleIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entry under `id`. Returns `false` and keeps the existing entry
    /// when the id is already present.
    pub fn insert(&mut self, id: impl Into<String>, entry: ExampleEntry) -> bool {
        let id = id.into();
        if self.entries.contains_key(&id) {
            return false;
        }
        self.entries.insert(id, entry);
        true
    }

    /// Adds a resource keyed by its own `id`. Resources without an id cannot
    /// be read back later and are not recorded.
    pub fn record(&mut self, resource: &Value, patient_id: Option<&str>) -> bool {
        let Some(id) = resource.get("id").and_then(Value::as_str) else {
            tracing::debug!("not recording example without an id");
            return false;
        };
        self.insert(
            id,
            ExampleEntry {
                patient_id: patient_id.map(str::to_string),
                resource: resource.clone(),
            },
        )
    }

    pub fn get(&self, id: &str) -> Option<&ExampleEntry> {
        self.entries.get(id)
    }

    pub fn first_id(&self) -> Option<&str> {
        self.entries.keys().next().map(String::as_str)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ExampleEntry)> {
        self.entries.iter().map(|(id, entry)| (id.as_str(), entry))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
