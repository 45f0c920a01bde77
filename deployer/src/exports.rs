use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Placeholder printed instead of secret values
pub const SECRET_MASK: &str = "[secret]";

/// One published output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Export {
    pub value: Value,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub secret: bool,
}

/// The outputs a stack publishes for downstream consumers.
///
/// Absent values (for resources that were deliberately not created) are kept
/// as explicit `null` entries rather than left out.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExportSet {
    entries: BTreeMap<String, Export>,
}

impl ExportSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.entries.insert(
            name.into(),
            Export {
                value: value.into(),
                secret: false,
            },
        );
    }

    pub fn insert_secret(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.entries.insert(
            name.into(),
            Export {
                value: value.into(),
                secret: true,
            },
        );
    }

    pub fn insert_absent(&mut self, name: impl Into<String>) {
        self.insert(name, Value::Null);
    }

    pub fn get(&self, name: &str) -> Option<&Export> {
        self.entries.get(name)
    }

    pub fn value(&self, name: &str) -> Option<&Value> {
        self.entries.get(name).map(|e| &e.value)
    }

    pub fn is_absent(&self, name: &str) -> bool {
        matches!(self.value(name), Some(Value::Null))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|k| k.as_str())
    }

    /// Plain `name -> value` map, as seen by stacks that reference this one
    pub fn values(&self) -> BTreeMap<String, Value> {
        self.entries
            .iter()
            .map(|(name, export)| (name.clone(), export.value.clone()))
            .collect()
    }

    /// JSON object for display; secrets are masked unless `show_secrets` is set
    pub fn to_display_json(&self, show_secrets: bool) -> Value {
        let map = self
            .entries
            .iter()
            .map(|(name, export)| {
                let value = if export.secret && !show_secrets && !export.value.is_null() {
                    Value::String(SECRET_MASK.to_string())
                } else {
                    export.value.clone()
                };
                (name.clone(), value)
            })
            .collect();
        Value::Object(map)
    }
}
