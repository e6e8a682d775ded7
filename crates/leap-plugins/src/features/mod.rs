//! Protocol capabilities announced to plugins.
//!
//! The map is sent in the priming message and served by the `getFeatures`
//! and `getFeature` commands so a plugin can detect what the host supports.

use std::collections::BTreeMap;

use serde_json::{Map, Value, json};

/// Name of the feature describing the structured value codec.
pub const CODEC_FEATURE: &str = "codec";

/// Name of the feature describing frame layout.
pub const FRAMING_FEATURE: &str = "framing";

/// Name of the feature describing fatal error forwarding.
pub const FATAL_FEATURE: &str = "fatal";

/// Named capability values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Features {
    entries: BTreeMap<String, Value>,
}

impl Features {
    /// Returns the capabilities every session supports.
    #[must_use]
    pub fn standard() -> Self {
        let mut features = Self::default();
        features.insert(CODEC_FEATURE, json!("json"));
        features.insert(FRAMING_FEATURE, json!("length:body"));
        features.insert(FATAL_FEATURE, json!({"type": "error", "key": "error"}));
        features
    }

    /// Adds or replaces a feature.
    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.entries.insert(name.into(), value);
    }

    /// Returns the value of the feature called `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries.get(name)
    }

    /// Returns the feature names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Renders the features as a map value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::Object(
            self.entries
                .iter()
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect::<Map<String, Value>>(),
        )
    }
}
