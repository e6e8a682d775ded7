//! Structured value codec and the LEAP envelope.
//!
//! Structured values are [`serde_json::Value`]s encoded as compact JSON.
//! Undefined values travel as `null`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CodecError, ProtocolError};

/// Key naming the destination pump.
pub const PUMP_KEY: &str = "pump";

/// Key carrying the payload.
pub const DATA_KEY: &str = "data";

/// The `{pump, data}` unit exchanged with a plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pump: String,
    data: Value,
}

impl Envelope {
    /// Creates an envelope addressed to `pump`.
    #[must_use]
    pub fn new(pump: impl Into<String>, data: Value) -> Self {
        Self {
            pump: pump.into(),
            data,
        }
    }

    /// Returns the destination pump name.
    #[must_use]
    pub fn pump(&self) -> &str {
        &self.pump
    }

    /// Returns the payload.
    #[must_use]
    pub const fn data(&self) -> &Value {
        &self.data
    }

    /// Splits the envelope into its pump name and payload.
    #[must_use]
    pub fn into_parts(self) -> (String, Value) {
        (self.pump, self.data)
    }

    /// Extracts an envelope from a decoded value.
    ///
    /// `preview` is quoted in the error when fields are missing.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MissingFields`] unless `value` is a map with
    /// a non-empty string `pump` and a `data` key.
    pub fn from_value(value: Value, preview: &str) -> Result<Self, ProtocolError> {
        let Value::Object(mut map) = value else {
            return Err(ProtocolError::MissingFields {
                missing: vec![PUMP_KEY, DATA_KEY],
                preview: preview.to_owned(),
            });
        };
        let pump = map
            .get(PUMP_KEY)
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
            .map(str::to_owned);
        let data = map.remove(DATA_KEY);
        match (pump, data) {
            (Some(pump), Some(data)) => Ok(Self { pump, data }),
            (pump, data) => Err(ProtocolError::MissingFields {
                missing: [(PUMP_KEY, pump.is_none()), (DATA_KEY, data.is_none())]
                    .into_iter()
                    .filter_map(|(key, absent)| absent.then_some(key))
                    .collect(),
                preview: preview.to_owned(),
            }),
        }
    }
}

/// Encodes a structured value.
///
/// # Errors
///
/// Returns [`CodecError`] if the value cannot be serialized.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, CodecError> {
    Ok(serde_json::to_vec(value)?)
}

/// Decodes a structured value.
///
/// # Errors
///
/// Returns [`CodecError`] if `bytes` are not a valid encoding.
pub fn decode(bytes: &[u8]) -> Result<Value, CodecError> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Lossily renders at most `limit` bytes for log messages.
pub(crate) fn preview(bytes: &[u8], limit: usize) -> String {
    let shown = bytes.get(..limit.min(bytes.len())).unwrap_or_default();
    let mut text = String::from_utf8_lossy(shown).into_owned();
    if bytes.len() > limit {
        text.push_str("...");
    }
    text
}

#[cfg(test)]
mod tests;
