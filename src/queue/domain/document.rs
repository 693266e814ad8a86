//! Structured documents carried as task payloads and results.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};

/// Arbitrary nested key/value document.
///
/// The queue stores and returns documents verbatim; only handlers interpret
/// them, typically by decoding into a handler-specific type with
/// [`Document::decode`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document(Value);

impl Document {
    /// Creates an empty JSON object document.
    #[must_use]
    pub fn empty() -> Self {
        Self(Value::Object(Map::new()))
    }

    /// Wraps an existing JSON value.
    #[must_use]
    pub const fn from_value(value: Value) -> Self {
        Self(value)
    }

    /// Serializes a typed value into a document.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error when the value cannot be represented as
    /// JSON (for example maps with non-string keys).
    pub fn encode<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        serde_json::to_value(value).map(Self)
    }

    /// Deserializes the document into a typed value.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error when the document shape does not match
    /// `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.0)
    }

    /// Returns the wrapped JSON value.
    #[must_use]
    pub const fn as_value(&self) -> &Value {
        &self.0
    }

    /// Consumes the document, returning the JSON value.
    #[must_use]
    pub fn into_inner(self) -> Value {
        self.0
    }

    /// Returns the top-level object entries, if the document is an object.
    #[must_use]
    pub fn as_object(&self) -> Option<&Map<String, Value>> {
        self.0.as_object()
    }
}

impl From<Value> for Document {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

impl From<Document> for Value {
    fn from(value: Document) -> Self {
        value.0
    }
}
