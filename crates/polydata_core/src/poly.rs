use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::{PolyError, PolyResult};

/// Reserved key carrying the document id inside the mapping.
pub const ID_KEY: &str = "_id";
/// Key holding the free-form tag list of a document.
pub const TAGS_KEY: &str = "tags";

/// Schema-less identified document: an insertion-ordered mapping of string
/// keys to arbitrary JSON values. The id lives inside the mapping under
/// [`ID_KEY`], so serialization is exactly the JSON object form.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Poly {
    fields: Map<String, JsonValue>,
}

impl Poly {
    pub fn new(id: impl Into<String>) -> Self {
        let mut fields = Map::new();
        fields.insert(ID_KEY.to_string(), JsonValue::String(id.into()));
        Self { fields }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn id(&self) -> Option<&str> {
        self.fields.get(ID_KEY).and_then(JsonValue::as_str)
    }

    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.fields.get(key)
    }

    pub fn put(
        &mut self,
        key: impl Into<String>,
        value: impl Into<JsonValue>,
    ) -> Option<JsonValue> {
        self.fields.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<JsonValue> {
        self.fields.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    /// Tag list of the document. Absent or non-array `tags` yields an empty
    /// list; non-string members are skipped.
    pub fn tags(&self) -> Vec<String> {
        match self.fields.get(TAGS_KEY) {
            Some(JsonValue::Array(values)) => values
                .iter()
                .filter_map(JsonValue::as_str)
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        }
    }

    /// All key/value entries, including [`ID_KEY`], in insertion order.
    pub fn entries(&self) -> impl Iterator<Item = (&String, &JsonValue)> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn to_json_string(&self) -> PolyResult<String> {
        serde_json::to_string(self).map_err(PolyError::from)
    }

    pub fn from_json_str(raw: &str) -> PolyResult<Self> {
        serde_json::from_str(raw).map_err(PolyError::from)
    }
}
