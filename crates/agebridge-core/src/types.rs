//! Core domain types for the agebridge property graph.
//!
//! Payloads are open-ended key/value maps. The only field this layer ever
//! reads is the business id (`id`), through [`business_id`].

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Arbitrary property map attached to a node or edge.
pub type Payload = serde_json::Map<String, Value>;

/// Payload field holding the caller-chosen business id.
pub const BUSINESS_ID_FIELD: &str = "id";

/// Business id → internal identity, scoped to one load run.
pub type IdMap = HashMap<String, InternalId>;

/// Read the business id from a payload.
///
/// Strings are returned as-is; numbers and booleans are rendered as text so
/// that `{"id": 7}` and `{"id": "7"}` correlate, matching how the id-map is
/// rebuilt from the store (`->>'id'`).
pub fn business_id(payload: &Payload) -> Option<String> {
    value_as_id(payload.get(BUSINESS_ID_FIELD)?)
}

/// Render a scalar JSON value as an id string.
pub fn value_as_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

// ── Internal identity ─────────────────────────────────────────────

/// Store-assigned identity of a vertex or edge (an AGE `graphid`).
///
/// Treated as opaque text everywhere except where the interpreted query path
/// needs it as an integer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InternalId(pub String);

impl InternalId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Numeric form used when binding the id into a Cypher parameter.
    pub fn as_graphid(&self) -> Option<i64> {
        self.0.trim().parse().ok()
    }
}

impl From<i64> for InternalId {
    fn from(v: i64) -> Self {
        Self(v.to_string())
    }
}

impl fmt::Display for InternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Bulk source records ───────────────────────────────────────────

/// A node record of the bulk source: `{id, label, properties}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub properties: Payload,
}

impl NodeRecord {
    /// The payload stored on the vertex: properties plus the business id and
    /// label, so a row can be correlated back to its record.
    pub fn payload(&self) -> Payload {
        let mut payload = Payload::new();
        payload.insert(BUSINESS_ID_FIELD.to_string(), Value::String(self.id.clone()));
        for (k, v) in &self.properties {
            if k != BUSINESS_ID_FIELD {
                payload.insert(k.clone(), v.clone());
            }
        }
        payload.insert("label".to_string(), Value::String(self.label.clone()));
        payload
    }
}

/// An edge record of the bulk source; `src`/`dst` reference node record ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub id: String,
    pub label: String,
    pub src: String,
    pub dst: String,
    #[serde(default)]
    pub properties: Payload,
}
