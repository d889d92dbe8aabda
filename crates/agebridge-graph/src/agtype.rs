//! Decoding of agtype text output.
//!
//! agtype's text form is JSON with type annotations appended to composite
//! values (`{...}::vertex`, `[...]::path`) and some scalars (`1.5::numeric`).
//! Annotations are stripped outside string literals and the remainder is
//! parsed with serde_json.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use agebridge_core::{InternalId, Payload};

use crate::error::{GraphError, Result};

/// Property key under which a vertex or edge keeps its payload.
pub const PAYLOAD_KEY: &str = "payload";

/// Parse agtype text into a JSON value.
///
/// Text that is not valid JSON after annotation stripping is a bare string
/// scalar (some agtype→text casts drop the quotes) and is returned as such.
pub fn parse(text: &str) -> Value {
    let stripped = strip_annotations(text);
    serde_json::from_str(stripped.trim()).unwrap_or_else(|_| Value::String(text.to_string()))
}

/// Parse agtype text that must be a JSON object.
pub fn parse_object(text: &str) -> Result<Payload> {
    match parse(text) {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Payload::new()),
        other => Err(GraphError::Decode(format!("expected an object, got {other}"))),
    }
}

/// Parse agtype text into a typed value.
pub fn parse_as<T: for<'de> Deserialize<'de>>(text: &str) -> Result<T> {
    serde_json::from_value(parse(text))
        .map_err(|e| GraphError::Decode(format!("{e} in {text:?}")))
}

fn strip_annotations(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;
    let mut i = 0;
    let mut copied = 0;

    while i < bytes.len() {
        let b = bytes[i];
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            i += 1;
            continue;
        }
        if b == b'"' {
            in_string = true;
            i += 1;
            continue;
        }
        if b == b':' && bytes.get(i + 1) == Some(&b':') {
            let mut j = i + 2;
            while j < bytes.len() && (bytes[j].is_ascii_alphanumeric() || bytes[j] == b'_') {
                j += 1;
            }
            if j > i + 2 {
                out.push_str(&text[copied..i]);
                copied = j;
                i = j;
                continue;
            }
        }
        i += 1;
    }
    out.push_str(&text[copied..]);
    out
}

/// Read an internal id from a JSON number or string.
pub fn internal_id(value: &Value) -> Result<InternalId> {
    match value {
        Value::Number(n) => Ok(InternalId::new(n.to_string())),
        Value::String(s) if !s.is_empty() => Ok(InternalId::new(s.clone())),
        other => Err(GraphError::Decode(format!("not an internal id: {other}"))),
    }
}

fn de_internal_id<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<InternalId, D::Error> {
    let v = Value::deserialize(d)?;
    internal_id(&v).map_err(serde::de::Error::custom)
}

/// The payload held in a property map, or the whole map when the entity was
/// written without the `payload` wrapper.
pub fn unwrap_payload(mut properties: Payload) -> Payload {
    match properties.remove(PAYLOAD_KEY) {
        Some(Value::Object(inner)) => inner,
        Some(other) => {
            properties.insert(PAYLOAD_KEY.to_string(), other);
            properties
        }
        None => properties,
    }
}

/// A vertex as returned by `RETURN n`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Vertex {
    #[serde(deserialize_with = "de_internal_id")]
    pub id: InternalId,
    pub label: String,
    #[serde(default)]
    pub properties: Payload,
}

/// An edge as returned by `RETURN e`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Edge {
    #[serde(deserialize_with = "de_internal_id")]
    pub id: InternalId,
    pub label: String,
    #[serde(deserialize_with = "de_internal_id")]
    pub start_id: InternalId,
    #[serde(deserialize_with = "de_internal_id")]
    pub end_id: InternalId,
    #[serde(default)]
    pub properties: Payload,
}
