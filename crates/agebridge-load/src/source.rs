//! Bulk source files.
//!
//! Node file: JSON array of `{id, label, properties, kind?}`.
//! Edge file: JSON array of `{id, label, src, dst, properties, kind?}`.
//!
//! `properties` is either an object or a string holding a JSON object;
//! anything unparseable becomes an empty map. `kind`, when present, may be
//! plain (`"node"`) or double-encoded (`"\"node\""`); records of the other
//! kind are ignored.

use std::path::Path;

use serde::Deserialize;
use serde_json::Value;

use agebridge_core::types::value_as_id;
use agebridge_core::{EdgeRecord, NodeRecord, Payload};

use crate::error::{LoadError, Result};

#[derive(Debug, Deserialize)]
struct RawRecord {
    id: Value,
    label: String,
    #[serde(default)]
    src: Value,
    #[serde(default)]
    dst: Value,
    #[serde(default)]
    properties: Value,
    #[serde(default)]
    kind: Option<String>,
}

/// Node and edge records of one load run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkSource {
    pub nodes: Vec<NodeRecord>,
    pub edges: Vec<EdgeRecord>,
    /// Records dropped because their `kind` named the other record type.
    pub ignored: usize,
}

impl BulkSource {
    /// Read both files.
    pub fn read(nodes_file: impl AsRef<Path>, edges_file: impl AsRef<Path>) -> Result<Self> {
        let nodes_raw = read_array(nodes_file.as_ref())?;
        let edges_raw = read_array(edges_file.as_ref())?;
        Self::from_raw(nodes_raw, edges_raw, nodes_file.as_ref(), edges_file.as_ref())
    }

    /// Parse both arrays from in-memory JSON text.
    pub fn from_json(nodes: &str, edges: &str) -> Result<Self> {
        let parse = |text: &str, what: &str| -> Result<Vec<RawRecord>> {
            serde_json::from_str(text).map_err(|e| LoadError::Source {
                path: what.to_string(),
                detail: e.to_string(),
            })
        };
        Self::from_raw(
            parse(nodes, "<nodes>")?,
            parse(edges, "<edges>")?,
            Path::new("<nodes>"),
            Path::new("<edges>"),
        )
    }

    fn from_raw(
        nodes_raw: Vec<RawRecord>,
        edges_raw: Vec<RawRecord>,
        nodes_path: &Path,
        edges_path: &Path,
    ) -> Result<Self> {
        let mut source = BulkSource::default();

        for (i, raw) in nodes_raw.into_iter().enumerate() {
            if !kind_matches(raw.kind.as_deref(), "node") {
                source.ignored += 1;
                continue;
            }
            source.nodes.push(NodeRecord {
                id: required_id(&raw.id, nodes_path, i, "id")?,
                label: raw.label,
                properties: properties(raw.properties),
            });
        }

        for (i, raw) in edges_raw.into_iter().enumerate() {
            if !kind_matches(raw.kind.as_deref(), "edge") {
                source.ignored += 1;
                continue;
            }
            source.edges.push(EdgeRecord {
                id: value_as_id(&raw.id).unwrap_or_default(),
                label: raw.label,
                src: required_id(&raw.src, edges_path, i, "src")?,
                dst: required_id(&raw.dst, edges_path, i, "dst")?,
                properties: properties(raw.properties),
            });
        }

        tracing::info!(
            nodes = source.nodes.len(),
            edges = source.edges.len(),
            ignored = source.ignored,
            "Bulk source read"
        );
        Ok(source)
    }
}

fn read_array(path: &Path) -> Result<Vec<RawRecord>> {
    let text = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|e| LoadError::Source {
        path: path.display().to_string(),
        detail: e.to_string(),
    })
}

fn kind_matches(kind: Option<&str>, expected: &str) -> bool {
    match kind {
        None => true,
        Some(k) => k.trim_matches('"') == expected,
    }
}

fn required_id(value: &Value, path: &Path, index: usize, field: &str) -> Result<String> {
    value_as_id(value)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| LoadError::Source {
            path: path.display().to_string(),
            detail: format!("record {index} has no usable {field}"),
        })
}

fn properties(value: Value) -> Payload {
    match value {
        Value::Object(map) => map,
        Value::String(text) => match serde_json::from_str(&text) {
            Ok(Value::Object(map)) => map,
            _ => Payload::new(),
        },
        _ => Payload::new(),
    }
}
