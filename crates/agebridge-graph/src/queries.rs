//! Read queries: node lookup, browsing, and the free-form escape hatch.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;

use agebridge_core::{GraphName, InternalId, Payload};

use crate::agtype::{self, Edge, Vertex};
use crate::client::AgeGraph;
use crate::cypher::{quote_ident, CypherStatement};
use crate::error::{GraphError, Result};
use crate::session::{GraphSession, SqlParam, TextRow};

// ── Result types ────────────────────────────────────────────────────

/// A vertex as handed to callers: internal id, labels, unwrapped payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeView {
    pub id: InternalId,
    pub labels: Vec<String>,
    pub properties: Payload,
}

impl NodeView {
    /// Decode an `id, labels, payload` row.
    pub(crate) fn from_columns(row: &TextRow) -> Result<Self> {
        Ok(Self {
            id: agtype::internal_id(&agtype::parse(row.require(0)?))?,
            labels: decode_labels(row.get(1))?,
            properties: row.get(2).map(agtype::parse_object).transpose()?.unwrap_or_default(),
        })
    }

    /// Decode a column holding a whole vertex.
    pub(crate) fn from_vertex_text(text: &str) -> Result<Self> {
        let v: Vertex = agtype::parse_as(text)?;
        Ok(Self {
            id: v.id,
            labels: vec![v.label],
            properties: agtype::unwrap_payload(v.properties),
        })
    }

    /// Business id of the node, if its payload carries one.
    pub fn business_id(&self) -> Option<String> {
        agebridge_core::business_id(&self.properties)
    }
}

fn decode_labels(text: Option<&str>) -> Result<Vec<String>> {
    match text.map(agtype::parse) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::String(s)) => Ok(vec![s]),
        Some(Value::Array(items)) => Ok(items
            .into_iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect()),
        Some(other) => Err(GraphError::Decode(format!("unexpected labels value {other}"))),
    }
}

/// An edge as handed to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EdgeView {
    pub id: InternalId,
    pub label: String,
    pub start: Option<InternalId>,
    pub end: Option<InternalId>,
    pub properties: Payload,
}

impl EdgeView {
    /// Decode an `id, type, payload, start, end` row.
    pub(crate) fn from_columns(row: &TextRow) -> Result<Self> {
        let endpoint = |idx: usize| -> Result<Option<InternalId>> {
            row.get(idx)
                .map(|t| agtype::internal_id(&agtype::parse(t)))
                .transpose()
        };
        let label = match row.get(1).map(agtype::parse) {
            Some(Value::String(s)) => s,
            Some(other) => other.to_string(),
            None => String::new(),
        };
        Ok(Self {
            id: agtype::internal_id(&agtype::parse(row.require(0)?))?,
            label,
            properties: row.get(2).map(agtype::parse_object).transpose()?.unwrap_or_default(),
            start: endpoint(3)?,
            end: endpoint(4)?,
        })
    }

    /// Decode a column holding a whole edge.
    pub(crate) fn from_edge_text(text: &str) -> Result<Self> {
        let e: Edge = agtype::parse_as(text)?;
        Ok(Self {
            id: e.id,
            label: e.label,
            start: Some(e.start_id),
            end: Some(e.end_id),
            properties: agtype::unwrap_payload(e.properties),
        })
    }
}

/// A node with a bounded sample of its outgoing edges.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeWithEdges {
    pub node: NodeView,
    pub edges: Vec<EdgeView>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RowKind {
    Node,
    Edge,
}

/// Flat browse row: nodes and edges in one table, edges carrying endpoints.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BrowseRow {
    pub id: InternalId,
    pub label: Vec<String>,
    pub properties: Payload,
    pub kind: RowKind,
    pub src: Option<InternalId>,
    pub dst: Option<InternalId>,
}

impl NodeWithEdges {
    /// The node row followed by one row per edge.
    pub fn flatten(&self) -> Vec<BrowseRow> {
        let mut rows = Vec::with_capacity(1 + self.edges.len());
        rows.push(BrowseRow {
            id: self.node.id.clone(),
            label: self.node.labels.clone(),
            properties: self.node.properties.clone(),
            kind: RowKind::Node,
            src: None,
            dst: None,
        });
        rows.extend(self.edges.iter().map(|e| BrowseRow {
            id: e.id.clone(),
            label: vec![e.label.clone()],
            properties: e.properties.clone(),
            kind: RowKind::Edge,
            src: e.start.clone(),
            dst: e.end.clone(),
        }));
        rows
    }
}

fn parse_node_id(id: &str) -> Result<i64> {
    InternalId::new(id)
        .as_graphid()
        .ok_or_else(|| GraphError::InvalidInput(format!("node id must be an integer, got {id:?}")))
}

impl<S: GraphSession> AgeGraph<S> {
    // ── Lookup ──────────────────────────────────────────────────

    /// Fetch a node by internal id. `None` when no such node exists.
    pub async fn find_node(&mut self, node_id: &str) -> Result<Option<NodeView>> {
        let id = parse_node_id(node_id)?;
        let stmt = CypherStatement::new(
            "MATCH (n) WHERE id(n) = $node_id\n\
             RETURN id(n), labels(n), n.payload\n\
             LIMIT 1",
        )
        .returning(&["id", "label", "properties"])
        .param("node_id", id);

        let rows = self.run_cypher(&stmt).await?;
        rows.first().map(NodeView::from_columns).transpose()
    }

    /// Fetch a node by internal id together with all of its outgoing edges.
    pub async fn find_node_with_edges(&mut self, node_id: &str) -> Result<Option<NodeWithEdges>> {
        let id = parse_node_id(node_id)?;
        let stmt = CypherStatement::new("MATCH (n) WHERE id(n) = $node_id RETURN n")
            .returning(&["n"])
            .param("node_id", id);
        let rows = self.run_cypher(&stmt).await?;
        let Some(text) = rows.first().map(|r| r.require(0)).transpose()? else {
            return Ok(None);
        };
        let node = NodeView::from_vertex_text(text)?;
        let mut grouped = self.outgoing_edges(&[id]).await?;
        let edges = grouped.remove(&node.id).unwrap_or_default();
        Ok(Some(NodeWithEdges { node, edges }))
    }

    // ── Browse ──────────────────────────────────────────────────

    /// Up to `limit` nodes in internal id order, each with at most
    /// `graph.browse_edges_per_node` outgoing edges.
    pub async fn list_nodes_and_edges(&mut self, limit: usize) -> Result<Vec<NodeWithEdges>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let stmt = CypherStatement::new(
            "MATCH (n)\n\
             WITH n ORDER BY id(n) LIMIT toInteger($limit)\n\
             RETURN n",
        )
        .returning(&["n"])
        .param("limit", limit);
        let rows = self.run_cypher(&stmt).await?;

        let nodes = rows
            .iter()
            .map(|r| NodeView::from_vertex_text(r.require(0)?))
            .collect::<Result<Vec<_>>>()?;
        if nodes.is_empty() {
            return Ok(Vec::new());
        }

        let ids = nodes
            .iter()
            .filter_map(|n| n.id.as_graphid())
            .collect::<Vec<_>>();
        let per_node = self.settings.browse_edges_per_node;
        let mut grouped = self.sampled_outgoing_edges(&ids, per_node).await?;

        Ok(nodes
            .into_iter()
            .map(|node| {
                let edges = grouped.remove(&node.id).unwrap_or_default();
                NodeWithEdges { node, edges }
            })
            .collect())
    }

    /// At most `cap` outgoing edges per node, lowest edge ids first.
    ///
    /// The cap is applied by the server over the graph's edge parent table,
    /// so a node with a huge fan-out only ever ships `cap` rows.
    async fn sampled_outgoing_edges(
        &mut self,
        ids: &[i64],
        cap: usize,
    ) -> Result<HashMap<InternalId, Vec<EdgeView>>> {
        let mut grouped: HashMap<InternalId, Vec<EdgeView>> = HashMap::new();
        if cap == 0 {
            return Ok(grouped);
        }
        for batch in ids.chunks(SAMPLE_BATCH) {
            let (sql, params) = sampled_edges_sql(self.name(), batch, cap);
            let rows = self.session.query(&sql, &params).await?;
            self.session.commit().await?;
            for row in &rows {
                let edge = EdgeView::from_columns(row)?;
                if let Some(start) = edge.start.clone() {
                    grouped.entry(start).or_default().push(edge);
                }
            }
        }
        Ok(grouped)
    }

    /// Every outgoing edge of the given nodes, grouped by start node in edge
    /// id order.
    async fn outgoing_edges(&mut self, ids: &[i64]) -> Result<HashMap<InternalId, Vec<EdgeView>>> {
        let stmt = CypherStatement::new(
            "MATCH (n)-[e]->()\n\
             WHERE id(n) IN $ids\n\
             WITH e ORDER BY id(e)\n\
             RETURN e",
        )
        .returning(&["e"])
        .param("ids", ids.to_vec());
        let rows = self.run_cypher(&stmt).await?;

        let mut grouped: HashMap<InternalId, Vec<EdgeView>> = HashMap::new();
        for row in &rows {
            let edge = EdgeView::from_edge_text(row.require(0)?)?;
            let Some(start) = edge.start.clone() else {
                continue;
            };
            grouped.entry(start).or_default().push(edge);
        }
        Ok(grouped)
    }

    // ── Escape hatch ────────────────────────────────────────────

    /// Run caller-supplied SQL that embeds `cypher(...)` calls.
    ///
    /// Disabled unless `graph.allow_raw_queries` is set. Bare `cypher(`
    /// calls after `FROM`/`JOIN` are qualified with `ag_catalog.`, each row
    /// comes back as a JSON object, and agtype-valued fields are decoded.
    pub async fn query_using_sql_cypher(&mut self, sql: &str) -> Result<Vec<Payload>> {
        if !self.settings.allow_raw_queries {
            return Err(GraphError::RawQueriesDisabled);
        }
        let normalized = normalize_cypher_calls(sql);
        let inner = normalized.trim().trim_end_matches(';').trim_end();
        if inner.is_empty() {
            return Err(GraphError::InvalidInput("empty query".into()));
        }

        let wrapped = format!("SELECT row_to_json(q)::text FROM ({inner}) AS q");
        let rows = match self.session.query(&wrapped, &[]).await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!(error = %e, "Free-form query failed");
                return Err(e);
            }
        };
        self.session.commit().await?;

        rows.iter()
            .map(|r| -> Result<Payload> {
                let object: Payload = serde_json::from_str(r.require(0)?)?;
                Ok(object
                    .into_iter()
                    .map(|(k, v)| (k, decode_field(v)))
                    .collect())
            })
            .collect()
    }

    pub(crate) async fn run_cypher(&mut self, stmt: &CypherStatement) -> Result<Vec<TextRow>> {
        let (sql, params) = stmt.to_sql(self.name())?;
        let rows = self.session.query(&sql, &params).await?;
        self.session.commit().await?;
        Ok(rows)
    }
}

/// Start nodes per sampling statement, well under the bind parameter limit.
const SAMPLE_BATCH: usize = 1000;

/// `id, label, payload, start, end` rows for the first `cap` outgoing edges
/// of each start node, read straight from the edge parent table.
fn sampled_edges_sql(graph: &GraphName, ids: &[i64], cap: usize) -> (String, Vec<SqlParam>) {
    let mut params: Vec<SqlParam> = ids
        .iter()
        .map(|id| SqlParam::Graphid(InternalId::from(*id)))
        .collect();
    let placeholders = (1..=ids.len())
        .map(|n| format!("${n}::ag_catalog.graphid"))
        .collect::<Vec<_>>()
        .join(", ");
    params.push(SqlParam::text(cap.to_string()));
    let sql = format!(
        "SELECT id::text, label, payload, start_id::text, end_id::text FROM (\
         SELECT e.id, c.relname::text AS label, \
         COALESCE((e.properties::text)::jsonb -> 'payload', (e.properties::text)::jsonb)::text AS payload, \
         e.start_id, e.end_id, \
         row_number() OVER (PARTITION BY e.start_id ORDER BY e.id) AS rn \
         FROM {}.\"_ag_label_edge\" e \
         JOIN pg_catalog.pg_class c ON c.oid = e.tableoid \
         WHERE e.start_id IN ({placeholders})\
         ) ranked WHERE rn <= ${}::text::bigint ORDER BY ranked.start_id, ranked.id",
        quote_ident(graph.as_str()),
        ids.len() + 1,
    );
    (sql, params)
}

/// agtype columns serialize as strings of agtype text; turn them back into
/// structured values. Bare numbers and booleans are agtype scalars too, so
/// `count(n)` comes back as a number. Other strings are left alone.
fn decode_field(value: Value) -> Value {
    match value {
        Value::String(s) => {
            let looks_structured = s.starts_with('{')
                || s.starts_with('[')
                || s.starts_with('"')
                || s.ends_with("::numeric")
                || is_scalar_text(&s);
            if looks_structured {
                match agtype::parse(&s) {
                    Value::String(inner) if inner == s => Value::String(s),
                    parsed => parsed,
                }
            } else {
                Value::String(s)
            }
        }
        other => other,
    }
}

fn is_scalar_text(s: &str) -> bool {
    s == "true" || s == "false" || serde_json::from_str::<serde_json::Number>(s).is_ok()
}

/// Qualify bare `cypher(` calls that follow `FROM` or `JOIN` (any case).
pub fn normalize_cypher_calls(sql: &str) -> String {
    let lower = sql.to_ascii_lowercase();
    let bytes = lower.as_bytes();
    let mut out = String::with_capacity(sql.len() + 16);
    let mut copied = 0;
    let mut i = 0;

    while i < bytes.len() {
        let at_word_start = i == 0 || !is_ident_byte(bytes[i - 1]);
        let keyword = at_word_start && (bytes[i..].starts_with(b"from") || bytes[i..].starts_with(b"join"));
        if keyword {
            let mut j = i + 4;
            let ws = j;
            while j < bytes.len() && bytes[j].is_ascii_whitespace() {
                j += 1;
            }
            if j > ws && bytes[j..].starts_with(b"cypher") {
                let mut k = j + "cypher".len();
                while k < bytes.len() && bytes[k].is_ascii_whitespace() {
                    k += 1;
                }
                if bytes.get(k) == Some(&b'(') {
                    out.push_str(&sql[copied..j]);
                    out.push_str("ag_catalog.cypher");
                    copied = j + "cypher".len();
                    i = k;
                    continue;
                }
            }
        }
        i += 1;
    }
    out.push_str(&sql[copied..]);
    out
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}
