//! One-hop traversals filtered by node and edge type.
//!
//! The focal node always binds to `s`, the neighbour to `t`. Direction picks
//! the arrow: `out` follows edges leaving `s`, `in` edges arriving at `s`,
//! `both` ignores direction.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use agebridge_core::{GraphName, Label};

use crate::client::AgeGraph;
use crate::cypher::{business_id_match, label_filter, CypherStatement};
use crate::error::{GraphError, Result};
use crate::queries::{EdgeView, NodeView};
use crate::session::{GraphSession, SqlParam};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Out,
    In,
    Both,
}

impl FromStr for Direction {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "out" => Ok(Self::Out),
            "in" => Ok(Self::In),
            "both" => Ok(Self::Both),
            other => Err(GraphError::InvalidInput(format!(
                "direction must be out, in or both, got {other:?}"
            ))),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Out => "out",
            Self::In => "in",
            Self::Both => "both",
        })
    }
}

/// A typed one-hop pattern. Labels are validated on construction; ids and
/// the limit are bound as parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TraversalQuery {
    pub direction: Direction,
    pub src_label: Option<Label>,
    pub edge_label: Option<Label>,
    pub dst_label: Option<Label>,
    pub src_id: Option<String>,
    pub dst_id: Option<String>,
    pub return_edges: bool,
    pub limit: Option<usize>,
}

impl TraversalQuery {
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            ..Self::default()
        }
    }

    /// Build from raw label strings; absent labels match any type.
    pub fn from_labels(
        direction: Direction,
        src_label: Option<&str>,
        edge_label: Option<&str>,
        dst_label: Option<&str>,
    ) -> Result<Self> {
        Ok(Self {
            direction,
            src_label: Label::parse_opt(src_label)?,
            edge_label: Label::parse_opt(edge_label)?,
            dst_label: Label::parse_opt(dst_label)?,
            ..Self::default()
        })
    }

    pub fn src_id(mut self, id: impl Into<String>) -> Self {
        self.src_id = Some(id.into());
        self
    }

    pub fn dst_id(mut self, id: impl Into<String>) -> Self {
        self.dst_id = Some(id.into());
        self
    }

    pub fn return_edges(mut self, yes: bool) -> Self {
        self.return_edges = yes;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn pattern(&self) -> String {
        let s = label_filter(self.src_label.as_ref());
        let e = label_filter(self.edge_label.as_ref());
        let t = label_filter(self.dst_label.as_ref());
        match self.direction {
            Direction::Out => format!("(s{s})-[e{e}]->(t{t})"),
            Direction::In => format!("(s{s})<-[e{e}]-(t{t})"),
            Direction::Both => format!("(s{s})-[e{e}]-(t{t})"),
        }
    }

    pub(crate) fn statement(&self) -> CypherStatement {
        let mut text = format!("MATCH {}", self.pattern());
        let mut filters: Vec<String> = Vec::new();
        let mut params: Vec<(&str, Value)> = Vec::new();

        if let Some(id) = &self.src_id {
            filters.push(business_id_match("s", "src_id"));
            params.push(("src_id", Value::from(id.as_str())));
        }
        if let Some(id) = &self.dst_id {
            filters.push(business_id_match("t", "dst_id"));
            params.push(("dst_id", Value::from(id.as_str())));
        }
        if !filters.is_empty() {
            text.push_str("\nWHERE ");
            text.push_str(&filters.join(" AND "));
        }

        let columns: &[&'static str] = if self.return_edges {
            text.push_str("\nRETURN t, e");
            &["t", "e"]
        } else {
            text.push_str("\nRETURN t");
            &["t"]
        };

        if let Some(limit) = self.limit.filter(|l| *l > 0) {
            text.push_str("\nLIMIT toInteger($limit)");
            params.push(("limit", Value::from(limit)));
        }

        params
            .into_iter()
            .fold(CypherStatement::new(text).returning(columns), |stmt, (k, v)| {
                stmt.param(k, v)
            })
    }

    /// Rendered SQL and parameters, without running anything.
    pub fn render(&self, graph: &GraphName) -> Result<(String, Vec<SqlParam>)> {
        self.statement().to_sql(graph)
    }
}

/// A neighbour reached by a traversal, with the connecting edge when asked.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraversalRow {
    pub node: NodeView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edge: Option<EdgeView>,
}

impl<S: GraphSession> AgeGraph<S> {
    /// Run a typed one-hop traversal.
    pub async fn query_by_types(&mut self, query: &TraversalQuery) -> Result<Vec<TraversalRow>> {
        let rows = self.run_cypher(&query.statement()).await?;
        rows.iter()
            .map(|row| -> Result<TraversalRow> {
                Ok(TraversalRow {
                    node: NodeView::from_vertex_text(row.require(0)?)?,
                    edge: if query.return_edges {
                        Some(EdgeView::from_edge_text(row.require(1)?)?)
                    } else {
                        None
                    },
                })
            })
            .collect()
    }

    /// Neighbours reached by edges leaving the focal node.
    pub async fn query_out_by_types(
        &mut self,
        src_label: Option<&str>,
        edge_label: Option<&str>,
        dst_label: Option<&str>,
        src_id: Option<&str>,
        return_edges: bool,
        limit: Option<usize>,
    ) -> Result<Vec<TraversalRow>> {
        self.typed_hop(Direction::Out, src_label, edge_label, dst_label, src_id, return_edges, limit)
            .await
    }

    /// Neighbours whose edges arrive at the focal node.
    ///
    /// `focal_label`/`focal_id` select the node the edges point to;
    /// `neighbor_label` constrains the nodes they come from.
    pub async fn query_in_by_types(
        &mut self,
        focal_label: Option<&str>,
        edge_label: Option<&str>,
        neighbor_label: Option<&str>,
        focal_id: Option<&str>,
        return_edges: bool,
        limit: Option<usize>,
    ) -> Result<Vec<TraversalRow>> {
        self.typed_hop(Direction::In, focal_label, edge_label, neighbor_label, focal_id, return_edges, limit)
            .await
    }

    /// Neighbours connected to `node_id` by an edge in either direction.
    pub async fn query_both_by_types(
        &mut self,
        node_label: Option<&str>,
        edge_label: Option<&str>,
        neighbor_label: Option<&str>,
        node_id: Option<&str>,
        return_edges: bool,
        limit: Option<usize>,
    ) -> Result<Vec<TraversalRow>> {
        self.typed_hop(Direction::Both, node_label, edge_label, neighbor_label, node_id, return_edges, limit)
            .await
    }

    /// The focal node binds `s`, the neighbour `t`.
    #[allow(clippy::too_many_arguments)]
    async fn typed_hop(
        &mut self,
        direction: Direction,
        focal_label: Option<&str>,
        edge_label: Option<&str>,
        neighbor_label: Option<&str>,
        focal_id: Option<&str>,
        return_edges: bool,
        limit: Option<usize>,
    ) -> Result<Vec<TraversalRow>> {
        let mut query = TraversalQuery::from_labels(direction, focal_label, edge_label, neighbor_label)?
            .return_edges(return_edges);
        query.src_id = focal_id.map(str::to_string);
        query.limit = limit;
        self.query_by_types(&query).await
    }
}
