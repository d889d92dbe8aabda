//! Interactive writes through the Cypher interpreter.
//!
//! Each call validates its labels, runs one statement and commits once.

use tracing::{debug, warn};

use agebridge_core::{Label, Payload};

use crate::client::AgeGraph;
use crate::cypher::{business_id_match, CypherStatement};
use crate::error::{GraphError, Result};
use crate::queries::{EdgeView, NodeView};
use crate::session::GraphSession;

impl<S: GraphSession> AgeGraph<S> {
    // ── Nodes ───────────────────────────────────────────────────

    /// Create one node with `payload` under `label`.
    pub async fn insert_node(&mut self, label: &str, payload: &Payload) -> Result<NodeView> {
        let label = Label::parse(label)?;
        let stmt = CypherStatement::new(format!(
            "CREATE (n:{label})\n\
             SET n.payload = $payload\n\
             RETURN id(n), labels(n), n.payload"
        ))
        .returning(&["id", "label", "properties"])
        .param("payload", payload.clone());

        let rows = self.run_cypher(&stmt).await?;
        let node = rows
            .first()
            .ok_or_else(|| GraphError::Decode("node insert returned no row".into()))
            .and_then(NodeView::from_columns)?;
        debug!(label = %label, id = %node.id, "Node created");
        Ok(node)
    }

    // ── Edges ───────────────────────────────────────────────────

    /// Create an edge between the nodes whose payload ids are `src_id` and
    /// `dst_id`. Ids compare as text, so numeric payload ids match too.
    /// Nothing is written when either endpoint is missing.
    pub async fn create_edge_by_business_ids(
        &mut self,
        src_label: &str,
        dst_label: &str,
        edge_label: &str,
        src_id: &str,
        dst_id: &str,
        payload: &Payload,
    ) -> Result<EdgeView> {
        let src = Label::parse(src_label)?;
        let dst = Label::parse(dst_label)?;
        let edge = Label::parse(edge_label)?;

        let stmt = CypherStatement::new(format!(
            "MATCH (s:{src}) WHERE {}\n\
             MATCH (t:{dst}) WHERE {}\n\
             CREATE (s)-[e:{edge}]->(t)\n\
             SET e.payload = $payload\n\
             RETURN id(e), type(e), e.payload, id(s), id(t)",
            business_id_match("s", "src_id"),
            business_id_match("t", "dst_id"),
        ))
        .returning(&["id", "label", "properties", "src", "dst"])
        .param("src_id", src_id)
        .param("dst_id", dst_id)
        .param("payload", payload.clone());

        let (sql, params) = stmt.to_sql(self.name())?;
        let rows = self.session.query(&sql, &params).await?;
        let Some(first) = rows.first() else {
            self.session.rollback().await?;
            return Err(GraphError::EndpointsNotFound {
                src_id: src_id.to_string(),
                dst_id: dst_id.to_string(),
            });
        };
        let created = EdgeView::from_columns(first)?;
        self.session.commit().await?;

        if rows.len() > 1 {
            warn!(
                src_id,
                dst_id,
                edges = rows.len(),
                "Business ids matched several nodes; one edge created per pair"
            );
        }
        debug!(label = %edge, id = %created.id, "Edge created");
        Ok(created)
    }
}
