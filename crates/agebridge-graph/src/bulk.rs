//! Chunked bulk loaders.
//!
//! Rows are written straight into the label tables with multi-row
//! `INSERT ... VALUES`, one statement and one commit per chunk. The Cypher
//! interpreter is only used to bootstrap a label whose table does not exist
//! yet; the first record of the batch is inserted that way and the rest go
//! through the direct path.

use std::fmt;
use std::time::Instant;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{error, info, warn};

use agebridge_core::{IdMap, InternalId, Label, Payload};

use crate::agtype::PAYLOAD_KEY;
use crate::client::AgeGraph;
use crate::cypher::{label_table, CypherStatement, AGTYPE};
use crate::error::{GraphError, Result};
use crate::session::{GraphSession, SqlParam};

pub const DEFAULT_CHUNK_SIZE: usize = 2000;
pub const MAX_CHUNK_SIZE: usize = 20_000;

/// Tuning and control for one bulk call.
#[derive(Debug, Clone)]
pub struct BulkOptions {
    pub chunk_size: usize,
    /// Checked between chunks; `true` stops the load after the last
    /// committed chunk.
    pub cancel: Option<watch::Receiver<bool>>,
}

impl Default for BulkOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            cancel: None,
        }
    }
}

impl BulkOptions {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size,
            cancel: None,
        }
    }

    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 || self.chunk_size > MAX_CHUNK_SIZE {
            return Err(GraphError::InvalidInput(format!(
                "chunk size must be between 1 and {MAX_CHUNK_SIZE}, got {}",
                self.chunk_size
            )));
        }
        Ok(())
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|rx| *rx.borrow())
    }
}

/// How far a chunked load got. Chunks are committed in order, so everything
/// up to `last_committed_chunk` is durable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChunkProgress {
    pub total_chunks: usize,
    pub chunks_committed: usize,
    pub rows_committed: usize,
    pub last_committed_chunk: Option<usize>,
}

impl fmt::Display for ChunkProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} chunks ({} rows) committed",
            self.chunks_committed, self.total_chunks, self.rows_committed
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeLoadOutcome {
    pub label: Label,
    /// Business id → internal id for every row now stored under the label.
    #[serde(skip)]
    pub id_map: IdMap,
    pub inserted: usize,
    pub bootstrapped: bool,
    /// Statements issued against the store, bootstrap included.
    pub statements: usize,
    /// Business ids held by more than one row; the highest internal id wins.
    pub duplicate_business_ids: usize,
    /// Stored rows without a business id; absent from the id-map.
    pub missing_business_ids: usize,
    pub progress: ChunkProgress,
}

#[derive(Debug, Clone, Serialize)]
pub struct EdgeLoadOutcome {
    pub label: Label,
    pub inserted: usize,
    pub bootstrapped: bool,
    pub statements: usize,
    pub progress: ChunkProgress,
}

/// An edge whose endpoints are already resolved to internal ids.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedEdge {
    pub start: InternalId,
    pub end: InternalId,
    pub payload: Payload,
}

fn wrap_payload(payload: &Payload) -> Value {
    let mut properties = Payload::new();
    properties.insert(PAYLOAD_KEY.to_string(), Value::Object(payload.clone()));
    Value::Object(properties)
}

fn node_chunk_sql(table: &str, chunk: &[Payload]) -> (String, Vec<SqlParam>) {
    let values = (1..=chunk.len())
        .map(|i| format!("(${i}::{AGTYPE})"))
        .collect::<Vec<_>>()
        .join(", ");
    let params = chunk
        .iter()
        .map(|p| SqlParam::Agtype(wrap_payload(p)))
        .collect();
    (
        format!("INSERT INTO {table} (properties) VALUES {values}"),
        params,
    )
}

fn edge_chunk_sql(table: &str, chunk: &[ResolvedEdge]) -> (String, Vec<SqlParam>) {
    let mut values = Vec::with_capacity(chunk.len());
    let mut params = Vec::with_capacity(chunk.len() * 3);
    for (i, edge) in chunk.iter().enumerate() {
        let n = i * 3;
        values.push(format!(
            "(${}::ag_catalog.graphid, ${}::ag_catalog.graphid, ${}::{AGTYPE})",
            n + 1,
            n + 2,
            n + 3
        ));
        params.push(SqlParam::Graphid(edge.start.clone()));
        params.push(SqlParam::Graphid(edge.end.clone()));
        params.push(SqlParam::Agtype(wrap_payload(&edge.payload)));
    }
    (
        format!(
            "INSERT INTO {table} (start_id, end_id, properties) VALUES {}",
            values.join(", ")
        ),
        params,
    )
}

fn graphid_value(id: &InternalId) -> Result<Value> {
    id.as_graphid()
        .map(Value::from)
        .ok_or_else(|| GraphError::InvalidInput(format!("malformed internal id {id:?}")))
}

impl<S: GraphSession> AgeGraph<S> {
    // ── Nodes ───────────────────────────────────────────────────

    /// Insert node payloads under one label and return the id-map for the
    /// label's rows.
    ///
    /// An empty batch issues no statements. Statement count on a fresh label
    /// is `1 + ceil((N - 1) / chunk_size)`.
    pub async fn bulk_insert_nodes(
        &mut self,
        label: &Label,
        payloads: &[Payload],
        options: &BulkOptions,
    ) -> Result<NodeLoadOutcome> {
        options.validate()?;
        let mut outcome = NodeLoadOutcome {
            label: label.clone(),
            id_map: IdMap::new(),
            inserted: 0,
            bootstrapped: false,
            statements: 0,
            duplicate_business_ids: 0,
            missing_business_ids: 0,
            progress: ChunkProgress::default(),
        };
        if payloads.is_empty() {
            return Ok(outcome);
        }

        let started = Instant::now();
        info!(graph = %self.name(), label = %label, rows = payloads.len(), "Bulk inserting nodes");

        let mut rest = payloads;
        if !self.label_exists(label).await? {
            let stmt = CypherStatement::new(format!(
                "CREATE (n:{label}) SET n.payload = $payload RETURN id(n)"
            ))
            .returning(&["vid"])
            .param("payload", payloads[0].clone());
            let (sql, params) = stmt.to_sql(self.name())?;
            self.session.query(&sql, &params).await?;
            self.session.commit().await?;
            outcome.bootstrapped = true;
            outcome.statements += 1;
            outcome.inserted += 1;
            rest = &payloads[1..];
        }

        let table = label_table(self.name(), label);
        let progress = self
            .insert_chunks(label, rest, options, |chunk| node_chunk_sql(&table, chunk))
            .await?;
        outcome.statements += progress.chunks_committed;
        outcome.inserted += progress.rows_committed;
        outcome.progress = progress;

        self.read_id_map(&mut outcome).await?;
        info!(
            label = %label,
            inserted = outcome.inserted,
            statements = outcome.statements,
            mapped = outcome.id_map.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Node bulk insert complete"
        );
        Ok(outcome)
    }

    /// Rebuild business id → internal id for every row of the label.
    ///
    /// Rows are read in internal id order, so with duplicated business ids
    /// the most recently inserted row wins deterministically.
    async fn read_id_map(&mut self, outcome: &mut NodeLoadOutcome) -> Result<()> {
        let sql = format!(
            "SELECT id::text, (properties::text)::jsonb -> 'payload' ->> 'id' FROM {} ORDER BY id",
            label_table(self.name(), &outcome.label)
        );
        let rows = self.session.query(&sql, &[]).await?;
        self.session.commit().await?;

        for row in &rows {
            let internal = InternalId::new(row.require(0)?);
            match row.get(1) {
                Some(business) => {
                    if outcome
                        .id_map
                        .insert(business.to_string(), internal)
                        .is_some()
                    {
                        outcome.duplicate_business_ids += 1;
                    }
                }
                None => outcome.missing_business_ids += 1,
            }
        }
        if outcome.duplicate_business_ids > 0 {
            warn!(
                label = %outcome.label,
                duplicate_business_ids = outcome.duplicate_business_ids,
                "Business ids shared by several rows; the latest row is mapped"
            );
        }
        if outcome.missing_business_ids > 0 {
            warn!(
                label = %outcome.label,
                missing_business_ids = outcome.missing_business_ids,
                "Rows without a business id are not mapped"
            );
        }
        Ok(())
    }

    // ── Edges ───────────────────────────────────────────────────

    /// Insert edges under one label between already-resolved endpoints.
    pub async fn bulk_insert_edges(
        &mut self,
        label: &Label,
        edges: &[ResolvedEdge],
        options: &BulkOptions,
    ) -> Result<EdgeLoadOutcome> {
        options.validate()?;
        let mut outcome = EdgeLoadOutcome {
            label: label.clone(),
            inserted: 0,
            bootstrapped: false,
            statements: 0,
            progress: ChunkProgress::default(),
        };
        if edges.is_empty() {
            return Ok(outcome);
        }

        let started = Instant::now();
        info!(graph = %self.name(), label = %label, rows = edges.len(), "Bulk inserting edges");

        let mut rest = edges;
        if !self.label_exists(label).await? {
            let first = &edges[0];
            let stmt = CypherStatement::new(format!(
                "MATCH (s) WHERE id(s) = $src\n\
                 MATCH (t) WHERE id(t) = $dst\n\
                 CREATE (s)-[e:{label}]->(t)\n\
                 SET e.payload = $payload\n\
                 RETURN id(e)"
            ))
            .returning(&["eid"])
            .param("src", graphid_value(&first.start)?)
            .param("dst", graphid_value(&first.end)?)
            .param("payload", first.payload.clone());
            let (sql, params) = stmt.to_sql(self.name())?;
            let rows = self.session.query(&sql, &params).await?;
            if rows.is_empty() {
                self.session.rollback().await?;
                return Err(GraphError::EndpointsNotFound {
                    src_id: first.start.to_string(),
                    dst_id: first.end.to_string(),
                });
            }
            self.session.commit().await?;
            outcome.bootstrapped = true;
            outcome.statements += 1;
            outcome.inserted += 1;
            rest = &edges[1..];
        }

        let table = label_table(self.name(), label);
        let progress = self
            .insert_chunks(label, rest, options, |chunk| edge_chunk_sql(&table, chunk))
            .await?;
        outcome.statements += progress.chunks_committed;
        outcome.inserted += progress.rows_committed;
        outcome.progress = progress;

        info!(
            label = %label,
            inserted = outcome.inserted,
            statements = outcome.statements,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Edge bulk insert complete"
        );
        Ok(outcome)
    }

    // ── Chunk driver ────────────────────────────────────────────

    async fn insert_chunks<T>(
        &mut self,
        label: &Label,
        rows: &[T],
        options: &BulkOptions,
        build: impl Fn(&[T]) -> (String, Vec<SqlParam>),
    ) -> Result<ChunkProgress> {
        let mut progress = ChunkProgress {
            total_chunks: rows.len().div_ceil(options.chunk_size),
            ..ChunkProgress::default()
        };

        for (index, chunk) in rows.chunks(options.chunk_size).enumerate() {
            if options.is_cancelled() {
                self.session.rollback().await?;
                warn!(label = %label, %progress, "Bulk load cancelled");
                return Err(GraphError::Cancelled {
                    label: label.to_string(),
                    progress,
                });
            }

            let chunk_started = Instant::now();
            let (sql, params) = build(chunk);
            let result = match self.session.execute(&sql, &params).await {
                Ok(_) => self.session.commit().await,
                Err(e) => Err(e),
            };
            if let Err(source) = result {
                error!(label = %label, chunk = index, %progress, error = %source, "Chunk failed");
                return Err(GraphError::ChunkFailed {
                    label: label.to_string(),
                    progress,
                    source: Box::new(source),
                });
            }

            progress.chunks_committed += 1;
            progress.rows_committed += chunk.len();
            progress.last_committed_chunk = Some(index);
            if progress.total_chunks > 1 {
                info!(
                    label = %label,
                    chunk = index + 1,
                    total_chunks = progress.total_chunks,
                    rows = chunk.len(),
                    elapsed_ms = chunk_started.elapsed().as_millis() as u64,
                    "Chunk committed"
                );
            }
        }
        Ok(progress)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{row, ScriptedSession};
    use agebridge_core::config::GraphSettings;
    use serde_json::json;

    fn graph(session: ScriptedSession) -> AgeGraph<ScriptedSession> {
        AgeGraph::new(session, GraphSettings::default())
    }

    fn customer() -> Label {
        Label::parse("Customer").unwrap()
    }

    fn payloads(ids: &[&str]) -> Vec<Payload> {
        ids.iter()
            .map(|id| json!({"id": id, "name": format!("n-{id}")}).as_object().cloned().unwrap())
            .collect()
    }

    fn id_rows(pairs: &[(&str, &str)]) -> Vec<crate::session::TextRow> {
        pairs.iter().map(|(i, b)| row(&[Some(i), Some(b)])).collect()
    }

    #[tokio::test]
    async fn fresh_label_statement_count() {
        let session = ScriptedSession::new()
            .respond("CREATE (n:Customer)", vec![row(&[Some("844424930131969")])])
            .respond(
                "->> 'id' FROM",
                id_rows(&[
                    ("844424930131969", "A"),
                    ("844424930131970", "B"),
                    ("844424930131971", "C"),
                    ("844424930131972", "D"),
                    ("844424930131973", "E"),
                ]),
            );
        let mut g = graph(session);
        let out = g
            .bulk_insert_nodes(&customer(), &payloads(&["A", "B", "C", "D", "E"]), &BulkOptions::new(2))
            .await
            .unwrap();

        assert!(out.bootstrapped);
        // 1 bootstrap + ceil(4 / 2) chunks
        assert_eq!(out.statements, 3);
        assert_eq!(out.inserted, 5);
        assert_eq!(out.id_map.len(), 5);
        assert_eq!(out.progress.last_committed_chunk, Some(1));
        assert_eq!(g.session().count("CREATE (n:Customer)"), 1);
        assert_eq!(g.session().count("INSERT INTO \"customer_graph\".\"Customer\" (properties)"), 2);
    }

    #[tokio::test]
    async fn existing_label_skips_bootstrap() {
        let session = ScriptedSession::new()
            .respond("ag_label l", vec![row(&[Some("Customer")])]);
        let mut g = graph(session);
        let out = g
            .bulk_insert_nodes(&customer(), &payloads(&["A", "B", "C"]), &BulkOptions::new(2))
            .await
            .unwrap();
        assert!(!out.bootstrapped);
        assert_eq!(out.statements, 2);
        assert_eq!(g.session().count("CREATE (n:"), 0);
    }

    #[tokio::test]
    async fn empty_batch_issues_nothing() {
        let mut g = graph(ScriptedSession::new());
        let out = g
            .bulk_insert_nodes(&customer(), &[], &BulkOptions::default())
            .await
            .unwrap();
        assert_eq!(out.statements, 0);
        assert!(g.session().statements.is_empty());
    }

    #[tokio::test]
    async fn chunk_size_is_validated_before_any_call() {
        let mut g = graph(ScriptedSession::new());
        for bad in [0, MAX_CHUNK_SIZE + 1] {
            let err = g
                .bulk_insert_nodes(&customer(), &payloads(&["A"]), &BulkOptions::new(bad))
                .await
                .unwrap_err();
            assert!(matches!(err, GraphError::InvalidInput(_)));
        }
        assert!(g.session().statements.is_empty());
    }

    #[tokio::test]
    async fn payloads_are_bound_not_interpolated() {
        let hostile = "x'); DROP TABLE users; --";
        let session = ScriptedSession::new().respond("ag_label l", vec![row(&[Some("Customer")])]);
        let mut g = graph(session);
        g.bulk_insert_nodes(&customer(), &payloads(&[hostile]), &BulkOptions::default())
            .await
            .unwrap();
        let insert = g.session().find("INSERT INTO").unwrap();
        assert!(!insert.sql.contains("DROP TABLE"));
        assert_eq!(insert.sql, "INSERT INTO \"customer_graph\".\"Customer\" (properties) VALUES ($1::ag_catalog.agtype)");
        assert_eq!(
            insert.params,
            vec![SqlParam::Agtype(json!({"payload": {"id": hostile, "name": format!("n-{hostile}")}}))]
        );
    }

    #[tokio::test]
    async fn duplicate_business_ids_map_to_latest_row() {
        let session = ScriptedSession::new()
            .respond("ag_label l", vec![row(&[Some("Customer")])])
            .respond(
                "->> 'id' FROM",
                vec![
                    row(&[Some("10"), Some("A")]),
                    row(&[Some("11"), Some("B")]),
                    row(&[Some("12"), Some("A")]),
                    row(&[Some("13"), None]),
                ],
            );
        let mut g = graph(session);
        let out = g
            .bulk_insert_nodes(&customer(), &payloads(&["A", "B", "A"]), &BulkOptions::default())
            .await
            .unwrap();
        assert_eq!(out.id_map.len(), 2);
        assert_eq!(out.id_map["A"], InternalId::new("12"));
        assert_eq!(out.duplicate_business_ids, 1);
        assert_eq!(out.missing_business_ids, 1);
    }

    #[tokio::test]
    async fn failed_chunk_reports_last_committed() {
        let session = ScriptedSession::new()
            .respond("ag_label l", vec![row(&[Some("Customer")])])
            .fail_on("INSERT INTO", 3);
        let mut g = graph(session);
        let err = g
            .bulk_insert_nodes(
                &customer(),
                &payloads(&["A", "B", "C", "D", "E", "F", "G"]),
                &BulkOptions::new(2),
            )
            .await
            .unwrap_err();

        match err {
            GraphError::ChunkFailed { progress, .. } => {
                assert_eq!(progress.total_chunks, 4);
                assert_eq!(progress.chunks_committed, 2);
                assert_eq!(progress.rows_committed, 4);
                assert_eq!(progress.last_committed_chunk, Some(1));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(g.session().count("INSERT INTO"), 3);
    }

    #[tokio::test]
    async fn cancellation_stops_between_chunks() {
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();
        let session = ScriptedSession::new().respond("ag_label l", vec![row(&[Some("Customer")])]);
        let mut g = graph(session);
        let err = g
            .bulk_insert_nodes(
                &customer(),
                &payloads(&["A", "B"]),
                &BulkOptions::new(1).with_cancel(rx),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GraphError::Cancelled { ref progress, .. } if progress.chunks_committed == 0));
        assert_eq!(g.session().count("INSERT INTO"), 0);
        // The label lookup must not leave the connection inside a transaction.
        assert!(!g.session().in_transaction());
        assert_eq!(g.session().commits + g.session().rollbacks, 1);
    }

    #[tokio::test]
    async fn edges_bootstrap_then_chunk() {
        let session = ScriptedSession::new()
            .respond("CREATE (s)-[e:OWNS]->(t)", vec![row(&[Some("1125899906842625")])]);
        let mut g = graph(session);
        let edges: Vec<ResolvedEdge> = (0..5)
            .map(|i| ResolvedEdge {
                start: InternalId::from(100 + i),
                end: InternalId::from(200 + i),
                payload: json!({"id": format!("e{i}")}).as_object().cloned().unwrap(),
            })
            .collect();
        let out = g
            .bulk_insert_edges(&Label::parse("OWNS").unwrap(), &edges, &BulkOptions::new(2))
            .await
            .unwrap();
        assert!(out.bootstrapped);
        assert_eq!(out.statements, 3);
        assert_eq!(out.inserted, 5);

        let boot = g.session().find("CREATE (s)-[e:OWNS]->(t)").unwrap();
        assert_eq!(
            boot.params,
            vec![SqlParam::Agtype(json!({"src": 100, "dst": 200, "payload": {"id": "e0"}}))]
        );
        let insert = g.session().find("INSERT INTO \"customer_graph\".\"OWNS\"").unwrap();
        assert!(insert.sql.contains("($1::ag_catalog.graphid, $2::ag_catalog.graphid, $3::ag_catalog.agtype), ($4::ag_catalog.graphid"));
        assert_eq!(insert.params.len(), 6);
        assert_eq!(insert.params[0], SqlParam::Graphid(InternalId::from(101)));
    }

    #[tokio::test]
    async fn edge_bootstrap_with_missing_endpoint_fails() {
        let mut g = graph(ScriptedSession::new());
        let edges = vec![ResolvedEdge {
            start: InternalId::from(1),
            end: InternalId::from(2),
            payload: Payload::new(),
        }];
        let err = g
            .bulk_insert_edges(&Label::parse("OWNS").unwrap(), &edges, &BulkOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, GraphError::EndpointsNotFound { .. }));
        assert_eq!(g.session().count("INSERT INTO"), 0);
    }
}
