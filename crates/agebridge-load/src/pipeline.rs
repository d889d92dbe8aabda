//! Two-phase load: every node label first, then edges resolved through the
//! id-map of each endpoint's label.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use agebridge_core::{IdMap, InternalId, Label, Payload};
use agebridge_graph::{
    AgeGraph, BootstrapMode, BootstrapOutcome, BulkOptions, ChunkProgress, GraphSession,
    ResolvedEdge,
};

use crate::error::Result;
use crate::source::BulkSource;

/// What a run should do besides loading.
#[derive(Debug, Clone, Default)]
pub struct LoadPlan {
    pub mode: BootstrapMode,
    pub options: BulkOptions,
    pub index_business_ids: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Node,
    Edge,
}

/// Per-label result line of a run.
#[derive(Debug, Clone, Serialize)]
pub struct LabelReport {
    pub label: Label,
    pub kind: EntityKind,
    pub inserted: usize,
    pub statements: usize,
    pub bootstrapped: bool,
    pub progress: ChunkProgress,
}

/// Summary of one load run.
#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    pub run_id: Uuid,
    pub graph: String,
    pub bootstrap: BootstrapOutcome,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub nodes_inserted: usize,
    pub edges_inserted: usize,
    /// Edges whose `src` or `dst` is not the id of any node record.
    pub skipped_unknown_endpoint: usize,
    /// Edges whose endpoints are node records but did not resolve to a
    /// stored vertex.
    pub skipped_unresolved: usize,
    pub duplicate_business_ids: usize,
    pub labels: Vec<LabelReport>,
}

/// Node payloads grouped by validated label, in label order.
fn group_nodes(source: &BulkSource) -> Result<BTreeMap<Label, Vec<Payload>>> {
    let mut grouped: BTreeMap<Label, Vec<Payload>> = BTreeMap::new();
    for record in &source.nodes {
        let label = Label::parse(&record.label)?;
        grouped.entry(label).or_default().push(record.payload());
    }
    Ok(grouped)
}

/// Label of every node record, keyed by record id. A record id repeated
/// under another label keeps the later record's label.
fn node_labels(source: &BulkSource) -> Result<HashMap<&str, Label>> {
    let mut labels = HashMap::with_capacity(source.nodes.len());
    for record in &source.nodes {
        labels.insert(record.id.as_str(), Label::parse(&record.label)?);
    }
    Ok(labels)
}

/// Validate every edge label up front so a bad file fails before any write.
fn edge_labels(source: &BulkSource) -> Result<Vec<Label>> {
    source
        .edges
        .iter()
        .map(|e| Label::parse(&e.label).map_err(Into::into))
        .collect()
}

/// `None` when no node record has this id; `Some(None)` when the record
/// exists but its label's id-map has no vertex for it.
fn endpoint<'a>(
    id: &str,
    node_labels: &HashMap<&str, Label>,
    id_maps: &'a HashMap<Label, IdMap>,
) -> Option<Option<&'a InternalId>> {
    let label = node_labels.get(id)?;
    Some(id_maps.get(label).and_then(|m| m.get(id)))
}

/// Resolve edges against the per-label id-maps, counting what is skipped.
///
/// Business ids are only unique within a label, so each endpoint is looked
/// up in the map of the label its node record carries.
fn resolve_edges(
    source: &BulkSource,
    labels: Vec<Label>,
    node_labels: &HashMap<&str, Label>,
    id_maps: &HashMap<Label, IdMap>,
) -> (BTreeMap<Label, Vec<ResolvedEdge>>, usize, usize) {
    let mut grouped: BTreeMap<Label, Vec<ResolvedEdge>> = BTreeMap::new();
    let mut unknown = 0;
    let mut unresolved = 0;

    for (record, label) in source.edges.iter().zip(labels) {
        let (Some(start), Some(end)) = (
            endpoint(&record.src, node_labels, id_maps),
            endpoint(&record.dst, node_labels, id_maps),
        ) else {
            unknown += 1;
            continue;
        };
        let (Some(start), Some(end)) = (start, end) else {
            unresolved += 1;
            continue;
        };
        grouped.entry(label).or_default().push(ResolvedEdge {
            start: start.clone(),
            end: end.clone(),
            payload: record.properties.clone(),
        });
    }
    (grouped, unknown, unresolved)
}

/// Run a full load into `graph`.
pub async fn run_load<S: GraphSession>(
    graph: &mut AgeGraph<S>,
    source: &BulkSource,
    plan: &LoadPlan,
) -> Result<LoadReport> {
    let started_at = Utc::now();
    let run_id = Uuid::new_v4();

    // Phase 0: validate, then prepare the store.
    plan.options.validate()?;
    let nodes = group_nodes(source)?;
    let record_labels = node_labels(source)?;
    let labels = edge_labels(source)?;

    tracing::info!(%run_id, graph = %graph.name(), node_labels = nodes.len(), "Load started");
    graph.ensure_ready().await?;
    let bootstrap = graph.create_graph(plan.mode).await?;

    let mut report = LoadReport {
        run_id,
        graph: graph.name().to_string(),
        bootstrap,
        started_at,
        finished_at: started_at,
        nodes_inserted: 0,
        edges_inserted: 0,
        skipped_unknown_endpoint: 0,
        skipped_unresolved: 0,
        duplicate_business_ids: 0,
        labels: Vec::new(),
    };

    // Phase 1: nodes.
    let mut id_maps: HashMap<Label, IdMap> = HashMap::new();
    for (label, payloads) in &nodes {
        let outcome = graph.bulk_insert_nodes(label, payloads, &plan.options).await?;
        if plan.index_business_ids {
            graph.create_business_id_index(label).await?;
        }
        report.nodes_inserted += outcome.inserted;
        report.duplicate_business_ids += outcome.duplicate_business_ids;
        report.labels.push(LabelReport {
            label: label.clone(),
            kind: EntityKind::Node,
            inserted: outcome.inserted,
            statements: outcome.statements,
            bootstrapped: outcome.bootstrapped,
            progress: outcome.progress,
        });
        id_maps.insert(label.clone(), outcome.id_map);
    }
    let mapped: usize = id_maps.values().map(HashMap::len).sum();
    tracing::info!(%run_id, mapped, "Vertex id maps built");

    // Phase 2: edges.
    let (edges, unknown, unresolved) = resolve_edges(source, labels, &record_labels, &id_maps);
    report.skipped_unknown_endpoint = unknown;
    report.skipped_unresolved = unresolved;
    if unknown + unresolved > 0 {
        tracing::warn!(%run_id, unknown_endpoint = unknown, unresolved, "Edges skipped");
    }

    for (label, rows) in &edges {
        let outcome = graph.bulk_insert_edges(label, rows, &plan.options).await?;
        report.edges_inserted += outcome.inserted;
        report.labels.push(LabelReport {
            label: label.clone(),
            kind: EntityKind::Edge,
            inserted: outcome.inserted,
            statements: outcome.statements,
            bootstrapped: outcome.bootstrapped,
            progress: outcome.progress,
        });
    }

    report.finished_at = Utc::now();
    tracing::info!(
        %run_id,
        nodes = report.nodes_inserted,
        edges = report.edges_inserted,
        elapsed_ms = (report.finished_at - report.started_at).num_milliseconds(),
        "Load complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use agebridge_core::config::GraphSettings;
    use agebridge_graph::testing::{row, ScriptedSession};
    use agebridge_graph::{GraphError, SqlParam};

    use crate::error::LoadError;

    fn source() -> BulkSource {
        BulkSource::from_json(
            r#"[
                {"id": "c1", "label": "Customer", "properties": {"name": "Acme"}},
                {"id": "c2", "label": "Customer", "properties": {}},
                {"id": "k1", "label": "Contract", "properties": {}},
                {"id": "k2", "label": "Contract", "properties": {}}
            ]"#,
            r#"[
                {"id": "e1", "label": "HAS", "src": "c1", "dst": "k1"},
                {"id": "e2", "label": "HAS", "src": "c2", "dst": "k2"},
                {"id": "e3", "label": "HAS", "src": "c1", "dst": "ghost"},
                {"id": "e4", "label": "HAS", "src": "c2", "dst": "k1"}
            ]"#,
        )
        .unwrap()
    }

    fn scripted() -> ScriptedSession {
        ScriptedSession::new()
            .respond("pg_extension", vec![row(&[Some("age")])])
            .respond("CREATE (n:", vec![row(&[Some("1")])])
            .respond("CREATE (s)-[e:", vec![row(&[Some("9")])])
            .respond(
                "FROM \"customer_graph\".\"Contract\" ORDER BY id",
                vec![row(&[Some("20"), Some("k1")])],
            )
            .respond(
                "FROM \"customer_graph\".\"Customer\" ORDER BY id",
                vec![row(&[Some("10"), Some("c1")]), row(&[Some("11"), Some("c2")])],
            )
    }

    #[tokio::test]
    async fn skips_are_counted_and_rest_is_loaded() {
        let mut g = AgeGraph::new(scripted(), GraphSettings::default());
        let report = run_load(&mut g, &source(), &LoadPlan::default()).await.unwrap();

        assert_eq!(report.nodes_inserted, 4);
        // e3 references no node record; e2 references k2, which the store
        // did not return.
        assert_eq!(report.skipped_unknown_endpoint, 1);
        assert_eq!(report.skipped_unresolved, 1);
        assert_eq!(report.edges_inserted, 2);
        assert_eq!(report.bootstrap, BootstrapOutcome::Created);

        let labels: Vec<(&str, EntityKind)> = report
            .labels
            .iter()
            .map(|l| (l.label.as_str(), l.kind))
            .collect();
        assert_eq!(
            labels,
            vec![
                ("Contract", EntityKind::Node),
                ("Customer", EntityKind::Node),
                ("HAS", EntityKind::Edge),
            ]
        );
    }

    #[tokio::test]
    async fn business_id_shared_across_labels_resolves_per_label() {
        let source = BulkSource::from_json(
            r#"[
                {"id": "c1", "label": "Customer", "properties": {}},
                {"id": "p1", "label": "Product", "properties": {}}
            ]"#,
            r#"[{"id": "e1", "label": "BOUGHT", "src": "c1", "dst": "p1"}]"#,
        )
        .unwrap();
        // The Product table already holds a vertex whose business id is "c1".
        let session = ScriptedSession::new()
            .respond("pg_extension", vec![row(&[Some("age")])])
            .respond("CREATE (n:", vec![row(&[Some("1")])])
            .respond("CREATE (s)-[e:", vec![row(&[Some("9")])])
            .respond(
                "FROM \"customer_graph\".\"Customer\" ORDER BY id",
                vec![row(&[Some("10"), Some("c1")])],
            )
            .respond(
                "FROM \"customer_graph\".\"Product\" ORDER BY id",
                vec![row(&[Some("30"), Some("p1")]), row(&[Some("31"), Some("c1")])],
            );
        let mut g = AgeGraph::new(session, GraphSettings::default());
        let report = run_load(&mut g, &source, &LoadPlan::default()).await.unwrap();

        assert_eq!(report.edges_inserted, 1);
        assert_eq!(report.skipped_unresolved, 0);
        let edge = g.session().find("CREATE (s)-[e:BOUGHT]").unwrap();
        match &edge.params[0] {
            SqlParam::Agtype(params) => {
                assert_eq!(params["src"], 10);
                assert_eq!(params["dst"], 30);
            }
            other => panic!("unexpected param {other:?}"),
        }
    }

    #[tokio::test]
    async fn no_edge_statement_before_all_nodes_are_mapped() {
        let mut g = AgeGraph::new(scripted(), GraphSettings::default());
        run_load(&mut g, &source(), &LoadPlan::default()).await.unwrap();

        let statements = &g.session().statements;
        let last_id_map = statements
            .iter()
            .rposition(|s| s.sql.contains("->> 'id' FROM"))
            .unwrap();
        let first_edge = statements
            .iter()
            .position(|s| s.sql.contains("CREATE (s)-[e:") || s.sql.contains("(start_id, end_id"))
            .unwrap();
        assert!(last_id_map < first_edge);
    }

    #[tokio::test]
    async fn business_id_indexes_follow_the_plan() {
        let mut g = AgeGraph::new(scripted(), GraphSettings::default());
        let plan = LoadPlan {
            index_business_ids: true,
            ..LoadPlan::default()
        };
        run_load(&mut g, &source(), &plan).await.unwrap();
        assert_eq!(g.session().count("CREATE INDEX IF NOT EXISTS"), 2);
    }

    #[tokio::test]
    async fn bad_label_fails_before_any_statement() {
        let bad = BulkSource::from_json(
            r#"[{"id": "c1", "label": "Customer"}]"#,
            r#"[{"id": "e1", "label": "HAS-A", "src": "c1", "dst": "c1"}]"#,
        )
        .unwrap();
        let mut g = AgeGraph::new(scripted(), GraphSettings::default());
        let err = run_load(&mut g, &bad, &LoadPlan::default()).await.unwrap_err();
        assert!(matches!(err, LoadError::InvalidIdentifier(_)));
        assert!(g.session().statements.is_empty());
    }

    #[tokio::test]
    async fn missing_extension_stops_the_run() {
        let mut g = AgeGraph::new(ScriptedSession::new(), GraphSettings::default());
        let err = run_load(&mut g, &source(), &LoadPlan::default()).await.unwrap_err();
        assert!(matches!(err, LoadError::Graph(GraphError::ExtensionMissing)));
        assert_eq!(g.session().count("INSERT INTO"), 0);
    }
}
