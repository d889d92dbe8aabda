//! Integration tests for agebridge-graph against a live PostgreSQL + AGE.
//!
//! Connection settings come from `agebridge.toml` and the `PG*` variables.
//! Run with: cargo test --package agebridge-graph --test integration -- --ignored
//!
//! Skipped automatically if the database is not available. Each test works
//! in its own throwaway graph.

use agebridge_core::config::{AppConfig, GraphSettings};
use agebridge_core::{GraphName, InternalId, Label, Payload};
use agebridge_graph::{
    AgeGraph, BootstrapMode, BootstrapOutcome, BulkOptions, GraphClient, GraphError, PgSession,
    ResolvedEdge,
};
use serde_json::json;

async fn connect_or_skip() -> Option<AgeGraph<PgSession>> {
    let config = match AppConfig::load("agebridge") {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Skipping integration test (bad configuration): {e}");
            return None;
        }
    };
    let settings = GraphSettings {
        name: GraphName::parse(&format!("it_{}", uuid::Uuid::new_v4().simple())).ok()?,
        allow_raw_queries: true,
        ..config.graph.clone()
    };
    let client = match GraphClient::connect(&config.database, &settings).await {
        Ok(client) => client,
        Err(e) => {
            eprintln!("Skipping integration test (PostgreSQL not available): {e}");
            return None;
        }
    };
    let mut graph = client.graph().await.ok()?;
    if let Err(e) = graph.ensure_ready().await {
        eprintln!("Skipping integration test (AGE not available): {e}");
        return None;
    }
    graph.create_graph(BootstrapMode::EnsureExists).await.ok()?;
    Some(graph)
}

async fn cleanup(graph: &mut AgeGraph<PgSession>) {
    let _ = graph.drop_graph().await;
}

fn payload(v: serde_json::Value) -> Payload {
    v.as_object().cloned().unwrap()
}

#[tokio::test]
#[ignore = "requires live PostgreSQL with Apache AGE"]
async fn test_insert_and_find_node() {
    let Some(mut g) = connect_or_skip().await else { return };

    let created = g
        .insert_node("Customer", &payload(json!({"id": "C-1", "name": "Acme"})))
        .await
        .unwrap();
    assert_eq!(created.labels, vec!["Customer"]);

    let found = g.find_node(created.id.as_str()).await.unwrap().unwrap();
    assert_eq!(found.business_id().as_deref(), Some("C-1"));
    assert_eq!(found.properties["name"], json!("Acme"));

    assert!(g.find_node("1").await.unwrap().is_none());
    cleanup(&mut g).await;
}

#[tokio::test]
#[ignore = "requires live PostgreSQL with Apache AGE"]
async fn test_edge_by_business_ids() {
    let Some(mut g) = connect_or_skip().await else { return };

    g.insert_node("Customer", &payload(json!({"id": "C-1"}))).await.unwrap();
    g.insert_node("Contract", &payload(json!({"id": "K-1"}))).await.unwrap();

    let edge = g
        .create_edge_by_business_ids("Customer", "Contract", "HAS", "C-1", "K-1", &payload(json!({"since": 2020})))
        .await
        .unwrap();
    assert_eq!(edge.label, "HAS");

    let err = g
        .create_edge_by_business_ids("Customer", "Contract", "HAS", "C-1", "K-404", &Payload::new())
        .await
        .unwrap_err();
    assert!(matches!(err, GraphError::EndpointsNotFound { .. }));

    // Seen from either end the same edge connects the same pair.
    let out = g
        .query_out_by_types(Some("Customer"), Some("HAS"), Some("Contract"), Some("C-1"), true, None)
        .await
        .unwrap();
    let inbound = g
        .query_in_by_types(Some("Contract"), Some("HAS"), Some("Customer"), Some("K-1"), true, None)
        .await
        .unwrap();
    assert_eq!(out.len(), 1);
    assert_eq!(inbound.len(), 1);
    assert_eq!(out[0].node.business_id().as_deref(), Some("K-1"));
    assert_eq!(inbound[0].node.business_id().as_deref(), Some("C-1"));
    assert_eq!(out[0].edge.as_ref().unwrap().id, inbound[0].edge.as_ref().unwrap().id);

    cleanup(&mut g).await;
}

#[tokio::test]
#[ignore = "requires live PostgreSQL with Apache AGE"]
async fn test_bulk_load_and_browse() {
    let Some(mut g) = connect_or_skip().await else { return };
    let customer = Label::parse("Customer").unwrap();
    let owns = Label::parse("OWNS").unwrap();

    let nodes: Vec<Payload> = (0..5).map(|i| payload(json!({"id": format!("C-{i}")}))).collect();
    let outcome = g
        .bulk_insert_nodes(&customer, &nodes, &BulkOptions::new(2))
        .await
        .unwrap();
    assert_eq!(outcome.statements, 3);
    assert_eq!(outcome.id_map.len(), 5);

    let edges: Vec<ResolvedEdge> = (0..4)
        .map(|i| ResolvedEdge {
            start: outcome.id_map[&format!("C-{i}")].clone(),
            end: outcome.id_map[&format!("C-{}", i + 1)].clone(),
            payload: payload(json!({"seq": i})),
        })
        .collect();
    let edge_outcome = g
        .bulk_insert_edges(&owns, &edges, &BulkOptions::new(2))
        .await
        .unwrap();
    assert_eq!(edge_outcome.inserted, 4);

    g.create_business_id_index(&customer).await.unwrap();

    let listed = g.list_nodes_and_edges(10).await.unwrap();
    assert_eq!(listed.len(), 5);
    assert!(listed.iter().all(|n| n.edges.len() <= 3));

    let first: &InternalId = &outcome.id_map["C-0"];
    let with_edges = g.find_node_with_edges(first.as_str()).await.unwrap().unwrap();
    assert_eq!(with_edges.edges.len(), 1);

    cleanup(&mut g).await;
}

#[tokio::test]
#[ignore = "requires live PostgreSQL with Apache AGE"]
async fn test_recreate_twice_is_empty() {
    let Some(mut g) = connect_or_skip().await else { return };

    g.insert_node("Customer", &payload(json!({"id": "C-1"}))).await.unwrap();
    assert_eq!(g.create_graph(BootstrapMode::Recreate).await.unwrap(), BootstrapOutcome::Recreated);
    assert_eq!(g.create_graph(BootstrapMode::Recreate).await.unwrap(), BootstrapOutcome::Recreated);
    assert!(g.list_nodes_and_edges(10).await.unwrap().is_empty());

    cleanup(&mut g).await;
}

#[tokio::test]
#[ignore = "requires live PostgreSQL with Apache AGE"]
async fn test_raw_query_and_health() {
    let Some(mut g) = connect_or_skip().await else { return };
    assert!(g.health_check().await);

    g.insert_node("Customer", &payload(json!({"id": "C-1"}))).await.unwrap();
    let sql = format!(
        "SELECT * FROM cypher('{}', $$ MATCH (n:Customer) RETURN n.payload $$) AS (p agtype);",
        g.name()
    );
    let rows = g.query_using_sql_cypher(&sql).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["p"]["id"], json!("C-1"));

    cleanup(&mut g).await;
}

#[tokio::test]
#[ignore = "requires live PostgreSQL with Apache AGE"]
async fn test_numeric_business_ids_and_hub_browse() {
    let Some(mut g) = connect_or_skip().await else { return };

    let hub = g.insert_node("Customer", &payload(json!({"id": 7}))).await.unwrap();
    for i in 0..6 {
        g.insert_node("Contract", &payload(json!({"id": format!("K-{i}")}))).await.unwrap();
        g.create_edge_by_business_ids("Customer", "Contract", "HAS", "7", &format!("K-{i}"), &Payload::new())
            .await
            .unwrap();
    }

    let listed = g.list_nodes_and_edges(10).await.unwrap();
    let hub_entry = listed.iter().find(|n| n.node.id == hub.id).unwrap();
    assert_eq!(hub_entry.edges.len(), 3);
    assert!(hub_entry.edges.windows(2).all(|w| w[0].id.as_graphid() < w[1].id.as_graphid()));
    assert_eq!(hub_entry.edges[0].label, "HAS");

    let all = g.find_node_with_edges(hub.id.as_str()).await.unwrap().unwrap();
    assert_eq!(all.edges.len(), 6);

    let sql = format!(
        "SELECT * FROM cypher('{}', $$ MATCH (n:Contract) RETURN count(n) $$) AS (c agtype)",
        g.name()
    );
    let rows = g.query_using_sql_cypher(&sql).await.unwrap();
    assert_eq!(rows[0]["c"], json!(6));

    cleanup(&mut g).await;
}
