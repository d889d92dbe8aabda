//! CLI entry point for agebridge.

use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::sync::watch;
use tracing_subscriber::{fmt, EnvFilter};

use agebridge_core::config::AppConfig;
use agebridge_core::Payload;
use agebridge_graph::{BootstrapMode, BulkOptions, Direction, GraphClient, TraversalQuery};

use agebridge_load::pipeline::{run_load, LoadPlan};
use agebridge_load::source::BulkSource;

#[derive(Parser)]
#[command(name = "agebridge")]
#[command(about = "Bulk loader and query tool for a PostgreSQL + Apache AGE property graph")]
struct Cli {
    /// Config file prefix (default: agebridge).
    #[arg(short, long, default_value = "agebridge", global = true)]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load node and edge files into the graph.
    Load {
        /// Node file (overrides load.nodes_file).
        #[arg(long)]
        nodes: Option<String>,

        /// Edge file (overrides load.edges_file).
        #[arg(long)]
        edges: Option<String>,

        /// Drop and recreate the graph first.
        #[arg(long)]
        recreate: bool,

        /// Rows per committed chunk (overrides load.chunk_size).
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Skip business-id index creation.
        #[arg(long)]
        no_index: bool,
    },

    /// Ensure the extension and graph exist.
    Bootstrap {
        #[arg(long)]
        recreate: bool,
    },

    /// Create one node.
    InsertNode {
        #[arg(long)]
        label: String,

        /// Payload as a JSON object.
        #[arg(long)]
        payload: String,
    },

    /// Create an edge between two nodes identified by business id.
    CreateEdge {
        #[arg(long)]
        src_label: String,
        #[arg(long)]
        dst_label: String,
        #[arg(long)]
        edge_label: String,
        #[arg(long)]
        src_id: String,
        #[arg(long)]
        dst_id: String,
        #[arg(long, default_value = "{}")]
        payload: String,
    },

    /// Look up a node by internal id.
    Find {
        id: String,

        /// Include all outgoing edges.
        #[arg(long)]
        with_edges: bool,
    },

    /// Browse nodes with a few outgoing edges each.
    List {
        #[arg(long, default_value_t = 25)]
        limit: usize,

        /// Print flat node/edge rows instead of nested objects.
        #[arg(long)]
        flat: bool,
    },

    /// One-hop typed traversal.
    Traverse {
        /// out, in or both.
        #[arg(long, default_value = "out")]
        direction: String,
        #[arg(long)]
        src_label: Option<String>,
        #[arg(long)]
        edge_label: Option<String>,
        #[arg(long)]
        dst_label: Option<String>,
        #[arg(long)]
        src_id: Option<String>,
        #[arg(long)]
        dst_id: Option<String>,
        #[arg(long)]
        return_edges: bool,
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Run SQL with embedded cypher() calls (requires graph.allow_raw_queries).
    Query { sql: String },

    /// Check that the database answers.
    Health,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).json().init();

    let cli = Cli::parse();
    let config = AppConfig::load(&cli.config)?;

    let client = GraphClient::connect(&config.database, &config.graph).await?;
    let mut graph = client.graph().await?;

    match cli.command {
        Command::Load {
            nodes,
            edges,
            recreate,
            chunk_size,
            no_index,
        } => {
            let nodes_file = nodes.unwrap_or_else(|| config.load.nodes_file.clone());
            let edges_file = edges.unwrap_or_else(|| config.load.edges_file.clone());
            let source = BulkSource::read(&nodes_file, &edges_file)?;

            let (cancel_tx, cancel_rx) = watch::channel(false);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("Interrupt received, stopping after the current chunk");
                    let _ = cancel_tx.send(true);
                }
            });

            let plan = LoadPlan {
                mode: bootstrap_mode(recreate || config.load.recreate),
                options: BulkOptions::new(chunk_size.unwrap_or(config.load.chunk_size))
                    .with_cancel(cancel_rx),
                index_business_ids: config.load.index_business_ids && !no_index,
            };
            let report = run_load(&mut graph, &source, &plan).await?;
            print_json(&report)?;
        }
        Command::Bootstrap { recreate } => {
            graph.ensure_ready().await?;
            let outcome = graph.create_graph(bootstrap_mode(recreate)).await?;
            print_json(&outcome)?;
        }
        Command::InsertNode { label, payload } => {
            let payload = parse_payload(&payload)?;
            print_json(&graph.insert_node(&label, &payload).await?)?;
        }
        Command::CreateEdge {
            src_label,
            dst_label,
            edge_label,
            src_id,
            dst_id,
            payload,
        } => {
            let payload = parse_payload(&payload)?;
            let edge = graph
                .create_edge_by_business_ids(&src_label, &dst_label, &edge_label, &src_id, &dst_id, &payload)
                .await?;
            print_json(&edge)?;
        }
        Command::Find { id, with_edges } => {
            if with_edges {
                print_json(&graph.find_node_with_edges(&id).await?)?;
            } else {
                print_json(&graph.find_node(&id).await?)?;
            }
        }
        Command::List { limit, flat } => {
            let listed = graph.list_nodes_and_edges(limit).await?;
            if flat {
                let rows: Vec<_> = listed.iter().flat_map(|n| n.flatten()).collect();
                print_json(&rows)?;
            } else {
                print_json(&listed)?;
            }
        }
        Command::Traverse {
            direction,
            src_label,
            edge_label,
            dst_label,
            src_id,
            dst_id,
            return_edges,
            limit,
        } => {
            let direction: Direction = direction.parse()?;
            let mut query = TraversalQuery::from_labels(
                direction,
                src_label.as_deref(),
                edge_label.as_deref(),
                dst_label.as_deref(),
            )?
            .return_edges(return_edges);
            query.src_id = src_id;
            query.dst_id = dst_id;
            query.limit = limit;
            print_json(&graph.query_by_types(&query).await?)?;
        }
        Command::Query { sql } => {
            print_json(&graph.query_using_sql_cypher(&sql).await?)?;
        }
        Command::Health => {
            let healthy = graph.health_check().await;
            print_json(&serde_json::json!({ "healthy": healthy }))?;
            if !healthy {
                anyhow::bail!("Health check failed");
            }
        }
    }

    Ok(())
}

fn bootstrap_mode(recreate: bool) -> BootstrapMode {
    if recreate {
        BootstrapMode::Recreate
    } else {
        BootstrapMode::EnsureExists
    }
}

fn parse_payload(raw: &str) -> anyhow::Result<Payload> {
    match serde_json::from_str(raw)? {
        serde_json::Value::Object(map) => Ok(map),
        _ => anyhow::bail!("Payload must be a JSON object"),
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
