//! agebridge-graph: PostgreSQL + Apache AGE client for the property graph.
//!
//! This crate is the single access point for the graph store. Labels reach
//! statement text only as validated identifiers; values always travel as
//! bound parameters. Bulk loaders bypass the Cypher interpreter and write the
//! label tables directly; interactive operations and traversals go through
//! `ag_catalog.cypher(...)`.

pub mod agtype;
pub mod bootstrap;
pub mod bulk;
pub mod client;
pub mod cypher;
pub mod error;
pub mod mutations;
pub mod queries;
pub mod session;
pub mod traversal;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use bootstrap::{BootstrapMode, BootstrapOutcome};
pub use bulk::{BulkOptions, ChunkProgress, EdgeLoadOutcome, NodeLoadOutcome, ResolvedEdge};
pub use client::{AgeGraph, GraphClient};
pub use error::{ErrorKind, GraphError, Result};
pub use queries::{BrowseRow, EdgeView, NodeView, NodeWithEdges};
pub use session::{GraphSession, PgSession, SqlParam, TextRow};
pub use traversal::{Direction, TraversalQuery, TraversalRow};
