//! Error types for the agebridge-load crate.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Failed to read bulk source {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed bulk source {path}: {detail}")]
    Source { path: String, detail: String },

    #[error(transparent)]
    InvalidIdentifier(#[from] agebridge_core::IdentifierError),

    #[error("Graph error: {0}")]
    Graph(#[from] agebridge_graph::GraphError),
}

pub type Result<T> = std::result::Result<T, LoadError>;
