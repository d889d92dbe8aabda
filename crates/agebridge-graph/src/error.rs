//! Error type shared by every graph operation.

use agebridge_core::IdentifierError;

use crate::bulk::ChunkProgress;

pub type Result<T> = std::result::Result<T, GraphError>;

/// Errors from graph operations.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error(transparent)]
    InvalidIdentifier(#[from] IdentifierError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error(
        "Apache AGE extension is not installed in this database; \
         run `CREATE EXTENSION age;` as a superuser or set graph.install_extension"
    )]
    ExtensionMissing,

    #[error("No edge created: source {src_id:?} or target {dst_id:?} not found")]
    EndpointsNotFound { src_id: String, dst_id: String },

    #[error("PostgreSQL connection error: {0}")]
    Connection(String),

    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("PostgreSQL query error: {0}")]
    Query(#[from] tokio_postgres::Error),

    #[error("Failed to decode result: {0}")]
    Decode(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Bulk load of {label} failed with {progress}: {source}")]
    ChunkFailed {
        label: String,
        progress: ChunkProgress,
        #[source]
        source: Box<GraphError>,
    },

    #[error("Bulk load of {label} cancelled with {progress}")]
    Cancelled {
        label: String,
        progress: ChunkProgress,
    },

    #[error("Free-form queries are disabled; set graph.allow_raw_queries to enable them")]
    RawQueriesDisabled,
}

/// Coarse failure class, for callers that map errors onto a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller input was rejected before reaching the store.
    Validation,
    /// The store or configuration is not in a usable state.
    Precondition,
    /// A referenced entity does not exist.
    NotFound,
    /// A statement or the connection failed.
    Execution,
}

impl GraphError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidIdentifier(_) | Self::InvalidInput(_) => ErrorKind::Validation,
            Self::ExtensionMissing | Self::RawQueriesDisabled => ErrorKind::Precondition,
            Self::EndpointsNotFound { .. } => ErrorKind::NotFound,
            Self::ChunkFailed { source, .. } => source.kind(),
            Self::Connection(_)
            | Self::Pool(_)
            | Self::Query(_)
            | Self::Decode(_)
            | Self::Serialization(_)
            | Self::Cancelled { .. } => ErrorKind::Execution,
        }
    }

    /// Whether repeating the call (or resuming a bulk load) may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Cancelled { .. } | Self::Decode(_) | Self::Serialization(_) => false,
            other => other.kind() == ErrorKind::Execution,
        }
    }

    /// Progress recorded before a bulk load stopped, if this error came from one.
    pub fn progress(&self) -> Option<&ChunkProgress> {
        match self {
            Self::ChunkFailed { progress, .. } | Self::Cancelled { progress, .. } => Some(progress),
            _ => None,
        }
    }
}
