use thiserror::Error;

use crate::ident::IdentifierError;

/// Top-level error type for agebridge shared components.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    InvalidIdentifier(#[from] IdentifierError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<config::ConfigError> for CoreError {
    fn from(e: config::ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}
