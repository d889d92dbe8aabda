//! agebridge-core: Shared types, configuration, and error handling for agebridge.
//!
//! This crate provides the foundational types used across all agebridge components:
//! - Payloads and the business-id accessor shared by both bulk loaders
//! - Validated structural identifiers (labels, graph names)
//! - Node and edge records of the bulk source format
//! - Configuration management
//! - Common error types

pub mod config;
pub mod error;
pub mod ident;
pub mod types;

pub use error::CoreError;
pub use ident::{GraphName, IdentifierError, Label};
pub use types::{business_id, EdgeRecord, IdMap, InternalId, NodeRecord, Payload};
