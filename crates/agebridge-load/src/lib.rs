//! agebridge-load: bulk loading and command-line access for the property graph.
//!
//! Reads a node file and an edge file, loads every node label, resolves edge
//! endpoints through the resulting id-map, then loads every edge label.

pub mod error;
pub mod pipeline;
pub mod source;
