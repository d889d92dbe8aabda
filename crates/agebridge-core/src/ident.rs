//! Structural identifiers: node labels, relationship types, graph names.
//!
//! Cypher cannot bind a label as a parameter, so labels are spliced into
//! statement text. These newtypes are the only way to get a string into that
//! position; constructing one checks the `[A-Za-z_][A-Za-z0-9_]*` grammar.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A candidate identifier failed the grammar check.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentifierError {
    #[error("Invalid {kind}: {value:?} (expected [A-Za-z_][A-Za-z0-9_]*)")]
    Malformed { kind: &'static str, value: String },

    #[error("Missing {kind}")]
    Missing { kind: &'static str },
}

/// Check a string against the identifier grammar of the Cypher sublanguage.
pub fn is_valid_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn check(kind: &'static str, s: &str) -> Result<(), IdentifierError> {
    if s.is_empty() {
        return Err(IdentifierError::Missing { kind });
    }
    if !is_valid_identifier(s) {
        return Err(IdentifierError::Malformed {
            kind,
            value: s.to_string(),
        });
    }
    Ok(())
}

/// A validated node label or relationship type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Label(String);

impl Label {
    pub fn parse(s: &str) -> Result<Self, IdentifierError> {
        check("label", s)?;
        Ok(Self(s.to_string()))
    }

    /// Validate a label that must be present.
    pub fn require(s: Option<&str>) -> Result<Self, IdentifierError> {
        match s {
            Some(s) => Self::parse(s),
            None => Err(IdentifierError::Missing { kind: "label" }),
        }
    }

    /// Validate an optional label filter; `None` stays `None` (match any).
    pub fn parse_opt(s: Option<&str>) -> Result<Option<Self>, IdentifierError> {
        s.map(Self::parse).transpose()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Label {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Label::parse(&raw).map_err(serde::de::Error::custom)
    }
}

impl TryFrom<&str> for Label {
    type Error = IdentifierError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Self::parse(s)
    }
}

/// A validated graph namespace name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct GraphName(String);

impl GraphName {
    pub fn parse(s: &str) -> Result<Self, IdentifierError> {
        check("graph name", s)?;
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for GraphName {
    fn default() -> Self {
        Self("customer_graph".to_string())
    }
}

impl fmt::Display for GraphName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for GraphName {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        GraphName::parse(&raw).map_err(serde::de::Error::custom)
    }
}
