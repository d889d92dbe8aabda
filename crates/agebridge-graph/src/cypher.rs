//! Statement text assembly.
//!
//! Only validated identifiers ([`Label`], [`GraphName`]) are ever spliced into
//! SQL or Cypher text. Everything else is carried by the single `agtype`
//! parameter map bound as `$1`.

use serde_json::{Map, Value};

use agebridge_core::{GraphName, Label};

use crate::error::{GraphError, Result};
use crate::session::SqlParam;

/// Fully qualified agtype, independent of the session search path.
pub const AGTYPE: &str = "ag_catalog.agtype";

const DOLLAR_TAG: &str = "$cypher$";

/// Double-quote an identifier for SQL.
pub fn quote_ident(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// Single-quote a string literal for SQL.
pub fn quote_literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// `"graph"."Label"`: the backing table of a label.
pub fn label_table(graph: &GraphName, label: &Label) -> String {
    format!("{}.{}", quote_ident(graph.as_str()), quote_ident(label.as_str()))
}

/// `:Label`, or nothing when the label filter is absent.
pub fn label_filter(label: Option<&Label>) -> String {
    label.map(|l| format!(":{l}")).unwrap_or_default()
}

/// Cypher predicate comparing the business id of `var` with the string
/// parameter `param`. Numeric and boolean ids compare by their text form,
/// so `{"id": 7}` matches `"7"`.
pub fn business_id_match(var: &str, param: &str) -> String {
    format!("toString({var}.payload.id) = ${param}")
}

/// A Cypher statement plus its named parameters, ready to be wrapped in
/// `ag_catalog.cypher(...)`.
#[derive(Debug, Clone, PartialEq)]
pub struct CypherStatement {
    text: String,
    columns: Vec<&'static str>,
    params: Map<String, Value>,
}

impl CypherStatement {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            columns: Vec::new(),
            params: Map::new(),
        }
    }

    /// Names of the result columns, in `RETURN` order.
    pub fn returning(mut self, columns: &[&'static str]) -> Self {
        self.columns = columns.to_vec();
        self
    }

    pub fn param(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.params.insert(name.to_string(), value.into());
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn params(&self) -> &Map<String, Value> {
        &self.params
    }

    /// Render the SQL wrapper and its bound parameter list.
    ///
    /// Result columns are cast to `text` in the outer select, so every row
    /// decodes the same way regardless of the agtype flavour returned.
    pub fn to_sql(&self, graph: &GraphName) -> Result<(String, Vec<SqlParam>)> {
        if self.columns.is_empty() {
            return Err(GraphError::InvalidInput(
                "cypher statement declares no result columns".into(),
            ));
        }
        if self.text.contains(DOLLAR_TAG) {
            return Err(GraphError::InvalidInput(format!(
                "cypher text may not contain {DOLLAR_TAG}"
            )));
        }

        let select = self
            .columns
            .iter()
            .map(|c| format!("{c}::text"))
            .collect::<Vec<_>>()
            .join(", ");
        let shape = self
            .columns
            .iter()
            .map(|c| format!("{c} {AGTYPE}"))
            .collect::<Vec<_>>()
            .join(", ");

        let sql = format!(
            "SELECT {select} FROM ag_catalog.cypher({}::name, {DOLLAR_TAG}\n{}\n{DOLLAR_TAG}, $1::{AGTYPE}) AS ({shape})",
            quote_literal(graph.as_str()),
            self.text,
        );
        Ok((sql, vec![SqlParam::Agtype(Value::Object(self.params.clone()))]))
    }
}
