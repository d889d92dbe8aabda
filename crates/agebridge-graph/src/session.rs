//! Store session seam.
//!
//! Every operation talks to PostgreSQL through [`GraphSession`]: run a
//! statement, fetch rows as text, commit, roll back. [`PgSession`] is the
//! pooled implementation; tests drive the same operations through a scripted
//! session that records statements.

use std::error::Error as StdError;

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use serde_json::Value;
use tokio_postgres::types::{to_sql_checked, Format, IsNull, ToSql, Type};

use agebridge_core::InternalId;

use crate::error::{GraphError, Result};

/// Session-level settings applied on every checkout. Unqualified names
/// then resolve to AGE's catalog first.
pub const SEARCH_PATH_SQL: &str = "SET search_path = ag_catalog, \"$user\", public";

/// A value bound to a positional `$n` parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    /// Plain text (also accepted by `name` and `varchar` parameters).
    Text(String),
    /// An `agtype` value, sent in its JSON text form.
    Agtype(Value),
    /// An AGE `graphid`, sent in its decimal text form.
    Graphid(InternalId),
}

impl SqlParam {
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    pub fn agtype(v: Value) -> Self {
        Self::Agtype(v)
    }

    /// The value as it would appear on the wire.
    pub fn render(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Agtype(v) => v.to_string(),
            Self::Graphid(id) => id.to_string(),
        }
    }
}

impl ToSql for SqlParam {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> std::result::Result<IsNull, Box<dyn StdError + Sync + Send>> {
        match self {
            Self::Text(s) => {
                if !<&str as ToSql>::accepts(ty) {
                    return Err(format!("cannot bind text to parameter of type {ty}").into());
                }
                s.as_str().to_sql(ty, out)
            }
            // agtype and graphid have no binary codec in the client; both go in
            // text format through the type's input function.
            Self::Agtype(v) => {
                if ty.name() != "agtype" {
                    return Err(format!("cannot bind agtype to parameter of type {ty}").into());
                }
                out.put_slice(v.to_string().as_bytes());
                Ok(IsNull::No)
            }
            Self::Graphid(id) => {
                if ty.name() != "graphid" {
                    return Err(format!("cannot bind graphid to parameter of type {ty}").into());
                }
                out.put_slice(id.as_str().as_bytes());
                Ok(IsNull::No)
            }
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    fn encode_format(&self, _ty: &Type) -> Format {
        match self {
            Self::Text(_) => Format::Binary,
            Self::Agtype(_) | Self::Graphid(_) => Format::Text,
        }
    }

    to_sql_checked!();
}

/// One result row with every column decoded as nullable text.
///
/// Statements cast their output columns to `text`, so a row never needs
/// type-specific decoding on the client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextRow(pub Vec<Option<String>>);

impl TextRow {
    pub fn new(cols: Vec<Option<String>>) -> Self {
        Self(cols)
    }

    pub fn get(&self, idx: usize) -> Option<&str> {
        self.0.get(idx).and_then(|c| c.as_deref())
    }

    /// Column value that must be present and non-null.
    pub fn require(&self, idx: usize) -> Result<&str> {
        self.get(idx)
            .ok_or_else(|| GraphError::Decode(format!("column {idx} is missing or null")))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A unit of work against the store.
///
/// Statements run inside an implicit transaction that lasts until
/// [`commit`](GraphSession::commit) or [`rollback`](GraphSession::rollback).
/// A failed statement rolls the open transaction back before the error is
/// returned, so the session is always reusable.
#[async_trait]
pub trait GraphSession: Send {
    /// Run a statement, returning the number of affected rows.
    async fn execute(&mut self, sql: &str, params: &[SqlParam]) -> Result<u64>;

    /// Run a statement and collect its rows.
    async fn query(&mut self, sql: &str, params: &[SqlParam]) -> Result<Vec<TextRow>>;

    async fn commit(&mut self) -> Result<()>;

    async fn rollback(&mut self) -> Result<()>;
}

/// Pooled PostgreSQL session.
pub struct PgSession {
    client: deadpool_postgres::Object,
    in_txn: bool,
}

impl PgSession {
    /// Wrap a pooled connection, applying the session search path.
    ///
    /// Any transaction the previous holder left open is rolled back first;
    /// outside a transaction the `ROLLBACK` is a server-side warning only.
    pub async fn open(client: deadpool_postgres::Object) -> Result<Self> {
        client.batch_execute("ROLLBACK").await?;
        client.batch_execute(SEARCH_PATH_SQL).await?;
        Ok(Self {
            client,
            in_txn: false,
        })
    }

    async fn begin(&mut self) -> Result<()> {
        if !self.in_txn {
            self.client.batch_execute("BEGIN").await?;
            self.in_txn = true;
        }
        Ok(())
    }

    async fn abort(&mut self) {
        if self.in_txn {
            self.in_txn = false;
            if let Err(e) = self.client.batch_execute("ROLLBACK").await {
                tracing::warn!(error = %e, "Rollback after failed statement did not complete");
            }
        }
    }
}

fn bind(params: &[SqlParam]) -> Vec<&(dyn ToSql + Sync)> {
    params.iter().map(|p| p as &(dyn ToSql + Sync)).collect()
}

fn decode_row(row: &tokio_postgres::Row) -> Result<TextRow> {
    (0..row.len())
        .map(|i| {
            row.try_get::<_, Option<String>>(i)
                .map_err(|e| GraphError::Decode(format!("column {i}: {e}")))
        })
        .collect::<Result<Vec<_>>>()
        .map(TextRow)
}

#[async_trait]
impl GraphSession for PgSession {
    async fn execute(&mut self, sql: &str, params: &[SqlParam]) -> Result<u64> {
        self.begin().await?;
        let bound = bind(params);
        match self.client.execute(sql, &bound).await {
            Ok(n) => Ok(n),
            Err(e) => {
                tracing::debug!(error = %e, "Statement failed");
                self.abort().await;
                Err(e.into())
            }
        }
    }

    async fn query(&mut self, sql: &str, params: &[SqlParam]) -> Result<Vec<TextRow>> {
        self.begin().await?;
        let bound = bind(params);
        match self.client.query(sql, &bound).await {
            Ok(rows) => rows.iter().map(decode_row).collect(),
            Err(e) => {
                tracing::debug!(error = %e, "Query failed");
                self.abort().await;
                Err(e.into())
            }
        }
    }

    async fn commit(&mut self) -> Result<()> {
        if self.in_txn {
            self.in_txn = false;
            self.client.batch_execute("COMMIT").await?;
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        if self.in_txn {
            self.in_txn = false;
            self.client.batch_execute("ROLLBACK").await?;
        }
        Ok(())
    }
}
