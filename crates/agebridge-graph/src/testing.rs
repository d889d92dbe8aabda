//! In-memory session for exercising graph operations without a database.
//!
//! Every statement is recorded with its bound parameters. Responses are
//! matched by substring in registration order; unmatched queries return no
//! rows and unmatched statements report one affected row.

use std::collections::VecDeque;

use async_trait::async_trait;

use crate::error::{GraphError, Result};
use crate::session::{GraphSession, SqlParam, TextRow};

/// One statement as the store saw it.
#[derive(Debug, Clone, PartialEq)]
pub struct Recorded {
    pub sql: String,
    pub params: Vec<SqlParam>,
}

#[derive(Debug)]
struct Rule {
    needle: String,
    rows: Vec<TextRow>,
    once: bool,
}

#[derive(Debug)]
struct Failure {
    needle: String,
    /// Remaining matches to let through before failing.
    skip: usize,
}

#[derive(Debug, Default)]
pub struct ScriptedSession {
    pub statements: Vec<Recorded>,
    pub commits: usize,
    pub rollbacks: usize,
    rules: VecDeque<Rule>,
    failures: Vec<Failure>,
    in_txn: bool,
    /// Statements inside the open transaction, discarded on rollback.
    pending: usize,
    /// Statements that made it into a commit.
    pub committed: Vec<Recorded>,
}

pub fn row(cols: &[Option<&str>]) -> TextRow {
    TextRow::new(cols.iter().map(|c| c.map(str::to_string)).collect())
}

impl ScriptedSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every query containing `needle` with `rows`.
    pub fn respond(mut self, needle: &str, rows: Vec<TextRow>) -> Self {
        self.rules.push_back(Rule {
            needle: needle.to_string(),
            rows,
            once: false,
        });
        self
    }

    /// Answer only the next query containing `needle` with `rows`.
    pub fn respond_once(mut self, needle: &str, rows: Vec<TextRow>) -> Self {
        self.rules.push_back(Rule {
            needle: needle.to_string(),
            rows,
            once: true,
        });
        self
    }

    /// Fail the `nth` (1-based) statement containing `needle`.
    pub fn fail_on(mut self, needle: &str, nth: usize) -> Self {
        self.failures.push(Failure {
            needle: needle.to_string(),
            skip: nth.saturating_sub(1),
        });
        self
    }

    /// Number of recorded statements containing `needle`.
    pub fn count(&self, needle: &str) -> usize {
        self.statements.iter().filter(|s| s.sql.contains(needle)).count()
    }

    /// Whether statements have run since the last commit or rollback.
    pub fn in_transaction(&self) -> bool {
        self.in_txn
    }

    pub fn find(&self, needle: &str) -> Option<&Recorded> {
        self.statements.iter().find(|s| s.sql.contains(needle))
    }

    fn record(&mut self, sql: &str, params: &[SqlParam]) -> Result<()> {
        self.statements.push(Recorded {
            sql: sql.to_string(),
            params: params.to_vec(),
        });
        self.in_txn = true;
        self.pending += 1;

        let mut fail = false;
        for f in self.failures.iter_mut().filter(|f| sql.contains(&f.needle)) {
            if f.skip == 0 {
                fail = true;
                f.skip = usize::MAX;
            } else if f.skip != usize::MAX {
                f.skip -= 1;
            }
        }
        if fail {
            self.discard();
            self.rollbacks += 1;
            return Err(GraphError::Connection("scripted failure".into()));
        }
        Ok(())
    }

    fn discard(&mut self) {
        self.in_txn = false;
        self.pending = 0;
    }

    fn rows_for(&mut self, sql: &str) -> Vec<TextRow> {
        let Some(pos) = self.rules.iter().position(|r| sql.contains(&r.needle)) else {
            return Vec::new();
        };
        if self.rules[pos].once {
            self.rules.remove(pos).map(|r| r.rows).unwrap_or_default()
        } else {
            self.rules[pos].rows.clone()
        }
    }
}

#[async_trait]
impl GraphSession for ScriptedSession {
    async fn execute(&mut self, sql: &str, params: &[SqlParam]) -> Result<u64> {
        self.record(sql, params)?;
        Ok(1)
    }

    async fn query(&mut self, sql: &str, params: &[SqlParam]) -> Result<Vec<TextRow>> {
        self.record(sql, params)?;
        Ok(self.rows_for(sql))
    }

    async fn commit(&mut self) -> Result<()> {
        if self.in_txn {
            let start = self.statements.len() - self.pending;
            let done = self.statements[start..].to_vec();
            self.committed.extend(done);
            self.commits += 1;
            self.discard();
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        if self.in_txn {
            self.rollbacks += 1;
            self.discard();
        }
        Ok(())
    }
}
