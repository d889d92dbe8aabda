//! Store and namespace preparation: extension check, graph creation and
//! teardown, label catalog lookups, business-id indexes.

use serde::Serialize;
use tracing::{info, warn};

use agebridge_core::Label;

use crate::client::AgeGraph;
use crate::cypher::{label_table, quote_ident};
use crate::error::{GraphError, Result};
use crate::session::{GraphSession, SqlParam};

const EXTENSION_SQL: &str = "SELECT extname::text FROM pg_catalog.pg_extension WHERE extname = 'age'";
const GRAPH_EXISTS_SQL: &str = "SELECT name::text FROM ag_catalog.ag_graph WHERE name = $1::name";
const CREATE_GRAPH_SQL: &str = "SELECT ag_catalog.create_graph($1::name)";
const LABEL_EXISTS_SQL: &str = "SELECT l.name::text FROM ag_catalog.ag_label l \
     JOIN ag_catalog.ag_graph g ON l.graph = g.graphid \
     WHERE l.name = $1::name AND g.name = $2::name";

/// How [`AgeGraph::create_graph`] treats an existing namespace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BootstrapMode {
    /// Create the graph only if it does not exist yet.
    #[default]
    EnsureExists,
    /// Drop every trace of the graph, then create it empty.
    Recreate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BootstrapOutcome {
    AlreadyExisted,
    Created,
    Recreated,
}

impl<S: GraphSession> AgeGraph<S> {
    // ── Extension ───────────────────────────────────────────────

    /// Verify the AGE extension is installed, optionally installing it.
    pub async fn ensure_ready(&mut self) -> Result<()> {
        if self.extension_installed().await? {
            return Ok(());
        }
        if !self.settings.install_extension {
            return Err(GraphError::ExtensionMissing);
        }

        warn!("AGE extension not found, attempting CREATE EXTENSION");
        match self
            .session
            .execute("CREATE EXTENSION IF NOT EXISTS age CASCADE", &[])
            .await
        {
            Ok(_) => self.session.commit().await?,
            Err(e) => warn!(error = %e, "CREATE EXTENSION failed"),
        }

        if self.extension_installed().await? {
            info!("AGE extension installed");
            Ok(())
        } else {
            Err(GraphError::ExtensionMissing)
        }
    }

    async fn extension_installed(&mut self) -> Result<bool> {
        let rows = self.session.query(EXTENSION_SQL, &[]).await?;
        self.session.commit().await?;
        Ok(!rows.is_empty())
    }

    // ── Namespace ───────────────────────────────────────────────

    pub async fn graph_exists(&mut self) -> Result<bool> {
        let params = [SqlParam::text(self.name().as_str())];
        let rows = self.session.query(GRAPH_EXISTS_SQL, &params).await?;
        self.session.commit().await?;
        Ok(!rows.is_empty())
    }

    /// Create the graph namespace. In [`BootstrapMode::Recreate`] all prior
    /// catalog rows and the backing schema are removed first; if any removal
    /// step fails nothing is created.
    pub async fn create_graph(&mut self, mode: BootstrapMode) -> Result<BootstrapOutcome> {
        let existed = self.graph_exists().await?;

        let outcome = match (mode, existed) {
            (BootstrapMode::EnsureExists, true) => {
                info!(graph = %self.name(), "Graph already exists");
                return Ok(BootstrapOutcome::AlreadyExisted);
            }
            (BootstrapMode::EnsureExists, false) => BootstrapOutcome::Created,
            (BootstrapMode::Recreate, _) => {
                self.drop_graph().await?;
                BootstrapOutcome::Recreated
            }
        };

        let params = [SqlParam::text(self.name().as_str())];
        self.session.execute(CREATE_GRAPH_SQL, &params).await?;
        self.session.commit().await?;
        info!(graph = %self.name(), outcome = ?outcome, "Graph created");
        Ok(outcome)
    }

    /// Remove the graph's catalog rows and schema in one transaction.
    ///
    /// Works on partially torn-down graphs (catalog rows without a schema or
    /// the reverse), which `ag_catalog.drop_graph` refuses to handle.
    pub async fn drop_graph(&mut self) -> Result<()> {
        let name = SqlParam::text(self.name().as_str());
        let steps = [
            (
                "DELETE FROM ag_catalog.ag_label WHERE graph IN \
                 (SELECT graphid FROM ag_catalog.ag_graph WHERE name = $1::name)"
                    .to_string(),
                vec![name.clone()],
            ),
            (
                "DELETE FROM ag_catalog.ag_graph WHERE name = $1::name".to_string(),
                vec![name],
            ),
            (
                format!("DROP SCHEMA IF EXISTS {} CASCADE", quote_ident(self.name().as_str())),
                Vec::new(),
            ),
        ];

        for (sql, params) in &steps {
            if let Err(e) = self.session.execute(sql, params).await {
                warn!(graph = %self.name(), error = %e, "Graph teardown failed");
                self.session.rollback().await?;
                return Err(e);
            }
        }
        self.session.commit().await?;
        info!(graph = %self.name(), "Graph dropped");
        Ok(())
    }

    // ── Labels ──────────────────────────────────────────────────

    /// Whether `label` has a backing table in this graph.
    pub async fn label_exists(&mut self, label: &Label) -> Result<bool> {
        let params = [
            SqlParam::text(label.as_str()),
            SqlParam::text(self.name().as_str()),
        ];
        let rows = self.session.query(LABEL_EXISTS_SQL, &params).await?;
        self.session.commit().await?;
        Ok(!rows.is_empty())
    }

    /// Index the business id of a node label so that lookups by
    /// `payload.id` avoid sequential scans.
    pub async fn create_business_id_index(&mut self, label: &Label) -> Result<()> {
        let index = quote_ident(&format!("idx_{}_{}_payload_id", self.name(), label));
        let sql = format!(
            "CREATE INDEX IF NOT EXISTS {index} ON {} (((properties::text)::jsonb -> 'payload' ->> 'id'))",
            label_table(self.name(), label),
        );
        self.session.execute(&sql, &[]).await?;
        self.session.commit().await?;
        info!(graph = %self.name(), label = %label, "Business id index ready");
        Ok(())
    }

    // ── Health ──────────────────────────────────────────────────

    /// Round-trip a trivial statement; failures are logged, not returned.
    pub async fn health_check(&mut self) -> bool {
        let ok = match self.session.query("SELECT '1'::text", &[]).await {
            Ok(rows) => rows.len() == 1,
            Err(e) => {
                warn!(error = %e, "Health check failed");
                false
            }
        };
        if let Err(e) = self.session.commit().await {
            warn!(error = %e, "Health check commit failed");
            return false;
        }
        ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{row, ScriptedSession};
    use agebridge_core::config::GraphSettings;

    fn graph(session: ScriptedSession) -> AgeGraph<ScriptedSession> {
        AgeGraph::new(session, GraphSettings::default())
    }

    #[tokio::test]
    async fn missing_extension_fails_without_install_flag() {
        let mut g = graph(ScriptedSession::new());
        let err = g.ensure_ready().await.unwrap_err();
        assert!(matches!(err, GraphError::ExtensionMissing));
        assert_eq!(g.session().count("CREATE EXTENSION"), 0);
    }

    #[tokio::test]
    async fn installs_extension_when_allowed() {
        let session = ScriptedSession::new()
            .respond_once("pg_extension", vec![])
            .respond("pg_extension", vec![row(&[Some("age")])]);
        let mut g = AgeGraph::new(
            session,
            GraphSettings {
                install_extension: true,
                ..GraphSettings::default()
            },
        );
        g.ensure_ready().await.unwrap();
        assert_eq!(g.session().count("CREATE EXTENSION IF NOT EXISTS age"), 1);
    }

    #[tokio::test]
    async fn ensure_exists_leaves_existing_graph() {
        let session = ScriptedSession::new().respond("ag_catalog.ag_graph WHERE", vec![row(&[Some("customer_graph")])]);
        let mut g = graph(session);
        let outcome = g.create_graph(BootstrapMode::EnsureExists).await.unwrap();
        assert_eq!(outcome, BootstrapOutcome::AlreadyExisted);
        assert_eq!(g.session().count("create_graph"), 0);
        assert_eq!(g.session().count("DROP SCHEMA"), 0);
    }

    #[tokio::test]
    async fn ensure_exists_creates_missing_graph() {
        let mut g = graph(ScriptedSession::new());
        let outcome = g.create_graph(BootstrapMode::EnsureExists).await.unwrap();
        assert_eq!(outcome, BootstrapOutcome::Created);
        let create = g.session().find("create_graph").unwrap();
        assert_eq!(create.params, vec![SqlParam::text("customer_graph")]);
    }

    #[tokio::test]
    async fn recreate_twice_runs_same_sequence() {
        let mut g = graph(ScriptedSession::new());
        g.create_graph(BootstrapMode::Recreate).await.unwrap();
        let first: Vec<String> = g.session().statements.iter().map(|s| s.sql.clone()).collect();

        let mut g = graph(ScriptedSession::new().respond("ag_catalog.ag_graph WHERE", vec![row(&[Some("customer_graph")])]));
        g.create_graph(BootstrapMode::Recreate).await.unwrap();
        let second: Vec<String> = g.session().statements.iter().map(|s| s.sql.clone()).collect();

        assert_eq!(first, second);
        assert_eq!(g.session().count("DELETE FROM ag_catalog.ag_label"), 1);
        assert_eq!(g.session().count("DROP SCHEMA IF EXISTS \"customer_graph\" CASCADE"), 1);
        assert_eq!(g.session().count("create_graph"), 1);
    }

    #[tokio::test]
    async fn failed_teardown_creates_nothing() {
        let session = ScriptedSession::new().fail_on("DROP SCHEMA", 1);
        let mut g = graph(session);
        let err = g.create_graph(BootstrapMode::Recreate).await;
        assert!(err.is_err());
        assert_eq!(g.session().count("create_graph"), 0);
        assert!(g
            .session()
            .committed
            .iter()
            .all(|s| !s.sql.contains("DELETE FROM")));
    }

    #[tokio::test]
    async fn label_lookup_binds_names() {
        let mut g = graph(ScriptedSession::new().respond("ag_label l", vec![row(&[Some("Customer")])]));
        let label = Label::parse("Customer").unwrap();
        assert!(g.label_exists(&label).await.unwrap());
        assert!(!g.session().in_transaction());
        let stmt = g.session().find("ag_label l").unwrap();
        assert_eq!(
            stmt.params,
            vec![SqlParam::text("Customer"), SqlParam::text("customer_graph")]
        );
    }

    #[tokio::test]
    async fn business_id_index_statement() {
        let mut g = graph(ScriptedSession::new());
        g.create_business_id_index(&Label::parse("Customer").unwrap())
            .await
            .unwrap();
        let stmt = &g.session().statements[0];
        assert!(stmt.sql.contains("\"idx_customer_graph_Customer_payload_id\""));
        assert!(stmt.sql.contains("ON \"customer_graph\".\"Customer\""));
    }

    #[tokio::test]
    async fn health_check_reports_failure() {
        let mut ok = graph(ScriptedSession::new().respond("SELECT '1'", vec![row(&[Some("1")])]));
        assert!(ok.health_check().await);
        let mut bad = graph(ScriptedSession::new().fail_on("SELECT '1'", 1));
        assert!(!bad.health_check().await);
    }
}
