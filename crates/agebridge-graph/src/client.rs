//! PostgreSQL connection management and the graph handle.

use std::sync::Arc;

use deadpool_postgres::{ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime};
use tokio_postgres::NoTls;
use tokio_postgres_rustls::MakeRustlsConnect;

use agebridge_core::config::{DatabaseConfig, GraphSettings, SslMode};
use agebridge_core::GraphName;

use crate::error::{GraphError, Result};
use crate::session::{GraphSession, PgSession};

/// Thread-safe connection pool for one graph namespace.
///
/// This is the single point of access for the store. Clone is cheap (inner
/// Arc); each [`GraphClient::graph`] call checks out its own connection, so
/// concurrent callers never share a transaction.
#[derive(Clone)]
pub struct GraphClient {
    pool: Pool,
    settings: GraphSettings,
}

impl GraphClient {
    /// Build the pool and verify that one connection can be established.
    pub async fn connect(db: &DatabaseConfig, settings: &GraphSettings) -> Result<Self> {
        let mut cfg = deadpool_postgres::Config::new();
        cfg.host = Some(db.host.clone());
        cfg.port = Some(db.port);
        cfg.dbname = Some(db.dbname.clone());
        cfg.user = Some(db.user.clone());
        cfg.password = Some(db.password.clone());
        cfg.ssl_mode = Some(match db.ssl_mode {
            SslMode::Disable => deadpool_postgres::SslMode::Disable,
            SslMode::Prefer => deadpool_postgres::SslMode::Prefer,
            SslMode::Require => deadpool_postgres::SslMode::Require,
        });
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        cfg.pool = Some(PoolConfig::new(db.max_connections.max(1)));

        let pool = match db.ssl_mode {
            SslMode::Disable => cfg.create_pool(Some(Runtime::Tokio1), NoTls),
            SslMode::Prefer | SslMode::Require => {
                cfg.create_pool(Some(Runtime::Tokio1), tls_connector()?)
            }
        }
        .map_err(|e| GraphError::Connection(e.to_string()))?;

        // Fail fast on bad credentials or an unreachable host.
        drop(
            pool.get()
                .await
                .map_err(|e| GraphError::Connection(e.to_string()))?,
        );

        tracing::info!(
            host = %db.host,
            port = db.port,
            dbname = %db.dbname,
            graph = %settings.name,
            "Connected to PostgreSQL"
        );
        Ok(Self {
            pool,
            settings: settings.clone(),
        })
    }

    /// Check out a connection and bind it to the configured graph.
    pub async fn graph(&self) -> Result<AgeGraph<PgSession>> {
        let conn = self
            .pool
            .get()
            .await
            .map_err(|e| GraphError::Pool(e.to_string()))?;
        let session = PgSession::open(conn).await?;
        Ok(AgeGraph::new(session, self.settings.clone()))
    }

    pub fn settings(&self) -> &GraphSettings {
        &self.settings
    }

    /// Underlying pool, for callers that need plain SQL access.
    pub fn pool(&self) -> &Pool {
        &self.pool
    }
}

fn tls_connector() -> Result<MakeRustlsConnect> {
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let config = rustls::ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| GraphError::Connection(format!("TLS setup failed: {e}")))?
    .with_root_certificates(roots)
    .with_no_client_auth();

    Ok(MakeRustlsConnect::new(config))
}

/// A graph namespace bound to one store session.
///
/// Operations are split across impl blocks by concern: bootstrap, bulk
/// loading, interactive mutations, reads and traversals.
pub struct AgeGraph<S> {
    pub(crate) session: S,
    pub(crate) settings: GraphSettings,
}

impl<S: GraphSession> AgeGraph<S> {
    pub fn new(session: S, settings: GraphSettings) -> Self {
        Self { session, settings }
    }

    pub fn name(&self) -> &GraphName {
        &self.settings.name
    }

    pub fn settings(&self) -> &GraphSettings {
        &self.settings
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    pub fn into_session(self) -> S {
        self.session
    }
}
