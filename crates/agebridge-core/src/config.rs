//! Configuration management for agebridge.
//!
//! Configuration is loaded from (lowest to highest priority):
//! 1. Defaults
//! 2. Config file (`agebridge.toml`, prefix selectable)
//! 3. Environment variables (`AGEBRIDGE__SECTION__KEY`)
//! 4. libpq-style variables (`PGHOST`, `PGPORT`, `PGDATABASE`, `PGUSER`,
//!    `PGPASSWORD`, `PGSSLMODE`) and `GRAPH_NAME`

use std::fmt;

use serde::Deserialize;

use crate::error::CoreError;
use crate::ident::GraphName;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub graph: GraphSettings,

    #[serde(default)]
    pub load: LoadConfig,
}

/// Connection settings for the PostgreSQL server hosting AGE.
#[derive(Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_dbname")]
    pub dbname: String,

    #[serde(default = "default_user")]
    pub user: String,

    #[serde(default = "default_password")]
    pub password: String,

    #[serde(default)]
    pub ssl_mode: SslMode,

    /// Pool size; one connection per concurrently running operation.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("dbname", &self.dbname)
            .field("user", &self.user)
            .field("password", &"****")
            .field("ssl_mode", &self.ssl_mode)
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

/// TLS policy for the database connection.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SslMode {
    Disable,
    #[serde(alias = "allow")]
    Prefer,
    /// Managed PostgreSQL offerings reject plaintext connections.
    #[default]
    #[serde(alias = "verify-ca", alias = "verify-full")]
    Require,
}

/// Graph namespace settings.
#[derive(Debug, Clone, Deserialize)]
pub struct GraphSettings {
    #[serde(default = "default_graph_name")]
    pub name: GraphName,

    /// Attempt `CREATE EXTENSION age` when the extension is missing.
    #[serde(default)]
    pub install_extension: bool,

    /// Enable the free-form query escape hatch.
    #[serde(default)]
    pub allow_raw_queries: bool,

    /// Outgoing edges shown per node when browsing.
    #[serde(default = "default_browse_edges")]
    pub browse_edges_per_node: usize,
}

/// Bulk load settings.
#[derive(Debug, Clone, Deserialize)]
pub struct LoadConfig {
    #[serde(default = "default_nodes_file")]
    pub nodes_file: String,

    #[serde(default = "default_edges_file")]
    pub edges_file: String,

    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Drop and recreate the graph before loading.
    #[serde(default)]
    pub recreate: bool,

    /// Create a business-id index on every loaded node label.
    #[serde(default = "default_true")]
    pub index_business_ids: bool,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    5432
}

fn default_dbname() -> String {
    "postgres".to_string()
}

fn default_user() -> String {
    "postgres".to_string()
}

fn default_password() -> String {
    "postgres".to_string()
}

fn default_max_connections() -> usize {
    8
}

fn default_graph_name() -> GraphName {
    GraphName::default()
}

fn default_browse_edges() -> usize {
    3
}

fn default_nodes_file() -> String {
    "data/graph_nodes.json".to_string()
}

fn default_edges_file() -> String {
    "data/graph_edges.json".to_string()
}

fn default_chunk_size() -> usize {
    2000
}

fn default_true() -> bool {
    true
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            dbname: default_dbname(),
            user: default_user(),
            password: default_password(),
            ssl_mode: SslMode::default(),
            max_connections: default_max_connections(),
        }
    }
}

impl Default for GraphSettings {
    fn default() -> Self {
        Self {
            name: default_graph_name(),
            install_extension: false,
            allow_raw_queries: false,
            browse_edges_per_node: default_browse_edges(),
        }
    }
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            nodes_file: default_nodes_file(),
            edges_file: default_edges_file(),
            chunk_size: default_chunk_size(),
            recreate: false,
            index_business_ids: true,
        }
    }
}

/// libpq environment variables mapped onto config keys.
const LIBPQ_OVERRIDES: &[(&str, &str)] = &[
    ("PGHOST", "database.host"),
    ("PGPORT", "database.port"),
    ("PGDATABASE", "database.dbname"),
    ("PGUSER", "database.user"),
    ("PGPASSWORD", "database.password"),
    ("PGSSLMODE", "database.ssl_mode"),
    ("GRAPH_NAME", "graph.name"),
];

impl AppConfig {
    /// Load configuration from `<file_prefix>.toml` (optional) and the environment.
    pub fn load(file_prefix: &str) -> Result<Self, CoreError> {
        Self::load_with_env(file_prefix, |key| std::env::var(key).ok())
    }

    /// Same as [`AppConfig::load`] with an injectable lookup for the libpq variables.
    pub fn load_with_env(
        file_prefix: &str,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, CoreError> {
        let mut builder = config::Config::builder()
            .add_source(config::File::with_name(file_prefix).required(false))
            .add_source(
                config::Environment::with_prefix("AGEBRIDGE")
                    .separator("__")
                    .try_parsing(true),
            );

        for (var, key) in LIBPQ_OVERRIDES {
            builder = builder.set_override_option(*key, lookup(var))?;
        }

        let cfg: AppConfig = builder.build()?.try_deserialize()?;
        tracing::debug!(database = ?cfg.database, graph = %cfg.graph.name, "Configuration loaded");
        Ok(cfg)
    }
}
