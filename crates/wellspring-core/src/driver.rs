//! Database driver trait definition

use crate::{IsolationLevel, PhysicalStatement, Result, ResultSetConcurrency, ResultSetType};
use async_trait::async_trait;
use std::collections::HashMap;

/// Options for opening a physical connection.
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    /// Connection URL understood by the driver
    pub url: String,
    /// Username, if the driver authenticates
    pub username: Option<String>,
    /// Password, if the driver authenticates
    pub password: Option<String>,
    /// Additional driver-specific parameters
    pub params: HashMap<String, String>,
}

impl ConnectOptions {
    /// Create options for the given URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Set the credentials used to open the connection.
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Set a driver-specific parameter.
    pub fn with_param(mut self, key: &str, value: impl Into<String>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }
}

/// Core driver trait: opens physical connections for the pool.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Driver identifier (e.g. "postgres", "sqlite")
    fn name(&self) -> &'static str;

    /// Open a new physical connection.
    async fn connect(&self, opts: &ConnectOptions) -> Result<Box<dyn PhysicalConnection>>;

    /// Open and immediately close a connection to verify the options.
    async fn test_connection(&self, opts: &ConnectOptions) -> Result<()> {
        let conn = self.connect(opts).await?;
        conn.close().await
    }
}

/// A physical database connection, owned by exactly one managed
/// connection for its lifetime.
#[async_trait]
pub trait PhysicalConnection: Send + Sync {
    async fn set_auto_commit(&self, enabled: bool) -> Result<()>;

    async fn set_isolation(&self, level: IsolationLevel) -> Result<()>;

    async fn commit(&self) -> Result<()>;

    async fn rollback(&self) -> Result<()>;

    /// Execute a bare statement, returning the affected row count.
    ///
    /// Used for validation probes and diagnostics; regular work goes
    /// through prepared statements.
    async fn execute(&self, sql: &str) -> Result<u64>;

    /// Prepare a statement with the requested result-set options.
    async fn prepare(
        &self,
        sql: &str,
        rs_type: ResultSetType,
        rs_concurrency: ResultSetConcurrency,
    ) -> Result<Box<dyn PhysicalStatement>>;

    async fn close(&self) -> Result<()>;

    /// Whether the driver reports this connection as closed.
    fn is_closed(&self) -> bool;
}
