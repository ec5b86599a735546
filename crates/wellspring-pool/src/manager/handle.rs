//! Caller-facing connection and statement handles
//!
//! These behave like raw driver handles except that closing returns the
//! connection to the pool instead of destroying it. Driver errors are
//! re-thrown to the caller and also reported to the pool, which
//! quarantines the connection on release.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use wellspring_core::{FetchDirection, Result, ResultSetConcurrency, ResultSetType, Value};

use crate::managed::{CachedStatement, ManagedConnection};
use crate::manager::ConnectionManager;

/// A pooled connection held by one caller.
///
/// `close` hands the connection back to the pool. Dropping the handle
/// without closing it is a leak; the pool logs it and reclaims the
/// connection once its open-time deadline passes.
pub struct PooledConnection {
    mc: Arc<ManagedConnection>,
    // Keeps the pool (the connection's event listener) alive for as long
    // as handles are out.
    manager: Arc<ConnectionManager>,
    closed: AtomicBool,
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("mc", &self.mc)
            .field("pool", &self.manager.name())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl PooledConnection {
    pub(crate) fn new(mc: Arc<ManagedConnection>, manager: Arc<ConnectionManager>) -> Self {
        Self {
            mc,
            manager,
            closed: AtomicBool::new(false),
        }
    }

    /// Pool-local identifier of the underlying managed connection.
    pub fn id(&self) -> u64 {
        self.mc.id()
    }

    /// The pool this connection belongs to.
    pub fn pool(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    /// The managed connection, for callers that need the transactional
    /// resource facet.
    pub fn managed(&self) -> &Arc<ManagedConnection> {
        &self.mc
    }

    /// Prepare a statement with forward-only, read-only results.
    pub async fn prepare(&self, sql: &str) -> Result<PooledStatement> {
        self.prepare_with(sql, ResultSetType::ForwardOnly, ResultSetConcurrency::ReadOnly)
            .await
    }

    /// Prepare a statement with explicit result-set options.
    pub async fn prepare_with(
        &self,
        sql: &str,
        rs_type: ResultSetType,
        rs_concurrency: ResultSetConcurrency,
    ) -> Result<PooledStatement> {
        match self.mc.prepare_statement(sql, rs_type, rs_concurrency).await {
            Ok(stmt) => Ok(PooledStatement::new(stmt, Arc::clone(&self.mc))),
            Err(e) => {
                self.mc.notify_error(&e).await;
                Err(e)
            }
        }
    }

    /// Execute a bare statement, returning the affected row count.
    pub async fn execute(&self, sql: &str) -> Result<u64> {
        match self.mc.physical().execute(sql).await {
            Ok(n) => Ok(n),
            Err(e) => {
                self.mc.notify_error(&e).await;
                Err(e)
            }
        }
    }

    pub async fn set_auto_commit(&self, enabled: bool) -> Result<()> {
        self.mc.physical().set_auto_commit(enabled).await
    }

    pub async fn commit(&self) -> Result<()> {
        match self.mc.physical().commit().await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.mc.notify_error(&e).await;
                Err(e)
            }
        }
    }

    pub async fn rollback(&self) -> Result<()> {
        match self.mc.physical().rollback().await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.mc.notify_error(&e).await;
                Err(e)
            }
        }
    }

    /// Return the connection to the pool. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            tracing::debug!(connection_id = self.mc.id(), "connection already closed");
            return;
        }
        self.mc.notify_close().await;
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::SeqCst) {
            tracing::warn!(
                connection_id = self.mc.id(),
                pool = %self.manager.name(),
                "connection handle dropped without close; the pool will reclaim it as a leak"
            );
        }
    }
}

/// A prepared statement held by one caller.
///
/// Closing it returns the statement to its connection's cache rather
/// than deallocating it.
pub struct PooledStatement {
    stmt: Arc<CachedStatement>,
    mc: Arc<ManagedConnection>,
    closed: AtomicBool,
}

impl PooledStatement {
    fn new(stmt: Arc<CachedStatement>, mc: Arc<ManagedConnection>) -> Self {
        Self {
            stmt,
            mc,
            closed: AtomicBool::new(false),
        }
    }

    /// The SQL text this statement was prepared from.
    pub fn sql(&self) -> &str {
        self.stmt.sql()
    }

    /// Execute with the given parameters.
    pub async fn execute(&self, params: &[Value]) -> Result<u64> {
        match self.stmt.execute(params).await {
            Ok(n) => Ok(n),
            Err(e) => {
                self.mc.notify_error(&e).await;
                Err(e)
            }
        }
    }

    pub async fn set_fetch_direction(&self, direction: FetchDirection) -> Result<()> {
        self.stmt.set_fetch_direction(direction).await
    }

    pub async fn set_fetch_size(&self, rows: u32) -> Result<()> {
        self.stmt.set_fetch_size(rows).await
    }

    pub async fn set_max_field_size(&self, bytes: u32) -> Result<()> {
        self.stmt.set_max_field_size(bytes).await
    }

    pub async fn set_max_rows(&self, rows: u32) -> Result<()> {
        self.stmt.set_max_rows(rows).await
    }

    pub async fn set_query_timeout(&self, seconds: u32) -> Result<()> {
        self.stmt.set_query_timeout(seconds).await
    }

    pub async fn add_batch(&self, params: &[Value]) -> Result<()> {
        self.stmt.add_batch(params).await
    }

    /// Release the statement back to the cache. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            tracing::debug!(sql = %self.stmt.sql(), "statement already closed");
            return;
        }
        self.mc.notify_statement_closed(&self.stmt).await;
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
