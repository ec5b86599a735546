//! Managed connection state machine

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use uuid::Uuid;
use wellspring_core::{
    CompletionCallback, PhysicalConnection, PrepareVote, Result, ResultSetConcurrency,
    ResultSetType, TransactionalResource, TxId, TxStatus, WellspringError,
};

use super::statements::StatementCache;
use super::CachedStatement;

/// Events a managed connection reports to its pool.
///
/// The pool owns the managed connections; each connection holds only a
/// weak reference back, and event delivery is a direct call.
#[async_trait]
pub trait ConnectionEventListener: Send + Sync {
    /// The caller closed its handle on the connection.
    async fn connection_closed(&self, mc: &Arc<ManagedConnection>);

    /// A fatal error occurred; the connection can no longer be trusted.
    async fn connection_error(&self, mc: &Arc<ManagedConnection>, error: &WellspringError);

    /// The transaction this connection was reserved for completed.
    async fn transaction_completed(&self, mc: &Arc<ManagedConnection>);
}

/// Hold and transaction state, guarded by a short-lived lock.
struct HoldState {
    /// Outstanding acquisitions; > 0 means busy
    hold_count: u32,
    /// Transaction this connection is reserved for
    tx: Option<TxId>,
    /// When a busy, untransacted connection is declared leaked
    idle_deadline: Instant,
}

/// One pooled connection: a physical driver connection plus the state
/// the pool needs to arbitrate it.
pub struct ManagedConnection {
    /// Monotonically increasing identifier within the pool
    id: u64,
    /// Stable identity of the transactional resource facet
    resource_id: Uuid,
    physical: Box<dyn PhysicalConnection>,
    /// Once passed, the connection is aged and evictable when idle
    age_deadline: Instant,
    state: Mutex<HoldState>,
    /// How often cached statements were served from the cache
    reuse_count: AtomicU64,
    statements: StatementCache,
    listener: RwLock<Option<Weak<dyn ConnectionEventListener>>>,
    me: Weak<ManagedConnection>,
}

impl std::fmt::Debug for ManagedConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedConnection")
            .field("id", &self.id)
            .field("resource_id", &self.resource_id)
            .finish_non_exhaustive()
    }
}

impl ManagedConnection {
    /// Wrap a physical connection.
    pub(crate) fn new(
        id: u64,
        physical: Box<dyn PhysicalConnection>,
        max_age: Duration,
        pstmt_max: usize,
    ) -> Arc<Self> {
        let now = Instant::now();
        Arc::new_cyclic(|me| Self {
            id,
            resource_id: Uuid::new_v4(),
            physical,
            age_deadline: now + max_age,
            state: Mutex::new(HoldState {
                hold_count: 0,
                tx: None,
                idle_deadline: now,
            }),
            reuse_count: AtomicU64::new(0),
            statements: StatementCache::new(pstmt_max),
            listener: RwLock::new(None),
            me: me.clone(),
        })
    }

    /// Pool-local identifier of this connection.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The underlying physical connection.
    pub fn physical(&self) -> &dyn PhysicalConnection {
        self.physical.as_ref()
    }

    pub(crate) fn set_listener(&self, listener: Weak<dyn ConnectionEventListener>) {
        *self.listener.write() = Some(listener);
    }

    fn listener(&self) -> Option<Arc<dyn ConnectionEventListener>> {
        self.listener.read().as_ref().and_then(Weak::upgrade)
    }

    /// Record one more acquisition and push the leak deadline out.
    pub(crate) fn hold(&self, max_open_time: Duration) {
        let mut state = self.state.lock();
        state.hold_count += 1;
        state.idle_deadline = Instant::now() + max_open_time;
    }

    /// Record a release. Returns false on a double release.
    pub(crate) fn release_hold(&self) -> bool {
        let mut state = self.state.lock();
        if state.hold_count == 0 {
            tracing::warn!(connection_id = self.id, "connection was already released");
            return false;
        }
        state.hold_count -= 1;
        if state.tx.is_none() && state.hold_count > 0 {
            // Only transacted connections can be held more than once.
            tracing::error!(connection_id = self.id, "connection hold counter overflow");
            state.hold_count = 0;
        }
        true
    }

    /// Outstanding acquisitions.
    pub fn hold_count(&self) -> u32 {
        self.state.lock().hold_count
    }

    /// True while at least one caller holds the connection.
    pub fn is_open(&self) -> bool {
        self.state.lock().hold_count > 0
    }

    /// True once the connection has outlived its maximum age.
    pub fn is_aged(&self) -> bool {
        self.age_deadline < Instant::now()
    }

    /// True when the connection looks leaked: held, not reserved for a
    /// transaction, and past its open-time deadline. This usually means
    /// the caller forgot to close its handle.
    pub fn inactive(&self) -> bool {
        let state = self.state.lock();
        state.hold_count > 0 && state.tx.is_none() && state.idle_deadline < Instant::now()
    }

    /// Transaction this connection is currently reserved for.
    pub fn tx(&self) -> Option<TxId> {
        self.state.lock().tx
    }

    pub(crate) fn set_tx(&self, tx: Option<TxId>) {
        self.state.lock().tx = tx;
    }

    /// How often this connection's cached statements were reused.
    pub fn reuse_count(&self) -> u64 {
        self.reuse_count.load(Ordering::SeqCst)
    }

    /// Ordering key in the free set: warmest cache first, then newest.
    pub(crate) fn free_key(&self) -> (u64, u64) {
        (self.reuse_count(), self.id)
    }

    pub(crate) fn set_statement_capacity(&self, capacity: usize) {
        self.statements.set_capacity(capacity);
    }

    /// Prepare a statement through this connection's cache.
    pub async fn prepare_statement(
        &self,
        sql: &str,
        rs_type: ResultSetType,
        rs_concurrency: ResultSetConcurrency,
    ) -> Result<Arc<CachedStatement>> {
        let (stmt, reused) = self
            .statements
            .prepare(self.physical.as_ref(), sql, rs_type, rs_concurrency)
            .await?;
        if reused {
            self.reuse_count.fetch_add(1, Ordering::SeqCst);
        }
        Ok(stmt)
    }

    /// A caller logically closed one of this connection's statements.
    pub async fn notify_statement_closed(&self, stmt: &Arc<CachedStatement>) {
        tracing::debug!(connection_id = self.id, sql = %stmt.sql(), "statement closed");
        self.statements.notify_closed(stmt).await;
    }

    /// The caller closed its handle: force-close anything still open in
    /// the statement cache, then tell the pool.
    pub async fn notify_close(&self) {
        let forced = self.statements.close_open_statements().await;
        if forced > 0 {
            tracing::warn!(
                connection_id = self.id,
                count = forced,
                "open statements were force-closed with their connection"
            );
        }
        let Some(me) = self.me.upgrade() else { return };
        if let Some(listener) = self.listener() {
            listener.connection_closed(&me).await;
        }
    }

    /// A fatal error occurred on this connection.
    pub async fn notify_error(&self, error: &WellspringError) {
        tracing::debug!(connection_id = self.id, error = %error, "connection error");
        let Some(me) = self.me.upgrade() else { return };
        if let Some(listener) = self.listener() {
            listener.connection_error(&me, error).await;
        }
    }

    /// Destroy this connection: close every cached statement and the
    /// physical connection, swallowing errors.
    pub(crate) async fn remove(&self) {
        self.statements.clear().await;
        if let Err(e) = self.physical.close().await {
            tracing::error!(connection_id = self.id, error = %e, "could not close connection");
        }
    }

    #[cfg(test)]
    pub(crate) async fn cached_statement_count(&self) -> usize {
        self.statements.len().await
    }

    #[cfg(test)]
    pub(crate) async fn has_cached_statement(&self, sql: &str) -> bool {
        self.statements.contains(sql).await
    }
}

/// Single-phase transactional resource facet.
///
/// Each pooled connection is its own branch: identity comparison is per
/// resource object so the transaction manager drives commit or rollback
/// on every enlisted connection.
#[async_trait]
impl TransactionalResource for ManagedConnection {
    fn resource_id(&self) -> Uuid {
        self.resource_id
    }

    async fn prepare(&self) -> Result<PrepareVote> {
        // No two-phase support on plain drivers.
        tracing::debug!(connection_id = self.id, "prepare vote");
        Ok(PrepareVote::Ok)
    }

    async fn commit(&self, one_phase: bool) -> Result<()> {
        tracing::debug!(connection_id = self.id, one_phase, "commit");
        if let Err(e) = self.physical.commit().await {
            tracing::error!(connection_id = self.id, error = %e, "cannot commit transaction");
            self.notify_error(&e).await;
            return Err(WellspringError::Transaction(format!("commit failed: {}", e)));
        }
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        tracing::debug!(connection_id = self.id, "rollback");
        if let Err(e) = self.physical.rollback().await {
            tracing::error!(connection_id = self.id, error = %e, "cannot rollback transaction");
            self.notify_error(&e).await;
            return Err(WellspringError::Transaction(format!("rollback failed: {}", e)));
        }
        Ok(())
    }
}

/// Completion facet: the transaction manager reports the outcome here,
/// which hands the connection back to the pool.
#[async_trait]
impl CompletionCallback for ManagedConnection {
    async fn after_completion(&self, status: TxStatus) {
        tracing::debug!(connection_id = self.id, ?status, "transaction completed");
        if self.tx().is_none() {
            tracing::error!(connection_id = self.id, "completion delivered with no bound transaction");
            return;
        }
        let Some(me) = self.me.upgrade() else { return };
        if let Some(listener) = self.listener() {
            listener.transaction_completed(&me).await;
        }
    }
}
