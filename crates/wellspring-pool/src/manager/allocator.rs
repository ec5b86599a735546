//! Connection manager: the pool allocator

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, Notify};
use wellspring_core::{
    CompletionCallback, ConnectOptions, DelistFlag, Driver, EnlistError, IsolationLevel, Result,
    TransactionHandle, TransactionManager, TransactionalResource, TxId, WellspringError,
};

use crate::config::{CheckLevel, DataSourceConfig, PoolConfig, NO_LIMIT};
use crate::managed::{ConnectionEventListener, ManagedConnection};
use crate::manager::handle::PooledConnection;
use crate::stats::{PoolCounters, PoolStats};

/// Cap on aged evictions per adjust pass, to bound the work done while
/// holding the pool region.
const MAX_REMOVE_FREELIST: usize = 10;

/// How a caller finished with a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Normal close; the connection can be pooled again.
    Normal,
    /// A fatal error occurred; the connection is destroyed.
    Error,
}

/// Result of a diagnostic probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    Passed,
    /// The probe statement failed with this error text.
    Failed(String),
}

/// Everything the pool arbitrates, guarded by one region.
struct PoolState {
    config: PoolConfig,
    /// Idle, untransacted connections ordered by (reuse_count, id).
    /// The warmest entry is acquired first; the coldest is evicted first.
    free: BTreeMap<(u64, u64), Arc<ManagedConnection>>,
    /// Every connection currently owned, idle or busy
    all: Vec<Arc<ManagedConnection>>,
    /// Connection reserved for each active transaction
    tx_map: HashMap<TxId, Arc<ManagedConnection>>,
    /// Callers currently parked waiting for a connection
    current_waiters: usize,
    counters: PoolCounters,
    closed: bool,
}

impl PoolState {
    fn current_busy(&self) -> usize {
        self.all.len() - self.free.len()
    }

    fn recompute_busy(&mut self) {
        let busy = self.current_busy();
        self.counters.recompute_busy(busy);
    }

    fn take_free_newest(&mut self) -> Option<Arc<ManagedConnection>> {
        let key = *self.free.keys().next_back()?;
        self.free.remove(&key)
    }

    fn insert_free(&mut self, mc: &Arc<ManagedConnection>) {
        self.free.insert(mc.free_key(), Arc::clone(mc));
    }
}

/// Manages a pool of database connections for one data source.
///
/// All acquisitions within one transaction yield the same underlying
/// connection; idle connections are kept warm between `pool_min` and
/// `pool_max`; callers beyond the cap wait up to the configured budget.
pub struct ConnectionManager {
    datasource: DataSourceConfig,
    driver: Arc<dyn Driver>,
    tm: Arc<dyn TransactionManager>,
    state: Mutex<PoolState>,
    /// Signalled once per released or destroyed connection
    available: Notify,
    next_id: AtomicU64,
}

impl ConnectionManager {
    /// Create a pool. Configuration errors are fatal.
    ///
    /// The pool opens lazily; call [`adjust`](Self::adjust) (or let the
    /// maintenance task run) to warm it to `pool_min`.
    pub fn new(
        datasource: DataSourceConfig,
        config: PoolConfig,
        driver: Arc<dyn Driver>,
        tm: Arc<dyn TransactionManager>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        tracing::info!(
            pool = %datasource.name,
            url = %datasource.url,
            driver = %driver.name(),
            "creating connection manager"
        );
        Ok(Arc::new(Self {
            datasource,
            driver,
            tm,
            state: Mutex::new(PoolState {
                config,
                free: BTreeMap::new(),
                all: Vec::new(),
                tx_map: HashMap::new(),
                current_waiters: 0,
                counters: PoolCounters::default(),
                closed: false,
            }),
            available: Notify::new(),
            next_id: AtomicU64::new(0),
        }))
    }

    /// Name this pool is published under.
    pub fn name(&self) -> &str {
        &self.datasource.name
    }

    /// The data-source identity this pool draws from.
    pub fn datasource(&self) -> &DataSourceConfig {
        &self.datasource
    }

    // -----------------------------------------------------------------
    // Consumer surface
    // -----------------------------------------------------------------

    /// Get a pooled connection, enlisting it in the ambient transaction
    /// if one exists.
    pub async fn get_connection(self: &Arc<Self>) -> Result<PooledConnection> {
        self.get_connection_as(None, None).await
    }

    /// Get a pooled connection on behalf of the given user.
    ///
    /// Pooled connections are always opened with the configured
    /// credentials; the user is advisory.
    pub async fn get_connection_as(
        self: &Arc<Self>,
        user: Option<&str>,
        password: Option<&str>,
    ) -> Result<PooledConnection> {
        let _ = password;
        let tx = self.tm.current_transaction();
        tracing::debug!(pool = %self.datasource.name, in_tx = tx.is_some(), "connection requested");

        let mc = self.acquire(user, tx.as_ref()).await?;

        if let Some(tx) = tx {
            // Enlist only on the first hold; later acquires in the same
            // transaction ride the existing enlistment. The binding can
            // already be gone when the transaction completed under us.
            if mc.hold_count() == 1 {
                if mc.tx().is_some() {
                    self.enlist(&tx, &mc).await?;
                } else if let Err(e) = mc.physical().set_auto_commit(true).await {
                    tracing::warn!(connection_id = mc.id(), error = %e, "could not turn autocommit on");
                }
            }
        } else if let Err(e) = mc.physical().set_auto_commit(true).await {
            tracing::warn!(connection_id = mc.id(), error = %e, "could not turn autocommit on");
        }

        Ok(PooledConnection::new(mc, Arc::clone(self)))
    }

    /// Open a fresh, unpooled managed connection for explicit XA use.
    ///
    /// The connection is not registered with the pool; the caller owns
    /// its lifetime.
    pub async fn get_xa_connection(self: &Arc<Self>) -> Result<Arc<ManagedConnection>> {
        self.get_xa_connection_as(None, None).await
    }

    /// Open a fresh, unpooled managed connection with the given
    /// credentials.
    pub async fn get_xa_connection_as(
        self: &Arc<Self>,
        user: Option<&str>,
        password: Option<&str>,
    ) -> Result<Arc<ManagedConnection>> {
        let config = self.state.lock().await.config.clone();
        self.open_managed(&config, user, password, false).await
    }

    async fn enlist(
        self: &Arc<Self>,
        tx: &Arc<dyn TransactionHandle>,
        mc: &Arc<ManagedConnection>,
    ) -> Result<()> {
        tracing::debug!(tx = %tx.id(), connection_id = mc.id(), "enlisting resource");
        let resource: Arc<dyn TransactionalResource> = Arc::clone(mc) as Arc<dyn TransactionalResource>;
        match tx.enlist(resource) {
            Ok(()) => {
                if let Err(e) = mc.physical().set_auto_commit(false).await {
                    tracing::warn!(connection_id = mc.id(), error = %e, "could not turn autocommit off");
                }
            }
            Err(EnlistError::RollbackOnly) => {
                // The resource is enlisted; the mark only dooms the outcome.
                tracing::warn!(
                    pool = %self.datasource.name,
                    "resource enlisted, but transaction is marked rollback-only"
                );
            }
            Err(EnlistError::AlreadyCompleted) => {
                tracing::warn!(
                    pool = %self.datasource.name,
                    "transaction already committed, serving an untransacted connection"
                );
                if let Err(e) = mc.physical().set_auto_commit(true).await {
                    tracing::warn!(connection_id = mc.id(), error = %e, "could not turn autocommit on");
                }
                self.clear_tx_binding(tx.id(), mc).await;
            }
            Err(EnlistError::Failed(msg)) => {
                tracing::error!(pool = %self.datasource.name, error = %msg, "cannot enlist resource");
                self.clear_tx_binding(tx.id(), mc).await;
                self.release(mc, Disposition::Normal).await;
                return Err(WellspringError::Transaction(msg));
            }
        }
        Ok(())
    }

    async fn clear_tx_binding(&self, tx: TxId, mc: &Arc<ManagedConnection>) {
        let mut state = self.state.lock().await;
        if let Some(bound) = state.tx_map.get(&tx) {
            if bound.id() == mc.id() {
                state.tx_map.remove(&tx);
            }
        }
        mc.set_tx(None);
    }

    // -----------------------------------------------------------------
    // Pool allocator
    // -----------------------------------------------------------------

    /// Reserve a connection for the caller.
    ///
    /// Within a transaction every acquire returns the same connection.
    /// Otherwise the warmest free connection is validated and returned,
    /// the pool expands below its cap, or the caller waits for a release
    /// within the configured budget.
    #[tracing::instrument(level = "debug", skip_all, fields(pool = %self.datasource.name, user = user.unwrap_or_default()))]
    pub async fn acquire(
        self: &Arc<Self>,
        user: Option<&str>,
        tx: Option<&Arc<dyn TransactionHandle>>,
    ) -> Result<Arc<ManagedConnection>> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(WellspringError::Connection(format!(
                "pool {} is shut down",
                self.datasource.name
            )));
        }

        // Affinity fast path: a transaction reuses its bound connection.
        if let Some(tx) = tx {
            if let Some(mc) = state.tx_map.get(&tx.id()).cloned() {
                tracing::debug!(connection_id = mc.id(), "reusing the connection bound to this transaction");
                mc.hold(state.config.max_open_time());
                state.counters.served += 1;
                return Ok(mc);
            }
        }

        let mut started_waiting: Option<Instant> = None;
        let mc = loop {
            // Free path: warmest statement cache first.
            if let Some(candidate) = state.take_free_newest() {
                match self.validate(&candidate, &state.config).await {
                    Ok(()) => break candidate,
                    Err(e) => {
                        tracing::warn!(connection_id = candidate.id(), error = %e, "removing an invalid connection");
                        self.destroy_item(&mut state, &candidate).await;
                        // A dead connection costs the pool, not the caller:
                        // the wait budget starts over.
                        started_waiting = None;
                        continue;
                    }
                }
            }

            // Expand path.
            if state.all.len() < state.config.pool_max() {
                let config = state.config.clone();
                match self.open_managed(&config, None, None, true).await {
                    Ok(mc) => {
                        state.counters.opened += 1;
                        state.all.push(Arc::clone(&mc));
                        tracing::debug!(connection_id = mc.id(), open = state.all.len(), "opened a new connection");
                        break mc;
                    }
                    Err(e) => {
                        state.counters.connection_failures += 1;
                        state.counters.rejected_other += 1;
                        tracing::warn!(error = %e, "cannot open a new connection");
                        return Err(e);
                    }
                }
            }

            // Wait path: park until a release or the residual budget ends.
            let residual = match started_waiting {
                None => state.config.waiter_timeout(),
                Some(since) => state.config.waiter_timeout().saturating_sub(since.elapsed()),
            };
            if !residual.is_zero() && state.current_waiters < state.config.max_waiters() {
                state.current_waiters += 1;
                if state.counters.waiter_count < state.current_waiters {
                    state.counters.waiter_count = state.current_waiters;
                }
                let since = *started_waiting.get_or_insert_with(Instant::now);
                tracing::debug!(open = state.all.len(), waiters = state.current_waiters, "waiting for a free connection");

                let mut notified = Box::pin(self.available.notified());
                notified.as_mut().enable();
                drop(state);
                let _ = tokio::time::timeout(residual, notified).await;
                state = self.state.lock().await;

                state.current_waiters -= 1;
                let waited = since.elapsed();
                let exhausted = state.config.waiter_timeout().saturating_sub(waited).is_zero();
                if exhausted || !state.free.is_empty() || state.all.len() < state.config.pool_max()
                {
                    // Spurious wakes with nothing on offer are not counted.
                    state.counters.record_wait(waited);
                }
                if state.closed {
                    return Err(WellspringError::Connection(format!(
                        "pool {} is shut down",
                        self.datasource.name
                    )));
                }
                continue;
            }

            // Reject path.
            return Err(if started_waiting.is_some() {
                state.counters.rejected_timeout += 1;
                tracing::warn!("cannot serve a connection: timed out");
                WellspringError::AcquireTimeout(format!(
                    "no connection became available in {}",
                    self.datasource.name
                ))
            } else {
                state.counters.rejected_full += 1;
                tracing::warn!("cannot serve a connection: pool is full");
                WellspringError::PoolExhausted(format!(
                    "no more connections in {}",
                    self.datasource.name
                ))
            });
        };

        state.recompute_busy();
        mc.set_tx(tx.map(|t| t.id()));
        if let Some(tx) = tx {
            let callback: Arc<dyn CompletionCallback> = Arc::clone(&mc) as Arc<dyn CompletionCallback>;
            match tx.register_completion(callback) {
                Ok(()) => {
                    state.tx_map.insert(tx.id(), Arc::clone(&mc));
                }
                Err(EnlistError::AlreadyCompleted) => {
                    tracing::warn!(tx = %tx.id(), "transaction already completed, serving untransacted");
                    mc.set_tx(None);
                }
                Err(e) => {
                    // Without a completion callback nothing would ever free
                    // this connection, so the binding is dropped.
                    tracing::warn!(tx = %tx.id(), error = %e, "cannot register for completion, serving untransacted");
                    mc.set_tx(None);
                }
            }
        }
        mc.hold(state.config.max_open_time());
        state.counters.served += 1;
        Ok(mc)
    }

    async fn validate(&self, mc: &Arc<ManagedConnection>, config: &PoolConfig) -> Result<()> {
        match config.check_level() {
            CheckLevel::None => Ok(()),
            CheckLevel::Physical => {
                if mc.physical().is_closed() {
                    Err(WellspringError::Connection(
                        "physical connection has been closed".into(),
                    ))
                } else {
                    Ok(())
                }
            }
            CheckLevel::Probe => {
                if mc.physical().is_closed() {
                    return Err(WellspringError::Connection(
                        "physical connection has been closed".into(),
                    ));
                }
                let sql = config.test_statement().ok_or_else(|| {
                    WellspringError::Configuration("no test statement configured".into())
                })?;
                mc.physical().execute(sql).await?;
                Ok(())
            }
        }
    }

    /// The caller finished with a connection.
    ///
    /// An untransacted connection returns to the free set once its last
    /// hold drops; a transacted one stays parked for its transaction. An
    /// error disposition destroys the connection outright.
    #[tracing::instrument(level = "debug", skip_all, fields(pool = %self.datasource.name, connection_id = mc.id()))]
    pub async fn release(&self, mc: &Arc<ManagedConnection>, disposition: Disposition) {
        {
            let mut state = self.state.lock().await;
            if !mc.release_hold() {
                return;
            }
            match disposition {
                Disposition::Normal => {
                    if mc.tx().is_some() {
                        tracing::debug!("keeping the connection for its transaction");
                    } else if !mc.is_open() {
                        self.free_item(&mut state, mc);
                    }
                }
                Disposition::Error => {
                    tracing::warn!("destroying the connection after an error");
                    if let Some(tx) = mc.tx() {
                        state.tx_map.remove(&tx);
                        mc.set_tx(None);
                    }
                    self.destroy_item(&mut state, mc).await;
                }
            }
        }

        // Delist from the ambient transaction once fully released.
        if !mc.is_open() {
            if let Some(tx) = self.tm.current_transaction() {
                let flag = match disposition {
                    Disposition::Normal => DelistFlag::Success,
                    Disposition::Error => DelistFlag::Fail,
                };
                let resource: Arc<dyn TransactionalResource> = Arc::clone(mc) as Arc<dyn TransactionalResource>;
                if let Err(e) = tx.delist(resource, flag) {
                    tracing::error!(error = %e, "exception while delisting resource");
                }
            }
        }
    }

    /// A transaction completed; its connection can serve other callers.
    #[tracing::instrument(level = "debug", skip(self), fields(pool = %self.datasource.name))]
    pub async fn free_after_tx(&self, tx: TxId) {
        let mut state = self.state.lock().await;
        let Some(mc) = state.tx_map.remove(&tx) else {
            tracing::error!(tx = %tx, "no connection bound to the completed transaction");
            return;
        };
        mc.set_tx(None);
        if mc.is_open() {
            // The caller has not released yet; its release will park the
            // connection normally.
            tracing::debug!(connection_id = mc.id(), "connection not yet closed by its caller");
            return;
        }
        self.free_item(&mut state, &mc);
    }

    fn free_item(&self, state: &mut PoolState, mc: &Arc<ManagedConnection>) {
        state.insert_free(mc);
        tracing::debug!(connection_id = mc.id(), free = state.free.len(), "connection returned to the free set");
        if state.current_waiters > 0 {
            self.available.notify_one();
        }
        state.recompute_busy();
    }

    async fn destroy_item(&self, state: &mut PoolState, mc: &Arc<ManagedConnection>) {
        state.free.remove(&mc.free_key());
        state.all.retain(|c| c.id() != mc.id());
        mc.remove().await;
        if state.current_waiters > 0 {
            self.available.notify_one();
        }
        state.recompute_busy();
    }

    // -----------------------------------------------------------------
    // Maintenance
    // -----------------------------------------------------------------

    /// Adjust the pool: evict aged idle connections, reclaim leaks,
    /// shrink after a lowered cap, and grow back to `pool_min`.
    pub async fn adjust(self: &Arc<Self>) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Ok(());
        }
        self.adjust_locked(&mut state).await
    }

    async fn adjust_locked(self: &Arc<Self>, state: &mut PoolState) -> Result<()> {
        tracing::debug!(pool = %self.datasource.name, open = state.all.len(), free = state.free.len(), "adjust");

        // Evict aged idle connections, bounded per pass. When the pool
        // sits at its floor, an aged connection is still replaced by a
        // fresh one below.
        let margin = state.all.len() as i64 - state.config.pool_min() as i64;
        if margin >= 0 {
            let budget = (margin as usize).clamp(1, MAX_REMOVE_FREELIST);
            let aged: Vec<Arc<ManagedConnection>> = state
                .free
                .values()
                .filter(|mc| mc.is_aged())
                .take(budget)
                .cloned()
                .collect();
            for mc in aged {
                tracing::debug!(connection_id = mc.id(), "removing an aged idle connection");
                self.destroy_item(state, &mc).await;
            }
        }
        state.recompute_busy();

        // Reclaim leaked connections: held, untransacted, past deadline.
        let leaked: Vec<Arc<ManagedConnection>> =
            state.all.iter().filter(|mc| mc.inactive()).cloned().collect();
        for mc in leaked {
            tracing::warn!(connection_id = mc.id(), "closing a connection held open too long");
            self.destroy_item(state, &mc).await;
            state.counters.connection_leaks += 1;
        }

        // Shrink after an admin lowered the cap.
        if !state.config.is_unbounded() {
            while state.free.len() > state.config.pool_min()
                && state.all.len() > state.config.pool_max()
            {
                let key = *state.free.keys().next().expect("free set is non-empty");
                let mc = state.free.remove(&key).expect("key just observed");
                tracing::debug!(connection_id = mc.id(), "shrinking the pool below the new cap");
                self.destroy_item(state, &mc).await;
            }
        }
        state.recompute_busy();

        // Keep pool_min connections warm.
        while state.all.len() < state.config.pool_min() {
            let config = state.config.clone();
            let mc = self
                .open_managed(&config, None, None, true)
                .await
                .map_err(|e| {
                    WellspringError::Configuration(format!(
                        "could not keep {} connections warm in {}: {}",
                        config.pool_min(),
                        self.datasource.name,
                        e
                    ))
                })?;
            state.counters.opened += 1;
            state.all.push(Arc::clone(&mc));
            state.insert_free(&mc);
        }
        Ok(())
    }

    /// Roll the period counters into their "recent" snapshots.
    pub async fn sample(&self) {
        let mut state = self.state.lock().await;
        let busy = state.current_busy();
        state.counters.sample(busy);
    }

    /// Run `sample` and `adjust` every sampling period until shutdown.
    pub fn spawn_maintenance(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let pool = Arc::clone(self);
        tokio::spawn(async move {
            let period = pool.state.lock().await.config.sampling_period();
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if pool.state.lock().await.closed {
                    break;
                }
                pool.sample().await;
                if let Err(e) = pool.adjust().await {
                    tracing::error!(pool = %pool.datasource.name, error = %e, "pool maintenance failed");
                }
            }
        })
    }

    // -----------------------------------------------------------------
    // Reconfiguration
    // -----------------------------------------------------------------

    /// Change the minimum pool size, growing immediately if needed.
    pub async fn set_pool_min(self: &Arc<Self>, min: usize) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.config.pool_min() != min {
            state.config.set_pool_min(min);
            self.adjust_locked(&mut state).await?;
        }
        Ok(())
    }

    /// Change the maximum pool size.
    ///
    /// Raising the cap wakes a parked waiter so it can expand; lowering
    /// it shrinks the free set down to the new cap.
    pub async fn set_pool_max(self: &Arc<Self>, max: usize) -> Result<()> {
        let mut state = self.state.lock().await;
        let old = state.config.pool_max();
        let new = max.min(NO_LIMIT);
        if old == new {
            return Ok(());
        }
        if new > old && state.current_waiters > 0 {
            self.available.notify_one();
        }
        state.config.set_pool_max(new);
        if new < NO_LIMIT {
            self.adjust_locked(&mut state).await?;
        }
        Ok(())
    }

    /// Replace the pool configuration, preserving invariants.
    pub async fn configure(self: &Arc<Self>, config: PoolConfig) -> Result<()> {
        config.validate()?;
        let mut state = self.state.lock().await;
        tracing::info!(pool = %self.datasource.name, "reconfiguring pool");
        if config.pool_max() > state.config.pool_max() && state.current_waiters > 0 {
            self.available.notify_one();
        }
        if config.pstmt_max() != state.config.pstmt_max() {
            for mc in &state.all {
                mc.set_statement_capacity(config.pstmt_max());
            }
        }
        state.config = config;
        self.adjust_locked(&mut state).await
    }

    /// Current pool configuration.
    pub async fn config(&self) -> PoolConfig {
        self.state.lock().await.config.clone()
    }

    // -----------------------------------------------------------------
    // Diagnostics
    // -----------------------------------------------------------------

    /// Probe the data source with the given statement.
    ///
    /// A free, physically open connection is borrowed for the probe when
    /// one exists; otherwise a scratch connection is opened and closed
    /// around it. A failing probe is reported in the outcome, not as an
    /// error; errors are reserved for not being able to probe at all.
    pub async fn check_connection(&self, sql: &str) -> Result<CheckOutcome> {
        let candidate = {
            let state = self.state.lock().await;
            state
                .free
                .values()
                .find(|mc| !mc.physical().is_closed())
                .cloned()
        };

        if let Some(mc) = candidate {
            tracing::debug!(connection_id = mc.id(), sql = %sql, "probing on a free connection");
            return Ok(match mc.physical().execute(sql).await {
                Ok(_) => CheckOutcome::Passed,
                Err(e) => CheckOutcome::Failed(e.to_string()),
            });
        }

        tracing::debug!(sql = %sql, "opening a scratch connection for the probe");
        let opts = self.connect_options(None, None);
        let conn = self.driver.connect(&opts).await.map_err(|e| {
            tracing::error!(url = %self.datasource.url, error = %e, "could not open a connection to probe");
            e
        })?;
        let outcome = match conn.execute(sql).await {
            Ok(_) => CheckOutcome::Passed,
            Err(e) => CheckOutcome::Failed(e.to_string()),
        };
        if let Err(e) = conn.close().await {
            tracing::warn!(error = %e, "could not close the scratch connection");
        }
        Ok(outcome)
    }

    /// Export this pool's configuration as a name-bindable reference.
    pub async fn reference(&self) -> crate::reference::PoolReference {
        let state = self.state.lock().await;
        crate::reference::PoolReference::from_configs(&self.datasource, &state.config)
    }

    /// Point-in-time statistics snapshot.
    pub async fn stats(&self) -> PoolStats {
        let state = self.state.lock().await;
        let c = &state.counters;
        PoolStats {
            taken_at: Utc::now(),
            current_open: state.all.len(),
            current_busy: state.current_busy(),
            current_free: state.free.len(),
            current_in_tx: state.tx_map.len(),
            current_waiters: state.current_waiters,
            opened: c.opened,
            served: c.served,
            connection_failures: c.connection_failures,
            connection_leaks: c.connection_leaks,
            rejected_full: c.rejected_full,
            rejected_timeout: c.rejected_timeout,
            rejected_other: c.rejected_other,
            total_waiters: c.total_waiters,
            total_waiting: c.total_waiting,
            waiting_high: c.waiting_high,
            waiting_high_recent: c.waiting_high_recent,
            waiters_high: c.waiters_high,
            waiters_high_recent: c.waiters_high_recent,
            busy_max_recent: c.busy_max_recent,
            busy_min_recent: c.busy_min_recent,
        }
    }

    /// Destroy every managed connection and refuse further acquires.
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        if state.closed {
            return;
        }
        state.closed = true;
        tracing::info!(pool = %self.datasource.name, count = state.all.len(), "shutting down pool");
        let all = std::mem::take(&mut state.all);
        state.free.clear();
        state.tx_map.clear();
        for mc in all {
            mc.remove().await;
        }
        self.available.notify_waiters();
    }

    // -----------------------------------------------------------------
    // Physical opens
    // -----------------------------------------------------------------

    fn connect_options(&self, user: Option<&str>, password: Option<&str>) -> ConnectOptions {
        let username = user.unwrap_or(&self.datasource.username);
        let password = password.unwrap_or(&self.datasource.password);
        let mut opts = ConnectOptions::new(&self.datasource.url);
        if !username.is_empty() {
            opts = opts.with_credentials(username, password);
        }
        opts
    }

    async fn open_managed(
        self: &Arc<Self>,
        config: &PoolConfig,
        user: Option<&str>,
        password: Option<&str>,
        pooled: bool,
    ) -> Result<Arc<ManagedConnection>> {
        let opts = self.connect_options(user, password);
        let physical = self.driver.connect(&opts).await.map_err(|e| {
            tracing::error!(url = %self.datasource.url, error = %e, "could not open a connection");
            e
        })?;

        // Depending on the database this may not succeed.
        if self.datasource.isolation != IsolationLevel::Default {
            if let Err(e) = physical.set_isolation(self.datasource.isolation).await {
                tracing::error!(
                    isolation = %self.datasource.isolation,
                    url = %self.datasource.url,
                    error = %e,
                    "cannot set the transaction isolation for this data source"
                );
            }
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mc = ManagedConnection::new(id, physical, config.max_age(), config.pstmt_max());
        if pooled {
            let listener: Weak<dyn ConnectionEventListener> = Arc::downgrade(self) as Weak<dyn ConnectionEventListener>;
            mc.set_listener(listener);
        }
        tracing::debug!(connection_id = id, url = %self.datasource.url, "new physical connection");
        Ok(mc)
    }
}

#[async_trait]
impl ConnectionEventListener for ConnectionManager {
    async fn connection_closed(&self, mc: &Arc<ManagedConnection>) {
        self.release(mc, Disposition::Normal).await;
    }

    async fn connection_error(&self, mc: &Arc<ManagedConnection>, error: &WellspringError) {
        tracing::debug!(connection_id = mc.id(), error = %error, "connection reported an error");
        self.release(mc, Disposition::Error).await;
    }

    async fn transaction_completed(&self, mc: &Arc<ManagedConnection>) {
        match mc.tx() {
            Some(tx) => self.free_after_tx(tx).await,
            None => tracing::error!(connection_id = mc.id(), "completion event without a transaction"),
        }
    }
}
