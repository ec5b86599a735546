//! Per-connection prepared-statement cache

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tokio::sync::Mutex;
use wellspring_core::{
    FetchDirection, PhysicalConnection, PhysicalStatement, Result, ResultSetConcurrency,
    ResultSetType, Value,
};

/// A cached prepared statement.
///
/// The entry stays in its connection's cache across logical closes so
/// the driver-side statement can be reused. `opened` tracks whether a
/// caller currently holds it; `dirty` tracks whether any mutator was
/// touched since the last reset, in which case reuse restores the driver
/// defaults first.
pub struct CachedStatement {
    sql: String,
    rs_type: ResultSetType,
    rs_concurrency: ResultSetConcurrency,
    physical: Box<dyn PhysicalStatement>,
    opened: AtomicBool,
    dirty: AtomicBool,
}

impl CachedStatement {
    fn new(
        sql: &str,
        rs_type: ResultSetType,
        rs_concurrency: ResultSetConcurrency,
        physical: Box<dyn PhysicalStatement>,
    ) -> Self {
        Self {
            sql: sql.to_string(),
            rs_type,
            rs_concurrency,
            physical,
            opened: AtomicBool::new(true),
            dirty: AtomicBool::new(false),
        }
    }

    /// The SQL text this statement was prepared from.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Result-set type requested when the statement was first prepared.
    ///
    /// The cache is keyed by SQL alone; a lookup can return an entry
    /// whose result-set options differ from the current request.
    pub fn result_set_type(&self) -> ResultSetType {
        self.rs_type
    }

    pub fn result_set_concurrency(&self) -> ResultSetConcurrency {
        self.rs_concurrency
    }

    /// Whether a caller currently holds this statement.
    pub fn is_open(&self) -> bool {
        self.opened.load(Ordering::SeqCst)
    }

    /// Execute with the given parameters.
    pub async fn execute(&self, params: &[Value]) -> Result<u64> {
        self.physical.execute(params).await
    }

    pub async fn set_fetch_direction(&self, direction: FetchDirection) -> Result<()> {
        self.dirty.store(true, Ordering::SeqCst);
        self.physical.set_fetch_direction(direction).await
    }

    pub async fn set_fetch_size(&self, rows: u32) -> Result<()> {
        self.dirty.store(true, Ordering::SeqCst);
        self.physical.set_fetch_size(rows).await
    }

    pub async fn set_max_field_size(&self, bytes: u32) -> Result<()> {
        self.dirty.store(true, Ordering::SeqCst);
        self.physical.set_max_field_size(bytes).await
    }

    pub async fn set_max_rows(&self, rows: u32) -> Result<()> {
        self.dirty.store(true, Ordering::SeqCst);
        self.physical.set_max_rows(rows).await
    }

    pub async fn set_query_timeout(&self, seconds: u32) -> Result<()> {
        self.dirty.store(true, Ordering::SeqCst);
        self.physical.set_query_timeout(seconds).await
    }

    pub async fn add_batch(&self, params: &[Value]) -> Result<()> {
        self.dirty.store(true, Ordering::SeqCst);
        self.physical.add_batch(params).await
    }

    pub(crate) fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    /// Mark logically closed. Returns true if it was open.
    pub(crate) fn mark_closed(&self) -> bool {
        self.opened.swap(false, Ordering::SeqCst)
    }

    /// Reset the statement for a new caller.
    ///
    /// Parameters and warnings are always cleared; if a mutator was
    /// touched, the batch is dropped and the five mutator properties go
    /// back to their driver defaults.
    pub(crate) async fn reuse(&self) -> Result<()> {
        self.physical.clear_parameters().await?;
        self.physical.clear_warnings().await?;
        self.opened.store(true, Ordering::SeqCst);
        if self.dirty.swap(false, Ordering::SeqCst) {
            tracing::debug!(sql = %self.sql, "statement properties were changed, restoring defaults");
            self.physical.clear_batch().await?;
            self.physical.set_fetch_direction(FetchDirection::Forward).await?;
            self.physical.set_max_field_size(0).await?;
            self.physical.set_max_rows(0).await?;
            self.physical.set_query_timeout(0).await?;
        }
        Ok(())
    }

    /// Physically close the driver statement, swallowing errors.
    pub(crate) async fn forget(&self) {
        if let Err(e) = self.physical.close().await {
            tracing::error!(sql = %self.sql, error = %e, "cannot close the prepared statement");
        }
    }
}

/// Bounded cache of prepared statements for one managed connection.
///
/// Serialized by its own lock, independent of the pool region. Entries
/// are keyed by SQL text; eviction only ever removes closed entries.
pub(crate) struct StatementCache {
    capacity: AtomicUsize,
    entries: Mutex<HashMap<String, Arc<CachedStatement>>>,
}

impl StatementCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: AtomicUsize::new(capacity),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::SeqCst)
    }

    pub fn set_capacity(&self, capacity: usize) {
        self.capacity.store(capacity, Ordering::SeqCst);
    }

    /// Look up or create a statement. Returns the entry and whether it
    /// was served from the cache.
    ///
    /// With a capacity of zero, caching is disabled and every call
    /// prepares a fresh driver statement.
    pub async fn prepare(
        &self,
        conn: &dyn PhysicalConnection,
        sql: &str,
        rs_type: ResultSetType,
        rs_concurrency: ResultSetConcurrency,
    ) -> Result<(Arc<CachedStatement>, bool)> {
        tracing::debug!(sql = %sql, "prepare");
        if self.capacity() == 0 {
            let physical = conn.prepare(sql, rs_type, rs_concurrency).await?;
            return Ok((
                Arc::new(CachedStatement::new(sql, rs_type, rs_concurrency, physical)),
                false,
            ));
        }

        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get(sql) {
            if entry.is_open() {
                tracing::warn!(sql = %sql, "reusing a prepared statement that is still open");
            }
            entry.reuse().await?;
            return Ok((Arc::clone(entry), true));
        }

        let physical = conn.prepare(sql, rs_type, rs_concurrency).await?;
        let entry = Arc::new(CachedStatement::new(sql, rs_type, rs_concurrency, physical));
        entries.insert(sql.to_string(), Arc::clone(&entry));
        Ok((entry, false))
    }

    /// A caller logically closed a statement.
    ///
    /// When the cache is at capacity the first closed entry found is
    /// evicted and physically closed; open entries are never evicted.
    pub async fn notify_closed(&self, stmt: &Arc<CachedStatement>) {
        stmt.mark_closed();
        let capacity = self.capacity();
        if capacity == 0 {
            // Nothing is cached, so the close is physical.
            stmt.forget().await;
            return;
        }

        let mut entries = self.entries.lock().await;
        if entries.len() >= capacity {
            let victim = entries
                .iter()
                .find(|(_, entry)| !entry.is_open())
                .map(|(sql, _)| sql.clone());
            if let Some(sql) = victim {
                if let Some(evicted) = entries.remove(&sql) {
                    tracing::debug!(sql = %sql, "evicting a closed statement from the cache");
                    evicted.forget().await;
                }
            }
        }
    }

    /// Logically close every statement still open. Returns how many were
    /// forced closed.
    pub async fn close_open_statements(&self) -> usize {
        let entries = self.entries.lock().await;
        let mut forced = 0;
        for entry in entries.values() {
            if entry.mark_closed() {
                tracing::warn!(sql = %entry.sql(), "statement should have been closed explicitly");
                forced += 1;
            }
        }
        forced
    }

    /// Physically close and drop every cached statement.
    pub async fn clear(&self) {
        let mut entries = self.entries.lock().await;
        for (_, entry) in entries.drain() {
            entry.forget().await;
        }
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    #[cfg(test)]
    pub async fn contains(&self, sql: &str) -> bool {
        self.entries.lock().await.contains_key(sql)
    }
}
