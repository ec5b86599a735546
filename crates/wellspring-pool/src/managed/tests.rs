//! Tests for managed connections and the statement cache

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use wellspring_core::{
    FetchDirection, IsolationLevel, PhysicalConnection, PhysicalStatement, Result,
    ResultSetConcurrency, ResultSetType, Value, WellspringError,
};

use super::ManagedConnection;

/// Observable state of a mock driver statement.
#[derive(Default)]
struct StmtProbe {
    log: Mutex<Vec<String>>,
    closed: AtomicBool,
}

impl StmtProbe {
    fn log_contains(&self, entry: &str) -> bool {
        self.log.lock().iter().any(|l| l == entry)
    }
}

struct MockStatement {
    probe: Arc<StmtProbe>,
}

#[async_trait]
impl PhysicalStatement for MockStatement {
    async fn execute(&self, _params: &[Value]) -> Result<u64> {
        self.probe.log.lock().push("execute".into());
        Ok(1)
    }

    async fn set_fetch_direction(&self, direction: FetchDirection) -> Result<()> {
        self.probe
            .log
            .lock()
            .push(format!("fetch_direction={:?}", direction));
        Ok(())
    }

    async fn set_fetch_size(&self, rows: u32) -> Result<()> {
        self.probe.log.lock().push(format!("fetch_size={}", rows));
        Ok(())
    }

    async fn set_max_field_size(&self, bytes: u32) -> Result<()> {
        self.probe
            .log
            .lock()
            .push(format!("max_field_size={}", bytes));
        Ok(())
    }

    async fn set_max_rows(&self, rows: u32) -> Result<()> {
        self.probe.log.lock().push(format!("max_rows={}", rows));
        Ok(())
    }

    async fn set_query_timeout(&self, seconds: u32) -> Result<()> {
        self.probe
            .log
            .lock()
            .push(format!("query_timeout={}", seconds));
        Ok(())
    }

    async fn add_batch(&self, _params: &[Value]) -> Result<()> {
        self.probe.log.lock().push("add_batch".into());
        Ok(())
    }

    async fn clear_batch(&self) -> Result<()> {
        self.probe.log.lock().push("clear_batch".into());
        Ok(())
    }

    async fn clear_parameters(&self) -> Result<()> {
        self.probe.log.lock().push("clear_parameters".into());
        Ok(())
    }

    async fn clear_warnings(&self) -> Result<()> {
        self.probe.log.lock().push("clear_warnings".into());
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.probe.closed.store(true, Ordering::SeqCst);
        self.probe.log.lock().push("close".into());
        Ok(())
    }
}

/// Observable state of a mock physical connection, shared with the test.
#[derive(Default)]
struct ConnProbe {
    closed: AtomicBool,
    prepare_count: AtomicUsize,
    prepared: Mutex<Vec<(String, Arc<StmtProbe>)>>,
}

impl ConnProbe {
    fn probe_for(&self, sql: &str) -> Option<Arc<StmtProbe>> {
        self.prepared
            .lock()
            .iter()
            .rev()
            .find(|(s, _)| s == sql)
            .map(|(_, p)| Arc::clone(p))
    }
}

struct MockConnection {
    probe: Arc<ConnProbe>,
}

#[async_trait]
impl PhysicalConnection for MockConnection {
    async fn set_auto_commit(&self, _enabled: bool) -> Result<()> {
        Ok(())
    }

    async fn set_isolation(&self, _level: IsolationLevel) -> Result<()> {
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        Ok(())
    }

    async fn execute(&self, _sql: &str) -> Result<u64> {
        Ok(0)
    }

    async fn prepare(
        &self,
        sql: &str,
        _rs_type: ResultSetType,
        _rs_concurrency: ResultSetConcurrency,
    ) -> Result<Box<dyn PhysicalStatement>> {
        if self.is_closed() {
            return Err(WellspringError::Connection("mock connection closed".into()));
        }
        self.probe.prepare_count.fetch_add(1, Ordering::SeqCst);
        let probe = Arc::new(StmtProbe::default());
        self.probe
            .prepared
            .lock()
            .push((sql.to_string(), Arc::clone(&probe)));
        Ok(Box::new(MockStatement { probe }))
    }

    async fn close(&self) -> Result<()> {
        self.probe.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.probe.closed.load(Ordering::SeqCst)
    }
}

fn managed(pstmt_max: usize) -> (Arc<ManagedConnection>, Arc<ConnProbe>) {
    managed_aged(pstmt_max, Duration::from_secs(3600))
}

fn managed_aged(pstmt_max: usize, max_age: Duration) -> (Arc<ManagedConnection>, Arc<ConnProbe>) {
    let probe = Arc::new(ConnProbe::default());
    let conn = MockConnection {
        probe: Arc::clone(&probe),
    };
    let mc = ManagedConnection::new(7, Box::new(conn), max_age, pstmt_max);
    (mc, probe)
}

// =============================================================================
// Hold counting and deadlines
// =============================================================================

#[tokio::test]
async fn test_hold_and_release() {
    let (mc, _) = managed(4);
    assert!(!mc.is_open());

    mc.hold(Duration::from_secs(60));
    assert!(mc.is_open());
    assert_eq!(mc.hold_count(), 1);

    assert!(mc.release_hold());
    assert!(!mc.is_open());

    // Double release is clamped and reported.
    assert!(!mc.release_hold());
    assert_eq!(mc.hold_count(), 0);
}

#[tokio::test]
async fn test_multiple_holds_require_a_transaction() {
    let (mc, _) = managed(4);
    mc.set_tx(Some(uuid::Uuid::new_v4()));
    mc.hold(Duration::from_secs(60));
    mc.hold(Duration::from_secs(60));
    assert_eq!(mc.hold_count(), 2);

    assert!(mc.release_hold());
    assert_eq!(mc.hold_count(), 1);
    assert!(mc.release_hold());
    assert_eq!(mc.hold_count(), 0);
}

#[tokio::test]
async fn test_untransacted_hold_overflow_is_clamped() {
    let (mc, _) = managed(4);
    mc.hold(Duration::from_secs(60));
    mc.hold(Duration::from_secs(60));

    // The first release detects the overflow and zeroes the counter.
    assert!(mc.release_hold());
    assert_eq!(mc.hold_count(), 0);
}

#[tokio::test]
async fn test_is_aged() {
    let (young, _) = managed(4);
    assert!(!young.is_aged());

    let (old, _) = managed_aged(4, Duration::ZERO);
    tokio::time::sleep(Duration::from_millis(5)).await;
    assert!(old.is_aged());
}

#[tokio::test]
async fn test_inactive_leak_predicate() {
    let (mc, _) = managed(4);

    // Held, untransacted, past its deadline: leaked.
    mc.hold(Duration::from_millis(10));
    tokio::time::sleep(Duration::from_millis(40)).await;
    assert!(mc.inactive());

    // The same state inside a transaction is not a leak.
    mc.set_tx(Some(uuid::Uuid::new_v4()));
    assert!(!mc.inactive());
    mc.set_tx(None);
    assert!(mc.inactive());

    // Released connections are never leaked.
    assert!(mc.release_hold());
    assert!(!mc.inactive());
}

// =============================================================================
// Statement cache
// =============================================================================

#[tokio::test]
async fn test_cache_hit_reuses_and_counts() {
    let (mc, conn) = managed(4);

    let stmt = mc
        .prepare_statement("SELECT 1", ResultSetType::ForwardOnly, ResultSetConcurrency::ReadOnly)
        .await
        .expect("prepare");
    assert_eq!(mc.reuse_count(), 0);
    mc.notify_statement_closed(&stmt).await;

    let again = mc
        .prepare_statement("SELECT 1", ResultSetType::ForwardOnly, ResultSetConcurrency::ReadOnly)
        .await
        .expect("prepare again");
    assert_eq!(mc.reuse_count(), 1);
    assert_eq!(conn.prepare_count.load(Ordering::SeqCst), 1);
    assert!(again.is_open());

    // Clean reuse clears parameters and warnings but leaves defaults alone.
    let probe = conn.probe_for("SELECT 1").expect("probe");
    assert!(probe.log_contains("clear_parameters"));
    assert!(probe.log_contains("clear_warnings"));
    assert!(!probe.log_contains("clear_batch"));
}

#[tokio::test]
async fn test_dirty_statement_reset_on_reuse() {
    let (mc, conn) = managed(4);

    let stmt = mc
        .prepare_statement("SELECT 1", ResultSetType::ForwardOnly, ResultSetConcurrency::ReadOnly)
        .await
        .expect("prepare");
    stmt.set_fetch_size(500).await.expect("fetch size");
    stmt.set_max_rows(10).await.expect("max rows");
    assert!(stmt.is_dirty());
    mc.notify_statement_closed(&stmt).await;

    mc.prepare_statement("SELECT 1", ResultSetType::ForwardOnly, ResultSetConcurrency::ReadOnly)
        .await
        .expect("reuse");

    let probe = conn.probe_for("SELECT 1").expect("probe");
    assert!(probe.log_contains("clear_batch"));
    assert!(probe.log_contains("fetch_direction=Forward"));
    assert!(probe.log_contains("max_field_size=0"));
    assert!(probe.log_contains("max_rows=0"));
    assert!(probe.log_contains("query_timeout=0"));
    assert!(!stmt.is_dirty());
}

#[tokio::test]
async fn test_eviction_removes_only_closed_entries() {
    let (mc, conn) = managed(2);

    let a = mc
        .prepare_statement("A", ResultSetType::ForwardOnly, ResultSetConcurrency::ReadOnly)
        .await
        .expect("prepare A");
    mc.notify_statement_closed(&a).await;

    let b = mc
        .prepare_statement("B", ResultSetType::ForwardOnly, ResultSetConcurrency::ReadOnly)
        .await
        .expect("prepare B");
    // Closing B fills the cache to capacity and evicts one closed entry.
    mc.notify_statement_closed(&b).await;
    assert_eq!(mc.cached_statement_count().await, 1);

    mc.prepare_statement("C", ResultSetType::ForwardOnly, ResultSetConcurrency::ReadOnly)
        .await
        .expect("prepare C");
    assert_eq!(mc.cached_statement_count().await, 2);
    assert!(mc.has_cached_statement("C").await);

    // The evicted statement was closed at eviction time, and closed
    // physically.
    let survivor_is_a = mc.has_cached_statement("A").await;
    let evicted = if survivor_is_a { "B" } else { "A" };
    let evicted_probe = conn.probe_for(evicted).expect("evicted probe");
    assert!(evicted_probe.closed.load(Ordering::SeqCst));

    // Reusing the survivor bumps the connection's reuse count.
    let survivor = if survivor_is_a { "A" } else { "B" };
    mc.prepare_statement(survivor, ResultSetType::ForwardOnly, ResultSetConcurrency::ReadOnly)
        .await
        .expect("reuse survivor");
    assert_eq!(mc.reuse_count(), 1);
}

#[tokio::test]
async fn test_open_entries_are_never_evicted() {
    let (mc, conn) = managed(1);

    let a = mc
        .prepare_statement("A", ResultSetType::ForwardOnly, ResultSetConcurrency::ReadOnly)
        .await
        .expect("prepare A");
    // A stays open; the cache grows past capacity on the miss.
    let b = mc
        .prepare_statement("B", ResultSetType::ForwardOnly, ResultSetConcurrency::ReadOnly)
        .await
        .expect("prepare B");
    assert_eq!(mc.cached_statement_count().await, 2);

    mc.notify_statement_closed(&b).await;
    // B is the only closed entry, so B is the one evicted.
    assert!(mc.has_cached_statement("A").await);
    assert!(!mc.has_cached_statement("B").await);
    assert!(a.is_open());
    assert!(!conn.probe_for("A").expect("probe A").closed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_cache_disabled() {
    let (mc, conn) = managed(0);

    let first = mc
        .prepare_statement("SELECT 1", ResultSetType::ForwardOnly, ResultSetConcurrency::ReadOnly)
        .await
        .expect("prepare");
    mc.notify_statement_closed(&first).await;
    // Uncached statements close physically.
    assert!(conn.probe_for("SELECT 1").expect("probe").closed.load(Ordering::SeqCst));

    mc.prepare_statement("SELECT 1", ResultSetType::ForwardOnly, ResultSetConcurrency::ReadOnly)
        .await
        .expect("prepare again");
    assert_eq!(conn.prepare_count.load(Ordering::SeqCst), 2);
    assert_eq!(mc.reuse_count(), 0);
    assert_eq!(mc.cached_statement_count().await, 0);
}

#[tokio::test]
async fn test_notify_close_force_closes_open_statements() {
    let (mc, _) = managed(4);

    let a = mc
        .prepare_statement("A", ResultSetType::ForwardOnly, ResultSetConcurrency::ReadOnly)
        .await
        .expect("prepare A");
    let b = mc
        .prepare_statement("B", ResultSetType::ForwardOnly, ResultSetConcurrency::ReadOnly)
        .await
        .expect("prepare B");
    assert!(a.is_open() && b.is_open());

    mc.notify_close().await;

    assert!(!a.is_open());
    assert!(!b.is_open());
    // The entries stay cached for the next caller.
    assert_eq!(mc.cached_statement_count().await, 2);
}

#[tokio::test]
async fn test_remove_closes_everything() {
    let (mc, conn) = managed(4);

    mc.prepare_statement("A", ResultSetType::ForwardOnly, ResultSetConcurrency::ReadOnly)
        .await
        .expect("prepare A");
    mc.remove().await;

    assert!(conn.closed.load(Ordering::SeqCst));
    assert!(conn.probe_for("A").expect("probe A").closed.load(Ordering::SeqCst));
    assert_eq!(mc.cached_statement_count().await, 0);
}

#[tokio::test]
async fn test_free_key_orders_by_reuse_then_id() {
    let (mc, _) = managed(4);
    assert_eq!(mc.free_key(), (0, 7));

    let stmt = mc
        .prepare_statement("SELECT 1", ResultSetType::ForwardOnly, ResultSetConcurrency::ReadOnly)
        .await
        .expect("prepare");
    mc.notify_statement_closed(&stmt).await;
    mc.prepare_statement("SELECT 1", ResultSetType::ForwardOnly, ResultSetConcurrency::ReadOnly)
        .await
        .expect("reuse");
    assert_eq!(mc.free_key(), (1, 7));
}
