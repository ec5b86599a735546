//! Pool counters and statistics snapshots

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Live counters, mutated under the pool region.
///
/// The `*_recent` fields hold the values rolled out of the previous
/// sampling period; the unsuffixed period fields accumulate the current
/// one.
#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    /// Physical connections opened since pool creation
    pub opened: u64,
    /// Acquires that returned successfully
    pub served: u64,
    /// Physical opens refused by the driver
    pub connection_failures: u64,
    /// Connections reclaimed because the caller never released them
    pub connection_leaks: u64,
    /// Acquires rejected with no waiter budget
    pub rejected_full: u64,
    /// Acquires rejected after waiting out the budget
    pub rejected_timeout: u64,
    /// Acquires rejected for any other reason
    pub rejected_other: u64,
    /// Callers that waited at least once
    pub total_waiters: u64,
    /// Cumulative time spent waiting
    pub total_waiting: Duration,

    /// Longest single wait in the current period
    pub waiting_time: Duration,
    /// Longest single wait since pool creation
    pub waiting_high: Duration,
    /// Longest single wait in the previous period
    pub waiting_high_recent: Duration,

    /// Peak concurrent waiters in the current period
    pub waiter_count: usize,
    /// Peak concurrent waiters since pool creation
    pub waiters_high: usize,
    /// Peak concurrent waiters in the previous period
    pub waiters_high_recent: usize,

    /// Peak busy connections in the current period
    pub busy_max: usize,
    /// Trough of busy connections in the current period
    pub busy_min: usize,
    /// Peak busy connections in the previous period
    pub busy_max_recent: usize,
    /// Trough of busy connections in the previous period
    pub busy_min_recent: usize,
}

impl PoolCounters {
    /// Fold the current busy count into the period min/max.
    pub fn recompute_busy(&mut self, busy: usize) {
        if self.busy_max < busy {
            self.busy_max = busy;
        }
        if self.busy_min > busy {
            self.busy_min = busy;
        }
    }

    /// Record one completed wait.
    pub fn record_wait(&mut self, waited: Duration) {
        self.total_waiters += 1;
        self.total_waiting += waited;
        if self.waiting_time < waited {
            self.waiting_time = waited;
        }
    }

    /// Roll the period counters into their recent slots and reset them,
    /// seeding the busy min/max from the current busy count.
    pub fn sample(&mut self, current_busy: usize) {
        self.waiting_high_recent = self.waiting_time;
        if self.waiting_high < self.waiting_time {
            self.waiting_high = self.waiting_time;
        }
        self.waiting_time = Duration::ZERO;

        self.waiters_high_recent = self.waiter_count;
        if self.waiters_high < self.waiter_count {
            self.waiters_high = self.waiter_count;
        }
        self.waiter_count = 0;

        self.busy_max_recent = self.busy_max;
        self.busy_max = current_busy;
        self.busy_min_recent = self.busy_min;
        self.busy_min = current_busy;
    }
}

/// Point-in-time statistics snapshot for a connection pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolStats {
    /// When the snapshot was taken
    pub taken_at: DateTime<Utc>,

    /// Physical connections currently owned (busy + idle)
    pub current_open: usize,
    /// Connections currently held by callers or parked for a transaction
    pub current_busy: usize,
    /// Idle connections in the free set
    pub current_free: usize,
    /// Connections reserved for an active transaction
    pub current_in_tx: usize,
    /// Callers currently parked waiting for a connection
    pub current_waiters: usize,

    /// Physical connections opened since pool creation
    pub opened: u64,
    /// Acquires that returned successfully
    pub served: u64,
    /// Physical opens refused by the driver
    pub connection_failures: u64,
    /// Connections reclaimed as leaked
    pub connection_leaks: u64,
    /// Acquires rejected without waiting
    pub rejected_full: u64,
    /// Acquires rejected after the wait budget ran out
    pub rejected_timeout: u64,
    /// Acquires rejected for any other reason
    pub rejected_other: u64,

    /// Callers that waited at least once
    pub total_waiters: u64,
    /// Cumulative waiting time
    pub total_waiting: Duration,
    /// Longest single wait since pool creation
    pub waiting_high: Duration,
    /// Longest single wait in the last sampling period
    pub waiting_high_recent: Duration,
    /// Peak concurrent waiters since pool creation
    pub waiters_high: usize,
    /// Peak concurrent waiters in the last sampling period
    pub waiters_high_recent: usize,

    /// Peak busy connections in the last sampling period
    pub busy_max_recent: usize,
    /// Trough of busy connections in the last sampling period
    pub busy_min_recent: usize,
}

impl PoolStats {
    /// Total rejected acquires across all reject reasons.
    pub fn rejected_total(&self) -> u64 {
        self.rejected_full + self.rejected_timeout + self.rejected_other
    }

    /// Pool utilization as a fraction (0.0 to 1.0).
    ///
    /// Returns 0.0 for an empty pool.
    pub fn utilization(&self) -> f64 {
        if self.current_open == 0 {
            0.0
        } else {
            self.current_busy as f64 / self.current_open as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recompute_busy_tracks_extremes() {
        let mut counters = PoolCounters::default();
        counters.recompute_busy(3);
        counters.recompute_busy(1);
        counters.recompute_busy(5);
        assert_eq!(counters.busy_max, 5);
        // busy_min starts at 0 and only ever goes down
        assert_eq!(counters.busy_min, 0);
    }

    #[test]
    fn test_record_wait() {
        let mut counters = PoolCounters::default();
        counters.record_wait(Duration::from_millis(40));
        counters.record_wait(Duration::from_millis(10));
        assert_eq!(counters.total_waiters, 2);
        assert_eq!(counters.total_waiting, Duration::from_millis(50));
        assert_eq!(counters.waiting_time, Duration::from_millis(40));
    }

    #[test]
    fn test_sample_rolls_and_resets() {
        let mut counters = PoolCounters::default();
        counters.record_wait(Duration::from_millis(25));
        counters.waiter_count = 4;
        counters.recompute_busy(7);

        counters.sample(2);

        assert_eq!(counters.waiting_high_recent, Duration::from_millis(25));
        assert_eq!(counters.waiting_high, Duration::from_millis(25));
        assert_eq!(counters.waiting_time, Duration::ZERO);
        assert_eq!(counters.waiters_high_recent, 4);
        assert_eq!(counters.waiters_high, 4);
        assert_eq!(counters.waiter_count, 0);
        assert_eq!(counters.busy_max_recent, 7);
        assert_eq!(counters.busy_max, 2);
        assert_eq!(counters.busy_min, 2);

        // A quieter second period must not disturb the all-time highs.
        counters.record_wait(Duration::from_millis(5));
        counters.waiter_count = 1;
        counters.sample(0);
        assert_eq!(counters.waiting_high, Duration::from_millis(25));
        assert_eq!(counters.waiters_high, 4);
        assert_eq!(counters.waiting_high_recent, Duration::from_millis(5));
        assert_eq!(counters.waiters_high_recent, 1);
    }

    #[test]
    fn test_stats_rejected_total_and_utilization() {
        let stats = PoolStats {
            taken_at: Utc::now(),
            current_open: 8,
            current_busy: 6,
            current_free: 2,
            current_in_tx: 1,
            current_waiters: 0,
            opened: 10,
            served: 40,
            connection_failures: 1,
            connection_leaks: 0,
            rejected_full: 2,
            rejected_timeout: 3,
            rejected_other: 1,
            total_waiters: 9,
            total_waiting: Duration::from_millis(900),
            waiting_high: Duration::from_millis(300),
            waiting_high_recent: Duration::from_millis(100),
            waiters_high: 5,
            waiters_high_recent: 2,
            busy_max_recent: 7,
            busy_min_recent: 1,
        };
        assert_eq!(stats.rejected_total(), 6);
        assert!((stats.utilization() - 0.75).abs() < 0.001);

        let json = serde_json::to_string(&stats).expect("serialize");
        let back: PoolStats = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.rejected_total(), 6);
        assert_eq!(back.current_open, 8);
    }
}
