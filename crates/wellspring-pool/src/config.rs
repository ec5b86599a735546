//! Pool and data-source configuration types

use serde::{Deserialize, Serialize};
use std::time::Duration;
use wellspring_core::{IsolationLevel, Result, WellspringError};

/// Sentinel pool size meaning "no limit".
pub const NO_LIMIT: usize = 99_999;

/// One day in milliseconds, the default connection age and open-time cap.
const ONE_DAY_MS: u64 = 24 * 60 * 60 * 1000;

const ONE_MINUTE_MS: u64 = 60 * 1000;

/// How deeply a connection is checked when taken from the free set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckLevel {
    /// No checking.
    None,
    /// Verify the physical connection is not reported closed.
    Physical,
    /// Additionally execute the configured test statement.
    Probe,
}

impl CheckLevel {
    /// Numeric wire value (0, 1 or 2) used in exported references.
    pub fn as_u8(&self) -> u8 {
        match self {
            CheckLevel::None => 0,
            CheckLevel::Physical => 1,
            CheckLevel::Probe => 2,
        }
    }

    /// Parse a numeric wire value. Anything above 1 probes.
    pub fn from_u8(level: u8) -> Self {
        match level {
            0 => CheckLevel::None,
            1 => CheckLevel::Physical,
            _ => CheckLevel::Probe,
        }
    }
}

impl Default for CheckLevel {
    fn default() -> Self {
        CheckLevel::None
    }
}

/// Identity of the data source a pool draws from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSourceConfig {
    /// Name the pool is published under
    pub name: String,
    /// Connection URL handed to the driver
    pub url: String,
    /// Driver identifier
    pub driver: String,
    /// Default username for opened connections
    pub username: String,
    /// Default password for opened connections
    pub password: String,
    /// Isolation level applied to each physical connection at open
    pub isolation: IsolationLevel,
}

impl DataSourceConfig {
    /// Create a data-source configuration for the given name and URL.
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            driver: String::new(),
            username: String::new(),
            password: String::new(),
            isolation: IsolationLevel::Default,
        }
    }

    /// Set the driver identifier.
    pub fn with_driver(mut self, driver: impl Into<String>) -> Self {
        self.driver = driver.into();
        self
    }

    /// Set the default credentials.
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    /// Set the transaction isolation level.
    pub fn with_isolation(mut self, isolation: IsolationLevel) -> Self {
        self.isolation = isolation;
        self
    }
}

/// Configuration for a connection pool
///
/// Controls pool sizing, waiting, connection lifecycle, validation and
/// statement caching. Durations are stored in milliseconds; the exported
/// reference format uses minutes for the lifecycle limits and seconds for
/// the wait and sampling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Minimum number of connections kept warm
    pool_min: usize,
    /// Hard cap on physical connections; `NO_LIMIT` means unbounded
    pool_max: usize,
    /// Age after which an idle connection is eligible for eviction
    max_age_ms: u64,
    /// Open time after which a busy, untransacted connection is leaked
    max_open_time_ms: u64,
    /// Budget a caller may spend waiting for a connection
    waiter_timeout_ms: u64,
    /// Cap on concurrently parked callers
    max_waiters: usize,
    /// Validation depth on acquire
    check_level: CheckLevel,
    /// Probe statement used by `CheckLevel::Probe` and diagnostics
    test_statement: Option<String>,
    /// Per-connection statement cache capacity; 0 disables caching
    pstmt_max: usize,
    /// Cadence of the metric rollup in seconds
    sampling_period_secs: u64,
}

impl PoolConfig {
    /// Create a pool configuration with the given min and max sizes and
    /// the default timeouts.
    pub fn new(pool_min: usize, pool_max: usize) -> Self {
        Self {
            pool_min,
            pool_max,
            max_age_ms: ONE_DAY_MS,
            max_open_time_ms: ONE_DAY_MS,
            waiter_timeout_ms: 10_000,
            max_waiters: 1000,
            check_level: CheckLevel::None,
            test_statement: None,
            pstmt_max: 12,
            sampling_period_secs: 60,
        }
    }

    /// Configuration with no upper bound on pool size.
    pub fn unbounded() -> Self {
        Self::new(0, NO_LIMIT)
    }

    /// Set the maximum connection age in minutes.
    pub fn with_max_age_minutes(mut self, minutes: u64) -> Self {
        self.max_age_ms = minutes * ONE_MINUTE_MS;
        self
    }

    /// Set the maximum connection age in milliseconds.
    pub fn with_max_age_ms(mut self, ms: u64) -> Self {
        self.max_age_ms = ms;
        self
    }

    /// Set the maximum open time in minutes.
    pub fn with_max_open_time_minutes(mut self, minutes: u64) -> Self {
        self.max_open_time_ms = minutes * ONE_MINUTE_MS;
        self
    }

    /// Set the maximum open time in milliseconds.
    pub fn with_max_open_time_ms(mut self, ms: u64) -> Self {
        self.max_open_time_ms = ms;
        self
    }

    /// Set the acquire wait budget in seconds.
    pub fn with_waiter_timeout_secs(mut self, seconds: u64) -> Self {
        self.waiter_timeout_ms = seconds * 1000;
        self
    }

    /// Set the acquire wait budget in milliseconds.
    pub fn with_waiter_timeout_ms(mut self, ms: u64) -> Self {
        self.waiter_timeout_ms = ms;
        self
    }

    /// Set the cap on parked callers.
    pub fn with_max_waiters(mut self, max_waiters: usize) -> Self {
        self.max_waiters = max_waiters;
        self
    }

    /// Set the validation depth on acquire.
    pub fn with_check_level(mut self, level: CheckLevel) -> Self {
        self.check_level = level;
        self
    }

    /// Set the probe statement used by `CheckLevel::Probe`.
    pub fn with_test_statement(mut self, sql: impl Into<String>) -> Self {
        self.test_statement = Some(sql.into());
        self
    }

    /// Set the per-connection statement cache capacity. 0 disables caching.
    pub fn with_pstmt_max(mut self, pstmt_max: usize) -> Self {
        self.pstmt_max = pstmt_max;
        self
    }

    /// Set the sampling period in seconds. Values of zero are rejected at
    /// validation.
    pub fn with_sampling_period_secs(mut self, seconds: u64) -> Self {
        self.sampling_period_secs = seconds;
        self
    }

    pub fn pool_min(&self) -> usize {
        self.pool_min
    }

    pub fn pool_max(&self) -> usize {
        self.pool_max
    }

    /// True when the pool carries the unbounded sentinel.
    pub fn is_unbounded(&self) -> bool {
        self.pool_max >= NO_LIMIT
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_millis(self.max_age_ms)
    }

    pub fn max_age_minutes(&self) -> u64 {
        self.max_age_ms / ONE_MINUTE_MS
    }

    pub fn max_open_time(&self) -> Duration {
        Duration::from_millis(self.max_open_time_ms)
    }

    pub fn max_open_time_minutes(&self) -> u64 {
        self.max_open_time_ms / ONE_MINUTE_MS
    }

    pub fn waiter_timeout(&self) -> Duration {
        Duration::from_millis(self.waiter_timeout_ms)
    }

    pub fn waiter_timeout_secs(&self) -> u64 {
        self.waiter_timeout_ms / 1000
    }

    pub fn max_waiters(&self) -> usize {
        self.max_waiters
    }

    pub fn check_level(&self) -> CheckLevel {
        self.check_level
    }

    pub fn test_statement(&self) -> Option<&str> {
        self.test_statement.as_deref()
    }

    pub fn pstmt_max(&self) -> usize {
        self.pstmt_max
    }

    pub fn sampling_period(&self) -> Duration {
        Duration::from_secs(self.sampling_period_secs)
    }

    pub fn sampling_period_secs(&self) -> u64 {
        self.sampling_period_secs
    }

    pub(crate) fn set_pool_min(&mut self, min: usize) {
        self.pool_min = min;
    }

    /// Clamp and set the pool maximum; values at or above `NO_LIMIT`
    /// become the unbounded sentinel.
    pub(crate) fn set_pool_max(&mut self, max: usize) {
        self.pool_max = max.min(NO_LIMIT);
    }

    pub(crate) fn set_pstmt_max(&mut self, pstmt_max: usize) {
        self.pstmt_max = pstmt_max;
    }

    /// Check the configuration for fatal errors.
    pub fn validate(&self) -> Result<()> {
        if !self.is_unbounded() && self.pool_min > self.pool_max {
            return Err(WellspringError::Configuration(format!(
                "pool_min ({}) cannot exceed pool_max ({})",
                self.pool_min, self.pool_max
            )));
        }
        if self.sampling_period_secs == 0 {
            return Err(WellspringError::Configuration(
                "sampling_period must be at least one second".into(),
            ));
        }
        if self.check_level == CheckLevel::Probe && self.test_statement.is_none() {
            return Err(WellspringError::Configuration(
                "check_level 2 requires a test_statement".into(),
            ));
        }
        Ok(())
    }
}

impl Default for PoolConfig {
    /// Default pool configuration
    ///
    /// Defaults:
    /// - pool_min: 0, pool_max: unbounded
    /// - max_age / max_open_time: 1 day
    /// - waiter_timeout: 10 seconds, max_waiters: 1000
    /// - check_level: none, pstmt_max: 12
    /// - sampling_period: 60 seconds
    fn default() -> Self {
        Self::new(0, NO_LIMIT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PoolConfig::default();
        assert_eq!(config.pool_min(), 0);
        assert!(config.is_unbounded());
        assert_eq!(config.max_age(), Duration::from_millis(86_400_000));
        assert_eq!(config.max_open_time_minutes(), 1440);
        assert_eq!(config.waiter_timeout(), Duration::from_secs(10));
        assert_eq!(config.max_waiters(), 1000);
        assert_eq!(config.check_level(), CheckLevel::None);
        assert_eq!(config.pstmt_max(), 12);
        assert_eq!(config.sampling_period(), Duration::from_secs(60));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builders() {
        let config = PoolConfig::new(2, 10)
            .with_max_age_minutes(30)
            .with_max_open_time_ms(5000)
            .with_waiter_timeout_secs(2)
            .with_max_waiters(5)
            .with_check_level(CheckLevel::Physical)
            .with_pstmt_max(4)
            .with_sampling_period_secs(10);

        assert_eq!(config.pool_min(), 2);
        assert_eq!(config.pool_max(), 10);
        assert!(!config.is_unbounded());
        assert_eq!(config.max_age_minutes(), 30);
        assert_eq!(config.max_open_time(), Duration::from_millis(5000));
        assert_eq!(config.waiter_timeout(), Duration::from_secs(2));
        assert_eq!(config.max_waiters(), 5);
        assert_eq!(config.pstmt_max(), 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_min_exceeds_max() {
        let config = PoolConfig::new(10, 5);
        assert!(matches!(
            config.validate(),
            Err(WellspringError::Configuration(_))
        ));
    }

    #[test]
    fn test_validate_min_over_unbounded_max_is_fine() {
        let config = PoolConfig::new(10, NO_LIMIT);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_zero_sampling_period() {
        let config = PoolConfig::new(0, 5).with_sampling_period_secs(0);
        assert!(matches!(
            config.validate(),
            Err(WellspringError::Configuration(_))
        ));
    }

    #[test]
    fn test_validate_probe_requires_statement() {
        let config = PoolConfig::new(0, 5).with_check_level(CheckLevel::Probe);
        assert!(config.validate().is_err());

        let config = config.with_test_statement("SELECT 1");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_check_level_wire_values() {
        assert_eq!(CheckLevel::from_u8(0), CheckLevel::None);
        assert_eq!(CheckLevel::from_u8(1), CheckLevel::Physical);
        assert_eq!(CheckLevel::from_u8(2), CheckLevel::Probe);
        // Anything deeper than 1 probes
        assert_eq!(CheckLevel::from_u8(7), CheckLevel::Probe);
        for level in [CheckLevel::None, CheckLevel::Physical, CheckLevel::Probe] {
            assert_eq!(CheckLevel::from_u8(level.as_u8()), level);
        }
    }

    #[test]
    fn test_serialization() {
        let config = PoolConfig::new(2, 10)
            .with_waiter_timeout_ms(5000)
            .with_test_statement("SELECT 1");

        let json = serde_json::to_string(&config).expect("serialize");
        let deserialized: PoolConfig = serde_json::from_str(&json).expect("deserialize");

        assert_eq!(deserialized.pool_min(), 2);
        assert_eq!(deserialized.pool_max(), 10);
        assert_eq!(deserialized.waiter_timeout(), Duration::from_millis(5000));
        assert_eq!(deserialized.test_statement(), Some("SELECT 1"));
    }
}
