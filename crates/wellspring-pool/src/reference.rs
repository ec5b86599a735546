//! Name-bindable pool references
//!
//! A pool serializes its configuration into a string-addressed reference
//! so a directory service can publish it. The factory on the lookup side
//! asks the registry for an existing pool first and only constructs a
//! new one from the reference when none is bound.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use wellspring_core::{Driver, IsolationLevel, Result, TransactionManager, WellspringError};

use crate::config::{CheckLevel, DataSourceConfig, PoolConfig};
use crate::manager::ConnectionManager;
use crate::registry::PoolRegistry;

/// Serialized pool configuration, addressable by string keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolReference {
    pub name: String,
    pub url: String,
    pub driver: String,
    pub username: String,
    pub password: String,
    pub isolation: String,
    pub check_level: u8,
    /// Minutes
    pub max_age: u64,
    /// Minutes
    pub max_open_time: u64,
    pub test_statement: String,
    pub pstmt_max: usize,
    pub pool_min: usize,
    pub pool_max: usize,
    /// Seconds
    pub max_wait_time: u64,
    pub max_waiters: usize,
    /// Seconds
    pub sampling_period: u64,
}

impl PoolReference {
    /// Build a reference from live configuration.
    pub fn from_configs(datasource: &DataSourceConfig, config: &PoolConfig) -> Self {
        Self {
            name: datasource.name.clone(),
            url: datasource.url.clone(),
            driver: datasource.driver.clone(),
            username: datasource.username.clone(),
            password: datasource.password.clone(),
            isolation: datasource.isolation.as_str().to_string(),
            check_level: config.check_level().as_u8(),
            max_age: config.max_age_minutes(),
            max_open_time: config.max_open_time_minutes(),
            test_statement: config.test_statement().unwrap_or_default().to_string(),
            pstmt_max: config.pstmt_max(),
            pool_min: config.pool_min(),
            pool_max: config.pool_max(),
            max_wait_time: config.waiter_timeout_secs(),
            max_waiters: config.max_waiters(),
            sampling_period: config.sampling_period_secs(),
        }
    }

    /// Reconstruct the configuration this reference carries.
    pub fn to_configs(&self) -> (DataSourceConfig, PoolConfig) {
        let datasource = DataSourceConfig::new(&self.name, &self.url)
            .with_driver(&self.driver)
            .with_credentials(&self.username, &self.password)
            .with_isolation(IsolationLevel::parse(&self.isolation));

        let mut config = PoolConfig::new(self.pool_min, self.pool_max)
            .with_check_level(CheckLevel::from_u8(self.check_level))
            .with_max_age_minutes(self.max_age)
            .with_max_open_time_minutes(self.max_open_time)
            .with_pstmt_max(self.pstmt_max)
            .with_waiter_timeout_secs(self.max_wait_time)
            .with_max_waiters(self.max_waiters)
            .with_sampling_period_secs(self.sampling_period);
        if !self.test_statement.is_empty() {
            config = config.with_test_statement(&self.test_statement);
        }
        (datasource, config)
    }

    /// Flatten into the wire key/value pairs.
    pub fn entries(&self) -> Vec<(String, String)> {
        vec![
            ("datasource.name".into(), self.name.clone()),
            ("datasource.url".into(), self.url.clone()),
            ("datasource.classname".into(), self.driver.clone()),
            ("datasource.username".into(), self.username.clone()),
            ("datasource.password".into(), self.password.clone()),
            ("datasource.isolationlevel".into(), self.isolation.clone()),
            ("connchecklevel".into(), self.check_level.to_string()),
            ("connmaxage".into(), self.max_age.to_string()),
            ("maxopentime".into(), self.max_open_time.to_string()),
            ("connteststmt".into(), self.test_statement.clone()),
            ("pstmtmax".into(), self.pstmt_max.to_string()),
            ("minconpool".into(), self.pool_min.to_string()),
            ("maxconpool".into(), self.pool_max.to_string()),
            ("maxwaittime".into(), self.max_wait_time.to_string()),
            ("maxwaiters".into(), self.max_waiters.to_string()),
            ("samplingperiod".into(), self.sampling_period.to_string()),
        ]
    }

    /// Parse wire key/value pairs back into a reference.
    ///
    /// `datasource.name` and `datasource.url` are required; everything
    /// else falls back to the configuration defaults.
    pub fn from_entries(entries: &[(String, String)]) -> Result<Self> {
        let get = |key: &str| -> Option<&str> {
            entries
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
        };
        let required = |key: &str| -> Result<String> {
            get(key).map(str::to_string).ok_or_else(|| {
                WellspringError::Configuration(format!("reference is missing {}", key))
            })
        };
        let parse_num = |key: &str, fallback: u64| -> u64 {
            get(key).and_then(|v| v.parse().ok()).unwrap_or(fallback)
        };

        let defaults = PoolConfig::default();
        Ok(Self {
            name: required("datasource.name")?,
            url: required("datasource.url")?,
            driver: get("datasource.classname").unwrap_or_default().to_string(),
            username: get("datasource.username").unwrap_or_default().to_string(),
            password: get("datasource.password").unwrap_or_default().to_string(),
            isolation: get("datasource.isolationlevel")
                .unwrap_or("default")
                .to_string(),
            check_level: parse_num("connchecklevel", 0) as u8,
            max_age: parse_num("connmaxage", defaults.max_age_minutes()),
            max_open_time: parse_num("maxopentime", defaults.max_open_time_minutes()),
            test_statement: get("connteststmt").unwrap_or_default().to_string(),
            pstmt_max: parse_num("pstmtmax", defaults.pstmt_max() as u64) as usize,
            pool_min: parse_num("minconpool", defaults.pool_min() as u64) as usize,
            pool_max: parse_num("maxconpool", defaults.pool_max() as u64) as usize,
            max_wait_time: parse_num("maxwaittime", defaults.waiter_timeout_secs()),
            max_waiters: parse_num("maxwaiters", defaults.max_waiters() as u64) as usize,
            sampling_period: parse_num("samplingperiod", defaults.sampling_period_secs()),
        })
    }
}

/// Constructs pools from references, reusing registered ones.
pub struct DataSourceFactory;

impl DataSourceFactory {
    /// Resolve a reference against the registry.
    ///
    /// An already-bound pool of the same name wins; otherwise a new pool
    /// is constructed from the reference, warmed to its minimum size and
    /// bound.
    pub async fn resolve(
        registry: &PoolRegistry,
        reference: &PoolReference,
        driver: Arc<dyn Driver>,
        tm: Arc<dyn TransactionManager>,
    ) -> Result<Arc<ConnectionManager>> {
        if let Some(pool) = registry.lookup(&reference.name) {
            tracing::debug!(pool = %reference.name, "reusing the registered pool");
            return Ok(pool);
        }

        tracing::debug!(pool = %reference.name, "creating a new connection manager from reference");
        let (datasource, config) = reference.to_configs();
        let pool = ConnectionManager::new(datasource, config, driver, tm)?;
        pool.adjust().await?;
        registry.bind(Arc::clone(&pool));
        Ok(pool)
    }
}
