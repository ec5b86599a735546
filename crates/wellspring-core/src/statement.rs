//! Driver statement trait and result-set options

use crate::{Result, Value};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Result-set scrolling behavior requested at prepare time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultSetType {
    ForwardOnly,
    ScrollInsensitive,
    ScrollSensitive,
}

impl Default for ResultSetType {
    fn default() -> Self {
        ResultSetType::ForwardOnly
    }
}

/// Result-set concurrency requested at prepare time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultSetConcurrency {
    ReadOnly,
    Updatable,
}

impl Default for ResultSetConcurrency {
    fn default() -> Self {
        ResultSetConcurrency::ReadOnly
    }
}

/// Fetch direction hint on a statement.
///
/// `Forward` is the driver default and the value restored when a cached
/// statement is reset for reuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FetchDirection {
    Forward,
    Reverse,
    Unknown,
}

impl Default for FetchDirection {
    fn default() -> Self {
        FetchDirection::Forward
    }
}

/// A prepared statement handle owned by the driver.
///
/// The pool's statement cache keeps these alive across logical closes and
/// resets the mutator properties below to their defaults before a cached
/// statement is handed out again.
#[async_trait]
pub trait PhysicalStatement: Send + Sync {
    /// Execute with the given parameters, returning the affected row count.
    async fn execute(&self, params: &[Value]) -> Result<u64>;

    async fn set_fetch_direction(&self, direction: FetchDirection) -> Result<()>;

    async fn set_fetch_size(&self, rows: u32) -> Result<()>;

    async fn set_max_field_size(&self, bytes: u32) -> Result<()>;

    async fn set_max_rows(&self, rows: u32) -> Result<()>;

    /// Query timeout in seconds; 0 means no limit.
    async fn set_query_timeout(&self, seconds: u32) -> Result<()>;

    async fn add_batch(&self, params: &[Value]) -> Result<()>;

    async fn clear_batch(&self) -> Result<()>;

    async fn clear_parameters(&self) -> Result<()>;

    async fn clear_warnings(&self) -> Result<()>;

    /// Deallocate the statement on the server side.
    async fn close(&self) -> Result<()>;
}
