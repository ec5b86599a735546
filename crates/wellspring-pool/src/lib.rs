//! Wellspring Pool - pooled, transaction-aware connection management
//!
//! This crate owns a bounded set of physical database connections and
//! hands them out to callers: acquisitions inside one transaction share
//! the same physical connection, prepared statements are cached per
//! connection, and connections that aged out or leaked are reclaimed.
//!
//! # Example
//!
//! ```ignore
//! use wellspring_pool::{ConnectionManager, DataSourceConfig, PoolConfig};
//!
//! let pool = ConnectionManager::new(
//!     DataSourceConfig::new("orders", "db://orders-primary"),
//!     PoolConfig::new(2, 20).with_waiter_timeout_secs(5),
//!     driver,
//!     transaction_manager,
//! )?;
//! let keeper = pool.spawn_maintenance();
//!
//! let conn = pool.get_connection().await?;
//! let stmt = conn.prepare("SELECT * FROM orders WHERE id = ?").await?;
//! // ...
//! stmt.close().await;
//! conn.close().await;
//! ```

mod config;
mod managed;
mod manager;
mod reference;
mod registry;
mod stats;

pub use config::{CheckLevel, DataSourceConfig, PoolConfig, NO_LIMIT};
pub use managed::{CachedStatement, ConnectionEventListener, ManagedConnection};
pub use manager::{CheckOutcome, ConnectionManager, Disposition, PooledConnection, PooledStatement};
pub use reference::{DataSourceFactory, PoolReference};
pub use registry::PoolRegistry;
pub use stats::PoolStats;
