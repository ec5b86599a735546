//! Wellspring Core - traits and types shared across the pool
//!
//! This crate defines the contracts between the pool and its external
//! collaborators:
//!
//! - `Driver` / `PhysicalConnection` / `PhysicalStatement` - the database
//!   driver that opens physical connections
//! - `TransactionManager` / `TransactionHandle` - the transaction manager
//!   that produces transaction handles and delivers completion callbacks
//! - `TransactionalResource` / `CompletionCallback` - the facets a pooled
//!   connection presents back to the transaction manager
//! - Common types: `Value`, `IsolationLevel`, result-set options

mod driver;
mod error;
mod isolation;
mod statement;
mod transaction;
mod types;

pub use driver::*;
pub use error::*;
pub use isolation::*;
pub use statement::*;
pub use transaction::*;
pub use types::*;
