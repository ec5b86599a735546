//! Pool allocator and the caller-facing connection handles
//!
//! The allocator owns every managed connection, arbitrates acquisition
//! (transaction affinity, free set, expansion, waiting), and reclaims
//! connections that aged out or leaked.

mod allocator;
mod handle;


pub use allocator::{CheckOutcome, ConnectionManager, Disposition};
pub use handle::{PooledConnection, PooledStatement};
