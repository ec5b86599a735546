//! Managed connections and their prepared-statement caches
//!
//! A managed connection wraps one physical driver connection for its
//! whole lifetime: it tracks hold counts, age and idle deadlines, the
//! transaction it is reserved for, and hosts the per-connection
//! statement cache.

mod connection;
mod statements;

#[cfg(test)]
mod tests;

pub use connection::{ConnectionEventListener, ManagedConnection};
pub use statements::CachedStatement;
