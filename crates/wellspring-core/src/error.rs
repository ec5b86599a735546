//! Error types for Wellspring

use thiserror::Error;

/// Core error type for Wellspring operations
#[derive(Error, Debug)]
pub enum WellspringError {
    /// The pool is saturated and the caller had no waiter budget left.
    #[error("Pool exhausted: {0}")]
    PoolExhausted(String),

    /// The caller waited out its acquire budget.
    #[error("Acquire timed out: {0}")]
    AcquireTimeout(String),

    #[error("Driver error: {0}")]
    Driver(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Statement error: {0}")]
    Statement(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

/// Result type alias for Wellspring operations
pub type Result<T> = std::result::Result<T, WellspringError>;
