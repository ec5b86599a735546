//! Transaction collaborator traits
//!
//! The pool never owns transactions; it enlists connections into
//! transactions produced by an external transaction manager and reacts
//! to completion callbacks. These traits are the whole of that contract.

use crate::Result;
use async_trait::async_trait;
use uuid::Uuid;

/// Identifier of an active transaction, unique for its lifetime.
pub type TxId = Uuid;

/// Outcome of a completed transaction, delivered to completion callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    Committed,
    RolledBack,
    Unknown,
}

/// Flag passed when a resource is delisted from a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelistFlag {
    /// The caller finished with the resource normally.
    Success,
    /// The resource failed; the transaction should not trust its work.
    Fail,
}

/// Vote returned by the prepare phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrepareVote {
    /// Ready to commit.
    Ok,
    /// Read-only participant; commit can skip this resource.
    ReadOnly,
}

/// Why an enlistment or registration was refused.
#[derive(Debug, Clone)]
pub enum EnlistError {
    /// The transaction is marked rollback-only.
    RollbackOnly,
    /// The transaction already committed or rolled back.
    AlreadyCompleted,
    /// Transaction manager failure.
    Failed(String),
}

impl std::fmt::Display for EnlistError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnlistError::RollbackOnly => f.write_str("transaction is marked rollback-only"),
            EnlistError::AlreadyCompleted => f.write_str("transaction already completed"),
            EnlistError::Failed(msg) => write!(f, "enlistment failed: {}", msg),
        }
    }
}

/// A transactional resource: one branch of a transaction, backed by one
/// physical connection.
///
/// Single-phase semantics: `prepare` always votes `Ok` and commit and
/// rollback call straight through to the physical connection. Identity
/// is per resource object, not per resource manager, so the transaction
/// manager drives commit/rollback on every enlisted connection.
#[async_trait]
pub trait TransactionalResource: Send + Sync {
    /// Stable identity of this resource object.
    fn resource_id(&self) -> Uuid;

    async fn prepare(&self) -> Result<PrepareVote>;

    async fn commit(&self, one_phase: bool) -> Result<()>;

    async fn rollback(&self) -> Result<()>;

    /// True only when `other` is this same resource object.
    fn is_same_resource(&self, other: &dyn TransactionalResource) -> bool {
        self.resource_id() == other.resource_id()
    }
}

/// Callback invoked by the transaction manager once a transaction has
/// committed or rolled back.
#[async_trait]
pub trait CompletionCallback: Send + Sync {
    async fn after_completion(&self, status: TxStatus);
}

/// Handle on one active transaction.
pub trait TransactionHandle: Send + Sync {
    fn id(&self) -> TxId;

    /// Enlist a resource branch in this transaction.
    fn enlist(
        &self,
        resource: std::sync::Arc<dyn TransactionalResource>,
    ) -> std::result::Result<(), EnlistError>;

    /// Delist a previously enlisted resource.
    fn delist(
        &self,
        resource: std::sync::Arc<dyn TransactionalResource>,
        flag: DelistFlag,
    ) -> std::result::Result<(), EnlistError>;

    /// Register a callback fired after the transaction completes.
    fn register_completion(
        &self,
        callback: std::sync::Arc<dyn CompletionCallback>,
    ) -> std::result::Result<(), EnlistError>;
}

/// The transaction manager collaborator.
///
/// This is the one place an ambient "current transaction" lookup is
/// allowed; everything else takes the handle as an explicit parameter.
pub trait TransactionManager: Send + Sync {
    fn current_transaction(&self) -> Option<std::sync::Arc<dyn TransactionHandle>>;
}

/// A transaction manager that never reports an ambient transaction.
///
/// Useful for pools serving purely autocommit workloads and for tests.
#[derive(Debug, Default)]
pub struct NoTransactions;

impl TransactionManager for NoTransactions {
    fn current_transaction(&self) -> Option<std::sync::Arc<dyn TransactionHandle>> {
        None
    }
}
