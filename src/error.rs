use crate::registry::{CallbackId, Depth};

/// Boxed error returned by a failing deferred callback.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error type for transaction-scoped callback dispatch.
#[derive(Debug, thiserror::Error)]
pub enum TransactionError {
    #[error("Invalid transaction depth {depth}")]
    InvalidArgument { depth: i64 },

    #[error("Deferred callback {id} on connection '{connection}' (depth {depth}) failed: {source}")]
    CallbackFailure {
        connection: String,
        depth: Depth,
        id: CallbackId,
        #[source]
        source: BoxError,
    },

    #[error("No transaction is open on connection '{0}'")]
    NotInTransaction(String),

    #[error("Transaction commit failed: {0}")]
    CommitFailed(String),

    #[error("Transaction rollback failed: {0}")]
    RollbackFailed(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
}

impl TransactionError {
    /// True when the storage operation succeeded but a post-commit callback failed.
    pub fn is_callback_failure(&self) -> bool {
        matches!(self, TransactionError::CallbackFailure { .. })
    }
}

/// Result type for transaction-scoped operations
pub type TransactionResult<T> = Result<T, TransactionError>;
