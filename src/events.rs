use crate::TransactionResult;

/// Fired after a transaction (or savepoint) on `connection` committed.
///
/// `level` is the depth *after* the commit: the transaction manager has
/// already decremented its counter when the event fires. The transaction that
/// just closed was open at [`closed_level`](Self::closed_level), which is also
/// the depth its callbacks were registered at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionCommitted {
    pub connection: String,
    pub level: u32,
}

impl TransactionCommitted {
    pub fn new(connection: impl Into<String>, level: u32) -> Self {
        Self {
            connection: connection.into(),
            level,
        }
    }

    /// Depth the committed transaction had while it was open (`level + 1`).
    pub fn closed_level(&self) -> i64 {
        i64::from(self.level) + 1
    }

    /// True when the outermost transaction committed.
    pub fn is_outermost(&self) -> bool {
        self.level == 0
    }
}

/// Fired after a transaction (or savepoint) on `connection` rolled back.
///
/// Same convention as [`TransactionCommitted`]: `level` is the depth after
/// the rollback, the closed transaction sat at `level + 1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRolledBack {
    pub connection: String,
    pub level: u32,
}

impl TransactionRolledBack {
    pub fn new(connection: impl Into<String>, level: u32) -> Self {
        Self {
            connection: connection.into(),
            level,
        }
    }

    /// Depth the rolled back transaction had while it was open (`level + 1`).
    pub fn closed_level(&self) -> i64 {
        i64::from(self.level) + 1
    }
}

/// Trait for components that need to be notified of transaction lifecycle events.
///
/// Transaction managers call these after the storage operation succeeded.
/// An error returned here surfaces from the manager's commit or rollback call.
pub trait TransactionListener: Send + Sync {
    fn on_transaction_committed(&self, event: &TransactionCommitted) -> TransactionResult<()>;

    fn on_transaction_rolled_back(&self, event: &TransactionRolledBack) -> TransactionResult<()>;
}

/// Read access to a connection's name and current nesting depth.
///
/// The depth is owned by the transaction manager; callback dispatch only
/// observes it. 0 means no transaction is open.
pub trait TransactionLevel {
    fn connection_name(&self) -> &str;

    fn transaction_level(&self) -> u32;
}
