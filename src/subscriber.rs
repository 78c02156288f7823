//! Bridges transaction events to the [`CallbackRegistry`].
//!
//! The one thing to get right here is the off-by-one between the two sides:
//!
//! * registration happens while the transaction is open, so the current
//!   depth *is* the bucket key;
//! * commit and rollback events report the depth *after* the close, so the
//!   bucket of the closed transaction sits at `level + 1`.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::events::{TransactionCommitted, TransactionLevel, TransactionListener, TransactionRolledBack};
use crate::registry::{CallbackId, CallbackRegistry, CallbackResult};
use crate::{TransactionError, TransactionResult};

/// What [`TransactionEventsSubscriber::after_commit`] did with a callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deferral {
    /// No transaction was open; the callback already ran.
    Fired,
    /// Queued until the outermost transaction commits.
    Queued(CallbackId),
}

/// Turns commit/rollback notifications into registry flushes and discards.
#[derive(Debug, Clone, Default)]
pub struct TransactionEventsSubscriber {
    registry: Arc<CallbackRegistry>,
}

impl TransactionEventsSubscriber {
    pub fn new(registry: Arc<CallbackRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<CallbackRegistry> {
        &self.registry
    }

    /// Queue `callback` at the connection's current depth.
    ///
    /// Fails with [`TransactionError::NotInTransaction`] when no transaction is
    /// open; callers outside a transaction should run the callback themselves
    /// or use [`after_commit`](Self::after_commit).
    pub fn register_for_current_transaction<C, F>(&self, connection: &C, callback: F) -> TransactionResult<CallbackId>
    where
        C: TransactionLevel + ?Sized,
        F: FnOnce() -> CallbackResult + Send + 'static,
    {
        let level = current_level(connection)?;
        self.registry
            .register(connection.connection_name(), i64::from(level), callback)
    }

    /// Labeled variant of [`register_for_current_transaction`](Self::register_for_current_transaction).
    pub fn register_labeled_for_current_transaction<C, F>(
        &self,
        connection: &C,
        label: impl Into<String>,
        callback: F,
    ) -> TransactionResult<CallbackId>
    where
        C: TransactionLevel + ?Sized,
        F: FnOnce() -> CallbackResult + Send + 'static,
    {
        let level = current_level(connection)?;
        self.registry
            .register_labeled(connection.connection_name(), i64::from(level), label, callback)
    }

    /// Run `callback` now if no transaction is open, otherwise queue it.
    pub fn after_commit<C, F>(&self, connection: &C, callback: F) -> TransactionResult<Deferral>
    where
        C: TransactionLevel + ?Sized,
        F: FnOnce() -> CallbackResult + Send + 'static,
    {
        if connection.transaction_level() == 0 {
            run_immediately(connection.connection_name(), callback)?;
            return Ok(Deferral::Fired);
        }
        self.register_for_current_transaction(connection, callback)
            .map(Deferral::Queued)
    }

    /// Flush the connection when the outermost transaction committed.
    ///
    /// A nested commit runs nothing; its callbacks move up to the parent
    /// level so they share the parent's fate.
    pub fn on_transaction_committed(&self, event: &TransactionCommitted) -> TransactionResult<()> {
        if !event.is_outermost() {
            let moved = self.registry.promote(&event.connection, event.closed_level())?;
            trace!(
                connection = %event.connection,
                level = event.level,
                moved,
                "Nested transaction committed"
            );
            return Ok(());
        }

        let executed = self.registry.flush_all(&event.connection)?;
        debug!(connection = %event.connection, executed, "Transaction committed");
        Ok(())
    }

    /// Discard the callbacks registered inside the transaction that rolled back.
    pub fn on_transaction_rolled_back(&self, event: &TransactionRolledBack) -> TransactionResult<()> {
        let discarded = self.registry.discard(&event.connection, event.closed_level())?;
        debug!(
            connection = %event.connection,
            level = event.level,
            discarded,
            "Transaction rolled back"
        );
        Ok(())
    }
}

impl TransactionListener for TransactionEventsSubscriber {
    fn on_transaction_committed(&self, event: &TransactionCommitted) -> TransactionResult<()> {
        TransactionEventsSubscriber::on_transaction_committed(self, event)
    }

    fn on_transaction_rolled_back(&self, event: &TransactionRolledBack) -> TransactionResult<()> {
        TransactionEventsSubscriber::on_transaction_rolled_back(self, event)
    }
}

fn current_level<C: TransactionLevel + ?Sized>(connection: &C) -> TransactionResult<u32> {
    match connection.transaction_level() {
        0 => Err(TransactionError::NotInTransaction(
            connection.connection_name().to_owned(),
        )),
        level => Ok(level),
    }
}

fn run_immediately<F>(connection: &str, callback: F) -> TransactionResult<()>
where
    F: FnOnce() -> CallbackResult,
{
    callback().map_err(|source| TransactionError::CallbackFailure {
        connection: connection.to_owned(),
        depth: 0,
        id: CallbackId::IMMEDIATE,
        source,
    })
}
