//! Commit-aware model events.
//!
//! Native model events (`saved`, `created`, ...) map to commit actions
//! (`committed`, `committed_creation`, ...). Listeners attached to a commit
//! action run once the model's connection has no transaction open: right away
//! when the native event fires outside a transaction, otherwise when the
//! outermost transaction commits. A rollback drops them.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::events::TransactionLevel;
use crate::registry::CallbackResult;
use crate::subscriber::{Deferral, TransactionEventsSubscriber};
use crate::TransactionResult;

/// Native model lifecycle events that have a commit-time counterpart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelEvent {
    Saved,
    Created,
    Updated,
    Deleted,
}

impl ModelEvent {
    pub fn commit_action(self) -> CommitAction {
        match self {
            ModelEvent::Saved => CommitAction::Committed,
            ModelEvent::Created => CommitAction::CommittedCreation,
            ModelEvent::Updated => CommitAction::CommittedUpdate,
            ModelEvent::Deleted => CommitAction::CommittedDelete,
        }
    }
}

/// Events raised once the change behind a [`ModelEvent`] is committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommitAction {
    /// After a model was created or saved.
    Committed,
    CommittedCreation,
    CommittedUpdate,
    CommittedDelete,
}

impl CommitAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommitAction::Committed => "committed",
            CommitAction::CommittedCreation => "committed_creation",
            CommitAction::CommittedUpdate => "committed_update",
            CommitAction::CommittedDelete => "committed_delete",
        }
    }
}

impl fmt::Display for CommitAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type Listener<M> = Arc<dyn Fn(&M) -> CallbackResult + Send + Sync>;

/// Commit-action listeners for one model type.
pub struct CommitObservers<M> {
    listeners: RwLock<HashMap<CommitAction, Vec<Listener<M>>>>,
}

impl<M> CommitObservers<M>
where
    M: Send + Sync + 'static,
{
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            listeners: RwLock::new(HashMap::new()),
        })
    }

    /// Attach `listener` to `action`.
    pub fn on<F>(&self, action: CommitAction, listener: F)
    where
        F: Fn(&M) -> CallbackResult + Send + Sync + 'static,
    {
        self.listeners
            .write()
            .entry(action)
            .or_default()
            .push(Arc::new(listener));
    }

    /// Run the listeners of `action` in registration order, stopping at the
    /// first error.
    pub fn fire(&self, action: CommitAction, model: &M) -> CallbackResult {
        // Listeners may attach more listeners; don't hold the lock while they run.
        let listeners = self
            .listeners
            .read()
            .get(&action)
            .cloned()
            .unwrap_or_default();
        for listener in listeners {
            listener(model)?;
        }
        Ok(())
    }

    /// React to a native model event on `connection`.
    ///
    /// Outside a transaction the matching commit action fires right away;
    /// inside one it is queued on `subscriber` at the current depth, labeled
    /// with the action name.
    pub fn model_event<C>(
        self: &Arc<Self>,
        subscriber: &TransactionEventsSubscriber,
        connection: &C,
        event: ModelEvent,
        model: Arc<M>,
    ) -> TransactionResult<Deferral>
    where
        C: TransactionLevel + ?Sized,
    {
        let action = event.commit_action();
        let observers = Arc::clone(self);
        let fire = move || observers.fire(action, &model);

        if connection.transaction_level() == 0 {
            return subscriber.after_commit(connection, fire);
        }
        subscriber
            .register_labeled_for_current_transaction(connection, action.as_str(), fire)
            .map(Deferral::Queued)
    }
}
