use parking_lot::RwLock;
use std::sync::Arc;
use uuid::Uuid;

use postgres_commit_callbacks::{CommitAction, CommitObservers};

pub const NOT_COMMITTED: &str = "Nothing.";
pub const COMMITTED: &str = "I am committed.";

/// Sample User entity for testing
#[derive(Debug)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    committed_message: RwLock<String>,
}

impl User {
    pub fn new(name: &str, email: &str) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            email: email.to_string(),
            name: name.to_string(),
            committed_message: RwLock::new(NOT_COMMITTED.to_string()),
        })
    }

    pub fn committed_message(&self) -> String {
        self.committed_message.read().clone()
    }

    pub fn is_committed(&self) -> bool {
        self.committed_message() == COMMITTED
    }

    /// Observers marking the user once its save is committed.
    pub fn observers() -> Arc<CommitObservers<User>> {
        let observers = CommitObservers::new();
        observers.on(CommitAction::Committed, |user: &User| {
            *user.committed_message.write() = COMMITTED.to_string();
            Ok(())
        });
        observers
    }
}
