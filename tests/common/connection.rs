use parking_lot::Mutex;
use std::sync::Arc;

use postgres_commit_callbacks::{
    TransactionCommitted, TransactionLevel, TransactionListener, TransactionResult, TransactionRolledBack,
};

/// In-memory transaction manager: counts nesting and notifies listeners the
/// way a real connection does, with the level already decremented.
pub struct MemoryConnection {
    name: String,
    level: Mutex<u32>,
    listeners: Vec<Arc<dyn TransactionListener>>,
}

impl MemoryConnection {
    pub fn new(name: &str, listener: Arc<dyn TransactionListener>) -> Self {
        Self {
            name: name.to_string(),
            level: Mutex::new(0),
            listeners: vec![listener],
        }
    }

    pub fn begin(&self) {
        *self.level.lock() += 1;
    }

    pub fn commit(&self) -> TransactionResult<()> {
        let level = self.close();
        let event = TransactionCommitted::new(self.name.clone(), level);
        for listener in &self.listeners {
            listener.on_transaction_committed(&event)?;
        }
        Ok(())
    }

    pub fn rollback(&self) -> TransactionResult<()> {
        let level = self.close();
        let event = TransactionRolledBack::new(self.name.clone(), level);
        for listener in &self.listeners {
            listener.on_transaction_rolled_back(&event)?;
        }
        Ok(())
    }

    fn close(&self) -> u32 {
        let mut level = self.level.lock();
        assert!(*level > 0, "no transaction open on '{}'", self.name);
        *level -= 1;
        *level
    }
}

impl TransactionLevel for MemoryConnection {
    fn connection_name(&self) -> &str {
        &self.name
    }

    fn transaction_level(&self) -> u32 {
        *self.level.lock()
    }
}
