use async_trait::async_trait;
use parking_lot::RwLock;
use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::events::{TransactionCommitted, TransactionLevel, TransactionListener, TransactionRolledBack};
use crate::subscriber::TransactionEventsSubscriber;
use crate::{Executor, TransactionError, TransactionResult};

/// Unit of Work pattern for managing database transactions.
///
/// The UnitOfWork manages the lifecycle of database transactions and provides
/// a factory method to create new transaction sessions.
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    type Session: UnitOfWorkSession;

    /// Begin a new transaction session at level 1.
    async fn begin(&self) -> TransactionResult<Self::Session>;
}

/// A database transaction session that supports nesting through savepoints.
///
/// The session owns the nesting level of its connection. Every successful
/// commit or rollback notifies the registered listeners with the level
/// reached after the close.
#[async_trait]
pub trait UnitOfWorkSession: TransactionLevel + Send + Sync {
    /// Get the executor for this session (provides access to the connection).
    fn executor(&self) -> &Executor;

    /// Register a component that needs to be notified of transaction events.
    fn register_listener(&self, listener: Arc<dyn TransactionListener>);

    /// Open a nested transaction.
    async fn savepoint(&self) -> TransactionResult<()>;

    /// Commit the innermost open transaction and notify listeners.
    async fn commit(&self) -> TransactionResult<()>;

    /// Roll back the innermost open transaction and notify listeners.
    async fn rollback(&self) -> TransactionResult<()>;
}

/// Default implementation of UnitOfWork for PostgreSQL.
pub struct PostgresUnitOfWork {
    pool: Arc<PgPool>,
    name: String,
    listeners: Vec<Arc<dyn TransactionListener>>,
}

impl PostgresUnitOfWork {
    /// Connection name used unless [`named`](Self::named) overrides it.
    pub const DEFAULT_CONNECTION: &'static str = "default";

    /// Create a new PostgresUnitOfWork with the given connection pool.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self {
            pool,
            name: Self::DEFAULT_CONNECTION.to_string(),
            listeners: Vec::new(),
        }
    }

    /// Name the logical connection, e.g. one per tenant.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Subscribe `listener` to every session this unit of work begins.
    pub fn subscribe(mut self, listener: Arc<dyn TransactionListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Route this unit of work's transaction events to `subscriber`.
    pub fn with_commit_callbacks(self, subscriber: TransactionEventsSubscriber) -> Self {
        self.subscribe(Arc::new(subscriber))
    }
}

#[async_trait]
impl UnitOfWork for PostgresUnitOfWork {
    type Session = PostgresUnitOfWorkSession;

    async fn begin(&self) -> TransactionResult<Self::Session> {
        let mut conn = self.pool.acquire().await?;
        sqlx::Executor::execute(&mut *conn, "BEGIN").await?;

        let session = PostgresUnitOfWorkSession::new(self.name.clone(), conn);
        for listener in &self.listeners {
            session.register_listener(Arc::clone(listener));
        }
        debug!(session_id = %session.id, connection = %self.name, "Transaction started");
        Ok(session)
    }
}

/// Default implementation of UnitOfWorkSession for PostgreSQL.
pub struct PostgresUnitOfWorkSession {
    id: Uuid,
    name: String,
    executor: Executor,
    level: AtomicU32,
    listeners: Arc<RwLock<Vec<Arc<dyn TransactionListener>>>>,
}

impl PostgresUnitOfWorkSession {
    /// Create a session from a connection on which `BEGIN` was already issued.
    pub fn new(name: impl Into<String>, conn: PoolConnection<Postgres>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            executor: Executor::new(conn),
            level: AtomicU32::new(1),
            listeners: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Issue the statement closing the outermost transaction and hand the
    /// connection back to the pool. The session ends at level 0 either way.
    async fn close_outermost(&self, statement: &str) -> Result<(), sqlx::Error> {
        let mut conn = self.executor.take_connection().await?;
        let outcome = sqlx::Executor::execute(&mut *conn, statement).await;
        self.level.store(0, Ordering::SeqCst);
        outcome.map(|_| ())
    }

    fn notify_committed(&self, level: u32) -> TransactionResult<()> {
        let event = TransactionCommitted::new(self.name.clone(), level);
        let listeners = self.listeners.read().clone();
        for listener in listeners.iter() {
            listener.on_transaction_committed(&event)?;
        }
        Ok(())
    }

    fn notify_rolled_back(&self, level: u32) -> TransactionResult<()> {
        let event = TransactionRolledBack::new(self.name.clone(), level);
        let listeners = self.listeners.read().clone();
        for listener in listeners.iter() {
            listener.on_transaction_rolled_back(&event)?;
        }
        Ok(())
    }
}

impl TransactionLevel for PostgresUnitOfWorkSession {
    fn connection_name(&self) -> &str {
        &self.name
    }

    fn transaction_level(&self) -> u32 {
        self.level.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UnitOfWorkSession for PostgresUnitOfWorkSession {
    fn executor(&self) -> &Executor {
        &self.executor
    }

    fn register_listener(&self, listener: Arc<dyn TransactionListener>) {
        self.listeners.write().push(listener);
    }

    async fn savepoint(&self) -> TransactionResult<()> {
        let level = self.transaction_level();
        if level == 0 {
            return Err(TransactionError::NotInTransaction(self.name.clone()));
        }

        let next = level + 1;
        self.executor
            .execute_control(&format!("SAVEPOINT {}", savepoint_name(next)))
            .await?;
        self.level.store(next, Ordering::SeqCst);
        debug!(session_id = %self.id, connection = %self.name, level = next, "Savepoint created");
        Ok(())
    }

    async fn commit(&self) -> TransactionResult<()> {
        match self.transaction_level() {
            0 => Err(TransactionError::NotInTransaction(self.name.clone())),
            1 => {
                if let Err(error) = self.close_outermost("COMMIT").await {
                    warn!(session_id = %self.id, connection = %self.name, %error, "Commit failed");
                    self.notify_rolled_back(0)?;
                    return Err(TransactionError::CommitFailed(error.to_string()));
                }
                debug!(session_id = %self.id, connection = %self.name, "Transaction committed");
                // Storage commit is done; listener errors surface as CallbackFailure.
                self.notify_committed(0)
            }
            level => {
                self.executor
                    .execute_control(&format!("RELEASE SAVEPOINT {}", savepoint_name(level)))
                    .await?;
                self.level.store(level - 1, Ordering::SeqCst);
                debug!(session_id = %self.id, connection = %self.name, level, "Savepoint released");
                self.notify_committed(level - 1)
            }
        }
    }

    async fn rollback(&self) -> TransactionResult<()> {
        match self.transaction_level() {
            0 => Err(TransactionError::NotInTransaction(self.name.clone())),
            1 => {
                let outcome = self.close_outermost("ROLLBACK").await;
                self.notify_rolled_back(0)?;
                if let Err(error) = outcome {
                    warn!(session_id = %self.id, connection = %self.name, %error, "Rollback failed");
                    return Err(TransactionError::RollbackFailed(error.to_string()));
                }
                debug!(session_id = %self.id, connection = %self.name, "Transaction rolled back");
                Ok(())
            }
            level => {
                self.executor
                    .execute_control(&format!("ROLLBACK TO SAVEPOINT {}", savepoint_name(level)))
                    .await?;
                self.level.store(level - 1, Ordering::SeqCst);
                debug!(session_id = %self.id, connection = %self.name, level, "Savepoint rolled back");
                self.notify_rolled_back(level - 1)
            }
        }
    }
}

impl Drop for PostgresUnitOfWorkSession {
    fn drop(&mut self) {
        let level = *self.level.get_mut();
        if level == 0 {
            return;
        }

        warn!(
            session_id = %self.id,
            connection = %self.name,
            level,
            "Session dropped with an open transaction, rolling back"
        );
        for after in (0..level).rev() {
            if let Err(error) = self.notify_rolled_back(after) {
                warn!(session_id = %self.id, connection = %self.name, %error, "Rollback listener failed");
            }
        }
        *self.level.get_mut() = 0;

        let conn = self.executor.conn.try_lock().ok().and_then(|mut guard| guard.take());
        if let (Some(mut conn), Ok(handle)) = (conn, tokio::runtime::Handle::try_current()) {
            handle.spawn(async move {
                if let Err(error) = sqlx::Executor::execute(&mut *conn, "ROLLBACK").await {
                    warn!(%error, "Rollback of dropped session failed");
                }
            });
        }
    }
}

fn savepoint_name(level: u32) -> String {
    format!("trans{level}")
}
