use sqlx::pool::PoolConnection;
use sqlx::Postgres;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Executor wraps the pooled connection a session runs its transaction on.
///
/// Repositories clone it and lock `conn` to run queries inside whatever
/// transaction or savepoint the session currently has open. The slot is
/// emptied once the outermost transaction closes.
#[derive(Clone)]
pub struct Executor {
    pub conn: Arc<Mutex<Option<PoolConnection<Postgres>>>>,
}

impl Executor {
    /// Creates a new Executor from a pooled PostgreSQL connection.
    pub fn new(conn: PoolConnection<Postgres>) -> Self {
        Self {
            conn: Arc::new(Mutex::new(Some(conn))),
        }
    }

    /// Runs a transaction control statement (`SAVEPOINT`, `RELEASE`, ...).
    pub(crate) async fn execute_control(&self, sql: &str) -> Result<(), sqlx::Error> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or(sqlx::Error::PoolClosed)?;
        sqlx::Executor::execute(&mut **conn, sql).await?;
        Ok(())
    }

    /// Takes ownership of the connection, leaving None in its place.
    /// This should only be called when closing the outermost transaction.
    pub(crate) async fn take_connection(&self) -> Result<PoolConnection<Postgres>, sqlx::Error> {
        self.conn.lock().await.take().ok_or(sqlx::Error::PoolClosed)
    }
}
