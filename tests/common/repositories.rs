use sqlx::Row;
use std::sync::Arc;
use uuid::Uuid;

use postgres_commit_callbacks::{
    CommitObservers, Deferral, ModelEvent, PostgresUnitOfWorkSession, TransactionEventsSubscriber,
    TransactionResult, UnitOfWorkSession,
};

use super::entities::User;

/// User repository that raises commit-aware model events on writes.
pub struct UserRepository {
    subscriber: TransactionEventsSubscriber,
    observers: Arc<CommitObservers<User>>,
}

impl UserRepository {
    pub fn new(subscriber: TransactionEventsSubscriber) -> Self {
        Self {
            subscriber,
            observers: User::observers(),
        }
    }

    /// Insert `user` on the session's connection and raise `saved`.
    pub async fn create(&self, session: &PostgresUnitOfWorkSession, user: &Arc<User>) -> TransactionResult<Deferral> {
        {
            let mut conn_guard = session.executor().conn.lock().await;
            let conn = conn_guard.as_mut().ok_or(sqlx::Error::PoolClosed)?;
            sqlx::query("INSERT INTO users (id, name, email) VALUES ($1, $2, $3)")
                .bind(user.id)
                .bind(&user.name)
                .bind(&user.email)
                .execute(&mut **conn)
                .await?;
        }

        self.observers
            .model_event(&self.subscriber, session, ModelEvent::Saved, Arc::clone(user))
    }

    pub async fn exists(&self, session: &PostgresUnitOfWorkSession, id: Uuid) -> TransactionResult<bool> {
        let mut conn_guard = session.executor().conn.lock().await;
        let conn = conn_guard.as_mut().ok_or(sqlx::Error::PoolClosed)?;
        let row = sqlx::query("SELECT COUNT(*) AS count FROM users WHERE id = $1")
            .bind(id)
            .fetch_one(&mut **conn)
            .await?;
        let count: i64 = row.get("count");
        Ok(count > 0)
    }
}
