//! Postgres Commit Callbacks
//!
//! Callbacks registered while a transaction is open run once the outermost
//! transaction on the same connection commits, and are dropped when the
//! transaction they were registered in (or any enclosing one) rolls back.
//!
//! [`CallbackRegistry`] keeps the pending callbacks per connection and depth,
//! [`TransactionEventsSubscriber`] feeds it commit/rollback events, and
//! [`PostgresUnitOfWork`] is a savepoint-aware transaction manager that emits
//! those events.

pub mod error;
pub mod events;
pub mod executor;
pub mod lifecycle;
pub mod registry;
pub mod subscriber;
pub mod unit_of_work;

pub use error::{BoxError, TransactionError, TransactionResult};
pub use events::{TransactionCommitted, TransactionLevel, TransactionListener, TransactionRolledBack};
pub use executor::Executor;
pub use lifecycle::{CommitAction, CommitObservers, ModelEvent};
pub use registry::{CallbackHandle, CallbackId, CallbackRegistry, CallbackResult, Depth};
pub use subscriber::{Deferral, TransactionEventsSubscriber};
pub use unit_of_work::{PostgresUnitOfWork, PostgresUnitOfWorkSession, UnitOfWork, UnitOfWorkSession};
