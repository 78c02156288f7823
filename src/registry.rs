//! Pending commit callbacks, grouped per connection and per transaction depth.
//!
//! The registry is a plain service object: construct one, share it behind an
//! `Arc`, and hand it to whatever adapter translates transaction events into
//! [`CallbackRegistry::flush_all`] and [`CallbackRegistry::discard`] calls.
//!
//! Buckets are created on first registration and removed as soon as they are
//! empty, so a process juggling many short-lived connections (one per tenant,
//! say) never accumulates empty entries.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::error::{BoxError, TransactionError, TransactionResult};

/// Transaction nesting depth used as a bucket key.
pub type Depth = u32;

/// Outcome of a deferred callback.
pub type CallbackResult = Result<(), BoxError>;

type Callback = Box<dyn FnOnce() -> CallbackResult + Send + 'static>;

/// Per-depth view of one connection's pending callbacks.
pub type ConnectionSnapshot = BTreeMap<Depth, Vec<CallbackHandle>>;

/// Per-connection view of the whole registry.
pub type RegistrySnapshot = HashMap<String, ConnectionSnapshot>;

/// Process-unique identity of a registered callback.
///
/// Ids grow monotonically in registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CallbackId(u64);

impl CallbackId {
    /// Reported for callbacks that ran on the spot because no transaction was open.
    pub const IMMEDIATE: CallbackId = CallbackId(0);

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CallbackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Inspectable identity of a pending callback; the closure itself stays hidden.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackHandle {
    pub id: CallbackId,
    /// Depth the callback was registered at; a nested commit may move it to a
    /// shallower bucket but never changes this.
    pub depth: Depth,
    pub label: Option<String>,
}

impl CallbackHandle {
    fn flush_key(&self) -> (Depth, CallbackId) {
        (self.depth, self.id)
    }
}

struct PendingCallback {
    handle: CallbackHandle,
    callback: Callback,
}

type Buckets = BTreeMap<Depth, VecDeque<PendingCallback>>;

/// Registry of callbacks waiting for their enclosing transaction to commit.
///
/// All methods take `&self`. The internal lock is never held while a callback
/// runs, so a callback may register further callbacks without deadlocking.
pub struct CallbackRegistry {
    connections: Mutex<HashMap<String, Buckets>>,
    next_id: AtomicU64,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Append `callback` to the bucket for `(connection, depth)`.
    ///
    /// Fails with [`TransactionError::InvalidArgument`] when `depth` is negative.
    pub fn register<F>(&self, connection: &str, depth: i64, callback: F) -> TransactionResult<CallbackId>
    where
        F: FnOnce() -> CallbackResult + Send + 'static,
    {
        self.enqueue(connection, depth, None, Box::new(callback))
    }

    /// Same as [`register`](Self::register), attaching a label visible in snapshots.
    pub fn register_labeled<F>(
        &self,
        connection: &str,
        depth: i64,
        label: impl Into<String>,
        callback: F,
    ) -> TransactionResult<CallbackId>
    where
        F: FnOnce() -> CallbackResult + Send + 'static,
    {
        self.enqueue(connection, depth, Some(label.into()), Box::new(callback))
    }

    fn enqueue(
        &self,
        connection: &str,
        depth: i64,
        label: Option<String>,
        callback: Callback,
    ) -> TransactionResult<CallbackId> {
        let depth = checked_depth(depth)?;
        let id = CallbackId(self.next_id.fetch_add(1, Ordering::SeqCst));

        let pending = PendingCallback {
            handle: CallbackHandle { id, depth, label },
            callback,
        };

        let mut connections = self.connections.lock();
        let bucket = connections
            .entry(connection.to_owned())
            .or_default()
            .entry(depth)
            .or_default();
        // Buckets stay sorted by (registration depth, id); promoted callbacks
        // from deeper levels keep running after this level's own.
        let at = bucket.partition_point(|queued| queued.handle.flush_key() < pending.handle.flush_key());
        bucket.insert(at, pending);
        drop(connections);

        trace!(connection, depth, callback_id = id.0, "Callback registered");
        Ok(id)
    }

    /// Run every callback pending for `connection`.
    ///
    /// Callbacks run by ascending registration depth, then insertion order,
    /// regardless of which bucket a nested commit moved them into.
    /// Each callback leaves its bucket before it is invoked, so it runs at most
    /// once even if it fails or registers more work. The first failure aborts
    /// the flush: callbacks after it stay pending. Callbacks registered while
    /// the flush is running are left for a later flush.
    ///
    /// Returns the number of callbacks executed.
    pub fn flush_all(&self, connection: &str) -> TransactionResult<usize> {
        let registered_before = self.next_id.load(Ordering::SeqCst);
        let mut executed = 0;

        while let Some(pending) = self.take_next(connection, registered_before) {
            let PendingCallback { handle, callback } = pending;
            let depth = handle.depth;
            trace!(connection, depth, callback_id = handle.id.0, "Running deferred callback");

            if let Err(source) = callback() {
                warn!(
                    connection,
                    depth,
                    callback_id = handle.id.0,
                    error = %source,
                    "Deferred callback failed, aborting flush"
                );
                return Err(TransactionError::CallbackFailure {
                    connection: connection.to_owned(),
                    depth,
                    id: handle.id,
                    source,
                });
            }
            executed += 1;
        }

        if executed > 0 {
            debug!(connection, executed, "Flushed deferred callbacks");
        }
        Ok(executed)
    }

    /// Pop the eligible callback with the smallest (registration depth, id),
    /// dropping buckets and connection entries that become empty.
    fn take_next(&self, connection: &str, registered_before: u64) -> Option<PendingCallback> {
        let mut connections = self.connections.lock();
        let buckets = connections.get_mut(connection)?;

        // Buckets are sorted, so the first eligible entry is each bucket's minimum.
        let (depth, index) = buckets
            .iter()
            .filter_map(|(depth, bucket)| {
                bucket
                    .iter()
                    .position(|pending| pending.handle.id.0 < registered_before)
                    .map(|index| (*depth, index, bucket[index].handle.flush_key()))
            })
            .min_by_key(|(_, _, key)| *key)
            .map(|(depth, index, _)| (depth, index))?;

        let bucket = buckets.get_mut(&depth)?;
        let pending = bucket.remove(index)?;
        if bucket.is_empty() {
            buckets.remove(&depth);
        }
        if buckets.is_empty() {
            connections.remove(connection);
        }
        Some(pending)
    }

    /// Drop the bucket at exactly `(connection, depth)` without running it.
    ///
    /// A missing bucket is not an error. Returns the number of callbacks dropped.
    pub fn discard(&self, connection: &str, depth: i64) -> TransactionResult<usize> {
        let depth = checked_depth(depth)?;

        let dropped = {
            let mut connections = self.connections.lock();
            let Some(buckets) = connections.get_mut(connection) else {
                return Ok(0);
            };
            let dropped = buckets.remove(&depth);
            if buckets.is_empty() {
                connections.remove(connection);
            }
            dropped
        };

        // Closures are dropped outside the lock; their captures may run arbitrary Drop code.
        let count = dropped.map_or(0, |bucket| bucket.len());
        if count > 0 {
            debug!(connection, depth, discarded = count, "Discarded deferred callbacks");
        }
        Ok(count)
    }

    /// Merge the bucket at `closed_depth` into the bucket one level up.
    ///
    /// Used when a nested transaction commits into its parent: its callbacks
    /// now live or die with the parent, while still flushing after the
    /// parent's own callbacks. Returns the number of callbacks moved.
    pub fn promote(&self, connection: &str, closed_depth: i64) -> TransactionResult<usize> {
        let closed = checked_depth(closed_depth)?;
        if closed == 0 {
            return Err(TransactionError::InvalidArgument { depth: closed_depth });
        }

        let mut connections = self.connections.lock();
        let Some(buckets) = connections.get_mut(connection) else {
            return Ok(0);
        };
        let Some(mut moved) = buckets.remove(&closed) else {
            return Ok(0);
        };

        let count = moved.len();
        let parent = buckets.entry(closed - 1).or_default();
        parent.append(&mut moved);
        parent
            .make_contiguous()
            .sort_by_key(|pending| pending.handle.flush_key());
        trace!(connection, from = closed, into = closed - 1, moved = count, "Promoted deferred callbacks");
        Ok(count)
    }

    /// Number of callbacks pending for `connection`, across all depths.
    pub fn pending(&self, connection: &str) -> usize {
        self.connections
            .lock()
            .get(connection)
            .map_or(0, |buckets| buckets.values().map(VecDeque::len).sum())
    }

    /// True when no connection has pending callbacks.
    pub fn is_empty(&self) -> bool {
        self.connections.lock().is_empty()
    }

    /// Handles of everything pending, per connection and depth.
    pub fn snapshot(&self) -> RegistrySnapshot {
        self.connections
            .lock()
            .iter()
            .map(|(connection, buckets)| (connection.clone(), snapshot_buckets(buckets)))
            .collect()
    }

    /// Handles pending for one connection; empty when nothing is pending.
    pub fn connection_snapshot(&self, connection: &str) -> ConnectionSnapshot {
        self.connections
            .lock()
            .get(connection)
            .map(snapshot_buckets)
            .unwrap_or_default()
    }
}

impl Default for CallbackRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("connections", &self.snapshot())
            .finish()
    }
}

fn checked_depth(depth: i64) -> TransactionResult<Depth> {
    Depth::try_from(depth).map_err(|_| TransactionError::InvalidArgument { depth })
}

fn snapshot_buckets(buckets: &Buckets) -> ConnectionSnapshot {
    buckets
        .iter()
        .map(|(depth, bucket)| {
            let handles = bucket.iter().map(|pending| pending.handle.clone()).collect();
            (*depth, handles)
        })
        .collect()
}
