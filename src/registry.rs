//! Async operation registry
//!
//! Tracks every in-flight operation of a completion queue, keyed by its
//! [`OperationTag`]. The registry is the single shared mutable structure of
//! the queue and is guarded by one mutex; the lock is always released before
//! any user callback is invoked, so callbacks may re-enter the queue (for
//! example, a timer continuation scheduling the next timer).
//!
//! Duplicate registration of a tag and notification of an unknown tag are
//! violated internal invariants and abort via `panic!` rather than being
//! reported as recoverable errors.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::operation::{AsyncOperation, OperationTag};

pub struct OperationRegistry {
    ops: Mutex<HashMap<OperationTag, Arc<dyn AsyncOperation>>>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self {
            ops: Mutex::new(HashMap::new()),
        }
    }

    /// Register `op` under a freshly minted tag, then invoke `starter` with
    /// that tag to begin the underlying asynchronous action. Registration
    /// happens-before the starter call, so a completion racing in from
    /// another thread always finds the operation.
    pub fn start(
        &self,
        op: Arc<dyn AsyncOperation>,
        starter: impl FnOnce(OperationTag),
    ) -> OperationTag {
        let tag = OperationTag::new();
        {
            let mut ops = self.ops.lock().unwrap();
            if ops.insert(tag, op).is_some() {
                panic!("operation tag {:?} registered while still outstanding", tag);
            }
        }
        starter(tag);
        tag
    }

    /// Deregister the operation for `tag` and deliver its completion. The
    /// operation is removed before the callback runs, so registering a new
    /// operation from inside the callback is safe.
    pub fn notify(&self, tag: OperationTag, ok: bool) {
        let op = { self.ops.lock().unwrap().remove(&tag) };
        match op {
            Some(op) => op.notify(ok),
            None => panic!("completion for unknown operation tag {:?}", tag),
        }
    }

    /// Like `notify`, but tolerates a tag that is no longer registered.
    /// Used on post-shutdown drain paths, where a flush may have reaped the
    /// operation while its completion event was still in flight. Returns
    /// whether a completion was delivered.
    pub fn try_notify(&self, tag: OperationTag, ok: bool) -> bool {
        let op = { self.ops.lock().unwrap().remove(&tag) };
        match op {
            Some(op) => {
                op.notify(ok);
                true
            }
            None => false,
        }
    }

    /// Invoke the cancel callback for `tag`, if still outstanding. Does not
    /// deregister: the completion for the operation still arrives later and
    /// is processed normally. An unknown tag is tolerated, since the
    /// completion may have raced ahead of the cancellation.
    pub fn cancel(&self, tag: OperationTag) {
        let op = { self.ops.lock().unwrap().get(&tag).cloned() };
        if let Some(op) = op {
            op.cancel();
        }
    }

    /// Cancel every outstanding operation.
    pub fn cancel_all(&self) {
        let ops: Vec<_> = { self.ops.lock().unwrap().values().cloned().collect() };
        tracing::debug!(count = ops.len(), "cancelling outstanding operations");
        for op in ops {
            op.cancel();
        }
    }

    /// Remove and return every outstanding operation.
    pub fn drain(&self) -> Vec<Arc<dyn AsyncOperation>> {
        let mut ops = self.ops.lock().unwrap();
        ops.drain().map(|(_, op)| op).collect()
    }

    /// Snapshot of the currently outstanding tags.
    pub fn outstanding(&self) -> Vec<OperationTag> {
        self.ops.lock().unwrap().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.ops.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for OperationRegistry {
    fn default() -> Self {
        Self::new()
    }
}
