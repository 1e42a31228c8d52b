//! Async operation kinds
//!
//! Every unit of work submitted to a completion queue (a timer, a posted
//! functor, an RPC step) is wrapped as an [`AsyncOperation`] and registered
//! under an [`OperationTag`]. The queue later delivers exactly one
//! `notify(ok)` per registration; `cancel` may be called at any time before
//! that and is best-effort.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use crate::error::Error;
use crate::future::Promise;

/// A unique identifier for an in-flight operation. Tags are never reused
/// while the operation they name is outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OperationTag(u64);

static TAG_COUNTER: AtomicU64 = AtomicU64::new(1);

impl Default for OperationTag {
    fn default() -> Self {
        Self::new()
    }
}

impl OperationTag {
    /// Generates a new unique OperationTag
    pub fn new() -> Self {
        OperationTag(TAG_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// One outstanding unit of queued work.
///
/// `notify` is invoked at most once, after the operation has been
/// deregistered, with `ok = true` for natural completion and `ok = false`
/// for a cancelled or drained completion. `cancel` is cooperative: the
/// matching completion still arrives afterwards and is processed normally.
pub trait AsyncOperation: Send + Sync {
    fn notify(&self, ok: bool);
    fn cancel(&self);
}

/// Timer-backed operation. Resolves its future with the scheduled expiration
/// instant on success, or `Cancelled` when interrupted. The `Option` take
/// under the mutex arbitrates the race between cancellation and natural
/// expiry so exactly one outcome is delivered.
pub(crate) struct TimerOperation {
    deadline: Instant,
    promise: Mutex<Option<Promise<Instant>>>,
}

impl TimerOperation {
    pub(crate) fn new(deadline: Instant, promise: Promise<Instant>) -> Self {
        Self {
            deadline,
            promise: Mutex::new(Some(promise)),
        }
    }
}

impl AsyncOperation for TimerOperation {
    fn notify(&self, ok: bool) {
        if let Some(promise) = self.promise.lock().unwrap().take() {
            let _ = if ok {
                promise.set_value(self.deadline)
            } else {
                promise.set_error(Error::Cancelled)
            };
        }
    }

    fn cancel(&self) {
        if let Some(promise) = self.promise.lock().unwrap().take() {
            let _ = promise.set_error(Error::Cancelled);
        }
    }
}

/// A posted functor, as submitted through `run_async`. Runs on notification
/// with `ok = true`; a false notification or a cancellation drops it
/// silently. Either way the functor is taken out exactly once.
pub(crate) struct CallableOperation {
    functor: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl CallableOperation {
    pub(crate) fn new(functor: Box<dyn FnOnce() + Send>) -> Self {
        Self {
            functor: Mutex::new(Some(functor)),
        }
    }
}

impl AsyncOperation for CallableOperation {
    fn notify(&self, ok: bool) {
        let functor = self.functor.lock().unwrap().take();
        match functor {
            Some(functor) if ok => functor(),
            Some(_) => tracing::trace!("functor dropped by failed completion"),
            None => {}
        }
    }

    fn cancel(&self) {
        if self.functor.lock().unwrap().take().is_some() {
            tracing::trace!("functor dropped by cancellation");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn tag_uniqueness() {
        let a = OperationTag::new();
        let b = OperationTag::new();
        let c = OperationTag::new();
        assert_ne!(a, b);
        assert_ne!(b, c);
        assert_ne!(a, c);
    }

    #[test]
    fn timer_notify_resolves_with_deadline() {
        let deadline = Instant::now() + Duration::from_millis(5);
        let promise = Promise::new();
        let future = promise.get_future().unwrap();
        let op = TimerOperation::new(deadline, promise);

        op.notify(true);
        assert_eq!(future.get().unwrap(), deadline);
    }

    #[test]
    fn timer_cancel_wins_over_later_notify() {
        let promise = Promise::new();
        let future = promise.get_future().unwrap();
        let op = TimerOperation::new(Instant::now(), promise);

        op.cancel();
        // The completion still arrives afterwards and must be a no-op.
        op.notify(true);
        assert_eq!(future.get(), Err(Error::Cancelled));
    }

    #[test]
    fn callable_runs_exactly_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        let op = CallableOperation::new(Box::new(move || {
            count_clone.fetch_add(1, Ordering::SeqCst);
        }));

        op.notify(true);
        op.notify(true);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cancelled_callable_never_runs() {
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        let op = CallableOperation::new(Box::new(move || {
            count_clone.fetch_add(1, Ordering::SeqCst);
        }));

        op.cancel();
        op.notify(true);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn failed_completion_drops_callable() {
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        let op = CallableOperation::new(Box::new(move || {
            count_clone.fetch_add(1, Ordering::SeqCst);
        }));

        op.notify(false);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
