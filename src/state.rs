//! Shared state cell between a Promise and its Future
//!
//! This module provides the synchronized box that one promise writes and one
//! future reads. The cell holds a tri-state payload (empty, value, or error),
//! a waker list for blocked waiters, an optional cancellation callback from
//! the promise side, and an optional continuation installed by `map`/`then`.
//!
//! All payload access goes through the cell mutex. Wakers, cancellation
//! callbacks, and continuations are taken out under the lock but invoked
//! after it is released, so user code reached from a completion may call
//! back into the future/promise API without deadlocking.

use std::sync::{Arc, Mutex};
use std::task::Waker;

use crate::config::EXPECTED_WAITER_COUNT;
use crate::error::{Error, Result};

/// The tri-state payload of a cell. Exactly one variant holds at a time;
/// once the cell is satisfied the payload is only ever taken, never rewritten.
enum Payload<T> {
    Empty,
    Value(T),
    Error(Error),
}

impl<T> Payload<T> {
    fn take(&mut self) -> Result<T> {
        match std::mem::replace(self, Payload::Empty) {
            Payload::Value(value) => Ok(value),
            Payload::Error(error) => Err(error),
            Payload::Empty => Err(Error::NoState),
        }
    }
}

type Continuation<T> = Box<dyn FnOnce(Result<T>) + Send>;
type CancelCallback = Box<dyn FnOnce() + Send>;

struct Inner<T> {
    payload: Payload<T>,
    satisfied: bool,
    retrieved: bool,
    wakers: Vec<Waker>,
    cancel: Option<CancelCallback>,
    continuation: Option<Continuation<T>>,
}

/// The synchronized state shared by exactly one promise and one future.
pub(crate) struct SharedCell<T> {
    inner: Mutex<Inner<T>>,
}

impl<T> SharedCell<T> {
    pub(crate) fn new(cancel: Option<CancelCallback>) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                payload: Payload::Empty,
                satisfied: false,
                retrieved: false,
                wakers: Vec::with_capacity(EXPECTED_WAITER_COUNT),
                cancel,
                continuation: None,
            }),
        })
    }

    /// Store a terminal outcome, waking all waiters. If a continuation is
    /// installed the payload is handed to it (on this thread, outside the
    /// lock) instead of being stored.
    pub(crate) fn satisfy(&self, result: Result<T>) -> Result<()> {
        let (handoff, wakers) = {
            let mut inner = self.inner.lock().unwrap();
            if inner.satisfied {
                return Err(Error::AlreadySatisfied);
            }
            inner.satisfied = true;
            // A satisfied cell can no longer be cancelled.
            inner.cancel = None;
            let wakers = std::mem::take(&mut inner.wakers);
            match inner.continuation.take() {
                Some(continuation) => (Some((continuation, result)), wakers),
                None => {
                    inner.payload = match result {
                        Ok(value) => Payload::Value(value),
                        Err(error) => Payload::Error(error),
                    };
                    (None, wakers)
                }
            }
        };

        for waker in wakers {
            waker.wake();
        }
        if let Some((continuation, result)) = handoff {
            continuation(result);
        }
        Ok(())
    }

    /// Install a continuation that consumes the payload. If the cell is
    /// already satisfied the continuation runs immediately on this thread.
    pub(crate) fn set_continuation(&self, continuation: Continuation<T>) {
        let immediate = {
            let mut inner = self.inner.lock().unwrap();
            if inner.satisfied {
                Some((continuation, inner.payload.take()))
            } else {
                inner.continuation = Some(continuation);
                None
            }
        };
        if let Some((continuation, result)) = immediate {
            continuation(result);
        }
    }

    /// Request cancellation. Invokes the promise-side callback and returns
    /// true only if the cell has not been satisfied yet.
    pub(crate) fn cancel(&self) -> bool {
        let callback = {
            let mut inner = self.inner.lock().unwrap();
            if inner.satisfied {
                return false;
            }
            inner.cancel.take()
        };
        match callback {
            Some(callback) => {
                callback();
                true
            }
            None => false,
        }
    }

    /// Mark the future side as handed out. The transition happens exactly
    /// once; a second attempt reports the misuse.
    pub(crate) fn mark_retrieved(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.retrieved {
            return Err(Error::AlreadyRetrieved);
        }
        inner.retrieved = true;
        Ok(())
    }

    pub(crate) fn is_satisfied(&self) -> bool {
        self.inner.lock().unwrap().satisfied
    }

    /// Register a waker to be fired on satisfaction. Returns true if the
    /// cell is already satisfied, in which case nothing is registered.
    pub(crate) fn register_waker(&self, waker: &Waker) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.satisfied {
            return true;
        }
        inner.wakers.push(waker.clone());
        false
    }

    /// Take the payload if the cell is satisfied.
    pub(crate) fn try_take(&self) -> Option<Result<T>> {
        let mut inner = self.inner.lock().unwrap();
        if inner.satisfied {
            Some(inner.payload.take())
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn satisfy_stores_value_once() {
        let cell = SharedCell::new(None);
        assert!(cell.satisfy(Ok(7)).is_ok());
        assert_eq!(cell.satisfy(Ok(8)), Err(Error::AlreadySatisfied));
        assert_eq!(cell.try_take(), Some(Ok(7)));
    }

    #[test]
    fn satisfy_stores_error() {
        let cell = SharedCell::<i32>::new(None);
        assert!(cell.satisfy(Err(Error::Cancelled)).is_ok());
        assert_eq!(cell.try_take(), Some(Err(Error::Cancelled)));
    }

    #[test]
    fn payload_taken_exactly_once() {
        let cell = SharedCell::new(None);
        cell.satisfy(Ok(1)).unwrap();
        assert_eq!(cell.try_take(), Some(Ok(1)));
        // A second take observes the consumed cell.
        assert_eq!(cell.try_take(), Some(Err(Error::NoState)));
    }

    #[test]
    fn cancel_before_satisfaction_runs_callback() {
        let fired = Arc::new(AtomicBool::new(false));
        let fired_clone = fired.clone();
        let cell = SharedCell::<i32>::new(Some(Box::new(move || {
            fired_clone.store(true, Ordering::SeqCst);
        })));

        assert!(cell.cancel());
        assert!(fired.load(Ordering::SeqCst));
        // The callback is consumed; a second cancel is a no-op.
        assert!(!cell.cancel());
    }

    #[test]
    fn cancel_after_satisfaction_is_noop() {
        let fired = Arc::new(AtomicBool::new(false));
        let fired_clone = fired.clone();
        let cell = SharedCell::new(Some(Box::new(move || {
            fired_clone.store(true, Ordering::SeqCst);
        })));

        cell.satisfy(Ok(3)).unwrap();
        assert!(!cell.cancel());
        assert!(!fired.load(Ordering::SeqCst));
        assert_eq!(cell.try_take(), Some(Ok(3)));
    }

    #[test]
    fn retrieved_transitions_once() {
        let cell = SharedCell::<()>::new(None);
        assert!(cell.mark_retrieved().is_ok());
        assert_eq!(cell.mark_retrieved(), Err(Error::AlreadyRetrieved));
    }

    #[test]
    fn continuation_runs_on_satisfaction() {
        let seen = Arc::new(Mutex::new(None));
        let seen_clone = seen.clone();
        let cell = SharedCell::new(None);
        cell.set_continuation(Box::new(move |result| {
            *seen_clone.lock().unwrap() = Some(result);
        }));

        cell.satisfy(Ok(11)).unwrap();
        assert_eq!(*seen.lock().unwrap(), Some(Ok(11)));
        // The continuation consumed the payload.
        assert_eq!(cell.try_take(), Some(Err(Error::NoState)));
    }

    #[test]
    fn continuation_on_satisfied_cell_runs_immediately() {
        let seen = Arc::new(Mutex::new(None));
        let seen_clone = seen.clone();
        let cell = SharedCell::new(None);
        cell.satisfy(Ok(5)).unwrap();
        cell.set_continuation(Box::new(move |result| {
            *seen_clone.lock().unwrap() = Some(result);
        }));
        assert_eq!(*seen.lock().unwrap(), Some(Ok(5)));
    }
}
