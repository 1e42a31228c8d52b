//! Deadline-ordered timer table
//!
//! Tracks pending timers for the event loop backend. Entries are indexed
//! both by deadline (for expiry scans and computing how long a runner may
//! sleep) and by tag (for O(log n) cancellation). A single mutex guards both
//! indexes; removal under that mutex is the arbitration point that decides
//! whether a timer expires, is cancelled, or is drained at shutdown.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Instant;

use crate::operation::OperationTag;

struct TableInner {
    by_deadline: BTreeMap<(Instant, OperationTag), ()>,
    by_tag: HashMap<OperationTag, Instant>,
}

pub(crate) struct TimerTable {
    inner: Mutex<TableInner>,
}

impl TimerTable {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(TableInner {
                by_deadline: BTreeMap::new(),
                by_tag: HashMap::new(),
            }),
        }
    }

    pub(crate) fn insert(&self, deadline: Instant, tag: OperationTag) {
        let mut inner = self.inner.lock().unwrap();
        inner.by_deadline.insert((deadline, tag), ());
        inner.by_tag.insert(tag, deadline);
    }

    /// Remove the entry for `tag`. Returns false if the timer already
    /// expired, was cancelled, or was drained; the caller that observes
    /// `true` owns the timer's outcome.
    pub(crate) fn remove(&self, tag: OperationTag) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.by_tag.remove(&tag) {
            Some(deadline) => {
                inner.by_deadline.remove(&(deadline, tag));
                true
            }
            None => false,
        }
    }

    /// Remove and return every timer whose deadline is at or before `now`,
    /// in deadline order.
    pub(crate) fn pop_due(&self, now: Instant) -> Vec<OperationTag> {
        let mut inner = self.inner.lock().unwrap();
        let mut due = Vec::new();
        while let Some((&(deadline, tag), ())) = inner.by_deadline.iter().next() {
            if deadline > now {
                break;
            }
            inner.by_deadline.remove(&(deadline, tag));
            inner.by_tag.remove(&tag);
            due.push(tag);
        }
        due
    }

    /// The earliest pending deadline, if any.
    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        let inner = self.inner.lock().unwrap();
        inner.by_deadline.keys().next().map(|&(deadline, _)| deadline)
    }

    /// Remove and return every pending timer, regardless of deadline.
    pub(crate) fn drain(&self) -> Vec<OperationTag> {
        let mut inner = self.inner.lock().unwrap();
        inner.by_deadline.clear();
        inner.by_tag.drain().map(|(tag, _)| tag).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().unwrap().by_tag.len()
    }
}
