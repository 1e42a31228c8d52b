//! Unit tests for the future/promise pair

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use minicq::error::Error;
use minicq::{Future, Promise, WaitStatus};
use proptest::prelude::*;

#[test]
fn value_roundtrip() {
    let promise = Promise::new();
    let future = promise.get_future().unwrap();
    promise.set_value("payload".to_string()).unwrap();
    assert_eq!(future.get().unwrap(), "payload");
}

#[test]
fn error_roundtrip() {
    let promise = Promise::<u32>::new();
    let future = promise.get_future().unwrap();
    promise.set_error(Error::DeadlineExceeded).unwrap();
    assert_eq!(future.get(), Err(Error::DeadlineExceeded));
}

#[test]
fn future_is_handed_out_once() {
    let promise = Promise::<u32>::new();
    let _future = promise.get_future().unwrap();
    assert_eq!(promise.get_future().err(), Some(Error::AlreadyRetrieved));
    // The misuse does not poison the pair.
    promise.set_value(1).unwrap();
    assert_eq!(_future.get().unwrap(), 1);
}

#[test]
fn satisfaction_is_single_use() {
    let promise = Promise::new();
    let _future = promise.get_future().unwrap();
    promise.set_value(1).unwrap();
    assert_eq!(promise.set_value(2), Err(Error::AlreadySatisfied));
}

#[test]
fn abandoned_promise_breaks_the_future() {
    let promise = Promise::<u32>::new();
    let future = promise.get_future().unwrap();
    thread::spawn(move || drop(promise)).join().unwrap();
    assert_eq!(future.get(), Err(Error::BrokenPromise));
}

#[test]
fn wait_until_past_deadline_times_out() {
    let promise = Promise::<u32>::new();
    let future = promise.get_future().unwrap();
    assert_eq!(
        future.wait_until(Instant::now()).unwrap(),
        WaitStatus::Timeout
    );
}

#[test]
fn wait_reports_ready_without_consuming() {
    let promise = Promise::new();
    let future = promise.get_future().unwrap();
    promise.set_value(5).unwrap();
    future.wait().unwrap();
    assert_eq!(
        future.wait_for(Duration::from_millis(1)).unwrap(),
        WaitStatus::Ready
    );
    assert_eq!(future.get().unwrap(), 5);
}

#[test]
fn first_satisfaction_wins_the_race() {
    for _ in 0..50 {
        let promise = Arc::new(Promise::new());
        let future = promise.get_future().unwrap();
        let mut outcomes = Vec::new();
        thread::scope(|scope| {
            let writers: Vec<_> = (0..2)
                .map(|i| {
                    let promise = promise.clone();
                    scope.spawn(move || promise.set_value(i))
                })
                .collect();
            for writer in writers {
                outcomes.push(writer.join().unwrap());
            }
        });

        let successes = outcomes.iter().filter(|o| o.is_ok()).count();
        assert_eq!(successes, 1);
        assert!(future.get().is_ok());
    }
}

#[test]
fn map_chain_applies_in_order() {
    let promise = Promise::new();
    let chained = promise
        .get_future()
        .unwrap()
        .map(|r| r.unwrap() + 1)
        .map(|r| r.unwrap() * 10)
        .map(|r| format!("result={}", r.unwrap()));
    promise.set_value(3).unwrap();
    assert_eq!(chained.get().unwrap(), "result=40");
}

#[test]
fn then_chain_across_threads() {
    let promise = Promise::new();
    let chained = promise.get_future().unwrap().then(|r: Result<u32, _>| {
        let value = r.unwrap();
        let inner = Promise::new();
        let inner_future = inner.get_future().unwrap();
        thread::spawn(move || {
            inner.set_value(value * 2).unwrap();
        });
        inner_future
    });

    thread::spawn(move || {
        promise.set_value(4).unwrap();
    });
    assert_eq!(chained.get().unwrap(), 8);
}

#[test]
fn continuation_panic_is_contained() {
    let panicked = Arc::new(AtomicBool::new(false));
    let panicked_clone = panicked.clone();
    let promise = Promise::<u32>::new();
    let chained = promise
        .get_future()
        .unwrap()
        .map(|_| -> u32 { panic!("continuation failure") })
        .map(move |r| {
            if matches!(r, Err(Error::ContinuationPanicked(_))) {
                panicked_clone.store(true, Ordering::SeqCst);
            }
            0
        });

    promise.set_value(1).unwrap();
    chained.get().unwrap();
    assert!(panicked.load(Ordering::SeqCst));
}

#[test]
fn invalid_future_is_inert() {
    let future = Future::<u32>::invalid();
    assert!(!future.is_valid());
    assert!(!future.is_ready());
    assert!(!future.cancel());
    assert_eq!(future.wait(), Err(Error::NoState));
}

proptest! {
    #[test]
    fn any_value_roundtrips(value in any::<i64>()) {
        let promise = Promise::new();
        let future = promise.get_future().unwrap();
        promise.set_value(value).unwrap();
        prop_assert_eq!(future.get().unwrap(), value);
    }

    #[test]
    fn any_string_survives_a_map(value in ".*") {
        let promise = Promise::new();
        let future = promise.get_future().unwrap().map(|r| r.unwrap());
        promise.set_value(value.clone()).unwrap();
        prop_assert_eq!(future.get().unwrap(), value);
    }
}
