use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use minicq::{CompletionQueue, EventLoopBackend, FakeQueueBackend, Promise, QueueBackend, RunnerPool};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn promise_satisfaction_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("promise_satisfaction");
    group.throughput(Throughput::Elements(1));

    group.bench_function("set_value_and_get", |b| {
        b.iter(|| {
            let promise = Promise::new();
            let future = promise.get_future().unwrap();
            promise.set_value(black_box(42u64)).unwrap();
            black_box(future.get().unwrap());
        })
    });

    group.bench_function("map_chain_of_three", |b| {
        b.iter(|| {
            let promise = Promise::new();
            let chained = promise
                .get_future()
                .unwrap()
                .map(|r| r.unwrap() + 1)
                .map(|r| r.unwrap() + 1)
                .map(|r| r.unwrap() + 1);
            promise.set_value(black_box(0u64)).unwrap();
            black_box(chained.get().unwrap());
        })
    });

    group.finish();
}

fn timer_scheduling_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("timer_scheduling");
    group.throughput(Throughput::Elements(1));

    group.bench_function("schedule_and_cancel", |b| {
        let backend = EventLoopBackend::new();
        b.iter(|| {
            let future =
                backend.make_deadline_timer(black_box(Instant::now() + Duration::from_secs(60)));
            black_box(future.cancel());
            black_box(future.get().ok());
        })
    });

    group.finish();
}

fn timer_batch_scheduling_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("timer_batch_scheduling");

    for batch_size in [10, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*batch_size));
        group.bench_with_input(format!("batch_{}", batch_size), batch_size, |b, &size| {
            b.iter(|| {
                let backend = EventLoopBackend::new();
                let now = Instant::now();
                let timers: Vec<_> = (0..size)
                    .map(|i| {
                        backend
                            .make_deadline_timer(black_box(now + Duration::from_millis(i + 1)))
                    })
                    .collect();
                black_box(timers);
            })
        });
    }

    group.finish();
}

fn simulated_completion_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("simulated_completion");
    group.throughput(Throughput::Elements(1));

    group.bench_function("submit_and_simulate", |b| {
        let backend = Arc::new(FakeQueueBackend::new());
        b.iter(|| {
            backend.run_async(Box::new(|| {}));
            black_box(backend.simulate_completion(true));
        })
    });

    group.finish();
}

fn run_async_throughput_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("run_async_throughput");

    for batch_size in [10, 100].iter() {
        group.throughput(Throughput::Elements(*batch_size));
        group.bench_with_input(format!("batch_{}", batch_size), batch_size, |b, &size| {
            let queue = CompletionQueue::new();
            // Shuts the queue down when it goes out of scope.
            let _pool = RunnerPool::new(queue.clone(), 2).unwrap();
            b.iter(|| {
                let (tx, rx) = crossbeam_channel::bounded(size as usize);
                for _ in 0..size {
                    let tx = tx.clone();
                    queue.run_async(move || {
                        let _ = tx.send(());
                    });
                }
                for _ in 0..size {
                    rx.recv().unwrap();
                }
            });
        });
    }

    group.finish();
}

criterion_group!(
    queue_benches,
    promise_satisfaction_benchmark,
    timer_scheduling_benchmark,
    timer_batch_scheduling_benchmark,
    simulated_completion_benchmark,
    run_async_throughput_benchmark
);
criterion_main!(queue_benches);
