//! Dispatch benchmark suite.
//!
//! Benchmarks the hot paths every loop iteration touches:
//! - Closure posting and draining through the ring buffer
//! - Timer insertion and due-timer dispatch
//! - Uncontended `FastMutex` lock/unlock, verified and unverified
//! - Synchronous notifier fan-out
//!
//! Performance targets:
//! - Uncontended lock/unlock: < 20ns
//! - Post + drain: < 100ns per closure

#![allow(missing_docs)]
#![allow(clippy::semicolon_if_nothing_returned)]

use criterion::{
    black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput,
};

use dispatchkit::notify::{Notifier, SubscribeMode};
use dispatchkit::runtime::{ClosureQueue, Loop, TimerQueue};
use dispatchkit::sync::{unverified, DeadLockDetector, FastMutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

// =============================================================================
// CLOSURE QUEUE
// =============================================================================

fn bench_closure_queue(c: &mut Criterion) {
    let mut group = c.benchmark_group("closure_queue");

    for &count in &[10usize, 100, 1000] {
        group.throughput(Throughput::Elements(count as u64));

        group.bench_with_input(BenchmarkId::new("push_run_all", count), &count, |b, &n| {
            let counter = Arc::new(AtomicUsize::new(0));
            b.iter_batched(
                || ClosureQueue::new(16),
                |queue| {
                    for _ in 0..n {
                        let counter = Arc::clone(&counter);
                        queue.push(Box::new(move || {
                            counter.fetch_add(1, Ordering::Relaxed);
                        }));
                    }
                    black_box(queue.run_all())
                },
                BatchSize::SmallInput,
            )
        });

        group.bench_with_input(BenchmarkId::new("loop_post_drain", count), &count, |b, &n| {
            let event_loop = Loop::local();
            b.iter(|| {
                for i in 0..n {
                    event_loop.post_function_without_wake(move || {
                        black_box(i);
                    });
                }
                event_loop.resume_once(false);
            })
        });
    }

    group.finish();
}

// =============================================================================
// TIMER QUEUE
// =============================================================================

fn bench_timer_queue(c: &mut Criterion) {
    let mut group = c.benchmark_group("timer_queue");

    for &count in &[10usize, 100, 1000] {
        group.throughput(Throughput::Elements(count as u64));

        group.bench_with_input(BenchmarkId::new("insert", count), &count, |b, &n| {
            b.iter_batched(
                TimerQueue::new,
                |queue| {
                    let base = Instant::now();
                    let handles: Vec<_> = (0..n)
                        .map(|i| {
                            let deadline = base + Duration::from_micros((i * 7919 % 1000) as u64);
                            queue.delay_function(deadline, || {}).0
                        })
                        .collect();
                    black_box(handles)
                },
                BatchSize::SmallInput,
            )
        });

        group.bench_with_input(BenchmarkId::new("run_all_due", count), &count, |b, &n| {
            b.iter_batched(
                || {
                    let queue = TimerQueue::new();
                    let now = Instant::now();
                    let handles: Vec<_> = (0..n)
                        .map(|_| queue.delay_function(now, || {}).0)
                        .collect();
                    (queue, handles, now)
                },
                |(queue, handles, now)| {
                    black_box(queue.run_all(now));
                    handles
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

// =============================================================================
// FAST MUTEX
// =============================================================================

fn bench_fast_mutex(c: &mut Criterion) {
    let mut group = c.benchmark_group("fast_mutex");

    let plain = unverified(0u64);
    group.bench_function("uncontended_unverified", |b| {
        b.iter(|| {
            *plain.lock() += 1;
        })
    });

    DeadLockDetector::set_enabled(true);
    let verified = FastMutex::new(0u64);
    group.bench_function("uncontended_verified", |b| {
        b.iter(|| {
            *verified.lock() += 1;
        })
    });

    DeadLockDetector::set_enabled(false);
    group.bench_function("uncontended_detector_off", |b| {
        b.iter(|| {
            *verified.lock() += 1;
        })
    });

    let std_mutex = parking_lot::Mutex::new(0u64);
    group.bench_function("parking_lot_baseline", |b| {
        b.iter(|| {
            *std_mutex.lock() += 1;
        })
    });

    group.finish();
}

// =============================================================================
// NOTIFIER
// =============================================================================

fn bench_notifier(c: &mut Criterion) {
    let mut group = c.benchmark_group("notifier");

    for &subscribers in &[1usize, 10, 100] {
        group.throughput(Throughput::Elements(subscribers as u64));
        group.bench_with_input(
            BenchmarkId::new("notify_synchronous", subscribers),
            &subscribers,
            |b, &n| {
                let notifier: Notifier<u64> = Notifier::new();
                let sum = Arc::new(AtomicUsize::new(0));
                let _handles: Vec<_> = (0..n)
                    .map(|_| {
                        let sum = Arc::clone(&sum);
                        notifier.subscribe(
                            move |v| {
                                sum.fetch_add(v as usize, Ordering::Relaxed);
                            },
                            SubscribeMode::SYNCHRONOUS,
                        )
                    })
                    .collect();
                b.iter(|| notifier.notify(black_box(1)))
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_closure_queue,
    bench_timer_queue,
    bench_fast_mutex,
    bench_notifier
);
criterion_main!(benches);
