/*!
 * Synchronization Primitives Benchmarks
 *
 * Uncontended and contended lock cost per backend, compared against
 * parking_lot::Mutex, plus condition handoff latency
 */

use ai_os_sync::core::sync::Waiter;
use ai_os_sync::{
    LockBuilder, SharedExclusiveLock, StrategyType, SyncConfig, WaitCondition, WordWaiter,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

fn strategies() -> Vec<StrategyType> {
    let mut strategies = vec![StrategyType::Parking];
    if cfg!(target_os = "linux") {
        strategies.push(StrategyType::Futex);
    }
    strategies
}

fn config(strategy: StrategyType) -> SyncConfig {
    SyncConfig {
        strategy,
        ..Default::default()
    }
}

fn bench_uncontended(c: &mut Criterion) {
    let mut group = c.benchmark_group("uncontended");

    let lock = LockBuilder::new("bench uncontended").exclusive();
    group.bench_function("exclusive_acquire_release", |b| {
        b.iter(|| {
            lock.acquire();
            lock.release();
        });
    });

    let recursive = LockBuilder::new("bench recursive").recursive(true).exclusive();
    recursive.acquire();
    group.bench_function("recursive_reentry", |b| {
        b.iter(|| {
            recursive.acquire();
            recursive.release();
        });
    });
    recursive.release();

    let rw = SharedExclusiveLock::new("bench rw");
    group.bench_function("shared_read", |b| {
        b.iter(|| black_box(rw.read()));
    });
    group.bench_function("shared_write", |b| {
        b.iter(|| black_box(rw.write()));
    });

    let baseline = parking_lot::Mutex::new(0u64);
    group.bench_function("parking_lot_mutex", |b| {
        b.iter(|| {
            *baseline.lock() += 1;
        });
    });

    group.finish();
}

fn bench_contended_counter(c: &mut Criterion) {
    let mut group = c.benchmark_group("contended_counter");
    group.sample_size(20);
    const THREADS: usize = 4;
    const ITERS: u64 = 2_000;

    for strategy in strategies() {
        group.bench_with_input(
            BenchmarkId::new("exclusive", format!("{strategy:?}")),
            &strategy,
            |b, &strategy| {
                b.iter(|| {
                    let lock = Arc::new(
                        LockBuilder::new("bench counter")
                            .config(config(strategy))
                            .exclusive(),
                    );
                    let counter = Arc::new(AtomicU64::new(0));
                    let handles: Vec<_> = (0..THREADS)
                        .map(|_| {
                            let (lock, counter) = (lock.clone(), counter.clone());
                            thread::spawn(move || {
                                for _ in 0..ITERS {
                                    let _guard = lock.lock();
                                    counter.fetch_add(1, Ordering::Relaxed);
                                }
                            })
                        })
                        .collect();
                    for handle in handles {
                        handle.join().unwrap();
                    }
                    black_box(counter.load(Ordering::Relaxed))
                });
            },
        );
    }

    group.bench_function("parking_lot_mutex", |b| {
        b.iter(|| {
            let lock = Arc::new(parking_lot::Mutex::new(0u64));
            let handles: Vec<_> = (0..THREADS)
                .map(|_| {
                    let lock = lock.clone();
                    thread::spawn(move || {
                        for _ in 0..ITERS {
                            *lock.lock() += 1;
                        }
                    })
                })
                .collect();
            for handle in handles {
                handle.join().unwrap();
            }
            black_box(*lock.lock())
        });
    });

    group.finish();
}

fn bench_condition_handoff(c: &mut Criterion) {
    let mut group = c.benchmark_group("condition_handoff");
    group.sample_size(20);
    const ROUNDS: u64 = 500;

    for strategy in strategies() {
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{strategy:?}")),
            &strategy,
            |b, &strategy| {
                b.iter(|| {
                    let lock = Arc::new(
                        LockBuilder::new("bench handoff")
                            .config(config(strategy))
                            .exclusive(),
                    );
                    let cond = Arc::new(WaitCondition::new("bench turn", lock.clone()));
                    let turn = Arc::new(AtomicU64::new(0));

                    let peer = {
                        let (lock, cond, turn) = (lock.clone(), cond.clone(), turn.clone());
                        thread::spawn(move || {
                            let _guard = lock.lock();
                            for round in 0..ROUNDS {
                                while turn.load(Ordering::Relaxed) != round * 2 + 1 {
                                    cond.wait();
                                }
                                turn.fetch_add(1, Ordering::Relaxed);
                                cond.signal();
                            }
                        })
                    };

                    {
                        let _guard = lock.lock();
                        for round in 0..ROUNDS {
                            while turn.load(Ordering::Relaxed) != round * 2 {
                                cond.wait();
                            }
                            turn.fetch_add(1, Ordering::Relaxed);
                            cond.signal();
                        }
                    }
                    peer.join().unwrap();
                });
            },
        );
    }

    group.finish();
}

fn bench_wake_no_waiters(c: &mut Criterion) {
    let mut group = c.benchmark_group("wake_no_waiters");
    for strategy in strategies() {
        let waiter = Waiter::from_config(&config(strategy));
        let word = AtomicI32::new(0);
        group.bench_function(waiter.name(), |b| {
            b.iter(|| black_box(waiter.wake_one(&word)));
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_uncontended,
    bench_contended_counter,
    bench_condition_handoff,
    bench_wake_no_waiters
);

criterion_main!(benches);
