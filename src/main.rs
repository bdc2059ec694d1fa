/*!
 * lockstat - Contention Workload Driver
 *
 * Runs a short contended workload over every primitive and prints the lock
 * registry:
 * - Exclusive lock guarding a shared counter
 * - Shared/exclusive lock with mostly-reader traffic
 * - Bounded queue handed between producers and consumers through a condition
 *
 * Environment variables:
 * - LOCKSTAT_THREADS: worker threads per workload (default: 4)
 * - LOCKSTAT_ITERS: iterations per worker (default: 10000)
 * - LOCKSTAT_JSON: also print the registry as JSON (default: false)
 * - SYNC_STRATEGY / SYNC_BRIEF_WAIT_ITERS / SYNC_TRY_LOCK_SPINS: see `SyncConfig::from_env`
 */

use ai_os_sync::core::sync::Waiter;
use ai_os_sync::monitoring::span_workload;
use ai_os_sync::{
    init_tracing, ExclusiveLock, GlobalRegistry, LockBuilder, LockLevel, SharedExclusiveLock,
    SyncConfig, WaitCondition, WordWaiter,
};
use std::cell::UnsafeCell;
use std::error::Error;
use std::io::Write;
use std::sync::Arc;
use std::thread;
use std::thread::JoinHandle;
use std::time::Instant;
use thiserror::Error;
use tracing::{info, warn};

/// Plain data protected by one of the locks under test
struct Protected<T>(UnsafeCell<T>);

// SAFETY: every access in this binary happens under the lock paired with it.
unsafe impl<T: Send> Sync for Protected<T> {}

impl<T> Protected<T> {
    fn new(value: T) -> Self {
        Self(UnsafeCell::new(value))
    }

    /// # Safety
    /// Caller holds the lock paired with this value exclusively.
    #[allow(clippy::mut_from_ref)]
    unsafe fn get(&self) -> &mut T {
        &mut *self.0.get()
    }

    /// # Safety
    /// Caller holds at least shared access to the paired lock.
    unsafe fn get_shared(&self) -> &T {
        &*self.0.get()
    }
}

/// A workload thread ended by panicking
#[derive(Debug, Error)]
#[error("{workload} worker panicked")]
struct WorkerPanicked {
    workload: &'static str,
}

fn join_worker<T>(workload: &'static str, handle: JoinHandle<T>) -> Result<T, WorkerPanicked> {
    handle.join().map_err(|_| {
        warn!(workload, "worker thread panicked");
        WorkerPanicked { workload }
    })
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn counter_workload(
    lock: &Arc<ExclusiveLock>,
    threads: usize,
    iters: u64,
) -> Result<u64, WorkerPanicked> {
    let span = span_workload("exclusive counter", threads, iters);
    let _entered = span.enter();
    let counter = Arc::new(Protected::new(0u64));

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let (lock, counter) = (lock.clone(), counter.clone());
            thread::spawn(move || {
                for _ in 0..iters {
                    let _guard = lock.lock();
                    // SAFETY: `lock` is held.
                    unsafe { *counter.get() += 1 };
                }
            })
        })
        .collect();
    for handle in handles {
        join_worker("exclusive counter", handle)?;
    }

    let _guard = lock.lock();
    // SAFETY: `lock` is held.
    Ok(unsafe { *counter.get() })
}

fn reader_writer_workload(
    lock: &Arc<SharedExclusiveLock>,
    threads: usize,
    iters: u64,
) -> Result<u64, WorkerPanicked> {
    let span = span_workload("shared table", threads, iters);
    let _entered = span.enter();
    let table = Arc::new(Protected::new(vec![0u64; 64]));

    let handles: Vec<_> = (0..threads)
        .map(|worker| {
            let (lock, table) = (lock.clone(), table.clone());
            thread::spawn(move || {
                let mut seen = 0u64;
                for i in 0..iters {
                    if i % 16 == 0 {
                        let _writer = lock.write();
                        // SAFETY: exclusive access held.
                        let slots = unsafe { table.get() };
                        let len = slots.len();
                        slots[(i as usize + worker) % len] += 1;
                    } else {
                        let _reader = lock.read();
                        // SAFETY: shared access held.
                        let slots = unsafe { table.get_shared() };
                        seen = seen.wrapping_add(slots[i as usize % slots.len()]);
                    }
                }
                seen
            })
        })
        .collect();
    for handle in handles {
        join_worker("shared table", handle)?;
    }

    let _reader = lock.read();
    // SAFETY: shared access held.
    Ok(unsafe { table.get_shared().iter().sum() })
}

fn queue_workload(
    lock: &Arc<ExclusiveLock>,
    threads: usize,
    iters: u64,
) -> Result<u64, WorkerPanicked> {
    const CAPACITY: usize = 8;

    let span = span_workload("bounded queue", threads * 2, iters);
    let _entered = span.enter();
    let not_empty = Arc::new(WaitCondition::new("queue not empty", lock.clone()));
    let not_full = Arc::new(WaitCondition::new("queue not full", lock.clone()));
    let queue = Arc::new(Protected::new(std::collections::VecDeque::<u64>::new()));

    let producers: Vec<_> = (0..threads)
        .map(|_| {
            let (lock, not_empty, not_full, queue) =
                (lock.clone(), not_empty.clone(), not_full.clone(), queue.clone());
            thread::spawn(move || {
                for item in 0..iters {
                    let _guard = lock.lock();
                    // SAFETY: `lock` is held, including after each wait returns.
                    while unsafe { queue.get() }.len() >= CAPACITY {
                        not_full.wait();
                    }
                    unsafe { queue.get() }.push_back(item);
                    not_empty.signal();
                }
            })
        })
        .collect();

    let consumers: Vec<_> = (0..threads)
        .map(|_| {
            let (lock, not_empty, not_full, queue) =
                (lock.clone(), not_empty.clone(), not_full.clone(), queue.clone());
            thread::spawn(move || {
                let mut taken = 0u64;
                for _ in 0..iters {
                    let _guard = lock.lock();
                    // SAFETY: `lock` is held, including after each wait returns.
                    loop {
                        if let Some(item) = unsafe { queue.get() }.pop_front() {
                            taken = taken.wrapping_add(item);
                            break;
                        }
                        not_empty.wait();
                    }
                    not_full.signal();
                }
                taken
            })
        })
        .collect();

    for producer in producers {
        join_worker("bounded queue producer", producer)?;
    }
    let mut drained = 0u64;
    for consumer in consumers {
        drained = drained.wrapping_add(join_worker("bounded queue consumer", consumer)?);
    }
    Ok(drained)
}

fn main() -> Result<(), Box<dyn Error>> {
    init_tracing();

    let threads: usize = env_or("LOCKSTAT_THREADS", 4usize).max(1);
    let iters: u64 = env_or("LOCKSTAT_ITERS", 10_000u64);
    let json = std::env::var("LOCKSTAT_JSON")
        .map(|v| v == "1" || v == "true")
        .unwrap_or(false);
    let config = SyncConfig::from_env();
    let backend = Waiter::from_config(&config);

    info!(threads, iters, backend = backend.name(), "lockstat starting");

    // Locks live until the registry has been dumped.
    let counter_lock = Arc::new(
        LockBuilder::new("lockstat counter")
            .level(LockLevel::new(20))
            .config(config)
            .exclusive(),
    );
    let table_lock = Arc::new(
        LockBuilder::new("lockstat table")
            .level(LockLevel::new(10))
            .config(config)
            .shared(),
    );
    let queue_lock = Arc::new(
        LockBuilder::new("lockstat queue")
            .level(LockLevel::new(30))
            .config(config)
            .exclusive(),
    );
    let _idle = ExclusiveLock::new("lockstat idle");

    let start = Instant::now();
    let total = counter_workload(&counter_lock, threads, iters)?;
    info!(total, expected = threads as u64 * iters, elapsed = ?start.elapsed(), "counter workload done");

    let start = Instant::now();
    let sum = reader_writer_workload(&table_lock, threads, iters)?;
    info!(sum, elapsed = ?start.elapsed(), "reader/writer workload done");

    let start = Instant::now();
    let drained = queue_workload(&queue_lock, threads, iters)?;
    info!(drained, elapsed = ?start.elapsed(), "queue workload done");

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    GlobalRegistry::global().dump_all(&mut out)?;
    if json {
        GlobalRegistry::global().dump_json(&mut out)?;
    }
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workloads_complete() {
        let counter = Arc::new(LockBuilder::new("test counter").exclusive());
        let table = Arc::new(LockBuilder::new("test table").shared());
        let queue = Arc::new(LockBuilder::new("test queue").exclusive());

        assert_eq!(counter_workload(&counter, 3, 200).unwrap(), 600);
        // Every 16th iteration of each worker bumps one slot.
        assert_eq!(reader_writer_workload(&table, 3, 64).unwrap(), 3 * 4);
        let per_producer: u64 = (0..100).sum();
        assert_eq!(queue_workload(&queue, 2, 100).unwrap(), 2 * per_producer);
    }

    #[test]
    fn test_worker_panic_is_reported() {
        let handle = thread::spawn(|| -> u64 { panic!("worker failure") });
        let err = join_worker("failing", handle).unwrap_err();
        assert_eq!(err.to_string(), "failing worker panicked");
        assert_eq!(join_worker("fine", thread::spawn(|| 7u64)).unwrap(), 7);
    }
}
