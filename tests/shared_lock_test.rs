/*!
 * Shared/Exclusive Lock Tests
 * Reader concurrency, writer exclusivity and the timed exclusive path
 */

use ai_os_sync::{LockBuilder, SharedExclusiveLock, StrategyType, SyncConfig};
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

fn configs() -> Vec<SyncConfig> {
    let mut strategies = vec![StrategyType::Parking];
    if cfg!(target_os = "linux") {
        strategies.push(StrategyType::Futex);
    }
    strategies
        .into_iter()
        .map(|strategy| SyncConfig {
            strategy,
            ..Default::default()
        })
        .collect()
}

#[test]
fn test_five_readers_then_writer() {
    for config in configs() {
        let lock = Arc::new(LockBuilder::new("readers").config(config).shared());
        let all_holding = Arc::new(Barrier::new(6));
        let may_release = Arc::new(Barrier::new(6));

        let readers: Vec<_> = (0..5)
            .map(|_| {
                let (lock, all_holding, may_release) =
                    (lock.clone(), all_holding.clone(), may_release.clone());
                thread::spawn(move || {
                    lock.lock_shared();
                    all_holding.wait();
                    may_release.wait();
                    lock.unlock_shared();
                })
            })
            .collect();

        all_holding.wait();
        assert_eq!(lock.shared_count(), 5);
        let sixth = {
            let lock = lock.clone();
            thread::spawn(move || {
                (
                    lock.try_lock_exclusive(),
                    lock.try_lock_exclusive_timed(Duration::from_millis(20)),
                )
            })
            .join()
            .unwrap()
        };
        assert_eq!(sixth, (false, false));

        may_release.wait();
        for reader in readers {
            reader.join().unwrap();
        }

        let writer = {
            let lock = lock.clone();
            thread::spawn(move || {
                lock.lock_exclusive();
                let held = lock.is_exclusive_held();
                lock.unlock_exclusive();
                held
            })
        };
        assert!(writer.join().unwrap());
        assert_eq!(lock.shared_count(), 0);
        assert_eq!(lock.contenders(), 0);
    }
}

#[test]
fn test_reader_writer_exclusivity() {
    for config in configs() {
        let lock = Arc::new(LockBuilder::new("rw stress").config(config).shared());
        // -1 while a writer is inside, otherwise the number of readers inside.
        let occupancy = Arc::new(AtomicI32::new(0));

        let handles: Vec<_> = (0..6)
            .map(|worker| {
                let (lock, occupancy) = (lock.clone(), occupancy.clone());
                thread::spawn(move || {
                    for i in 0..1_000 {
                        if (i + worker) % 5 == 0 {
                            let _writer = lock.write();
                            assert_eq!(occupancy.swap(-1, Ordering::SeqCst), 0);
                            assert_eq!(occupancy.swap(0, Ordering::SeqCst), -1);
                        } else {
                            let _reader = lock.read();
                            assert!(occupancy.fetch_add(1, Ordering::SeqCst) >= 0);
                            assert!(occupancy.fetch_sub(1, Ordering::SeqCst) > 0);
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(lock.shared_count(), 0);
        assert!(!lock.is_exclusive_held());
    }
}

#[test]
fn test_try_lock_shared_fails_under_writer() {
    let lock = Arc::new(SharedExclusiveLock::new("writer held"));
    let _writer = lock.write();
    let other = lock.clone();
    assert!(!thread::spawn(move || other.try_lock_shared()).join().unwrap());
}

#[test]
fn test_timed_exclusive_waits_out_reader() {
    for config in configs() {
        let lock = Arc::new(LockBuilder::new("timed rw").config(config).shared());
        lock.lock_shared();

        let start = Instant::now();
        let writer = {
            let lock = lock.clone();
            thread::spawn(move || {
                let acquired = lock.try_lock_exclusive_timed(Duration::from_secs(5));
                if acquired {
                    lock.unlock_exclusive();
                }
                acquired
            })
        };
        thread::sleep(Duration::from_millis(30));
        lock.unlock_shared();
        assert!(writer.join().unwrap());
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}

#[test]
fn test_timed_exclusive_gives_up() {
    let lock = Arc::new(SharedExclusiveLock::new("never free"));
    let _reader = lock.read();
    let other = lock.clone();
    let start = Instant::now();
    let acquired = thread::spawn(move || other.try_lock_exclusive_timed(Duration::from_millis(60)))
        .join()
        .unwrap();
    assert!(!acquired);
    assert!(start.elapsed() >= Duration::from_millis(60));
    assert_eq!(lock.contenders(), 0);
    assert_eq!(lock.shared_count(), 1);
}

#[test]
fn test_shared_bookkeeping_is_per_thread() {
    let lock = Arc::new(SharedExclusiveLock::new("bookkeeping"));
    let _reader = lock.read();
    assert!(lock.is_shared_held());
    let other = lock.clone();
    assert!(!thread::spawn(move || other.is_shared_held()).join().unwrap());
}
