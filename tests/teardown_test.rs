/*!
 * Teardown Tests
 *
 * Once teardown begins, a thread that is about to block, or that has just been
 * woken, parks forever instead of touching the lock again. Each test uses its
 * own leaked signal so the process-wide one stays clear for other tests.
 */

use ai_os_sync::{LockBuilder, SyncConfig, TeardownSignal, WaitCondition};
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn private_config() -> (SyncConfig, &'static TeardownSignal) {
    let signal: &'static TeardownSignal = Box::leak(Box::new(TeardownSignal::new()));
    (SyncConfig::default().with_teardown(signal), signal)
}

#[test]
fn test_woken_waiter_parks_after_teardown() {
    let (config, signal) = private_config();
    let lock = Arc::new(LockBuilder::new("teardown woken").config(config).exclusive());
    let acquired = Arc::new(AtomicBool::new(false));
    lock.acquire();

    let waiter = {
        let (lock, acquired) = (lock.clone(), acquired.clone());
        thread::spawn(move || {
            lock.acquire();
            acquired.store(true, Ordering::SeqCst);
        })
    };

    while lock.contenders() == 0 {
        thread::sleep(Duration::from_millis(1));
    }
    signal.begin();
    lock.release();

    thread::sleep(Duration::from_millis(100));
    assert!(!waiter.is_finished());
    assert!(!acquired.load(Ordering::SeqCst));
    assert!(!lock.is_held_exclusive());
    // The parked thread never withdraws its contender slot.
    assert_eq!(lock.contenders(), 1);
}

#[test]
fn test_new_blocker_parks_after_teardown() {
    let (config, signal) = private_config();
    let lock = Arc::new(LockBuilder::new("teardown blocker").config(config).shared());
    lock.lock_exclusive();
    signal.begin();

    let reader = {
        let lock = lock.clone();
        thread::spawn(move || lock.lock_shared())
    };

    thread::sleep(Duration::from_millis(100));
    assert!(!reader.is_finished());
    assert_eq!(lock.contenders(), 0);
    lock.unlock_exclusive();
}

#[test]
fn test_condition_waiter_parks_after_teardown() {
    let (config, signal) = private_config();
    let lock = Arc::new(LockBuilder::new("teardown guard").config(config).exclusive());
    let cond = Arc::new(WaitCondition::new("teardown cond", lock.clone()));

    let waiter = {
        let (lock, cond) = (lock.clone(), cond.clone());
        thread::spawn(move || {
            let _guard = lock.lock();
            cond.wait();
        })
    };

    while cond.waiter_count() == 0 {
        thread::sleep(Duration::from_millis(1));
    }
    {
        let _guard = lock.lock();
        signal.begin();
        cond.signal();
    }

    thread::sleep(Duration::from_millis(100));
    assert!(!waiter.is_finished());
    assert_eq!(cond.waiter_count(), 1);
}

#[test]
fn test_drop_while_held_during_teardown_only_warns() {
    let (config, signal) = private_config();
    let lock = LockBuilder::new("teardown drop").config(config).exclusive();
    lock.acquire();
    signal.begin();
    drop(lock);
}
