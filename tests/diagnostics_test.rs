/*!
 * Diagnostics Tests
 * Contention ledger contents, registry dumps and JSON snapshots
 */

#![cfg(feature = "contention-ledger")]

use ai_os_sync::core::limits::CONTENTION_LOG_SIZE;
use ai_os_sync::{current_thread_id, ExclusiveLock, GlobalRegistry, LockBuilder, SharedExclusiveLock};
use pretty_assertions::assert_eq;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

fn contend_once(lock: &Arc<ExclusiveLock>, hold: Duration) {
    let held = Arc::new(Barrier::new(2));
    let holder = {
        let (lock, held) = (lock.clone(), held.clone());
        thread::spawn(move || {
            let _guard = lock.lock();
            held.wait();
            thread::sleep(hold);
            current_thread_id()
        })
    };
    held.wait();
    let _guard = lock.lock();
    drop(_guard);
    holder.join().unwrap();
}

#[test]
fn test_uncontended_lock_reports_never_contended() {
    let lock = ExclusiveLock::new("quiet");
    for _ in 0..10 {
        let _guard = lock.lock();
    }
    assert!(!lock.ledger().has_contended());
    assert_eq!(lock.ledger().snapshot().to_string(), "never contended");
}

#[test]
fn test_contended_acquire_is_recorded() {
    let lock = Arc::new(ExclusiveLock::new("recorded"));
    contend_once(&lock, Duration::from_millis(30));

    let snapshot = lock.ledger().snapshot();
    assert_eq!(snapshot.total_count, 1);
    assert!(snapshot.total_wait() >= Duration::from_millis(10));
    assert_eq!(snapshot.most_blocked(), Some(current_thread_id()));

    let mut out = Vec::new();
    lock.dump(&mut out).unwrap();
    let line = String::from_utf8(out).unwrap();
    assert!(line.contains("\"recorded\""));
    assert!(line.contains("contended"));
}

#[test]
fn test_repeated_wakes_record_one_acquisition() {
    let lock = Arc::new(ExclusiveLock::new("churned"));
    let held = Arc::new(Barrier::new(2));
    let holder = {
        let (lock, held) = (lock.clone(), held.clone());
        thread::spawn(move || {
            lock.acquire();
            held.wait();
            // Each release wakes the blocked thread, which usually loses the
            // race against the immediate re-acquire and goes back to sleep.
            for _ in 0..5 {
                thread::sleep(Duration::from_millis(5));
                lock.release();
                lock.acquire();
            }
            thread::sleep(Duration::from_millis(5));
            lock.release();
        })
    };
    held.wait();
    drop(lock.lock());
    holder.join().unwrap();

    let me = current_thread_id();
    let mine: u32 = lock
        .ledger()
        .snapshot()
        .entries
        .iter()
        .filter(|entry| entry.blocked == me)
        .map(|entry| entry.count)
        .sum();
    assert_eq!(mine, 1);
}

#[test]
fn test_ledger_footprint_is_constant() {
    let lock = Arc::new(ExclusiveLock::new("bounded"));
    let footprint = std::mem::size_of_val(lock.ledger());

    for _ in 0..(CONTENTION_LOG_SIZE * 3) {
        contend_once(&lock, Duration::from_millis(2));
    }

    let snapshot = lock.ledger().snapshot();
    assert!(snapshot.total_count as usize >= CONTENTION_LOG_SIZE * 3);
    assert_eq!(snapshot.entries.len(), CONTENTION_LOG_SIZE);
    assert_eq!(std::mem::size_of_val(lock.ledger()), footprint);
}

#[test]
fn test_shared_lock_contention_is_recorded() {
    let lock = Arc::new(SharedExclusiveLock::new("shared recorded"));
    let held = Arc::new(Barrier::new(2));
    let writer = {
        let (lock, held) = (lock.clone(), held.clone());
        thread::spawn(move || {
            let _writer = lock.write();
            held.wait();
            thread::sleep(Duration::from_millis(20));
        })
    };
    held.wait();
    drop(lock.read());
    writer.join().unwrap();
    assert!(lock.ledger().has_contended());
}

#[test]
fn test_dump_all_sections() {
    let busy = Arc::new(LockBuilder::new("dump busy").exclusive());
    let idle = LockBuilder::new("dump idle").exclusive();
    contend_once(&busy, Duration::from_millis(10));

    let mut out = Vec::new();
    GlobalRegistry::global().dump_all(&mut out).unwrap();
    let text = String::from_utf8(out).unwrap();

    let contended = text.find("(Contended)").unwrap();
    let quiet = text.find("(Never contended)").unwrap();
    let busy_at = text.find("\"dump busy\"").unwrap();
    let idle_at = text.find("\"dump idle\"").unwrap();
    assert!(contended < busy_at && busy_at < quiet);
    assert!(quiet < idle_at);
    drop(idle);
}

#[test]
fn test_snapshot_serializes() {
    let lock = LockBuilder::new("json snapshot").recursive(true).exclusive();
    let _guard = lock.lock();

    let report = GlobalRegistry::global()
        .snapshot()
        .into_iter()
        .find(|report| report.id == lock.id())
        .unwrap();
    let value = serde_json::to_value(&report).unwrap();
    assert_eq!(value["name"], "json snapshot");
    assert_eq!(value["kind"], "exclusive");
    assert_eq!(value["recursive"], true);
    assert_eq!(value["state"], 1);
    assert_eq!(value["owner"], current_thread_id().as_u64());
    assert_eq!(value["contention"]["total_count"], 0);
}
