/*!
 * Parking Word-Wait Backend
 *
 * Portable backend on parking_lot_core. The word address is the parking key
 * and the `validate` callback re-reads the word under the bucket lock, which
 * gives the same check-and-sleep atomicity as FUTEX_WAIT. Requeue maps onto
 * `unpark_requeue`.
 *
 * # Design
 *
 * - No per-word allocation: parking_lot_core's global hash table holds queues
 * - Timeouts become absolute deadlines
 * - Works on every platform parking_lot supports
 */

use super::traits::{word_key, WaitOutcome, WakeResult, WordWaiter};
use crate::core::errors::WaitResult;
use parking_lot_core::{
    park, unpark_all, unpark_one, unpark_requeue, ParkResult, RequeueOp, DEFAULT_PARK_TOKEN,
    DEFAULT_UNPARK_TOKEN,
};
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::{Duration, Instant};

/// Parking-lot backed word waiter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParkingWaiter;

impl ParkingWaiter {
    pub const fn new() -> Self {
        Self
    }

    fn requeue(&self, from: &AtomicI32, to: &AtomicI32, op: RequeueOp) -> WakeResult {
        // SAFETY: the validate and callback closures neither park nor unpark.
        let result = unsafe {
            unpark_requeue(
                word_key(from),
                word_key(to),
                || op,
                |_, _| DEFAULT_UNPARK_TOKEN,
            )
        };
        WakeResult::from_count(result.requeued_threads + result.unparked_threads)
    }
}

impl WordWaiter for ParkingWaiter {
    fn wait(
        &self,
        word: &AtomicI32,
        expected: i32,
        timeout: Option<Duration>,
    ) -> WaitResult<WaitOutcome> {
        // A deadline past what `Instant` can represent parks untimed.
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));

        // SAFETY: the callbacks neither park nor unpark, and do not panic.
        let result = unsafe {
            park(
                word_key(word),
                || word.load(Ordering::SeqCst) == expected,
                || {},
                |_key, _was_last| {},
                DEFAULT_PARK_TOKEN,
                deadline,
            )
        };

        Ok(match result {
            ParkResult::Unparked(_) => WaitOutcome::Woken,
            ParkResult::Invalid => WaitOutcome::ValueChanged,
            ParkResult::TimedOut => WaitOutcome::TimedOut,
        })
    }

    fn wake_one(&self, word: &AtomicI32) -> WakeResult {
        // SAFETY: the callback neither parks nor unparks.
        let result = unsafe { unpark_one(word_key(word), |_| DEFAULT_UNPARK_TOKEN) };
        WakeResult::from_count(result.unparked_threads)
    }

    fn wake_all(&self, word: &AtomicI32) -> WakeResult {
        // SAFETY: plain unpark of every thread on this key.
        let unparked = unsafe { unpark_all(word_key(word), DEFAULT_UNPARK_TOKEN) };
        WakeResult::from_count(unparked)
    }

    fn requeue_one(&self, from: &AtomicI32, to: &AtomicI32) -> WaitResult<WakeResult> {
        Ok(self.requeue(from, to, RequeueOp::RequeueOne))
    }

    fn requeue_all(&self, from: &AtomicI32, to: &AtomicI32) -> WaitResult<WakeResult> {
        Ok(self.requeue(from, to, RequeueOp::RequeueAll))
    }

    fn name(&self) -> &'static str {
        "parking"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn wait_until_parked(word: &AtomicI32, handle: &thread::JoinHandle<WaitOutcome>) -> WakeResult {
        loop {
            let result = ParkingWaiter.wake_one(word);
            if result.is_woken() || handle.is_finished() {
                return result;
            }
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_parking_value_changed() {
        let word = AtomicI32::new(1);
        let outcome = ParkingWaiter.wait(&word, 0, None).unwrap();
        assert_eq!(outcome, WaitOutcome::ValueChanged);
    }

    #[test]
    fn test_parking_timeout() {
        let word = AtomicI32::new(0);
        let start = Instant::now();
        let outcome = ParkingWaiter
            .wait(&word, 0, Some(Duration::from_millis(50)))
            .unwrap();
        assert!(outcome.timed_out());
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_parking_unrepresentable_timeout_parks_untimed() {
        let word = Arc::new(AtomicI32::new(0));
        let word_clone = word.clone();
        let handle = thread::spawn(move || {
            ParkingWaiter
                .wait(&word_clone, 0, Some(Duration::MAX))
                .unwrap()
        });

        assert_eq!(wait_until_parked(&word, &handle), WakeResult::Woken(1));
        assert_eq!(handle.join().unwrap(), WaitOutcome::Woken);
    }

    #[test]
    fn test_parking_wake_one() {
        let word = Arc::new(AtomicI32::new(0));
        let word_clone = word.clone();
        let handle = thread::spawn(move || {
            ParkingWaiter
                .wait(&word_clone, 0, Some(Duration::from_secs(2)))
                .unwrap()
        });

        assert_eq!(wait_until_parked(&word, &handle), WakeResult::Woken(1));
        assert_eq!(handle.join().unwrap(), WaitOutcome::Woken);
    }

    #[test]
    fn test_parking_requeue_moves_waiter() {
        let from = Arc::new(AtomicI32::new(0));
        let to = Arc::new(AtomicI32::new(0));
        let from_clone = from.clone();
        let handle = thread::spawn(move || {
            ParkingWaiter
                .wait(&from_clone, 0, Some(Duration::from_secs(2)))
                .unwrap()
        });

        let mut moved = WakeResult::NoWaiters;
        while !moved.is_woken() {
            thread::sleep(Duration::from_millis(5));
            moved = ParkingWaiter.requeue_one(&from, &to).unwrap();
        }
        assert_eq!(moved, WakeResult::Woken(1));

        // Now on `to`'s queue: waking `from` finds nobody.
        assert_eq!(ParkingWaiter.wake_one(&from), WakeResult::NoWaiters);
        assert_eq!(ParkingWaiter.wake_one(&to), WakeResult::Woken(1));
        assert_eq!(handle.join().unwrap(), WaitOutcome::Woken);
    }
}
