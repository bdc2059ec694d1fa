/*!
 * Futex Word-Wait Backend (Linux)
 *
 * Direct `futex(2)` calls with the private flag: FUTEX_WAIT with a relative
 * timeout, FUTEX_WAKE, and FUTEX_REQUEUE for moving condition waiters onto a
 * lock word.
 */

use super::traits::{WaitOutcome, WakeResult, WordWaiter};
use crate::core::errors::{WaitError, WaitResult};
use crate::core::limits::WAKE_ALL;
use std::sync::atomic::AtomicI32;
use std::time::Duration;

/// Futex-backed word waiter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FutexWaiter;

impl FutexWaiter {
    pub const fn new() -> Self {
        Self
    }
}

#[inline]
fn last_errno() -> i32 {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

#[inline]
fn as_ptr(word: &AtomicI32) -> *const i32 {
    word.as_ptr() as *const i32
}

fn to_timespec(timeout: Duration) -> libc::timespec {
    libc::timespec {
        tv_sec: timeout.as_secs().min(libc::time_t::MAX as u64) as libc::time_t,
        tv_nsec: timeout.subsec_nanos() as libc::c_long,
    }
}

fn futex_wake(word: &AtomicI32, count: i32) -> WakeResult {
    // SAFETY: `word` is a live, aligned i32 for the duration of the call.
    let rc = unsafe {
        libc::syscall(
            libc::SYS_futex,
            as_ptr(word),
            libc::FUTEX_WAKE | libc::FUTEX_PRIVATE_FLAG,
            count,
        )
    };
    // Waking cannot fail for a valid private address.
    WakeResult::from_count(rc.max(0) as usize)
}

fn futex_requeue(from: &AtomicI32, to: &AtomicI32, count: i32) -> WaitResult<WakeResult> {
    // FUTEX_REQUEUE passes the requeue limit in the timeout slot.
    // SAFETY: both words are live, aligned i32s; no waiter is woken (val = 0).
    let rc = unsafe {
        libc::syscall(
            libc::SYS_futex,
            as_ptr(from),
            libc::FUTEX_REQUEUE | libc::FUTEX_PRIVATE_FLAG,
            0,
            count as usize as *const libc::timespec,
            as_ptr(to),
            0,
        )
    };
    if rc >= 0 {
        return Ok(WakeResult::from_count(rc as usize));
    }
    match last_errno() {
        libc::EAGAIN | libc::EINTR => Ok(WakeResult::NoWaiters),
        errno => Err(WaitError::Os {
            op: "requeue",
            errno,
        }),
    }
}

impl WordWaiter for FutexWaiter {
    fn wait(
        &self,
        word: &AtomicI32,
        expected: i32,
        timeout: Option<Duration>,
    ) -> WaitResult<WaitOutcome> {
        let ts = timeout.map(to_timespec);
        let ts_ptr = ts
            .as_ref()
            .map_or(std::ptr::null(), |ts| ts as *const libc::timespec);
        // SAFETY: `word` is a live, aligned i32; `ts_ptr` is null or points at
        // a timespec that outlives the call.
        let rc = unsafe {
            libc::syscall(
                libc::SYS_futex,
                as_ptr(word),
                libc::FUTEX_WAIT | libc::FUTEX_PRIVATE_FLAG,
                expected,
                ts_ptr,
            )
        };
        if rc == 0 {
            return Ok(WaitOutcome::Woken);
        }
        match last_errno() {
            libc::EAGAIN => Ok(WaitOutcome::ValueChanged),
            libc::EINTR => Ok(WaitOutcome::Interrupted),
            libc::ETIMEDOUT => Ok(WaitOutcome::TimedOut),
            errno => Err(WaitError::Os { op: "wait", errno }),
        }
    }

    #[inline]
    fn wake_one(&self, word: &AtomicI32) -> WakeResult {
        futex_wake(word, 1)
    }

    #[inline]
    fn wake_all(&self, word: &AtomicI32) -> WakeResult {
        futex_wake(word, WAKE_ALL)
    }

    fn requeue_one(&self, from: &AtomicI32, to: &AtomicI32) -> WaitResult<WakeResult> {
        futex_requeue(from, to, 1)
    }

    fn requeue_all(&self, from: &AtomicI32, to: &AtomicI32) -> WaitResult<WakeResult> {
        futex_requeue(from, to, WAKE_ALL)
    }

    fn name(&self) -> &'static str {
        "futex"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_futex_value_changed() {
        let word = AtomicI32::new(7);
        let outcome = FutexWaiter.wait(&word, 8, None).unwrap();
        assert_eq!(outcome, WaitOutcome::ValueChanged);
    }

    #[test]
    fn test_futex_timeout() {
        let word = AtomicI32::new(0);
        let start = Instant::now();
        let outcome = FutexWaiter
            .wait(&word, 0, Some(Duration::from_millis(50)))
            .unwrap();
        assert!(outcome.timed_out());
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_futex_wake_one() {
        let word = Arc::new(AtomicI32::new(0));
        let word_clone = word.clone();

        let handle = thread::spawn(move || {
            FutexWaiter
                .wait(&word_clone, 0, Some(Duration::from_secs(2)))
                .unwrap()
        });

        // Give thread time to park
        thread::sleep(Duration::from_millis(50));
        let mut woken = FutexWaiter.wake_one(&word);
        while !woken.is_woken() && !handle.is_finished() {
            thread::sleep(Duration::from_millis(10));
            woken = FutexWaiter.wake_one(&word);
        }

        assert_eq!(handle.join().unwrap(), WaitOutcome::Woken);
    }

    #[test]
    fn test_futex_requeue_without_waiters() {
        let from = AtomicI32::new(0);
        let to = AtomicI32::new(0);
        let moved = FutexWaiter.requeue_all(&from, &to).unwrap();
        assert_eq!(moved, WakeResult::NoWaiters);
    }
}
