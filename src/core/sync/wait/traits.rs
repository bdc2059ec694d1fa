/*!
 * Word-Wait Traits
 *
 * Core abstraction every lock in this crate blocks through: "sleep while a
 * 32-bit word still holds the value I last saw", "wake sleepers on a word"
 * and "move sleepers from one word's queue onto another's".
 *
 * # Contract
 *
 * `wait` must check `word == expected` and enqueue the caller atomically with
 * respect to `wake_*` and `requeue_*` on the same word. That is what makes
 * "store, then wake" on one side and "check, then sleep" on the other free of
 * lost wakeups.
 */

use crate::core::errors::WaitResult;
use std::sync::atomic::AtomicI32;
use std::time::Duration;

/// Why a wait call returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Woken by `wake_*`, or requeued and then woken
    Woken,
    /// The word no longer held the expected value when checked
    ValueChanged,
    /// Interrupted before being woken (signal delivery, EINTR)
    Interrupted,
    /// The relative timeout elapsed
    TimedOut,
}

impl WaitOutcome {
    #[inline(always)]
    pub fn timed_out(self) -> bool {
        matches!(self, WaitOutcome::TimedOut)
    }
}

/// Result of a wake or requeue operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeResult {
    /// Woke or moved N waiters (N >= 1)
    Woken(usize),
    /// No waiters were queued
    NoWaiters,
}

impl WakeResult {
    #[inline(always)]
    pub(crate) fn from_count(count: usize) -> Self {
        if count == 0 {
            WakeResult::NoWaiters
        } else {
            WakeResult::Woken(count)
        }
    }

    /// Check if any waiters were woken
    #[inline(always)]
    pub fn is_woken(&self) -> bool {
        matches!(self, WakeResult::Woken(_))
    }

    /// Get number of woken waiters (0 if none)
    #[inline(always)]
    pub fn count(&self) -> usize {
        match self {
            WakeResult::Woken(n) => *n,
            WakeResult::NoWaiters => 0,
        }
    }
}

/// Block/wake/requeue on a 32-bit word
///
/// Implementations are process-private: the word address is the queue key.
pub trait WordWaiter: Send + Sync {
    /// Block while `word == expected`, optionally for at most `timeout`
    fn wait(&self, word: &AtomicI32, expected: i32, timeout: Option<Duration>)
        -> WaitResult<WaitOutcome>;

    /// Wake at most one waiter on `word`
    fn wake_one(&self, word: &AtomicI32) -> WakeResult;

    /// Wake every waiter on `word`
    fn wake_all(&self, word: &AtomicI32) -> WakeResult;

    /// Move one waiter from `from`'s queue to `to`'s without waking it
    fn requeue_one(&self, from: &AtomicI32, to: &AtomicI32) -> WaitResult<WakeResult>;

    /// Move every waiter from `from`'s queue to `to`'s without waking them
    fn requeue_all(&self, from: &AtomicI32, to: &AtomicI32) -> WaitResult<WakeResult>;

    /// Backend name for diagnostics
    fn name(&self) -> &'static str;
}

/// Queue key for a word: its address
#[inline(always)]
pub(crate) fn word_key(word: &AtomicI32) -> usize {
    word as *const AtomicI32 as usize
}
