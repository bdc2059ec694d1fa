/*!
 * Adaptive Backoff
 *
 * Escalating wait used before any primitive falls back to a kernel wait:
 *
 * 1. **Spin phase** (levels 1-10): bounded busy loop, `10 * level` iterations
 * 2. **Yield phase** (levels 11-20): `yield_now()`
 * 3. **Sleep phase** (21+): sleep growing linearly, 1µs per level past 20
 *
 * `wait_briefly_for` polls a lock word under a capped backoff so that short
 * critical sections never pay for a context switch.
 */

use super::config::SyncConfig;
use super::teardown::TeardownSignal;
use crate::core::limits::{
    BACKOFF_SLEEP_STEP, BACKOFF_SPINS_PER_LEVEL, BACKOFF_SPIN_MAX, BACKOFF_YIELD_MAX,
    BRIEF_WAIT_MAX_BACKOFF, BRIEF_WAIT_MAX_ITERS,
};
use std::hint::black_box;
use std::sync::atomic::{AtomicI32, Ordering};
use std::thread;

/// Strategy chosen for a backoff level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffStep {
    Spin(u32),
    Yield,
    Sleep(std::time::Duration),
}

/// Map a backoff level to its strategy without executing it
#[inline]
pub fn backoff_step(attempt: u32) -> BackoffStep {
    if attempt <= BACKOFF_SPIN_MAX {
        BackoffStep::Spin(BACKOFF_SPINS_PER_LEVEL * attempt)
    } else if attempt <= BACKOFF_YIELD_MAX {
        BackoffStep::Yield
    } else {
        BackoffStep::Sleep(BACKOFF_SLEEP_STEP * (attempt - BACKOFF_YIELD_MAX))
    }
}

/// Wait for a while, longer for higher `attempt`
#[inline]
pub fn backoff(attempt: u32) {
    match backoff_step(attempt) {
        BackoffStep::Spin(iterations) => {
            let mut counter = 0u32;
            for _ in 0..iterations {
                counter = black_box(counter.wrapping_add(1));
                std::hint::spin_loop();
            }
        }
        BackoffStep::Yield => thread::yield_now(),
        BackoffStep::Sleep(duration) => thread::sleep(duration),
    }
}

/// Poll `word` until `pred` holds, with the default budget
///
/// Returns `false` when the budget runs out or as soon as teardown begins;
/// the caller then falls through to its kernel-wait path, which parks.
#[inline]
pub fn wait_briefly_for(
    word: &AtomicI32,
    teardown: &TeardownSignal,
    pred: impl Fn(i32) -> bool,
) -> bool {
    wait_briefly_for_with(
        word,
        teardown,
        BRIEF_WAIT_MAX_ITERS,
        BRIEF_WAIT_MAX_BACKOFF,
        pred,
    )
}

/// [`wait_briefly_for`] with the budget taken from a lock's configuration
#[inline]
pub(crate) fn wait_briefly_for_config(
    word: &AtomicI32,
    config: &SyncConfig,
    pred: impl Fn(i32) -> bool,
) -> bool {
    wait_briefly_for_with(
        word,
        config.teardown,
        config.brief_wait_iters,
        config.max_backoff_level,
        pred,
    )
}

/// Poll `word` for at most `max_iters` rounds, backing off up to `max_level`
pub fn wait_briefly_for_with(
    word: &AtomicI32,
    teardown: &TeardownSignal,
    max_iters: u32,
    max_level: u32,
    pred: impl Fn(i32) -> bool,
) -> bool {
    for i in 1..=max_iters {
        backoff(i.min(max_level));
        if pred(word.load(Ordering::Relaxed)) {
            return true;
        }
        if teardown.is_set() {
            return false;
        }
    }
    false
}
