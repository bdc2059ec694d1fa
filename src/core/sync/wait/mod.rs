/*!
 * Word-Wait Backends
 *
 * Every blocking path in the locks goes through a [`WordWaiter`]:
 * - Futex (Linux): raw `futex(2)`, including FUTEX_REQUEUE
 * - Parking (all platforms): parking_lot_core keyed by word address
 *
 * # Design: Enum Dispatch
 *
 * Locks store a [`Waiter`] (a one-byte enum of zero-sized backends) chosen
 * from [`SyncConfig`](super::SyncConfig) at construction, so swapping the
 * backend never touches a lock call site.
 */

#[cfg(target_os = "linux")]
mod futex;
mod parking;
mod traits;

#[cfg(target_os = "linux")]
pub use futex::FutexWaiter;
pub use parking::ParkingWaiter;
pub use traits::{WaitOutcome, WakeResult, WordWaiter};

use super::config::{StrategyType, SyncConfig};
use crate::core::errors::WaitResult;
use std::sync::atomic::AtomicI32;
use std::time::Duration;

/// Backend selected for one primitive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Waiter {
    #[cfg(target_os = "linux")]
    Futex(FutexWaiter),
    Parking(ParkingWaiter),
}

impl Waiter {
    /// Resolve the configured strategy to a backend
    pub fn from_config(config: &SyncConfig) -> Self {
        match config.select_strategy() {
            #[cfg(target_os = "linux")]
            StrategyType::Futex => Waiter::Futex(FutexWaiter::new()),
            _ => Waiter::Parking(ParkingWaiter::new()),
        }
    }
}

impl Default for Waiter {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}

impl WordWaiter for Waiter {
    #[inline(always)]
    fn wait(
        &self,
        word: &AtomicI32,
        expected: i32,
        timeout: Option<Duration>,
    ) -> WaitResult<WaitOutcome> {
        match self {
            #[cfg(target_os = "linux")]
            Self::Futex(w) => w.wait(word, expected, timeout),
            Self::Parking(w) => w.wait(word, expected, timeout),
        }
    }

    #[inline(always)]
    fn wake_one(&self, word: &AtomicI32) -> WakeResult {
        match self {
            #[cfg(target_os = "linux")]
            Self::Futex(w) => w.wake_one(word),
            Self::Parking(w) => w.wake_one(word),
        }
    }

    #[inline(always)]
    fn wake_all(&self, word: &AtomicI32) -> WakeResult {
        match self {
            #[cfg(target_os = "linux")]
            Self::Futex(w) => w.wake_all(word),
            Self::Parking(w) => w.wake_all(word),
        }
    }

    #[inline(always)]
    fn requeue_one(&self, from: &AtomicI32, to: &AtomicI32) -> WaitResult<WakeResult> {
        match self {
            #[cfg(target_os = "linux")]
            Self::Futex(w) => w.requeue_one(from, to),
            Self::Parking(w) => w.requeue_one(from, to),
        }
    }

    #[inline(always)]
    fn requeue_all(&self, from: &AtomicI32, to: &AtomicI32) -> WaitResult<WakeResult> {
        match self {
            #[cfg(target_os = "linux")]
            Self::Futex(w) => w.requeue_all(from, to),
            Self::Parking(w) => w.requeue_all(from, to),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            #[cfg(target_os = "linux")]
            Self::Futex(w) => w.name(),
            Self::Parking(w) => w.name(),
        }
    }
}
