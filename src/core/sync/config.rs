/*!
 * Synchronization Configuration
 *
 * Per-primitive configuration: wait backend, brief-wait budgets, wake
 * policies and the teardown signal consulted before blocking.
 */

use super::teardown::TeardownSignal;
use crate::core::limits::{BRIEF_WAIT_MAX_BACKOFF, BRIEF_WAIT_MAX_ITERS, TRY_LOCK_MAX_SPINS};
use std::str::FromStr;

/// Wait backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyType {
    /// Raw futex syscalls (Linux only)
    Futex,
    /// parking_lot_core parking (cross-platform)
    Parking,
    /// Futex on Linux, parking elsewhere
    Auto,
}

impl FromStr for StrategyType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "futex" => Ok(StrategyType::Futex),
            "parking" | "park" => Ok(StrategyType::Parking),
            "auto" => Ok(StrategyType::Auto),
            other => Err(format!("unknown sync strategy: {other}")),
        }
    }
}

/// How many waiters an unlock wakes when contenders are present
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakePolicy {
    One,
    All,
}

/// Synchronization configuration
#[derive(Debug, Clone, Copy)]
pub struct SyncConfig {
    /// Preferred wait backend
    pub strategy: StrategyType,
    /// Poll iterations in `wait_briefly_for` before a kernel wait
    pub brief_wait_iters: u32,
    /// Backoff level cap while briefly waiting
    pub max_backoff_level: u32,
    /// Attempts made by `try_acquire_with_spin`
    pub try_lock_spins: u32,
    /// Wake policy for `ExclusiveLock::release`
    pub exclusive_wake: WakePolicy,
    /// Wake policy for `SharedExclusiveLock` unlocks
    pub shared_wake: WakePolicy,
    /// Signal checked by every thread about to block or just woken
    pub teardown: &'static TeardownSignal,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyType::Auto,
            brief_wait_iters: BRIEF_WAIT_MAX_ITERS,
            max_backoff_level: BRIEF_WAIT_MAX_BACKOFF,
            try_lock_spins: TRY_LOCK_MAX_SPINS,
            exclusive_wake: WakePolicy::One,
            shared_wake: WakePolicy::All,
            teardown: TeardownSignal::global(),
        }
    }
}

impl SyncConfig {
    /// Longer brief waits, for locks held only for a handful of instructions
    pub fn low_latency() -> Self {
        Self {
            brief_wait_iters: BRIEF_WAIT_MAX_ITERS * 4,
            max_backoff_level: BRIEF_WAIT_MAX_BACKOFF + 2,
            ..Self::default()
        }
    }

    /// Go to the kernel almost immediately, for locks held across I/O
    pub fn long_wait() -> Self {
        Self {
            brief_wait_iters: 5,
            max_backoff_level: 1,
            try_lock_spins: 1,
            ..Self::default()
        }
    }

    /// Default configuration overridden from the environment
    ///
    /// - `SYNC_STRATEGY`: `futex`, `parking` or `auto`
    /// - `SYNC_BRIEF_WAIT_ITERS`: poll iterations before blocking
    /// - `SYNC_TRY_LOCK_SPINS`: `try_acquire_with_spin` attempts
    ///
    /// Unparseable values are ignored with a warning.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(strategy) = env_value::<StrategyType>("SYNC_STRATEGY") {
            config.strategy = strategy;
        }
        if let Some(iters) = env_value::<u32>("SYNC_BRIEF_WAIT_ITERS") {
            config.brief_wait_iters = iters;
        }
        if let Some(spins) = env_value::<u32>("SYNC_TRY_LOCK_SPINS") {
            config.try_lock_spins = spins.max(1);
        }
        config
    }

    /// Use a specific teardown signal instead of the process-wide one
    pub fn with_teardown(mut self, teardown: &'static TeardownSignal) -> Self {
        self.teardown = teardown;
        self
    }

    /// Resolve `Auto` for the current platform
    pub fn select_strategy(&self) -> StrategyType {
        match self.strategy {
            StrategyType::Auto => {
                #[cfg(target_os = "linux")]
                {
                    StrategyType::Futex
                }
                #[cfg(not(target_os = "linux"))]
                {
                    StrategyType::Parking
                }
            }
            #[cfg(not(target_os = "linux"))]
            StrategyType::Futex => {
                tracing::warn!("futex strategy unavailable on this platform, using parking");
                StrategyType::Parking
            }
            other => other,
        }
    }
}

fn env_value<T: FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparseable sync setting");
            None
        }
    }
}
