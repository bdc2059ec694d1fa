/*!
 * Synchronization Primitives
 *
 * Locks and condition variables built directly on a "wait on word / wake
 * waiters on word" primitive:
 * - [`ExclusiveLock`]: recursive or non-recursive mutual exclusion
 * - [`SharedExclusiveLock`]: reader-writer lock
 * - [`WaitCondition`]: condition variable that requeues waiters onto its guard
 *
 * # Architecture
 *
 * ```text
 * ExclusiveLock / SharedExclusiveLock / WaitCondition
 *        |             |                 |
 *   wait_briefly_for (backoff)      ContentionLedger
 *        |
 *   WordWaiter: FutexWaiter (Linux) | ParkingWaiter
 * ```
 *
 * Every blocking path consults the [`TeardownSignal`] before sleeping and after
 * waking. Misuse is reported through [`fatal`](self::fatal) and ends the process.
 *
 * # Performance
 *
 * - Uncontended paths are a single CAS with no allocation or syscall
 * - Brief contention is absorbed by spin, then yield, then short sleeps
 * - Wake syscalls are skipped when no contender is recorded
 */

mod condition;
mod config;
mod fatal;
mod ledger;
mod locks;
mod order;
mod registry;
mod spinwait;
mod teardown;
mod wait;

pub use condition::WaitCondition;
pub use config::{StrategyType, SyncConfig, WakePolicy};
pub use fatal::{fatal_action, logging_lock, set_fatal_action, FatalAction};
pub use ledger::{ContentionLedger, LedgerEntry, LedgerSnapshot};
pub use locks::{
    ExclusiveGuard, ExclusiveLock, LockBuilder, LockKind, ReaderGuard, SharedExclusiveLock,
    WriterGuard,
};
pub use order::{held_lock_count, LockLevel};
pub use registry::{GlobalRegistry, LockReport};
pub use spinwait::{backoff, backoff_step, wait_briefly_for, wait_briefly_for_with, BackoffStep};
pub use teardown::TeardownSignal;
pub use wait::{ParkingWaiter, WaitOutcome, Waiter, WakeResult, WordWaiter};

#[cfg(target_os = "linux")]
pub use wait::FutexWaiter;
