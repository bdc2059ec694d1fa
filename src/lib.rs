/*!
 * AI-OS Sync Library
 * Futex-style locks, condition variables and contention diagnostics
 */

pub mod core;
pub mod monitoring;

// Re-exports
pub use crate::core::errors::{LockViolation, WaitError, WaitResult};
pub use crate::core::id::{current_thread_id, ThreadId};
pub use crate::core::sync::{
    backoff, held_lock_count, logging_lock, set_fatal_action, wait_briefly_for, ContentionLedger,
    ExclusiveGuard, ExclusiveLock, FatalAction, GlobalRegistry, LedgerSnapshot, LockBuilder,
    LockKind, LockLevel, LockReport, ReaderGuard, SharedExclusiveLock, StrategyType, SyncConfig,
    TeardownSignal, WaitCondition, WakePolicy, WordWaiter, WriterGuard,
};
pub use monitoring::init_tracing;
