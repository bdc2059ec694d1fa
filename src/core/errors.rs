/*!
 * Error Types
 * Fatal lock misuse taxonomy and kernel wait failures, with thiserror and miette
 */

use crate::core::id::ThreadId;
use crate::core::sync::LockLevel;
use miette::Diagnostic;
use thiserror::Error;

/// Result type for raw word-wait operations
pub type WaitResult<T> = Result<T, WaitError>;

/// Failure of the underlying wait/wake/requeue primitive
///
/// Spurious wakes and timeouts are not errors; they are reported through
/// [`WaitOutcome`](crate::core::sync::WaitOutcome).
#[derive(Error, Debug, Clone, PartialEq, Eq, Diagnostic)]
pub enum WaitError {
    #[error("futex {op} failed with errno {errno}")]
    #[diagnostic(
        code(sync::wait::os),
        help("The word address must be valid, aligned and private to this process.")
    )]
    Os { op: &'static str, errno: i32 },
}

/// Lock misuse or internal inconsistency
///
/// Every variant is a programming error. Reporting one ends the process (or
/// panics under the test double, see [`FatalAction`](crate::core::sync::FatalAction)).
#[derive(Error, Debug, Clone, PartialEq, Eq, Diagnostic)]
pub enum LockViolation {
    #[error("recursive acquire of non-recursive lock \"{lock}\" by thread {thread}")]
    #[diagnostic(
        code(sync::lock::recursive_acquire),
        help("Build the lock with `recursive(true)` or release it before acquiring again.")
    )]
    RecursiveAcquire { lock: &'static str, thread: ThreadId },

    #[error("release of \"{lock}\" which is not held (state {state})")]
    #[diagnostic(code(sync::lock::release_unheld))]
    ReleaseUnheld { lock: &'static str, state: i32 },

    #[error("release of \"{lock}\" by thread {caller}, owner is {owner}")]
    #[diagnostic(
        code(sync::lock::release_not_owner),
        help("Only the thread that acquired a lock may release it.")
    )]
    ReleaseNotOwner {
        lock: &'static str,
        owner: ThreadId,
        caller: ThreadId,
    },

    #[error("unexpected state {state} in \"{lock}\"")]
    #[diagnostic(code(sync::lock::corrupt_state))]
    CorruptState { lock: &'static str, state: i32 },

    #[error("destroying \"{lock}\" with owner {owner} and state {state}")]
    #[diagnostic(
        code(sync::lock::destroyed_while_held),
        help("Release the lock and let every contender leave before dropping it.")
    )]
    DestroyedWhileHeld {
        lock: &'static str,
        owner: ThreadId,
        state: i32,
    },

    #[error("destroying condition \"{condition}\" with {waiters} waiter(s)")]
    #[diagnostic(code(sync::condition::destroyed_with_waiters))]
    DestroyedWithWaiters {
        condition: &'static str,
        waiters: i32,
    },

    #[error("\"{condition}\" used without holding its guard \"{lock}\"")]
    #[diagnostic(
        code(sync::condition::guard_not_held),
        help("Acquire the guard lock before waiting on or signalling the condition.")
    )]
    GuardNotHeld {
        condition: &'static str,
        lock: &'static str,
    },

    #[error("lock order violation: acquiring \"{lock}\" ({level}) while holding \"{held}\" ({held_level})")]
    #[diagnostic(
        code(sync::lock::order),
        help("Acquire locks from the highest level to the lowest.")
    )]
    LockOrder {
        lock: &'static str,
        level: LockLevel,
        held: &'static str,
        held_level: LockLevel,
    },

    #[error("assertion on \"{lock}\" failed: {expectation}")]
    #[diagnostic(code(sync::lock::assertion))]
    Assertion {
        lock: &'static str,
        expectation: &'static str,
    },

    #[error("kernel wait on \"{lock}\" failed: {source}")]
    #[diagnostic(code(sync::lock::kernel_wait))]
    KernelWait {
        lock: &'static str,
        #[source]
        source: WaitError,
    },
}

impl LockViolation {
    /// Name of the primitive the violation was detected on
    pub fn lock_name(&self) -> &'static str {
        match self {
            Self::RecursiveAcquire { lock, .. }
            | Self::ReleaseUnheld { lock, .. }
            | Self::ReleaseNotOwner { lock, .. }
            | Self::CorruptState { lock, .. }
            | Self::DestroyedWhileHeld { lock, .. }
            | Self::LockOrder { lock, .. }
            | Self::Assertion { lock, .. }
            | Self::KernelWait { lock, .. } => lock,
            Self::DestroyedWithWaiters { condition, .. } | Self::GuardNotHeld { condition, .. } => {
                condition
            }
        }
    }
}
