/*!
 * Fatal Violation Reporting
 *
 * Lock misuse is never recoverable: the violation is reported and the process
 * aborts. Reports are serialized through the process logging lock, except when
 * the faulting lock *is* the logging lock, in which case a raw `write(2)` to
 * stderr is used so reporting cannot re-enter the broken lock.
 *
 * Tests switch the action to [`FatalAction::Panic`] to observe violations.
 */

use super::locks::{ExclusiveLock, LockBuilder};
use super::order::LockLevel;
use crate::core::errors::LockViolation;
use crate::core::id::current_thread_id;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::OnceLock;
use tracing::error;

/// What happens after a violation is reported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FatalAction {
    /// Report, then `std::process::abort()`
    Abort = 0,
    /// Panic with the violation message (test double)
    Panic = 1,
}

static FATAL_ACTION: AtomicU8 = AtomicU8::new(FatalAction::Abort as u8);
static LOGGING_LOCK: OnceLock<ExclusiveLock> = OnceLock::new();

/// Select the process-wide fatal action
pub fn set_fatal_action(action: FatalAction) {
    FATAL_ACTION.store(action as u8, Ordering::SeqCst);
}

/// Current process-wide fatal action
pub fn fatal_action() -> FatalAction {
    match FATAL_ACTION.load(Ordering::SeqCst) {
        1 => FatalAction::Panic,
        _ => FatalAction::Abort,
    }
}

/// Lock serializing multi-line diagnostic output
pub fn logging_lock() -> &'static ExclusiveLock {
    LOGGING_LOCK.get_or_init(|| {
        LockBuilder::new("logging lock")
            .level(LockLevel::LOGGING)
            .exclusive()
    })
}

fn is_logging_lock(addr: usize) -> bool {
    LOGGING_LOCK
        .get()
        .is_some_and(|lock| lock.addr() == addr)
}

/// Report `violation` detected on the primitive at `lock_addr` and stop
#[cold]
#[inline(never)]
pub(crate) fn fatal(lock_addr: usize, violation: LockViolation) -> ! {
    if is_logging_lock(lock_addr) {
        write_raw_stderr(format!("fatal lock violation: {violation}\n").as_bytes());
        match fatal_action() {
            FatalAction::Panic => panic!("{violation}"),
            FatalAction::Abort => std::process::abort(),
        }
    }

    let logging = logging_lock();
    let _serialize = (!logging.is_held_by(current_thread_id())).then(|| logging.lock());
    error!(lock = violation.lock_name(), "fatal lock violation: {violation}");
    match fatal_action() {
        FatalAction::Panic => panic!("{violation}"),
        FatalAction::Abort => {
            eprintln!("{:?}", miette::Report::new(violation));
            std::process::abort()
        }
    }
}

#[cfg(unix)]
fn write_raw_stderr(bytes: &[u8]) {
    let mut remaining = bytes;
    while !remaining.is_empty() {
        // SAFETY: writes from a live slice to the process's stderr descriptor.
        let written = unsafe {
            libc::write(
                libc::STDERR_FILENO,
                remaining.as_ptr() as *const libc::c_void,
                remaining.len(),
            )
        };
        if written <= 0 {
            return;
        }
        remaining = &remaining[written as usize..];
    }
}

#[cfg(not(unix))]
fn write_raw_stderr(bytes: &[u8]) {
    use std::io::Write;
    let _ = std::io::stderr().write_all(bytes);
}
