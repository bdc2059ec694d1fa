/*!
 * Teardown Signal
 *
 * Process-scoped flag raised when shutdown begins. Once it is set, lock memory
 * may be freed underneath threads that are still blocked, so any thread that
 * is about to block, or has just been woken, parks forever instead of touching
 * the primitive again.
 *
 * # Ordering
 *
 * The global signal is a `static`: it exists before the first lock is built and
 * outlives the last one. Locks receive it by `&'static` reference through
 * [`SyncConfig`](super::SyncConfig) and copy that reference onto the stack
 * before blocking, so the post-wake check never reads the lock itself.
 */

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use tracing::{debug, info};

/// Shutdown flag consulted on every blocking retry
#[derive(Debug)]
pub struct TeardownSignal {
    started: AtomicBool,
}

static GLOBAL_TEARDOWN: TeardownSignal = TeardownSignal::new();

impl TeardownSignal {
    pub const fn new() -> Self {
        Self {
            started: AtomicBool::new(false),
        }
    }

    /// The process-wide signal
    #[inline(always)]
    pub fn global() -> &'static TeardownSignal {
        &GLOBAL_TEARDOWN
    }

    /// Has teardown begun?
    #[inline(always)]
    pub fn is_set(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Mark the start of teardown. Irreversible.
    pub fn begin(&self) {
        if !self.started.swap(true, Ordering::AcqRel) {
            info!("teardown started, blocking lock paths will park");
        }
    }

    /// Park the calling thread forever if teardown has begun
    #[inline]
    pub fn park_if_set(&self) {
        if self.is_set() {
            park_forever();
        }
    }
}

impl Default for TeardownSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cold]
fn park_forever() -> ! {
    debug!("thread parked for teardown");
    loop {
        thread::park();
    }
}
