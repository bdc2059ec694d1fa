/*!
 * Thread Identity
 * Opaque, copyable thread handles stored next to lock words
 */

use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Opaque thread handle
///
/// Handles are assigned lazily, one per OS thread, and never reused within a
/// process. `ThreadId::NONE` (zero) marks "no owner" in lock bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadId(u64);

impl ThreadId {
    /// Sentinel for "no thread"
    pub const NONE: ThreadId = ThreadId(0);

    #[inline(always)]
    pub(crate) const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[inline(always)]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    #[inline(always)]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl Default for ThreadId {
    fn default() -> Self {
        Self::NONE
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static SELF_ID: Cell<u64> = const { Cell::new(0) };
}

/// Handle of the calling thread
#[inline]
pub fn current_thread_id() -> ThreadId {
    // During TLS teardown the slot is gone; hand out a fresh id rather than
    // failing, it still never collides with a live owner.
    SELF_ID
        .try_with(|slot| {
            let existing = slot.get();
            if existing != 0 {
                return ThreadId(existing);
            }
            let fresh = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
            slot.set(fresh);
            ThreadId(fresh)
        })
        .unwrap_or_else(|_| ThreadId(NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed)))
}
