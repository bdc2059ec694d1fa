/*!
 * Lock Levels and Held-Lock Bookkeeping
 *
 * Each thread keeps the set of locks it currently holds. Ordered locks carry
 * a [`LockLevel`]; a thread may only block on a lock whose level is strictly
 * below every ordered lock it already holds. Acquiring from high to low
 * levels therefore can never deadlock against another thread doing the same.
 */

use super::fatal::fatal;
use crate::core::errors::LockViolation;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::fmt;

/// Rank of a lock in the global acquisition order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LockLevel(u16);

impl LockLevel {
    /// Does not participate in order checks
    pub const UNORDERED: LockLevel = LockLevel(u16::MAX);
    /// Lowest level; reserved for the diagnostics logging lock
    pub const LOGGING: LockLevel = LockLevel(0);

    /// Ordered level; must be below `u16::MAX`
    pub const fn new(rank: u16) -> Self {
        assert!(rank != u16::MAX, "u16::MAX is reserved for UNORDERED");
        Self(rank)
    }

    #[inline(always)]
    pub const fn is_ordered(self) -> bool {
        self.0 != u16::MAX
    }

    pub const fn rank(self) -> u16 {
        self.0
    }
}

impl Default for LockLevel {
    fn default() -> Self {
        Self::UNORDERED
    }
}

impl fmt::Display for LockLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_ordered() {
            write!(f, "level {}", self.0)
        } else {
            f.write_str("unordered")
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct HeldLock {
    addr: usize,
    name: &'static str,
    level: LockLevel,
}

thread_local! {
    static HELD: RefCell<Vec<HeldLock>> = const { RefCell::new(Vec::new()) };
}

/// Fail fatally if blocking on `(name, level)` would break the lock order
pub(crate) fn check_before_blocking(addr: usize, name: &'static str, level: LockLevel) {
    if !level.is_ordered() {
        return;
    }
    let offender = HELD
        .try_with(|held| {
            held.borrow()
                .iter()
                .find(|h| h.addr != addr && h.level.is_ordered() && h.level <= level)
                .copied()
        })
        .ok()
        .flatten();
    if let Some(held) = offender {
        fatal(
            addr,
            LockViolation::LockOrder {
                lock: name,
                level,
                held: held.name,
                held_level: held.level,
            },
        );
    }
}

/// Record that the calling thread now holds the lock at `addr`
pub(crate) fn register(addr: usize, name: &'static str, level: LockLevel) {
    let _ = HELD.try_with(|held| held.borrow_mut().push(HeldLock { addr, name, level }));
}

/// Forget one hold of the lock at `addr`
pub(crate) fn unregister(addr: usize) {
    let _ = HELD.try_with(|held| {
        let mut held = held.borrow_mut();
        if let Some(pos) = held.iter().rposition(|h| h.addr == addr) {
            held.remove(pos);
        }
    });
}

/// Does the calling thread hold the lock at `addr`?
pub(crate) fn is_registered(addr: usize) -> bool {
    HELD.try_with(|held| held.borrow().iter().any(|h| h.addr == addr))
        .unwrap_or(false)
}

/// Number of lock holds the calling thread has outstanding
pub fn held_lock_count() -> usize {
    HELD.try_with(|held| held.borrow().len()).unwrap_or(0)
}
