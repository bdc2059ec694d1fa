/*!
 * Synchronization Limits and Constants
 *
 * Centralized location for the spin thresholds, retry budgets and ring sizes
 * used by the lock primitives. Grouped by the component that consumes them.
 *
 * - Performance-sensitive constants are marked with [PERF]
 * - Values mirrored by the futex ABI are marked with [LINUX-COMPAT]
 */

use std::time::Duration;

// =============================================================================
// BACKOFF
// =============================================================================

/// Highest backoff level that still busy-spins
/// [PERF] Level 3 costs on the order of 100 cycles
pub const BACKOFF_SPIN_MAX: u32 = 10;

/// Highest backoff level that yields the timeslice instead of sleeping
pub const BACKOFF_YIELD_MAX: u32 = 20;

/// Busy-loop iterations per spin level
pub const BACKOFF_SPINS_PER_LEVEL: u32 = 10;

/// Sleep step per level past [`BACKOFF_YIELD_MAX`]
pub const BACKOFF_SLEEP_STEP: Duration = Duration::from_micros(1);

// =============================================================================
// BRIEF WAITS (prelude before a kernel wait)
// =============================================================================

/// Poll iterations before falling back to a kernel wait
/// [PERF] Keeps the worst case well below a context switch
pub const BRIEF_WAIT_MAX_ITERS: u32 = 50;

/// Backoff level cap while briefly waiting
pub const BRIEF_WAIT_MAX_BACKOFF: u32 = 3;

/// `try_acquire_with_spin` attempts before giving up
pub const TRY_LOCK_MAX_SPINS: u32 = 5;

// =============================================================================
// LOCK WORD LAYOUT
// =============================================================================

/// Held flag of an exclusive lock word
pub const HELD_MASK: i32 = 1;

/// Amount added to an exclusive lock word per contender
pub const CONTENDER_INCREMENT: i32 = 2;

/// Shared/exclusive state while held exclusively
pub const STATE_EXCLUSIVE: i32 = -1;

/// Wake count meaning "every waiter"
/// [LINUX-COMPAT] FUTEX_WAKE takes an int
pub const WAKE_ALL: i32 = i32::MAX;

// =============================================================================
// DIAGNOSTICS
// =============================================================================

/// Slots in each lock's contention ring
pub const CONTENTION_LOG_SIZE: usize = 4;

/// Registry spinlock backoff cap (level passed to `backoff`)
pub const REGISTRY_SPIN_MAX_BACKOFF: u32 = BACKOFF_YIELD_MAX + 1;
