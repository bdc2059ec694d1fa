/*!
 * Wait Condition
 *
 * Condition variable permanently bound to one [`ExclusiveLock`] (its guard).
 *
 * # Design
 *
 * A generation word (`sequence`) is bumped by every signal. Waiters sleep on it
 * expecting the value seen while they still held the guard, so a signal that
 * lands between releasing the guard and sleeping is never lost.
 *
 * Signals do not wake waiters directly: they requeue them onto the guard's lock
 * word. A requeued waiter sleeps until the signaller releases the guard, then
 * contends for it like any other blocked acquirer. Each waiter adds itself to
 * the guard's contender count for the whole wait so that release always issues
 * the wake a requeued waiter depends on.
 *
 * ```text
 * RUNNING (holds guard) -> PARKED (on sequence) -> REQUEUED (on guard word) -> RUNNING
 * ```
 */

use super::fatal::fatal;
use super::locks::ExclusiveLock;
use super::wait::{WaitOutcome, WakeResult, WordWaiter};
use crate::core::errors::{LockViolation, WaitResult};
use crate::core::id::{current_thread_id, ThreadId};
use std::ops::Deref;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{trace, warn};

/// Condition variable over an [`ExclusiveLock`]
///
/// `G` is anything that dereferences to the guard: `&ExclusiveLock`,
/// `Arc<ExclusiveLock>`, ...
///
/// ```
/// use ai_os_sync::{ExclusiveLock, WaitCondition};
/// use std::time::Duration;
///
/// let lock = ExclusiveLock::new("queue lock");
/// let cond = WaitCondition::new("queue not empty", &lock);
///
/// let _guard = lock.lock();
/// let timed_out = cond.wait_for(Duration::from_millis(1));
/// assert!(timed_out);
/// ```
#[derive(Debug)]
pub struct WaitCondition<G = Arc<ExclusiveLock>>
where
    G: Deref<Target = ExclusiveLock>,
{
    name: &'static str,
    guard: G,
    sequence: AtomicI32,
    waiters: AtomicI32,
}

impl<G> WaitCondition<G>
where
    G: Deref<Target = ExclusiveLock>,
{
    pub fn new(name: &'static str, guard: G) -> Self {
        Self {
            name,
            guard,
            sequence: AtomicI32::new(0),
            waiters: AtomicI32::new(0),
        }
    }

    /// The lock this condition is bound to
    pub fn guard(&self) -> &ExclusiveLock {
        &self.guard
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Threads currently between entering and leaving `wait`
    pub fn waiter_count(&self) -> i32 {
        self.waiters.load(Ordering::Relaxed)
    }

    /// Release the guard, sleep until signalled, re-acquire the guard
    ///
    /// May return without a signal; callers re-check their predicate.
    pub fn wait(&self) {
        self.wait_inner(None);
    }

    /// [`wait`](Self::wait) for at most `timeout`; `true` if it timed out
    pub fn wait_for(&self, timeout: Duration) -> bool {
        self.wait_inner(Some(timeout))
    }

    /// Move one waiter onto the guard's queue
    pub fn signal(&self) {
        self.assert_guard_held(current_thread_id());
        if self.waiters.load(Ordering::Relaxed) > 0 {
            self.sequence.fetch_add(1, Ordering::SeqCst);
            let moved = self
                .guard
                .waiter()
                .requeue_one(&self.sequence, self.guard.word());
            self.after_requeue(moved);
        }
    }

    /// Move every waiter onto the guard's queue
    pub fn broadcast(&self) {
        self.assert_guard_held(current_thread_id());
        if self.waiters.load(Ordering::Relaxed) > 0 {
            self.sequence.fetch_add(1, Ordering::SeqCst);
            let moved = self
                .guard
                .waiter()
                .requeue_all(&self.sequence, self.guard.word());
            self.after_requeue(moved);
        }
    }

    fn after_requeue(&self, moved: WaitResult<WakeResult>) {
        match moved {
            Ok(moved) => trace!(
                condition = self.name,
                moved = moved.count(),
                "requeued waiters onto guard"
            ),
            Err(source) => fatal(
                self.addr(),
                LockViolation::KernelWait {
                    lock: self.name,
                    source,
                },
            ),
        }
    }

    fn wait_inner(&self, timeout: Option<Duration>) -> bool {
        let me = current_thread_id();
        self.assert_guard_held(me);
        let guard: &ExclusiveLock = &self.guard;
        let teardown = guard.config().teardown;
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));

        self.waiters.fetch_add(1, Ordering::Relaxed);
        guard.increment_contenders();
        let observed = self.sequence.load(Ordering::Relaxed);
        let saved_recursion = guard.release_for_wait();

        let mut timed_out = false;
        loop {
            let remaining = match (timeout, deadline) {
                (None, _) => None,
                (Some(_), Some(deadline)) => {
                    let now = Instant::now();
                    if now >= deadline {
                        timed_out = true;
                        break;
                    }
                    Some(deadline - now)
                }
                (Some(timeout), None) => Some(timeout),
            };
            match guard.waiter().wait(&self.sequence, observed, remaining) {
                Ok(WaitOutcome::Interrupted)
                    if self.sequence.load(Ordering::Relaxed) == observed =>
                {
                    teardown.park_if_set();
                }
                Ok(WaitOutcome::TimedOut) => {
                    timed_out = true;
                    break;
                }
                Ok(_) => break,
                Err(source) => fatal(
                    self.addr(),
                    LockViolation::KernelWait {
                        lock: self.name,
                        source,
                    },
                ),
            }
        }
        teardown.park_if_set();

        guard.reacquire_after_wait(me, saved_recursion);
        self.waiters.fetch_sub(1, Ordering::Relaxed);
        guard.decrement_contenders();
        timed_out
    }

    fn assert_guard_held(&self, me: ThreadId) {
        if !self.guard.is_held_by(me) {
            fatal(
                self.addr(),
                LockViolation::GuardNotHeld {
                    condition: self.name,
                    lock: self.guard.name(),
                },
            );
        }
    }

    #[inline(always)]
    fn addr(&self) -> usize {
        self as *const Self as *const () as usize
    }
}

impl<G> Drop for WaitCondition<G>
where
    G: Deref<Target = ExclusiveLock>,
{
    fn drop(&mut self) {
        let waiters = self.waiters.load(Ordering::Relaxed);
        if waiters != 0 {
            let violation = LockViolation::DestroyedWithWaiters {
                condition: self.name,
                waiters,
            };
            if self.guard.config().teardown.is_set() || std::thread::panicking() {
                warn!(condition = self.name, "{violation}");
            } else {
                fatal(self.addr(), violation);
            }
        }
    }
}
