/*!
 * Exclusive Lock
 *
 * Recursive or non-recursive mutual exclusion on one 32-bit word.
 *
 * # Lock Word
 *
 * ```text
 * bit 0      held
 * bits 1..   contender count (incremented by 2)
 * ```
 *
 * Owner and recursion count sit next to the word and are only written by the
 * thread moving the held bit 0 -> 1 or 1 -> 0.
 *
 * # Performance
 *
 * - Uncontended acquire and release: one CAS each, no syscall
 * - Short contention is absorbed by `wait_briefly_for` before any kernel wait
 * - Release only enters the kernel when the word shows contenders
 */

use super::LockState;
use crate::core::errors::LockViolation;
use crate::core::id::{current_thread_id, ThreadId};
use crate::core::limits::{CONTENDER_INCREMENT, HELD_MASK};
use crate::core::sync::config::{SyncConfig, WakePolicy};
use crate::core::sync::fatal::fatal;
use crate::core::sync::ledger::ContentionLedger;
use crate::core::sync::order::{self, LockLevel};
use crate::core::sync::registry::{GlobalRegistry, LockReport};
use crate::core::sync::spinwait::wait_briefly_for_config;
use crate::core::sync::wait::{Waiter, WordWaiter};
use std::io;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use tracing::{trace, warn};

/// Mutual-exclusion lock
///
/// ```
/// use ai_os_sync::ExclusiveLock;
///
/// let lock = ExclusiveLock::new("stats");
/// lock.acquire();
/// assert!(lock.is_held_exclusive());
/// lock.release();
///
/// let _guard = lock.lock();
/// ```
#[derive(Debug)]
pub struct ExclusiveLock {
    state: Arc<LockState>,
    config: SyncConfig,
    waiter: Waiter,
}

impl ExclusiveLock {
    /// Non-recursive, unordered lock with default configuration
    pub fn new(name: &'static str) -> Self {
        super::LockBuilder::new(name).exclusive()
    }

    /// Recursive, unordered lock with default configuration
    pub fn recursive(name: &'static str) -> Self {
        super::LockBuilder::new(name).recursive(true).exclusive()
    }

    pub(super) fn from_parts(state: Arc<LockState>, config: SyncConfig) -> Self {
        Self {
            waiter: Waiter::from_config(&config),
            state,
            config,
        }
    }

    /// Block until the calling thread owns the lock
    pub fn acquire(&self) {
        let me = current_thread_id();
        if self.reenter(me) {
            return;
        }
        order::check_before_blocking(self.addr(), self.state.name, self.state.level);
        self.acquire_contended(me);
    }

    /// Acquire without blocking; `false` if another thread holds the lock
    pub fn try_acquire(&self) -> bool {
        let me = current_thread_id();
        if self.reenter(me) {
            return true;
        }
        let word = &self.state.word;
        let mut cur = word.load(Ordering::Relaxed);
        while cur & HELD_MASK == 0 {
            match word.compare_exchange_weak(
                cur,
                cur | HELD_MASK,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    self.on_acquired(me);
                    return true;
                }
                Err(actual) => cur = actual,
            }
        }
        false
    }

    /// [`try_acquire`](Self::try_acquire) with brief waits between attempts
    ///
    /// Makes `SyncConfig::try_lock_spins` attempts plus a final one, never
    /// entering a kernel wait.
    pub fn try_acquire_with_spin(&self) -> bool {
        for _ in 0..self.config.try_lock_spins {
            if self.try_acquire() {
                return true;
            }
            wait_briefly_for_config(&self.state.word, &self.config, |w| w & HELD_MASK == 0);
        }
        self.try_acquire()
    }

    /// Give up one level of ownership
    ///
    /// The lock is released once every nested acquire has been matched.
    pub fn release(&self) {
        let me = current_thread_id();
        let word = &self.state.word;
        let mut cur = word.load(Ordering::Relaxed);
        if cur & HELD_MASK == 0 {
            fatal(
                self.addr(),
                LockViolation::ReleaseUnheld {
                    lock: self.state.name,
                    state: cur,
                },
            );
        }
        let owner = self.state.owner();
        if owner != me {
            fatal(
                self.addr(),
                LockViolation::ReleaseNotOwner {
                    lock: self.state.name,
                    owner,
                    caller: me,
                },
            );
        }

        let recursion = self.state.recursion.load(Ordering::Relaxed);
        if recursion > 1 {
            self.state.recursion.store(recursion - 1, Ordering::Relaxed);
            return;
        }
        self.state.recursion.store(0, Ordering::Relaxed);
        self.state.set_owner(ThreadId::NONE);
        order::unregister(self.addr());

        loop {
            if cur & HELD_MASK == 0 {
                fatal(
                    self.addr(),
                    LockViolation::CorruptState {
                        lock: self.state.name,
                        state: cur,
                    },
                );
            }
            let new = cur & !HELD_MASK;
            match word.compare_exchange_weak(cur, new, Ordering::Release, Ordering::Relaxed) {
                Ok(_) => {
                    if new != 0 {
                        self.wake_contenders();
                    }
                    return;
                }
                Err(actual) => cur = actual,
            }
        }
    }

    /// RAII acquire
    pub fn lock(&self) -> ExclusiveGuard<'_> {
        self.acquire();
        ExclusiveGuard::new(self)
    }

    /// RAII [`try_acquire`](Self::try_acquire)
    pub fn try_lock(&self) -> Option<ExclusiveGuard<'_>> {
        self.try_acquire().then(|| ExclusiveGuard::new(self))
    }

    #[inline]
    pub fn is_held_by(&self, thread: ThreadId) -> bool {
        !thread.is_none() && self.state.owner() == thread
    }

    #[inline]
    pub fn is_held_by_current_thread(&self) -> bool {
        self.is_held_by(current_thread_id())
    }

    #[inline]
    pub fn is_held_exclusive(&self) -> bool {
        self.state.word.load(Ordering::Relaxed) & HELD_MASK != 0
    }

    pub fn owner(&self) -> ThreadId {
        self.state.owner()
    }

    /// Threads blocked in the kernel (or parked by a condition) on this lock
    pub fn contenders(&self) -> u32 {
        self.state.contender_count()
    }

    /// Nesting depth of the current hold, 0 when free
    pub fn recursion_count(&self) -> u32 {
        self.state.recursion.load(Ordering::Relaxed)
    }

    pub fn is_recursive(&self) -> bool {
        self.state.recursive
    }

    pub fn name(&self) -> &'static str {
        self.state.name
    }

    pub fn level(&self) -> LockLevel {
        self.state.level
    }

    pub fn id(&self) -> u64 {
        self.state.id
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn ledger(&self) -> &ContentionLedger {
        &self.state.ledger
    }

    pub fn report(&self) -> LockReport {
        self.state.report()
    }

    /// Write a one-line description including the contention summary
    pub fn dump<W: io::Write + ?Sized>(&self, out: &mut W) -> io::Result<()> {
        writeln!(out, "{}", self.report())
    }

    /// Fatal unless the calling thread owns the lock
    pub fn assert_held(&self) {
        if !self.is_held_by_current_thread() {
            self.assertion_failed("held by the calling thread");
        }
    }

    /// Fatal if the calling thread owns the lock
    pub fn assert_not_held(&self) {
        if self.is_held_by_current_thread() {
            self.assertion_failed("not held by the calling thread");
        }
    }

    #[cold]
    fn assertion_failed(&self, expectation: &'static str) -> ! {
        fatal(
            self.addr(),
            LockViolation::Assertion {
                lock: self.state.name,
                expectation,
            },
        )
    }

    /// Recursive re-entry by the owner; fatal for non-recursive locks
    #[inline]
    fn reenter(&self, me: ThreadId) -> bool {
        if !self.is_held_by(me) {
            return false;
        }
        if !self.state.recursive {
            fatal(
                self.addr(),
                LockViolation::RecursiveAcquire {
                    lock: self.state.name,
                    thread: me,
                },
            );
        }
        self.state.recursion.fetch_add(1, Ordering::Relaxed);
        true
    }

    fn acquire_contended(&self, me: ThreadId) {
        let word = &self.state.word;
        // One ledger record per acquisition, however many wakes it takes.
        let mut recorder = None;
        loop {
            let cur = word.load(Ordering::Relaxed);
            if cur & HELD_MASK == 0 {
                if word
                    .compare_exchange_weak(cur, cur | HELD_MASK, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
                {
                    break;
                }
            } else {
                recorder.get_or_insert_with(|| self.state.ledger.recorder(me, self.state.owner()));
                self.wait_until_free();
            }
        }
        self.on_acquired(me);
        drop(recorder);
    }

    /// Return once the held bit has been observed clear
    fn wait_until_free(&self) {
        let word = &self.state.word;
        if wait_briefly_for_config(word, &self.config, |w| w & HELD_MASK == 0) {
            return;
        }
        let teardown = self.config.teardown;
        teardown.park_if_set();

        word.fetch_add(CONTENDER_INCREMENT, Ordering::SeqCst);
        let mut cur = word.load(Ordering::Relaxed);
        while cur & HELD_MASK != 0 {
            trace!(lock = self.state.name, state = cur, "blocking on lock word");
            if let Err(source) = self.waiter.wait(word, cur, None) {
                fatal(
                    self.addr(),
                    LockViolation::KernelWait {
                        lock: self.state.name,
                        source,
                    },
                );
            }
            teardown.park_if_set();
            cur = word.load(Ordering::Relaxed);
        }
        word.fetch_sub(CONTENDER_INCREMENT, Ordering::SeqCst);
    }

    fn on_acquired(&self, me: ThreadId) {
        self.state.set_owner(me);
        self.state.recursion.store(1, Ordering::Relaxed);
        order::register(self.addr(), self.state.name, self.state.level);
    }

    fn wake_contenders(&self) {
        let woken = match self.config.exclusive_wake {
            WakePolicy::One => self.waiter.wake_one(&self.state.word),
            WakePolicy::All => self.waiter.wake_all(&self.state.word),
        };
        trace!(lock = self.state.name, woken = woken.count(), "woke contenders");
    }

    #[inline(always)]
    pub(crate) fn addr(&self) -> usize {
        self.state.addr()
    }

    #[inline(always)]
    pub(crate) fn word(&self) -> &AtomicI32 {
        &self.state.word
    }

    #[inline(always)]
    pub(crate) fn waiter(&self) -> &Waiter {
        &self.waiter
    }

    /// Count a condition waiter so the next release issues a wake
    pub(crate) fn increment_contenders(&self) {
        self.state
            .word
            .fetch_add(CONTENDER_INCREMENT, Ordering::SeqCst);
    }

    pub(crate) fn decrement_contenders(&self) {
        self.state
            .word
            .fetch_sub(CONTENDER_INCREMENT, Ordering::SeqCst);
    }

    /// Fully release on behalf of a condition wait; returns the saved depth
    pub(crate) fn release_for_wait(&self) -> u32 {
        let saved = self.state.recursion.load(Ordering::Relaxed);
        self.state.recursion.store(1, Ordering::Relaxed);
        self.release();
        saved
    }

    /// Re-acquire after a condition wait and restore the saved depth
    ///
    /// Skips the order check: the thread held this lock before waiting.
    pub(crate) fn reacquire_after_wait(&self, me: ThreadId, saved: u32) {
        self.acquire_contended(me);
        self.state.recursion.store(saved, Ordering::Relaxed);
    }
}

impl Drop for ExclusiveLock {
    fn drop(&mut self) {
        let word = self.state.word.load(Ordering::Relaxed);
        if word != 0 {
            let violation = LockViolation::DestroyedWhileHeld {
                lock: self.state.name,
                owner: self.state.owner(),
                state: word,
            };
            if self.config.teardown.is_set() || std::thread::panicking() {
                warn!(lock = self.state.name, "{violation}");
                order::unregister(self.addr());
            } else {
                fatal(self.addr(), violation);
            }
        }
        GlobalRegistry::global().unregister(self.state.id);
    }
}

/// Owns one acquisition of an [`ExclusiveLock`]; releases it on drop
#[must_use = "the lock is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct ExclusiveGuard<'a> {
    lock: &'a ExclusiveLock,
    // Release must happen on the acquiring thread.
    _not_send: PhantomData<*const ()>,
}

impl<'a> ExclusiveGuard<'a> {
    fn new(lock: &'a ExclusiveLock) -> Self {
        Self {
            lock,
            _not_send: PhantomData,
        }
    }

    pub fn lock(&self) -> &'a ExclusiveLock {
        self.lock
    }
}

impl Drop for ExclusiveGuard<'_> {
    fn drop(&mut self) {
        self.lock.release();
    }
}
