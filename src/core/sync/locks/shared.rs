/*!
 * Shared/Exclusive Lock
 *
 * Reader-writer lock on one signed 32-bit state word:
 *
 * ```text
 *  0   free
 * -1   held exclusively
 *  n   held by n readers
 * ```
 *
 * Blocked threads are counted separately so unlock can skip the wake syscall
 * when nobody is waiting. There is no upgrade path: a thread holding shared
 * access must not request exclusive access, and a writer must not request
 * shared access. Both deadlock and are the caller's responsibility.
 */

use super::LockState;
use crate::core::errors::LockViolation;
use crate::core::id::{current_thread_id, ThreadId};
use crate::core::limits::STATE_EXCLUSIVE;
use crate::core::sync::config::{SyncConfig, WakePolicy};
use crate::core::sync::fatal::fatal;
use crate::core::sync::ledger::ContentionLedger;
use crate::core::sync::order::{self, LockLevel};
use crate::core::sync::registry::{GlobalRegistry, LockReport};
use crate::core::sync::spinwait::wait_briefly_for_config;
use crate::core::sync::wait::{Waiter, WordWaiter};
use std::io;
use std::marker::PhantomData;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{trace, warn};

/// Reader-writer lock
///
/// ```
/// use ai_os_sync::SharedExclusiveLock;
///
/// let lock = SharedExclusiveLock::new("mutator");
/// {
///     let _a = lock.read();
///     let _b = lock.read();
///     assert_eq!(lock.shared_count(), 2);
/// }
/// let _w = lock.write();
/// assert!(lock.is_exclusive_held());
/// ```
#[derive(Debug)]
pub struct SharedExclusiveLock {
    state: Arc<LockState>,
    config: SyncConfig,
    waiter: Waiter,
}

impl SharedExclusiveLock {
    /// Unordered lock with default configuration
    pub fn new(name: &'static str) -> Self {
        super::LockBuilder::new(name).shared()
    }

    pub(super) fn from_parts(state: Arc<LockState>, config: SyncConfig) -> Self {
        Self {
            waiter: Waiter::from_config(&config),
            state,
            config,
        }
    }

    /// Block until the calling thread holds the lock exclusively
    pub fn lock_exclusive(&self) {
        let me = current_thread_id();
        self.check_not_writer(me);
        order::check_before_blocking(self.addr(), self.state.name, self.state.level);
        let word = &self.state.word;
        let mut recorder = None;
        loop {
            let cur = word.load(Ordering::Relaxed);
            if cur == 0 {
                if word
                    .compare_exchange_weak(0, STATE_EXCLUSIVE, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
                {
                    break;
                }
            } else {
                recorder.get_or_insert_with(|| self.state.ledger.recorder(me, self.state.owner()));
                self.wait_for_state(cur, |s| s == 0, None);
            }
        }
        self.on_exclusive(me);
        drop(recorder);
    }

    /// Single attempt at exclusive access
    pub fn try_lock_exclusive(&self) -> bool {
        let me = current_thread_id();
        let acquired = self
            .state
            .word
            .compare_exchange(0, STATE_EXCLUSIVE, Ordering::Acquire, Ordering::Relaxed)
            .is_ok();
        if acquired {
            self.on_exclusive(me);
        }
        acquired
    }

    /// Exclusive access, giving up after `timeout`
    ///
    /// Returns `false` when the kernel wait times out; the contender count is
    /// restored and the lock is not held.
    pub fn try_lock_exclusive_timed(&self, timeout: Duration) -> bool {
        let me = current_thread_id();
        self.check_not_writer(me);
        order::check_before_blocking(self.addr(), self.state.name, self.state.level);
        let deadline = Instant::now().checked_add(timeout);
        let word = &self.state.word;
        let mut recorder = None;
        loop {
            let cur = word.load(Ordering::Relaxed);
            if cur == 0 {
                if word
                    .compare_exchange_weak(0, STATE_EXCLUSIVE, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
                {
                    break;
                }
            } else {
                recorder.get_or_insert_with(|| self.state.ledger.recorder(me, self.state.owner()));
                if !self.wait_for_state(cur, |s| s == 0, deadline) {
                    trace!(lock = self.state.name, ?timeout, "timed exclusive lock gave up");
                    return false;
                }
            }
        }
        self.on_exclusive(me);
        drop(recorder);
        true
    }

    /// Release exclusive access
    pub fn unlock_exclusive(&self) {
        let me = current_thread_id();
        let cur = self.state.word.load(Ordering::Relaxed);
        if cur != STATE_EXCLUSIVE {
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
        self.state.set_owner(ThreadId::NONE);
        order::unregister(self.addr());

        // Only the writer moves the word away from -1.
        if let Err(actual) = self.state.word.compare_exchange(
            STATE_EXCLUSIVE,
            0,
            Ordering::SeqCst,
            Ordering::Relaxed,
        ) {
            fatal(
                self.addr(),
                LockViolation::CorruptState {
                    lock: self.state.name,
                    state: actual,
                },
            );
        }
        if self.state.contenders.load(Ordering::SeqCst) > 0 {
            self.wake_contenders();
        }
    }

    /// Block until the calling thread holds shared access
    pub fn lock_shared(&self) {
        let me = current_thread_id();
        order::check_before_blocking(self.addr(), self.state.name, self.state.level);
        let word = &self.state.word;
        let mut recorder = None;
        loop {
            let cur = word.load(Ordering::Relaxed);
            if cur >= 0 {
                if word
                    .compare_exchange_weak(cur, cur + 1, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
                {
                    break;
                }
            } else {
                recorder.get_or_insert_with(|| self.state.ledger.recorder(me, self.state.owner()));
                self.wait_for_state(cur, |s| s >= 0, None);
            }
        }
        order::register(self.addr(), self.state.name, self.state.level);
        drop(recorder);
    }

    /// Shared access without blocking; `false` while a writer holds the lock
    pub fn try_lock_shared(&self) -> bool {
        let word = &self.state.word;
        let mut cur = word.load(Ordering::Relaxed);
        while cur >= 0 {
            match word.compare_exchange_weak(cur, cur + 1, Ordering::Acquire, Ordering::Relaxed) {
                Ok(_) => {
                    order::register(self.addr(), self.state.name, self.state.level);
                    return true;
                }
                Err(actual) => cur = actual,
            }
        }
        false
    }

    /// Release one shared hold
    pub fn unlock_shared(&self) {
        let word = &self.state.word;
        let mut cur = word.load(Ordering::Relaxed);
        if cur <= 0 || !order::is_registered(self.addr()) {
            fatal(
                self.addr(),
                LockViolation::ReleaseUnheld {
                    lock: self.state.name,
                    state: cur,
                },
            );
        }
        loop {
            if cur <= 0 {
                fatal(
                    self.addr(),
                    LockViolation::CorruptState {
                        lock: self.state.name,
                        state: cur,
                    },
                );
            }
            match word.compare_exchange_weak(cur, cur - 1, Ordering::SeqCst, Ordering::Relaxed) {
                Ok(_) => break,
                Err(actual) => cur = actual,
            }
        }
        order::unregister(self.addr());
        if cur == 1 && self.state.contenders.load(Ordering::SeqCst) > 0 {
            self.wake_contenders();
        }
    }

    /// RAII shared access
    pub fn read(&self) -> ReaderGuard<'_> {
        self.lock_shared();
        ReaderGuard {
            lock: self,
            _not_send: PhantomData,
        }
    }

    /// RAII exclusive access
    pub fn write(&self) -> WriterGuard<'_> {
        self.lock_exclusive();
        WriterGuard {
            lock: self,
            _not_send: PhantomData,
        }
    }

    pub fn is_exclusive_held(&self) -> bool {
        self.state.word.load(Ordering::Relaxed) == STATE_EXCLUSIVE
    }

    pub fn is_exclusive_held_by(&self, thread: ThreadId) -> bool {
        !thread.is_none() && self.is_exclusive_held() && self.state.owner() == thread
    }

    /// Does the calling thread hold shared access?
    pub fn is_shared_held(&self) -> bool {
        order::is_registered(self.addr()) && !self.is_exclusive_held_by(current_thread_id())
    }

    /// Current reader count, 0 when free or exclusively held
    pub fn shared_count(&self) -> u32 {
        self.state.word.load(Ordering::Relaxed).max(0) as u32
    }

    /// Blocked threads
    pub fn contenders(&self) -> u32 {
        self.state.contenders.load(Ordering::Relaxed)
    }

    pub fn owner(&self) -> ThreadId {
        self.state.owner()
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

    pub fn dump<W: io::Write + ?Sized>(&self, out: &mut W) -> io::Result<()> {
        writeln!(out, "{}", self.report())
    }

    pub fn assert_exclusive_held(&self) {
        if !self.is_exclusive_held_by(current_thread_id()) {
            self.assertion_failed("exclusively held by the calling thread");
        }
    }

    pub fn assert_shared_held(&self) {
        if !order::is_registered(self.addr()) {
            self.assertion_failed("shared or exclusive access held by the calling thread");
        }
    }

    pub fn assert_not_held(&self) {
        if order::is_registered(self.addr()) {
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

    fn check_not_writer(&self, me: ThreadId) {
        if self.is_exclusive_held_by(me) {
            fatal(
                self.addr(),
                LockViolation::RecursiveAcquire {
                    lock: self.state.name,
                    thread: me,
                },
            );
        }
    }

    /// Wait for `ready(state)` after observing `observed`
    ///
    /// Returns `false` only if `deadline` passed.
    fn wait_for_state(
        &self,
        observed: i32,
        ready: impl Fn(i32) -> bool,
        deadline: Option<Instant>,
    ) -> bool {
        let word = &self.state.word;
        if wait_briefly_for_config(word, &self.config, &ready) {
            return true;
        }
        let teardown = self.config.teardown;
        teardown.park_if_set();

        let timeout = match deadline {
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return false;
                }
                Some(deadline - now)
            }
            None => None,
        };

        self.state.contenders.fetch_add(1, Ordering::SeqCst);
        trace!(lock = self.state.name, state = observed, "blocking on state word");
        let outcome = self.waiter.wait(word, observed, timeout);
        teardown.park_if_set();
        self.state.contenders.fetch_sub(1, Ordering::SeqCst);

        match outcome {
            Ok(outcome) => !outcome.timed_out(),
            Err(source) => fatal(
                self.addr(),
                LockViolation::KernelWait {
                    lock: self.state.name,
                    source,
                },
            ),
        }
    }

    fn on_exclusive(&self, me: ThreadId) {
        self.state.set_owner(me);
        order::register(self.addr(), self.state.name, self.state.level);
    }

    fn wake_contenders(&self) {
        let woken = match self.config.shared_wake {
            WakePolicy::One => self.waiter.wake_one(&self.state.word),
            WakePolicy::All => self.waiter.wake_all(&self.state.word),
        };
        trace!(lock = self.state.name, woken = woken.count(), "woke contenders");
    }

    #[inline(always)]
    pub(crate) fn addr(&self) -> usize {
        self.state.addr()
    }
}

impl Drop for SharedExclusiveLock {
    fn drop(&mut self) {
        let state = self.state.word.load(Ordering::Relaxed);
        let contenders = self.state.contenders.load(Ordering::Relaxed);
        if state != 0 || contenders != 0 {
            let violation = LockViolation::DestroyedWhileHeld {
                lock: self.state.name,
                owner: self.state.owner(),
                state,
            };
            if self.config.teardown.is_set() || std::thread::panicking() {
                warn!(lock = self.state.name, contenders, "{violation}");
                order::unregister(self.addr());
            } else {
                fatal(self.addr(), violation);
            }
        }
        GlobalRegistry::global().unregister(self.state.id);
    }
}

/// Shared hold on a [`SharedExclusiveLock`]
#[must_use = "the lock is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct ReaderGuard<'a> {
    lock: &'a SharedExclusiveLock,
    _not_send: PhantomData<*const ()>,
}

impl Drop for ReaderGuard<'_> {
    fn drop(&mut self) {
        self.lock.unlock_shared();
    }
}

/// Exclusive hold on a [`SharedExclusiveLock`]
#[must_use = "the lock is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct WriterGuard<'a> {
    lock: &'a SharedExclusiveLock,
    _not_send: PhantomData<*const ()>,
}

impl Drop for WriterGuard<'_> {
    fn drop(&mut self) {
        self.lock.unlock_exclusive();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::thread;

    #[test]
    fn test_state_encoding() {
        let lock = SharedExclusiveLock::new("encoding");
        assert!(lock.try_lock_shared());
        assert!(lock.try_lock_shared());
        assert_eq!(lock.state.word.load(Ordering::Relaxed), 2);
        assert!(lock.is_shared_held());
        assert!(!lock.try_lock_exclusive());
        lock.unlock_shared();
        lock.unlock_shared();
        assert!(!lock.is_shared_held());

        assert!(lock.try_lock_exclusive());
        assert_eq!(lock.state.word.load(Ordering::Relaxed), STATE_EXCLUSIVE);
        assert!(lock.is_exclusive_held_by(current_thread_id()));
        assert!(!lock.try_lock_shared());
        lock.unlock_exclusive();
        assert_eq!(lock.state.word.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_timed_exclusive_times_out() {
        let lock = Arc::new(SharedExclusiveLock::new("timed"));
        let _reader = lock.read();
        let other = lock.clone();
        let start = Instant::now();
        let acquired = thread::spawn(move || other.try_lock_exclusive_timed(Duration::from_millis(50)))
            .join()
            .unwrap();
        assert!(!acquired);
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert_eq!(lock.contenders(), 0);
    }

    #[test]
    fn test_timed_exclusive_succeeds_when_free() {
        let lock = SharedExclusiveLock::new("timed free");
        assert!(lock.try_lock_exclusive_timed(Duration::from_millis(10)));
        lock.unlock_exclusive();
    }

    #[test]
    fn test_writer_waits_for_reader() {
        let lock = Arc::new(SharedExclusiveLock::new("rw handoff"));
        let reader = lock.read();
        let writer_lock = lock.clone();
        let writer = thread::spawn(move || {
            writer_lock.lock_exclusive();
            let held = writer_lock.is_exclusive_held();
            writer_lock.unlock_exclusive();
            held
        });
        thread::sleep(Duration::from_millis(20));
        assert_eq!(lock.shared_count(), 1);
        drop(reader);
        assert!(writer.join().unwrap());
    }
}
