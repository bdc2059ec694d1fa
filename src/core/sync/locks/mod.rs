/*!
 * Word-Based Locks
 *
 * Exclusive and shared/exclusive locks built directly on a 32-bit lock word,
 * the adaptive backoff and a [`WordWaiter`](super::WordWaiter) backend.
 *
 * # Design
 *
 * The lock word, owner and contention ledger live in a shared [`LockState`]
 * so that the word's address stays fixed for sleepers and requeued condition
 * waiters, and so the [`GlobalRegistry`](super::GlobalRegistry) can report on a
 * lock without borrowing it. Configuration and the wait backend are copied into
 * the lock itself.
 */

mod exclusive;
mod shared;

pub use exclusive::{ExclusiveGuard, ExclusiveLock};
pub use shared::{ReaderGuard, SharedExclusiveLock, WriterGuard};

use super::config::SyncConfig;
use super::ledger::ContentionLedger;
use super::order::LockLevel;
use super::registry::{GlobalRegistry, LockReport};
use crate::core::id::ThreadId;
use crate::core::limits::CONTENDER_INCREMENT;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicI32, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Lock flavour, for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LockKind {
    Exclusive,
    SharedExclusive,
}

impl fmt::Display for LockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LockKind::Exclusive => "exclusive",
            LockKind::SharedExclusive => "shared-exclusive",
        })
    }
}

/// State shared between a lock and the registry
#[derive(Debug)]
pub(crate) struct LockState {
    pub(crate) id: u64,
    pub(crate) name: &'static str,
    pub(crate) kind: LockKind,
    pub(crate) level: LockLevel,
    pub(crate) recursive: bool,
    /// Exclusive: held bit plus contender count. Shared: 0, -1 or reader count.
    pub(crate) word: AtomicI32,
    /// Blocked threads, shared/exclusive locks only
    pub(crate) contenders: AtomicU32,
    /// Written only by the thread taking or giving up exclusive ownership
    pub(crate) owner: AtomicU64,
    /// Meaningful only to the owner
    pub(crate) recursion: AtomicU32,
    pub(crate) ledger: ContentionLedger,
}

impl LockState {
    fn new(builder: &LockBuilder, kind: LockKind) -> Arc<Self> {
        let registry = GlobalRegistry::global();
        let state = Arc::new(Self {
            id: registry.next_id(),
            name: builder.name,
            kind,
            level: builder.level,
            recursive: builder.recursive && kind == LockKind::Exclusive,
            word: AtomicI32::new(0),
            contenders: AtomicU32::new(0),
            owner: AtomicU64::new(0),
            recursion: AtomicU32::new(0),
            ledger: ContentionLedger::new(),
        });
        registry.register(&state);
        debug!(lock = state.name, id = state.id, %kind, "lock created");
        state
    }

    #[inline(always)]
    pub(crate) fn owner(&self) -> ThreadId {
        ThreadId::from_raw(self.owner.load(Ordering::Relaxed))
    }

    #[inline(always)]
    pub(crate) fn set_owner(&self, owner: ThreadId) {
        self.owner.store(owner.as_u64(), Ordering::Relaxed);
    }

    pub(crate) fn contender_count(&self) -> u32 {
        match self.kind {
            LockKind::Exclusive => {
                (self.word.load(Ordering::Relaxed) as u32) / CONTENDER_INCREMENT as u32
            }
            LockKind::SharedExclusive => self.contenders.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn report(&self) -> LockReport {
        LockReport {
            id: self.id,
            name: self.name,
            kind: self.kind,
            level: self.level,
            recursive: self.recursive,
            owner: self.owner(),
            state: self.word.load(Ordering::Relaxed),
            contenders: self.contender_count(),
            contention: self.ledger.snapshot(),
        }
    }

    /// Stable address identifying this lock in held-lock bookkeeping
    #[inline(always)]
    pub(crate) fn addr(&self) -> usize {
        self as *const Self as usize
    }
}

/// Builder for [`ExclusiveLock`] and [`SharedExclusiveLock`]
///
/// # Example
///
/// ```
/// use ai_os_sync::{LockBuilder, LockLevel};
///
/// let heap = LockBuilder::new("heap").level(LockLevel::new(40)).exclusive();
/// let table = LockBuilder::new("class table").recursive(true).exclusive();
/// let mutator = LockBuilder::new("mutator").shared();
/// # drop((heap, table, mutator));
/// ```
#[derive(Debug, Clone, Copy)]
pub struct LockBuilder {
    name: &'static str,
    recursive: bool,
    level: LockLevel,
    config: SyncConfig,
}

impl LockBuilder {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            recursive: false,
            level: LockLevel::UNORDERED,
            config: SyncConfig::default(),
        }
    }

    /// Allow the owner to re-acquire (exclusive locks only)
    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    pub fn level(mut self, level: LockLevel) -> Self {
        self.level = level;
        self
    }

    pub fn config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    pub fn exclusive(self) -> ExclusiveLock {
        ExclusiveLock::from_parts(LockState::new(&self, LockKind::Exclusive), self.config)
    }

    /// Build a shared/exclusive lock; `recursive` is ignored
    pub fn shared(self) -> SharedExclusiveLock {
        SharedExclusiveLock::from_parts(
            LockState::new(&self, LockKind::SharedExclusive),
            self.config,
        )
    }
}
