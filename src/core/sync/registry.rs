/*!
 * Global Lock Registry
 *
 * Process-wide set of live lock instances, used only for bulk diagnostics.
 *
 * # Design
 *
 * - Guarded by its own CAS spinlock, never by an [`ExclusiveLock`](super::ExclusiveLock):
 *   locks register themselves on construction, so the registry cannot depend on them
 * - Holds `Arc`s to each lock's shared state; a dump in progress keeps a record
 *   alive even if its lock is dropped concurrently
 * - The spinlock only covers map edits and cloning the record list; formatting
 *   happens after it is released
 * - Populated only with the `contention-ledger` feature
 */

use super::ledger::LedgerSnapshot;
use super::locks::{LockKind, LockState};
use super::order::LockLevel;
use super::spinwait::backoff;
use crate::core::id::ThreadId;
use crate::core::limits::REGISTRY_SPIN_MAX_BACKOFF;
use serde::Serialize;
use std::cell::UnsafeCell;
use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Serializable view of one lock
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockReport {
    pub id: u64,
    pub name: &'static str,
    pub kind: LockKind,
    pub level: LockLevel,
    pub recursive: bool,
    pub owner: ThreadId,
    pub state: i32,
    pub contenders: u32,
    pub contention: LedgerSnapshot,
}

impl fmt::Display for LockReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} \"{}\" {}", self.kind, self.name, self.level)?;
        if self.recursive {
            f.write_str(" recursive")?;
        }
        if self.owner.is_none() {
            f.write_str(" owner=none")?;
        } else {
            write!(f, " owner={}", self.owner)?;
        }
        write!(
            f,
            " state={} contenders={}: {}",
            self.state, self.contenders, self.contention
        )
    }
}

/// Registry of every live lock
pub struct GlobalRegistry {
    busy: AtomicBool,
    next_id: AtomicU64,
    locks: UnsafeCell<BTreeMap<u64, Arc<LockState>>>,
}

// SAFETY: `locks` is only touched inside `with_locked`, which holds `busy`.
unsafe impl Sync for GlobalRegistry {}

static REGISTRY: GlobalRegistry = GlobalRegistry::new();

struct SpinRelease<'a>(&'a AtomicBool);

impl Drop for SpinRelease<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl GlobalRegistry {
    const fn new() -> Self {
        Self {
            busy: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
            locks: UnsafeCell::new(BTreeMap::new()),
        }
    }

    /// The process-wide registry
    #[inline]
    pub fn global() -> &'static GlobalRegistry {
        &REGISTRY
    }

    /// Identifier for a newly built lock
    pub(crate) fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn with_locked<R>(&self, f: impl FnOnce(&mut BTreeMap<u64, Arc<LockState>>) -> R) -> R {
        let mut attempt = 0;
        while self
            .busy
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            attempt = (attempt + 1).min(REGISTRY_SPIN_MAX_BACKOFF);
            backoff(attempt);
        }
        let _release = SpinRelease(&self.busy);
        // SAFETY: `busy` is held until `_release` drops.
        f(unsafe { &mut *self.locks.get() })
    }

    pub(crate) fn register(&self, state: &Arc<LockState>) {
        if !cfg!(feature = "contention-ledger") {
            return;
        }
        let state = Arc::clone(state);
        self.with_locked(|locks| locks.insert(state.id, state));
    }

    pub(crate) fn unregister(&self, id: u64) {
        if !cfg!(feature = "contention-ledger") {
            return;
        }
        let removed = self.with_locked(|locks| locks.remove(&id));
        if let Some(state) = removed {
            debug!(lock = state.name, id, "lock unregistered");
        }
    }

    /// Number of registered locks
    pub fn len(&self) -> usize {
        self.with_locked(|locks| locks.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reports for every registered lock, ordered by construction
    pub fn snapshot(&self) -> Vec<LockReport> {
        let states: Vec<Arc<LockState>> =
            self.with_locked(|locks| locks.values().cloned().collect());
        states.iter().map(|state| state.report()).collect()
    }

    /// Write every lock, contended ones first
    pub fn dump_all<W: io::Write + ?Sized>(&self, out: &mut W) -> io::Result<()> {
        let (contended, quiet): (Vec<_>, Vec<_>) = self
            .snapshot()
            .into_iter()
            .partition(|report| report.contention.has_contended());

        writeln!(out, "Lock registry: {} live", contended.len() + quiet.len())?;
        writeln!(out, "(Contended)")?;
        for report in &contended {
            writeln!(out, "  {report}")?;
        }
        writeln!(out, "(Never contended)")?;
        for report in &quiet {
            writeln!(out, "  {report}")?;
        }
        Ok(())
    }

    /// Write the snapshot as pretty-printed JSON
    pub fn dump_json<W: io::Write + ?Sized>(&self, out: &mut W) -> io::Result<()> {
        serde_json::to_writer_pretty(&mut *out, &self.snapshot()).map_err(io::Error::from)?;
        writeln!(out)
    }
}
