/*!
 * Contention Ledger
 *
 * Per-lock diagnostic record of who blocked whom: a fixed ring of
 * `(blocked, owner, count)` entries plus lifetime totals for contention count
 * and time spent waiting.
 *
 * # Design
 *
 * - Fixed ring of `CONTENTION_LOG_SIZE` slots; memory never grows
 * - Consecutive contentions between the same pair merge into one slot
 * - Slot selection races between writers; entries are a sample, not a log
 * - Compiled in with the `contention-ledger` feature. Without it the ledger
 *   is a zero-sized no-op with the same interface.
 */

use crate::core::id::ThreadId;
use ahash::AHashMap;
use serde::Serialize;
use std::fmt;
use std::io;
use std::time::Duration;

#[cfg(feature = "contention-ledger")]
pub use enabled::ContentionLedger;
#[cfg(not(feature = "contention-ledger"))]
pub use disabled::ContentionLedger;

pub(crate) use recorder::ContentionRecorder;

/// One sampled `(blocked, owner)` pair
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LedgerEntry {
    pub blocked: ThreadId,
    pub owner: ThreadId,
    pub count: u32,
}

/// Point-in-time copy of a ledger
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LedgerSnapshot {
    /// False when the crate was built without `contention-ledger`
    pub enabled: bool,
    pub total_count: u32,
    pub total_wait_ns: u64,
    pub entries: Vec<LedgerEntry>,
}

impl LedgerSnapshot {
    pub fn has_contended(&self) -> bool {
        self.total_count > 0
    }

    pub fn total_wait(&self) -> Duration {
        Duration::from_nanos(self.total_wait_ns)
    }

    pub fn average_wait(&self) -> Duration {
        if self.total_count == 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos(self.total_wait_ns / u64::from(self.total_count))
        }
    }

    /// Thread that was blocked most often in the sampled ring
    pub fn most_blocked(&self) -> Option<ThreadId> {
        Self::most_common(self.entries.iter().map(|e| (e.blocked, e.count)))
    }

    /// Thread that owned the lock most often while others were blocked
    pub fn most_owning(&self) -> Option<ThreadId> {
        Self::most_common(self.entries.iter().map(|e| (e.owner, e.count)))
    }

    fn most_common(samples: impl Iterator<Item = (ThreadId, u32)>) -> Option<ThreadId> {
        let mut totals: AHashMap<ThreadId, u64> = AHashMap::new();
        for (thread, count) in samples {
            if count > 0 && !thread.is_none() {
                *totals.entry(thread).or_default() += u64::from(count);
            }
        }
        totals
            .into_iter()
            .max_by_key(|&(thread, total)| (total, std::cmp::Reverse(thread)))
            .map(|(thread, _)| thread)
    }
}

impl fmt::Display for LedgerSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.enabled {
            return f.write_str("contention logging disabled");
        }
        if !self.has_contended() {
            return f.write_str("never contended");
        }
        write!(
            f,
            "contended {} total wait of contender {:?} average {:?}",
            self.total_count,
            self.total_wait(),
            self.average_wait()
        )?;
        if let Some(tid) = self.most_blocked() {
            write!(f, " sample shows most blocked tid={tid}")?;
        }
        if let Some(tid) = self.most_owning() {
            write!(f, " sample shows tid={tid} owning during this time")?;
        }
        Ok(())
    }
}

impl ContentionLedger {
    /// Write the one-line contention summary
    pub fn dump<W: io::Write + ?Sized>(&self, out: &mut W) -> io::Result<()> {
        writeln!(out, "{}", self.snapshot())
    }

    /// Start timing a contended acquisition; recorded when dropped
    #[inline]
    pub(crate) fn recorder(&self, blocked: ThreadId, owner: ThreadId) -> ContentionRecorder<'_> {
        ContentionRecorder::new(self, blocked, owner)
    }
}

#[cfg(feature = "contention-ledger")]
mod enabled {
    use super::{LedgerEntry, LedgerSnapshot};
    use crate::core::id::ThreadId;
    use crate::core::limits::CONTENTION_LOG_SIZE;
    use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Debug, Default)]
    struct Slot {
        blocked: AtomicU64,
        owner: AtomicU64,
        count: AtomicU32,
    }

    impl Slot {
        fn matches(&self, blocked: ThreadId, owner: ThreadId) -> bool {
            self.count.load(Ordering::Relaxed) > 0
                && self.blocked.load(Ordering::Relaxed) == blocked.as_u64()
                && self.owner.load(Ordering::Relaxed) == owner.as_u64()
        }
    }

    /// Contention ring and lifetime counters for one lock
    #[derive(Debug, Default)]
    pub struct ContentionLedger {
        slots: [Slot; CONTENTION_LOG_SIZE],
        cursor: AtomicUsize,
        total_count: AtomicU32,
        total_wait_ns: AtomicU64,
    }

    impl ContentionLedger {
        pub fn new() -> Self {
            Self::default()
        }

        /// Record one contended acquisition
        pub fn record(&self, blocked: ThreadId, owner: ThreadId, waited: Duration) {
            self.total_count.fetch_add(1, Ordering::Relaxed);
            let nanos = u64::try_from(waited.as_nanos()).unwrap_or(u64::MAX);
            self.total_wait_ns.fetch_add(nanos, Ordering::Relaxed);

            let current = self.cursor.load(Ordering::Relaxed);
            let slot = &self.slots[current];
            if slot.matches(blocked, owner) {
                slot.count.fetch_add(1, Ordering::Relaxed);
                return;
            }

            let mut index = current;
            let next = loop {
                let next = (index + 1) % CONTENTION_LOG_SIZE;
                match self.cursor.compare_exchange_weak(
                    index,
                    next,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => break next,
                    Err(actual) => index = actual,
                }
            };
            let slot = &self.slots[next];
            slot.blocked.store(blocked.as_u64(), Ordering::Relaxed);
            slot.owner.store(owner.as_u64(), Ordering::Relaxed);
            slot.count.store(1, Ordering::Relaxed);
        }

        pub fn total_count(&self) -> u32 {
            self.total_count.load(Ordering::Relaxed)
        }

        pub fn total_wait(&self) -> Duration {
            Duration::from_nanos(self.total_wait_ns.load(Ordering::Relaxed))
        }

        pub fn has_contended(&self) -> bool {
            self.total_count() > 0
        }

        pub fn snapshot(&self) -> LedgerSnapshot {
            LedgerSnapshot {
                enabled: true,
                total_count: self.total_count(),
                total_wait_ns: self.total_wait_ns.load(Ordering::Relaxed),
                entries: self
                    .slots
                    .iter()
                    .map(|slot| LedgerEntry {
                        blocked: ThreadId::from_raw(slot.blocked.load(Ordering::Relaxed)),
                        owner: ThreadId::from_raw(slot.owner.load(Ordering::Relaxed)),
                        count: slot.count.load(Ordering::Relaxed),
                    })
                    .collect(),
            }
        }
    }
}

#[cfg(not(feature = "contention-ledger"))]
mod disabled {
    use super::LedgerSnapshot;
    use crate::core::id::ThreadId;
    use std::time::Duration;

    /// No-op ledger
    #[derive(Debug, Default)]
    pub struct ContentionLedger;

    impl ContentionLedger {
        pub fn new() -> Self {
            Self
        }

        #[inline(always)]
        pub fn record(&self, _blocked: ThreadId, _owner: ThreadId, _waited: Duration) {}

        pub fn total_count(&self) -> u32 {
            0
        }

        pub fn total_wait(&self) -> Duration {
            Duration::ZERO
        }

        pub fn has_contended(&self) -> bool {
            false
        }

        pub fn snapshot(&self) -> LedgerSnapshot {
            LedgerSnapshot::default()
        }
    }
}

mod recorder {
    use super::ContentionLedger;
    use crate::core::id::ThreadId;

    /// Times one contended acquisition
    #[cfg(feature = "contention-ledger")]
    pub(crate) struct ContentionRecorder<'a> {
        ledger: &'a ContentionLedger,
        blocked: ThreadId,
        owner: ThreadId,
        start: std::time::Instant,
    }

    #[cfg(feature = "contention-ledger")]
    impl<'a> ContentionRecorder<'a> {
        #[inline]
        pub(crate) fn new(ledger: &'a ContentionLedger, blocked: ThreadId, owner: ThreadId) -> Self {
            Self {
                ledger,
                blocked,
                owner,
                start: std::time::Instant::now(),
            }
        }
    }

    #[cfg(feature = "contention-ledger")]
    impl Drop for ContentionRecorder<'_> {
        fn drop(&mut self) {
            self.ledger
                .record(self.blocked, self.owner, self.start.elapsed());
        }
    }

    #[cfg(not(feature = "contention-ledger"))]
    pub(crate) struct ContentionRecorder<'a>(std::marker::PhantomData<&'a ContentionLedger>);

    #[cfg(not(feature = "contention-ledger"))]
    impl<'a> ContentionRecorder<'a> {
        #[inline(always)]
        pub(crate) fn new(_ledger: &'a ContentionLedger, _blocked: ThreadId, _owner: ThreadId) -> Self {
            Self(std::marker::PhantomData)
        }
    }
}
