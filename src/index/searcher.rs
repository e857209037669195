//! Reference-counted searcher snapshots
//!
//! The active [`Snapshot`] sits behind an `ArcSwap`. Every snapshot carries
//! its own reference count, one of which belongs to the manager while the
//! snapshot is active. `acquire()` takes a reference with a try-increment
//! loop; the reader is closed when the count reaches zero, which can only
//! happen once the snapshot has been swapped out.

use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tracing::debug;

use crate::engine::{EngineReader, IndexEngine};
use crate::error::{IndexError, Result};
use crate::models::Partition;

/// Result of one refresh attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// A new snapshot was installed
    Refreshed,
    /// The active snapshot was already current
    Unchanged,
    Failed,
}

/// Observer of refresh attempts
pub trait RefreshListener: Send + Sync {
    fn before_refresh(&self) {}

    /// Called after every attempt, including failed ones
    fn after_refresh(&self, outcome: RefreshOutcome);
}

/// One immutable engine view plus its reference count
pub struct Snapshot {
    reader: Arc<dyn EngineReader>,
    refs: AtomicUsize,
    partition: Partition,
}

impl Snapshot {
    fn new(reader: Arc<dyn EngineReader>, partition: Partition) -> Self {
        Self {
            reader,
            refs: AtomicUsize::new(1),
            partition,
        }
    }

    pub fn reader(&self) -> &dyn EngineReader {
        self.reader.as_ref()
    }

    pub fn version(&self) -> u64 {
        self.reader.version()
    }

    pub fn ref_count(&self) -> usize {
        self.refs.load(Ordering::Acquire)
    }

    fn try_inc_ref(&self) -> bool {
        let mut count = self.refs.load(Ordering::Acquire);
        loop {
            if count == 0 {
                return false;
            }
            match self.refs.compare_exchange_weak(
                count,
                count + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => count = actual,
            }
        }
    }

    fn dec_ref(&self) {
        if self.refs.fetch_sub(1, Ordering::AcqRel) == 1 {
            debug!(
                partition = %self.partition,
                version = self.reader.version(),
                "Closing snapshot"
            );
            self.reader.close();
        }
    }
}

/// A counted reference to a snapshot, released on drop
pub struct SearcherGuard {
    snapshot: Arc<Snapshot>,
}

impl SearcherGuard {
    /// Release explicitly; same as dropping the guard
    pub fn release(self) {}
}

impl Deref for SearcherGuard {
    type Target = Snapshot;

    fn deref(&self) -> &Snapshot {
        &self.snapshot
    }
}

impl Drop for SearcherGuard {
    fn drop(&mut self) {
        self.snapshot.dec_ref();
    }
}

/// Owns the active snapshot of one partition
pub struct SearcherManager {
    partition: Partition,
    engine: Arc<dyn IndexEngine>,
    current: ArcSwap<Snapshot>,
    refresh_lock: Mutex<()>,
    listeners: Mutex<Vec<Arc<dyn RefreshListener>>>,
    closed: AtomicBool,
}

impl SearcherManager {
    pub fn new(partition: Partition, engine: Arc<dyn IndexEngine>) -> Result<Self> {
        let reader = engine.open_reader()?;
        Ok(Self {
            partition,
            engine,
            current: ArcSwap::from_pointee(Snapshot::new(reader, partition)),
            refresh_lock: Mutex::new(()),
            listeners: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        })
    }

    pub fn add_listener(&self, listener: Arc<dyn RefreshListener>) {
        self.listeners.lock().push(listener);
    }

    /// Take a reference to the active snapshot; never blocks
    pub fn acquire(&self) -> Result<SearcherGuard> {
        loop {
            let snapshot = self.current.load_full();
            if snapshot.try_inc_ref() {
                return Ok(SearcherGuard { snapshot });
            }
            if self.closed.load(Ordering::Acquire) {
                return Err(IndexError::unavailable_partition(
                    self.partition,
                    "searcher manager is closed",
                ));
            }
            // Lost a race with a swap; the next load sees the new snapshot
        }
    }

    /// Install a new snapshot if the engine has changed since the active one
    ///
    /// Blocks while another refresh is running. Listeners are told about
    /// every attempt.
    pub fn maybe_refresh(&self) -> Result<bool> {
        let _lock = self.refresh_lock.lock();
        if self.closed.load(Ordering::Acquire) {
            return Err(IndexError::unavailable_partition(
                self.partition,
                "searcher manager is closed",
            ));
        }

        let listeners = self.listeners.lock().clone();
        for l in &listeners {
            l.before_refresh();
        }

        let result = self.refresh_if_needed();
        let outcome = match &result {
            Ok(true) => RefreshOutcome::Refreshed,
            Ok(false) => RefreshOutcome::Unchanged,
            Err(_) => RefreshOutcome::Failed,
        };
        for l in &listeners {
            l.after_refresh(outcome);
        }
        result
    }

    fn refresh_if_needed(&self) -> Result<bool> {
        let active = self.current.load_full();
        if self.engine.is_current(active.version())? {
            return Ok(false);
        }
        let reader = self.engine.open_reader()?;
        let version = reader.version();
        let old = self.current.swap(Arc::new(Snapshot::new(reader, self.partition)));
        old.dec_ref();
        debug!(partition = %self.partition, version, "Installed new snapshot");
        Ok(true)
    }

    /// Drop the manager's reference to the active snapshot. Idempotent.
    pub fn close(&self) {
        let _lock = self.refresh_lock.lock();
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.current.load_full().dec_ref();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::Analyzer;
    use crate::engine::{Document, MemoryEngine, Sort};
    use crate::query::NativeQuery;
    use std::sync::atomic::AtomicU64;

    fn manager() -> (Arc<MemoryEngine>, SearcherManager) {
        let engine = Arc::new(MemoryEngine::in_memory("t", Arc::new(Analyzer::default())));
        let manager = SearcherManager::new(Partition::Open, engine.clone()).unwrap();
        (engine, manager)
    }

    struct Counter(AtomicU64, AtomicU64);

    impl RefreshListener for Counter {
        fn before_refresh(&self) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }

        fn after_refresh(&self, outcome: RefreshOutcome) {
            if outcome == RefreshOutcome::Refreshed {
                self.1.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    #[test]
    fn test_acquire_release_counts() {
        let (_engine, m) = manager();
        let a = m.acquire().unwrap();
        let b = m.acquire().unwrap();
        assert_eq!(a.ref_count(), 3);
        b.release();
        assert_eq!(a.ref_count(), 2);
    }

    #[test]
    fn test_old_snapshot_stays_valid_until_released() {
        let (engine, m) = manager();
        let old = m.acquire().unwrap();
        engine.add_document(Document::new()).unwrap();
        assert!(m.maybe_refresh().unwrap());

        // Swapped out but still referenced
        assert_eq!(old.ref_count(), 1);
        assert!(old
            .reader()
            .search(&NativeQuery::MatchAll, 10, &Sort::default(), None)
            .is_ok());
        let new = m.acquire().unwrap();
        assert_eq!(new.reader().num_docs(), 1);
        assert_eq!(old.reader().num_docs(), 0);

        let snapshot = old.snapshot.clone();
        drop(old);
        assert_eq!(snapshot.ref_count(), 0);
        assert!(snapshot
            .reader()
            .search(&NativeQuery::MatchAll, 10, &Sort::default(), None)
            .is_err());
    }

    #[test]
    fn test_refresh_unchanged() {
        let (_engine, m) = manager();
        let counter = Arc::new(Counter(AtomicU64::new(0), AtomicU64::new(0)));
        m.add_listener(counter.clone());
        assert!(!m.maybe_refresh().unwrap());
        assert_eq!(counter.0.load(Ordering::Relaxed), 1);
        assert_eq!(counter.1.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_close() {
        let (_engine, m) = manager();
        let guard = m.acquire().unwrap();
        m.close();
        m.close();
        assert!(matches!(
            m.acquire(),
            Err(IndexError::IndexUnavailable { .. })
        ));
        assert_eq!(guard.ref_count(), 1);
        drop(guard);
        assert!(m.maybe_refresh().is_err());
    }

    #[test]
    fn test_concurrent_acquire_during_refresh() {
        let (engine, m) = manager();
        let m = Arc::new(m);
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let m = m.clone();
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        let g = m.acquire().unwrap();
                        g.reader()
                            .search(&NativeQuery::MatchAll, 5, &Sort::default(), None)
                            .unwrap();
                    }
                })
            })
            .collect();
        for _ in 0..50 {
            engine.add_document(Document::new()).unwrap();
            m.maybe_refresh().unwrap();
        }
        for r in readers {
            r.join().unwrap();
        }
        assert_eq!(m.acquire().unwrap().reader().num_docs(), 50);
    }
}
