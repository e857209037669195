//! Background refresh thread
//!
//! Refreshes at least every `max_stale` and, while some caller waits for a
//! generation that is not yet searchable, as often as every `min_stale`.

use std::sync::Arc;
use std::thread;
use std::time::Instant;

use crossbeam::channel::{self, Receiver, Sender};
use tracing::{error, info, warn};

use super::generation::GenerationTracker;
use super::searcher::SearcherManager;
use crate::config::RefreshConfig;
use crate::error::Result;
use crate::models::Partition;

/// Marks the tracker dead if the thread unwinds
struct PanicGuard(Arc<GenerationTracker>);

impl Drop for PanicGuard {
    fn drop(&mut self) {
        if thread::panicking() {
            self.0.mark_dead("refresh thread panicked");
        }
    }
}

pub(crate) struct RefreshThread {
    shutdown: Option<Sender<()>>,
    join: Option<thread::JoinHandle<()>>,
}

impl RefreshThread {
    pub(crate) fn spawn(
        partition: Partition,
        manager: Arc<SearcherManager>,
        tracker: Arc<GenerationTracker>,
        wake: Receiver<()>,
        config: RefreshConfig,
    ) -> Result<Self> {
        let (shutdown_tx, shutdown_rx) = channel::bounded::<()>(0);
        let join = thread::Builder::new()
            .name(format!("index-refresh-{}", partition))
            .spawn(move || run(partition, manager, tracker, wake, shutdown_rx, config))?;
        Ok(Self {
            shutdown: Some(shutdown_tx),
            join: Some(join),
        })
    }

    /// Stop the thread and wait for it to exit
    pub(crate) fn stop(&mut self) {
        self.shutdown.take();
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for RefreshThread {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(
    partition: Partition,
    manager: Arc<SearcherManager>,
    tracker: Arc<GenerationTracker>,
    wake: Receiver<()>,
    shutdown: Receiver<()>,
    config: RefreshConfig,
) {
    let _guard = PanicGuard(tracker.clone());
    let mut last_start = Instant::now();
    let mut failures = 0u32;

    loop {
        let target = if tracker.has_waiters() {
            config.min_stale()
        } else {
            config.max_stale()
        };
        let elapsed = last_start.elapsed();
        if elapsed < target {
            let sleep = target - elapsed;
            crossbeam::select! {
                recv(shutdown) -> _ => break,
                recv(wake) -> _ => {}
                default(sleep) => {}
            }
            continue;
        }

        last_start = Instant::now();
        match manager.maybe_refresh() {
            Ok(_) => failures = 0,
            Err(e) => {
                failures += 1;
                if failures >= config.max_consecutive_failures {
                    error!(
                        %partition,
                        failures,
                        error = %e,
                        "Refresh keeps failing, marking partition unavailable"
                    );
                    tracker.mark_dead(format!(
                        "refresh failed {} times in a row: {}",
                        failures, e
                    ));
                    return;
                }
                warn!(%partition, failures, error = %e, "Refresh failed, will retry");
            }
        }
    }
    info!(%partition, "Refresh thread stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::Analyzer;
    use crate::engine::{Document, EngineReader, IndexEngine, MemoryEngine, Term};
    use crate::error::IndexError;
    use crate::index::searcher::RefreshListener;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::time::Duration;

    /// Engine whose readers fail to open on demand
    struct FlakyEngine {
        inner: MemoryEngine,
        fail_open: AtomicBool,
    }

    impl IndexEngine for FlakyEngine {
        fn add_document(&self, doc: Document) -> Result<()> {
            self.inner.add_document(doc)
        }
        fn update_document(&self, term: &Term, doc: Document) -> Result<()> {
            self.inner.update_document(term, doc)
        }
        fn delete_documents(&self, term: &Term) -> Result<()> {
            self.inner.delete_documents(term)
        }
        fn delete_all(&self) -> Result<()> {
            self.inner.delete_all()
        }
        fn commit(&self) -> Result<()> {
            self.inner.commit()
        }
        fn has_uncommitted_changes(&self) -> bool {
            self.inner.has_uncommitted_changes()
        }
        fn open_reader(&self) -> Result<Arc<dyn EngineReader>> {
            if self.fail_open.load(Ordering::Acquire) {
                return Err(IndexError::Engine("disk unplugged".into()));
            }
            self.inner.open_reader()
        }
        fn is_current(&self, version: u64) -> Result<bool> {
            self.inner.is_current(version)
        }
        fn close(&self) -> Result<()> {
            self.inner.close()
        }
    }

    fn setup(
        fail_open: bool,
    ) -> (
        Arc<FlakyEngine>,
        Arc<AtomicU64>,
        Arc<GenerationTracker>,
        RefreshThread,
    ) {
        let engine = Arc::new(FlakyEngine {
            inner: MemoryEngine::in_memory("flaky", Arc::new(Analyzer::default())),
            fail_open: AtomicBool::new(false),
        });
        let manager = Arc::new(SearcherManager::new(Partition::Open, engine.clone()).unwrap());
        engine.fail_open.store(fail_open, Ordering::Release);
        let applied = Arc::new(AtomicU64::new(0));
        let (tracker, wake) = GenerationTracker::new(Partition::Open, applied.clone());
        manager.add_listener(tracker.clone() as Arc<dyn RefreshListener>);
        let config = RefreshConfig {
            min_stale_ms: 5,
            max_stale_ms: 50,
            max_consecutive_failures: 3,
        };
        let thread =
            RefreshThread::spawn(Partition::Open, manager, tracker.clone(), wake, config).unwrap();
        (engine, applied, tracker, thread)
    }

    #[test]
    fn test_refresh_makes_generation_visible() {
        let (engine, applied, tracker, mut thread) = setup(false);
        engine.add_document(Document::new()).unwrap();
        applied.store(1, Ordering::Release);

        assert!(tracker.future(1).wait_for(Duration::from_secs(5)).unwrap());
        thread.stop();
    }

    #[test]
    fn test_repeated_failures_mark_dead() {
        let (engine, applied, tracker, _thread) = setup(true);
        engine.add_document(Document::new()).unwrap();
        applied.store(1, Ordering::Release);

        let err = tracker
            .future(1)
            .wait_for(Duration::from_secs(5))
            .unwrap_err();
        assert!(matches!(err, IndexError::IndexUnavailable { .. }));
        assert!(tracker.check_available().is_err());
    }
}
