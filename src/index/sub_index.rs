//! One physical partition
//!
//! Bundles an engine with its writer, searcher manager, refresh thread and,
//! under a periodic commit policy, a commit thread.
//!
//! Close order:
//! 1. Stop the commit thread
//! 2. Drain the writer (bounded wait)
//! 3. Stop the refresh thread, then refresh once more so pending futures resolve
//! 4. Commit, close the searcher manager and the engine

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam::channel::{self, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{error, info, warn};

use super::generation::{GenerationFuture, GenerationTracker};
use super::refresh::RefreshThread;
use super::searcher::{RefreshListener, SearcherGuard, SearcherManager};
use super::writer::{FailureFlag, GenerationWriter, WriteOp, WriteTicket};
use crate::config::{CommitPolicy, PartitionConfig};
use crate::engine::{Document, IndexEngine, Term};
use crate::error::Result;
use crate::metrics::{IndexMetrics, RefreshMetrics};
use crate::models::Partition;

struct CommitThread {
    shutdown: Option<Sender<()>>,
    join: Option<thread::JoinHandle<()>>,
}

impl CommitThread {
    fn spawn(
        partition: Partition,
        interval: Duration,
        engine: Arc<dyn IndexEngine>,
        failure: Arc<FailureFlag>,
        tracker: Arc<GenerationTracker>,
        metrics: Arc<IndexMetrics>,
    ) -> Result<Self> {
        let (shutdown_tx, shutdown_rx) = channel::bounded::<()>(0);
        let join = thread::Builder::new()
            .name(format!("index-commit-{}", partition))
            .spawn(move || loop {
                match shutdown_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {}
                    _ => break,
                }
                if !engine.has_uncommitted_changes() {
                    continue;
                }
                match engine.commit() {
                    Ok(()) => metrics.record_commit(partition, true),
                    Err(e) => {
                        // The engine state can no longer be trusted; the
                        // partition stays down until it is rebuilt.
                        metrics.record_commit(partition, false);
                        error!(%partition, error = %e, "Periodic commit failed, closing partition");
                        let reason = format!("periodic commit failed: {}", e);
                        failure.set(reason.clone());
                        tracker.mark_dead(reason);
                        if let Err(e) = engine.close() {
                            warn!(%partition, error = %e, "Error closing engine after failed commit");
                        }
                        break;
                    }
                }
            })?;
        Ok(Self {
            shutdown: Some(shutdown_tx),
            join: Some(join),
        })
    }

    fn stop(&mut self) {
        self.shutdown.take();
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

/// A single physical partition of an index
pub struct SubIndex {
    partition: Partition,
    engine: Arc<dyn IndexEngine>,
    writer: GenerationWriter,
    manager: Arc<SearcherManager>,
    tracker: Arc<GenerationTracker>,
    failure: Arc<FailureFlag>,
    refresh: Mutex<Option<RefreshThread>>,
    commit: Mutex<Option<CommitThread>>,
    config: PartitionConfig,
    closed: AtomicBool,
}

impl SubIndex {
    pub fn open(
        partition: Partition,
        engine: Arc<dyn IndexEngine>,
        config: PartitionConfig,
        metrics: Arc<IndexMetrics>,
    ) -> Result<Self> {
        let failure = Arc::new(FailureFlag::default());
        let writer = GenerationWriter::spawn(
            partition,
            engine.clone(),
            config.queue_capacity,
            config.commit == CommitPolicy::Eager,
            failure.clone(),
            metrics.clone(),
        )?;

        let manager = Arc::new(SearcherManager::new(partition, engine.clone())?);
        let (tracker, wake) = GenerationTracker::new(partition, writer.applied_counter());
        manager.add_listener(tracker.clone() as Arc<dyn RefreshListener>);
        let searching_tracker = tracker.clone();
        manager.add_listener(Arc::new(RefreshMetrics {
            metrics: metrics.clone(),
            partition,
            searching: Arc::new(move || searching_tracker.searching_generation()),
        }));

        let refresh = RefreshThread::spawn(
            partition,
            manager.clone(),
            tracker.clone(),
            wake,
            config.refresh.clone(),
        )?;

        let commit = match config.commit.interval() {
            Some(interval) => Some(CommitThread::spawn(
                partition,
                interval,
                engine.clone(),
                failure.clone(),
                tracker.clone(),
                metrics,
            )?),
            None => None,
        };

        info!(%partition, commit = ?config.commit, "Opened partition");
        Ok(Self {
            partition,
            engine,
            writer,
            manager,
            tracker,
            failure,
            refresh: Mutex::new(Some(refresh)),
            commit: Mutex::new(commit),
            config,
            closed: AtomicBool::new(false),
        })
    }

    pub fn partition(&self) -> Partition {
        self.partition
    }

    pub fn insert(&self, doc: Document) -> Result<WriteTicket> {
        self.writer.submit(WriteOp::Insert(doc))
    }

    /// Replace every document matching `term` with `doc`
    pub fn replace(&self, term: Term, doc: Document) -> Result<WriteTicket> {
        self.writer.submit(WriteOp::Replace(term, doc))
    }

    pub fn delete(&self, term: Term) -> Result<WriteTicket> {
        self.writer.submit(WriteOp::Delete(term))
    }

    pub fn delete_all(&self) -> Result<WriteTicket> {
        self.writer.submit(WriteOp::DeleteAll)
    }

    /// Future resolving once `generation` is visible to searches
    pub fn future(&self, generation: u64) -> GenerationFuture {
        self.tracker.future(generation)
    }

    pub fn searching_generation(&self) -> u64 {
        self.tracker.searching_generation()
    }

    pub fn applied_generation(&self) -> u64 {
        self.writer.applied_generation()
    }

    /// Acquire the active snapshot, failing if the partition is unusable
    pub fn acquire(&self) -> Result<SearcherGuard> {
        self.failure.check(self.partition)?;
        self.tracker.check_available()?;
        self.manager.acquire()
    }

    /// Refresh now instead of waiting for the refresh thread
    pub fn refresh(&self) -> Result<bool> {
        self.manager.maybe_refresh()
    }

    /// Shut the partition down. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let partition = self.partition;

        if let Some(mut commit) = self.commit.lock().take() {
            commit.stop();
        }
        if !self.writer.close(self.config.drain_timeout()) {
            warn!(%partition, "Closing with writes still queued");
        }
        if let Some(mut refresh) = self.refresh.lock().take() {
            refresh.stop();
        }
        if let Err(e) = self.manager.maybe_refresh() {
            warn!(%partition, error = %e, "Final refresh failed");
        }
        self.tracker.mark_shutdown();

        if self.failure.check(partition).is_ok() && self.engine.has_uncommitted_changes() {
            if let Err(e) = self.engine.commit() {
                error!(%partition, error = %e, "Final commit failed");
            }
        }
        self.manager.close();
        if let Err(e) = self.engine.close() {
            warn!(%partition, error = %e, "Error closing engine");
        }
        info!(%partition, "Closed partition");
    }
}

impl Drop for SubIndex {
    fn drop(&mut self) {
        self.close();
    }
}
