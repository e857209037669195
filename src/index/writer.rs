//! Generation-tracked writer
//!
//! One worker thread per partition drains a bounded queue and applies each
//! operation to the engine in submission order. Every accepted operation is
//! assigned the next write generation; the applied watermark is published
//! after the engine call returns, whether it succeeded or not.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::engine::{Document, IndexEngine, Term};
use crate::error::{IndexError, Result};
use crate::metrics::IndexMetrics;
use crate::models::Partition;

#[derive(Debug)]
pub(crate) enum WriteOp {
    Insert(Document),
    Replace(Term, Document),
    Delete(Term),
    DeleteAll,
}

impl WriteOp {
    fn label(&self) -> &'static str {
        match self {
            WriteOp::Insert(_) => "insert",
            WriteOp::Replace(..) => "replace",
            WriteOp::Delete(_) => "delete",
            WriteOp::DeleteAll => "delete_all",
        }
    }
}

struct Request {
    op: WriteOp,
    reply: Sender<Result<u64>>,
}

/// Pending result of one submitted write
#[must_use = "a ticket must be waited on to learn the write generation"]
pub struct WriteTicket {
    partition: Partition,
    rx: Receiver<Result<u64>>,
}

impl WriteTicket {
    /// Block until the operation has been applied
    pub fn wait(self) -> Result<u64> {
        self.rx.recv().map_err(|_| {
            IndexError::unavailable_partition(self.partition, "writer stopped before applying")
        })?
    }

    pub fn partition(&self) -> Partition {
        self.partition
    }
}

/// Shared failure flag; once set the partition accepts no more writes
#[derive(Default)]
pub(crate) struct FailureFlag(Mutex<Option<String>>);

impl FailureFlag {
    pub(crate) fn set(&self, reason: impl Into<String>) {
        let mut slot = self.0.lock();
        if slot.is_none() {
            *slot = Some(reason.into());
        }
    }

    pub(crate) fn check(&self, partition: Partition) -> Result<()> {
        match &*self.0.lock() {
            Some(reason) => Err(IndexError::unavailable_partition(partition, reason.clone())),
            None => Ok(()),
        }
    }
}

struct WorkerHandles {
    join: thread::JoinHandle<()>,
    done: Receiver<()>,
}

/// Single-worker write path of one partition
pub struct GenerationWriter {
    partition: Partition,
    tx: Mutex<Option<Sender<Request>>>,
    worker: Mutex<Option<WorkerHandles>>,
    applied: Arc<AtomicU64>,
    failure: Arc<FailureFlag>,
}

impl GenerationWriter {
    pub(crate) fn spawn(
        partition: Partition,
        engine: Arc<dyn IndexEngine>,
        queue_capacity: usize,
        eager_commit: bool,
        failure: Arc<FailureFlag>,
        metrics: Arc<IndexMetrics>,
    ) -> Result<Self> {
        let (tx, rx) = channel::bounded::<Request>(queue_capacity.max(1));
        let (done_tx, done_rx) = channel::bounded::<()>(0);
        let applied = Arc::new(AtomicU64::new(0));

        let worker_applied = applied.clone();
        let worker_failure = failure.clone();
        let join = thread::Builder::new()
            .name(format!("index-writer-{}", partition))
            .spawn(move || {
                // Disconnects when the worker exits
                let _done = done_tx;
                let mut generation = 0u64;
                while let Ok(Request { op, reply }) = rx.recv() {
                    if let Err(e) = worker_failure.check(partition) {
                        let _ = reply.send(Err(e));
                        continue;
                    }
                    generation += 1;
                    let label = op.label();
                    let started = Instant::now();
                    let mut result = apply(engine.as_ref(), op);
                    if result.is_ok() && eager_commit {
                        result = engine.commit();
                    }
                    metrics.observe_write(partition, label, started.elapsed(), result.is_ok());
                    if let Err(e) = &result {
                        warn!(%partition, generation, op = label, error = %e, "Write failed");
                    }
                    worker_applied.store(generation, Ordering::Release);
                    let _ = reply.send(result.map(|_| generation));
                }
                debug!(%partition, generation, "Writer drained");
            })?;

        Ok(Self {
            partition,
            tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(WorkerHandles {
                join,
                done: done_rx,
            })),
            applied,
            failure,
        })
    }

    /// Enqueue an operation; blocks only while the queue is full
    pub(crate) fn submit(&self, op: WriteOp) -> Result<WriteTicket> {
        self.failure.check(self.partition)?;
        let tx = self
            .tx
            .lock()
            .clone()
            .ok_or_else(|| IndexError::unavailable_partition(self.partition, "writer is closed"))?;
        let (reply, rx) = channel::bounded(1);
        tx.send(Request { op, reply })
            .map_err(|_| IndexError::unavailable_partition(self.partition, "writer is closed"))?;
        Ok(WriteTicket {
            partition: self.partition,
            rx,
        })
    }

    /// Generation of the last operation the engine has applied
    pub fn applied_generation(&self) -> u64 {
        self.applied.load(Ordering::Acquire)
    }

    pub(crate) fn applied_counter(&self) -> Arc<AtomicU64> {
        self.applied.clone()
    }

    /// Stop accepting operations and wait up to `timeout` for the queue to
    /// drain. Returns whether the worker finished. Idempotent.
    pub(crate) fn close(&self, timeout: Duration) -> bool {
        self.tx.lock().take();
        let Some(handles) = self.worker.lock().take() else {
            return true;
        };
        match handles.done.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    partition = %self.partition,
                    timeout_ms = timeout.as_millis() as u64,
                    "Timed out waiting for queued writes to drain"
                );
                false
            }
            _ => {
                if handles.join.join().is_err() {
                    error!(partition = %self.partition, "Writer thread panicked");
                }
                true
            }
        }
    }
}

fn apply(engine: &dyn IndexEngine, op: WriteOp) -> Result<()> {
    match op {
        WriteOp::Insert(doc) => engine.add_document(doc),
        WriteOp::Replace(term, doc) => engine.update_document(&term, doc),
        WriteOp::Delete(term) => engine.delete_documents(&term),
        WriteOp::DeleteAll => engine.delete_all(),
    }
}
