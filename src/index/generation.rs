//! Generation futures
//!
//! A [`GenerationTracker`] holds a partition's searching generation: the
//! newest write generation guaranteed visible to searchers. Waiters block on
//! one condition variable that is signalled after every refresh attempt, so
//! each waiter re-checks on every refresh, not only the one it asked for.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::channel::{Receiver, Sender};
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};

use crate::error::{IndexError, Result};
use crate::index::searcher::{RefreshListener, RefreshOutcome};
use crate::models::Partition;

#[derive(Clone, Debug, PartialEq, Eq)]
enum Status {
    Running,
    /// Orderly shutdown; the final searching generation is still served
    Shutdown,
    /// Refresh or commit failed for good
    Dead(String),
}

struct TrackerState {
    searching: u64,
    status: Status,
}

/// Searching-generation state of one partition
pub struct GenerationTracker {
    partition: Partition,
    /// Applied generation published by the writer
    applied: Arc<AtomicU64>,
    /// Applied generation read when the current refresh started
    refresh_start: AtomicU64,
    state: Mutex<TrackerState>,
    cond: Condvar,
    /// Pending waiters: future id -> target generation
    pending: DashMap<u64, u64>,
    next_id: AtomicU64,
    wake_tx: Sender<()>,
}

impl GenerationTracker {
    /// Create a tracker and the channel the refresh thread listens on for
    /// newly arrived waiters
    pub(crate) fn new(partition: Partition, applied: Arc<AtomicU64>) -> (Arc<Self>, Receiver<()>) {
        let (wake_tx, wake_rx) = crossbeam::channel::bounded(1);
        let tracker = Arc::new(Self {
            partition,
            applied,
            refresh_start: AtomicU64::new(0),
            state: Mutex::new(TrackerState {
                searching: 0,
                status: Status::Running,
            }),
            cond: Condvar::new(),
            pending: DashMap::new(),
            next_id: AtomicU64::new(1),
            wake_tx,
        });
        (tracker, wake_rx)
    }

    pub fn partition(&self) -> Partition {
        self.partition
    }

    pub fn searching_generation(&self) -> u64 {
        self.state.lock().searching
    }

    /// Fail if the partition can no longer make progress
    pub fn check_available(&self) -> Result<()> {
        match &self.state.lock().status {
            Status::Dead(reason) => Err(IndexError::unavailable_partition(
                self.partition,
                reason.clone(),
            )),
            _ => Ok(()),
        }
    }

    /// Whether someone waits for a generation that is not yet searchable
    pub(crate) fn has_waiters(&self) -> bool {
        let searching = self.searching_generation();
        self.pending.iter().any(|e| *e.value() > searching)
    }

    /// Raise the searching generation and wake every waiter
    pub(crate) fn publish(&self, generation: u64) {
        let mut state = self.state.lock();
        if generation > state.searching {
            state.searching = generation;
        }
        self.cond.notify_all();
    }

    /// Wake every waiter so it re-checks its condition
    pub(crate) fn notify(&self) {
        let _state = self.state.lock();
        self.cond.notify_all();
    }

    pub(crate) fn mark_dead(&self, reason: impl Into<String>) {
        let mut state = self.state.lock();
        if !matches!(state.status, Status::Dead(_)) {
            state.status = Status::Dead(reason.into());
        }
        self.cond.notify_all();
    }

    pub(crate) fn mark_shutdown(&self) {
        let mut state = self.state.lock();
        if state.status == Status::Running {
            state.status = Status::Shutdown;
        }
        self.cond.notify_all();
    }

    /// Future resolving once `generation` is searchable
    pub fn future(self: &Arc<Self>, generation: u64) -> GenerationFuture {
        GenerationFuture {
            tracker: self.clone(),
            target: generation,
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            cancelled: AtomicBool::new(false),
        }
    }
}

impl RefreshListener for GenerationTracker {
    fn before_refresh(&self) {
        self.refresh_start
            .store(self.applied.load(Ordering::Acquire), Ordering::Release);
    }

    fn after_refresh(&self, outcome: RefreshOutcome) {
        match outcome {
            RefreshOutcome::Refreshed | RefreshOutcome::Unchanged => {
                self.publish(self.refresh_start.load(Ordering::Acquire))
            }
            RefreshOutcome::Failed => self.notify(),
        }
    }
}

/// Completion signal for one write generation of one partition
pub struct GenerationFuture {
    tracker: Arc<GenerationTracker>,
    target: u64,
    id: u64,
    cancelled: AtomicBool,
}

impl GenerationFuture {
    pub fn generation(&self) -> u64 {
        self.target
    }

    pub fn partition(&self) -> Partition {
        self.tracker.partition
    }

    /// Non-blocking check
    pub fn is_done(&self) -> bool {
        self.tracker.searching_generation() >= self.target
    }

    /// Block until the generation is searchable or `timeout` elapses
    ///
    /// Returns `Ok(false)` on timeout or cancellation and
    /// `IndexUnavailable` once the partition can no longer refresh.
    pub fn wait_for(&self, timeout: Duration) -> Result<bool> {
        self.wait_until(Instant::now() + timeout)
    }

    pub(crate) fn wait_until(&self, deadline: Instant) -> Result<bool> {
        let tracker = &self.tracker;
        let mut state = tracker.state.lock();
        let mut registered = false;
        let result = loop {
            if state.searching >= self.target {
                break Ok(true);
            }
            match &state.status {
                Status::Dead(reason) => {
                    break Err(IndexError::unavailable_partition(
                        tracker.partition,
                        reason.clone(),
                    ))
                }
                Status::Shutdown => {
                    break Err(IndexError::unavailable_partition(
                        tracker.partition,
                        format!("closed before generation {} became visible", self.target),
                    ))
                }
                Status::Running => {}
            }
            if self.cancelled.load(Ordering::Acquire) {
                break Ok(false);
            }
            if !registered {
                tracker.pending.insert(self.id, self.target);
                let _ = tracker.wake_tx.try_send(());
                registered = true;
            }
            if tracker.cond.wait_until(&mut state, deadline).timed_out()
                && state.searching < self.target
            {
                break Ok(false);
            }
        };
        drop(state);
        if registered {
            tracker.pending.remove(&self.id);
        }
        result
    }

    /// Stop waiting; a blocked or later `wait_for` returns `Ok(false)`
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.tracker.pending.remove(&self.id);
        self.tracker.notify();
    }
}

impl Drop for GenerationFuture {
    fn drop(&mut self) {
        self.tracker.pending.remove(&self.id);
    }
}
