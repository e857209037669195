//! Partitioned entity index
//!
//! One logical index over two physical partitions. Entities move between
//! partitions when the partitioner's answer changes: the old document is
//! deleted and the new one written, both awaited before the write returns.
//! Searches visit every partition that can hold a match and merge the hits.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use super::generation::GenerationFuture;
use super::ready::ReadyStore;
use super::source::{self, EntityLoader, ResultSet, SearchOptions};
use super::sub_index::SubIndex;
use crate::analysis::Analyzer;
use crate::config::{IndexConfig, PaginationType, PartitionConfig};
use crate::engine::{IndexEngine, MemoryEngine, Sort, Term};
use crate::error::Result;
use crate::metrics::IndexMetrics;
use crate::models::{FieldBundle, FieldValue, Partition};
use crate::query::{FieldOp, Predicate, QueryCompiler};
use crate::schema::{key_term, key_term_for, to_document, Indexable, Schema};

/// Chooses the partition of an entity and the partitions a query can match
pub trait Partitioner<E>: Send + Sync {
    fn partition_of(&self, entity: &E) -> Partition;

    /// Partitions that may contain a match, in merge order. Returning more
    /// partitions than needed is always correct.
    fn possible_partitions(&self, predicate: &Predicate) -> Vec<Partition>;
}

/// Routes by a status field: values in the open set go to `Open`, anything
/// else (including a missing status) to `Closed`
#[derive(Clone, Debug)]
pub struct StatusPartitioner {
    field: String,
    open: BTreeSet<String>,
}

/// Status values a predicate can match
#[derive(Clone, Debug, PartialEq, Eq)]
enum StatusSet {
    Only(BTreeSet<String>),
    AllExcept(BTreeSet<String>),
}

impl StatusSet {
    fn all() -> Self {
        StatusSet::AllExcept(BTreeSet::new())
    }

    fn intersect(self, other: Self) -> Self {
        use StatusSet::*;
        match (self, other) {
            (Only(a), Only(b)) => Only(a.intersection(&b).cloned().collect()),
            (Only(a), AllExcept(x)) | (AllExcept(x), Only(a)) => {
                Only(a.difference(&x).cloned().collect())
            }
            (AllExcept(x), AllExcept(y)) => AllExcept(x.union(&y).cloned().collect()),
        }
    }

    fn union(self, other: Self) -> Self {
        use StatusSet::*;
        match (self, other) {
            (Only(a), Only(b)) => Only(a.union(&b).cloned().collect()),
            (Only(a), AllExcept(x)) | (AllExcept(x), Only(a)) => {
                AllExcept(x.difference(&a).cloned().collect())
            }
            (AllExcept(x), AllExcept(y)) => AllExcept(x.intersection(&y).cloned().collect()),
        }
    }

    fn complement(self) -> Self {
        match self {
            StatusSet::Only(a) => StatusSet::AllExcept(a),
            StatusSet::AllExcept(x) => StatusSet::Only(x),
        }
    }
}

impl StatusPartitioner {
    pub fn new<I, S>(field: impl Into<String>, open: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            field: field.into(),
            open: open.into_iter().map(Into::into).collect(),
        }
    }

    pub fn partition_of_status(&self, status: Option<&str>) -> Partition {
        match status {
            Some(s) if self.open.contains(s) => Partition::Open,
            _ => Partition::Closed,
        }
    }

    /// Whether the truth of `predicate` depends on the status field alone
    fn status_only(&self, predicate: &Predicate) -> bool {
        match predicate {
            Predicate::And(children) | Predicate::Or(children) => {
                children.iter().all(|c| self.status_only(c))
            }
            Predicate::Not(child) => self.status_only(child),
            Predicate::Field(f) => {
                f.field == self.field
                    && matches!(&f.op, FieldOp::Equals { value: FieldValue::Str(_) })
            }
            Predicate::PostFilter(_) => false,
        }
    }

    fn statuses(&self, predicate: &Predicate) -> StatusSet {
        match predicate {
            Predicate::And(children) => children
                .iter()
                .fold(StatusSet::all(), |acc, c| acc.intersect(self.statuses(c))),
            Predicate::Or(children) => children
                .iter()
                .fold(StatusSet::Only(BTreeSet::new()), |acc, c| {
                    acc.union(self.statuses(c))
                }),
            Predicate::Not(child) if self.status_only(child) => self.statuses(child).complement(),
            Predicate::Field(f) if f.field == self.field => match &f.op {
                FieldOp::Equals {
                    value: FieldValue::Str(s),
                } => StatusSet::Only(std::iter::once(s.clone()).collect()),
                _ => StatusSet::all(),
            },
            _ => StatusSet::all(),
        }
    }
}

impl<E: Indexable> Partitioner<E> for StatusPartitioner {
    fn partition_of(&self, entity: &E) -> Partition {
        let values = entity.field_values(&self.field);
        self.partition_of_status(values.first().and_then(FieldValue::as_str))
    }

    fn possible_partitions(&self, predicate: &Predicate) -> Vec<Partition> {
        let (open, closed) = match self.statuses(predicate) {
            StatusSet::Only(s) => (
                s.iter().any(|v| self.open.contains(v)),
                s.iter().any(|v| !self.open.contains(v)),
            ),
            // The complement of a finite set always holds a closed status
            StatusSet::AllExcept(x) => (!self.open.is_subset(&x), true),
        };
        Partition::ALL
            .into_iter()
            .filter(|p| match p {
                Partition::Open => open,
                Partition::Closed => closed,
            })
            .collect()
    }
}

/// How one write moves an entity between partitions
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    Stay(Partition),
    Move { from: Partition, to: Partition },
}

impl Transition {
    /// An unknown prior placement is treated as a move from the other
    /// partition, so a stale copy there is always removed
    pub fn compute(prior: Option<Partition>, target: Partition) -> Self {
        match prior {
            Some(p) if p == target => Transition::Stay(target),
            Some(from) => Transition::Move { from, to: target },
            None => Transition::Move {
                from: target.other(),
                to: target,
            },
        }
    }

    pub fn target(&self) -> Partition {
        match self {
            Transition::Stay(p) => *p,
            Transition::Move { to, .. } => *to,
        }
    }
}

/// Generations produced by one logical write
#[must_use]
pub struct WriteReceipt {
    futures: Vec<GenerationFuture>,
}

impl WriteReceipt {
    pub(crate) fn new(futures: Vec<GenerationFuture>) -> Self {
        Self { futures }
    }

    pub fn generations(&self) -> Vec<(Partition, u64)> {
        self.futures
            .iter()
            .map(|f| (f.partition(), f.generation()))
            .collect()
    }

    /// Wait until every generation is searchable; `Ok(false)` on timeout
    pub fn wait_visible(&self, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        for future in &self.futures {
            if !future.wait_until(deadline)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub fn is_visible(&self) -> bool {
        self.futures.iter().all(GenerationFuture::is_done)
    }
}

/// Open the engine of one partition in the schema version's directory
pub(crate) fn open_engine(
    config: &IndexConfig,
    schema: &Schema,
    analyzer: &Arc<Analyzer>,
    subdir: Option<&str>,
) -> Result<Arc<dyn IndexEngine>> {
    let label = subdir.unwrap_or("main");
    let name = format!("{}-{}", config.name, label);
    let engine = match config.version_dir(schema.version()) {
        Some(dir) => {
            let dir = match subdir {
                Some(sub) => dir.join(sub),
                None => dir,
            };
            MemoryEngine::open(name, &dir, analyzer.clone())?
        }
        None => MemoryEngine::in_memory(name, analyzer.clone()),
    };
    Ok(Arc::new(engine))
}

/// Logical index over an open and a closed partition
pub struct PartitionedIndex<E> {
    name: String,
    schema: Arc<Schema>,
    compiler: QueryCompiler,
    partitioner: Arc<dyn Partitioner<E>>,
    subs: [SubIndex; 2],
    /// Last known partition per key; the mutex serializes writes to a key
    locations: DashMap<Term, Arc<Mutex<Option<Partition>>>>,
    default_sort: Sort,
    pagination: PaginationType,
    ready: ReadyStore,
    metrics: Arc<IndexMetrics>,
    _entity: PhantomData<fn(&E)>,
}

impl<E: Indexable> PartitionedIndex<E> {
    /// Open both partitions under `config.data_dir`, or in memory when no
    /// data directory is configured
    pub fn open(
        config: &IndexConfig,
        schema: Schema,
        partitioner: impl Partitioner<E> + 'static,
        default_sort: Sort,
    ) -> Result<Self> {
        let analyzer = Arc::new(Analyzer::new(&config.analyzer));
        let open = open_engine(config, &schema, &analyzer, Some(Partition::Open.as_str()))?;
        let closed = open_engine(config, &schema, &analyzer, Some(Partition::Closed.as_str()))?;
        Self::with_engines(config, schema, partitioner, default_sort, open, closed)
    }

    /// Open over caller-supplied engines
    pub fn with_engines(
        config: &IndexConfig,
        schema: Schema,
        partitioner: impl Partitioner<E> + 'static,
        default_sort: Sort,
        open: Arc<dyn IndexEngine>,
        closed: Arc<dyn IndexEngine>,
    ) -> Result<Self> {
        let schema = Arc::new(schema);
        let analyzer = Arc::new(Analyzer::new(&config.analyzer));
        let metrics = Arc::new(IndexMetrics::new(&config.name)?);
        let sub = |partition: Partition, engine, cfg: &PartitionConfig| {
            SubIndex::open(partition, engine, cfg.clone(), metrics.clone())
        };
        let subs = [
            sub(Partition::Open, open, &config.open)?,
            sub(Partition::Closed, closed, &config.closed)?,
        ];
        info!(
            index = %config.name,
            version = schema.version(),
            "Opened partitioned index"
        );
        Ok(Self {
            name: config.name.clone(),
            compiler: QueryCompiler::new(schema.clone(), analyzer, config.max_clause_count),
            schema,
            partitioner: Arc::new(partitioner),
            subs,
            locations: DashMap::new(),
            default_sort,
            pagination: config.pagination,
            ready: ReadyStore::new(config.state_dir.clone()),
            metrics,
            _entity: PhantomData,
        })
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn metrics(&self) -> &Arc<IndexMetrics> {
        &self.metrics
    }

    pub fn sub_index(&self, partition: Partition) -> &SubIndex {
        &self.subs[partition.index()]
    }

    fn slot(&self, term: &Term) -> Arc<Mutex<Option<Partition>>> {
        self.locations.entry(term.clone()).or_default().value().clone()
    }

    /// Index `entity` in the partition it belongs to, removing it from the
    /// other one if it moved
    pub fn replace(&self, entity: &E) -> Result<WriteReceipt> {
        let doc = to_document(&self.schema, entity)?;
        let term = key_term(&self.schema, entity)?;
        let target = self.partitioner.partition_of(entity);

        let slot = self.slot(&term);
        let mut location = slot.lock();
        let transition = Transition::compute(*location, target);
        debug!(index = %self.name, ?transition, "Routing write");

        let result = match transition {
            Transition::Stay(p) => {
                let sub = self.sub_index(p);
                sub.replace(term, doc)?
                    .wait()
                    .map(|g| vec![sub.future(g)])
            }
            Transition::Move { from, to } => {
                let (old, new) = (self.sub_index(from), self.sub_index(to));
                let deleted = old.delete(term.clone());
                let inserted = new.replace(term, doc);
                match (deleted, inserted) {
                    (Ok(d), Ok(i)) => {
                        let gd = d.wait();
                        let gi = i.wait();
                        gd.and_then(|gd| gi.map(|gi| vec![old.future(gd), new.future(gi)]))
                    }
                    (Err(e), Ok(i)) => {
                        let _ = i.wait();
                        Err(e)
                    }
                    (Ok(d), Err(e)) => {
                        let _ = d.wait();
                        Err(e)
                    }
                    (Err(e), Err(_)) => Err(e),
                }
            }
        };
        *location = if result.is_ok() { Some(target) } else { None };
        result.map(WriteReceipt::new)
    }

    /// Delete the entity with key `key` from both partitions
    pub fn delete(&self, key: &FieldValue) -> Result<WriteReceipt> {
        let term = key_term_for(&self.schema, key)?;
        let result = self.delete_key(&term);
        self.release(&term);
        result
    }

    fn delete_key(&self, term: &Term) -> Result<WriteReceipt> {
        let slot = self.slot(term);
        let mut location = slot.lock();
        let tickets = self
            .subs
            .iter()
            .map(|sub| sub.delete(term.clone()))
            .collect::<Result<Vec<_>>>();
        *location = None;
        let mut futures = Vec::with_capacity(2);
        for (sub, ticket) in self.subs.iter().zip(tickets?) {
            futures.push(sub.future(ticket.wait()?));
        }
        Ok(WriteReceipt::new(futures))
    }

    /// Drop the placement slot for `term` unless a writer still holds it
    fn release(&self, term: &Term) {
        self.locations.remove_if(term, |_, slot| Arc::strong_count(slot) == 1);
    }

    /// Number of keys with a tracked placement
    pub fn tracked_keys(&self) -> usize {
        self.locations.len()
    }

    /// Remove every document from both partitions
    pub fn delete_all(&self) -> Result<WriteReceipt> {
        let mut futures = Vec::with_capacity(2);
        for sub in &self.subs {
            let generation = sub.delete_all()?.wait()?;
            futures.push(sub.future(generation));
        }
        // Slots held by in-flight writers stay, with placement unknown
        self.locations.retain(|_, slot| {
            if Arc::strong_count(slot) == 1 {
                return false;
            }
            *slot.lock() = None;
            true
        });
        info!(index = %self.name, "Deleted all documents");
        Ok(WriteReceipt::new(futures))
    }

    /// Search returning stored fields
    pub fn search_raw(
        &self,
        predicate: &Predicate,
        options: &SearchOptions,
    ) -> Result<ResultSet<FieldBundle>> {
        let started = Instant::now();
        let result = self.read(predicate, options);
        match &result {
            Ok(_) => self.metrics.record_search("raw", started.elapsed()),
            Err(_) => self.metrics.record_search_error(),
        }
        result
    }

    /// Search returning entities materialized by `loader`
    ///
    /// Only the key field is read from the index. Hits whose entity the
    /// loader cannot find are dropped from the page.
    pub fn search(
        &self,
        predicate: &Predicate,
        options: &SearchOptions,
        loader: &dyn EntityLoader<E>,
    ) -> Result<ResultSet<E>> {
        let started = Instant::now();
        let mut options = options.clone();
        options.fields = Some(source::key_projection(&self.schema));
        let result = self
            .read(predicate, &options)
            .and_then(|page| source::load_entities(&self.schema, page, loader));
        match &result {
            Ok(_) => self.metrics.record_search("entity", started.elapsed()),
            Err(_) => self.metrics.record_search_error(),
        }
        result
    }

    fn read(&self, predicate: &Predicate, options: &SearchOptions) -> Result<ResultSet<FieldBundle>> {
        let query = self.compiler.compile(predicate)?;
        let subs: Vec<&SubIndex> = self
            .partitioner
            .possible_partitions(predicate)
            .into_iter()
            .map(|p| self.sub_index(p))
            .collect();
        source::read_page(
            &subs,
            &query,
            &self.schema,
            options,
            &self.default_sort,
            self.pagination,
        )
    }

    /// Persist whether this schema version may serve queries
    pub fn mark_ready(&self, ready: bool) -> Result<()> {
        self.ready.set(&self.name, self.schema.version(), ready)
    }

    pub fn is_ready(&self) -> Result<bool> {
        self.ready.get(&self.name, self.schema.version())
    }

    /// Close the open partition, then the closed one. Idempotent.
    pub fn close(&self) {
        for sub in &self.subs {
            sub.close();
        }
        info!(index = %self.name, "Closed partitioned index");
    }
}
