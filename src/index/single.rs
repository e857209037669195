//! Single-partition entity index
//!
//! Entities without an open/closed lifecycle (accounts, groups, projects)
//! live in one physical partition, reported as `open`.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

use super::partitioned::{open_engine, WriteReceipt};
use super::ready::ReadyStore;
use super::source::{self, EntityLoader, ResultSet, SearchOptions};
use super::sub_index::SubIndex;
use crate::analysis::Analyzer;
use crate::config::{IndexConfig, PaginationType};
use crate::engine::{IndexEngine, Sort};
use crate::error::Result;
use crate::metrics::IndexMetrics;
use crate::models::{FieldBundle, FieldValue, Partition};
use crate::query::{Predicate, QueryCompiler};
use crate::schema::{key_term, key_term_for, to_document, Indexable, Schema};

pub struct SingleIndex<E> {
    name: String,
    schema: Arc<Schema>,
    compiler: QueryCompiler,
    sub: SubIndex,
    default_sort: Sort,
    pagination: PaginationType,
    ready: ReadyStore,
    metrics: Arc<IndexMetrics>,
    _entity: PhantomData<fn(&E)>,
}

impl<E: Indexable> SingleIndex<E> {
    pub fn open(config: &IndexConfig, schema: Schema, default_sort: Sort) -> Result<Self> {
        let analyzer = Arc::new(Analyzer::new(&config.analyzer));
        let engine = open_engine(config, &schema, &analyzer, None)?;
        Self::with_engine(config, schema, default_sort, engine)
    }

    pub fn with_engine(
        config: &IndexConfig,
        schema: Schema,
        default_sort: Sort,
        engine: Arc<dyn IndexEngine>,
    ) -> Result<Self> {
        let schema = Arc::new(schema);
        let analyzer = Arc::new(Analyzer::new(&config.analyzer));
        let metrics = Arc::new(IndexMetrics::new(&config.name)?);
        let sub = SubIndex::open(Partition::Open, engine, config.open.clone(), metrics.clone())?;
        info!(index = %config.name, version = schema.version(), "Opened index");
        Ok(Self {
            name: config.name.clone(),
            compiler: QueryCompiler::new(schema.clone(), analyzer, config.max_clause_count),
            schema,
            sub,
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

    pub fn sub_index(&self) -> &SubIndex {
        &self.sub
    }

    pub fn replace(&self, entity: &E) -> Result<WriteReceipt> {
        let doc = to_document(&self.schema, entity)?;
        let term = key_term(&self.schema, entity)?;
        let generation = self.sub.replace(term, doc)?.wait()?;
        Ok(WriteReceipt::new(vec![self.sub.future(generation)]))
    }

    pub fn delete(&self, key: &FieldValue) -> Result<WriteReceipt> {
        let term = key_term_for(&self.schema, key)?;
        let generation = self.sub.delete(term)?.wait()?;
        Ok(WriteReceipt::new(vec![self.sub.future(generation)]))
    }

    pub fn delete_all(&self) -> Result<WriteReceipt> {
        let generation = self.sub.delete_all()?.wait()?;
        Ok(WriteReceipt::new(vec![self.sub.future(generation)]))
    }

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
        source::read_page(
            &[&self.sub],
            &query,
            &self.schema,
            options,
            &self.default_sort,
            self.pagination,
        )
    }

    pub fn mark_ready(&self, ready: bool) -> Result<()> {
        self.ready.set(&self.name, self.schema.version(), ready)
    }

    pub fn is_ready(&self) -> Result<bool> {
        self.ready.get(&self.name, self.schema.version())
    }

    pub fn close(&self) {
        self.sub.close();
        info!(index = %self.name, "Closed index");
    }
}
