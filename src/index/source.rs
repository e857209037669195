//! Merged, paginated reads over one or more partitions
//!
//! Every partition is searched with the same query and sort while a
//! snapshot of each is held, then hits are k-way merged by sort key,
//! partition order and document number.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;

use super::searcher::SearcherGuard;
use super::sub_index::SubIndex;
use crate::config::PaginationType;
use crate::engine::{ScoreDoc, Sort, TopDocs};
use crate::error::{IndexError, Result};
use crate::models::{FieldBundle, FieldValue, Partition};
use crate::query::NativeQuery;
use crate::schema::{from_stored_fields, Schema};

const CURSOR_FORMAT: u8 = 1;

pub const DEFAULT_LIMIT: usize = 25;

/// Paging, projection and ordering of one search
#[derive(Clone, Debug)]
pub struct SearchOptions {
    pub limit: usize,
    /// Hits to skip; ignored when a cursor is given
    pub start: usize,
    /// Opaque cursor from a previous page
    pub cursor: Option<Bytes>,
    /// Stored fields to load; all when None
    pub fields: Option<HashSet<String>>,
    /// Ordering; the index default when None
    pub sort: Option<Sort>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            start: 0,
            cursor: None,
            fields: None,
            sort: None,
        }
    }
}

impl SearchOptions {
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_start(mut self, start: usize) -> Self {
        self.start = start;
        self
    }

    pub fn with_cursor(mut self, cursor: Bytes) -> Self {
        self.cursor = Some(cursor);
        self
    }

    pub fn with_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_sort(mut self, sort: Sort) -> Self {
        self.sort = Some(sort);
        self
    }
}

/// One page of results
#[derive(Clone, Debug)]
pub struct ResultSet<T> {
    pub hits: Vec<T>,
    /// Resumes after the last hit of this page; None on the last page
    pub next_cursor: Option<Bytes>,
    /// Matches across all searched partitions, ignoring paging
    pub total_hits: usize,
}

impl<T> ResultSet<T> {
    pub fn empty() -> Self {
        Self {
            hits: Vec::new(),
            next_cursor: None,
            total_hits: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}

/// Materializes full entities from their key
pub trait EntityLoader<E> {
    /// None when the entity no longer exists
    fn load(&self, key: &FieldValue) -> Result<Option<E>>;
}

impl<E, F> EntityLoader<E> for F
where
    F: Fn(&FieldValue) -> Result<Option<E>>,
{
    fn load(&self, key: &FieldValue) -> Result<Option<E>> {
        self(key)
    }
}

/// Per-partition resume positions
#[derive(Debug, Serialize, Deserialize)]
struct Cursor {
    format: u8,
    positions: Vec<(Partition, Option<ScoreDoc>)>,
}

impl Cursor {
    fn decode(bytes: &[u8], sort: &Sort) -> Result<Self> {
        let cursor: Cursor = bincode::deserialize(bytes)
            .map_err(|e| IndexError::InvalidCursor(e.to_string()))?;
        if cursor.format != CURSOR_FORMAT {
            return Err(IndexError::InvalidCursor(format!(
                "unsupported cursor format {}",
                cursor.format
            )));
        }
        for (_, position) in &cursor.positions {
            if let Some(pos) = position {
                if pos.sort_key.0.len() != sort.fields.len() {
                    return Err(IndexError::InvalidCursor(
                        "cursor was issued for a different sort".into(),
                    ));
                }
            }
        }
        Ok(cursor)
    }

    fn position(&self, partition: Partition) -> Option<&ScoreDoc> {
        self.positions
            .iter()
            .find(|(p, _)| *p == partition)
            .and_then(|(_, pos)| pos.as_ref())
    }

    fn encode(&self) -> Result<Bytes> {
        Ok(Bytes::from(bincode::serialize(self)?))
    }
}

struct Run {
    partition: Partition,
    guard: SearcherGuard,
    top: TopDocs,
    next: usize,
    last: Option<ScoreDoc>,
}

impl Run {
    fn head(&self) -> Option<&ScoreDoc> {
        self.top.hits.get(self.next)
    }
}

fn compare_heads(sort: &Sort, a: &Run, b: &Run) -> Ordering {
    match (a.head(), b.head()) {
        (Some(x), Some(y)) => sort
            .compare(&x.sort_key, &y.sort_key)
            .then_with(|| a.partition.cmp(&b.partition))
            .then_with(|| x.doc.cmp(&y.doc)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Reject sort fields the schema does not declare or cannot order by
fn check_sort(schema: &Schema, sort: &Sort) -> Result<()> {
    for field in &sort.fields {
        let def = schema.require(&field.field)?;
        if !def.field_type.is_sortable() {
            return Err(IndexError::mismatch(
                def.name.clone(),
                format!("{} fields cannot be sorted on", def.field_type.name()),
            ));
        }
    }
    Ok(())
}

/// Read one page of stored-field bundles from `subs`
pub(crate) fn read_page(
    subs: &[&SubIndex],
    query: &NativeQuery,
    schema: &Schema,
    options: &SearchOptions,
    default_sort: &Sort,
    pagination: PaginationType,
) -> Result<ResultSet<FieldBundle>> {
    let sort = options.sort.as_ref().unwrap_or(default_sort);
    check_sort(schema, sort)?;
    let cursor = match &options.cursor {
        Some(bytes) => Some(Cursor::decode(bytes, sort)?),
        None => None,
    };
    let skip = if cursor.is_some() { 0 } else { options.start };
    if options.limit == 0 || subs.is_empty() {
        return Ok(ResultSet::empty());
    }
    let fetch = skip.saturating_add(options.limit);

    let mut runs = Vec::with_capacity(subs.len());
    for sub in subs {
        let partition = sub.partition();
        let guard = sub.acquire()?;
        let after = cursor.as_ref().and_then(|c| c.position(partition)).cloned();
        let top = guard.reader().search(query, fetch, sort, after.as_ref())?;
        runs.push(Run {
            partition,
            guard,
            top,
            next: 0,
            last: after,
        });
    }
    let total_hits = runs.iter().map(|r| r.top.total_hits).sum();
    let fetched: usize = runs.iter().map(|r| r.top.hits.len()).sum();

    let mut taken: Vec<(usize, u32)> = Vec::with_capacity(fetched.min(options.limit));
    let mut consumed = 0usize;
    while taken.len() < options.limit {
        let Some(best) = (0..runs.len())
            .filter(|&i| runs[i].head().is_some())
            .min_by(|&a, &b| compare_heads(sort, &runs[a], &runs[b]))
        else {
            break;
        };
        let run = &mut runs[best];
        let hit = run.top.hits[run.next].clone();
        run.next += 1;
        if consumed >= skip {
            taken.push((best, hit.doc));
        }
        run.last = Some(hit);
        consumed += 1;
    }

    let mut hits = Vec::with_capacity(taken.len());
    for (run, doc) in &taken {
        let stored = runs[*run]
            .guard
            .reader()
            .stored_fields(*doc, options.fields.as_ref())?;
        hits.push(from_stored_fields(schema, &stored)?);
    }

    let paged = pagination == PaginationType::SearchAfter || cursor.is_some();
    let next_cursor = if paged && hits.len() == options.limit {
        let positions = runs
            .iter()
            .map(|r| (r.partition, r.last.clone()))
            .collect();
        Some(
            Cursor {
                format: CURSOR_FORMAT,
                positions,
            }
            .encode()?,
        )
    } else {
        None
    };

    Ok(ResultSet {
        hits,
        next_cursor,
        total_hits,
    })
}

/// Resolve a page of key-only bundles into entities, dropping keys the
/// loader no longer knows
pub(crate) fn load_entities<E>(
    schema: &Schema,
    page: ResultSet<FieldBundle>,
    loader: &dyn EntityLoader<E>,
) -> Result<ResultSet<E>> {
    let key = &schema.key_field().name;
    let mut hits = Vec::with_capacity(page.hits.len());
    for bundle in &page.hits {
        let Some(value) = bundle.first(key) else {
            continue;
        };
        if let Some(entity) = loader.load(value)? {
            hits.push(entity);
        }
    }
    Ok(ResultSet {
        hits,
        next_cursor: page.next_cursor,
        total_hits: page.total_hits,
    })
}

/// Projection containing only the key field
pub(crate) fn key_projection(schema: &Schema) -> HashSet<String> {
    std::iter::once(schema.key_field().name.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::Analyzer;
    use crate::config::{CommitPolicy, PartitionConfig};
    use crate::engine::{MemoryEngine, SortField};
    use crate::metrics::IndexMetrics;
    use crate::schema::{key_term, to_document, FieldDef, Indexable};
    use std::sync::Arc;
    use std::time::Duration;

    struct Item {
        id: i32,
        rank: i64,
    }

    impl Indexable for Item {
        fn field_values(&self, field: &str) -> Vec<FieldValue> {
            match field {
                "id" => vec![FieldValue::Int(self.id)],
                "rank" => vec![FieldValue::Long(self.rank)],
                _ => Vec::new(),
            }
        }
    }

    fn schema() -> Schema {
        Schema::builder("items", 1)
            .field(FieldDef::integer("id").stored())
            .field(FieldDef::long("rank").stored())
            .key("id")
            .build()
            .unwrap()
    }

    fn sub(partition: Partition, schema: &Schema, items: &[Item]) -> SubIndex {
        let engine = Arc::new(MemoryEngine::in_memory("s", Arc::new(Analyzer::default())));
        let sub = SubIndex::open(
            partition,
            engine,
            PartitionConfig::default().with_commit(CommitPolicy::Lazy),
            Arc::new(IndexMetrics::new("test").unwrap()),
        )
        .unwrap();
        let mut last = 0;
        for item in items {
            let term = key_term(schema, item).unwrap();
            let doc = to_document(schema, item).unwrap();
            last = sub.replace(term, doc).unwrap().wait().unwrap();
        }
        assert!(sub.future(last).wait_for(Duration::from_secs(5)).unwrap());
        sub
    }

    fn ids(page: &ResultSet<FieldBundle>) -> Vec<i32> {
        page.hits.iter().filter_map(|b| b.get_int("id")).collect()
    }

    fn fixture() -> (Schema, SubIndex, SubIndex) {
        let schema = schema();
        let open = sub(
            Partition::Open,
            &schema,
            &[Item { id: 1, rank: 50 }, Item { id: 2, rank: 30 }, Item { id: 3, rank: 10 }],
        );
        let closed = sub(
            Partition::Closed,
            &schema,
            &[Item { id: 4, rank: 40 }, Item { id: 5, rank: 30 }, Item { id: 6, rank: 5 }],
        );
        (schema, open, closed)
    }

    fn by_rank() -> Sort {
        Sort::new(vec![SortField::desc("rank")])
    }

    #[test]
    fn test_merge_orders_across_partitions() {
        let (schema, open, closed) = fixture();
        let page = read_page(
            &[&open, &closed],
            &NativeQuery::MatchAll,
            &schema,
            &SearchOptions::default(),
            &by_rank(),
            PaginationType::Offset,
        )
        .unwrap();
        // Equal ranks: open partition first
        assert_eq!(ids(&page), vec![1, 4, 2, 5, 3, 6]);
        assert_eq!(page.total_hits, 6);
        assert!(page.next_cursor.is_none());
    }

    #[test]
    fn test_offset_paging() {
        let (schema, open, closed) = fixture();
        let options = SearchOptions::default().with_start(2).with_limit(3);
        let page = read_page(
            &[&open, &closed],
            &NativeQuery::MatchAll,
            &schema,
            &options,
            &by_rank(),
            PaginationType::Offset,
        )
        .unwrap();
        assert_eq!(ids(&page), vec![2, 5, 3]);
    }

    #[test]
    fn test_cursor_pages_concatenate() {
        let (schema, open, closed) = fixture();
        let subs = [&open, &closed];
        let mut options = SearchOptions::default().with_limit(2);
        let mut all = Vec::new();
        loop {
            let page = read_page(
                &subs,
                &NativeQuery::MatchAll,
                &schema,
                &options,
                &by_rank(),
                PaginationType::SearchAfter,
            )
            .unwrap();
            all.extend(ids(&page));
            match page.next_cursor {
                Some(cursor) => options = options.with_cursor(cursor),
                None => break,
            }
        }
        assert_eq!(all, vec![1, 4, 2, 5, 3, 6]);
    }

    #[test]
    fn test_projection() {
        let (schema, open, closed) = fixture();
        let options = SearchOptions::default().with_fields(["id"]).with_limit(1);
        let page = read_page(
            &[&open, &closed],
            &NativeQuery::MatchAll,
            &schema,
            &options,
            &by_rank(),
            PaginationType::Offset,
        )
        .unwrap();
        assert_eq!(page.hits[0].get_int("id"), Some(1));
        assert!(!page.hits[0].contains("rank"));
    }

    #[test]
    fn test_unbounded_limit() {
        let (schema, open, closed) = fixture();
        let page = read_page(
            &[&open, &closed],
            &NativeQuery::MatchAll,
            &schema,
            &SearchOptions::default().with_limit(usize::MAX),
            &by_rank(),
            PaginationType::SearchAfter,
        )
        .unwrap();
        assert_eq!(ids(&page), vec![1, 4, 2, 5, 3, 6]);
        assert!(page.next_cursor.is_none());
    }

    #[test]
    fn test_unknown_sort_field() {
        let (schema, open, _closed) = fixture();
        let options = SearchOptions::default()
            .with_sort(Sort::new(vec![SortField::desc("no_such_field")]));
        let err = read_page(
            &[&open],
            &NativeQuery::MatchAll,
            &schema,
            &options,
            &by_rank(),
            PaginationType::Offset,
        )
        .unwrap_err();
        assert!(matches!(err, IndexError::UnknownField(ref f) if f == "no_such_field"));
    }

    #[test]
    fn test_invalid_cursor() {
        let (schema, open, _closed) = fixture();
        let options = SearchOptions::default().with_cursor(Bytes::from_static(b"garbage"));
        let err = read_page(
            &[&open],
            &NativeQuery::MatchAll,
            &schema,
            &options,
            &by_rank(),
            PaginationType::SearchAfter,
        )
        .unwrap_err();
        assert!(matches!(err, IndexError::InvalidCursor(_)));

        // A cursor issued under a different sort is rejected
        let first = read_page(
            &[&open],
            &NativeQuery::MatchAll,
            &schema,
            &SearchOptions::default().with_limit(1),
            &by_rank(),
            PaginationType::SearchAfter,
        )
        .unwrap();
        let options = SearchOptions::default()
            .with_cursor(first.next_cursor.unwrap())
            .with_sort(Sort::new(vec![SortField::desc("rank"), SortField::asc("id")]));
        assert!(matches!(
            read_page(
                &[&open],
                &NativeQuery::MatchAll,
                &schema,
                &options,
                &by_rank(),
                PaginationType::SearchAfter,
            ),
            Err(IndexError::InvalidCursor(_))
        ));
    }

    #[test]
    fn test_loader_drops_missing() {
        let (schema, open, closed) = fixture();
        let options = SearchOptions::default().with_fields(key_projection(&schema));
        let page = read_page(
            &[&open, &closed],
            &NativeQuery::MatchAll,
            &schema,
            &options,
            &by_rank(),
            PaginationType::Offset,
        )
        .unwrap();
        let loader = |key: &FieldValue| -> Result<Option<i32>> {
            Ok(key.as_int().filter(|id| id % 2 == 0))
        };
        let loaded = load_entities(&schema, page, &loader).unwrap();
        assert_eq!(loaded.hits, vec![4, 2, 6]);
        assert_eq!(loaded.total_hits, 6);
    }
}
