//! Write generations and read-your-writes through a single partition

use chrono::Utc;
use revindex::config::{CommitPolicy, PartitionConfig, RefreshConfig};
use revindex::engine::{Document, EngineReader, IndexEngine, MemoryEngine, Sort, Term};
use revindex::index::SubIndex;
use revindex::query::NativeQuery;
use revindex::schema::{key_term, to_document};
use revindex::{Account, IndexConfig, IndexError, IndexMetrics, Partition, Result, SingleIndex};
use revindex::{FieldValue, Predicate, SearchOptions};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn partition_config() -> PartitionConfig {
    PartitionConfig::default()
        .with_commit(CommitPolicy::Lazy)
        .with_queue_capacity(8)
        .with_refresh(RefreshConfig {
            min_stale_ms: 2,
            max_stale_ms: 1000,
            max_consecutive_failures: 3,
        })
}

fn account(id: i32) -> Account {
    Account {
        id,
        username: format!("user{}", id),
        full_name: Some(format!("User Number {}", id)),
        emails: vec![format!("user{}@example.com", id)],
        registered: Utc::now(),
        active: true,
    }
}

fn sub_index(engine: Arc<dyn IndexEngine>) -> SubIndex {
    SubIndex::open(
        Partition::Open,
        engine,
        partition_config(),
        Arc::new(IndexMetrics::new("generation-test").unwrap()),
    )
    .unwrap()
}

fn memory() -> Arc<MemoryEngine> {
    Arc::new(MemoryEngine::in_memory(
        "accounts",
        Arc::new(revindex::analysis::Analyzer::default()),
    ))
}

#[test]
fn test_generations_strictly_increase_under_concurrency() {
    let sub = Arc::new(sub_index(memory()));
    let schema = Arc::new(Account::schema().unwrap());

    let writers: Vec<_> = (0..4)
        .map(|t| {
            let sub = sub.clone();
            let schema = schema.clone();
            thread::spawn(move || {
                let mut gens = Vec::new();
                for i in 0..50 {
                    let a = account(t * 1000 + i);
                    let term = key_term(&schema, &a).unwrap();
                    let doc = to_document(&schema, &a).unwrap();
                    gens.push(sub.replace(term, doc).unwrap().wait().unwrap());
                }
                gens
            })
        })
        .collect();

    let mut all = Vec::new();
    for w in writers {
        let gens = w.join().unwrap();
        // Each submitter sees its own writes in order
        assert!(gens.windows(2).all(|p| p[0] < p[1]));
        all.extend(gens);
    }
    all.sort_unstable();
    assert_eq!(all, (1..=200).collect::<Vec<u64>>());
    assert_eq!(sub.applied_generation(), 200);
    sub.close();
}

#[test]
fn test_wait_implies_visible() {
    let sub = sub_index(memory());
    let schema = Account::schema().unwrap();
    for id in 1..=20 {
        let a = account(id);
        let g = sub
            .replace(key_term(&schema, &a).unwrap(), to_document(&schema, &a).unwrap())
            .unwrap()
            .wait()
            .unwrap();
        assert!(sub.future(g).wait_for(Duration::from_secs(5)).unwrap());
        assert!(sub.searching_generation() >= g);

        let guard = sub.acquire().unwrap();
        let hits = guard
            .reader()
            .search(
                &NativeQuery::Term {
                    field: "id".into(),
                    value: revindex::schema::mapper::encode_int(id).to_vec(),
                },
                1,
                &Sort::default(),
                None,
            )
            .unwrap();
        assert_eq!(hits.total_hits, 1, "account {} not visible at {}", id, g);
    }
    sub.close();
}

#[test]
fn test_timeout_and_cancel() {
    let sub = sub_index(memory());
    let future = sub.future(1_000);
    assert!(!future.wait_for(Duration::from_millis(20)).unwrap());
    future.cancel();
    assert!(!future.wait_for(Duration::from_secs(1)).unwrap());
    sub.close();
}

/// Engine whose readers stop opening once poisoned
struct PoisonedReaders {
    inner: MemoryEngine,
    poisoned: AtomicBool,
}

impl IndexEngine for PoisonedReaders {
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
        if self.poisoned.load(Ordering::Acquire) {
            return Err(IndexError::Engine("segment checksum mismatch".into()));
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

#[test]
fn test_dead_refresh_fails_futures() {
    let engine = Arc::new(PoisonedReaders {
        inner: MemoryEngine::in_memory("poisoned", Arc::new(Default::default())),
        poisoned: AtomicBool::new(false),
    });
    let sub = sub_index(engine.clone());
    engine.poisoned.store(true, Ordering::Release);

    let g = sub.insert(Document::new()).unwrap().wait().unwrap();
    let err = sub.future(g).wait_for(Duration::from_secs(10)).unwrap_err();
    assert!(matches!(err, IndexError::IndexUnavailable { .. }));
    // New futures and searches fail too
    assert!(sub.future(g).wait_for(Duration::from_millis(10)).is_err());
    assert!(sub.acquire().is_err());
    sub.close();
}

#[test]
fn test_single_index_round_trip() {
    let config = IndexConfig::new("accounts").with_partition_config(partition_config());
    let index: SingleIndex<Account> =
        SingleIndex::open(&config, Account::schema().unwrap(), Account::default_sort()).unwrap();
    for id in 1..=5 {
        assert!(index
            .replace(&account(id))
            .unwrap()
            .wait_visible(Duration::from_secs(5))
            .unwrap());
    }
    let page = index
        .search_raw(
            &Predicate::prefix("username", "user"),
            &SearchOptions::default().with_limit(3),
        )
        .unwrap();
    let ids: Vec<i32> = page.hits.iter().filter_map(|b| b.get_int("id")).collect();
    assert_eq!(ids, vec![5, 4, 3]);
    assert_eq!(page.total_hits, 5);

    index
        .delete(&FieldValue::Int(4))
        .unwrap()
        .wait_visible(Duration::from_secs(5))
        .unwrap();
    let known: HashSet<i32> = [1, 2, 3].into_iter().collect();
    let loader = |key: &FieldValue| -> Result<Option<Account>> {
        Ok(key.as_int().filter(|id| known.contains(id)).map(account))
    };
    let found = index
        .search(&Predicate::contains("name", "number"), &SearchOptions::default(), &loader)
        .unwrap();
    let ids: Vec<i32> = found.hits.iter().map(|a| a.id).collect();
    assert_eq!(ids, vec![3, 2, 1]);
    assert_eq!(found.total_hits, 4);
    index.close();
}
