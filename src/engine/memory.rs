//! In-memory reference engine
//!
//! Documents live in a copy-on-write map keyed by stable document numbers;
//! a reader is a cheap clone of that map. Queries are evaluated by scanning
//! into roaring bitmaps. With a directory, `commit()` persists the table:
//! 1. Write commit.bin.tmp → fsync
//! 2. Atomic rename to commit.bin → fsync directory

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{
    DocField, Document, EngineReader, FieldKind, IndexEngine, ScoreDoc, Sort, SortKey, Term,
    TopDocs,
};
use crate::analysis::Analyzer;
use crate::error::{IndexError, Result};
use crate::query::compiler::anchored;
use crate::query::{BooleanQuery, NativeQuery};
use crate::schema::mapper::decode_point;

const COMMIT_FILE: &str = "commit.bin";
const COMMIT_TMP: &str = "commit.bin.tmp";
const FORMAT_VERSION: u32 = 1;

type DocTable = Arc<BTreeMap<u32, Arc<IndexedDoc>>>;

struct IndexedDoc {
    doc: Document,
    /// Analyzed tokens per full-text field
    tokens: HashMap<String, HashSet<String>>,
}

impl IndexedDoc {
    fn new(doc: Document, analyzer: &Analyzer) -> Self {
        let mut tokens: HashMap<String, HashSet<String>> = HashMap::new();
        for field in doc.fields().iter().filter(|f| f.kind == FieldKind::Text) {
            let text = String::from_utf8_lossy(&field.value);
            tokens
                .entry(field.name.clone())
                .or_default()
                .extend(analyzer.unique_terms(&text));
        }
        Self { doc, tokens }
    }

    fn matches_term(&self, term: &Term) -> bool {
        self.doc
            .get(&term.field)
            .any(|f| is_term_like(f) && f.value == term.value)
    }

    fn sort_key(&self, sort: &Sort) -> SortKey {
        SortKey(
            sort.fields
                .iter()
                .map(|sf| {
                    self.doc
                        .get(&sf.field)
                        .find(|f| f.kind == FieldKind::Point)
                        .and_then(|f| decode_point(&f.value))
                        .unwrap_or(i64::MIN)
                })
                .collect(),
        )
    }
}

fn is_term_like(field: &DocField) -> bool {
    matches!(field.kind, FieldKind::Term | FieldKind::Point)
}

#[derive(Serialize, Deserialize)]
struct CommitFile {
    format: u32,
    version: u64,
    next_doc: u32,
    docs: Vec<(u32, Document)>,
}

struct EngineState {
    docs: DocTable,
    next_doc: u32,
    version: u64,
    committed_version: u64,
    closed: bool,
}

/// Reference [`IndexEngine`] keeping every document in memory
pub struct MemoryEngine {
    name: String,
    dir: Option<PathBuf>,
    analyzer: Arc<Analyzer>,
    state: Mutex<EngineState>,
}

impl MemoryEngine {
    /// Create a non-durable engine
    pub fn in_memory(name: impl Into<String>, analyzer: Arc<Analyzer>) -> Self {
        Self {
            name: name.into(),
            dir: None,
            analyzer,
            state: Mutex::new(EngineState {
                docs: Arc::new(BTreeMap::new()),
                next_doc: 0,
                version: 0,
                committed_version: 0,
                closed: false,
            }),
        }
    }

    /// Open an engine persisting to `dir`, loading the last commit if any
    pub fn open(name: impl Into<String>, dir: &Path, analyzer: Arc<Analyzer>) -> Result<Self> {
        let name = name.into();
        fs::create_dir_all(dir)?;
        let mut engine = Self::in_memory(name, analyzer);
        engine.dir = Some(dir.to_path_buf());

        let path = dir.join(COMMIT_FILE);
        if path.exists() {
            let data = fs::read(&path)?;
            let commit: CommitFile = bincode::deserialize(&data)?;
            if commit.format != FORMAT_VERSION {
                return Err(IndexError::Engine(format!(
                    "unsupported commit format {} in {}",
                    commit.format,
                    path.display()
                )));
            }
            let docs: BTreeMap<u32, Arc<IndexedDoc>> = commit
                .docs
                .into_iter()
                .map(|(docno, doc)| (docno, Arc::new(IndexedDoc::new(doc, &engine.analyzer))))
                .collect();
            info!(
                engine = %engine.name,
                docs = docs.len(),
                version = commit.version,
                "Loaded committed index"
            );
            let state = engine.state.get_mut();
            state.docs = Arc::new(docs);
            state.next_doc = commit.next_doc;
            state.version = commit.version;
            state.committed_version = commit.version;
        }
        Ok(engine)
    }

    fn mutate<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut BTreeMap<u32, Arc<IndexedDoc>>, &mut u32),
    {
        let mut state = self.state.lock();
        if state.closed {
            return Err(IndexError::Engine(format!("engine {} is closed", self.name)));
        }
        let EngineState {
            docs, next_doc, ..
        } = &mut *state;
        f(Arc::make_mut(docs), next_doc);
        state.version += 1;
        Ok(())
    }

    fn insert(
        docs: &mut BTreeMap<u32, Arc<IndexedDoc>>,
        next_doc: &mut u32,
        doc: IndexedDoc,
    ) {
        docs.insert(*next_doc, Arc::new(doc));
        *next_doc += 1;
    }

    fn remove_matching(docs: &mut BTreeMap<u32, Arc<IndexedDoc>>, term: &Term) {
        docs.retain(|_, d| !d.matches_term(term));
    }

    fn write_commit(&self, dir: &Path, commit: &CommitFile) -> Result<()> {
        let tmp = dir.join(COMMIT_TMP);
        let data = bincode::serialize(commit)?;
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&data)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, dir.join(COMMIT_FILE))?;
        File::open(dir)?.sync_all()?;
        Ok(())
    }
}

impl IndexEngine for MemoryEngine {
    fn add_document(&self, doc: Document) -> Result<()> {
        let indexed = IndexedDoc::new(doc, &self.analyzer);
        self.mutate(|docs, next| Self::insert(docs, next, indexed))
    }

    fn update_document(&self, term: &Term, doc: Document) -> Result<()> {
        let indexed = IndexedDoc::new(doc, &self.analyzer);
        self.mutate(|docs, next| {
            Self::remove_matching(docs, term);
            Self::insert(docs, next, indexed);
        })
    }

    fn delete_documents(&self, term: &Term) -> Result<()> {
        self.mutate(|docs, _| Self::remove_matching(docs, term))
    }

    fn delete_all(&self) -> Result<()> {
        self.mutate(|docs, _| docs.clear())
    }

    fn commit(&self) -> Result<()> {
        let (docs, next_doc, version) = {
            let state = self.state.lock();
            if state.closed {
                return Err(IndexError::Engine(format!("engine {} is closed", self.name)));
            }
            (state.docs.clone(), state.next_doc, state.version)
        };

        if let Some(dir) = &self.dir {
            let commit = CommitFile {
                format: FORMAT_VERSION,
                version,
                next_doc,
                docs: docs.iter().map(|(n, d)| (*n, d.doc.clone())).collect(),
            };
            self.write_commit(dir, &commit)?;
        }

        let mut state = self.state.lock();
        state.committed_version = state.committed_version.max(version);
        debug!(engine = %self.name, version, "Committed");
        Ok(())
    }

    fn has_uncommitted_changes(&self) -> bool {
        let state = self.state.lock();
        state.version != state.committed_version
    }

    fn open_reader(&self) -> Result<Arc<dyn EngineReader>> {
        let state = self.state.lock();
        if state.closed {
            return Err(IndexError::Engine(format!("engine {} is closed", self.name)));
        }
        Ok(Arc::new(MemoryReader {
            version: state.version,
            docs: state.docs.clone(),
            closed: AtomicBool::new(false),
        }))
    }

    fn is_current(&self, version: u64) -> Result<bool> {
        Ok(self.state.lock().version == version)
    }

    fn close(&self) -> Result<()> {
        self.state.lock().closed = true;
        Ok(())
    }
}

/// Point-in-time view of a [`MemoryEngine`]
struct MemoryReader {
    version: u64,
    docs: DocTable,
    closed: AtomicBool,
}

impl MemoryReader {
    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(IndexError::Engine(format!(
                "reader at version {} is closed",
                self.version
            )));
        }
        Ok(())
    }

    fn all(&self) -> RoaringBitmap {
        self.docs.keys().copied().collect()
    }

    fn filter<F>(&self, pred: F) -> RoaringBitmap
    where
        F: Fn(&IndexedDoc) -> bool,
    {
        self.docs
            .iter()
            .filter(|(_, d)| pred(d))
            .map(|(n, _)| *n)
            .collect()
    }

    fn points<'a>(d: &'a IndexedDoc, field: &'a str) -> impl Iterator<Item = &'a [u8]> + 'a {
        d.doc
            .get(field)
            .filter(|f| f.kind == FieldKind::Point)
            .map(|f| f.value.as_slice())
    }

    fn evaluate(&self, query: &NativeQuery) -> Result<RoaringBitmap> {
        let bitmap = match query {
            NativeQuery::MatchAll => self.all(),
            NativeQuery::MatchNone => RoaringBitmap::new(),
            NativeQuery::Term { field, value } => self.filter(|d| {
                d.doc
                    .get(field)
                    .any(|f| is_term_like(f) && &f.value == value)
            }),
            NativeQuery::Prefix { field, prefix } => self.filter(|d| {
                d.doc
                    .get(field)
                    .any(|f| f.kind == FieldKind::Term && f.value.starts_with(prefix.as_bytes()))
            }),
            NativeQuery::Regex { field, pattern } => {
                let re = regex::Regex::new(&anchored(pattern))
                    .map_err(|e| IndexError::Engine(format!("bad regex '{}': {}", pattern, e)))?;
                self.filter(|d| {
                    d.doc.get(field).any(|f| {
                        f.kind == FieldKind::Term
                            && std::str::from_utf8(&f.value).map_or(false, |s| re.is_match(s))
                    })
                })
            }
            NativeQuery::Text { field, terms } => self.filter(|d| {
                d.tokens
                    .get(field)
                    .map_or(false, |set| terms.iter().all(|t| set.contains(t)))
            }),
            NativeQuery::Range {
                field,
                lower,
                upper,
            } => self.filter(|d| {
                Self::points(d, field).any(|v| v >= lower.as_slice() && v <= upper.as_slice())
            }),
            NativeQuery::RangeOutside {
                field,
                lower,
                upper,
            } => self.filter(|d| {
                Self::points(d, field).any(|v| v < lower.as_slice() || v > upper.as_slice())
            }),
            NativeQuery::Bool(b) => self.evaluate_bool(b)?,
        };
        Ok(bitmap)
    }

    fn evaluate_bool(&self, b: &BooleanQuery) -> Result<RoaringBitmap> {
        let mut result = if !b.must.is_empty() {
            let mut acc: Option<RoaringBitmap> = None;
            for q in &b.must {
                let bits = self.evaluate(q)?;
                acc = Some(match acc {
                    Some(a) => a & bits,
                    None => bits,
                });
            }
            acc.unwrap_or_default()
        } else {
            let mut acc = RoaringBitmap::new();
            for q in &b.should {
                acc |= self.evaluate(q)?;
            }
            acc
        };
        for q in &b.must_not {
            result -= self.evaluate(q)?;
        }
        Ok(result)
    }
}

impl EngineReader for MemoryReader {
    fn version(&self) -> u64 {
        self.version
    }

    fn search(
        &self,
        query: &NativeQuery,
        limit: usize,
        sort: &Sort,
        after: Option<&ScoreDoc>,
    ) -> Result<TopDocs> {
        self.ensure_open()?;
        let matched = self.evaluate(query)?;

        let mut hits: Vec<ScoreDoc> = matched
            .iter()
            .filter_map(|docno| {
                let d = self.docs.get(&docno)?;
                Some(ScoreDoc {
                    doc: docno,
                    sort_key: d.sort_key(sort),
                })
            })
            .filter(|hit| {
                after.map_or(true, |a| sort.compare_hits(hit, a) == std::cmp::Ordering::Greater)
            })
            .collect();
        hits.sort_by(|a, b| sort.compare_hits(a, b));
        hits.truncate(limit);

        Ok(TopDocs {
            total_hits: matched.len() as usize,
            hits,
        })
    }

    fn stored_fields(&self, doc: u32, fields: Option<&HashSet<String>>) -> Result<Document> {
        self.ensure_open()?;
        let d = self
            .docs
            .get(&doc)
            .ok_or_else(|| IndexError::Engine(format!("no document {}", doc)))?;
        let mut out = Document::new();
        for field in d.doc.fields() {
            if field.stored && fields.map_or(true, |names| names.contains(&field.name)) {
                out.add(field.clone());
            }
        }
        Ok(out)
    }

    fn num_docs(&self) -> usize {
        self.docs.len()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}
