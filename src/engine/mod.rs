//! Index engine contract
//!
//! The integration layer talks to the embedded engine only through
//! [`IndexEngine`] (mutations, commit, opening snapshots) and
//! [`EngineReader`] (one immutable snapshot). [`MemoryEngine`] is the
//! reference implementation.

mod memory;

pub use memory::MemoryEngine;

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

use crate::error::Result;
use crate::query::NativeQuery;

/// How a document field is indexed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldKind {
    /// Whole value is one term
    Term,
    /// Value is analyzed into tokens
    Text,
    /// Sortable numeric encoding, usable for ranges and sorting
    Point,
    /// Never indexed
    Stored,
}

/// One (name, encoded value) entry of a document
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocField {
    pub name: String,
    pub kind: FieldKind,
    pub value: Vec<u8>,
    pub stored: bool,
}

/// Engine-native document: a multiset of encoded fields
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    fields: Vec<DocField>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: DocField) {
        self.fields.push(field);
    }

    pub fn fields(&self) -> &[DocField] {
        &self.fields
    }

    /// Entries with the given name, in insertion order
    pub fn get<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a DocField> + 'a {
        self.fields.iter().filter(move |f| f.name == name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// A field/value pair naming the documents to replace or delete
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Term {
    pub field: String,
    pub value: Vec<u8>,
}

impl Term {
    pub fn new(field: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }
}

/// One sort criterion over a point field
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortField {
    pub field: String,
    pub descending: bool,
}

impl SortField {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: false,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: true,
        }
    }
}

/// Result ordering; ties are broken by document number ascending
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sort {
    pub fields: Vec<SortField>,
}

impl Sort {
    pub fn new(fields: Vec<SortField>) -> Self {
        Self { fields }
    }

    /// Compare two sort keys under this ordering
    pub fn compare(&self, a: &SortKey, b: &SortKey) -> Ordering {
        for (i, field) in self.fields.iter().enumerate() {
            let x = a.0.get(i).copied().unwrap_or(i64::MIN);
            let y = b.0.get(i).copied().unwrap_or(i64::MIN);
            let ord = if field.descending { y.cmp(&x) } else { x.cmp(&y) };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }

    /// Compare full hit positions: sort key, then document number
    pub fn compare_hits(&self, a: &ScoreDoc, b: &ScoreDoc) -> Ordering {
        self.compare(&a.sort_key, &b.sort_key)
            .then_with(|| a.doc.cmp(&b.doc))
    }
}

/// Values of the sort fields for one hit; a missing value sorts as `i64::MIN`
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey(pub Vec<i64>);

/// One hit of a search
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreDoc {
    pub doc: u32,
    pub sort_key: SortKey,
}

/// Top hits of a search
#[derive(Clone, Debug, Default)]
pub struct TopDocs {
    /// Number of documents matching the query, ignoring limit and position
    pub total_hits: usize,
    pub hits: Vec<ScoreDoc>,
}

/// Mutation side of an embedded index engine
///
/// Calls arrive from a single writer thread per engine, except for
/// `open_reader` and `is_current`, which the refresh thread may call
/// concurrently.
pub trait IndexEngine: Send + Sync {
    fn add_document(&self, doc: Document) -> Result<()>;

    /// Atomically delete every document matching `term` and add `doc`
    fn update_document(&self, term: &Term, doc: Document) -> Result<()>;

    fn delete_documents(&self, term: &Term) -> Result<()>;

    fn delete_all(&self) -> Result<()>;

    /// Make all applied changes durable
    fn commit(&self) -> Result<()>;

    fn has_uncommitted_changes(&self) -> bool;

    /// Open a snapshot reflecting every change applied so far
    fn open_reader(&self) -> Result<Arc<dyn EngineReader>>;

    /// Whether a snapshot at `version` still reflects every applied change
    fn is_current(&self, version: u64) -> Result<bool>;

    fn close(&self) -> Result<()>;
}

/// An immutable point-in-time view of an engine
pub trait EngineReader: Send + Sync {
    fn version(&self) -> u64;

    /// Return up to `limit` hits ordered by `sort`, strictly after `after`
    /// when given
    fn search(
        &self,
        query: &NativeQuery,
        limit: usize,
        sort: &Sort,
        after: Option<&ScoreDoc>,
    ) -> Result<TopDocs>;

    /// Stored fields of a document, optionally restricted to `fields`
    fn stored_fields(&self, doc: u32, fields: Option<&HashSet<String>>) -> Result<Document>;

    fn num_docs(&self) -> usize;

    /// Release resources held by the snapshot
    fn close(&self);
}
