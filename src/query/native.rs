//! Engine-native query form produced by the compiler

/// A query the engine evaluates directly
///
/// Point bounds are in the sortable encoding produced by the document
/// mapper, so the engine compares them bytewise.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NativeQuery {
    MatchAll,
    MatchNone,
    /// Exact encoded value of a term or point field
    Term { field: String, value: Vec<u8> },
    Prefix { field: String, prefix: String },
    /// Anchored pattern over whole term values
    Regex { field: String, pattern: String },
    /// All analyzed terms occur in the text field
    Text { field: String, terms: Vec<String> },
    /// Point value within `[lower, upper]`
    Range {
        field: String,
        lower: Vec<u8>,
        upper: Vec<u8>,
    },
    /// Point value outside `[lower, upper]`
    RangeOutside {
        field: String,
        lower: Vec<u8>,
        upper: Vec<u8>,
    },
    Bool(BooleanQuery),
}

/// Required, optional and prohibited clauses
///
/// With at least one `must` clause, `should` clauses do not restrict the
/// result. Without one, at least one `should` clause has to match. A query
/// with only `must_not` clauses matches nothing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BooleanQuery {
    pub must: Vec<NativeQuery>,
    pub should: Vec<NativeQuery>,
    pub must_not: Vec<NativeQuery>,
}

impl BooleanQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn must(mut self, query: NativeQuery) -> Self {
        self.must.push(query);
        self
    }

    pub fn should(mut self, query: NativeQuery) -> Self {
        self.should.push(query);
        self
    }

    pub fn must_not(mut self, query: NativeQuery) -> Self {
        self.must_not.push(query);
        self
    }

    pub fn clause_count(&self) -> usize {
        self.must.len() + self.should.len() + self.must_not.len()
    }
}

impl NativeQuery {
    /// Whether any boolean in the tree carries a prohibited clause
    pub fn has_negation(&self) -> bool {
        match self {
            NativeQuery::Bool(b) => {
                !b.must_not.is_empty()
                    || b.must.iter().chain(b.should.iter()).any(NativeQuery::has_negation)
            }
            _ => false,
        }
    }
}
