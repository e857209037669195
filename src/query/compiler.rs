//! Predicate to native query compilation

use std::collections::HashSet;
use std::sync::Arc;

use super::native::{BooleanQuery, NativeQuery};
use super::predicate::{FieldOp, FieldPredicate, Predicate};
use crate::analysis::Analyzer;
use crate::error::{IndexError, Result};
use crate::models::FieldValue;
use crate::schema::mapper::{encode_int, encode_long};
use crate::schema::{FieldDef, FieldType, Schema};

/// Compiles predicate trees against one schema version
///
/// Holds only read-only state and can be shared across threads.
#[derive(Clone, Debug)]
pub struct QueryCompiler {
    schema: Arc<Schema>,
    analyzer: Arc<Analyzer>,
    max_clause_count: usize,
}

impl QueryCompiler {
    pub fn new(schema: Arc<Schema>, analyzer: Arc<Analyzer>, max_clause_count: usize) -> Self {
        Self {
            schema,
            analyzer,
            max_clause_count,
        }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn compile(&self, predicate: &Predicate) -> Result<NativeQuery> {
        match predicate {
            Predicate::And(children) => self.compile_and(children),
            Predicate::Or(children) => self.compile_or(children),
            Predicate::Not(child) => self.compile_not(child),
            Predicate::Field(fp) => self.compile_field(fp),
            Predicate::PostFilter(_) => Ok(NativeQuery::MatchAll),
        }
    }

    fn check_clauses(&self, clauses: usize) -> Result<()> {
        if clauses > self.max_clause_count {
            return Err(IndexError::QueryTooComplex {
                clauses,
                limit: self.max_clause_count,
            });
        }
        Ok(())
    }

    fn compile_and(&self, children: &[Predicate]) -> Result<NativeQuery> {
        self.check_clauses(children.len())?;
        let mut b = BooleanQuery::new();
        for child in children {
            match child {
                Predicate::Not(inner) => match inner.as_ref() {
                    Predicate::Field(FieldPredicate {
                        field,
                        op: FieldOp::TimestampRange { from, until },
                    }) => {
                        let def = self.timestamp_field(field)?;
                        b.must.push(complement_timestamp_range(
                            def,
                            from.map(|t| t.timestamp_millis()),
                            until.map(|t| t.timestamp_millis()),
                        ));
                    }
                    Predicate::PostFilter(_) => {}
                    other => b.must_not.push(self.compile(other)?),
                },
                other => b.must.push(self.compile(other)?),
            }
        }
        if b.must.is_empty() {
            b.must.push(NativeQuery::MatchAll);
        }
        Ok(NativeQuery::Bool(b))
    }

    fn compile_or(&self, children: &[Predicate]) -> Result<NativeQuery> {
        self.check_clauses(children.len())?;
        if children.is_empty() {
            return Ok(NativeQuery::MatchNone);
        }
        let mut b = BooleanQuery::new();
        for child in children {
            b.should.push(self.compile(child)?);
        }
        Ok(NativeQuery::Bool(b))
    }

    fn compile_not(&self, child: &Predicate) -> Result<NativeQuery> {
        if let Predicate::PostFilter(_) = child {
            return Ok(NativeQuery::MatchAll);
        }
        Ok(NativeQuery::Bool(
            BooleanQuery::new()
                .must(NativeQuery::MatchAll)
                .must_not(self.compile(child)?),
        ))
    }

    fn timestamp_field(&self, name: &str) -> Result<&FieldDef> {
        let def = self.schema.require(name)?;
        if def.field_type != FieldType::Timestamp {
            return Err(IndexError::mismatch(
                name,
                format!("timestamp range on {} field", def.field_type.name()),
            ));
        }
        Ok(def)
    }

    fn compile_field(&self, fp: &FieldPredicate) -> Result<NativeQuery> {
        let def = self.schema.require(&fp.field)?;
        let ty = def.field_type;
        let unsupported = |op: &str| {
            Err(IndexError::mismatch(
                &def.name,
                format!("{} is not supported on {} fields", op, ty.name()),
            ))
        };
        if !ty.is_indexed() {
            return unsupported("querying");
        }

        match &fp.op {
            FieldOp::Equals { value } => {
                if ty == FieldType::FullText {
                    return unsupported("equals");
                }
                if !ty.accepts(value) {
                    return Err(IndexError::mismatch(
                        &def.name,
                        format!("expected {} value, got {}", ty.name(), value.type_name()),
                    ));
                }
                Ok(NativeQuery::Term {
                    field: def.name.clone(),
                    value: encode_term(value),
                })
            }
            FieldOp::Prefix { prefix } => {
                if ty != FieldType::Prefix {
                    return unsupported("prefix");
                }
                Ok(NativeQuery::Prefix {
                    field: def.name.clone(),
                    prefix: prefix.clone(),
                })
            }
            FieldOp::Regex { pattern } => {
                if !matches!(ty, FieldType::Exact | FieldType::Prefix) {
                    return unsupported("regex");
                }
                regex::Regex::new(&anchored(pattern)).map_err(|e| IndexError::InvalidRegex {
                    pattern: pattern.clone(),
                    reason: e.to_string(),
                })?;
                Ok(NativeQuery::Regex {
                    field: def.name.clone(),
                    pattern: pattern.clone(),
                })
            }
            FieldOp::Range { min, max } => {
                if !ty.supports_range() {
                    return unsupported("range");
                }
                Ok(numeric_range(def, *min, *max))
            }
            FieldOp::TimestampRange { from, until } => {
                if ty != FieldType::Timestamp {
                    return unsupported("timestamp range");
                }
                let from = from.map(|t| t.timestamp_millis());
                let until = until.map(|t| t.timestamp_millis());
                match until {
                    // [from, i64::MIN) is empty
                    Some(u) if u == i64::MIN => Ok(NativeQuery::MatchNone),
                    _ => Ok(long_range(def, from, until.map(|u| u - 1))),
                }
            }
            FieldOp::Contains { text } => {
                if ty != FieldType::FullText {
                    return unsupported("contains");
                }
                let mut terms = self.analyzer.tokenize(text);
                if terms.is_empty() {
                    return Err(IndexError::EmptyFullTextQuery(def.name.clone()));
                }
                let mut seen = HashSet::new();
                terms.retain(|t| seen.insert(t.clone()));
                Ok(NativeQuery::Text {
                    field: def.name.clone(),
                    terms,
                })
            }
        }
    }
}

/// Wrap a pattern so it must match the whole value
pub(crate) fn anchored(pattern: &str) -> String {
    format!("^(?:{})$", pattern)
}

fn encode_term(value: &FieldValue) -> Vec<u8> {
    match value {
        FieldValue::Str(s) => s.as_bytes().to_vec(),
        FieldValue::Int(v) => encode_int(*v).to_vec(),
        FieldValue::Long(v) => encode_long(*v).to_vec(),
        FieldValue::Timestamp(ts) => encode_long(ts.timestamp_millis()).to_vec(),
        FieldValue::Bytes(b) => b.clone(),
    }
}

/// Inclusive range over an integer or long field
fn numeric_range(def: &FieldDef, min: Option<i64>, max: Option<i64>) -> NativeQuery {
    match def.field_type {
        FieldType::Integer | FieldType::IntegerRange => {
            let lo = min.unwrap_or(i64::MIN).max(i32::MIN as i64);
            let hi = max.unwrap_or(i64::MAX).min(i32::MAX as i64);
            if lo > hi {
                return NativeQuery::MatchNone;
            }
            NativeQuery::Range {
                field: def.name.clone(),
                lower: encode_int(lo as i32).to_vec(),
                upper: encode_int(hi as i32).to_vec(),
            }
        }
        _ => long_range(def, min, max),
    }
}

fn long_range(def: &FieldDef, min: Option<i64>, max: Option<i64>) -> NativeQuery {
    NativeQuery::Range {
        field: def.name.clone(),
        lower: encode_long(min.unwrap_or(i64::MIN)).to_vec(),
        upper: encode_long(max.unwrap_or(i64::MAX)).to_vec(),
    }
}

/// Single clause matching timestamps outside `[from, until)`
fn complement_timestamp_range(def: &FieldDef, from: Option<i64>, until: Option<i64>) -> NativeQuery {
    match (from, until) {
        (None, None) => NativeQuery::MatchNone,
        (Some(f), None) => match f.checked_sub(1) {
            Some(hi) => long_range(def, None, Some(hi)),
            None => NativeQuery::MatchNone,
        },
        (None, Some(u)) => long_range(def, Some(u), None),
        (Some(f), Some(u)) => match u.checked_sub(1) {
            Some(hi) => NativeQuery::RangeOutside {
                field: def.name.clone(),
                lower: encode_long(f).to_vec(),
                upper: encode_long(hi).to_vec(),
            },
            None => long_range(def, None, None),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnalyzerConfig;
    use chrono::{TimeZone, Utc};

    fn compiler(limit: usize) -> QueryCompiler {
        let schema = Schema::builder("changes", 1)
            .field(FieldDef::integer("id").stored())
            .field(FieldDef::exact("status"))
            .field(FieldDef::prefix("file").repeated())
            .field(FieldDef::full_text("subject"))
            .field(FieldDef::integer_range("added"))
            .field(FieldDef::timestamp("updated"))
            .field(FieldDef::stored_only("blob"))
            .key("id")
            .build()
            .unwrap();
        QueryCompiler::new(
            Arc::new(schema),
            Arc::new(Analyzer::new(&AnalyzerConfig::default())),
            limit,
        )
    }

    fn ms(v: i64) -> chrono::DateTime<Utc> {
        Utc.timestamp_millis_opt(v).unwrap()
    }

    #[test]
    fn test_and_with_negated_timestamp_range() {
        let c = compiler(1024);
        let p = Predicate::and(vec![
            Predicate::equals("status", "new"),
            Predicate::not(Predicate::timestamp_range("updated", Some(ms(100)), Some(ms(200)))),
        ]);
        let q = c.compile(&p).unwrap();
        assert!(!q.has_negation());
        let NativeQuery::Bool(b) = q else {
            panic!("expected boolean query");
        };
        assert_eq!(b.must.len(), 2);
        assert_eq!(
            b.must[1],
            NativeQuery::RangeOutside {
                field: "updated".into(),
                lower: encode_long(100).to_vec(),
                upper: encode_long(199).to_vec(),
            }
        );
    }

    #[test]
    fn test_and_with_half_bounded_negated_range() {
        let c = compiler(1024);
        let p = Predicate::and(vec![
            Predicate::equals("status", "new"),
            Predicate::not(Predicate::timestamp_range("updated", None, Some(ms(500)))),
        ]);
        let NativeQuery::Bool(b) = c.compile(&p).unwrap() else {
            panic!("expected boolean query");
        };
        assert!(b.must_not.is_empty());
        assert_eq!(
            b.must[1],
            NativeQuery::Range {
                field: "updated".into(),
                lower: encode_long(500).to_vec(),
                upper: encode_long(i64::MAX).to_vec(),
            }
        );
    }

    #[test]
    fn test_and_with_other_negation() {
        let c = compiler(1024);
        let p = Predicate::and(vec![Predicate::not(Predicate::equals("status", "merged"))]);
        let NativeQuery::Bool(b) = c.compile(&p).unwrap() else {
            panic!("expected boolean query");
        };
        assert_eq!(b.must, vec![NativeQuery::MatchAll]);
        assert_eq!(b.must_not.len(), 1);
    }

    #[test]
    fn test_general_not() {
        let c = compiler(1024);
        let q = c.compile(&Predicate::not(Predicate::prefix("file", "src/"))).unwrap();
        assert_eq!(
            q,
            NativeQuery::Bool(
                BooleanQuery::new()
                    .must(NativeQuery::MatchAll)
                    .must_not(NativeQuery::Prefix {
                        field: "file".into(),
                        prefix: "src/".into()
                    })
            )
        );
    }

    #[test]
    fn test_or_clause_limit() {
        let c = compiler(3);
        let ids: Vec<_> = (0..4).map(|i| Predicate::equals("id", i)).collect();
        let err = c.compile(&Predicate::or(ids.clone())).unwrap_err();
        assert!(matches!(err, IndexError::QueryTooComplex { clauses: 4, limit: 3 }));
        assert!(c.compile(&Predicate::or(ids[..3].to_vec())).is_ok());
    }

    #[test]
    fn test_atomic_errors() {
        let c = compiler(1024);
        assert!(matches!(
            c.compile(&Predicate::equals("reviewer", 1)),
            Err(IndexError::UnknownField(_))
        ));
        assert!(matches!(
            c.compile(&Predicate::contains("subject", "")),
            Err(IndexError::EmptyFullTextQuery(_))
        ));
        assert!(matches!(
            c.compile(&Predicate::contains("subject", " ... ")),
            Err(IndexError::EmptyFullTextQuery(_))
        ));
        assert!(matches!(
            c.compile(&Predicate::equals("id", "42")),
            Err(IndexError::SchemaMismatch { .. })
        ));
        assert!(matches!(
            c.compile(&Predicate::prefix("status", "ne")),
            Err(IndexError::SchemaMismatch { .. })
        ));
        assert!(matches!(
            c.compile(&Predicate::range("status", Some(1), None)),
            Err(IndexError::SchemaMismatch { .. })
        ));
        assert!(matches!(
            c.compile(&Predicate::equals("blob", vec![1u8])),
            Err(IndexError::SchemaMismatch { .. })
        ));
        assert!(matches!(
            c.compile(&Predicate::regex("status", "(")),
            Err(IndexError::InvalidRegex { .. })
        ));
    }

    #[test]
    fn test_contains_analyzes_text() {
        let c = compiler(1024);
        assert_eq!(
            c.compile(&Predicate::contains("subject", "Fix Parser")).unwrap(),
            NativeQuery::Text {
                field: "subject".into(),
                terms: vec!["fix".into(), "parser".into()],
            }
        );
        // Repeated words collapse to their first occurrence
        assert_eq!(
            c.compile(&Predicate::contains("subject", "fix bug FIX parser bug")).unwrap(),
            NativeQuery::Text {
                field: "subject".into(),
                terms: vec!["fix".into(), "bug".into(), "parser".into()],
            }
        );
    }

    #[test]
    fn test_integer_range_clamps() {
        let c = compiler(1024);
        assert_eq!(
            c.compile(&Predicate::range("added", Some(10), None)).unwrap(),
            NativeQuery::Range {
                field: "added".into(),
                lower: encode_int(10).to_vec(),
                upper: encode_int(i32::MAX).to_vec(),
            }
        );
        assert_eq!(
            c.compile(&Predicate::range("added", Some(1 << 40), None)).unwrap(),
            NativeQuery::MatchNone
        );
    }

    #[test]
    fn test_post_filter_is_match_all() {
        let c = compiler(1024);
        assert_eq!(c.compile(&Predicate::post_filter("visible")).unwrap(), NativeQuery::MatchAll);
        assert_eq!(
            c.compile(&Predicate::not(Predicate::post_filter("visible"))).unwrap(),
            NativeQuery::MatchAll
        );
    }
}
