//! Engine-independent predicate trees

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::FieldValue;

/// Boolean combination of atomic field conditions
///
/// # Example
///
/// ```json
/// { "and": [
///     { "field": { "field": "status", "op": "equals", "value": { "type": "str", "value": "new" } } },
///     { "not": { "field": { "field": "updated", "op": "timestamp_range", "until": "2024-01-01T00:00:00Z" } } }
/// ] }
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
    Field(FieldPredicate),
    /// Always true for the engine; evaluated by the caller on loaded results
    PostFilter(String),
}

/// A condition on one declared field
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldPredicate {
    pub field: String,
    #[serde(flatten)]
    pub op: FieldOp,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum FieldOp {
    Equals {
        value: FieldValue,
    },
    Prefix {
        prefix: String,
    },
    /// Anchored regular expression over the whole value
    Regex {
        pattern: String,
    },
    /// Inclusive numeric range; a missing bound is open
    Range {
        #[serde(default)]
        min: Option<i64>,
        #[serde(default)]
        max: Option<i64>,
    },
    /// Half-open instant range `[from, until)`; a missing bound is open
    TimestampRange {
        #[serde(default)]
        from: Option<DateTime<Utc>>,
        #[serde(default)]
        until: Option<DateTime<Utc>>,
    },
    /// Every analyzed term of `text` occurs in the field
    Contains {
        text: String,
    },
}

impl Predicate {
    pub fn and(children: Vec<Predicate>) -> Self {
        Predicate::And(children)
    }

    pub fn or(children: Vec<Predicate>) -> Self {
        Predicate::Or(children)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(child: Predicate) -> Self {
        Predicate::Not(Box::new(child))
    }

    pub fn post_filter(name: impl Into<String>) -> Self {
        Predicate::PostFilter(name.into())
    }

    fn field(field: impl Into<String>, op: FieldOp) -> Self {
        Predicate::Field(FieldPredicate {
            field: field.into(),
            op,
        })
    }

    pub fn equals(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self::field(field, FieldOp::Equals { value: value.into() })
    }

    pub fn prefix(field: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self::field(field, FieldOp::Prefix { prefix: prefix.into() })
    }

    pub fn regex(field: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::field(field, FieldOp::Regex { pattern: pattern.into() })
    }

    pub fn range(field: impl Into<String>, min: Option<i64>, max: Option<i64>) -> Self {
        Self::field(field, FieldOp::Range { min, max })
    }

    pub fn timestamp_range(
        field: impl Into<String>,
        from: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Self {
        Self::field(field, FieldOp::TimestampRange { from, until })
    }

    pub fn contains(field: impl Into<String>, text: impl Into<String>) -> Self {
        Self::field(field, FieldOp::Contains { text: text.into() })
    }

    /// Whether the tree contains a post-filter placeholder anywhere
    pub fn has_post_filter(&self) -> bool {
        match self {
            Predicate::And(children) | Predicate::Or(children) => {
                children.iter().any(Predicate::has_post_filter)
            }
            Predicate::Not(child) => child.has_post_filter(),
            Predicate::Field(_) => false,
            Predicate::PostFilter(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_predicate() {
        let json = r#"{ "and": [
            { "field": { "field": "status", "op": "equals", "value": { "type": "str", "value": "new" } } },
            { "not": { "field": { "field": "updated", "op": "timestamp_range", "until": "2024-01-01T00:00:00Z" } } },
            { "post_filter": "visible_to" }
        ] }"#;
        let p: Predicate = serde_json::from_str(json).unwrap();
        let until = "2024-01-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap();
        assert_eq!(
            p,
            Predicate::and(vec![
                Predicate::equals("status", "new"),
                Predicate::not(Predicate::timestamp_range("updated", None, Some(until))),
                Predicate::post_filter("visible_to"),
            ])
        );
        assert!(p.has_post_filter());
        assert!(!Predicate::contains("subject", "x").has_post_filter());
    }
}
