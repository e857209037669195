//! Field type definitions
//!
//! Defines how each declared field is encoded, indexed and queried.

use serde::{Deserialize, Serialize};

use crate::models::FieldValue;

/// Field data type
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    /// Whole-value string term
    ///
    /// Supports equality and anchored regex queries.
    Exact,

    /// String term that may also be queried by prefix
    Prefix,

    /// Analyzed text
    ///
    /// Indexed through the analyzer; only `contains` queries apply.
    FullText,

    /// 32-bit signed integer, exact match and range
    Integer,

    /// 32-bit signed integer intended for range queries
    IntegerRange,

    /// 64-bit signed integer
    Long,

    /// UTC instant with millisecond precision, stored as a long
    Timestamp,

    /// Opaque bytes that are stored but never indexed
    StoredOnly,
}

impl FieldType {
    /// Check if values of this type are searchable
    pub fn is_indexed(&self) -> bool {
        !matches!(self, FieldType::StoredOnly)
    }

    /// Check if this type supports numeric range queries
    pub fn supports_range(&self) -> bool {
        matches!(
            self,
            FieldType::Integer | FieldType::IntegerRange | FieldType::Long | FieldType::Timestamp
        )
    }

    /// Check if this type can name a document for replace and delete
    pub fn is_keyable(&self) -> bool {
        matches!(self, FieldType::Exact | FieldType::Integer | FieldType::Long)
    }

    /// Check if a field of this type can order results
    pub fn is_sortable(&self) -> bool {
        self.supports_range()
    }

    /// Check whether a runtime value has the representation this type expects
    pub fn accepts(&self, value: &FieldValue) -> bool {
        matches!(
            (self, value),
            (FieldType::Exact | FieldType::Prefix | FieldType::FullText, FieldValue::Str(_))
                | (FieldType::Integer | FieldType::IntegerRange, FieldValue::Int(_))
                | (FieldType::Long, FieldValue::Long(_))
                | (FieldType::Timestamp, FieldValue::Timestamp(_))
                | (FieldType::StoredOnly, FieldValue::Bytes(_))
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            FieldType::Exact => "exact",
            FieldType::Prefix => "prefix",
            FieldType::FullText => "full_text",
            FieldType::Integer => "integer",
            FieldType::IntegerRange => "integer_range",
            FieldType::Long => "long",
            FieldType::Timestamp => "timestamp",
            FieldType::StoredOnly => "stored_only",
        }
    }
}
