use thiserror::Error;

use crate::models::Partition;

/// Main error type for index operations
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Schema mismatch on field '{field}': {reason}")]
    SchemaMismatch { field: String, reason: String },

    #[error("Unknown field: {0}")]
    UnknownField(String),

    #[error("Full-text query on field '{0}' has no terms")]
    EmptyFullTextQuery(String),

    #[error("Query too complex: {clauses} clauses exceeds limit of {limit}")]
    QueryTooComplex { clauses: usize, limit: usize },

    #[error("Invalid regex '{pattern}': {reason}")]
    InvalidRegex { pattern: String, reason: String },

    #[error("Invalid cursor: {0}")]
    InvalidCursor(String),

    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    #[error("Index partition {partition} unavailable: {reason}")]
    IndexUnavailable { partition: String, reason: String },

    #[error("Engine error: {0}")]
    Engine(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// Result type alias for index operations
pub type Result<T> = std::result::Result<T, IndexError>;

impl IndexError {
    pub fn mismatch(field: impl Into<String>, reason: impl Into<String>) -> Self {
        IndexError::SchemaMismatch {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn unavailable(partition: impl Into<String>, reason: impl Into<String>) -> Self {
        IndexError::IndexUnavailable {
            partition: partition.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn unavailable_partition(partition: Partition, reason: impl Into<String>) -> Self {
        Self::unavailable(partition.as_str(), reason)
    }

    /// Caller errors reject a single request and must not be retried
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            IndexError::SchemaMismatch { .. }
                | IndexError::UnknownField(_)
                | IndexError::EmptyFullTextQuery(_)
                | IndexError::QueryTooComplex { .. }
                | IndexError::InvalidRegex { .. }
                | IndexError::InvalidCursor(_)
                | IndexError::InvalidSchema(_)
        )
    }

    /// Check if this error indicates a transient failure that could be retried
    pub fn is_retriable(&self) -> bool {
        matches!(self, IndexError::Io(_) | IndexError::Engine(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = IndexError::UnknownField("reviewer".to_string());
        assert_eq!(err.to_string(), "Unknown field: reviewer");

        let err = IndexError::QueryTooComplex {
            clauses: 2000,
            limit: 1024,
        };
        assert_eq!(
            err.to_string(),
            "Query too complex: 2000 clauses exceeds limit of 1024"
        );
    }

    #[test]
    fn test_error_classification() {
        assert!(IndexError::EmptyFullTextQuery("message".into()).is_caller_error());
        assert!(IndexError::mismatch("status", "expected string").is_caller_error());
        assert!(!IndexError::unavailable("open", "refresh thread died").is_caller_error());
        assert!(!IndexError::unavailable("open", "refresh thread died").is_retriable());
        assert!(IndexError::Engine("disk full".into()).is_retriable());
    }
}
