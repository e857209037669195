//! Schema and field type system
//!
//! - Field types (exact, prefix, full text, numeric, timestamp, stored-only)
//! - Versioned schemas with a key field
//! - Mapping between entities and engine documents

mod field_type;
pub mod mapper;
mod mapping;

pub use field_type::FieldType;
pub use mapper::{from_stored_fields, key_term, key_term_for, to_document, Indexable};
pub use mapping::{FieldDef, Schema, SchemaBuilder};
