//! Schema definitions
//!
//! A schema is the ordered, immutable list of fields an entity type is
//! indexed with, plus the version number used for reindex and cutover.

use super::field_type::FieldType;
use crate::error::{IndexError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One declared field
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub field_type: FieldType,
    /// Whether the field may carry more than one value
    #[serde(default)]
    pub repeated: bool,
    /// Whether values can be read back from search hits
    #[serde(default)]
    pub stored: bool,
}

impl FieldDef {
    /// Create a single-valued, unstored field
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            repeated: false,
            stored: field_type == FieldType::StoredOnly,
        }
    }

    pub fn exact(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Exact)
    }

    pub fn prefix(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Prefix)
    }

    pub fn full_text(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::FullText)
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Integer)
    }

    pub fn integer_range(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::IntegerRange)
    }

    pub fn long(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Long)
    }

    pub fn timestamp(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Timestamp)
    }

    pub fn stored_only(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::StoredOnly)
    }

    pub fn repeated(mut self) -> Self {
        self.repeated = true;
        self
    }

    pub fn stored(mut self) -> Self {
        self.stored = true;
        self
    }
}

/// Immutable, versioned field layout of one entity type
#[derive(Clone, Debug)]
pub struct Schema {
    name: String,
    version: u32,
    key_field: usize,
    fields: Vec<FieldDef>,
    by_name: HashMap<String, usize>,
}

impl Schema {
    pub fn builder(name: impl Into<String>, version: u32) -> SchemaBuilder {
        SchemaBuilder {
            name: name.into(),
            version,
            key: None,
            fields: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// The field addressing documents for replace and delete
    pub fn key_field(&self) -> &FieldDef {
        &self.fields[self.key_field]
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.by_name.get(name).map(|&i| &self.fields[i])
    }

    /// Look up a field, failing with `UnknownField`
    pub fn require(&self, name: &str) -> Result<&FieldDef> {
        self.field(name)
            .ok_or_else(|| IndexError::UnknownField(name.to_string()))
    }

    pub fn fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter()
    }

    pub fn stored_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter().filter(|f| f.stored)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Builder validating a schema before it is used
pub struct SchemaBuilder {
    name: String,
    version: u32,
    key: Option<String>,
    fields: Vec<FieldDef>,
}

impl SchemaBuilder {
    pub fn field(mut self, def: FieldDef) -> Self {
        self.fields.push(def);
        self
    }

    pub fn key(mut self, name: impl Into<String>) -> Self {
        self.key = Some(name.into());
        self
    }

    pub fn build(self) -> Result<Schema> {
        let mut by_name = HashMap::with_capacity(self.fields.len());
        for (i, def) in self.fields.iter().enumerate() {
            if def.name.is_empty() {
                return Err(IndexError::InvalidSchema("empty field name".into()));
            }
            if by_name.insert(def.name.clone(), i).is_some() {
                return Err(IndexError::InvalidSchema(format!(
                    "duplicate field '{}'",
                    def.name
                )));
            }
            if def.field_type == FieldType::StoredOnly && !def.stored {
                return Err(IndexError::InvalidSchema(format!(
                    "stored-only field '{}' must be stored",
                    def.name
                )));
            }
        }

        let key = self
            .key
            .ok_or_else(|| IndexError::InvalidSchema("no key field".into()))?;
        let key_field = *by_name
            .get(&key)
            .ok_or_else(|| IndexError::InvalidSchema(format!("key field '{}' not declared", key)))?;
        let def = &self.fields[key_field];
        if !def.field_type.is_keyable() || def.repeated || !def.stored {
            return Err(IndexError::InvalidSchema(format!(
                "key field '{}' must be a single-valued, stored exact or numeric field",
                key
            )));
        }

        Ok(Schema {
            name: self.name,
            version: self.version,
            key_field,
            fields: self.fields,
            by_name,
        })
    }
}
