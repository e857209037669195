//! Document mapping
//!
//! Converts typed entity fields into the engine's flat document form and
//! stored fields back into a [`FieldBundle`].
//!
//! Numeric values use a sortable binary form: big-endian with the sign bit
//! flipped, so that byte order equals numeric order. Timestamps are epoch
//! milliseconds in the long form.

use chrono::DateTime;

use super::field_type::FieldType;
use super::mapping::{FieldDef, Schema};
use crate::engine::{DocField, Document, FieldKind, Term};
use crate::error::{IndexError, Result};
use crate::models::{FieldBundle, FieldValue};

/// An entity that can be indexed under a schema
pub trait Indexable {
    /// Present values of a field, in insertion order; empty when absent
    fn field_values(&self, field: &str) -> Vec<FieldValue>;
}

pub fn encode_int(v: i32) -> [u8; 4] {
    ((v as u32) ^ 0x8000_0000).to_be_bytes()
}

pub fn decode_int(bytes: &[u8]) -> Option<i32> {
    let raw: [u8; 4] = bytes.try_into().ok()?;
    Some((u32::from_be_bytes(raw) ^ 0x8000_0000) as i32)
}

pub fn encode_long(v: i64) -> [u8; 8] {
    ((v as u64) ^ 0x8000_0000_0000_0000).to_be_bytes()
}

pub fn decode_long(bytes: &[u8]) -> Option<i64> {
    let raw: [u8; 8] = bytes.try_into().ok()?;
    Some((u64::from_be_bytes(raw) ^ 0x8000_0000_0000_0000) as i64)
}

/// Decode a point value of either width
pub fn decode_point(bytes: &[u8]) -> Option<i64> {
    match bytes.len() {
        4 => decode_int(bytes).map(i64::from),
        8 => decode_long(bytes),
        _ => None,
    }
}

/// Encode one value under a field definition
pub(crate) fn encode_value(def: &FieldDef, value: &FieldValue) -> Result<(FieldKind, Vec<u8>)> {
    let encoded = match (def.field_type, value) {
        (FieldType::Exact | FieldType::Prefix, FieldValue::Str(s)) => {
            (FieldKind::Term, s.as_bytes().to_vec())
        }
        (FieldType::FullText, FieldValue::Str(s)) => (FieldKind::Text, s.as_bytes().to_vec()),
        (FieldType::Integer | FieldType::IntegerRange, FieldValue::Int(v)) => {
            (FieldKind::Point, encode_int(*v).to_vec())
        }
        (FieldType::Long, FieldValue::Long(v)) => (FieldKind::Point, encode_long(*v).to_vec()),
        (FieldType::Timestamp, FieldValue::Timestamp(ts)) => {
            (FieldKind::Point, encode_long(ts.timestamp_millis()).to_vec())
        }
        (FieldType::StoredOnly, FieldValue::Bytes(b)) => (FieldKind::Stored, b.clone()),
        (ty, v) => {
            return Err(IndexError::mismatch(
                &def.name,
                format!("expected {} value, got {}", ty.name(), v.type_name()),
            ))
        }
    };
    Ok(encoded)
}

fn decode_value(def: &FieldDef, bytes: &[u8]) -> Result<FieldValue> {
    let corrupt = || {
        IndexError::mismatch(
            &def.name,
            format!("corrupt stored {} value", def.field_type.name()),
        )
    };
    let value = match def.field_type {
        FieldType::Exact | FieldType::Prefix | FieldType::FullText => {
            FieldValue::Str(String::from_utf8(bytes.to_vec()).map_err(|_| corrupt())?)
        }
        FieldType::Integer | FieldType::IntegerRange => {
            FieldValue::Int(decode_int(bytes).ok_or_else(corrupt)?)
        }
        FieldType::Long => FieldValue::Long(decode_long(bytes).ok_or_else(corrupt)?),
        FieldType::Timestamp => {
            let ms = decode_long(bytes).ok_or_else(corrupt)?;
            FieldValue::Timestamp(DateTime::from_timestamp_millis(ms).ok_or_else(corrupt)?)
        }
        FieldType::StoredOnly => FieldValue::Bytes(bytes.to_vec()),
    };
    Ok(value)
}

/// Build the engine document for an entity
pub fn to_document<E: Indexable + ?Sized>(schema: &Schema, entity: &E) -> Result<Document> {
    let mut doc = Document::new();
    for def in schema.fields() {
        let values = entity.field_values(&def.name);
        if values.len() > 1 && !def.repeated {
            return Err(IndexError::mismatch(
                &def.name,
                format!("single-valued field has {} values", values.len()),
            ));
        }
        for value in &values {
            let (kind, bytes) = encode_value(def, value)?;
            doc.add(DocField {
                name: def.name.clone(),
                kind,
                value: bytes,
                stored: def.stored,
            });
        }
    }
    Ok(doc)
}

/// Decode the stored fields of a document read back from the engine
pub fn from_stored_fields(schema: &Schema, doc: &Document) -> Result<FieldBundle> {
    let mut bundle = FieldBundle::new();
    for field in doc.fields() {
        let def = schema.require(&field.name)?;
        bundle.push(&def.name, decode_value(def, &field.value)?);
    }
    Ok(bundle)
}

/// Term addressing an entity's document by its key field
pub fn key_term<E: Indexable + ?Sized>(schema: &Schema, entity: &E) -> Result<Term> {
    let key = schema.key_field();
    let mut values = entity.field_values(&key.name);
    match values.len() {
        1 => key_term_for(schema, &values.remove(0)),
        n => Err(IndexError::mismatch(
            &key.name,
            format!("key field must have exactly one value, got {}", n),
        )),
    }
}

/// Term addressing the document whose key field equals `value`
pub fn key_term_for(schema: &Schema, value: &FieldValue) -> Result<Term> {
    let key = schema.key_field();
    let (_, bytes) = encode_value(key, value)?;
    Ok(Term::new(key.name.clone(), bytes))
}
