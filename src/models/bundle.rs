use chrono::{DateTime, Utc};

use super::value::FieldValue;

/// Typed view over the stored fields of one indexed document
///
/// Fields keep the order in which they were read; the values of a repeated
/// field keep their insertion order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FieldBundle {
    fields: Vec<(String, Vec<FieldValue>)>,
}

impl FieldBundle {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, name: &str, value: FieldValue) {
        match self.fields.iter_mut().find(|(n, _)| n == name) {
            Some((_, values)) => values.push(value),
            None => self.fields.push((name.to_string(), vec![value])),
        }
    }

    /// All values of a field, empty if absent
    pub fn values(&self, name: &str) -> &[FieldValue] {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn first(&self, name: &str) -> Option<&FieldValue> {
        self.values(name).first()
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.first(name).and_then(FieldValue::as_str)
    }

    pub fn get_int(&self, name: &str) -> Option<i32> {
        self.first(name).and_then(FieldValue::as_int)
    }

    pub fn get_long(&self, name: &str) -> Option<i64> {
        self.first(name).and_then(FieldValue::as_long)
    }

    pub fn get_timestamp(&self, name: &str) -> Option<DateTime<Utc>> {
        self.first(name).and_then(FieldValue::as_timestamp)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.iter().any(|(n, _)| n == name)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Render as a JSON object; single values are unwrapped, repeated
    /// fields become arrays
    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for (name, values) in &self.fields {
            let rendered: Vec<serde_json::Value> = values.iter().map(value_to_json).collect();
            let value = if rendered.len() == 1 {
                rendered.into_iter().next().unwrap_or(serde_json::Value::Null)
            } else {
                serde_json::Value::Array(rendered)
            };
            map.insert(name.clone(), value);
        }
        serde_json::Value::Object(map)
    }
}

fn value_to_json(value: &FieldValue) -> serde_json::Value {
    match value {
        FieldValue::Str(s) => serde_json::Value::from(s.as_str()),
        FieldValue::Int(v) => serde_json::Value::from(*v),
        FieldValue::Long(v) => serde_json::Value::from(*v),
        FieldValue::Timestamp(ts) => serde_json::Value::from(ts.to_rfc3339()),
        FieldValue::Bytes(b) => serde_json::Value::from(b.len()),
    }
}
