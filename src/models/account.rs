use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::value::FieldValue;
use crate::engine::{Sort, SortField};
use crate::error::Result;
use crate::schema::{FieldDef, Indexable, Schema};

pub const ACCOUNT_SCHEMA_VERSION: u32 = 1;

/// A user account
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: i32,
    pub username: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub emails: Vec<String>,
    pub registered: DateTime<Utc>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl Account {
    pub fn schema() -> Result<Schema> {
        Schema::builder("accounts", ACCOUNT_SCHEMA_VERSION)
            .field(FieldDef::integer("id").stored())
            .field(FieldDef::prefix("username").stored())
            .field(FieldDef::full_text("name").stored())
            .field(FieldDef::prefix("email").repeated())
            .field(FieldDef::timestamp("registered"))
            .field(FieldDef::exact("is").repeated())
            .key("id")
            .build()
    }

    pub fn default_sort() -> Sort {
        Sort::new(vec![SortField::desc("id")])
    }
}

impl Indexable for Account {
    fn field_values(&self, field: &str) -> Vec<FieldValue> {
        match field {
            "id" => vec![self.id.into()],
            "username" => vec![self.username.as_str().into()],
            "name" => self
                .full_name
                .iter()
                .map(|n| n.as_str().into())
                .collect(),
            "email" => self
                .emails
                .iter()
                .map(|e| e.to_lowercase().into())
                .collect(),
            "registered" => vec![self.registered.into()],
            "is" => {
                let state = if self.active { "active" } else { "inactive" };
                vec![state.into()]
            }
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::to_document;

    #[test]
    fn test_account_document() {
        let schema = Account::schema().unwrap();
        let account = Account {
            id: 7,
            username: "jdoe".into(),
            full_name: None,
            emails: vec!["J.Doe@Example.com".into()],
            registered: Utc::now(),
            active: false,
        };
        let doc = to_document(&schema, &account).unwrap();
        assert_eq!(doc.get("name").count(), 0);
        assert_eq!(doc.get("email").next().unwrap().value, b"j.doe@example.com");
        assert_eq!(doc.get("is").next().unwrap().value, b"inactive");
    }
}
