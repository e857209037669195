use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::value::FieldValue;
use crate::engine::{Sort, SortField};
use crate::error::Result;
use crate::index::StatusPartitioner;
use crate::schema::{FieldDef, Indexable, Schema};

/// Current schema version of the change index
pub const CHANGE_SCHEMA_VERSION: u32 = 1;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeStatus {
    #[default]
    New,
    Merged,
    Abandoned,
}

impl ChangeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeStatus::New => "new",
            ChangeStatus::Merged => "merged",
            ChangeStatus::Abandoned => "abandoned",
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, ChangeStatus::New)
    }
}

impl fmt::Display for ChangeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A code review change
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub id: i32,
    /// Stable change identifier, e.g. `I8473b95934b5732ac55d26311a706c9c2bde9940`
    pub change_key: String,
    pub project: String,
    pub branch: String,
    #[serde(default)]
    pub status: ChangeStatus,
    pub owner: i32,
    #[serde(default)]
    pub reviewers: Vec<i32>,
    #[serde(default)]
    pub hashtags: Vec<String>,
    #[serde(default)]
    pub files: Vec<String>,
    pub subject: String,
    #[serde(default)]
    pub added: i32,
    #[serde(default)]
    pub deleted: i32,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    /// Opaque serialized extras, stored but never indexed
    #[serde(default)]
    pub metadata: Vec<u8>,
}

impl Change {
    pub fn schema() -> Result<Schema> {
        Schema::builder("changes", CHANGE_SCHEMA_VERSION)
            .field(FieldDef::integer("id").stored())
            .field(FieldDef::prefix("change_key").stored())
            .field(FieldDef::exact("project").stored())
            .field(FieldDef::exact("branch").stored())
            .field(FieldDef::exact("status").stored())
            .field(FieldDef::integer("owner").stored())
            .field(FieldDef::integer("reviewer").repeated())
            .field(FieldDef::exact("hashtag").repeated().stored())
            .field(FieldDef::prefix("file").repeated())
            .field(FieldDef::full_text("subject").stored())
            .field(FieldDef::integer_range("added"))
            .field(FieldDef::integer_range("deleted"))
            .field(FieldDef::timestamp("created").stored())
            .field(FieldDef::timestamp("updated").stored())
            .field(FieldDef::stored_only("_meta"))
            .key("id")
            .build()
    }

    /// Most recently updated first
    pub fn default_sort() -> Sort {
        Sort::new(vec![SortField::desc("updated"), SortField::desc("id")])
    }

    /// Open changes in one partition, merged and abandoned in the other
    pub fn partitioner() -> StatusPartitioner {
        StatusPartitioner::new("status", [ChangeStatus::New.as_str()])
    }
}

impl Indexable for Change {
    fn field_values(&self, field: &str) -> Vec<FieldValue> {
        match field {
            "id" => vec![self.id.into()],
            "change_key" => vec![self.change_key.as_str().into()],
            "project" => vec![self.project.as_str().into()],
            "branch" => vec![self.branch.as_str().into()],
            "status" => vec![self.status.as_str().into()],
            "owner" => vec![self.owner.into()],
            "reviewer" => self.reviewers.iter().map(|&r| r.into()).collect(),
            "hashtag" => self.hashtags.iter().map(|h| h.as_str().into()).collect(),
            "file" => self.files.iter().map(|f| f.as_str().into()).collect(),
            "subject" => vec![self.subject.as_str().into()],
            "added" => vec![self.added.into()],
            "deleted" => vec![self.deleted.into()],
            "created" => vec![self.created.into()],
            "updated" => vec![self.updated.into()],
            "_meta" if !self.metadata.is_empty() => vec![self.metadata.clone().into()],
            _ => Vec::new(),
        }
    }
}
