use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;

/// When the writer commits its pending changes to durable storage
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum CommitPolicy {
    /// Commit after every operation
    Eager,
    /// Commit only when the partition is closed
    Lazy,
    /// Commit on a timer whenever there are uncommitted changes
    Periodic { interval_ms: u64 },
}

impl CommitPolicy {
    /// Map a "commit within" setting: negative is lazy, zero is eager,
    /// positive is the periodic interval.
    pub fn from_commit_within_ms(commit_within_ms: i64) -> Self {
        match commit_within_ms {
            ms if ms < 0 => CommitPolicy::Lazy,
            0 => CommitPolicy::Eager,
            ms => CommitPolicy::Periodic {
                interval_ms: ms as u64,
            },
        }
    }

    pub fn interval(&self) -> Option<Duration> {
        match self {
            CommitPolicy::Periodic { interval_ms } => Some(Duration::from_millis(*interval_ms)),
            _ => None,
        }
    }
}

impl Default for CommitPolicy {
    fn default() -> Self {
        CommitPolicy::Periodic { interval_ms: 300_000 }
    }
}

/// Near-real-time refresh settings for one partition
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RefreshConfig {
    /// Refresh at most this often while a caller waits for a generation
    pub min_stale_ms: u64,
    /// Refresh at least this often
    pub max_stale_ms: u64,
    /// Consecutive refresh failures tolerated before the partition is
    /// declared unavailable
    pub max_consecutive_failures: u32,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            min_stale_ms: 10,
            max_stale_ms: 500,
            max_consecutive_failures: 10,
        }
    }
}

impl RefreshConfig {
    pub fn min_stale(&self) -> Duration {
        Duration::from_millis(self.min_stale_ms)
    }

    pub fn max_stale(&self) -> Duration {
        Duration::from_millis(self.max_stale_ms.max(self.min_stale_ms))
    }
}

/// Settings for a single physical partition
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PartitionConfig {
    #[serde(default)]
    pub commit: CommitPolicy,
    /// Capacity of the write queue; submitters block when it is full
    pub queue_capacity: usize,
    /// How long close() waits for queued writes to drain
    pub drain_timeout_ms: u64,
    #[serde(default)]
    pub refresh: RefreshConfig,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            commit: CommitPolicy::default(),
            queue_capacity: 1024,
            drain_timeout_ms: 5_000,
            refresh: RefreshConfig::default(),
        }
    }
}

impl PartitionConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn with_commit(mut self, commit: CommitPolicy) -> Self {
        self.commit = commit;
        self
    }

    pub fn with_refresh(mut self, refresh: RefreshConfig) -> Self {
        self.refresh = refresh;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }
}

/// Full-text analyzer configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    pub lowercase: bool,
    pub min_token_length: usize,
    pub max_token_length: usize,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            lowercase: true,
            min_token_length: 1,
            max_token_length: 255,
        }
    }
}

/// How successive result pages are requested
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaginationType {
    /// Re-run with a larger limit and skip a prefix
    #[default]
    Offset,
    /// Resume each partition from its last returned position
    SearchAfter,
}

/// Top-level index configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Logical index name, e.g. "changes"
    pub name: String,
    /// Directory holding partition data; None keeps everything in memory
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    /// Directory holding the ready-state file
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
    #[serde(default)]
    pub open: PartitionConfig,
    #[serde(default)]
    pub closed: PartitionConfig,
    #[serde(default)]
    pub analyzer: AnalyzerConfig,
    /// Maximum number of clauses in one boolean query
    pub max_clause_count: usize,
    #[serde(default)]
    pub pagination: PaginationType,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            name: "changes".to_string(),
            data_dir: None,
            state_dir: None,
            open: PartitionConfig::default(),
            closed: PartitionConfig::default(),
            analyzer: AnalyzerConfig::default(),
            max_clause_count: 1024,
            pagination: PaginationType::Offset,
        }
    }
}

impl IndexConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)?;
        Ok(serde_json::from_slice(&data)?)
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = Some(dir.into());
        self
    }

    /// Apply the same partition settings to both partitions
    pub fn with_partition_config(mut self, config: PartitionConfig) -> Self {
        self.open = config.clone();
        self.closed = config;
        self
    }

    pub fn with_max_clause_count(mut self, limit: usize) -> Self {
        self.max_clause_count = limit;
        self
    }

    pub fn with_pagination(mut self, pagination: PaginationType) -> Self {
        self.pagination = pagination;
        self
    }

    /// Directory for one schema version of this index, e.g. `changes_0077`
    pub fn version_dir(&self, version: u32) -> Option<PathBuf> {
        self.data_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}_{:04}", self.name, version)))
    }
}
