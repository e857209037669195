//! Persisted ready flags per index name and schema version
//!
//! The flags live in one JSON file outside the index directories so that a
//! version can be built in the background and only served once marked ready.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::Result;

const STATE_FILE: &str = "index_state.json";

/// Serializes read-modify-write cycles on state files within this process
static STATE_LOCK: Mutex<()> = parking_lot::const_mutex(());

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ReadyStates {
    indexes: BTreeMap<String, BTreeMap<u32, bool>>,
}

impl ReadyStates {
    /// Load the state file from `dir`; a missing file means nothing is ready
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(STATE_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = fs::read(&path)?;
        Ok(serde_json::from_slice(&data)?)
    }

    /// Write the state file atomically
    pub fn save(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;
        let tmp = dir.join(format!("{}.tmp", STATE_FILE));
        fs::write(&tmp, serde_json::to_vec_pretty(self)?)?;
        fs::rename(&tmp, dir.join(STATE_FILE))?;
        Ok(())
    }

    pub fn set_ready(&mut self, index: &str, version: u32, ready: bool) {
        self.indexes
            .entry(index.to_string())
            .or_default()
            .insert(version, ready);
    }

    pub fn is_ready(&self, index: &str, version: u32) -> bool {
        self.indexes
            .get(index)
            .and_then(|versions| versions.get(&version))
            .copied()
            .unwrap_or(false)
    }

    /// Ready versions of `index`, ascending
    pub fn ready_versions(&self, index: &str) -> Vec<u32> {
        self.indexes
            .get(index)
            .map(|versions| {
                versions
                    .iter()
                    .filter(|(_, ready)| **ready)
                    .map(|(v, _)| *v)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn latest_ready(&self, index: &str) -> Option<u32> {
        self.ready_versions(index).last().copied()
    }
}

/// Where an index keeps its ready flags
pub(crate) enum ReadyStore {
    File(PathBuf),
    Memory(Mutex<ReadyStates>),
}

impl ReadyStore {
    pub(crate) fn new(state_dir: Option<PathBuf>) -> Self {
        match state_dir {
            Some(dir) => ReadyStore::File(dir),
            None => ReadyStore::Memory(Mutex::new(ReadyStates::default())),
        }
    }

    pub(crate) fn set(&self, index: &str, version: u32, ready: bool) -> Result<()> {
        match self {
            ReadyStore::File(dir) => {
                let _lock = STATE_LOCK.lock();
                let mut states = ReadyStates::load(dir)?;
                states.set_ready(index, version, ready);
                states.save(dir)?;
            }
            ReadyStore::Memory(states) => states.lock().set_ready(index, version, ready),
        }
        info!(index, version, ready, "Updated index ready state");
        Ok(())
    }

    pub(crate) fn get(&self, index: &str, version: u32) -> Result<bool> {
        match self {
            ReadyStore::File(dir) => {
                let _lock = STATE_LOCK.lock();
                Ok(ReadyStates::load(dir)?.is_ready(index, version))
            }
            ReadyStore::Memory(states) => Ok(states.lock().is_ready(index, version)),
        }
    }
}
