use std::collections::{BTreeMap, HashSet};
use std::io;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::common::types::now_millis;

/// One mirrored asset. `url` holds the canonical cache key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub url: String,
    pub local_path: PathBuf,
    pub last_used: u64,
}

impl CacheEntry {
    pub fn new(url: impl Into<String>, local_path: PathBuf) -> Self {
        Self {
            url: url.into(),
            local_path,
            last_used: now_millis(),
        }
    }
}

/// The persisted key -> entry table, serialized as a JSON array and
/// rewritten whole on every mutation. Writes are rare and the table stays
/// small (tens to low hundreds of entries), so an append log would buy
/// nothing here.
pub struct CacheIndex {
    path: PathBuf,
    entries: BTreeMap<String, CacheEntry>,
}

impl CacheIndex {
    /// Load the index from disk. A missing, unreadable or unparseable file
    /// yields an empty table; index corruption is never fatal.
    pub fn load(path: PathBuf) -> Self {
        let entries = match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<Vec<CacheEntry>>(&raw) {
                Ok(list) => list.into_iter().map(|e| (e.url.clone(), e)).collect(),
                Err(e) => {
                    warn!("Cache index {} is corrupt, starting empty: {}", path.display(), e);
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                warn!("Failed to read cache index {}: {}", path.display(), e);
                BTreeMap::new()
            }
        };

        Self { path, entries }
    }

    pub fn get(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    /// Upsert by key and persist immediately.
    pub fn put(&mut self, entry: CacheEntry) -> io::Result<()> {
        self.entries.insert(entry.url.clone(), entry);
        self.persist()
    }

    /// Remove by key and persist immediately.
    pub fn delete(&mut self, key: &str) -> io::Result<Option<CacheEntry>> {
        let removed = self.entries.remove(key);
        if removed.is_some() {
            self.persist()?;
        }
        Ok(removed)
    }

    pub fn keys(&self) -> HashSet<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn persist(&self) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let list: Vec<&CacheEntry> = self.entries.values().collect();
        let raw = serde_json::to_vec_pretty(&list)?;
        std::fs::write(&self.path, raw)
    }
}
