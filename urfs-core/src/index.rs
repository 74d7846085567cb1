use crate::types::{FileInfo, FileRecord};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A directory replica's view of stored files, keyed by content hash.
/// Inserts are upserts that keep the first record seen for a hash, so replays
/// and duplicate deliveries leave the index unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileIndex {
    records: HashMap<String, FileRecord>,
}

/// Index shared by every task of one replica. All reads and writes go through
/// the one lock.
pub type SharedIndex = Arc<RwLock<FileIndex>>;

impl FileIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedIndex {
        Arc::new(RwLock::new(Self::new()))
    }

    /// Returns true if the record was not yet known.
    pub fn insert(&mut self, record: FileRecord) -> bool {
        if self.records.contains_key(&record.hash) {
            return false;
        }
        self.records.insert(record.hash.clone(), record);
        true
    }

    /// Remove the record for `removed.hash`, but only when it is indexed on
    /// the same storage node the removal came from. Returns the removed
    /// record.
    pub fn remove(&mut self, removed: &FileRecord) -> Option<FileRecord> {
        let owned = self
            .records
            .get(&removed.hash)
            .is_some_and(|record| record.storage_node.node_id == removed.storage_node.node_id);
        if !owned {
            return None;
        }
        self.records.remove(&removed.hash)
    }

    pub fn get(&self, hash: &str) -> Option<&FileRecord> {
        self.records.get(hash)
    }

    pub fn contains_hash(&self, hash: &str) -> bool {
        self.records.contains_key(hash)
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.records.values().any(|record| record.name == name)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn file_infos(&self) -> Vec<FileInfo> {
        self.records.values().map(FileRecord::info).collect()
    }

    pub fn records(&self) -> Vec<FileRecord> {
        self.records.values().cloned().collect()
    }

    pub fn load_by_node(&self) -> HashMap<String, usize> {
        let mut load = HashMap::new();
        for record in self.records.values() {
            *load.entry(record.storage_node.node_id.clone()).or_insert(0) += 1;
        }
        load
    }
}
