use super::{IndexIterator, Indexer, SnapshotIterator};
use crate::data::log_record::LogRecordPos;
use crate::error::Result;

use parking_lot::RwLock;
use std::collections::BTreeMap;

/// The default backend: a balanced ordered map over key bytes. Reads run
/// concurrently; writes serialize on the lock. Best on small to medium
/// random keys.
pub struct BTreeIndex {
    tree: RwLock<BTreeMap<Vec<u8>, LogRecordPos>>,
}

impl BTreeIndex {
    pub fn new() -> Self {
        Self { tree: RwLock::new(BTreeMap::new()) }
    }
}

impl Indexer for BTreeIndex {
    fn put(&self, key: Vec<u8>, pos: LogRecordPos) -> Option<LogRecordPos> {
        self.tree.write().insert(key, pos)
    }

    fn get(&self, key: &[u8]) -> Option<LogRecordPos> {
        self.tree.read().get(key).copied()
    }

    fn delete(&self, key: &[u8]) -> Option<LogRecordPos> {
        self.tree.write().remove(key)
    }

    fn len(&self) -> usize {
        self.tree.read().len()
    }

    fn iterator(&self, reverse: bool) -> Box<dyn IndexIterator> {
        let items =
            self.tree.read().iter().map(|(key, pos)| (key.clone(), *pos)).collect::<Vec<_>>();
        Box::new(SnapshotIterator::new(items, reverse))
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}
