mod art;
mod bptree;
mod btree;

use crate::data::log_record::LogRecordPos;
use crate::error::Result;
use crate::options::IndexType;

use std::path::Path;

/// The in-memory key index: maps each live user key to the position of its
/// most recent record. Implementations are individually thread-safe; the
/// engine layers its own write discipline on top.
pub trait Indexer: Send + Sync {
    /// Inserts or replaces a key, returning the position it displaced.
    fn put(&self, key: Vec<u8>, pos: LogRecordPos) -> Option<LogRecordPos>;

    /// Looks up a key's position.
    fn get(&self, key: &[u8]) -> Option<LogRecordPos>;

    /// Removes a key, returning its position if it was present.
    fn delete(&self, key: &[u8]) -> Option<LogRecordPos>;

    /// Number of live keys.
    fn len(&self) -> usize;

    /// Ordered iterator over the index. The iterator owns a snapshot (or a
    /// read transaction) and releases it on drop.
    fn iterator(&self, reverse: bool) -> Box<dyn IndexIterator>;

    /// Flushes and releases backend resources. In-memory backends are a
    /// no-op.
    fn close(&self) -> Result<()>;
}

/// Ordered iteration over `(key, position)` pairs. Forward order is
/// lexicographic on key bytes; reverse flips it. `key` and `value` must
/// only be called while `valid` holds.
pub trait IndexIterator: Send {
    /// Returns to the first entry.
    fn rewind(&mut self);

    /// Positions at the first key `>=` the target (forward) or `<=` it
    /// (reverse).
    fn seek(&mut self, key: &[u8]);

    /// Advances to the next entry.
    fn next(&mut self);

    /// Whether the iterator currently points at an entry.
    fn valid(&self) -> bool;

    fn key(&self) -> &[u8];

    fn value(&self) -> LogRecordPos;
}

/// Opens the configured index backend. `index_dir` is only used by the
/// persistent backend, which keeps its file there.
pub fn new_indexer(index_type: IndexType, index_dir: &Path) -> Result<Box<dyn Indexer>> {
    match index_type {
        IndexType::BTree => Ok(Box::new(btree::BTreeIndex::new())),
        IndexType::AdaptiveRadix => Ok(Box::new(art::AdaptiveRadixTree::new())),
        IndexType::BPlusTree => Ok(Box::new(bptree::BPlusTree::open(index_dir)?)),
    }
}

/// Iterator over entries materialized into a sorted array. All backends
/// iterate this way: the in-memory trees snapshot under their read lock,
/// and the persistent tree drains one read transaction up front so the
/// iterator does not have to keep the transaction alive.
pub(crate) struct SnapshotIterator {
    /// Sorted ascending, or descending when `reverse` is set.
    items: Vec<(Vec<u8>, LogRecordPos)>,
    current: usize,
    reverse: bool,
}

impl SnapshotIterator {
    pub(crate) fn new(mut items: Vec<(Vec<u8>, LogRecordPos)>, reverse: bool) -> Self {
        if reverse {
            items.reverse();
        }
        Self { items, current: 0, reverse }
    }
}

impl IndexIterator for SnapshotIterator {
    fn rewind(&mut self) {
        self.current = 0;
    }

    fn seek(&mut self, key: &[u8]) {
        self.current = if self.reverse {
            self.items.partition_point(|(k, _)| k.as_slice() > key)
        } else {
            self.items.partition_point(|(k, _)| k.as_slice() < key)
        };
    }

    fn next(&mut self) {
        self.current += 1;
    }

    fn valid(&self) -> bool {
        self.current < self.items.len()
    }

    fn key(&self) -> &[u8] {
        &self.items[self.current].0
    }

    fn value(&self) -> LogRecordPos {
        self.items[self.current].1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn pos(file_id: u32, offset: u64) -> LogRecordPos {
        LogRecordPos { file_id, offset, size: 16 }
    }

    /// Exercises the full `Indexer` contract against any backend.
    fn contract(index: &dyn Indexer) {
        assert_eq!(index.len(), 0);
        assert_eq!(index.get(b"absent"), None);
        assert_eq!(index.delete(b"absent"), None);

        assert_eq!(index.put(b"banana".to_vec(), pos(1, 0)), None);
        assert_eq!(index.put(b"apple".to_vec(), pos(1, 16)), None);
        assert_eq!(index.put(b"cherry".to_vec(), pos(1, 32)), None);
        assert_eq!(index.len(), 3);

        // Replacement returns the displaced position.
        assert_eq!(index.put(b"banana".to_vec(), pos(2, 0)), Some(pos(1, 0)));
        assert_eq!(index.get(b"banana"), Some(pos(2, 0)));
        assert_eq!(index.len(), 3);

        assert_eq!(index.delete(b"apple"), Some(pos(1, 16)));
        assert_eq!(index.get(b"apple"), None);
        assert_eq!(index.len(), 2);

        // Forward iteration is ordered on key bytes.
        let mut iter = index.iterator(false);
        let mut keys = vec![];
        while iter.valid() {
            keys.push(iter.key().to_vec());
            iter.next();
        }
        assert_eq!(keys, vec![b"banana".to_vec(), b"cherry".to_vec()]);

        // Reverse iteration flips the order.
        let mut iter = index.iterator(true);
        assert!(iter.valid());
        assert_eq!(iter.key(), b"cherry");
        iter.next();
        assert_eq!(iter.key(), b"banana");
        iter.next();
        assert!(!iter.valid());

        // Forward seek lands on the first key >= the target.
        let mut iter = index.iterator(false);
        iter.seek(b"bb");
        assert!(iter.valid());
        assert_eq!(iter.key(), b"cherry");
        iter.seek(b"banana");
        assert_eq!(iter.key(), b"banana");
        iter.seek(b"zzz");
        assert!(!iter.valid());

        // Reverse seek lands on the first key <= the target.
        let mut iter = index.iterator(true);
        iter.seek(b"bb");
        assert!(iter.valid());
        assert_eq!(iter.key(), b"banana");
        iter.seek(b"a");
        assert!(!iter.valid());

        // Rewind restarts from the first entry.
        iter.rewind();
        assert!(iter.valid());
        assert_eq!(iter.key(), b"cherry");

        assert!(index.close().is_ok());
    }

    #[test]
    fn btree_contract() {
        contract(&super::btree::BTreeIndex::new());
    }

    #[test]
    fn art_contract() {
        contract(&super::art::AdaptiveRadixTree::new());
    }

    #[test]
    fn bptree_contract() -> Result<()> {
        let dir = TempDir::with_prefix("cask-index")?;
        contract(&super::bptree::BPlusTree::open(dir.path())?);
        Ok(())
    }

    #[test]
    fn factory_opens_each_backend() -> Result<()> {
        let dir = TempDir::with_prefix("cask-index")?;
        for index_type in [IndexType::BTree, IndexType::AdaptiveRadix, IndexType::BPlusTree] {
            let index = new_indexer(index_type, dir.path())?;
            index.put(b"key".to_vec(), pos(0, 0));
            assert_eq!(index.get(b"key"), Some(pos(0, 0)));
        }
        Ok(())
    }

    #[test]
    fn snapshot_iterator_on_empty_index() {
        let mut iter = SnapshotIterator::new(vec![], false);
        assert!(!iter.valid());
        iter.rewind();
        assert!(!iter.valid());
        iter.seek(b"anything");
        assert!(!iter.valid());
    }
}
