use super::{IndexIterator, Indexer, SnapshotIterator};
use crate::data::log_record::{decode_log_record_pos, encode_log_record_pos, LogRecordPos};
use crate::error::Result;

use jammdb::{Data, DB};
use std::path::Path;

pub const BPTREE_INDEX_FILE_NAME: &str = "BPlusTree-index";
const BPTREE_BUCKET_NAME: &str = "bitcask-index";

/// Persistent backend: a transactional on-disk B+-tree holding the whole
/// index in a single bucket. It gives the index its own durability, so
/// startup does not replay data segments; the trade-off is a write
/// transaction per update.
pub struct BPlusTree {
    tree: DB,
}

impl BPlusTree {
    /// Opens (or creates) the index file under `dir`.
    pub fn open(dir: &Path) -> Result<BPlusTree> {
        let tree = DB::open(dir.join(BPTREE_INDEX_FILE_NAME))?;
        let tx = tree.tx(true)?;
        tx.get_or_create_bucket(BPTREE_BUCKET_NAME)?;
        tx.commit()?;
        Ok(BPlusTree { tree })
    }
}

// The Indexer contract has no error channel: a failing index update leaves
// the engine's view of the data undefined, so backend failures abort, as
// they do in the in-memory backends when the allocator fails.
impl Indexer for BPlusTree {
    fn put(&self, key: Vec<u8>, pos: LogRecordPos) -> Option<LogRecordPos> {
        let tx = self.tree.tx(true).expect("failed to begin index transaction");
        let bucket = tx.get_bucket(BPTREE_BUCKET_NAME).expect("index bucket missing");
        let old = bucket
            .get_kv(&key)
            .map(|kv| decode_log_record_pos(kv.value()).expect("stored position is valid"));
        bucket.put(key, encode_log_record_pos(&pos)).expect("failed to write index entry");
        tx.commit().expect("failed to commit index update");
        old
    }

    fn get(&self, key: &[u8]) -> Option<LogRecordPos> {
        let tx = self.tree.tx(false).expect("failed to begin index transaction");
        let bucket = tx.get_bucket(BPTREE_BUCKET_NAME).expect("index bucket missing");
        bucket
            .get_kv(key)
            .map(|kv| decode_log_record_pos(kv.value()).expect("stored position is valid"))
    }

    fn delete(&self, key: &[u8]) -> Option<LogRecordPos> {
        let tx = self.tree.tx(true).expect("failed to begin index transaction");
        let bucket = tx.get_bucket(BPTREE_BUCKET_NAME).expect("index bucket missing");
        let old = bucket
            .delete(key)
            .ok()
            .map(|kv| decode_log_record_pos(kv.value()).expect("stored position is valid"));
        tx.commit().expect("failed to commit index update");
        old
    }

    fn len(&self) -> usize {
        let tx = self.tree.tx(false).expect("failed to begin index transaction");
        let bucket = tx.get_bucket(BPTREE_BUCKET_NAME).expect("index bucket missing");
        bucket.cursor().count()
    }

    fn iterator(&self, reverse: bool) -> Box<dyn IndexIterator> {
        // A jammdb cursor borrows its transaction, so the iterator drains
        // one read transaction up front instead of holding it open. This
        // also gives seek the same >=/<= contract as the other backends.
        let tx = self.tree.tx(false).expect("failed to begin index transaction");
        let bucket = tx.get_bucket(BPTREE_BUCKET_NAME).expect("index bucket missing");
        let mut items = Vec::new();
        for data in bucket.cursor() {
            if let Data::KeyValue(kv) = data {
                let pos = decode_log_record_pos(kv.value()).expect("stored position is valid");
                items.push((kv.key().to_vec(), pos));
            }
        }
        Box::new(SnapshotIterator::new(items, reverse))
    }

    fn close(&self) -> Result<()> {
        // jammdb flushes on every commit; the file closes when the handle
        // drops with the engine.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(offset: u64) -> LogRecordPos {
        LogRecordPos { file_id: 3, offset, size: 48 }
    }

    #[test]
    fn survives_reopen() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("cask-bptree")?;

        let index = BPlusTree::open(dir.path())?;
        index.put(b"persisted".to_vec(), pos(0));
        index.put(b"dropped".to_vec(), pos(48));
        index.delete(b"dropped");
        index.close()?;
        drop(index);

        let index = BPlusTree::open(dir.path())?;
        assert_eq!(index.get(b"persisted"), Some(pos(0)));
        assert_eq!(index.get(b"dropped"), None);
        assert_eq!(index.len(), 1);
        Ok(())
    }

    #[test]
    fn iterator_sees_committed_entries() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("cask-bptree")?;
        let index = BPlusTree::open(dir.path())?;
        for (i, key) in [b"cc".to_vec(), b"aa".to_vec(), b"bb".to_vec()].iter().enumerate() {
            index.put(key.clone(), pos(i as u64 * 48));
        }

        let mut iter = index.iterator(false);
        let mut keys = vec![];
        while iter.valid() {
            keys.push(iter.key().to_vec());
            iter.next();
        }
        assert_eq!(keys, vec![b"aa".to_vec(), b"bb".to_vec(), b"cc".to_vec()]);

        let mut iter = index.iterator(true);
        iter.seek(b"bz");
        assert!(iter.valid());
        assert_eq!(iter.key(), b"bb");
        Ok(())
    }
}
