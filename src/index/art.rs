use super::{IndexIterator, Indexer, SnapshotIterator};
use crate::data::log_record::LogRecordPos;
use crate::error::Result;

use art_tree::{Art, ByteString};
use parking_lot::RwLock;

/// Adaptive-radix-tree backend. Same contract as the ordered map, but path
/// compression makes it the better fit for many long keys sharing
/// prefixes. Iteration materializes a sorted snapshot via an in-order
/// traversal, like the ordered backends.
pub struct AdaptiveRadixTree {
    inner: RwLock<Inner>,
}

struct Inner {
    /// The stored pair carries the key bytes so snapshots and lookups
    /// never have to read them back out of the radix keys.
    tree: Art<ByteString, (Vec<u8>, LogRecordPos)>,
    /// The tree does not track its entry count.
    len: usize,
}

// `Art` is marked `!Send`/`!Sync` by the upstream crate purely via a
// `PhantomData<Rc<K>>` marker (it holds no actual `Rc`). Access is always
// mediated by `RwLock`, which provides the synchronization the marker is
// conservatively guarding against.
unsafe impl Send for Inner {}
unsafe impl Sync for Inner {}

impl AdaptiveRadixTree {
    pub fn new() -> Self {
        Self { inner: RwLock::new(Inner { tree: Art::new(), len: 0 }) }
    }
}

impl Indexer for AdaptiveRadixTree {
    fn put(&self, key: Vec<u8>, pos: LogRecordPos) -> Option<LogRecordPos> {
        let mut inner = self.inner.write();
        let radix_key = ByteString::new(&key);
        let old = inner.tree.get(&radix_key).map(|pair| pair.1);
        inner.tree.upsert(radix_key, (key, pos));
        if old.is_none() {
            inner.len += 1;
        }
        old
    }

    fn get(&self, key: &[u8]) -> Option<LogRecordPos> {
        self.inner.read().tree.get(&ByteString::new(key)).map(|pair| pair.1)
    }

    fn delete(&self, key: &[u8]) -> Option<LogRecordPos> {
        let mut inner = self.inner.write();
        match inner.tree.remove(&ByteString::new(key)) {
            Some((_, pos)) => {
                inner.len -= 1;
                Some(pos)
            }
            None => None,
        }
    }

    fn len(&self) -> usize {
        self.inner.read().len
    }

    fn iterator(&self, reverse: bool) -> Box<dyn IndexIterator> {
        let inner = self.inner.read();
        let items =
            inner.tree.iter().map(|(_, pair)| (pair.0.clone(), pair.1)).collect::<Vec<_>>();
        Box::new(SnapshotIterator::new(items, reverse))
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}
