use crate::db::Engine;
use crate::error::Result;
use crate::index::IndexIterator;
use crate::options::IteratorOptions;

use parking_lot::RwLock;

/// An engine-level iterator: walks the index in key order (optionally
/// reversed, optionally filtered to a byte prefix) and resolves values
/// through the read path on demand. It owns an index snapshot, released on
/// drop; writes made after construction are not visible through it.
pub struct Iterator<'a> {
    index_iter: RwLock<Box<dyn IndexIterator>>,
    engine: &'a Engine,
    options: IteratorOptions,
}

impl Engine {
    /// Opens an iterator over the engine.
    pub fn iter(&self, options: IteratorOptions) -> Iterator<'_> {
        let iter = Iterator {
            index_iter: RwLock::new(self.index.iterator(options.reverse)),
            engine: self,
            options,
        };
        iter.skip_to_next();
        iter
    }
}

impl Iterator<'_> {
    /// Returns to the first matching entry.
    pub fn rewind(&self) {
        self.index_iter.write().rewind();
        self.skip_to_next();
    }

    /// Positions at the first matching key `>=` the target (or `<=` when
    /// reversed).
    pub fn seek(&self, key: &[u8]) {
        self.index_iter.write().seek(key);
        self.skip_to_next();
    }

    /// Advances to the next matching entry.
    pub fn next(&self) {
        self.index_iter.write().next();
        self.skip_to_next();
    }

    /// Whether the iterator points at an entry.
    pub fn valid(&self) -> bool {
        self.index_iter.read().valid()
    }

    /// The current key. Must only be called while `valid` holds.
    pub fn key(&self) -> Vec<u8> {
        self.index_iter.read().key().to_vec()
    }

    /// The current value, read from its segment. Must only be called while
    /// `valid` holds.
    pub fn value(&self) -> Result<Vec<u8>> {
        let pos = self.index_iter.read().value();
        self.engine.get_value_by_position(&pos)
    }

    /// Skips forward until the current key carries the configured prefix,
    /// or the iterator runs out.
    fn skip_to_next(&self) {
        if self.options.prefix.is_empty() {
            return;
        }
        let mut index_iter = self.index_iter.write();
        while index_iter.valid() {
            if index_iter.key().starts_with(&self.options.prefix) {
                break;
            }
            index_iter.next();
        }
    }
}
