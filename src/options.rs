use crate::error::{Error, Result};

use std::path::PathBuf;

/// Engine configuration.
#[derive(Clone, Debug)]
pub struct Options {
    /// Directory holding the segment files, hint file, and directory lock.
    pub dir_path: PathBuf,

    /// Segment rotation threshold in bytes. A record that would push the
    /// active segment past this size triggers rotation first.
    pub data_file_size: u64,

    /// Fsync after every append. Safe but slow; most deployments rely on
    /// `bytes_per_sync` instead.
    pub sync_writes: bool,

    /// Fsync once this many bytes have been appended since the last sync.
    /// Zero disables the threshold.
    pub bytes_per_sync: usize,

    /// Scan segments through a read-only memory map while rebuilding the
    /// index at startup, then swap back to standard I/O.
    pub mmap_at_startup: bool,

    /// Which memory index backend to use.
    pub index_type: IndexType,

    /// Directory for the persistent B+-tree index file. Defaults to
    /// `dir_path` when unset. Ignored by the in-memory backends.
    pub index_path: Option<PathBuf>,

    /// A merge only runs when the rewritten data would fit on disk:
    /// available space times this ratio must cover the live data size.
    pub merge_space_ratio: f32,

    /// Reclaimable fraction of the directory that justifies a merge, taken
    /// together with `merge_min_size`.
    pub merge_ratio: f32,

    /// Smallest reclaimable byte count worth merging for.
    pub merge_min_size: u64,

    /// Reclaimable byte count beyond which a merge runs regardless of the
    /// ratio.
    pub merge_max_size: u64,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            dir_path: std::env::temp_dir().join("cask-data"),
            data_file_size: 256 * 1024 * 1024,
            sync_writes: false,
            bytes_per_sync: 0,
            mmap_at_startup: false,
            index_type: IndexType::BTree,
            index_path: None,
            merge_space_ratio: 0.95,
            merge_ratio: 0.3,
            merge_min_size: 32 * 1024 * 1024,
            merge_max_size: 256 * 1024 * 1024,
        }
    }
}

impl Options {
    /// Rejects configurations the engine cannot open with.
    pub(crate) fn validate(&self) -> Result<()> {
        match self.dir_path.to_str() {
            None | Some("") => return Err(Error::DataDirNameIncorrect),
            Some(_) => {}
        }
        if self.data_file_size == 0 {
            return Err(Error::DataFileSizeTooSmall);
        }
        if !(0.0..=1.0).contains(&self.merge_ratio) {
            return Err(Error::InvalidMergeRatio);
        }
        Ok(())
    }
}

/// Memory index backends. See the `index` module for the trade-offs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexType {
    /// Balanced ordered map held in memory. The default.
    BTree,
    /// Adaptive radix tree; shines on many long prefixed keys.
    AdaptiveRadix,
    /// Transactional on-disk B+-tree. Restart time no longer grows with
    /// database size, at the cost of slower updates.
    BPlusTree,
}

/// Iteration configuration for [`crate::Engine::iter`].
#[derive(Clone, Debug, Default)]
pub struct IteratorOptions {
    /// Only yield keys starting with this byte prefix. Empty matches all.
    pub prefix: Vec<u8>,
    /// Iterate in reverse lexicographic order.
    pub reverse: bool,
}

/// Write batch configuration.
#[derive(Clone, Copy, Debug)]
pub struct WriteBatchOptions {
    /// Largest number of staged records a single commit will accept.
    pub max_batch_num: usize,
    /// Fsync the active segment after the commit terminator is written.
    pub sync_writes: bool,
}

impl Default for WriteBatchOptions {
    fn default() -> Self {
        Self { max_batch_num: 10_000, sync_writes: true }
    }
}
