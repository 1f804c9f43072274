use crate::batch::{log_record_key_with_seq, parse_log_record_key, NON_TXN_SEQ_NO};
use crate::data::data_file::{
    DataFile, ReadLogRecord, DATA_FILE_NAME_PREFIX, DATA_FILE_NAME_SUFFIX, HINT_FILE_NAME,
    MERGE_FINISHED_FILE_NAME, SEQ_NO_FILE_NAME,
};
use crate::data::log_record::{
    decode_log_record_pos, LogRecord, LogRecordPos, LogRecordType, TransactionRecord,
};
use crate::error::{Error, Result};
use crate::fio::IoType;
use crate::index::{self, Indexer};
use crate::merge;
use crate::options::{IndexType, Options};
use crate::util;

use fs4::fs_std::FileExt;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

const INITIAL_FILE_ID: u32 = 0;
pub(crate) const FILE_LOCK_NAME: &str = "flock";
const SEQ_NO_KEY: &[u8] = b"seq.no";

/// A Bitcask-style storage engine: an append-only log sharded across
/// fixed-size segment files, with an in-memory index mapping each live key
/// to the position of its most recent value. See:
/// https://riak.com/assets/bitcask-intro.pdf
///
/// Every write appends a framed, checksummed record to the single active
/// segment; once the segment reaches the configured size it is sealed and
/// a new one opens. Deletes append a tombstone. The index is rebuilt on
/// open by replaying the segments in file-id order, accelerated by the
/// hint file a merge leaves behind, or skipped entirely when the
/// persistent B+-tree backend keeps the index on disk itself.
///
/// Replaced and deleted records make segments grow stale; their byte count
/// is tracked and a merge rewrites the surviving records into a fresh
/// generation next to the data directory, adopted on the next open.
///
/// The engine is single-writer, multi-reader: appends serialize on the
/// active segment's lock, batch commits on a commit lock, and a directory
/// flock keeps other processes out entirely.
impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine").field("options", &self.options).finish_non_exhaustive()
    }
}

pub struct Engine {
    pub(crate) options: Arc<Options>,
    /// The one writable segment.
    pub(crate) active_file: RwLock<DataFile>,
    /// Sealed segments by file id, read-only.
    pub(crate) older_files: RwLock<HashMap<u32, DataFile>>,
    pub(crate) index: Box<dyn Indexer>,
    /// Segment ids found at open, ascending; used only for the replay.
    file_ids: Vec<u32>,
    /// Serializes batch commits (the engine-wide write discipline).
    pub(crate) batch_commit_lock: Mutex<()>,
    /// Monotone batch sequence counter; zero marks non-batched records.
    pub(crate) seq_no: AtomicU64,
    /// Held for the duration of a merge; try-locked to reject overlap.
    pub(crate) merging_lock: Mutex<()>,
    /// Whether the sequence counter could be restored at open. Only
    /// relevant to the persistent index backend, which skips the replay
    /// that would otherwise recover it.
    pub(crate) seq_file_exists: bool,
    /// Whether the data directory was empty (or absent) at open.
    pub(crate) is_initial: bool,
    lock_file: File,
    /// Bytes appended since the last fsync, for the bytes-per-sync policy.
    bytes_written: AtomicUsize,
    /// Stale bytes on disk (replaced values, tombstones) a merge would
    /// reclaim.
    pub(crate) reclaim_size: AtomicU64,
}

/// A point-in-time summary of the engine, from [`Engine::stat`].
#[derive(Clone, Debug)]
pub struct Stat {
    /// Live keys in the index.
    pub key_num: usize,
    /// Segment files, including the active one.
    pub data_file_num: usize,
    /// Bytes a merge would reclaim.
    pub reclaimable_size: u64,
    /// Total bytes under the data directory.
    pub disk_size: u64,
}

impl Engine {
    /// Opens an engine on the configured directory, creating it if needed,
    /// and rebuilds the key index. Fails with `DatabaseIsUsing` if another
    /// process holds the directory.
    pub fn open(options: Options) -> Result<Self> {
        options.validate()?;
        let options = Arc::new(options);
        let dir_path = &options.dir_path;

        let mut is_initial = false;
        if !dir_path.is_dir() {
            is_initial = true;
            fs::create_dir_all(dir_path)?;
        }

        let lock_file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(dir_path.join(FILE_LOCK_NAME))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(Error::DatabaseIsUsing);
        }

        // A directory holding nothing but our own lock file is fresh too.
        let occupied = fs::read_dir(dir_path)?
            .flatten()
            .any(|entry| entry.file_name() != FILE_LOCK_NAME);
        if !occupied {
            is_initial = true;
        }

        // Adopt a completed merge before looking at the segments.
        merge::load_merge_files(dir_path)?;

        let startup_io =
            if options.mmap_at_startup { IoType::MemoryMap } else { IoType::Standard };
        let mut data_files = load_data_files(dir_path, startup_io)?;
        let file_ids = data_files.iter().map(DataFile::file_id).collect::<Vec<_>>();

        let active_file = match data_files.pop() {
            Some(file) => file,
            None => DataFile::new(dir_path, INITIAL_FILE_ID, IoType::Standard)?,
        };
        let older_files =
            data_files.into_iter().map(|file| (file.file_id(), file)).collect::<HashMap<_, _>>();

        let index_dir = options.index_path.clone().unwrap_or_else(|| dir_path.clone());
        fs::create_dir_all(&index_dir)?;

        let mut engine = Self {
            active_file: RwLock::new(active_file),
            older_files: RwLock::new(older_files),
            index: index::new_indexer(options.index_type, &index_dir)?,
            options,
            file_ids,
            batch_commit_lock: Mutex::new(()),
            seq_no: AtomicU64::new(0),
            merging_lock: Mutex::new(()),
            seq_file_exists: false,
            is_initial,
            lock_file,
            bytes_written: AtomicUsize::new(0),
            reclaim_size: AtomicU64::new(0),
        };

        if engine.options.index_type == IndexType::BPlusTree {
            // The index is already authoritative; only the sequence
            // counter and the append offset need restoring.
            let (seq_file_exists, seq_no) = engine.load_seq_no()?;
            if seq_file_exists {
                engine.seq_no.store(seq_no, Ordering::SeqCst);
                engine.seq_file_exists = true;
            }
            let mut active = engine.active_file.write();
            let size = active.file_size()?;
            active.set_write_off(size);
            drop(active);
            engine.repair_index_after_merge()?;
        } else {
            engine.load_index_from_hint_file()?;
            let current_seq_no = engine.load_index_from_data_files()?;
            engine.seq_no.store(current_seq_no, Ordering::SeqCst);
            if engine.options.mmap_at_startup {
                engine.reset_io_type()?;
            }
        }

        log::info!(
            "opened database {} with {} live keys across {} segment(s)",
            engine.options.dir_path.display(),
            engine.index.len(),
            engine.file_ids.len().max(1),
        );
        Ok(engine)
    }

    /// Stores a key-value pair, replacing any existing value.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::KeyIsEmpty);
        }

        let record = LogRecord {
            key: log_record_key_with_seq(key, NON_TXN_SEQ_NO),
            value: value.to_vec(),
            rec_type: LogRecordType::Normal,
        };
        let pos = self.append_log_record(&record)?;

        if let Some(old) = self.index.put(key.to_vec(), pos) {
            self.reclaim_size.fetch_add(old.size as u64, Ordering::SeqCst);
        }
        Ok(())
    }

    /// Reads the value most recently stored for `key`.
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        if key.is_empty() {
            return Err(Error::KeyIsEmpty);
        }
        let pos = self.index.get(key).ok_or(Error::KeyNotFound)?;
        self.get_value_by_position(&pos)
    }

    /// Removes `key`. Deleting an absent key succeeds.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::KeyIsEmpty);
        }
        if self.index.get(key).is_none() {
            return Ok(());
        }

        let record = LogRecord {
            key: log_record_key_with_seq(key, NON_TXN_SEQ_NO),
            value: Vec::new(),
            rec_type: LogRecordType::Deleted,
        };
        let pos = self.append_log_record(&record)?;
        // The tombstone itself is reclaimable the moment it lands.
        self.reclaim_size.fetch_add(pos.size as u64, Ordering::SeqCst);

        match self.index.delete(key) {
            Some(old) => {
                self.reclaim_size.fetch_add(old.size as u64, Ordering::SeqCst);
                Ok(())
            }
            None => Err(Error::IndexUpdateFailed),
        }
    }

    /// All live user keys, in forward iterator order.
    pub fn list_keys(&self) -> Result<Vec<Vec<u8>>> {
        let mut iter = self.index.iterator(false);
        let mut keys = Vec::with_capacity(self.index.len());
        while iter.valid() {
            keys.push(iter.key().to_vec());
            iter.next();
        }
        Ok(keys)
    }

    /// Calls `f(key, value)` for each live pair in forward key order,
    /// stopping early when `f` returns false.
    pub fn fold<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(&[u8], Vec<u8>) -> bool,
    {
        let mut iter = self.index.iterator(false);
        while iter.valid() {
            let value = self.get_value_by_position(&iter.value())?;
            if !f(iter.key(), value) {
                break;
            }
            iter.next();
        }
        Ok(())
    }

    /// Engine statistics: live keys, segment count, reclaimable bytes, and
    /// bytes on disk.
    pub fn stat(&self) -> Result<Stat> {
        let older_files = self.older_files.read();
        Ok(Stat {
            key_num: self.index.len(),
            data_file_num: older_files.len() + 1,
            reclaimable_size: self.reclaim_size.load(Ordering::SeqCst),
            disk_size: util::dir_disk_size(&self.options.dir_path)?,
        })
    }

    /// Copies the database to `dir`, leaving the directory lock behind so
    /// the copy can be opened independently.
    pub fn backup(&self, dir: &Path) -> Result<()> {
        util::copy_dir(&self.options.dir_path, dir, &[FILE_LOCK_NAME])
    }

    /// Fsyncs the active segment.
    pub fn sync(&self) -> Result<()> {
        self.active_file.read().sync()
    }

    /// Flushes everything and releases the directory lock. Also invoked on
    /// drop; closing twice is harmless.
    pub fn close(&self) -> Result<()> {
        if !self.options.dir_path.is_dir() {
            return Ok(());
        }

        // Persist the sequence counter: the persistent index backend skips
        // the replay that would otherwise restore it at next open.
        let seq_no_path = self.options.dir_path.join(SEQ_NO_FILE_NAME);
        if seq_no_path.is_file() {
            fs::remove_file(&seq_no_path)?;
        }
        let record = LogRecord {
            key: SEQ_NO_KEY.to_vec(),
            value: self.seq_no.load(Ordering::SeqCst).to_string().into_bytes(),
            rec_type: LogRecordType::Normal,
        };
        let mut seq_no_file = DataFile::seq_no_file(&self.options.dir_path)?;
        seq_no_file.write(&record.encode())?;
        seq_no_file.sync()?;

        let active = self.active_file.read();
        active.sync()?;
        active.close()?;
        drop(active);
        for file in self.older_files.read().values() {
            file.close()?;
        }

        self.index.close()?;
        let _ = self.lock_file.unlock();
        Ok(())
    }

    /// Appends a record to the active segment, rotating first if it would
    /// overflow, and applies the durability policy. Returns where the
    /// record landed.
    pub(crate) fn append_log_record(&self, record: &LogRecord) -> Result<LogRecordPos> {
        let dir_path = &self.options.dir_path;
        let encoded = record.encode();

        let mut active = self.active_file.write();
        if active.write_off() + encoded.len() as u64 > self.options.data_file_size {
            active.sync()?;
            let sealed_id = active.file_id();
            // The sealed segment moves to the read-only set under a fresh
            // handle; the active slot gets the next id.
            let mut older_files = self.older_files.write();
            older_files.insert(sealed_id, DataFile::new(dir_path, sealed_id, IoType::Standard)?);
            drop(older_files);
            *active = DataFile::new(dir_path, sealed_id + 1, IoType::Standard)?;
        }

        let write_off = active.write_off();
        active.write(&encoded)?;

        let mut need_sync = self.options.sync_writes;
        let written = self.bytes_written.fetch_add(encoded.len(), Ordering::SeqCst) + encoded.len();
        if !need_sync && self.options.bytes_per_sync > 0 && written >= self.options.bytes_per_sync {
            need_sync = true;
        }
        if need_sync {
            active.sync()?;
            self.bytes_written.store(0, Ordering::SeqCst);
        }

        Ok(LogRecordPos {
            file_id: active.file_id(),
            offset: write_off,
            size: encoded.len() as u32,
        })
    }

    /// Resolves a position to its record's value. A tombstone here means
    /// the index briefly outran a concurrent delete; report not-found.
    pub(crate) fn get_value_by_position(&self, pos: &LogRecordPos) -> Result<Vec<u8>> {
        let active = self.active_file.read();
        let record = if active.file_id() == pos.file_id {
            active.read_log_record(pos.offset)?.record
        } else {
            let older_files = self.older_files.read();
            match older_files.get(&pos.file_id) {
                Some(file) => file.read_log_record(pos.offset)?.record,
                None => return Err(Error::DataFileNotFound),
            }
        };

        if record.rec_type == LogRecordType::Deleted {
            return Err(Error::KeyNotFound);
        }
        Ok(record.value)
    }

    /// Loads the hint file a past merge produced, if any: each record maps
    /// a user key straight to an encoded position, skipping the expensive
    /// segment replay for the merged generation.
    fn load_index_from_hint_file(&self) -> Result<()> {
        let hint_path = self.options.dir_path.join(HINT_FILE_NAME);
        if !hint_path.is_file() {
            return Ok(());
        }

        let hint_file = DataFile::hint_file(&self.options.dir_path)?;
        let mut offset = 0;
        loop {
            let ReadLogRecord { record, size } = match hint_file.read_log_record(offset) {
                Ok(read) => read,
                Err(Error::ReadDataFileEof) => break,
                Err(err) => return Err(err),
            };
            let pos = decode_log_record_pos(&record.value)?;
            self.index.put(record.key, pos);
            offset += size;
        }
        Ok(())
    }

    /// Replays segments in ascending file-id order, rebuilding the index.
    /// Segments older than the last merge boundary are covered by the hint
    /// file and skipped. Batch records are buffered per sequence number
    /// and only applied when the terminator shows up; buffers that never
    /// see one are dropped, which is exactly the crash semantics batches
    /// promise. Returns the highest sequence number observed.
    fn load_index_from_data_files(&self) -> Result<u64> {
        let mut current_seq_no = NON_TXN_SEQ_NO;
        if self.file_ids.is_empty() {
            return Ok(current_seq_no);
        }

        let mut non_merge_fid = 0;
        if self.options.dir_path.join(MERGE_FINISHED_FILE_NAME).is_file() {
            non_merge_fid = merge::non_merge_file_id(&self.options.dir_path)?;
        }

        let mut pending_batches: HashMap<u64, Vec<TransactionRecord>> = HashMap::new();
        let active_file_id = self.active_file.read().file_id();
        let mut active_offset = 0;

        for (i, file_id) in self.file_ids.iter().enumerate() {
            if *file_id < non_merge_fid {
                continue;
            }

            let mut offset = 0;
            loop {
                let read_result = if *file_id == active_file_id {
                    self.active_file.read().read_log_record(offset)
                } else {
                    let older_files = self.older_files.read();
                    let file = older_files.get(file_id).ok_or(Error::DataFileNotFound)?;
                    file.read_log_record(offset)
                };
                let ReadLogRecord { record, size } = match read_result {
                    Ok(read) => read,
                    Err(Error::ReadDataFileEof) => break,
                    Err(err) => return Err(err),
                };

                let pos = LogRecordPos { file_id: *file_id, offset, size: size as u32 };
                let (user_key, seq_no) = parse_log_record_key(&record.key)?;

                if seq_no == NON_TXN_SEQ_NO {
                    self.update_index(user_key, record.rec_type, pos);
                } else if record.rec_type == LogRecordType::TxnFinished {
                    if let Some(records) = pending_batches.remove(&seq_no) {
                        for txn_record in records {
                            self.update_index(
                                txn_record.record.key,
                                txn_record.record.rec_type,
                                txn_record.pos,
                            );
                        }
                    }
                } else {
                    pending_batches.entry(seq_no).or_default().push(TransactionRecord {
                        record: LogRecord {
                            key: user_key,
                            value: record.value,
                            rec_type: record.rec_type,
                        },
                        pos,
                    });
                }

                current_seq_no = current_seq_no.max(seq_no);
                offset += size;
            }

            if i == self.file_ids.len() - 1 {
                active_offset = offset;
            }
        }

        self.active_file.write().set_write_off(active_offset);
        Ok(current_seq_no)
    }

    /// Applies one replayed record to the index, with the same reclaim
    /// bookkeeping the live write path does.
    fn update_index(&self, key: Vec<u8>, rec_type: LogRecordType, pos: LogRecordPos) {
        match rec_type {
            LogRecordType::Normal => {
                if let Some(old) = self.index.put(key, pos) {
                    self.reclaim_size.fetch_add(old.size as u64, Ordering::SeqCst);
                }
            }
            LogRecordType::Deleted => {
                let mut reclaimed = pos.size as u64;
                if let Some(old) = self.index.delete(&key) {
                    reclaimed += old.size as u64;
                }
                self.reclaim_size.fetch_add(reclaimed, Ordering::SeqCst);
            }
            LogRecordType::TxnFinished => {}
        }
    }

    /// After a merge is adopted, entries in the persistent index still
    /// point into the rewritten generation. The hint file has the new
    /// positions; apply it to every entry that is demonstrably stale.
    /// Entries at or past the merge boundary were written after the merge
    /// snapshot and win over their hint entry.
    fn repair_index_after_merge(&self) -> Result<()> {
        let dir_path = &self.options.dir_path;
        if !dir_path.join(MERGE_FINISHED_FILE_NAME).is_file()
            || !dir_path.join(HINT_FILE_NAME).is_file()
        {
            return Ok(());
        }
        let non_merge_fid = merge::non_merge_file_id(dir_path)?;

        let hint_file = DataFile::hint_file(dir_path)?;
        let mut offset = 0;
        loop {
            let ReadLogRecord { record, size } = match hint_file.read_log_record(offset) {
                Ok(read) => read,
                Err(Error::ReadDataFileEof) => break,
                Err(err) => return Err(err),
            };
            if let Some(existing) = self.index.get(&record.key) {
                if existing.file_id < non_merge_fid {
                    let pos = decode_log_record_pos(&record.value)?;
                    self.index.put(record.key, pos);
                }
            }
            offset += size;
        }
        Ok(())
    }

    /// Reads and consumes the sequence-number file, if present.
    fn load_seq_no(&self) -> Result<(bool, u64)> {
        let path = self.options.dir_path.join(SEQ_NO_FILE_NAME);
        if !path.is_file() {
            return Ok((false, 0));
        }

        let seq_no_file = DataFile::seq_no_file(&self.options.dir_path)?;
        let record = seq_no_file.read_log_record(0)?.record;
        let seq_no = String::from_utf8(record.value)
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .ok_or(Error::CorruptedRecord)?;

        // Consume the file so a crash before the next close cannot replay
        // a stale counter.
        fs::remove_file(path)?;
        Ok((true, seq_no))
    }

    /// Swaps every segment from the startup memory map back to standard
    /// I/O.
    fn reset_io_type(&self) -> Result<()> {
        let dir_path = &self.options.dir_path;
        self.active_file.write().set_io_manager(dir_path, IoType::Standard)?;
        for file in self.older_files.write().values_mut() {
            file.set_io_manager(dir_path, IoType::Standard)?;
        }
        Ok(())
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            log::error!("failed to close engine: {}", err);
        }
    }
}

/// Opens every segment under `dir` in ascending file-id order.
fn load_data_files(dir: &Path, io_type: IoType) -> Result<Vec<DataFile>> {
    let mut file_ids = Vec::new();
    for entry in fs::read_dir(dir)?.flatten() {
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else { continue };
        if !name.starts_with(DATA_FILE_NAME_PREFIX) || !name.ends_with(DATA_FILE_NAME_SUFFIX) {
            continue;
        }
        let id_part = &name[DATA_FILE_NAME_PREFIX.len()..name.len() - DATA_FILE_NAME_SUFFIX.len()];
        let file_id = id_part.parse::<u32>().map_err(|_| Error::DataDirNameIncorrect)?;
        file_ids.push(file_id);
    }
    file_ids.sort_unstable();

    let mut data_files = Vec::with_capacity(file_ids.len());
    for (i, file_id) in file_ids.iter().enumerate() {
        // Only the last (largest-id) segment becomes the active one and
        // needs standard I/O for writes; the mmap option may cover the
        // rest during the scan.
        let io_type = if i == file_ids.len() - 1 { IoType::Standard } else { io_type };
        data_files.push(DataFile::new(dir, *file_id, io_type)?);
    }
    Ok(data_files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::IteratorOptions;
    use crate::util::rand_kv::{test_key, test_value};
    use rand::RngCore;

    fn test_options(dir: &Path) -> Options {
        Options { dir_path: dir.to_path_buf(), ..Options::default() }
    }

    #[test]
    fn point_ops() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("cask-db")?;
        let engine = Engine::open(test_options(dir.path()))?;

        engine.put(b"hello", b"world")?;
        engine.put(b"engine", b"bitcask")?;

        assert_eq!(engine.get(b"hello")?, b"world");
        assert_eq!(engine.get(b"engine")?, b"bitcask");
        assert_eq!(engine.get(b"bit").unwrap_err(), Error::KeyNotFound);

        engine.delete(b"engine")?;
        assert_eq!(engine.get(b"engine").unwrap_err(), Error::KeyNotFound);

        // Deleting a missing key is a success.
        engine.delete(b"engine")?;
        engine.delete(b"never-stored")?;
        Ok(())
    }

    #[test]
    fn empty_keys_are_rejected() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("cask-db")?;
        let engine = Engine::open(test_options(dir.path()))?;

        assert_eq!(engine.put(b"", b"value").unwrap_err(), Error::KeyIsEmpty);
        assert_eq!(engine.get(b"").unwrap_err(), Error::KeyIsEmpty);
        assert_eq!(engine.delete(b"").unwrap_err(), Error::KeyIsEmpty);
        Ok(())
    }

    #[test]
    fn overwrites_return_latest_value() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("cask-db")?;
        let engine = Engine::open(test_options(dir.path()))?;

        engine.put(b"key", b"first")?;
        engine.put(b"key", b"second")?;
        assert_eq!(engine.get(b"key")?, b"second");

        // The replaced record became reclaimable.
        assert!(engine.stat()?.reclaimable_size > 0);
        Ok(())
    }

    #[test]
    fn single_byte_keys_and_values() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("cask-db")?;
        let engine = Engine::open(test_options(dir.path()))?;
        engine.put(b"k", b"v")?;
        assert_eq!(engine.get(b"k")?, b"v");
        Ok(())
    }

    #[test]
    fn restart_recovers_state() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("cask-db")?;
        let opts = test_options(dir.path());

        let engine = Engine::open(opts.clone())?;
        for i in 0..50 {
            engine.put(&test_key(i), &test_value(i))?;
        }
        engine.put(&test_key(0), b"overwritten")?;
        engine.delete(&test_key(1))?;
        drop(engine);

        let engine = Engine::open(opts)?;
        assert_eq!(engine.get(&test_key(0))?, b"overwritten");
        assert_eq!(engine.get(&test_key(1)).unwrap_err(), Error::KeyNotFound);
        for i in 2..50 {
            assert_eq!(engine.get(&test_key(i))?, test_value(i));
        }
        assert_eq!(engine.stat()?.key_num, 49);
        Ok(())
    }

    #[test]
    fn empty_directory_opens_cleanly() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("cask-db")?;
        let engine = Engine::open(test_options(dir.path()))?;
        assert_eq!(engine.get(b"anything").unwrap_err(), Error::KeyNotFound);
        assert_eq!(engine.stat()?.key_num, 0);
        engine.close()?;
        Ok(())
    }

    #[test]
    fn rotation_seals_segments() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("cask-db")?;
        let mut opts = test_options(dir.path());
        opts.data_file_size = 64 * 1024;

        let engine = Engine::open(opts.clone())?;
        let mut payload = vec![0u8; 128];
        rand::thread_rng().fill_bytes(&mut payload);
        for i in 0..2_000 {
            engine.put(&test_key(i), &payload)?;
        }

        let stat = engine.stat()?;
        assert!(stat.data_file_num >= 3, "expected rotation, got {}", stat.data_file_num);

        // Everything stays readable across the sealed segments, and after
        // a restart.
        for i in 0..2_000 {
            assert_eq!(engine.get(&test_key(i))?, payload);
        }
        drop(engine);
        let engine = Engine::open(opts)?;
        for i in 0..2_000 {
            assert_eq!(engine.get(&test_key(i))?, payload);
        }
        Ok(())
    }

    #[test]
    fn reopened_file_ids_are_monotone() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("cask-db")?;
        let mut opts = test_options(dir.path());
        opts.data_file_size = 4 * 1024;

        let engine = Engine::open(opts.clone())?;
        for i in 0..200 {
            engine.put(&test_key(i), &test_value(i))?;
        }
        let last_fid = engine.active_file.read().file_id();
        drop(engine);

        let engine = Engine::open(opts)?;
        assert!(engine.active_file.read().file_id() >= last_fid);
        Ok(())
    }

    #[test]
    fn sync_policies() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("cask-db")?;
        let mut opts = test_options(dir.path());
        opts.sync_writes = true;
        let engine = Engine::open(opts)?;
        engine.put(b"durable", b"yes")?;
        assert_eq!(engine.get(b"durable")?, b"yes");
        drop(engine);

        let dir = tempfile::TempDir::with_prefix("cask-db")?;
        let mut opts = test_options(dir.path());
        opts.bytes_per_sync = 256;
        let engine = Engine::open(opts)?;
        for i in 0..100 {
            engine.put(&test_key(i), &test_value(i))?;
        }
        engine.sync()?;
        Ok(())
    }

    #[test]
    fn double_open_is_locked_out() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("cask-db")?;
        let opts = test_options(dir.path());
        let engine = Engine::open(opts.clone())?;

        assert_eq!(Engine::open(opts.clone()).unwrap_err(), Error::DatabaseIsUsing);

        // Opening after the first instance closes works.
        drop(engine);
        assert!(Engine::open(opts).is_ok());
        Ok(())
    }

    #[test]
    fn list_keys_and_fold() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("cask-db")?;
        let engine = Engine::open(test_options(dir.path()))?;
        engine.put(b"cc", b"3")?;
        engine.put(b"aa", b"1")?;
        engine.put(b"bb", b"2")?;

        assert_eq!(engine.list_keys()?, vec![b"aa".to_vec(), b"bb".to_vec(), b"cc".to_vec()]);

        let mut seen = vec![];
        engine.fold(|key, value| {
            seen.push((key.to_vec(), value));
            true
        })?;
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0], (b"aa".to_vec(), b"1".to_vec()));

        // Early exit after the first pair.
        let mut count = 0;
        engine.fold(|_, _| {
            count += 1;
            false
        })?;
        assert_eq!(count, 1);
        Ok(())
    }

    #[test]
    fn stat_reports_disk_usage() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("cask-db")?;
        let engine = Engine::open(test_options(dir.path()))?;
        for i in 0..10 {
            engine.put(&test_key(i), &test_value(i))?;
        }
        engine.delete(&test_key(0))?;

        let stat = engine.stat()?;
        assert_eq!(stat.key_num, 9);
        assert_eq!(stat.data_file_num, 1);
        assert!(stat.disk_size > 0);
        assert!(stat.reclaimable_size > 0);
        Ok(())
    }

    #[test]
    fn backup_is_independently_openable() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("cask-db")?;
        let backup_dir = tempfile::TempDir::with_prefix("cask-db-backup")?;

        let engine = Engine::open(test_options(dir.path()))?;
        for i in 0..25 {
            engine.put(&test_key(i), &test_value(i))?;
        }
        engine.backup(backup_dir.path())?;

        // The original still holds its lock; the copy opens on its own.
        let restored = Engine::open(test_options(backup_dir.path()))?;
        for i in 0..25 {
            assert_eq!(restored.get(&test_key(i))?, test_value(i));
        }
        Ok(())
    }

    #[test]
    fn mmap_startup_scan() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("cask-db")?;
        let mut opts = test_options(dir.path());
        opts.data_file_size = 8 * 1024;

        let engine = Engine::open(opts.clone())?;
        for i in 0..300 {
            engine.put(&test_key(i), &test_value(i))?;
        }
        drop(engine);

        opts.mmap_at_startup = true;
        let engine = Engine::open(opts)?;
        for i in 0..300 {
            assert_eq!(engine.get(&test_key(i))?, test_value(i));
        }
        // Writes work after the swap back to standard I/O.
        engine.put(b"after-mmap", b"ok")?;
        assert_eq!(engine.get(b"after-mmap")?, b"ok");
        Ok(())
    }

    #[test]
    fn adaptive_radix_backend() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("cask-db")?;
        let mut opts = test_options(dir.path());
        opts.index_type = IndexType::AdaptiveRadix;

        let engine = Engine::open(opts.clone())?;
        for i in 0..100 {
            engine.put(&test_key(i), &test_value(i))?;
        }
        engine.delete(&test_key(5))?;
        drop(engine);

        let engine = Engine::open(opts)?;
        assert_eq!(engine.get(&test_key(4))?, test_value(4));
        assert_eq!(engine.get(&test_key(5)).unwrap_err(), Error::KeyNotFound);
        assert_eq!(engine.stat()?.key_num, 99);
        Ok(())
    }

    #[test]
    fn bplus_tree_backend_skips_replay() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("cask-db")?;
        let mut opts = test_options(dir.path());
        opts.index_type = IndexType::BPlusTree;

        let engine = Engine::open(opts.clone())?;
        for i in 0..100 {
            engine.put(&test_key(i), &test_value(i))?;
        }
        engine.delete(&test_key(7))?;
        engine.close()?;
        drop(engine);

        let engine = Engine::open(opts)?;
        assert_eq!(engine.get(&test_key(0))?, test_value(0));
        assert_eq!(engine.get(&test_key(7)).unwrap_err(), Error::KeyNotFound);
        assert_eq!(engine.stat()?.key_num, 99);

        // The write offset was restored from the file size, so appends
        // keep working.
        engine.put(b"more", b"data")?;
        assert_eq!(engine.get(b"more")?, b"data");
        Ok(())
    }

    #[test]
    fn prefix_iterator_over_engine() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("cask-db")?;
        let engine = Engine::open(test_options(dir.path()))?;
        engine.put(b"user:1", b"alice")?;
        engine.put(b"user:2", b"bob")?;
        engine.put(b"order:1", b"widget")?;

        let iter = engine.iter(IteratorOptions { prefix: b"user:".to_vec(), reverse: false });
        let mut found = vec![];
        while iter.valid() {
            found.push((iter.key(), iter.value()?));
            iter.next();
        }
        assert_eq!(
            found,
            vec![
                (b"user:1".to_vec(), b"alice".to_vec()),
                (b"user:2".to_vec(), b"bob".to_vec()),
            ]
        );
        Ok(())
    }
}
