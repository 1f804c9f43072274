use crate::data::log_record::{LogRecord, LogRecordType};
use crate::db::Engine;
use crate::error::{Error, Result};
use crate::options::{IndexType, WriteBatchOptions};

use bytes::{BufMut, BytesMut};
use parking_lot::Mutex;
use prost::{decode_length_delimiter, encode_length_delimiter};
use std::collections::HashMap;
use std::sync::atomic::Ordering;

/// User key of the record that terminates a committed batch.
const TXN_FIN_KEY: &[u8] = b"txn-fin";

/// Sequence number of records written outside any batch.
pub(crate) const NON_TXN_SEQ_NO: u64 = 0;

/// A batch of writes applied atomically. Puts and deletes stage in memory;
/// `commit` appends them all under one fresh sequence number, then a
/// terminator record. Until the terminator is on disk none of the batch is
/// visible, and recovery discards sequence numbers that never saw theirs,
/// so a crash mid-commit takes none of the batch or all of it.
#[derive(Debug)]
pub struct WriteBatch<'a> {
    pending_writes: Mutex<HashMap<Vec<u8>, LogRecord>>,
    engine: &'a Engine,
    options: WriteBatchOptions,
}

impl Engine {
    /// Creates an empty write batch.
    pub fn new_write_batch(&self, options: WriteBatchOptions) -> Result<WriteBatch> {
        if self.options.index_type == IndexType::BPlusTree
            && !self.seq_file_exists
            && !self.is_initial
        {
            // Without the restored counter a new batch could reuse a
            // sequence number already committed on disk.
            return Err(Error::BatchNotAvailable);
        }
        Ok(WriteBatch {
            pending_writes: Mutex::new(HashMap::new()),
            engine: self,
            options,
        })
    }
}

impl WriteBatch<'_> {
    /// Stages a put. Nothing reaches disk until commit.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::KeyIsEmpty);
        }
        let record = LogRecord {
            key: key.to_vec(),
            value: value.to_vec(),
            rec_type: LogRecordType::Normal,
        };
        self.pending_writes.lock().insert(key.to_vec(), record);
        Ok(())
    }

    /// Stages a delete. For a key the engine never stored, this just drops
    /// any staged write for it.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::KeyIsEmpty);
        }

        let mut pending_writes = self.pending_writes.lock();
        if self.engine.index.get(key).is_none() {
            pending_writes.remove(key);
            return Ok(());
        }

        let record =
            LogRecord { key: key.to_vec(), value: Vec::new(), rec_type: LogRecordType::Deleted };
        pending_writes.insert(key.to_vec(), record);
        Ok(())
    }

    /// Commits the staged writes atomically and clears the batch for
    /// reuse. An empty batch commits trivially.
    pub fn commit(&self) -> Result<()> {
        let mut pending_writes = self.pending_writes.lock();
        if pending_writes.is_empty() {
            return Ok(());
        }
        if pending_writes.len() > self.options.max_batch_num {
            return Err(Error::ExceedMaxBatchNum);
        }

        // Serialize commits so the sequence numbers on disk match the
        // order records were appended in.
        let _commit_guard = self.engine.batch_commit_lock.lock();
        let seq_no = self.engine.seq_no.fetch_add(1, Ordering::SeqCst) + 1;

        // Append every staged record tagged with this batch's sequence
        // number. The index is not touched yet.
        let mut positions = HashMap::with_capacity(pending_writes.len());
        for record in pending_writes.values() {
            let framed = LogRecord {
                key: log_record_key_with_seq(&record.key, seq_no),
                value: record.value.clone(),
                rec_type: record.rec_type,
            };
            let pos = self.engine.append_log_record(&framed)?;
            positions.insert(record.key.clone(), pos);
        }

        // The terminator makes the batch real.
        let finished = LogRecord {
            key: log_record_key_with_seq(TXN_FIN_KEY, seq_no),
            value: Vec::new(),
            rec_type: LogRecordType::TxnFinished,
        };
        self.engine.append_log_record(&finished)?;

        if self.options.sync_writes {
            self.engine.sync()?;
        }

        // Only now does the batch become visible.
        for record in pending_writes.values() {
            let pos = positions[&record.key];
            let old = match record.rec_type {
                LogRecordType::Normal => self.engine.index.put(record.key.clone(), pos),
                LogRecordType::Deleted => self.engine.index.delete(&record.key),
                LogRecordType::TxnFinished => None,
            };
            if let Some(old) = old {
                self.engine.reclaim_size.fetch_add(old.size as u64, Ordering::SeqCst);
            }
        }

        pending_writes.clear();
        Ok(())
    }
}

/// Frames a key for disk: a varint sequence number, then the key bytes.
pub(crate) fn log_record_key_with_seq(key: &[u8], seq_no: u64) -> Vec<u8> {
    let mut framed = BytesMut::new();
    encode_length_delimiter(seq_no as usize, &mut framed).expect("buffer grows on demand");
    framed.put_slice(key);
    framed.to_vec()
}

/// Splits a framed key back into the user key and its sequence number.
pub(crate) fn parse_log_record_key(key: &[u8]) -> Result<(Vec<u8>, u64)> {
    let mut buf = key;
    let seq_no =
        decode_length_delimiter(&mut buf).map_err(|_| Error::CorruptedRecord)? as u64;
    Ok((buf.to_vec(), seq_no))
}
