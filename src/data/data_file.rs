use super::log_record::{
    decode_log_record_header, encode_log_record_pos, log_record_crc, max_log_record_header_size,
    LogRecord, LogRecordPos, LogRecordType,
};
use crate::error::{Error, Result};
use crate::fio::{self, IoType};

use std::path::{Path, PathBuf};

pub const DATA_FILE_NAME_PREFIX: &str = "bitcask_";
pub const DATA_FILE_NAME_SUFFIX: &str = ".data";
pub const HINT_FILE_NAME: &str = "hint-index";
pub const MERGE_FINISHED_FILE_NAME: &str = "merge-finished";
pub const SEQ_NO_FILE_NAME: &str = "seq-no";

/// One segment of the write-ahead log: an append-only file holding framed
/// log records. At most one segment is active (writable) at a time; the
/// rest are immutable. The same framing backs the hint, merge-marker, and
/// sequence-number files.
pub struct DataFile {
    file_id: u32,
    /// Next append offset. Starts at zero; recovery advances it to the end
    /// of the live region.
    write_off: u64,
    io: Box<dyn fio::IoManager>,
}

/// Path of the segment with the given id, e.g. `bitcask_000000042.data`.
pub fn data_file_path(dir: &Path, file_id: u32) -> PathBuf {
    dir.join(format!("{DATA_FILE_NAME_PREFIX}{file_id:09}{DATA_FILE_NAME_SUFFIX}"))
}

/// A record read from a segment, along with its total frame size (the
/// amount to advance a sequential scan by).
#[derive(Debug)]
pub struct ReadLogRecord {
    pub record: LogRecord,
    pub size: u64,
}

impl DataFile {
    /// Opens the segment with the given id, creating the file if absent.
    pub fn new(dir: &Path, file_id: u32, io_type: IoType) -> Result<DataFile> {
        Self::open(&data_file_path(dir, file_id), file_id, io_type)
    }

    /// Opens the hint file produced by a merge.
    pub fn hint_file(dir: &Path) -> Result<DataFile> {
        Self::open(&dir.join(HINT_FILE_NAME), 0, IoType::Standard)
    }

    /// Opens the merge-finished marker file.
    pub fn merge_finished_file(dir: &Path) -> Result<DataFile> {
        Self::open(&dir.join(MERGE_FINISHED_FILE_NAME), 0, IoType::Standard)
    }

    /// Opens the sequence-number file written at close.
    pub fn seq_no_file(dir: &Path) -> Result<DataFile> {
        Self::open(&dir.join(SEQ_NO_FILE_NAME), 0, IoType::Standard)
    }

    fn open(path: &Path, file_id: u32, io_type: IoType) -> Result<DataFile> {
        Ok(DataFile { file_id, write_off: 0, io: fio::new_io_manager(path, io_type)? })
    }

    pub fn file_id(&self) -> u32 {
        self.file_id
    }

    pub fn write_off(&self) -> u64 {
        self.write_off
    }

    pub fn set_write_off(&mut self, offset: u64) {
        self.write_off = offset;
    }

    pub fn file_size(&self) -> Result<u64> {
        self.io.size()
    }

    /// Appends the buffer and advances the write offset.
    pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let n = self.io.write(buf)?;
        self.write_off += n as u64;
        Ok(n)
    }

    /// Appends a hint record: the user key, with the encoded position of
    /// its live record as the value.
    pub fn write_hint_record(&mut self, key: Vec<u8>, pos: &LogRecordPos) -> Result<()> {
        let record = LogRecord {
            key,
            value: encode_log_record_pos(pos),
            rec_type: LogRecordType::Normal,
        };
        self.write(&record.encode())?;
        Ok(())
    }

    pub fn sync(&self) -> Result<()> {
        self.io.sync()
    }

    /// Final flush; the underlying file is released when the segment
    /// drops.
    pub fn close(&self) -> Result<()> {
        self.io.close()
    }

    /// Swaps the I/O backend, reopening the segment's path under `dir`.
    /// Used to move off the memory-mapped view once the startup scan ends.
    pub fn set_io_manager(&mut self, dir: &Path, io_type: IoType) -> Result<()> {
        self.io = fio::new_io_manager(&data_file_path(dir, self.file_id), io_type)?;
        Ok(())
    }

    /// Reads the framed record starting at `offset`, validating its CRC.
    /// Returns `ReadDataFileEof` when the offset is at or past the end of
    /// the live region (including a zeroed tail).
    pub fn read_log_record(&self, offset: u64) -> Result<ReadLogRecord> {
        // The tail of the file may hold less than a maximum header; a short
        // read is fine as long as a complete header decodes from it.
        let mut header_buf = vec![0u8; max_log_record_header_size()];
        let n = self.io.read(&mut header_buf, offset)?;
        let (header, header_size) = match decode_log_record_header(&header_buf[..n])? {
            Some(decoded) => decoded,
            None => return Err(Error::ReadDataFileEof),
        };

        let key_size = header.key_size as usize;
        let value_size = header.value_size as usize;
        let mut body = vec![0u8; key_size + value_size];
        if !body.is_empty() {
            let read = self.io.read(&mut body, offset + header_size as u64)?;
            if read < body.len() {
                // A record cut off mid-write; the live region ends here.
                return Err(Error::ReadDataFileEof);
            }
        }

        let crc = log_record_crc(&header_buf[4..header_size], &body[..key_size], &body[key_size..]);
        if crc != header.crc {
            return Err(Error::CorruptedRecord);
        }

        Ok(ReadLogRecord {
            record: LogRecord {
                key: body[..key_size].to_vec(),
                value: body[key_size..].to_vec(),
                rec_type: header.rec_type,
            },
            size: (header_size + key_size + value_size) as u64,
        })
    }
}
