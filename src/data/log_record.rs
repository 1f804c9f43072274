use crate::error::{Error, Result};

use bytes::{Buf, BufMut, BytesMut};
use prost::{decode_length_delimiter, encode_length_delimiter, length_delimiter_len};

/// A log record as it appears on disk:
///
/// ```text
/// +------+------+-----------+-------------+-----+-------+
/// | crc  | type | key size  | value size  | key | value |
/// +------+------+-----------+-------------+-----+-------+
///   4 B    1 B    varint      varint
/// ```
///
/// The CRC32 (IEEE, little-endian) covers everything after itself. Sizes
/// are LEB128 varints, at most 5 bytes each for 32-bit lengths, so the
/// header spans 7 to 15 bytes. Keys on disk are framed: a varint sequence
/// number followed by the user key bytes (see the `batch` module).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogRecord {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub rec_type: LogRecordType,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogRecordType {
    /// A regular key-value write.
    Normal = 1,
    /// A tombstone; the value is empty.
    Deleted = 2,
    /// Terminates a committed write batch.
    TxnFinished = 3,
}

impl LogRecordType {
    fn from_u8(value: u8) -> Option<LogRecordType> {
        match value {
            1 => Some(LogRecordType::Normal),
            2 => Some(LogRecordType::Deleted),
            3 => Some(LogRecordType::TxnFinished),
            _ => None,
        }
    }
}

/// Largest possible header: crc, type, and two maximum-length u32 varints.
pub fn max_log_record_header_size() -> usize {
    4 + 1 + length_delimiter_len(u32::MAX as usize) * 2
}

impl LogRecord {
    /// Encodes the record into its on-disk frame.
    pub fn encode(&self) -> Vec<u8> {
        // Everything after the checksum is built first, then hashed.
        let mut body = BytesMut::with_capacity(self.encoded_len() - 4);
        body.put_u8(self.rec_type as u8);
        encode_length_delimiter(self.key.len(), &mut body).expect("buffer grows on demand");
        encode_length_delimiter(self.value.len(), &mut body).expect("buffer grows on demand");
        body.put_slice(&self.key);
        body.put_slice(&self.value);

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&body);
        let crc = hasher.finalize();

        let mut buf = Vec::with_capacity(body.len() + 4);
        buf.extend_from_slice(&crc.to_le_bytes());
        buf.extend_from_slice(&body);
        buf
    }

    /// Total frame size of the encoded record.
    pub fn encoded_len(&self) -> usize {
        4 + 1
            + length_delimiter_len(self.key.len())
            + length_delimiter_len(self.value.len())
            + self.key.len()
            + self.value.len()
    }
}

/// A decoded record header.
#[derive(Debug)]
pub struct LogRecordHeader {
    pub crc: u32,
    pub rec_type: LogRecordType,
    pub key_size: u32,
    pub value_size: u32,
}

/// Decodes a header from a 7..=15-byte prefix. Returns `None` when the
/// prefix is too short to hold a header or decodes to all zeros; both mean
/// the scan has run off the end of the live region. A header with a type
/// byte outside the known set is corruption.
pub fn decode_log_record_header(buf: &[u8]) -> Result<Option<(LogRecordHeader, usize)>> {
    if buf.len() < 5 {
        return Ok(None);
    }
    let crc = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    let type_byte = buf[4];

    let mut sizes = &buf[5..];
    let before = sizes.remaining();
    let key_size = match decode_length_delimiter(&mut sizes) {
        Ok(n) => n as u32,
        Err(_) => return Ok(None), // truncated varint at end of file
    };
    let value_size = match decode_length_delimiter(&mut sizes) {
        Ok(n) => n as u32,
        Err(_) => return Ok(None),
    };
    let header_size = 5 + (before - sizes.remaining());

    // A zeroed region means the segment ends here, not that it is corrupt.
    if crc == 0 && type_byte == 0 && key_size == 0 && value_size == 0 {
        return Ok(None);
    }

    let rec_type = LogRecordType::from_u8(type_byte).ok_or(Error::CorruptedRecord)?;
    Ok(Some((LogRecordHeader { crc, rec_type, key_size, value_size }, header_size)))
}

/// CRC32 over the header tail (everything between the stored checksum and
/// the key) plus the key and value bytes, matching what `encode` stores.
pub fn log_record_crc(header_tail: &[u8], key: &[u8], value: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(header_tail);
    hasher.update(key);
    hasher.update(value);
    hasher.finalize()
}

/// Where a record lives inside the segment set. Stored by value in the
/// memory index, one per live key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LogRecordPos {
    pub file_id: u32,
    pub offset: u64,
    pub size: u32,
}

/// Encodes a position as three varints, the hint-file value format.
pub fn encode_log_record_pos(pos: &LogRecordPos) -> Vec<u8> {
    let mut buf = BytesMut::new();
    encode_length_delimiter(pos.file_id as usize, &mut buf).expect("buffer grows on demand");
    encode_length_delimiter(pos.offset as usize, &mut buf).expect("buffer grows on demand");
    encode_length_delimiter(pos.size as usize, &mut buf).expect("buffer grows on demand");
    buf.to_vec()
}

pub fn decode_log_record_pos(buf: &[u8]) -> Result<LogRecordPos> {
    let mut buf = buf;
    let file_id = decode_length_delimiter(&mut buf).map_err(|_| Error::CorruptedRecord)?;
    let offset = decode_length_delimiter(&mut buf).map_err(|_| Error::CorruptedRecord)?;
    let size = decode_length_delimiter(&mut buf).map_err(|_| Error::CorruptedRecord)?;
    Ok(LogRecordPos { file_id: file_id as u32, offset: offset as u64, size: size as u32 })
}

/// A batch record held back during recovery until its terminator is seen.
pub struct TransactionRecord {
    pub record: LogRecord,
    pub pos: LogRecordPos,
}
