use thiserror::Error as ThisError;

/// Cask result type, using the crate-wide error enum.
pub type Result<T> = std::result::Result<T, Error>;

/// Cask errors. All variants are comparable, so tests and callers can match
/// on them; environmental errors carry the underlying message rather than
/// the source error to keep the enum `Clone + PartialEq`.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum Error {
    /// An empty key was passed to Put, Get, or Delete.
    #[error("key is empty")]
    KeyIsEmpty,

    /// The key does not exist. This is a normal value signal, not a fault.
    #[error("key not found in database")]
    KeyNotFound,

    /// The memory index rejected an update it should have accepted.
    #[error("failed to update memory index")]
    IndexUpdateFailed,

    /// The index references a segment file that is no longer open.
    #[error("data file not found")]
    DataFileNotFound,

    /// The data directory path is unusable, or a segment file name in it
    /// does not parse.
    #[error("data directory name is incorrect")]
    DataDirNameIncorrect,

    /// The segment rotation threshold is zero.
    #[error("data file size option is too small")]
    DataFileSizeTooSmall,

    /// The merge ratio option is outside `[0, 1]`.
    #[error("merge ratio option must be between 0 and 1")]
    InvalidMergeRatio,

    /// A write batch staged more records than `max_batch_num` allows.
    #[error("batch exceeds the maximum record count")]
    ExceedMaxBatchNum,

    /// Another merge is already in progress.
    #[error("merge is in progress, try again later")]
    MergeIsRunning,

    /// The merge trigger policy declined to run; callers may treat this as
    /// a no-op.
    #[error("merge condition not reached")]
    MergeConditionUnreached,

    /// With the persistent index backend the sequence counter could not be
    /// restored, so batch sequence numbers might repeat ones already on
    /// disk.
    #[error("write batch is unavailable until the sequence file is restored")]
    BatchNotAvailable,

    /// Another process holds the directory lock.
    #[error("database directory is in use by another process")]
    DatabaseIsUsing,

    /// A log record failed its CRC check.
    #[error("invalid crc value, log record may be corrupted")]
    CorruptedRecord,

    /// A read past the end of a segment file. Internal end-of-segment
    /// signal for scans; never surfaced by the public API.
    #[error("read past the end of the data file")]
    ReadDataFileEof,

    /// An I/O error from the filesystem.
    #[error("io error: {0}")]
    Io(String),

    /// An error from the persistent index backend.
    #[error("index backend error: {0}")]
    Index(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<jammdb::Error> for Error {
    fn from(err: jammdb::Error) -> Self {
        Error::Index(err.to_string())
    }
}
