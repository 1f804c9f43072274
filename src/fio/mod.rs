mod file_io;
mod mmap;

pub(crate) use file_io::StandardIo;
pub(crate) use mmap::MmapIo;

use crate::error::Result;

use std::path::Path;

/// Uniform positional I/O over a single file, so segments can be scanned
/// through different backends. Standard I/O is used for all writes; the
/// memory-mapped backend only accelerates the read-mostly startup scan.
pub trait IoManager: Send + Sync {
    /// Reads up to `buf.len()` bytes at `offset`, returning the number of
    /// bytes read. A short (or zero-length) read signals end of file.
    fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize>;

    /// Appends `buf` at the end of the file, returning the bytes written.
    fn write(&self, buf: &[u8]) -> Result<usize>;

    /// Flushes buffered writes to disk.
    fn sync(&self) -> Result<()>;

    /// Current file size in bytes.
    fn size(&self) -> Result<u64>;

    /// Final flush before the file is released. The descriptor or mapping
    /// itself is reclaimed when the backend drops.
    fn close(&self) -> Result<()>;
}

/// Which backend to open a file with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IoType {
    /// Ordinary positional file descriptor, opened create/read/append.
    Standard,
    /// Read-only memory map.
    MemoryMap,
}

/// Opens `path` with the requested backend, creating the file if absent.
pub fn new_io_manager(path: &Path, io_type: IoType) -> Result<Box<dyn IoManager>> {
    match io_type {
        IoType::Standard => Ok(Box::new(StandardIo::new(path)?)),
        IoType::MemoryMap => Ok(Box::new(MmapIo::new(path)?)),
    }
}
