use super::IoManager;
use crate::error::{Error, Result};

use memmap2::Mmap;
use std::fs::OpenOptions;
use std::path::Path;

/// Read-only memory-mapped file view, used to speed up the startup scan.
/// Writes and syncs are not supported; after recovery the engine swaps the
/// segments back to standard I/O.
pub struct MmapIo {
    // Mapping a zero-length file fails on most platforms, so an empty file
    // is represented as the absence of a map.
    map: Option<Mmap>,
}

impl MmapIo {
    pub fn new(path: &Path) -> Result<Self> {
        let fd = OpenOptions::new().create(true).read(true).write(true).open(path)?;
        if fd.metadata()?.len() == 0 {
            return Ok(Self { map: None });
        }
        let map = unsafe { Mmap::map(&fd)? };
        Ok(Self { map: Some(map) })
    }
}

impl IoManager for MmapIo {
    fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let map = match &self.map {
            Some(map) => map,
            None => return Ok(0),
        };
        let offset = offset as usize;
        if offset >= map.len() {
            return Ok(0); // end of file
        }
        let n = std::cmp::min(buf.len(), map.len() - offset);
        buf[..n].copy_from_slice(&map[offset..offset + n]);
        Ok(n)
    }

    fn write(&self, _buf: &[u8]) -> Result<usize> {
        Err(Error::Io("cannot write through a read-only memory map".to_string()))
    }

    fn sync(&self) -> Result<()> {
        Err(Error::Io("cannot sync a read-only memory map".to_string()))
    }

    fn size(&self) -> Result<u64> {
        Ok(self.map.as_ref().map_or(0, |map| map.len() as u64))
    }

    fn close(&self) -> Result<()> {
        // Nothing to flush; the mapping is released on drop.
        Ok(())
    }
}
