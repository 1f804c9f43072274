use super::IoManager;
use crate::error::Result;

use parking_lot::RwLock;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::FileExt;
use std::path::Path;

/// Standard positional file I/O. The file is opened in append mode, so
/// every write lands at the end regardless of concurrent readers.
pub struct StandardIo {
    fd: RwLock<File>,
}

impl StandardIo {
    pub fn new(path: &Path) -> Result<Self> {
        let fd = OpenOptions::new().create(true).read(true).append(true).open(path)?;
        Ok(Self { fd: RwLock::new(fd) })
    }
}

impl IoManager for StandardIo {
    fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let fd = self.fd.read();
        let mut read = 0;
        while read < buf.len() {
            let n = fd.read_at(&mut buf[read..], offset + read as u64)?;
            if n == 0 {
                break; // end of file
            }
            read += n;
        }
        Ok(read)
    }

    fn write(&self, buf: &[u8]) -> Result<usize> {
        let mut fd = self.fd.write();
        fd.write_all(buf)?;
        Ok(buf.len())
    }

    fn sync(&self) -> Result<()> {
        self.fd.read().sync_all()?;
        Ok(())
    }

    fn size(&self) -> Result<u64> {
        Ok(self.fd.read().metadata()?.len())
    }

    fn close(&self) -> Result<()> {
        self.fd.read().sync_all()?;
        Ok(())
    }
}
