use crate::error::Result;

use std::fs;
use std::path::Path;

/// Total size in bytes of all files under `dir`, recursively.
pub(crate) fn dir_disk_size(dir: &Path) -> Result<u64> {
    let mut total = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let metadata = entry.metadata()?;
        if metadata.is_dir() {
            total += dir_disk_size(&entry.path())?;
        } else {
            total += metadata.len();
        }
    }
    Ok(total)
}

/// Available disk space on the filesystem holding `dir`.
pub(crate) fn available_disk_size(dir: &Path) -> Result<u64> {
    Ok(fs4::available_space(dir)?)
}

/// Recursively copies `src` into `dst`, skipping entries whose file name is
/// in `exclude`. Used by backup to leave the directory lock behind.
pub(crate) fn copy_dir(src: &Path, dst: &Path, exclude: &[&str]) -> Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let name = entry.file_name();
        if exclude.iter().any(|excluded| name == *excluded) {
            continue;
        }
        let target = dst.join(&name);
        if entry.metadata()?.is_dir() {
            copy_dir(&entry.path(), &target, exclude)?;
        } else {
            fs::copy(entry.path(), target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod rand_kv {
    /// Deterministic test key, padded so keys sort in insertion order.
    pub(crate) fn test_key(i: usize) -> Vec<u8> {
        format!("cask-test-key-{i:09}").into_bytes()
    }

    /// Deterministic test value.
    pub(crate) fn test_value(i: usize) -> Vec<u8> {
        format!("cask-test-value-{i:09}").into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disk_size_counts_nested_files() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("cask-util")?;
        fs::write(dir.path().join("a"), b"12345")?;
        fs::create_dir(dir.path().join("sub"))?;
        fs::write(dir.path().join("sub").join("b"), b"123")?;
        assert_eq!(dir_disk_size(dir.path())?, 8);
        Ok(())
    }

    #[test]
    fn available_space_is_nonzero() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("cask-util")?;
        assert!(available_disk_size(dir.path())? > 0);
        Ok(())
    }

    #[test]
    fn copy_dir_honors_exclusions() -> Result<()> {
        let src = tempfile::TempDir::with_prefix("cask-util")?;
        let dst = tempfile::TempDir::with_prefix("cask-util")?;
        fs::write(src.path().join("keep"), b"kept")?;
        fs::write(src.path().join("flock"), b"")?;

        copy_dir(src.path(), dst.path(), &["flock"])?;
        assert_eq!(fs::read(dst.path().join("keep"))?, b"kept");
        assert!(!dst.path().join("flock").exists());
        Ok(())
    }
}
