use crate::batch::{log_record_key_with_seq, parse_log_record_key, NON_TXN_SEQ_NO};
use crate::data::data_file::{
    data_file_path, DataFile, MERGE_FINISHED_FILE_NAME, SEQ_NO_FILE_NAME,
};
use crate::data::data_file::ReadLogRecord;
use crate::data::log_record::{LogRecord, LogRecordType};
use crate::db::{Engine, FILE_LOCK_NAME};
use crate::error::{Error, Result};
use crate::fio::IoType;
use crate::options::{IndexType, Options};
use crate::util;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;

const MERGE_DIR_NAME_SUFFIX: &str = "-merge";
const MERGE_FIN_KEY: &[u8] = b"merge_finished";

impl Engine {
    /// Compacts the database: rewrites every live record from the sealed
    /// segments into a sibling directory, along with a hint file mapping
    /// keys to their new positions, then leaves a marker so the next open
    /// swaps the result in. Writers keep going throughout; only the
    /// initial rotation takes the write locks.
    ///
    /// Returns `MergeConditionUnreached` when the reclaimable volume does
    /// not justify the rewrite (or would not fit on disk), and
    /// `MergeIsRunning` if another merge is underway.
    pub fn merge(&self) -> Result<()> {
        // Nothing written yet: trivially merged.
        if self.active_file.read().write_off() == 0 && self.older_files.read().is_empty() {
            return Ok(());
        }

        let _merge_guard =
            self.merging_lock.try_lock().ok_or(Error::MergeIsRunning)?;
        self.check_merge_condition()?;

        let dir_path = &self.options.dir_path;

        // Seal the active segment and open a fresh one; everything below
        // the new id belongs to this merge, everything at or above it is
        // untouched live traffic. The participant list is snapshotted in
        // the same critical section so a racing rotation cannot slip a
        // segment past the boundary.
        let (non_merge_fid, mut merge_file_ids) = {
            let mut active = self.active_file.write();
            active.sync()?;
            let sealed_id = active.file_id();
            let mut older_files = self.older_files.write();
            older_files.insert(sealed_id, DataFile::new(dir_path, sealed_id, IoType::Standard)?);
            *active = DataFile::new(dir_path, sealed_id + 1, IoType::Standard)?;
            (sealed_id + 1, older_files.keys().copied().collect::<Vec<_>>())
        };
        merge_file_ids.sort_unstable();

        // A fresh sibling directory, wiping any leftovers from a merge
        // that never completed.
        let merge_path = merge_path(dir_path);
        if merge_path.is_dir() {
            fs::remove_dir_all(&merge_path)?;
        }
        fs::create_dir_all(&merge_path)?;

        // The rewrite goes through a second engine instance scoped to the
        // merge directory. No syncing per record; everything is fsynced
        // once at the end.
        let merge_options = Options {
            dir_path: merge_path.clone(),
            sync_writes: false,
            bytes_per_sync: 0,
            index_type: IndexType::BTree,
            index_path: None,
            ..(*self.options).clone()
        };
        let merge_engine = Engine::open(merge_options)?;
        let mut hint_file = DataFile::hint_file(&merge_path)?;

        for file_id in &merge_file_ids {
            // Fresh read-only handles, so the rewrite never contends with
            // readers on the shared segment set.
            let data_file = DataFile::new(dir_path, *file_id, IoType::Standard)?;
            let mut offset = 0;
            loop {
                let ReadLogRecord { record, size } = match data_file.read_log_record(offset) {
                    Ok(read) => read,
                    Err(Error::ReadDataFileEof) => break,
                    Err(err) => return Err(err),
                };
                let (user_key, _) = parse_log_record_key(&record.key)?;

                // A record is live iff the index still points exactly
                // here. Matching on the id alone would resurrect values
                // that were later overwritten into another segment.
                if let Some(pos) = self.index.get(&user_key) {
                    if pos.file_id == *file_id && pos.offset == offset {
                        // Committed long ago, so the batch framing is no
                        // longer meaningful; rewrite as a plain record.
                        let rewritten = LogRecord {
                            key: log_record_key_with_seq(&user_key, NON_TXN_SEQ_NO),
                            value: record.value,
                            rec_type: LogRecordType::Normal,
                        };
                        let new_pos = merge_engine.append_log_record(&rewritten)?;
                        hint_file.write_hint_record(user_key, &new_pos)?;
                    }
                }
                offset += size;
            }
        }

        merge_engine.sync()?;
        hint_file.sync()?;
        drop(merge_engine);

        // The marker is written last: its presence certifies everything
        // above it hit the disk, and names the first untouched segment.
        let mut merge_finished_file = DataFile::merge_finished_file(&merge_path)?;
        let record = LogRecord {
            key: MERGE_FIN_KEY.to_vec(),
            value: non_merge_fid.to_string().into_bytes(),
            rec_type: LogRecordType::Normal,
        };
        merge_finished_file.write(&record.encode())?;
        merge_finished_file.sync()?;

        log::info!(
            "merged {} segment(s) of {}, next generation boundary is {}",
            merge_file_ids.len(),
            dir_path.display(),
            non_merge_fid,
        );
        Ok(())
    }

    /// The merge trigger policy: the rewrite must fit in the available
    /// disk space, and the reclaimable volume must clear either the hard
    /// size gate or the soft size-plus-ratio gate.
    fn check_merge_condition(&self) -> Result<()> {
        let reclaimable = self.reclaim_size.load(Ordering::SeqCst);
        let total_size = util::dir_disk_size(&self.options.dir_path)?;
        let available = util::available_disk_size(&self.options.dir_path)?;

        let live_size = total_size.saturating_sub(reclaimable);
        if (available as f64) * (self.options.merge_space_ratio as f64) < (live_size as f64) {
            return Err(Error::MergeConditionUnreached);
        }

        if should_merge(
            reclaimable,
            total_size,
            self.options.merge_min_size,
            self.options.merge_max_size,
            self.options.merge_ratio,
        ) {
            Ok(())
        } else {
            Err(Error::MergeConditionUnreached)
        }
    }
}

/// Whether the reclaimable volume justifies a rewrite: past the hard size
/// gate, or past the soft size gate with the stale ratio reached.
fn should_merge(
    reclaimable: u64,
    total_size: u64,
    min_size: u64,
    max_size: u64,
    min_ratio: f32,
) -> bool {
    let ratio_reached =
        total_size > 0 && reclaimable as f32 / total_size as f32 >= min_ratio;
    reclaimable >= max_size || (reclaimable >= min_size && ratio_reached)
}

/// The transient sibling directory a merge writes into, e.g.
/// `/data/cask` -> `/data/cask-merge`.
pub(crate) fn merge_path(dir_path: &Path) -> PathBuf {
    let parent = dir_path.parent().unwrap_or_else(|| Path::new("/"));
    let base = dir_path.file_name().unwrap_or_default().to_string_lossy();
    parent.join(format!("{base}{MERGE_DIR_NAME_SUFFIX}"))
}

/// Reads the merge boundary out of the finished marker under `dir`: the
/// smallest file id that did not participate in the completed merge.
pub(crate) fn non_merge_file_id(dir: &Path) -> Result<u32> {
    let merge_finished_file = DataFile::merge_finished_file(dir)?;
    let record = merge_finished_file.read_log_record(0)?.record;
    String::from_utf8(record.value)
        .ok()
        .and_then(|value| value.parse::<u32>().ok())
        .ok_or(Error::CorruptedRecord)
}

/// Adopts a completed merge at open, if one is waiting: drops the merged
/// generation from the main directory, moves the rewritten segments (and
/// the hint file and marker) into place, and removes the merge directory.
/// A merge directory without a marker is an aborted merge and is simply
/// discarded.
pub(crate) fn load_merge_files(dir_path: &Path) -> Result<()> {
    let merge_path = merge_path(dir_path);
    if !merge_path.is_dir() {
        return Ok(());
    }

    if !merge_path.join(MERGE_FINISHED_FILE_NAME).is_file() {
        fs::remove_dir_all(&merge_path)?;
        return Ok(());
    }

    let non_merge_fid = non_merge_file_id(&merge_path)?;

    // Every segment the merge covered is now redundant.
    for file_id in 0..non_merge_fid {
        let path = data_file_path(dir_path, file_id);
        if path.is_file() {
            fs::remove_file(path)?;
        }
    }

    // The merge engine's own bookkeeping files stay behind.
    for entry in fs::read_dir(&merge_path)?.flatten() {
        let name = entry.file_name();
        if name == FILE_LOCK_NAME || name == SEQ_NO_FILE_NAME {
            continue;
        }
        fs::rename(entry.path(), dir_path.join(&name))?;
    }
    fs::remove_dir_all(&merge_path)?;
    Ok(())
}
