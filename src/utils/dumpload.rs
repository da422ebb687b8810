//! a small module dedicated to dump/reload of the sequence archive index.
//! A dump is valid as long as archive files keep their size and modification time.
//!

use std::fs::{self, OpenOptions};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::seqindex::SequenceArchiveIndex;

const INDEX_DUMP_NAME: &str = "seqindex.json";

/// identifies the state of an archive file at index construction
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ArchiveStamp {
    path: PathBuf,
    size: u64,
    /// modification time in nanoseconds since epoch
    mtime: u128,
}

impl ArchiveStamp {
    pub fn of_file(path: &Path) -> Result<Self> {
        let metadata = fs::metadata(path)?;
        let mtime = metadata
            .modified()?
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        Ok(ArchiveStamp {
            path: path.to_path_buf(),
            size: metadata.len(),
            mtime,
        })
    }
} // end of impl ArchiveStamp

#[derive(Serialize, Deserialize)]
struct IndexDump {
    stamps: Vec<ArchiveStamp>,
    index: SequenceArchiveIndex,
}

/// dumps index with the current stamps of its archives in dirpath
pub fn dump_index(index: &SequenceArchiveIndex, dirpath: &Path) -> Result<()> {
    let filepath = dirpath.join(INDEX_DUMP_NAME);
    log::info!("dumping sequence index in {:?}", filepath);
    let stamps = index
        .get_files()
        .iter()
        .map(|p| ArchiveStamp::of_file(p))
        .collect::<Result<Vec<ArchiveStamp>>>()?;
    fs::create_dir_all(dirpath)?;
    let file = OpenOptions::new().write(true).create(true).truncate(true).open(&filepath)?;
    let mut writer = BufWriter::new(file);
    let dump = IndexDump {
        stamps,
        index: index.clone(),
    };
    serde_json::to_writer(&mut writer, &dump)?;
    Ok(())
} // end of dump_index

/// Reloads a dumped index if it was built from exactly `paths`, in the same order, all unchanged since.
/// Returns None for a missing, unreadable or stale dump.
pub fn reload_index(paths: &[PathBuf], dirpath: &Path) -> Option<SequenceArchiveIndex> {
    let filepath = dirpath.join(INDEX_DUMP_NAME);
    let file = OpenOptions::new().read(true).open(&filepath).ok()?;
    let dump: IndexDump = match serde_json::from_reader(BufReader::new(file)) {
        Ok(dump) => dump,
        Err(e) => {
            log::warn!("could not reload index dump {:?} : {}", filepath, e);
            return None;
        }
    };
    if dump.index.get_files() != paths || dump.stamps.len() != paths.len() {
        log::info!("index dump {:?} built on other archives, rebuilding", filepath);
        return None;
    }
    for stamp in &dump.stamps {
        match ArchiveStamp::of_file(&stamp.path) {
            Ok(current) if current == *stamp => (),
            _ => {
                log::info!("archive {:?} changed since index dump, rebuilding", stamp.path);
                return None;
            }
        }
    }
    log::info!("reloaded sequence index from {:?}, {} sequences", filepath, dump.index.get_nb_sequences());
    Some(dump.index)
} // end of reload_index

/// reloads a valid dump in dirpath or builds the index and dumps it
pub fn build_or_reload(paths: &[PathBuf], dirpath: &Path, nb_threads: usize) -> Result<SequenceArchiveIndex> {
    if let Some(index) = reload_index(paths, dirpath) {
        return Ok(index);
    }
    let index = SequenceArchiveIndex::build(paths, nb_threads)?;
    // a failed dump only costs a rebuild at next start
    if let Err(e) = dump_index(&index, dirpath) {
        log::warn!("sequence index dump failed : {}", e);
    }
    Ok(index)
} // end of build_or_reload

//=========================================================================================

#[cfg(test)]
mod tests {

    use super::*;
    use std::fs::File;
    use std::io::Write;

    fn log_init_test() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[test]
    fn test_reload_and_invalidation() {
        log_init_test();
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("a.faa");
        File::create(&archive).unwrap().write_all(b">P1\nMKV\n").unwrap();
        let paths = vec![archive.clone()];
        //
        assert!(reload_index(&paths, dir.path()).is_none());
        let index = build_or_reload(&paths, dir.path(), 1).unwrap();
        assert_eq!(index.get_length("P1"), Some(3));
        assert!(dir.path().join(INDEX_DUMP_NAME).is_file());
        //
        let reloaded = reload_index(&paths, dir.path()).unwrap();
        assert_eq!(reloaded.get_record("P1"), index.get_record("P1"));
        // size change invalidates
        File::create(&archive).unwrap().write_all(b">P1\nMKVLLL\n>P2\nA\n").unwrap();
        assert!(reload_index(&paths, dir.path()).is_none());
        let rebuilt = build_or_reload(&paths, dir.path(), 1).unwrap();
        assert_eq!(rebuilt.get_length("P1"), Some(6));
        assert_eq!(rebuilt.get_sequence("P2").unwrap(), "A");
    } // end of test_reload_and_invalidation

    #[test]
    fn test_other_archive_list_invalidates() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.faa");
        let b = dir.path().join("b.faa");
        File::create(&a).unwrap().write_all(b">P1\nMKV\n").unwrap();
        File::create(&b).unwrap().write_all(b">P2\nMK\n").unwrap();
        build_or_reload(&[a.clone()], dir.path(), 1).unwrap();
        assert!(reload_index(&[a.clone(), b.clone()], dir.path()).is_none());
        assert!(reload_index(&[a], dir.path()).is_some());
    }

    #[test]
    fn test_dump_in_cache_dir() {
        log_init_test();
        let data = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        let archive = data.path().join("a.faa");
        File::create(&archive).unwrap().write_all(b">P1\nMKV\n").unwrap();
        let paths = vec![archive];
        // cache directory created on first dump, data directory left untouched
        let cachedir = cache.path().join("mimic");
        build_or_reload(&paths, &cachedir, 1).unwrap();
        assert!(cachedir.join(INDEX_DUMP_NAME).is_file());
        assert!(!data.path().join(INDEX_DUMP_NAME).exists());
        assert!(reload_index(&paths, &cachedir).is_some());
        // a dump that cannot be written only costs a rebuild
        let blocked = cache.path().join("file");
        File::create(&blocked).unwrap();
        let index = build_or_reload(&paths, &blocked.join("sub"), 1).unwrap();
        assert_eq!(index.get_length("P1"), Some(3));
    } // end of test_dump_in_cache_dir
} // end of mod tests
