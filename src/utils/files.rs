//! This file contains data directory exploration and input file selection

use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::{MimicError, Result};
use crate::utils::parameters::DataParams;

const BINDERS_SUFFIX: &str = "_merged_better_binders.csv";

/// Input files of one sample, as found in the data directory
#[derive(Clone, Debug)]
pub struct DataFiles {
    pub sample_id: String,
    pub binding_table: PathBuf,
    pub pfam_hits: PathBuf,
    pub kofam_hits: PathBuf,
    pub pfam_metagenome: Option<PathBuf>,
    pub kofam_metagenome: Option<PathBuf>,
    /// protein fasta archives, sorted by file name
    pub archives: Vec<PathBuf>,
}

impl DataFiles {
    /// Explores params data directory.
    /// The binding table and both hit tables are mandatory, metagenome tables and archives are not.
    pub fn discover(params: &DataParams) -> Result<Self> {
        let dirpath = params.get_data_dir();
        log::info!("exploring data directory : {:?}", dirpath);
        if !dirpath.is_dir() {
            return Err(MimicError::MissingInput(dirpath.to_path_buf()));
        }
        let names = sorted_file_names(dirpath)?;
        //
        let sample_id = match params.get_sample_id() {
            Some(s) => s.to_string(),
            None => {
                let binder_name = names
                    .iter()
                    .find(|n| n.ends_with(BINDERS_SUFFIX) && n.len() > BINDERS_SUFFIX.len())
                    .ok_or_else(|| MimicError::MissingInput(dirpath.join(format!("*{}", BINDERS_SUFFIX))))?;
                binder_name[..binder_name.len() - BINDERS_SUFFIX.len()].to_string()
            }
        };
        log::info!("sample id : {}", sample_id);
        //
        let binding_table = dirpath.join(format!("{}{}", sample_id, BINDERS_SUFFIX));
        if !binding_table.is_file() {
            return Err(MimicError::MissingInput(binding_table));
        }
        let pfam_hits = hit_file(dirpath, &sample_id, "PFAM")?;
        let kofam_hits = hit_file(dirpath, &sample_id, "KOFAM")?;
        let pfam_metagenome = optional_file(dirpath.join(format!("{}_PFAM_metagenome.tsv", sample_id)));
        let kofam_metagenome = optional_file(dirpath.join(format!("{}_KOFAM_metagenome.tsv", sample_id)));
        //
        let mut archives = Vec::<PathBuf>::new();
        for name in &names {
            if is_archive_name(name) {
                archives.push(dirpath.join(name));
            } else if is_compressed_archive_name(name) {
                log::warn!("skipping compressed archive {}, random access needs uncompressed fasta", name);
            }
        }
        if archives.is_empty() {
            log::warn!("no fasta archive found in {:?}, sequence lengths will be null", dirpath);
        }
        //
        let files = DataFiles {
            sample_id,
            binding_table,
            pfam_hits,
            kofam_hits,
            pfam_metagenome,
            kofam_metagenome,
            archives,
        };
        if log::log_enabled!(log::Level::Debug) {
            log::debug!("data files : {:?}", files);
        }
        Ok(files)
    } // end of discover
} // end of impl DataFiles

// hit table of better binders, with fallback to the whole hit table
fn hit_file(dirpath: &Path, sample_id: &str, source: &str) -> Result<PathBuf> {
    let better = dirpath.join(format!("{}_{}_better_binders.tsv", sample_id, source));
    if better.is_file() {
        return Ok(better);
    }
    let all = dirpath.join(format!("{}_{}_hits.tsv", sample_id, source));
    if all.is_file() {
        log::info!("no {:?}, falling back to {:?}", better, all);
        return Ok(all);
    }
    log::error!("no {} hit table for sample {}", source, sample_id);
    Err(MimicError::MissingInput(better))
} // end of hit_file

fn optional_file(path: PathBuf) -> Option<PathBuf> {
    if path.is_file() {
        Some(path)
    } else {
        log::info!("optional file {:?} not found", path);
        None
    }
}

fn sorted_file_names(dirpath: &Path) -> Result<Vec<String>> {
    let mut names = Vec::<String>::new();
    for entry in fs::read_dir(dirpath)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            // non utf8 names cannot match our patterns
            if let Ok(name) = entry.file_name().into_string() {
                names.push(name);
            }
        }
    }
    names.sort();
    Ok(names)
} // end of sorted_file_names

/// returns true if file name is the one of an uncompressed protein fasta file
pub fn is_archive_name(filename: &str) -> bool {
    filename.ends_with(".faa") || filename.ends_with(".fasta") || filename.ends_with(".fa")
}

// returns true if file name is a gzipped fasta file
pub fn is_compressed_archive_name(filename: &str) -> bool {
    filename.ends_with("faa.gz") || filename.ends_with("fa.gz") || filename.ends_with("fasta.gz")
}

//=========================================================================================

#[cfg(test)]
mod tests {

    use super::*;
    use std::fs::File;

    fn log_init_test() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn touch(dir: &Path, name: &str) {
        File::create(dir.join(name)).unwrap();
    }

    #[test]
    fn test_discover_with_fallback() {
        log_init_test();
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "S7_merged_better_binders.csv");
        touch(dir.path(), "S7_PFAM_better_binders.tsv");
        touch(dir.path(), "S7_KOFAM_hits.tsv");
        touch(dir.path(), "S7_PFAM_metagenome.tsv");
        touch(dir.path(), "b.faa");
        touch(dir.path(), "a.fasta");
        touch(dir.path(), "c.faa.gz");
        touch(dir.path(), "notes.txt");
        //
        let files = DataFiles::discover(&DataParams::new(dir.path())).unwrap();
        assert_eq!(files.sample_id, "S7");
        assert!(files.pfam_hits.ends_with("S7_PFAM_better_binders.tsv"));
        assert!(files.kofam_hits.ends_with("S7_KOFAM_hits.tsv"));
        assert!(files.pfam_metagenome.is_some());
        assert!(files.kofam_metagenome.is_none());
        let archives: Vec<String> = files
            .archives
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(archives, vec!["a.fasta".to_string(), "b.faa".to_string()]);
    } // end of test_discover_with_fallback

    #[test]
    fn test_discover_missing_hits_is_fatal() {
        log_init_test();
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "S7_merged_better_binders.csv");
        touch(dir.path(), "S7_PFAM_hits.tsv");
        let res = DataFiles::discover(&DataParams::new(dir.path()));
        assert!(matches!(res, Err(MimicError::MissingInput(_))));
    }

    #[test]
    fn test_discover_explicit_sample() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "A_merged_better_binders.csv");
        touch(dir.path(), "B_merged_better_binders.csv");
        touch(dir.path(), "B_PFAM_hits.tsv");
        touch(dir.path(), "B_KOFAM_hits.tsv");
        let params = DataParams::new(dir.path()).with_sample_id("B");
        let files = DataFiles::discover(&params).unwrap();
        assert!(files.binding_table.ends_with("B_merged_better_binders.csv"));
        // first sample in name order is chosen without explicit sample id, and it lacks hit tables
        assert!(DataFiles::discover(&DataParams::new(dir.path())).is_err());
    }
} // end of mod tests
