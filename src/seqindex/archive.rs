//! Offset index of fasta archives.
//!
//! Archives are scanned once, recording for each sequence the offset of its header line and its residue count.
//! Sequences are then retrieved by seeking to the header and parsing one record with needletail,
//! without reading the whole archive again.

use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use cpu_time::ProcessTime;
use fxhash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::errors::{MimicError, Result};
use crate::utils::files::{is_archive_name, is_compressed_archive_name};

/// location and length of one sequence
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SequenceRecord {
    /// rank of archive file in the index file list
    file_rank: u32,
    /// byte offset of the header line (the '>' character)
    offset: u64,
    /// number of residues, stop codon excluded
    length: usize,
}

impl SequenceRecord {
    pub fn get_file_rank(&self) -> usize {
        self.file_rank as usize
    }

    pub fn get_offset(&self) -> u64 {
        self.offset
    }

    pub fn get_length(&self) -> usize {
        self.length
    }
} // end of impl SequenceRecord

//==========================================================================================

/// Index from sequence id to its [SequenceRecord] across a list of archives
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SequenceArchiveIndex {
    files: Vec<PathBuf>,
    records: FxHashMap<String, SequenceRecord>,
}

impl SequenceArchiveIndex {
    /// an index with no archive, all lookups fail
    pub fn empty() -> Self {
        SequenceArchiveIndex::default()
    }

    /// Scans archives in parallel, one task per file.
    /// Per file indexes are merged in the order of `paths`, so on a duplicated id the last file wins.
    pub fn build(paths: &[PathBuf], nb_threads: usize) -> Result<Self> {
        log::info!("SequenceArchiveIndex::build, nb archives : {}", paths.len());
        let start_t = SystemTime::now();
        let cpu_start = ProcessTime::now();
        //
        for path in paths {
            let name = path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
            if is_compressed_archive_name(&name) || !is_archive_name(&name) {
                log::error!("archive {:?} cannot be indexed", path);
                return Err(MimicError::UnsupportedArchive(path.clone()));
            }
        }
        //
        let pool = rayon::ThreadPoolBuilder::new().num_threads(nb_threads.max(1)).build()?;
        // each file task sends its index, capacity avoids blocking producers
        let (send, receive) =
            crossbeam_channel::bounded::<(usize, Result<Vec<(String, SequenceRecord)>>)>(paths.len().max(1));
        pool.scope(|scope| {
            for (rank, path) in paths.iter().enumerate() {
                let send = send.clone();
                scope.spawn(move |_| {
                    let res = index_single_file(path, rank as u32);
                    if send.send((rank, res)).is_err() {
                        log::error!("index of {:?} could not be sent", path);
                    }
                });
            }
        });
        drop(send);
        //
        let mut per_file: Vec<Option<Vec<(String, SequenceRecord)>>> = (0..paths.len()).map(|_| None).collect();
        for (rank, res) in receive.iter() {
            per_file[rank] = Some(res?);
        }
        //
        let mut records = FxHashMap::<String, SequenceRecord>::default();
        let mut nb_collisions = 0usize;
        for (rank, entries) in per_file.into_iter().enumerate() {
            let entries = entries.ok_or_else(|| MimicError::Fasta(format!("no index received for {:?}", paths[rank])))?;
            log::debug!("archive {:?} : {} sequences", paths[rank], entries.len());
            for (id, record) in entries {
                if let Some(previous) = records.insert(id.clone(), record) {
                    nb_collisions += 1;
                    log::warn!(
                        "sequence {} found in {:?} and {:?}, keeping the last one",
                        id,
                        paths[previous.get_file_rank()],
                        paths[rank]
                    );
                }
            }
        }
        //
        let cpu_time = cpu_start.elapsed().as_secs();
        let elapsed_t = start_t.elapsed().map(|d| d.as_secs_f32()).unwrap_or(0.);
        log::info!(
            "SequenceArchiveIndex::build : {} sequences, {} duplicated ids, cpu time(s) {}, elapsed time(s) {}",
            records.len(),
            nb_collisions,
            cpu_time,
            elapsed_t
        );
        Ok(SequenceArchiveIndex {
            files: paths.to_vec(),
            records,
        })
    } // end of build

    pub fn get_files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn get_nb_sequences(&self) -> usize {
        self.records.len()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    pub fn get_record(&self, id: &str) -> Option<&SequenceRecord> {
        self.records.get(id)
    }

    /// residue count, answered from memory
    pub fn get_length(&self, id: &str) -> Option<usize> {
        self.records.get(id).map(|r| r.length)
    }

    /// retrieves one sequence by seeking to its recorded offset
    pub fn get_sequence(&self, id: &str) -> Result<String> {
        let record = self.records.get(id).ok_or_else(|| MimicError::not_found("sequence", id))?;
        let path = &self.files[record.get_file_rank()];
        let mut file = File::open(path)?;
        file.seek(SeekFrom::Start(record.offset))?;
        read_one_record(&mut file, id)
    } // end of get_sequence

    /// Retrieves many sequences, visiting each archive once in offset order.
    /// Unknown ids are skipped.
    pub fn get_batch(&self, ids: &[&str]) -> Result<FxHashMap<String, String>> {
        let mut located: Vec<(&str, &SequenceRecord)> = Vec::with_capacity(ids.len());
        for &id in ids {
            match self.records.get(id) {
                Some(record) => located.push((id, record)),
                None => log::debug!("get_batch : sequence {} not indexed", id),
            }
        }
        located.sort_unstable_by_key(|(_, r)| (r.file_rank, r.offset));
        located.dedup_by_key(|(id, _)| *id);
        //
        let mut sequences = FxHashMap::<String, String>::default();
        let mut first = 0;
        // one file opening per group of same rank
        while first < located.len() {
            let rank = located[first].1.file_rank;
            let last = located[first..]
                .iter()
                .position(|(_, r)| r.file_rank != rank)
                .map(|p| first + p)
                .unwrap_or(located.len());
            let mut file = File::open(&self.files[rank as usize])?;
            for (id, record) in &located[first..last] {
                file.seek(SeekFrom::Start(record.offset))?;
                let seq = read_one_record(&mut file, id)?;
                sequences.insert(id.to_string(), seq);
            }
            first = last;
        }
        log::trace!("get_batch : {} asked, {} retrieved", ids.len(), sequences.len());
        Ok(sequences)
    } // end of get_batch

    /// ids of indexed sequences, in no particular order
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(|s| s.as_str())
    }
} // end of impl SequenceArchiveIndex

//==========================================================================================

// parse the record at current position of reader, checking its id
fn read_one_record<R: Read + Send>(reader: R, id: &str) -> Result<String> {
    let mut fasta = needletail::parse_fastx_reader(reader)?;
    let record = match fasta.next() {
        Some(record) => record?,
        None => return Err(MimicError::Fasta(format!("no record at offset of {}", id))),
    };
    let header = String::from_utf8_lossy(record.id());
    if header.split_whitespace().next() != Some(id) {
        log::error!("index out of date, expected {} got header {}", id, header);
        return Err(MimicError::Fasta(format!("index out of date, expected {} at header {}", id, header)));
    }
    let mut seq: String = record
        .seq()
        .iter()
        .filter(|c| !c.is_ascii_whitespace())
        .map(|c| *c as char)
        .collect();
    if seq.ends_with('*') {
        seq.pop();
    }
    Ok(seq)
} // end of read_one_record

/// Scans one fasta file, returning (id, record) in file order.
/// Ids are the first word of header lines.
pub(crate) fn index_single_file(path: &Path, file_rank: u32) -> Result<Vec<(String, SequenceRecord)>> {
    log::debug!("indexing archive {:?}", path);
    let file = File::open(path).map_err(|e| {
        log::error!("cannot open archive {:?} : {}", path, e);
        e
    })?;
    let mut reader = BufReader::new(file);
    let mut entries = Vec::<(String, SequenceRecord)>::new();
    //
    let mut line = Vec::<u8>::with_capacity(1024);
    let mut offset: u64 = 0;
    // id, header offset, residue count, last residue
    let mut current: Option<(String, u64, usize, u8)> = None;
    loop {
        line.clear();
        let nb_read = reader.read_until(b'\n', &mut line)?;
        if nb_read == 0 {
            break;
        }
        if line[0] == b'>' {
            if let Some(done) = current.take() {
                entries.push(finish_record(done, file_rank));
            }
            let header = String::from_utf8_lossy(&line[1..]);
            let id = header.split_whitespace().next().unwrap_or("").to_string();
            if id.is_empty() {
                log::warn!("empty header at offset {} in {:?}", offset, path);
            }
            current = Some((id, offset, 0, 0));
        } else if let Some((_, _, ref mut count, ref mut last)) = current {
            for c in line.iter().filter(|c| !c.is_ascii_whitespace()) {
                *count += 1;
                *last = *c;
            }
        }
        offset += nb_read as u64;
    }
    if let Some(done) = current.take() {
        entries.push(finish_record(done, file_rank));
    }
    entries.retain(|(id, _)| !id.is_empty());
    Ok(entries)
} // end of index_single_file

fn finish_record(current: (String, u64, usize, u8), file_rank: u32) -> (String, SequenceRecord) {
    let (id, offset, mut length, last) = current;
    if last == b'*' {
        length -= 1;
    }
    (
        id,
        SequenceRecord {
            file_rank,
            offset,
            length,
        },
    )
}

//==========================================================================================

// end of mod tests
