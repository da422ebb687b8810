//! Domain hits of one annotation source.
//!
//! Hits come from tab separated hmmsearch domain tables with columns
//! `sequence_id  hmm_name  bitscore  evalue  env_from  env_to`.
//! Intervals are used as given, half open: `[env_from, env_to)`.
//! Hits are stored sorted by (sequence, start, domain) so hits of a sequence form a contiguous slice,
//! and indexed by domain for background counting.

use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use fxhash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

use crate::errors::{MimicError, Result};
use crate::seqindex::SequenceArchiveIndex;

/// annotation source of a hit
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter)]
pub enum HitSource {
    #[strum(serialize = "PFAM")]
    Pfam,
    #[strum(serialize = "KOFAM")]
    Kofam,
}

/// one domain occurrence on a sequence
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DomainHit {
    pub sequence_id: String,
    pub domain_id: String,
    pub source: HitSource,
    /// first residue, included
    pub start: usize,
    /// end, excluded
    pub end: usize,
    /// bitscore
    pub score: f64,
    /// evalue, always > 0
    pub significance: f64,
}

impl DomainHit {
    /// true if [start, end) lies inside the hit interval
    #[inline]
    pub fn contains(&self, start: usize, end: usize) -> bool {
        start >= self.start && end <= self.end
    }

    pub fn get_length(&self) -> usize {
        self.end - self.start
    }
} // end of impl DomainHit

//=========================================================================================

/// outcome of a table load, rejected rows are dropped
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadReport {
    pub loaded: usize,
    pub rejected: usize,
}

impl LoadReport {
    pub fn add(&mut self, other: &LoadReport) {
        self.loaded += other.loaded;
        self.rejected += other.rejected;
    }
}

//=========================================================================================

// column positions in a hit table header
struct HitColumns {
    sequence: usize,
    domain: usize,
    score: usize,
    significance: usize,
    start: usize,
    end: usize,
}

impl HitColumns {
    fn from_header(header: &csv::StringRecord, path: &Path) -> Result<Self> {
        let find = |names: &[&str]| -> Result<usize> {
            header
                .iter()
                .position(|h| names.contains(&h.trim()))
                .ok_or_else(|| MimicError::MalformedInput(format!("hit table {:?} has no column {}", path, names[0])))
        };
        Ok(HitColumns {
            sequence: find(&["sequence_id"])?,
            domain: find(&["hmm_name", "domain"])?,
            score: find(&["bitscore", "score"])?,
            significance: find(&["evalue", "e_value"])?,
            start: find(&["env_from", "start"])?,
            end: find(&["env_to", "end"])?,
        })
    }

    // None if the row must be rejected
    fn parse(
        &self,
        row: &csv::StringRecord,
        source: HitSource,
        lengths: Option<&SequenceArchiveIndex>,
    ) -> Option<DomainHit> {
        let sequence_id = row.get(self.sequence)?.trim();
        let domain_id = row.get(self.domain)?.trim();
        if sequence_id.is_empty() || domain_id.is_empty() {
            return None;
        }
        let score = row.get(self.score)?.trim().parse::<f64>().ok()?;
        let mut significance = row.get(self.significance)?.trim().parse::<f64>().ok()?;
        let start = row.get(self.start)?.trim().parse::<usize>().ok()?;
        let end = row.get(self.end)?.trim().parse::<usize>().ok()?;
        if !score.is_finite() || !significance.is_finite() || significance < 0. || start >= end {
            return None;
        }
        // underflowed evalue
        if significance == 0. {
            significance = f64::MIN_POSITIVE;
        }
        if let Some(length) = lengths.and_then(|index| index.get_length(sequence_id)) {
            if end > length {
                return None;
            }
        }
        Some(DomainHit {
            sequence_id: sequence_id.to_string(),
            domain_id: domain_id.to_string(),
            source,
            start,
            end,
            score,
            significance,
        })
    } // end of parse
} // end of impl HitColumns

//=========================================================================================

/// Hits of one source, grouped by sequence and by domain
#[derive(Debug)]
pub struct DomainHitStore {
    source: HitSource,
    /// sorted by sequence, start, domain
    hits: Vec<DomainHit>,
    by_sequence: FxHashMap<String, Range<usize>>,
    by_domain: FxHashMap<String, Vec<usize>>,
    /// domains with these prefixes only count in background
    background_prefixes: Vec<String>,
    /// domain -> nb instances, computed at first request
    frequencies: OnceLock<FxHashMap<String, usize>>,
}

impl DomainHitStore {
    /// Loads all hit tables of a source.
    /// If `lengths` is given, hits extending past the end of an indexed sequence are rejected.
    pub fn load(
        paths: &[PathBuf],
        source: HitSource,
        background_prefixes: &[String],
        lengths: Option<&SequenceArchiveIndex>,
    ) -> Result<(Self, LoadReport)> {
        let mut hits = Vec::<DomainHit>::new();
        let mut report = LoadReport::default();
        for path in paths {
            let file_report = load_hit_table(path, source, lengths, &mut hits)?;
            log::debug!("hit table {:?} : {:?}", path, file_report);
            report.add(&file_report);
        }
        log::info!(
            "{} hits loaded : {}, rejected : {}",
            source,
            report.loaded,
            report.rejected
        );
        Ok((DomainHitStore::from_hits(source, hits, background_prefixes), report))
    } // end of load

    /// builds store from already validated hits
    pub fn from_hits(source: HitSource, mut hits: Vec<DomainHit>, background_prefixes: &[String]) -> Self {
        hits.sort_by(|a, b| {
            a.sequence_id
                .cmp(&b.sequence_id)
                .then(a.start.cmp(&b.start))
                .then(a.domain_id.cmp(&b.domain_id))
        });
        //
        let mut by_sequence = FxHashMap::<String, Range<usize>>::default();
        let mut by_domain = FxHashMap::<String, Vec<usize>>::default();
        let mut first = 0;
        for i in 0..hits.len() {
            if i + 1 == hits.len() || hits[i + 1].sequence_id != hits[i].sequence_id {
                by_sequence.insert(hits[i].sequence_id.clone(), first..i + 1);
                first = i + 1;
            }
            match by_domain.get_mut(&hits[i].domain_id) {
                Some(instances) => instances.push(i),
                None => {
                    by_domain.insert(hits[i].domain_id.clone(), vec![i]);
                }
            }
        }
        log::debug!(
            "{} store : {} hits, {} sequences, {} domains",
            source,
            hits.len(),
            by_sequence.len(),
            by_domain.len()
        );
        DomainHitStore {
            source,
            hits,
            by_sequence,
            by_domain,
            background_prefixes: background_prefixes.to_vec(),
            frequencies: OnceLock::new(),
        }
    } // end of from_hits

    pub fn get_source(&self) -> HitSource {
        self.source
    }

    pub fn get_nb_hits(&self) -> usize {
        self.hits.len()
    }

    pub fn get_nb_sequences(&self) -> usize {
        self.by_sequence.len()
    }

    pub fn get_nb_domains(&self) -> usize {
        self.by_domain.len()
    }

    /// hits of a sequence sorted by start, ties by domain. Empty for an unknown sequence.
    pub fn hits_for_sequence(&self, id: &str) -> &[DomainHit] {
        match self.by_sequence.get(id) {
            Some(range) => &self.hits[range.clone()],
            None => &[],
        }
    }

    /// hits of a sequence whose domain is not background only
    pub fn target_hits_for_sequence<'a>(&'a self, id: &str) -> impl Iterator<Item = &'a DomainHit> + 'a {
        self.hits_for_sequence(id)
            .iter()
            .filter(move |h| !self.is_background_only(&h.domain_id))
    }

    /// all instances of a domain, in (sequence, start) order
    pub fn instances_for_domain(&self, id: &str) -> Vec<&DomainHit> {
        match self.by_domain.get(id) {
            Some(instances) => instances.iter().map(|i| &self.hits[*i]).collect(),
            None => Vec::new(),
        }
    }

    /// distinct domain names found on a sequence
    pub fn domain_names_for_sequence(&self, id: &str) -> FxHashSet<&str> {
        self.hits_for_sequence(id).iter().map(|h| h.domain_id.as_str()).collect()
    }

    pub fn sequence_ids(&self) -> impl Iterator<Item = &str> {
        self.by_sequence.keys().map(|s| s.as_str())
    }

    pub fn contains_sequence(&self, id: &str) -> bool {
        self.by_sequence.contains_key(id)
    }

    /// Number of instances of each domain over the whole store, background only domains included.
    /// Computed once, this is the denominator of all enrichment computations.
    pub fn global_frequency_table(&self) -> &FxHashMap<String, usize> {
        self.frequencies.get_or_init(|| {
            log::debug!("computing {} global domain frequencies", self.source);
            self.by_domain
                .iter()
                .map(|(domain, instances)| (domain.clone(), instances.len()))
                .collect()
        })
    }

    /// sum of the global frequency table
    pub fn get_background_total(&self) -> usize {
        self.hits.len()
    }

    /// number of hits on domains that are not background only
    pub fn get_target_total(&self) -> usize {
        self.hits.iter().filter(|h| !self.is_background_only(&h.domain_id)).count()
    }

    pub fn is_background_only(&self, domain_id: &str) -> bool {
        self.background_prefixes.iter().any(|p| domain_id.starts_with(p.as_str()))
    }

    /// frequencies of the `n` most frequent domains, ties by name
    pub fn top_domains(&self, n: usize) -> Vec<(String, usize)> {
        let mut counts: Vec<(String, usize)> = self
            .global_frequency_table()
            .iter()
            .map(|(d, c)| (d.clone(), *c))
            .collect();
        counts.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        counts.truncate(n);
        counts
    }
} // end of impl DomainHitStore

// parse one hit table, appending valid hits
fn load_hit_table(
    path: &Path,
    source: HitSource,
    lengths: Option<&SequenceArchiveIndex>,
    hits: &mut Vec<DomainHit>,
) -> Result<LoadReport> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .flexible(true)
        .from_path(path)
        .map_err(|e| {
            log::error!("cannot open hit table {:?} : {}", path, e);
            e
        })?;
    let columns = HitColumns::from_header(reader.headers()?, path)?;
    //
    let mut report = LoadReport::default();
    for row in reader.records() {
        let row = match row {
            Ok(row) => row,
            Err(e) if e.is_io_error() => return Err(e.into()),
            Err(e) => {
                log::trace!("unreadable row in {:?} : {}", path, e);
                report.rejected += 1;
                continue;
            }
        };
        match columns.parse(&row, source, lengths) {
            Some(hit) => {
                hits.push(hit);
                report.loaded += 1;
            }
            None => {
                if log::log_enabled!(log::Level::Trace) {
                    log::trace!("rejected hit row : {:?}", row);
                }
                report.rejected += 1;
            }
        }
    }
    Ok(report)
} // end of load_hit_table

/// instance counts of domains over a set of sequences, as (counts, total)
pub fn domain_counts_for_sequences<'a, I>(
    store: &DomainHitStore,
    sequences: I,
    with_background_only: bool,
) -> (FxHashMap<String, usize>, usize)
where
    I: IntoIterator<Item = &'a str>,
{
    let mut counts = FxHashMap::<String, usize>::default();
    let mut total = 0usize;
    for id in sequences {
        for hit in store.hits_for_sequence(id) {
            if !with_background_only && store.is_background_only(&hit.domain_id) {
                continue;
            }
            *counts.entry(hit.domain_id.clone()).or_insert(0) += 1;
            total += 1;
        }
    }
    (counts, total)
} // end of domain_counts_for_sequences

//=========================================================================================

#[cfg(test)]
mod tests {

    use super::*;
    use std::fs::File;
    use std::io::Write;
    use std::str::FromStr;

    fn log_init_test() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    const HEADER: &str = "sequence_id\thmm_name\tbitscore\tevalue\tenv_from\tenv_to\n";

    fn write_table(dir: &Path, name: &str, rows: &[&str]) -> PathBuf {
        let path = dir.join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(HEADER.as_bytes()).unwrap();
        for row in rows {
            writeln!(file, "{}", row).unwrap();
        }
        path
    }

    fn hit(seq: &str, domain: &str, start: usize, end: usize) -> DomainHit {
        DomainHit {
            sequence_id: seq.to_string(),
            domain_id: domain.to_string(),
            source: HitSource::Pfam,
            start,
            end,
            score: 10.,
            significance: 1e-5,
        }
    }

    #[test]
    fn test_rejection_accounting() {
        log_init_test();
        let dir = tempfile::tempdir().unwrap();
        let path = write_table(dir.path(), "pfam.tsv", &["SEQ1\tPF00001\t50.2\t1e-10\t10\t60", "SEQ1\tPF00002\t12.0\t0.01\t30\t30"]);
        let (store, report) = DomainHitStore::load(&[path], HitSource::Pfam, &[], None).unwrap();
        assert_eq!(report, LoadReport { loaded: 1, rejected: 1 });
        assert_eq!(store.get_nb_hits(), 1);
        let hits = store.hits_for_sequence("SEQ1");
        assert_eq!(hits.len(), 1);
        assert_eq!((hits[0].start, hits[0].end), (10, 60));
        assert_eq!(hits[0].domain_id, "PF00001");
    } // end of test_rejection_accounting

    #[test]
    fn test_malformed_rows_rejected() {
        log_init_test();
        let dir = tempfile::tempdir().unwrap();
        let path = write_table(
            dir.path(),
            "kofam.tsv",
            &[
                "\tK00001\t50\t1e-3\t1\t20",
                "S1\tK00001\tnan\t1e-3\t1\t20",
                "S1\tK00001\t40\tinf\t1\t20",
                "S1\tK00001\t40\t-1\t1\t20",
                "S1\tK00001\t40\t1e-3\t25\t20",
                "S1\tK00001\tabc\t1e-3\t1\t20",
                "S1\tK00001\t40\t0\t1\t20",
            ],
        );
        let (store, report) = DomainHitStore::load(&[path], HitSource::Kofam, &[], None).unwrap();
        assert_eq!(report, LoadReport { loaded: 1, rejected: 6 });
        let hits = store.hits_for_sequence("S1");
        assert_eq!(hits[0].source, HitSource::Kofam);
        assert!(hits[0].significance > 0.);
    }

    #[test]
    fn test_missing_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.tsv");
        File::create(&path).unwrap().write_all(b"sequence_id\thmm_name\n").unwrap();
        let res = DomainHitStore::load(&[path], HitSource::Pfam, &[], None);
        assert!(matches!(res, Err(MimicError::MalformedInput(_))));
    }

    #[test]
    fn test_length_bound_rejection() {
        log_init_test();
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("a.faa");
        File::create(&archive).unwrap().write_all(b">S1\nMKVLAAGTWW\n").unwrap();
        let index = SequenceArchiveIndex::build(&[archive], 1).unwrap();
        let path = write_table(dir.path(), "pfam.tsv", &["S1\tPF1\t5\t0.1\t0\t10", "S1\tPF2\t5\t0.1\t2\t11", "S9\tPF2\t5\t0.1\t2\t500"]);
        let (_, report) = DomainHitStore::load(&[path], HitSource::Pfam, &[], Some(&index)).unwrap();
        // S9 is not indexed, its length is unknown and its hit kept
        assert_eq!(report, LoadReport { loaded: 2, rejected: 1 });
    }

    #[test]
    fn test_grouping_and_order() {
        let hits = vec![
            hit("B", "PF3", 40, 80),
            hit("A", "PF2", 30, 50),
            hit("A", "PF9", 5, 20),
            hit("A", "PF1", 30, 45),
            hit("B", "PF2", 1, 10),
        ];
        let store = DomainHitStore::from_hits(HitSource::Pfam, hits, &[]);
        let a: Vec<(&str, usize)> = store.hits_for_sequence("A").iter().map(|h| (h.domain_id.as_str(), h.start)).collect();
        assert_eq!(a, vec![("PF9", 5), ("PF1", 30), ("PF2", 30)]);
        assert!(store.hits_for_sequence("C").is_empty());
        //
        let pf2: Vec<&str> = store.instances_for_domain("PF2").iter().map(|h| h.sequence_id.as_str()).collect();
        assert_eq!(pf2, vec!["A", "B"]);
        assert!(store.instances_for_domain("PF404").is_empty());
        assert_eq!(store.get_nb_sequences(), 2);
        assert_eq!(store.get_nb_domains(), 4);
    }

    #[test]
    fn test_frequency_table_memoized() {
        let hits = vec![hit("A", "PF1", 1, 5), hit("B", "PF1", 1, 5), hit("B", "META_X", 6, 9)];
        let store = DomainHitStore::from_hits(HitSource::Pfam, hits, &["META_".to_string()]);
        let table = store.global_frequency_table();
        assert_eq!(table["PF1"], 2);
        // background only domains stay in background
        assert_eq!(table["META_X"], 1);
        assert_eq!(store.get_background_total(), 3);
        assert_eq!(store.get_target_total(), 2);
        let again = store.global_frequency_table();
        assert!(std::ptr::eq(table, again));
        //
        assert!(store.is_background_only("META_X"));
        assert!(!store.is_background_only("PF1"));
        let targets: Vec<&str> = store.target_hits_for_sequence("B").map(|h| h.domain_id.as_str()).collect();
        assert_eq!(targets, vec!["PF1"]);
        //
        let (counts, total) = domain_counts_for_sequences(&store, ["A", "B"], false);
        assert_eq!(total, 2);
        assert!(!counts.contains_key("META_X"));
    }

    #[test]
    fn test_top_domains_and_source_names() {
        let hits = vec![hit("A", "PF2", 1, 5), hit("B", "PF1", 1, 5), hit("C", "PF1", 1, 5), hit("C", "PF3", 6, 8)];
        let store = DomainHitStore::from_hits(HitSource::Pfam, hits, &[]);
        assert_eq!(store.top_domains(2), vec![("PF1".to_string(), 2), ("PF2".to_string(), 1)]);
        assert_eq!(HitSource::Kofam.to_string(), "KOFAM");
        assert_eq!(HitSource::from_str("PFAM").unwrap(), HitSource::Pfam);
    }
} // end of mod tests
