//! single sequence deep dive : content, domains, binding rows, peptide positions and related binders

use std::collections::{BTreeMap, BTreeSet};

use fxhash::{FxHashMap, FxHashSet};
use serde::Serialize;

use crate::binding::BindingRecord;
use crate::domains::{DomainHit, DomainHitStore, HitCatalog, HitSource};
use crate::errors::{MimicError, Result};
use crate::merge::MergedTable;
use crate::seqindex::SequenceArchiveIndex;

// weights of one shared domain name when scoring related sequences
const PFAM_WEIGHT: f64 = 3.;
const KOFAM_WEIGHT: f64 = 2.;
const PFAM_METAGENOME_WEIGHT: f64 = 1.5;
const KOFAM_METAGENOME_WEIGHT: f64 = 1.;

/// Half open interval of a binding peptide on its sequence.
/// The interval of the record is used if present, else the first exact occurrence of the peptide.
pub fn locate_peptide(record: &BindingRecord, sequence: Option<&str>) -> Option<(usize, usize)> {
    if record.peptide_interval.is_some() {
        return record.peptide_interval;
    }
    let peptide = record.peptide.as_deref()?;
    if peptide.is_empty() {
        return None;
    }
    let start = sequence?.find(peptide)?;
    Some((start, start + peptide.len()))
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PeptidePosition {
    pub row_id: usize,
    pub peptide: Option<String>,
    pub allele: Option<String>,
    pub start: usize,
    pub end: usize,
    /// false if the interval was found by searching the peptide in the sequence
    pub given: bool,
}

/// number of peptides covering a residue position
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CoverageBin {
    pub position: usize,
    pub count: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RelatedSequence {
    pub sequence_id: String,
    pub score: f64,
    pub shared_domains: Vec<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct SequenceDetail {
    pub sequence_id: String,
    /// None if not archived
    pub sequence: Option<String>,
    pub length: Option<usize>,
    pub pfam: Vec<DomainHit>,
    pub kofam: Vec<DomainHit>,
    pub pfam_metagenome: Vec<DomainHit>,
    pub kofam_metagenome: Vec<DomainHit>,
    pub binding_rows: Vec<BindingRecord>,
    pub peptide_positions: Vec<PeptidePosition>,
    /// covered positions only, in increasing order
    pub coverage: Vec<CoverageBin>,
    pub related: Vec<RelatedSequence>,
}

/// Gathers everything known about sequence `id`.
/// Fails with NotFound if the sequence has no binding row and is not archived.
pub fn sequence_detail(
    id: &str,
    table: &MergedTable,
    catalog: &HitCatalog,
    index: &SequenceArchiveIndex,
    related_limit: usize,
) -> Result<SequenceDetail> {
    let rows = table.rows_for_sequence(id);
    let archived = index.contains(id);
    if rows.is_empty() && !archived {
        return Err(MimicError::not_found("sequence", id));
    }
    let sequence = if archived { Some(index.get_sequence(id)?) } else { None };
    let length = index.get_length(id);
    //
    let mut peptide_positions = Vec::<PeptidePosition>::with_capacity(rows.len());
    for row in &rows {
        let r = &row.record;
        match locate_peptide(r, sequence.as_deref()) {
            Some((start, end)) => peptide_positions.push(PeptidePosition {
                row_id: r.row_id,
                peptide: r.peptide.clone(),
                allele: r.allele.clone(),
                start,
                end,
                given: r.peptide_interval.is_some(),
            }),
            None => log::debug!("peptide of row {} not located on {}", r.row_id, id),
        }
    }
    let coverage = coverage_histogram(&peptide_positions, length);
    let background_hits = |source: HitSource| -> Vec<DomainHit> {
        catalog
            .background(source)
            .map(|store| store.hits_for_sequence(id).to_vec())
            .unwrap_or_default()
    };
    let detail = SequenceDetail {
        sequence_id: id.to_string(),
        sequence,
        length,
        pfam: catalog.store(HitSource::Pfam).hits_for_sequence(id).to_vec(),
        kofam: catalog.store(HitSource::Kofam).hits_for_sequence(id).to_vec(),
        pfam_metagenome: background_hits(HitSource::Pfam),
        kofam_metagenome: background_hits(HitSource::Kofam),
        binding_rows: rows.iter().map(|r| r.record.clone()).collect(),
        peptide_positions,
        coverage,
        related: related_sequences(id, table, catalog, related_limit),
    };
    log::debug!(
        "detail of {} : {} binding rows, {} pfam hits, {} kofam hits, {} related",
        id,
        detail.binding_rows.len(),
        detail.pfam.len(),
        detail.kofam.len(),
        detail.related.len()
    );
    Ok(detail)
} // end of sequence_detail

// residues past a known length are not counted
fn coverage_histogram(positions: &[PeptidePosition], length: Option<usize>) -> Vec<CoverageBin> {
    let mut counts = BTreeMap::<usize, usize>::new();
    for p in positions {
        let end = length.map_or(p.end, |l| p.end.min(l));
        for position in p.start..end {
            *counts.entry(position).or_insert(0) += 1;
        }
    }
    counts
        .into_iter()
        .map(|(position, count)| CoverageBin { position, count })
        .collect()
}

/// Other binder sequences sharing domain names with `id`, scored by weighted shared names.
/// Best `limit` sequences, score descending then id.
pub fn related_sequences(id: &str, table: &MergedTable, catalog: &HitCatalog, limit: usize) -> Vec<RelatedSequence> {
    let weighted: [(Option<&DomainHitStore>, f64); 4] = [
        (Some(catalog.store(HitSource::Pfam)), PFAM_WEIGHT),
        (Some(catalog.store(HitSource::Kofam)), KOFAM_WEIGHT),
        (catalog.background(HitSource::Pfam), PFAM_METAGENOME_WEIGHT),
        (catalog.background(HitSource::Kofam), KOFAM_METAGENOME_WEIGHT),
    ];
    let mut scores = FxHashMap::<&str, (f64, BTreeSet<&str>)>::default();
    for (store, weight) in weighted.iter() {
        let store = match store {
            Some(store) => store,
            None => continue,
        };
        for domain in store.domain_names_for_sequence(id) {
            let mut seen = FxHashSet::<&str>::default();
            for hit in store.instances_for_domain(domain) {
                let other = hit.sequence_id.as_str();
                if other == id || !table.contains_sequence(other) || !seen.insert(other) {
                    continue;
                }
                let entry = scores.entry(other).or_insert((0., BTreeSet::new()));
                entry.0 += weight;
                entry.1.insert(domain);
            }
        }
    }
    let mut related: Vec<RelatedSequence> = scores
        .into_iter()
        .filter(|(_, (score, _))| *score > 0.)
        .map(|(other, (score, shared))| RelatedSequence {
            sequence_id: other.to_string(),
            score,
            shared_domains: shared.into_iter().map(|d| d.to_string()).collect(),
        })
        .collect();
    related.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.sequence_id.cmp(&b.sequence_id))
    });
    related.truncate(limit);
    related
} // end of related_sequences

//=========================================================================================

#[cfg(test)]
mod tests {

    use super::*;
    use crate::binding::BindingRecordTable;
    use crate::merge::merge;
    use crate::merge::tests::{catalog_of, hit, record};
    use crate::schema::Schema;
    use std::fs::File;
    use std::io::Write;

    fn log_init_test() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[test]
    fn test_locate_peptide() {
        let mut r = BindingRecord::new(0, "S", "HLA-A", "LAAG");
        assert_eq!(locate_peptide(&r, Some("MKVLAAGTW")), Some((3, 7)));
        assert_eq!(locate_peptide(&r, Some("MKVW")), None);
        assert_eq!(locate_peptide(&r, None), None);
        r.peptide_interval = Some((10, 19));
        assert_eq!(locate_peptide(&r, Some("MKVLAAGTW")), Some((10, 19)));
    }

    #[test]
    fn test_sequence_detail() {
        log_init_test();
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("s.faa");
        let mut file = File::create(&archive).unwrap();
        writeln!(file, ">A some protein").unwrap();
        writeln!(file, "MKVLAAGTWWKLMN").unwrap();
        writeln!(file, ">ORPHAN").unwrap();
        writeln!(file, "MMMM*").unwrap();
        drop(file);
        let index = SequenceArchiveIndex::build(&[archive], 1).unwrap();
        //
        let catalog = catalog_of(
            vec![hit(HitSource::Pfam, "A", "PF1", 0, 10, 20.), hit(HitSource::Pfam, "B", "PF1", 2, 8, 10.)],
            vec![hit(HitSource::Kofam, "A", "K1", 0, 12, 20.)],
            &[],
        );
        let mut with_interval = record(1, "A", "HLA-B", Some(50.), "WB", "C1");
        with_interval.peptide_interval = Some((2, 5));
        let mut searched = record(0, "A", "HLA-A", Some(10.), "SB", "C1");
        searched.peptide = Some("AAGT".to_string());
        let records = vec![searched, with_interval, record(2, "B", "HLA-A", None, "SB", "C2")];
        let merged = merge(BindingRecordTable::from_records(Schema::full(), records), &catalog, &index);
        //
        let detail = sequence_detail("A", &merged, &catalog, &index, 5).unwrap();
        assert_eq!(detail.sequence.as_deref(), Some("MKVLAAGTWWKLMN"));
        assert_eq!(detail.length, Some(14));
        assert_eq!(detail.pfam.len(), 1);
        assert_eq!(detail.kofam.len(), 1);
        assert!(detail.pfam_metagenome.is_empty());
        assert_eq!(detail.binding_rows.len(), 2);
        assert_eq!(detail.peptide_positions[0].start, 4);
        assert!(!detail.peptide_positions[0].given);
        assert_eq!(detail.peptide_positions[1].end, 5);
        // [4,8) and [2,5) overlap on position 4
        let covered: Vec<(usize, usize)> = detail.coverage.iter().map(|b| (b.position, b.count)).collect();
        assert_eq!(covered, vec![(2, 1), (3, 1), (4, 2), (5, 1), (6, 1), (7, 1)]);
        assert_eq!(detail.related.len(), 1);
        assert_eq!(detail.related[0].sequence_id, "B");
        assert_eq!(detail.related[0].score, 3.);
        //
        // archived without binding rows
        let orphan = sequence_detail("ORPHAN", &merged, &catalog, &index, 5).unwrap();
        assert_eq!(orphan.sequence.as_deref(), Some("MMMM"));
        assert!(orphan.binding_rows.is_empty());
        // unknown everywhere
        let missing = sequence_detail("NOWHERE", &merged, &catalog, &index, 5);
        assert!(matches!(missing, Err(MimicError::NotFound { .. })));
    } // end of test_sequence_detail

    #[test]
    fn test_related_weights() {
        let catalog = catalog_of(
            vec![
                hit(HitSource::Pfam, "A", "PF1", 0, 10, 1.),
                hit(HitSource::Pfam, "A", "PF2", 20, 30, 1.),
                hit(HitSource::Pfam, "B", "PF1", 0, 10, 1.),
                hit(HitSource::Pfam, "B", "PF1", 40, 50, 1.),
                hit(HitSource::Pfam, "C", "PF2", 0, 10, 1.),
                hit(HitSource::Pfam, "NOTBINDER", "PF2", 0, 10, 1.),
            ],
            vec![hit(HitSource::Kofam, "A", "K1", 0, 10, 1.), hit(HitSource::Kofam, "C", "K1", 0, 10, 1.)],
            &[],
        )
        .with_backgrounds(None, Some(DomainHitStore::from_hits(HitSource::Kofam, vec![hit(HitSource::Kofam, "A", "K7", 0, 9, 1.), hit(HitSource::Kofam, "B", "K7", 0, 9, 1.)], &[])));
        let records = vec![
            record(0, "A", "HLA-A", None, "SB", "C1"),
            record(1, "B", "HLA-A", None, "SB", "C1"),
            record(2, "C", "HLA-A", None, "SB", "C1"),
        ];
        let merged = merge(BindingRecordTable::from_records(Schema::full(), records), &catalog, &SequenceArchiveIndex::empty());
        let related = related_sequences("A", &merged, &catalog, 5);
        // C : PF2 + K1 = 5, B : PF1 once + K7 = 4
        assert_eq!(related.len(), 2);
        assert_eq!(related[0].sequence_id, "C");
        assert_eq!(related[0].score, 5.);
        assert_eq!(related[0].shared_domains, vec!["K1", "PF2"]);
        assert_eq!(related[1].sequence_id, "B");
        assert_eq!(related[1].score, 4.);
        assert_eq!(related_sequences("A", &merged, &catalog, 1).len(), 1);
    }
} // end of mod tests
