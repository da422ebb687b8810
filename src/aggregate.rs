//! aggregation over subsets of merged rows : summaries, chart data and domain fold enrichment
//!
//! All functions are pure, they take the subset as a slice of row references so that a filtered
//! subset never has to be copied. Domain counts over a subset are hit instances over the distinct
//! sequences of the subset, the same unit as the store frequency table used as background.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use fxhash::{FxHashMap, FxHashSet};
use serde::{Serialize, Serializer};

use crate::domains::{domain_counts_for_sequences, DomainHitStore, HitCatalog, HitSource};
use crate::errors::{MimicError, Result};
use crate::merge::MergedRow;

/// min, max, mean and median of a numeric column, all None on an empty set
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct NumericSummary {
    pub count: usize,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
    pub median: Option<f64>,
}

impl NumericSummary {
    pub fn from_values(mut values: Vec<f64>) -> Self {
        if values.is_empty() {
            return NumericSummary::default();
        }
        values.sort_unstable_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
        let n = values.len();
        let median = if n % 2 == 1 {
            values[n / 2]
        } else {
            (values[n / 2 - 1] + values[n / 2]) / 2.
        };
        NumericSummary {
            count: n,
            min: Some(values[0]),
            max: Some(values[n - 1]),
            mean: Some(values.iter().sum::<f64>() / n as f64),
            median: Some(median),
        }
    }
} // end of impl NumericSummary

/// domain coverage of a subset for one source
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct DomainCoverage {
    /// rows whose sequence has at least one hit
    pub rows_with_domains: usize,
    /// None on an empty subset
    pub fraction_with_domains: Option<f64>,
    /// average number of hits per row
    pub average_domain_count: Option<f64>,
    /// distinct sequences with at least one hit
    pub sequences_with_domains: usize,
    pub distinct_domains: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AggregateSummary {
    pub total_rows: usize,
    pub distinct_genes: usize,
    pub distinct_alleles: usize,
    pub distinct_accessions: usize,
    pub binding_level_counts: BTreeMap<String, usize>,
    pub allele_counts: BTreeMap<String, usize>,
    pub affinity: NumericSummary,
    pub score: NumericSummary,
    pub rank: NumericSummary,
    pub sequence_length: NumericSummary,
    pub pfam: DomainCoverage,
    pub kofam: DomainCoverage,
}

// running counters for one source
#[derive(Default)]
struct CoverageCounter<'a> {
    rows_with_domains: usize,
    nb_hits: usize,
    sequences: FxHashSet<&'a str>,
    domains: FxHashSet<&'a str>,
}

impl<'a> CoverageCounter<'a> {
    fn add(&mut self, row: &'a MergedRow, source: HitSource) {
        let hits = row.hits(source);
        self.nb_hits += hits.len();
        if !hits.is_empty() {
            self.rows_with_domains += 1;
            self.sequences.insert(&row.record.sequence_id);
            for hit in hits {
                self.domains.insert(&hit.domain_id);
            }
        }
    }

    fn finish(self, total_rows: usize) -> DomainCoverage {
        let (fraction, average) = if total_rows == 0 {
            (None, None)
        } else {
            (
                Some(self.rows_with_domains as f64 / total_rows as f64),
                Some(self.nb_hits as f64 / total_rows as f64),
            )
        };
        DomainCoverage {
            rows_with_domains: self.rows_with_domains,
            fraction_with_domains: fraction,
            average_domain_count: average,
            sequences_with_domains: self.sequences.len(),
            distinct_domains: self.domains.len(),
        }
    }
} // end of impl CoverageCounter

/// Summary of a subset in one pass. An empty subset gives zero counts and null numeric fields.
pub fn summarize(rows: &[&MergedRow]) -> AggregateSummary {
    let mut genes = FxHashSet::<&str>::default();
    let mut alleles = FxHashSet::<&str>::default();
    let mut accessions = FxHashSet::<&str>::default();
    let mut binding_level_counts = BTreeMap::<String, usize>::new();
    let mut allele_counts = BTreeMap::<String, usize>::new();
    let mut affinities = Vec::<f64>::new();
    let mut scores = Vec::<f64>::new();
    let mut ranks = Vec::<f64>::new();
    // one length per distinct sequence
    let mut lengths = FxHashMap::<&str, f64>::default();
    let mut pfam = CoverageCounter::default();
    let mut kofam = CoverageCounter::default();
    //
    for row in rows {
        let r = &row.record;
        if row.is_valid_sequence() {
            genes.insert(&r.sequence_id);
            if let Some(length) = row.get_sequence_length() {
                lengths.insert(&r.sequence_id, length as f64);
            }
        }
        if let Some(allele) = &r.allele {
            alleles.insert(allele);
            *allele_counts.entry(allele.clone()).or_insert(0) += 1;
        }
        if let Some(accession) = &r.accession {
            accessions.insert(accession);
        }
        if let Some(level) = &r.bind_level {
            *binding_level_counts.entry(level.clone()).or_insert(0) += 1;
        }
        affinities.extend(r.affinity);
        scores.extend(r.score);
        ranks.extend(r.rank);
        pfam.add(row, HitSource::Pfam);
        kofam.add(row, HitSource::Kofam);
    }
    let total_rows = rows.len();
    log::debug!("summarized {} rows, {} distinct genes", total_rows, genes.len());
    AggregateSummary {
        total_rows,
        distinct_genes: genes.len(),
        distinct_alleles: alleles.len(),
        distinct_accessions: accessions.len(),
        binding_level_counts,
        allele_counts,
        affinity: NumericSummary::from_values(affinities),
        score: NumericSummary::from_values(scores),
        rank: NumericSummary::from_values(ranks),
        sequence_length: NumericSummary::from_values(lengths.into_values().collect()),
        pfam: pfam.finish(total_rows),
        kofam: kofam.finish(total_rows),
    }
} // end of summarize

//=========================================================================================

/// Fold enrichment of a domain. A domain absent from background but present in target is `Exclusive`,
/// serialized as the string "exclusive" so that no infinite float reaches a json payload.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum FoldEnrichment {
    Ratio(f64),
    Exclusive,
}

impl FoldEnrichment {
    pub fn is_exclusive(&self) -> bool {
        matches!(self, FoldEnrichment::Exclusive)
    }

    pub fn get_ratio(&self) -> Option<f64> {
        match self {
            FoldEnrichment::Ratio(r) => Some(*r),
            FoldEnrichment::Exclusive => None,
        }
    }
}

impl Serialize for FoldEnrichment {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            FoldEnrichment::Ratio(r) => serializer.serialize_f64(*r),
            FoldEnrichment::Exclusive => serializer.serialize_str("exclusive"),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub enum EnrichmentStatus {
    Enriched,
    Depleted,
    Exclusive,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EnrichmentEntry {
    pub domain: String,
    pub target_count: usize,
    pub target_fraction: f64,
    pub background_count: usize,
    pub background_fraction: f64,
    pub fold: FoldEnrichment,
    pub status: EnrichmentStatus,
}

impl EnrichmentEntry {
    // None when both fractions are null
    fn new(domain: &str, target_count: usize, target_total: usize, background_count: usize, background_total: usize) -> Option<Self> {
        let target_fraction = fraction(target_count, target_total);
        let background_fraction = fraction(background_count, background_total);
        if target_fraction == 0. && background_fraction == 0. {
            return None;
        }
        let (fold, status) = if background_fraction == 0. {
            (FoldEnrichment::Exclusive, EnrichmentStatus::Exclusive)
        } else {
            let ratio = target_fraction / background_fraction;
            let status = if ratio >= 1. {
                EnrichmentStatus::Enriched
            } else {
                EnrichmentStatus::Depleted
            };
            (FoldEnrichment::Ratio(ratio), status)
        };
        Some(EnrichmentEntry {
            domain: domain.to_string(),
            target_count,
            target_fraction,
            background_count,
            background_fraction,
            fold,
            status,
        })
    }
} // end of impl EnrichmentEntry

fn fraction(count: usize, total: usize) -> f64 {
    if total == 0 {
        0.
    } else {
        count as f64 / total as f64
    }
}

/// exclusive first, then fold descending, then target count descending, then domain
fn cmp_enrichment(a: &EnrichmentEntry, b: &EnrichmentEntry) -> Ordering {
    let by_fold = match (a.fold, b.fold) {
        (FoldEnrichment::Exclusive, FoldEnrichment::Exclusive) => Ordering::Equal,
        (FoldEnrichment::Exclusive, _) => Ordering::Less,
        (_, FoldEnrichment::Exclusive) => Ordering::Greater,
        (FoldEnrichment::Ratio(x), FoldEnrichment::Ratio(y)) => y.partial_cmp(&x).unwrap_or(Ordering::Equal),
    };
    by_fold
        .then(b.target_count.cmp(&a.target_count))
        .then(a.domain.cmp(&b.domain))
}

// entries for every domain of target or background that is not background only
fn enrichment_entries(
    store: &DomainHitStore,
    target: &FxHashMap<String, usize>,
    target_total: usize,
    background: &FxHashMap<String, usize>,
    background_total: usize,
    with_background_domains: bool,
) -> Vec<EnrichmentEntry> {
    let mut domains: BTreeSet<&str> = target.keys().map(|d| d.as_str()).collect();
    if with_background_domains {
        domains.extend(background.keys().map(|d| d.as_str()));
    }
    domains
        .into_iter()
        .filter(|d| !store.is_background_only(d))
        .filter_map(|d| {
            EnrichmentEntry::new(
                d,
                target.get(d).copied().unwrap_or(0),
                target_total,
                background.get(d).copied().unwrap_or(0),
                background_total,
            )
        })
        .collect()
} // end of enrichment_entries

/// distinct valid sequence ids of a subset
fn distinct_sequences<'a>(rows: &[&'a MergedRow]) -> BTreeSet<&'a str> {
    rows.iter()
        .filter(|r| r.is_valid_sequence())
        .map(|r| r.record.sequence_id.as_str())
        .collect()
}

/// Fold enrichment of the domains of a subset against a background frequency table.
/// Target counts are the hits of `store` on the distinct sequences of `rows`, background only domains excluded.
/// `background_total` is the denominator of background fractions, it should leave out the hits of
/// background only domains as target counts do (see [DomainHitStore::get_target_total]).
/// Ranked exclusive first, then by fold and target count, descending.
pub fn enrichment(
    rows: &[&MergedRow],
    store: &DomainHitStore,
    background: &FxHashMap<String, usize>,
    background_total: usize,
) -> Vec<EnrichmentEntry> {
    let sequences = distinct_sequences(rows);
    let (target, target_total) = domain_counts_for_sequences(store, sequences.iter().copied(), false);
    let mut entries = enrichment_entries(store, &target, target_total, background, background_total, true);
    entries.sort_by(cmp_enrichment);
    log::debug!(
        "{} enrichment : {} sequences, {} target hits, {} background hits, {} entries",
        store.get_source(),
        sequences.len(),
        target_total,
        background_total,
        entries.len()
    );
    entries
} // end of enrichment

//=========================================================================================

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DomainCount {
    pub domain: String,
    pub count: usize,
}

/// what a dashboard needs to draw its charts without pulling rows
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct VisualizationData {
    pub total_rows: usize,
    /// by count descending, ties by allele
    pub allele_counts: Vec<(String, usize)>,
    /// non null affinities in row order, for histograms
    pub affinity_values: Vec<f64>,
    pub binding_level_counts: BTreeMap<String, usize>,
    pub pfam_domains: Vec<DomainCount>,
    pub kofam_domains: Vec<DomainCount>,
}

// hit instances per domain over the distinct sequences of rows, most frequent first
fn top_domain_counts(rows: &[&MergedRow], source: HitSource, top_n: usize) -> Vec<DomainCount> {
    let mut seen = FxHashSet::<&str>::default();
    let mut counts = FxHashMap::<&str, usize>::default();
    for row in rows {
        if !row.is_valid_sequence() || !seen.insert(&row.record.sequence_id) {
            continue;
        }
        for hit in row.hits(source) {
            *counts.entry(&hit.domain_id).or_insert(0) += 1;
        }
    }
    let mut counts: Vec<DomainCount> = counts
        .into_iter()
        .map(|(d, c)| DomainCount {
            domain: d.to_string(),
            count: c,
        })
        .collect();
    counts.sort_by(|a, b| b.count.cmp(&a.count).then(a.domain.cmp(&b.domain)));
    counts.truncate(top_n);
    counts
}

pub fn visualization_data(rows: &[&MergedRow], top_n: usize) -> VisualizationData {
    let mut alleles = FxHashMap::<&str, usize>::default();
    let mut binding_level_counts = BTreeMap::<String, usize>::new();
    let mut affinity_values = Vec::<f64>::with_capacity(rows.len());
    for row in rows {
        if let Some(allele) = &row.record.allele {
            *alleles.entry(allele).or_insert(0) += 1;
        }
        if let Some(level) = &row.record.bind_level {
            *binding_level_counts.entry(level.clone()).or_insert(0) += 1;
        }
        affinity_values.extend(row.record.affinity);
    }
    let mut allele_counts: Vec<(String, usize)> = alleles.into_iter().map(|(a, c)| (a.to_string(), c)).collect();
    allele_counts.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    //
    VisualizationData {
        total_rows: rows.len(),
        allele_counts,
        affinity_values,
        binding_level_counts,
        pfam_domains: top_domain_counts(rows, HitSource::Pfam, top_n),
        kofam_domains: top_domain_counts(rows, HitSource::Kofam, top_n),
    }
} // end of visualization_data

//=========================================================================================

/// domains of binder sequences compared with the other sequences of the metagenome
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DomainOverview {
    pub source: HitSource,
    pub nb_binder_sequences: usize,
    pub nb_background_sequences: usize,
    pub target_total: usize,
    pub background_total: usize,
    /// fold >= 1, fold descending
    pub enriched: Vec<EnrichmentEntry>,
    /// fold < 1, fold ascending
    pub depleted: Vec<EnrichmentEntry>,
    /// absent from background, target count descending
    pub exclusive: Vec<EnrichmentEntry>,
}

/// Compares the domains of binder sequences, counted in the binder store, with the domains of
/// metagenome sequences that are not binders. Fails if no metagenome store was loaded for `source`.
pub fn domain_overview<'a, I>(binder_ids: I, catalog: &HitCatalog, source: HitSource) -> Result<DomainOverview>
where
    I: IntoIterator<Item = &'a str>,
{
    let metagenome = catalog
        .background(source)
        .ok_or_else(|| MimicError::not_found("metagenome hits", &source.to_string()))?;
    let store = catalog.store(source);
    let binders: FxHashSet<&str> = binder_ids.into_iter().collect();
    let (target, target_total) = domain_counts_for_sequences(store, binders.iter().copied(), false);
    let others: Vec<&str> = metagenome.sequence_ids().filter(|s| !binders.contains(s)).collect();
    let (background, background_total) = domain_counts_for_sequences(metagenome, others.iter().copied(), true);
    //
    let mut overview = DomainOverview {
        source,
        nb_binder_sequences: binders.len(),
        nb_background_sequences: others.len(),
        target_total,
        background_total,
        enriched: Vec::new(),
        depleted: Vec::new(),
        exclusive: Vec::new(),
    };
    if target_total == 0 || background_total == 0 {
        log::info!("{} overview : no target or no background hits", source);
        return Ok(overview);
    }
    for entry in enrichment_entries(store, &target, target_total, &background, background_total, false) {
        match entry.status {
            EnrichmentStatus::Enriched => overview.enriched.push(entry),
            EnrichmentStatus::Depleted => overview.depleted.push(entry),
            EnrichmentStatus::Exclusive => overview.exclusive.push(entry),
        }
    }
    overview.enriched.sort_by(cmp_enrichment);
    overview.depleted.sort_by(|a, b| cmp_enrichment(b, a));
    overview.exclusive.sort_by(cmp_enrichment);
    log::info!(
        "{} overview : {} enriched, {} depleted, {} exclusive",
        source,
        overview.enriched.len(),
        overview.depleted.len(),
        overview.exclusive.len()
    );
    Ok(overview)
} // end of domain_overview

//=========================================================================================

/// rows of one cancer accession
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CancerDetail {
    pub accession: String,
    pub accession_db: Option<String>,
    pub total_rows: usize,
    /// distinct, sorted
    pub genes: Vec<String>,
    pub allele_counts: BTreeMap<String, usize>,
    pub binding_level_counts: BTreeMap<String, usize>,
    pub affinity: NumericSummary,
    pub pfam_domains: Vec<DomainCount>,
    pub kofam_domains: Vec<DomainCount>,
}

pub fn cancer_detail(accession: &str, rows: &[&MergedRow]) -> CancerDetail {
    let summary = summarize(rows);
    let genes: Vec<String> = distinct_sequences(rows).into_iter().map(|s| s.to_string()).collect();
    let accession_db = rows.iter().find_map(|r| r.record.accession_db.clone());
    CancerDetail {
        accession: accession.to_string(),
        accession_db,
        total_rows: summary.total_rows,
        genes,
        allele_counts: summary.allele_counts,
        binding_level_counts: summary.binding_level_counts,
        affinity: summary.affinity,
        pfam_domains: top_domain_counts(rows, HitSource::Pfam, usize::MAX),
        kofam_domains: top_domain_counts(rows, HitSource::Kofam, usize::MAX),
    }
} // end of cancer_detail

//=========================================================================================

// end of mod tests
