//! Merge of domain hits and sequence lengths onto binding records.
//!
//! Augmentation is computed once per distinct sequence and shared by all rows of the sequence.
//! Rows are never dropped : an unresolved sequence gets a null length, a malformed sequence id
//! gets an empty augmentation and is counted as rejected.

use std::path::Path;
use std::sync::Arc;

use fxhash::FxHashMap;
use serde_json::{json, Map};

use crate::binding::{BindingRecord, BindingRecordTable};
use crate::domains::{DomainHit, HitCatalog, HitSource};
use crate::errors::Result;
use crate::schema::{Column, Schema, Value};
use crate::seqindex::SequenceArchiveIndex;

/// what is derived from the sequence id of a row
#[derive(Debug, Default)]
pub struct SequenceAugment {
    pfam: Vec<DomainHit>,
    kofam: Vec<DomainHit>,
    /// distinct domain names in hit order, comma separated
    pfam_names: String,
    kofam_names: String,
    length: Option<usize>,
}

impl SequenceAugment {
    fn new(id: &str, catalog: &HitCatalog, index: &SequenceArchiveIndex) -> Self {
        let pfam = catalog.store(HitSource::Pfam).hits_for_sequence(id).to_vec();
        let kofam = catalog.store(HitSource::Kofam).hits_for_sequence(id).to_vec();
        SequenceAugment {
            pfam_names: distinct_names(&pfam),
            kofam_names: distinct_names(&kofam),
            pfam,
            kofam,
            length: index.get_length(id),
        }
    }
} // end of impl SequenceAugment

fn distinct_names(hits: &[DomainHit]) -> String {
    let mut names: Vec<&str> = Vec::with_capacity(hits.len());
    for hit in hits {
        if !names.contains(&hit.domain_id.as_str()) {
            names.push(&hit.domain_id);
        }
    }
    names.join(", ")
}

/// empty, printable ids only
pub fn is_malformed_id(id: &str) -> bool {
    id.is_empty() || id.chars().any(|c| c.is_control())
}

//=========================================================================================

/// a binding record with its sequence augmentation
#[derive(Clone, Debug)]
pub struct MergedRow {
    pub record: BindingRecord,
    augment: Arc<SequenceAugment>,
    /// false if sequence id was malformed
    valid_sequence: bool,
}

impl MergedRow {
    pub fn new(record: BindingRecord, augment: Arc<SequenceAugment>, valid_sequence: bool) -> Self {
        MergedRow {
            record,
            augment,
            valid_sequence,
        }
    }

    /// hits of the row sequence, sorted by start then domain
    pub fn hits(&self, source: HitSource) -> &[DomainHit] {
        match source {
            HitSource::Pfam => &self.augment.pfam,
            HitSource::Kofam => &self.augment.kofam,
        }
    }

    pub fn domain_count(&self, source: HitSource) -> usize {
        self.hits(source).len()
    }

    pub fn has_domains(&self) -> bool {
        !self.augment.pfam.is_empty() || !self.augment.kofam.is_empty()
    }

    pub fn get_sequence_length(&self) -> Option<usize> {
        self.augment.length
    }

    pub fn is_valid_sequence(&self) -> bool {
        self.valid_sequence
    }

    pub fn is_resolved(&self) -> bool {
        self.augment.length.is_some()
    }

    pub fn value(&self, column: Column) -> Value<'_> {
        let r = &self.record;
        match column {
            Column::Gene => Value::Str(&r.sequence_id),
            Column::Allele => Value::from_opt_str(r.allele.as_deref()),
            Column::CancerAccession => Value::from_opt_str(r.accession.as_deref()),
            Column::CancerDb => Value::from_opt_str(r.accession_db.as_deref()),
            Column::Peptide => Value::from_opt_str(r.peptide.as_deref()),
            Column::Score => Value::from_opt_num(r.score),
            Column::Rank => Value::from_opt_num(r.rank),
            Column::Affinity => Value::from_opt_num(r.affinity),
            Column::BindLevel => Value::from_opt_str(r.bind_level.as_deref()),
            Column::PeptideStart => Value::from_opt_num(r.peptide_interval.map(|i| i.0 as f64)),
            Column::PeptideEnd => Value::from_opt_num(r.peptide_interval.map(|i| i.1 as f64)),
            Column::SequenceLength => Value::from_opt_num(self.augment.length.map(|l| l as f64)),
            Column::PfamCount => Value::Num(self.augment.pfam.len() as f64),
            Column::KofamCount => Value::Num(self.augment.kofam.len() as f64),
            Column::PfamDomains => Value::Str(&self.augment.pfam_names),
            Column::KofamDomains => Value::Str(&self.augment.kofam_names),
            Column::HasDomains => Value::Bool(self.has_domains()),
            Column::SequenceResolved => Value::Bool(self.is_resolved()),
        }
    } // end of value

    /// Json object of visible columns, with hit lists nested under `PFAM_hits` and `KOFAM_hits`
    pub fn to_json(&self, schema: &Schema) -> serde_json::Value {
        let mut object = Map::new();
        object.insert("row_id".to_string(), json!(self.record.row_id));
        for column in schema.columns() {
            object.insert(column.to_string(), self.value(*column).to_json());
        }
        object.insert("PFAM_hits".to_string(), json!(self.augment.pfam));
        object.insert("KOFAM_hits".to_string(), json!(self.augment.kofam));
        serde_json::Value::Object(object)
    }
} // end of impl MergedRow

//=========================================================================================

/// immutable merged table with row indexes on sequence and accession
pub struct MergedTable {
    schema: Schema,
    rows: Vec<MergedRow>,
    by_sequence: FxHashMap<String, Vec<usize>>,
    by_accession: FxHashMap<String, Vec<usize>>,
    /// rows with a malformed sequence id
    rejected: usize,
}

/// Joins hits and lengths onto each binding record, through one augmentation per distinct sequence id.
pub fn merge(table: BindingRecordTable, catalog: &HitCatalog, index: &SequenceArchiveIndex) -> MergedTable {
    let (schema, records) = table.into_parts();
    log::info!("merging {} binding records", records.len());
    //
    let empty = Arc::new(SequenceAugment::default());
    let mut augments = FxHashMap::<String, Arc<SequenceAugment>>::default();
    let mut rows = Vec::<MergedRow>::with_capacity(records.len());
    let mut by_sequence = FxHashMap::<String, Vec<usize>>::default();
    let mut by_accession = FxHashMap::<String, Vec<usize>>::default();
    let mut rejected = 0usize;
    let mut nb_unresolved = 0usize;
    //
    for record in records {
        let row_rank = rows.len();
        if is_malformed_id(&record.sequence_id) {
            rejected += 1;
            log::trace!("row {} has malformed sequence id {:?}", record.row_id, record.sequence_id);
            rows.push(MergedRow::new(record, empty.clone(), false));
            continue;
        }
        let augment = match augments.get(&record.sequence_id) {
            Some(augment) => augment.clone(),
            None => {
                let augment = Arc::new(SequenceAugment::new(&record.sequence_id, catalog, index));
                if augment.length.is_none() {
                    nb_unresolved += 1;
                }
                augments.insert(record.sequence_id.clone(), augment.clone());
                augment
            }
        };
        by_sequence.entry(record.sequence_id.clone()).or_default().push(row_rank);
        if let Some(accession) = &record.accession {
            by_accession.entry(accession.clone()).or_default().push(row_rank);
        }
        rows.push(MergedRow::new(record, augment, true));
    }
    log::info!(
        "merge done : {} rows, {} distinct sequences, {} unresolved sequences, {} malformed sequence ids",
        rows.len(),
        augments.len(),
        nb_unresolved,
        rejected
    );
    MergedTable {
        schema,
        rows,
        by_sequence,
        by_accession,
        rejected,
    }
} // end of merge

impl MergedTable {
    pub fn get_schema(&self) -> &Schema {
        &self.schema
    }

    pub fn get_rows(&self) -> &[MergedRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get_rejected(&self) -> usize {
        self.rejected
    }

    pub fn rows_for_sequence(&self, id: &str) -> Vec<&MergedRow> {
        self.by_sequence
            .get(id)
            .map(|ranks| ranks.iter().map(|r| &self.rows[*r]).collect())
            .unwrap_or_default()
    }

    /// true if some row references sequence `id`
    pub fn contains_sequence(&self, id: &str) -> bool {
        self.by_sequence.contains_key(id)
    }

    pub fn rows_for_accession(&self, accession: &str) -> Vec<&MergedRow> {
        self.by_accession
            .get(accession)
            .map(|ranks| ranks.iter().map(|r| &self.rows[*r]).collect())
            .unwrap_or_default()
    }

    /// distinct valid sequence ids, sorted
    pub fn sequence_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.by_sequence.keys().map(|s| s.as_str()).collect();
        ids.sort_unstable();
        ids
    }

    /// Writes visible columns as csv, hit lists are json encoded in `PFAM_hits` and `KOFAM_hits`
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        log::info!("writing merged table in {:?}", path);
        let mut writer = csv::Writer::from_path(path)?;
        let mut header: Vec<String> = self.schema.columns().iter().map(|c| c.to_string()).collect();
        header.push("PFAM_hits".to_string());
        header.push("KOFAM_hits".to_string());
        writer.write_record(&header)?;
        for row in &self.rows {
            let mut fields: Vec<String> = self
                .schema
                .columns()
                .iter()
                .map(|c| match row.value(*c) {
                    Value::Str(s) => s.to_string(),
                    Value::Num(v) => v.to_string(),
                    Value::Bool(b) => b.to_string(),
                    Value::Null => String::new(),
                })
                .collect();
            fields.push(serde_json::to_string(row.hits(HitSource::Pfam))?);
            fields.push(serde_json::to_string(row.hits(HitSource::Kofam))?);
            writer.write_record(&fields)?;
        }
        writer.flush()?;
        Ok(())
    } // end of write_csv
} // end of impl MergedTable

//=========================================================================================

// end of mod tests
