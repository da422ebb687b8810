//! Binding record table : one row per predicted MHC binding of a mimic peptide.
//!
//! The table is a comma separated file with header, typically `{sample}_merged_better_binders.csv`, with columns
//! `mimic_gene, MHC, cancer_acc, cancer_DB, mimic_Peptide, mimic_Score_EL, mimic_%Rank_EL, mimic_Aff(nM), mimic_BindLevel`
//! and optionally a peptide interval `peptide_start, peptide_end` (half open) on the mimic sequence.
//! Only `mimic_gene` is mandatory. Cells that are empty or cannot be parsed are null, rows are never dropped.

use std::path::Path;

use serde::Serialize;

use crate::domains::LoadReport;
use crate::errors::Result;
use crate::schema::{Column, Schema};

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct BindingRecord {
    /// rank of the row in the table
    pub row_id: usize,
    pub sequence_id: String,
    pub allele: Option<String>,
    pub peptide: Option<String>,
    pub score: Option<f64>,
    /// percentile rank
    pub rank: Option<f64>,
    /// nM
    pub affinity: Option<f64>,
    pub bind_level: Option<String>,
    /// half open interval of the peptide on the sequence
    pub peptide_interval: Option<(usize, usize)>,
    pub accession: Option<String>,
    pub accession_db: Option<String>,
}

impl BindingRecord {
    /// record with sequence id, allele and peptide set
    pub fn new(row_id: usize, sequence_id: &str, allele: &str, peptide: &str) -> Self {
        BindingRecord {
            row_id,
            sequence_id: sequence_id.to_string(),
            allele: Some(allele.to_string()),
            peptide: Some(peptide.to_string()),
            ..Default::default()
        }
    }
} // end of impl BindingRecord

//=========================================================================================

pub struct BindingRecordTable {
    schema: Schema,
    records: Vec<BindingRecord>,
}

impl BindingRecordTable {
    pub fn from_records(schema: Schema, records: Vec<BindingRecord>) -> Self {
        BindingRecordTable { schema, records }
    }

    /// Loads the table. The report counts rows that could not be decoded at all,
    /// they are kept as rows with an empty sequence id.
    pub fn load(path: &Path) -> Result<(Self, LoadReport)> {
        log::info!("loading binding table {:?}", path);
        let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path).map_err(|e| {
            log::error!("cannot open binding table {:?} : {}", path, e);
            e
        })?;
        let schema = Schema::from_header(reader.headers()?)?;
        //
        let mut records = Vec::<BindingRecord>::new();
        let mut report = LoadReport::default();
        let mut nb_bad_cells = 0usize;
        let mut nb_bad_intervals = 0usize;
        for row in reader.records() {
            let row_id = records.len();
            let row = match row {
                Ok(row) => row,
                Err(e) if e.is_io_error() => return Err(e.into()),
                Err(e) => {
                    log::debug!("undecodable binding row {} : {}", row_id, e);
                    report.rejected += 1;
                    records.push(BindingRecord {
                        row_id,
                        ..Default::default()
                    });
                    continue;
                }
            };
            let text = |column: Column| -> Option<String> {
                let cell = row.get(schema.get_position(column)?)?.trim();
                if cell.is_empty() {
                    None
                } else {
                    Some(cell.to_string())
                }
            };
            let mut number = |column: Column| -> Option<f64> {
                let cell = text(column)?;
                match cell.parse::<f64>() {
                    Ok(v) if v.is_finite() => Some(v),
                    _ => {
                        nb_bad_cells += 1;
                        None
                    }
                }
            };
            let score = number(Column::Score);
            let rank = number(Column::Rank);
            let affinity = number(Column::Affinity);
            let start = number(Column::PeptideStart);
            let end = number(Column::PeptideEnd);
            let peptide_interval = match (start, end) {
                (Some(s), Some(e)) if s >= 0. && s < e && s.fract() == 0. && e.fract() == 0. => {
                    Some((s as usize, e as usize))
                }
                (None, None) => None,
                _ => {
                    nb_bad_intervals += 1;
                    None
                }
            };
            records.push(BindingRecord {
                row_id,
                sequence_id: text(Column::Gene).unwrap_or_default(),
                allele: text(Column::Allele),
                peptide: text(Column::Peptide),
                score,
                rank,
                affinity,
                bind_level: text(Column::BindLevel),
                peptide_interval,
                accession: text(Column::CancerAccession),
                accession_db: text(Column::CancerDb),
            });
            report.loaded += 1;
        }
        log::info!(
            "binding table : {} rows, {} undecodable, {} unparsable numeric cells, {} invalid peptide intervals",
            records.len(),
            report.rejected,
            nb_bad_cells,
            nb_bad_intervals
        );
        Ok((BindingRecordTable { schema, records }, report))
    } // end of load

    pub fn get_schema(&self) -> &Schema {
        &self.schema
    }

    pub fn get_records(&self) -> &[BindingRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// gives back schema and records, used by merge
    pub fn into_parts(self) -> (Schema, Vec<BindingRecord>) {
        (self.schema, self.records)
    }
} // end of impl BindingRecordTable

//=========================================================================================

// end of mod tests
