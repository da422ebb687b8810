//! Column schema of the merged table.
//!
//! Columns are a fixed set with a declared type. Input columns are made visible if the binding table header has them,
//! derived columns (domain counts, sequence length ...) are always visible.
//! The schema is resolved once from the header and used to validate filters and to describe columns.

use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use fxhash::FxHashMap;
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString};

use crate::errors::{MimicError, Result};
use crate::merge::MergedTable;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    String,
    Numeric,
    Boolean,
}

/// columns of the merged table, names are the ones of the binding table header
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumString, EnumIter)]
pub enum Column {
    #[strum(serialize = "mimic_gene")]
    Gene,
    #[strum(serialize = "MHC")]
    Allele,
    #[strum(serialize = "cancer_acc")]
    CancerAccession,
    #[strum(serialize = "cancer_DB")]
    CancerDb,
    #[strum(serialize = "mimic_Peptide")]
    Peptide,
    #[strum(serialize = "mimic_Score_EL")]
    Score,
    #[strum(serialize = "mimic_%Rank_EL")]
    Rank,
    #[strum(serialize = "mimic_Aff(nM)")]
    Affinity,
    #[strum(serialize = "mimic_BindLevel")]
    BindLevel,
    #[strum(serialize = "peptide_start")]
    PeptideStart,
    #[strum(serialize = "peptide_end")]
    PeptideEnd,
    // derived at merge
    #[strum(serialize = "sequence_length")]
    SequenceLength,
    #[strum(serialize = "PFAM_domain_count")]
    PfamCount,
    #[strum(serialize = "KOFAM_domain_count")]
    KofamCount,
    #[strum(serialize = "PFAM_domains")]
    PfamDomains,
    #[strum(serialize = "KOFAM_domains")]
    KofamDomains,
    #[strum(serialize = "has_domains")]
    HasDomains,
    #[strum(serialize = "sequence_resolved")]
    SequenceResolved,
}

impl Column {
    pub fn column_type(&self) -> ColumnType {
        match self {
            Column::Gene
            | Column::Allele
            | Column::CancerAccession
            | Column::CancerDb
            | Column::Peptide
            | Column::BindLevel
            | Column::PfamDomains
            | Column::KofamDomains => ColumnType::String,
            Column::Score
            | Column::Rank
            | Column::Affinity
            | Column::PeptideStart
            | Column::PeptideEnd
            | Column::SequenceLength
            | Column::PfamCount
            | Column::KofamCount => ColumnType::Numeric,
            Column::HasDomains | Column::SequenceResolved => ColumnType::Boolean,
        }
    }

    /// true for columns computed at merge, not read from the binding table
    pub fn is_derived(&self) -> bool {
        matches!(
            self,
            Column::SequenceLength
                | Column::PfamCount
                | Column::KofamCount
                | Column::PfamDomains
                | Column::KofamDomains
                | Column::HasDomains
                | Column::SequenceResolved
        )
    }
} // end of impl Column

//=========================================================================================

/// value of a cell, borrowed from the row
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Value<'a> {
    Str(&'a str),
    Num(f64),
    Bool(bool),
    Null,
}

impl<'a> Value<'a> {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Num(v) => Some(*v),
            _ => None,
        }
    }

    pub fn from_opt_str(s: Option<&'a str>) -> Self {
        s.map(Value::Str).unwrap_or(Value::Null)
    }

    pub fn from_opt_num(v: Option<f64>) -> Self {
        v.map(Value::Num).unwrap_or(Value::Null)
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Str(s) => serde_json::Value::from(*s),
            // finite by construction, from_f64 gives Null otherwise
            Value::Num(v) => serde_json::Number::from_f64(*v)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Null => serde_json::Value::Null,
        }
    }
} // end of impl Value

//=========================================================================================

/// visible columns of a table and position of input columns in the binding table
#[derive(Clone, Debug)]
pub struct Schema {
    columns: Vec<Column>,
    positions: FxHashMap<Column, usize>,
}

impl Schema {
    /// Resolves columns from the binding table header. `mimic_gene` is mandatory.
    pub fn from_header(header: &csv::StringRecord) -> Result<Self> {
        let mut positions = FxHashMap::<Column, usize>::default();
        for (i, name) in header.iter().enumerate() {
            match Column::from_str(name.trim()) {
                Ok(column) if !column.is_derived() => {
                    positions.entry(column).or_insert(i);
                }
                _ => log::debug!("binding table column {} not used", name),
            }
        }
        if !positions.contains_key(&Column::Gene) {
            return Err(MimicError::MalformedInput(format!("binding table has no column {}", Column::Gene)));
        }
        let columns = Column::iter()
            .filter(|c| c.is_derived() || positions.contains_key(c))
            .collect();
        Ok(Schema { columns, positions })
    } // end of from_header

    /// schema with all columns visible, input positions in declaration order
    pub fn full() -> Self {
        let columns: Vec<Column> = Column::iter().collect();
        let positions = columns
            .iter()
            .filter(|c| !c.is_derived())
            .enumerate()
            .map(|(i, c)| (*c, i))
            .collect();
        Schema { columns, positions }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn contains(&self, column: Column) -> bool {
        self.columns.contains(&column)
    }

    /// position of an input column in binding table rows
    pub fn get_position(&self, column: Column) -> Option<usize> {
        self.positions.get(&column).copied()
    }

    /// column of a visible name
    pub fn resolve(&self, name: &str) -> Result<Column> {
        match Column::from_str(name) {
            Ok(column) if self.contains(column) => Ok(column),
            _ => Err(MimicError::InvalidFilter(format!("unknown column {}", name))),
        }
    }
} // end of impl Schema

//=========================================================================================

/// what a filter ui needs to know about a column
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ColumnMetadata {
    String {
        unique_count: usize,
        /// at most 5 distinct values, in lexicographic order
        examples: Vec<String>,
    },
    Numeric {
        min: Option<f64>,
        max: Option<f64>,
        mean: Option<f64>,
    },
    Boolean {
        true_count: usize,
        false_count: usize,
    },
}

const NB_EXAMPLES: usize = 5;

/// describes each visible column of the table, computed in one pass per column
pub fn compute_metadata(table: &MergedTable) -> BTreeMap<String, ColumnMetadata> {
    let mut metadata = BTreeMap::<String, ColumnMetadata>::new();
    for column in table.get_schema().columns() {
        let values = table.get_rows().iter().map(|row| row.value(*column));
        let descriptor = match column.column_type() {
            ColumnType::String => {
                let distinct: BTreeSet<&str> = values
                    .filter_map(|v| match v {
                        Value::Str(s) => Some(s),
                        _ => None,
                    })
                    .collect();
                ColumnMetadata::String {
                    unique_count: distinct.len(),
                    examples: distinct.iter().take(NB_EXAMPLES).map(|s| s.to_string()).collect(),
                }
            }
            ColumnType::Numeric => {
                let mut min: Option<f64> = None;
                let mut max: Option<f64> = None;
                let mut sum = 0.;
                let mut nb = 0usize;
                for v in values.filter_map(|v| v.as_f64()) {
                    min = Some(min.map_or(v, |m| m.min(v)));
                    max = Some(max.map_or(v, |m| m.max(v)));
                    sum += v;
                    nb += 1;
                }
                ColumnMetadata::Numeric {
                    min,
                    max,
                    mean: if nb > 0 { Some(sum / nb as f64) } else { None },
                }
            }
            ColumnType::Boolean => {
                let (mut true_count, mut false_count) = (0, 0);
                for v in values {
                    match v {
                        Value::Bool(true) => true_count += 1,
                        Value::Bool(false) => false_count += 1,
                        _ => (),
                    }
                }
                ColumnMetadata::Boolean { true_count, false_count }
            }
        };
        metadata.insert(column.to_string(), descriptor);
    }
    log::debug!("computed metadata of {} columns", metadata.len());
    metadata
} // end of compute_metadata

//=========================================================================================

// end of mod tests
