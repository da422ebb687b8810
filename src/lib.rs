//! mimicbase : merge, indexing and aggregation engine for mimic identification results.
//!
//! The crate loads the outputs of a mimic identification pipeline:
//! - a table of predicted MHC binding peptides (one row per binding event)
//! - PFAM and KOFAM domain hits (hmmsearch domain tables)
//! - protein fasta archives
//!
//! and merges them into an immutable table served through the [Dataset](dataset::Dataset) facade:
//! paginated filtered queries, summaries, domain fold enrichment and a background
//! job locating binding peptides inside domain intervals.

pub mod errors;
pub mod utils;

pub mod seqindex;
pub mod domains;
pub mod binding;
pub mod schema;
pub mod merge;
pub mod query;
pub mod aggregate;
pub mod detail;
pub mod intersect;
pub mod dataset;

pub use errors::{MimicError, Result};
pub use dataset::Dataset;
