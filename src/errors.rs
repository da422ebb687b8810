//! error taxonomy of the crate

use std::path::PathBuf;

/// Errors surfaced by loading, query and job operations.
///
/// Rejected input rows are not errors, they are counted in a [LoadReport](crate::domains::LoadReport).
#[derive(Debug, thiserror::Error)]
pub enum MimicError {
    /// a sequence, domain, accession or task identifier that does not exist
    #[error("{kind} not found : {id}")]
    NotFound { kind: &'static str, id: String },

    /// filter predicate does not match the declared type of its column, or names an unknown column
    #[error("invalid filter : {0}")]
    InvalidFilter(String),

    #[error("invalid request : {0}")]
    InvalidRequest(String),

    /// an intersection run failed, message is the one retained by the task
    #[error("task failure : {0}")]
    TaskFailure(String),

    #[error("missing input file : {0:?}")]
    MissingInput(PathBuf),

    /// input file does not have the expected layout (missing column ...)
    #[error("malformed input : {0}")]
    MalformedInput(String),

    /// compressed archives cannot be accessed by offset
    #[error("archive cannot be indexed (compressed or unknown format) : {0:?}")]
    UnsupportedArchive(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("fasta parsing error: {0}")]
    Fasta(String),

    #[error("thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

impl MimicError {
    pub fn not_found(kind: &'static str, id: &str) -> Self {
        MimicError::NotFound {
            kind,
            id: id.to_string(),
        }
    }
} // end of impl MimicError

impl From<needletail::errors::ParseError> for MimicError {
    fn from(e: needletail::errors::ParseError) -> Self {
        MimicError::Fasta(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MimicError>;
