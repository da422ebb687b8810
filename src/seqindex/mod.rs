//! offset index over protein fasta archives

pub mod archive;

pub use archive::*;
