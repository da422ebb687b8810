//! domain hits of the two annotation sources (PFAM and KOFAM)

pub mod catalog;
pub mod hitstore;

pub use catalog::*;
pub use hitstore::*;
