//! contains utils used in data directory exploration, parameters and index dump/reload

pub mod dumpload;
pub mod files;
pub mod parameters;

pub use files::*;
pub use parameters::*;
