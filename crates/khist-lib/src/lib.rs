// khist: concurrent k-mer counting
//
// A lock-free k-mer counting engine producing frequency histograms
// and blacklists of overrepresented k-mers.

#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

pub mod constants;
pub mod encoding;
pub mod bit_matrix;
pub mod words;
pub mod count_table;
pub mod histogram;
pub mod builder;

// Re-export common types at crate root
pub use bit_matrix::{BitMatrix, MatrixError};
pub use count_table::{ConfigError, CountError, CountTable, KeyCount, StorageSpec};
pub use encoding::{decode_kmer, KmerWindows};
pub use histogram::Histogram;
pub use builder::{CountConfiguration, HistogramBuilder};

/// Version information
pub fn version() -> (u8, u8, u8) {
    constants::VERSION
}
