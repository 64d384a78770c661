//! Counting-job orchestration
//!
//! Coordinates a full counting run:
//! 1. Allocate a counting table sized from the configuration
//! 2. Fan the input sequences out over a rayon pool; every worker rolls
//!    windows over its sequences and increments the shared table
//! 3. If some key exhausts its probe budget, discard the table and rebuild
//!    with doubled capacity (slot positions depend on the table length, so
//!    partial counts cannot be carried over)
//! 4. After the pool drains, derive the histogram and blacklist

use crate::{
    builder::config::CountConfiguration,
    count_table::{CountError, CountTable},
    encoding::KmerWindows,
    histogram::Histogram,
};
use rayon::prelude::*;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{info, warn};

/// Rebuild-with-larger-capacity rounds attempted before giving up.
const MAX_GROWTH_ROUNDS: u32 = 8;

/// Builder for running counting jobs over in-memory sequences
pub struct HistogramBuilder {
    config: CountConfiguration,
}

impl HistogramBuilder {
    /// Create a new builder with the given configuration
    pub fn new(config: CountConfiguration) -> Result<Self, String> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Count every k-mer window of every sequence and return the filled
    /// table, ready for draining.
    ///
    /// # Parallelism
    /// The number of threads is controlled by `config.num_threads`:
    /// - `0` — use all available CPU cores (rayon default)
    /// - `1` — single-threaded (no rayon overhead)
    /// - `N` — use exactly N threads
    pub fn count_sequences(&self, sequences: &[Vec<u8>]) -> Result<CountTable, String> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.num_threads)
            .build()
            .map_err(|e| format!("Failed to create thread pool: {e}"))?;

        pool.install(|| self.count_sequences_inner(sequences))
    }

    /// Inner counting logic, runs inside the rayon thread pool
    fn count_sequences_inner(&self, sequences: &[Vec<u8>]) -> Result<CountTable, String> {
        self.config.print();
        let k = self.config.k;
        let key_bits = 2 * k as u32;
        let mut capacity = self.config.expected_kmers;

        for round in 0..MAX_GROWTH_ROUNDS {
            if round > 0 {
                info!("Recounting with capacity {}", capacity);
            }
            let table = CountTable::new(capacity, key_bits, self.config.max_count)
                .map_err(|e| format!("Failed to allocate counting table: {e}"))?;
            let total_windows = AtomicU64::new(0);

            let outcome = sequences.par_iter().try_for_each(|sequence| {
                // k was validated with the configuration
                let windows = KmerWindows::new(sequence, k)
                    .expect("window length validated at configuration time");
                let mut seen = 0u64;
                for key in windows {
                    table.increment(key)?;
                    seen += 1;
                }
                total_windows.fetch_add(seen, Ordering::Relaxed);
                Ok::<(), CountError>(())
            });

            match outcome {
                Ok(()) => {
                    info!(
                        "Counted {} windows from {} sequences ({} table slots, {} bytes)",
                        total_windows.load(Ordering::Relaxed),
                        sequences.len(),
                        table.table_length(),
                        table.num_bytes()
                    );
                    return Ok(table);
                }
                Err(CountError::TooManyCollisions) => {
                    capacity = capacity.saturating_mul(2);
                    warn!(
                        "Probe budget exhausted; discarding table and rebuilding with capacity {}",
                        capacity
                    );
                }
            }
        }

        Err(format!(
            "Counting failed after {} capacity doublings; input has far more distinct k-mers than expected",
            MAX_GROWTH_ROUNDS
        ))
    }

    /// Count, then drain into a histogram with bins `1..=max_count`.
    pub fn build_histogram(&self, sequences: &[Vec<u8>]) -> Result<(Histogram, CountTable), String> {
        let table = self.count_sequences(sequences)?;
        let histogram = Histogram::from_table(&table, self.config.max_count);
        if self.config.verbose {
            histogram.log_summary();
        }
        Ok((histogram, table))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_rejects_invalid_config() {
        let config = CountConfiguration { k: 0, ..CountConfiguration::default() };
        assert!(HistogramBuilder::new(config).is_err());
    }

    #[test]
    fn test_count_simple_sequences() {
        let config = CountConfiguration {
            k: 3,
            expected_kmers: 64,
            max_count: 255,
            num_threads: 1,
            verbose: false,
        };
        let builder = HistogramBuilder::new(config).unwrap();

        // AAAA contributes AAA twice; CCCC contributes CCC twice
        let sequences = vec![b"AAAA".to_vec(), b"CCCC".to_vec()];
        let (histogram, table) = builder.build_histogram(&sequences).unwrap();

        assert_eq!(histogram.num_distinct(), 2);
        assert_eq!(histogram.bin(2), 2);
        assert_eq!(table.entries().count(), 2);
    }

    #[test]
    fn test_undersized_table_grows_until_it_fits() {
        // ~50 distinct 8-mers from a random walk, but the caller only
        // expected one: the builder must rebuild its way to success.
        let config = CountConfiguration {
            k: 8,
            expected_kmers: 1,
            max_count: 15,
            num_threads: 1,
            verbose: false,
        };
        let builder = HistogramBuilder::new(config).unwrap();

        let mut sequence = Vec::new();
        let mut state = 3u64;
        for _ in 0..60 {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
            sequence.push(match (state >> 33) & 3 {
                0 => b'A',
                1 => b'C',
                2 => b'G',
                _ => b'T',
            });
        }

        let table = builder.count_sequences(&[sequence.clone()]).unwrap();
        let windows = sequence.len() - 8 + 1;
        let total: u64 = table.entries().map(|e| e.count).sum();
        assert_eq!(total, windows as u64);
    }
}
