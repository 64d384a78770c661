//! Configuration for k-mer counting jobs

use crate::constants::{is_valid_k, MAX_K, MIN_K};

/// Configuration parameters for a counting run
#[derive(Debug, Clone)]
pub struct CountConfiguration {
    /// Window length in bases (1..=32; keys are 2k bits)
    pub k: usize,

    /// Expected number of distinct k-mers; the table is sized to at least
    /// this many slots and grows by rebuilding if the estimate is low
    pub expected_kmers: u64,

    /// Largest count stored exactly; counters saturate here
    pub max_count: u64,

    /// Number of threads for parallel counting (0 = all available cores)
    pub num_threads: usize,

    /// Verbose output during counting
    pub verbose: bool,
}

impl Default for CountConfiguration {
    fn default() -> Self {
        Self {
            k: 31,
            expected_kmers: 1 << 22,
            max_count: 65_535,
            num_threads: 0, // 0 = use all available cores
            verbose: true,
        }
    }
}

impl CountConfiguration {
    /// Create a new configuration with the given window length and
    /// expected distinct-key count
    pub fn new(k: usize, expected_kmers: u64) -> Result<Self, String> {
        let config = Self {
            k,
            expected_kmers,
            ..Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration parameters
    pub fn validate(&self) -> Result<(), String> {
        if !is_valid_k(self.k) {
            return Err(format!(
                "k must be in range [{}, {}], got k={}",
                MIN_K, MAX_K, self.k
            ));
        }
        if self.expected_kmers == 0 {
            return Err("expected_kmers must be nonzero".to_string());
        }
        if self.max_count == 0 {
            return Err("max_count must be nonzero".to_string());
        }
        Ok(())
    }

    /// Log configuration parameters via tracing
    pub fn print(&self) {
        tracing::info!("Count Configuration:");
        tracing::info!("  k = {}", self.k);
        tracing::info!("  expected_kmers = {}", self.expected_kmers);
        tracing::info!("  max_count = {}", self.max_count);
        if self.num_threads == 0 {
            tracing::info!("  num_threads = all available cores");
        } else {
            tracing::info!("  num_threads = {}", self.num_threads);
        }
        tracing::debug!("  verbose = {}", self.verbose);
    }
}
