//! Frequency histograms and overrepresentation blacklists
//!
//! After the counting table is drained, two reports are derived from it:
//! a frequency histogram (how many distinct k-mers occur exactly `c`
//! times) and an optional blacklist of keys whose count reaches a
//! threshold. Both are single-threaded scans over the drained entries.

use crate::count_table::CountTable;
use std::io::{self, Write};
use tracing::info;

/// Upper bound on the number of histogram bins. Tables may count far
/// higher than this; anything above it lands in the top bin.
pub const MAX_BINS: u64 = 1 << 16;

/// Frequency histogram over counted keys.
///
/// Bin `c` holds the number of distinct keys counted exactly `c` times,
/// for `c` in `1..=max_bin`; counts above `max_bin` clamp into the top
/// bin. Bin 0 is always zero (unclaimed slots are not entries).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Histogram {
    bins: Vec<u64>,
}

impl Histogram {
    /// Build a histogram with bins `1..=max_bin` from a drained table.
    /// `max_bin` is clamped to [`MAX_BINS`].
    ///
    /// Must not run concurrently with `increment` (same contract as
    /// [`CountTable::entries`]).
    pub fn from_table(table: &CountTable, max_bin: u64) -> Self {
        let max_bin = max_bin.clamp(1, MAX_BINS);
        let mut bins = vec![0u64; max_bin as usize + 1];
        for entry in table.entries() {
            bins[entry.count.min(max_bin) as usize] += 1;
        }
        Self { bins }
    }

    /// Number of distinct keys counted exactly `count` times (clamped
    /// into the top bin).
    #[inline]
    pub fn bin(&self, count: u64) -> u64 {
        self.bins[(count as usize).min(self.bins.len() - 1)]
    }

    /// Largest tracked count.
    #[inline]
    pub fn max_bin(&self) -> u64 {
        (self.bins.len() - 1) as u64
    }

    /// Total number of distinct keys observed.
    pub fn num_distinct(&self) -> u64 {
        self.bins.iter().sum()
    }

    /// Total occurrences represented, counting the top bin at its clamp
    /// value (a lower bound when saturation occurred).
    pub fn num_occurrences(&self) -> u64 {
        self.bins
            .iter()
            .enumerate()
            .map(|(count, &distinct)| count as u64 * distinct)
            .sum()
    }

    /// Write the histogram as two-column TSV (`count<TAB>distinct`),
    /// one line per non-empty bin.
    pub fn write_tsv<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writeln!(writer, "#count\tdistinct")?;
        for (count, &distinct) in self.bins.iter().enumerate().skip(1) {
            if distinct != 0 {
                writeln!(writer, "{}\t{}", count, distinct)?;
            }
        }
        Ok(())
    }

    /// Log a one-line summary through `tracing`.
    pub fn log_summary(&self) {
        info!(
            "histogram: {} distinct keys, {} occurrences (top bin {})",
            self.num_distinct(),
            self.num_occurrences(),
            self.max_bin()
        );
    }
}

/// Collect the keys whose count reaches `threshold`, sorted by key for
/// stable output.
///
/// Must not run concurrently with `increment` (same contract as
/// [`CountTable::entries`]).
pub fn blacklist(table: &CountTable, threshold: u64) -> Vec<(u64, u64)> {
    let mut flagged: Vec<(u64, u64)> = table
        .entries()
        .filter(|entry| entry.count >= threshold)
        .map(|entry| (entry.key, entry.count))
        .collect();
    flagged.sort_unstable();
    flagged
}
