//! Lock-free counting hash table for 64-bit keys
//!
//! The table is open-addressed over a flat array of atomic words, one word
//! per slot, with no locks, no removal and no resizing. Each slot packs
//! three fields, low to high:
//!
//! ```text
//! | unused | key remainder            | bounce  | count              |
//! |        | key_bits - position_bits | 7 bits  | bits_for(max_count)|
//! ```
//!
//! A word of exactly zero means the slot is unclaimed. `bounce` records the
//! number of probes taken to claim the slot, plus one, so it doubles as the
//! claim marker and as the offset needed to reconstruct the key during the
//! drain. The remainder holds the permuted-key bits not implied by the slot
//! position.
//!
//! Keys are multiplied by a random invertible GF(2) matrix before they
//! address the table; the drain multiplies by the inverse to recover them.
//! Probing is quadratic via precomputed triangular numbers, a deterministic
//! function of `(key, probe index)` alone, so threads racing on the same key
//! always contend on the same slot instead of claiming two slots for it.
//!
//! Claiming and counting both go through whole-word compare-and-set. A
//! failed CAS always means another thread succeeded on that word, so every
//! retry loop makes global progress.

use crate::bit_matrix::{BitMatrix, MatrixError};
use crate::constants::{bits_for, ceil_log2, BOUNCE_BITS, BOUNCE_LIMIT, TRIANGULAR};
use crate::words::AtomicWordArray;
use thiserror::Error;
use tracing::debug;

/// Mask for the bounce field.
const BOUNCE_MASK: u64 = (1 << BOUNCE_BITS) - 1;

/// Construction-time configuration errors. None of these are retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Key width outside 1..=64.
    #[error("key width must be in 1..=64 bits, got {0}")]
    InvalidKeyBits(u32),
    /// A table of zero slots was requested.
    #[error("requested table length must be nonzero")]
    ZeroLength,
    /// A maximum count of zero leaves no room for the counter field.
    #[error("max count must be nonzero")]
    ZeroMaxCount,
    /// The counter and bounce fields alone overflow the widest slot.
    #[error("a {count_bits}-bit counter plus the bounce field does not fit a 64-bit slot")]
    CounterTooWide {
        /// Counter width implied by the requested max count
        count_bits: u32,
    },
    /// No invertible key permutation could be constructed.
    #[error(transparent)]
    Matrix(#[from] MatrixError),
}

/// Counting-time errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CountError {
    /// The probe budget was exhausted before the key found a slot. The
    /// table is too small or too densely probed for this workload; the
    /// caller must discard it and rebuild with a larger capacity, because
    /// slot positions depend on the table length and counts accumulated so
    /// far cannot be carried over.
    #[error("probe budget of {BOUNCE_LIMIT} exhausted; rebuild the table with a larger capacity")]
    TooManyCollisions,
}

/// Storage decision for a table: slot count and slot width.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StorageSpec {
    /// Number of slots, a power of two at least the requested length.
    pub table_length: u64,
    /// log2 of `table_length`.
    pub position_bits: u32,
    /// Slot width in bits: 32 or 64.
    pub word_bits: u32,
}

impl StorageSpec {
    /// Total backing storage in bytes.
    #[inline]
    pub fn num_bytes(&self) -> u128 {
        self.table_length as u128 * (self.word_bits / 8) as u128
    }
}

/// Smallest power-of-two slot count for `word_bits`-wide slots such that
/// the counter, the bounce field and the key remainder all fit one slot.
/// Growing the table shrinks the remainder, so a fit always exists unless
/// the counter and bounce fields alone are too wide.
fn fit_width(
    requested_length: u64,
    key_bits: u32,
    count_bits: u32,
    word_bits: u32,
) -> Option<StorageSpec> {
    if count_bits + BOUNCE_BITS > word_bits {
        return None;
    }
    let mut position_bits = ceil_log2(requested_length);
    while position_bits < 64 {
        let remainder_bits = key_bits.saturating_sub(position_bits);
        if count_bits + BOUNCE_BITS + remainder_bits <= word_bits {
            return Some(StorageSpec {
                table_length: 1u64 << position_bits,
                position_bits,
                word_bits,
            });
        }
        position_bits += 1;
    }
    None
}

/// Compute the minimum storage for a table of at least `requested_length`
/// slots counting `key_bits`-bit keys exactly up to `max_count`.
///
/// Both slot widths are sized independently; 32-bit slots win only when
/// they are strictly smaller in total bytes. A 32-bit table that needs one
/// extra address bit ties 64-bit storage byte-for-byte, and the tie goes to
/// 64-bit words.
///
/// Pure function of its arguments, computed once at construction.
pub fn minimum_storage(
    requested_length: u64,
    key_bits: u32,
    max_count: u64,
) -> Result<StorageSpec, ConfigError> {
    if !(1..=64).contains(&key_bits) {
        return Err(ConfigError::InvalidKeyBits(key_bits));
    }
    if requested_length == 0 {
        return Err(ConfigError::ZeroLength);
    }
    if max_count == 0 {
        return Err(ConfigError::ZeroMaxCount);
    }
    let count_bits = bits_for(max_count);

    let narrow = fit_width(requested_length, key_bits, count_bits, 32);
    let wide = fit_width(requested_length, key_bits, count_bits, 64);
    match (narrow, wide) {
        (Some(narrow), Some(wide)) => {
            if narrow.num_bytes() < wide.num_bytes() {
                Ok(narrow)
            } else {
                Ok(wide)
            }
        }
        (Some(spec), None) | (None, Some(spec)) => Ok(spec),
        (None, None) => Err(ConfigError::CounterTooWide { count_bits }),
    }
}

/// One drained table entry: an original key and its saturated count.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KeyCount {
    /// The original (un-permuted) key.
    pub key: u64,
    /// Occurrences counted, pinned at the table's max count.
    pub count: u64,
}

/// A concurrent counting hash table over `key_bits`-bit keys.
///
/// Any number of threads may call [`increment`](Self::increment) without
/// external locking. After all counting threads are joined, a single
/// thread drains the table once via [`entries`](Self::entries). The
/// capacity is fixed for the table's life.
pub struct CountTable {
    words: AtomicWordArray,
    table_length: u64,
    position_bits: u32,
    position_mask: u64,
    key_bits: u32,
    key_remainder_mask: u64,
    count_bits: u32,
    count_mask: u64,
    max_count: u64,
    permutation: BitMatrix,
    inverse_permutation: BitMatrix,
}

impl CountTable {
    /// Allocate a table with room for at least `requested_length` distinct
    /// keys of `key_bits` significant bits, counting each exactly up to
    /// `max_count` and saturating there.
    ///
    /// # Errors
    /// All parameter problems are construction-time [`ConfigError`]s,
    /// including failure to find an invertible key permutation.
    pub fn new(requested_length: u64, key_bits: u32, max_count: u64) -> Result<Self, ConfigError> {
        let spec = minimum_storage(requested_length, key_bits, max_count)?;
        let (permutation, inverse_permutation) = BitMatrix::random_invertible(key_bits)?;

        let count_bits = bits_for(max_count);
        let key_remainder_bits = key_bits.saturating_sub(spec.position_bits);
        debug!(
            "count table: {} slots x {} bits ({} count / {} bounce / {} remainder)",
            spec.table_length, spec.word_bits, count_bits, BOUNCE_BITS, key_remainder_bits
        );

        Ok(Self {
            words: AtomicWordArray::new(spec.table_length, spec.word_bits),
            table_length: spec.table_length,
            position_bits: spec.position_bits,
            position_mask: spec.table_length - 1,
            key_bits,
            key_remainder_mask: if key_remainder_bits == 0 {
                0
            } else {
                (1u64 << key_remainder_bits) - 1
            },
            count_bits,
            count_mask: (1u64 << count_bits) - 1,
            max_count,
            permutation,
            inverse_permutation,
        })
    }

    /// Number of slots.
    #[inline]
    pub fn table_length(&self) -> u64 {
        self.table_length
    }

    /// Width of accepted keys in bits.
    #[inline]
    pub fn key_bits(&self) -> u32 {
        self.key_bits
    }

    /// The saturation ceiling for every counter.
    #[inline]
    pub fn max_count(&self) -> u64 {
        self.max_count
    }

    /// Total backing storage in bytes.
    #[inline]
    pub fn num_bytes(&self) -> u128 {
        self.table_length as u128 * (self.words.field_bits() / 8) as u128
    }

    #[inline]
    fn bounce_shift(&self) -> u32 {
        self.count_bits
    }

    #[inline]
    fn remainder_shift(&self) -> u32 {
        self.count_bits + BOUNCE_BITS
    }

    /// Count one occurrence of `key`. Lock-free; callable from any number
    /// of threads concurrently. Counts saturate at the table's max count.
    ///
    /// `key` must have at most [`key_bits`](Self::key_bits) significant
    /// bits; higher bits are not masked off.
    ///
    /// # Errors
    /// [`CountError::TooManyCollisions`] when the probe budget is exhausted.
    pub fn increment(&self, key: u64) -> Result<(), CountError> {
        debug_assert!(
            self.key_bits == 64 || key >> self.key_bits == 0,
            "key has bits above the configured key width"
        );

        let permuted = self.permutation.multiply(key);
        let upper = (permuted >> self.position_bits) & self.key_remainder_mask;
        let origin = permuted & self.position_mask;

        let mut bounces: u32 = 0;
        let pos = loop {
            if bounces >= BOUNCE_LIMIT {
                return Err(CountError::TooManyCollisions);
            }
            let pos = (origin + TRIANGULAR[bounces as usize]) & self.position_mask;
            let word = self.words.get(pos);
            let bounce = (word >> self.bounce_shift()) & BOUNCE_MASK;
            if bounce == 0 {
                // Unclaimed. A claim records the probe count so later
                // probes (and the drain) can tell whose slot this is.
                let claim = (upper << self.remainder_shift())
                    | (u64::from(bounces + 1) << self.bounce_shift());
                if self.words.compare_and_set(pos, 0, claim) {
                    break pos;
                }
                // Lost the claim race. The winner may have claimed this
                // slot for this very key, so re-test the same slot
                // without advancing the probe count.
                continue;
            }
            if bounce == u64::from(bounces + 1)
                && (word >> self.remainder_shift()) & self.key_remainder_mask == upper
            {
                break pos;
            }
            bounces += 1;
        };

        // The slot is ours. Concurrent increments of the same key
        // serialize here through CAS retries; a failed CAS means another
        // thread advanced the counter, so re-read and try again.
        loop {
            let word = self.words.get(pos);
            if word & self.count_mask >= self.max_count {
                break;
            }
            if self.words.compare_and_set(pos, word, word + 1) {
                break;
            }
        }
        Ok(())
    }

    /// Drain iterator over all counted `(key, count)` pairs in table order.
    ///
    /// Must not run concurrently with [`increment`](Self::increment); join
    /// all counting threads first. Iteration itself never fails.
    pub fn entries(&self) -> Entries<'_> {
        Entries { table: self, pos: 0 }
    }
}

/// Iterator over the claimed slots of a [`CountTable`], decoding each back
/// to its original key. Created by [`CountTable::entries`].
pub struct Entries<'a> {
    table: &'a CountTable,
    pos: u64,
}

impl Iterator for Entries<'_> {
    type Item = KeyCount;

    fn next(&mut self) -> Option<KeyCount> {
        let table = self.table;
        while self.pos < table.table_length {
            let pos = self.pos;
            self.pos += 1;
            let word = table.words.get(pos);
            if word == 0 {
                continue;
            }
            let count = word & table.count_mask;
            let bounce = (word >> table.bounce_shift()) & BOUNCE_MASK;
            let remainder = (word >> table.remainder_shift()) & table.key_remainder_mask;
            // Undo the probe offset to recover where the key originally
            // hashed, then re-attach the remainder and un-permute.
            let origin = pos.wrapping_sub(TRIANGULAR[(bounce - 1) as usize]) & table.position_mask;
            let permuted = (remainder << table.position_bits) | origin;
            let key = table.inverse_permutation.multiply(permuted);
            return Some(KeyCount { key, count });
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn lcg_next(state: &mut u64) -> u64 {
        *state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        *state
    }

    #[test]
    fn test_minimum_storage_rounds_up_to_power_of_two() {
        let spec = minimum_storage(1000, 40, 255).unwrap();
        assert_eq!(spec.table_length, 1024);
        assert_eq!(spec.position_bits, 10);
        assert!(spec.table_length.is_power_of_two());
    }

    #[test]
    fn test_minimum_storage_prefers_wide_words_for_long_keys() {
        // 8 count bits + 7 bounce bits + 30 remainder bits need a 64-bit
        // slot at the requested length; a 32-bit slot would have to grow
        // the table past break-even.
        let spec = minimum_storage(1024, 40, 255).unwrap();
        assert_eq!(spec.word_bits, 64);
        assert_eq!(spec.table_length, 1024);
    }

    #[test]
    fn test_minimum_storage_prefers_narrow_words_when_strictly_smaller() {
        // 8 + 7 + 8 = 23 bits fit a 32-bit slot at the requested length,
        // halving the bytes of the 64-bit layout.
        let spec = minimum_storage(4096, 20, 255).unwrap();
        assert_eq!(spec.word_bits, 32);
        assert_eq!(spec.table_length, 4096);
        assert_eq!(spec.num_bytes(), 4096 * 4);
    }

    #[test]
    fn test_minimum_storage_tie_goes_to_wide_words() {
        // With 30-bit keys the 32-bit layout needs exactly one more
        // address bit (8 + 7 + remainder <= 32 forces 2^13 slots), which
        // ties the 64-bit layout byte-for-byte. Ties pick 64-bit words.
        let spec = minimum_storage(4096, 30, 255).unwrap();
        assert_eq!(spec.word_bits, 64);
        assert_eq!(spec.table_length, 4096);

        // One key bit less and the 32-bit layout fits without growing:
        // strictly smaller, so it wins.
        let spec = minimum_storage(4096, 29, 255).unwrap();
        assert_eq!(spec.word_bits, 32);
        assert_eq!(spec.table_length, 4096);
    }

    #[test]
    fn test_minimum_storage_rejects_bad_parameters() {
        assert_eq!(minimum_storage(16, 0, 255), Err(ConfigError::InvalidKeyBits(0)));
        assert_eq!(minimum_storage(16, 65, 255), Err(ConfigError::InvalidKeyBits(65)));
        assert_eq!(minimum_storage(0, 32, 255), Err(ConfigError::ZeroLength));
        assert_eq!(minimum_storage(16, 32, 0), Err(ConfigError::ZeroMaxCount));
        assert_eq!(
            minimum_storage(16, 32, u64::MAX),
            Err(ConfigError::CounterTooWide { count_bits: 64 })
        );
    }

    #[test]
    fn test_single_threaded_counting_is_exact() {
        let table = CountTable::new(64, 32, 1000).unwrap();
        for _ in 0..5 {
            table.increment(0xdead_beef).unwrap();
        }
        for _ in 0..3 {
            table.increment(0x0bad_cafe).unwrap();
        }
        table.increment(7).unwrap();

        let drained: HashMap<u64, u64> =
            table.entries().map(|e| (e.key, e.count)).collect();
        assert_eq!(drained.len(), 3);
        assert_eq!(drained[&0xdead_beef], 5);
        assert_eq!(drained[&0x0bad_cafe], 3);
        assert_eq!(drained[&7], 1);
    }

    #[test]
    fn test_counts_saturate_at_max_count() {
        let table = CountTable::new(16, 24, 10).unwrap();
        for _ in 0..25 {
            table.increment(123).unwrap();
        }
        let entries: Vec<KeyCount> = table.entries().collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key, 123);
        assert_eq!(entries[0].count, 10);
    }

    #[test]
    fn test_drain_round_trip_multiset() {
        let table = CountTable::new(4096, 48, 255).unwrap();
        let mask = (1u64 << 48) - 1;

        let mut expected: HashMap<u64, u64> = HashMap::new();
        let mut state = 42u64;
        for _ in 0..500 {
            let key = lcg_next(&mut state) & mask;
            let reps = 1 + (lcg_next(&mut state) % 7);
            for _ in 0..reps {
                table.increment(key).unwrap();
            }
            *expected.entry(key).or_insert(0) += reps;
        }

        let drained: HashMap<u64, u64> =
            table.entries().map(|e| (e.key, e.count)).collect();
        assert_eq!(drained, expected);
    }

    #[test]
    fn test_probe_sequence_is_deterministic() {
        // Same parameters, same key: the claimed slot index must match
        // across two independent empty tables.
        let find_slot = |table: &CountTable| -> u64 {
            (0..table.table_length())
                .find(|&pos| table.words.get(pos) != 0)
                .unwrap()
        };

        let a = CountTable::new(1024, 40, 255).unwrap();
        let b = CountTable::new(1024, 40, 255).unwrap();
        a.increment(0x1234_5678_9a).unwrap();
        b.increment(0x1234_5678_9a).unwrap();
        assert_eq!(find_slot(&a), find_slot(&b));
    }

    #[test]
    fn test_tiny_table_reports_too_many_collisions() {
        // Far more distinct keys than slots: once every slot is claimed by
        // a different key, the probe budget must run out.
        let table = CountTable::new(8, 20, 3).unwrap();
        let mut state = 7u64;
        let mut saw_overflow = false;
        for _ in 0..200 {
            let key = lcg_next(&mut state) & 0xf_ffff;
            if table.increment(key) == Err(CountError::TooManyCollisions) {
                saw_overflow = true;
                break;
            }
        }
        assert!(saw_overflow);
    }

    #[test]
    fn test_single_slot_table_overflows_on_second_key() {
        let table = CountTable::new(1, 16, 3).unwrap();
        table.increment(1).unwrap();
        table.increment(1).unwrap();
        assert_eq!(table.increment(2), Err(CountError::TooManyCollisions));
        // The first key's count is unaffected by the failed insert.
        let entries: Vec<KeyCount> = table.entries().collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0], KeyCount { key: 1, count: 2 });
    }

    #[test]
    fn test_concurrent_increments_lose_no_updates() {
        let table = Arc::new(CountTable::new(256, 32, 1_000_000).unwrap());
        let keys: Vec<u64> = vec![11, 222, 3333, 44444];
        let threads = 8;
        let per_thread = 2000u64;

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let table = Arc::clone(&table);
                let keys = keys.clone();
                std::thread::spawn(move || {
                    for _ in 0..per_thread {
                        for &key in &keys {
                            table.increment(key).unwrap();
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let drained: HashMap<u64, u64> =
            table.entries().map(|e| (e.key, e.count)).collect();
        assert_eq!(drained.len(), keys.len());
        for &key in &keys {
            assert_eq!(drained[&key], threads * per_thread, "key {}", key);
        }
    }

    #[test]
    fn test_empty_table_drains_nothing() {
        let table = CountTable::new(128, 30, 15).unwrap();
        assert_eq!(table.entries().count(), 0);
    }
}
