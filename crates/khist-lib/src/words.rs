//! Flat arrays of atomic words
//!
//! The counting table's only shared mutable state is a power-of-two-sized
//! array of fixed-width integer fields, mutated exclusively through
//! whole-word compare-and-set. Sub-fields of a word are never written
//! independently, so a single CAS is always a full transaction and no word
//! can tear.
//!
//! Two field widths are supported: 32-bit words halve the memory when the
//! packed slot fits, 64-bit words otherwise. The API is `u64`-facing either
//! way; 32-bit storage truncates on write and widens on read.
//!
//! All orderings are `Relaxed`: counts impose no ordering between threads,
//! and the post-count drain is separated from every increment by a thread
//! join.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// A fixed-length array of atomic integer fields, 32 or 64 bits wide.
pub enum AtomicWordArray {
    /// 32-bit fields
    W32(Box<[AtomicU32]>),
    /// 64-bit fields
    W64(Box<[AtomicU64]>),
}

impl AtomicWordArray {
    /// Allocate `length` zeroed words of `field_bits` width.
    ///
    /// # Panics
    /// Panics if `field_bits` is not 32 or 64.
    pub fn new(length: u64, field_bits: u32) -> Self {
        match field_bits {
            32 => Self::W32((0..length).map(|_| AtomicU32::new(0)).collect()),
            64 => Self::W64((0..length).map(|_| AtomicU64::new(0)).collect()),
            other => panic!("unsupported field width: {} bits", other),
        }
    }

    /// Number of words in the array.
    #[inline]
    pub fn len(&self) -> u64 {
        match self {
            Self::W32(words) => words.len() as u64,
            Self::W64(words) => words.len() as u64,
        }
    }

    /// Whether the array is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Width of one field in bits: 32 or 64.
    #[inline]
    pub fn field_bits(&self) -> u32 {
        match self {
            Self::W32(_) => 32,
            Self::W64(_) => 64,
        }
    }

    /// Atomically read the word at `pos`.
    #[inline]
    pub fn get(&self, pos: u64) -> u64 {
        match self {
            Self::W32(words) => words[pos as usize].load(Ordering::Relaxed) as u64,
            Self::W64(words) => words[pos as usize].load(Ordering::Relaxed),
        }
    }

    /// Atomically replace the word at `pos` with `new`, but only if it
    /// currently equals `expected`. Returns whether the swap happened.
    #[inline]
    pub fn compare_and_set(&self, pos: u64, expected: u64, new: u64) -> bool {
        match self {
            Self::W32(words) => words[pos as usize]
                .compare_exchange(expected as u32, new as u32, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok(),
            Self::W64(words) => words[pos as usize]
                .compare_exchange(expected, new, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_new_is_zeroed() {
        for bits in [32, 64] {
            let words = AtomicWordArray::new(16, bits);
            assert_eq!(words.len(), 16);
            assert_eq!(words.field_bits(), bits);
            for pos in 0..16 {
                assert_eq!(words.get(pos), 0);
            }
        }
    }

    #[test]
    fn test_compare_and_set_semantics() {
        let words = AtomicWordArray::new(4, 64);
        assert!(words.compare_and_set(2, 0, 77));
        assert_eq!(words.get(2), 77);

        // Stale expectation fails and leaves the word untouched
        assert!(!words.compare_and_set(2, 0, 99));
        assert_eq!(words.get(2), 77);

        assert!(words.compare_and_set(2, 77, 78));
        assert_eq!(words.get(2), 78);
    }

    #[test]
    fn test_32_bit_words_truncate() {
        let words = AtomicWordArray::new(2, 32);
        assert!(words.compare_and_set(0, 0, 0xffff_ffff));
        assert_eq!(words.get(0), 0xffff_ffff);
    }

    #[test]
    fn test_concurrent_cas_increments_lose_nothing() {
        let words = Arc::new(AtomicWordArray::new(1, 64));
        let threads = 8;
        let per_thread = 10_000u64;

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let words = Arc::clone(&words);
                std::thread::spawn(move || {
                    for _ in 0..per_thread {
                        loop {
                            let current = words.get(0);
                            if words.compare_and_set(0, current, current + 1) {
                                break;
                            }
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(words.get(0), threads * per_thread);
    }
}
