//! Square bit matrices over GF(2)
//!
//! A `BitMatrix` represents an invertible linear transform of a fixed-width
//! bit vector: addition is XOR, multiplication is AND. The counting table
//! multiplies every key by a random invertible matrix before the key
//! addresses a slot, so the low bits of the table index depend on all bits
//! of the original key. The drain pass multiplies by the inverse matrix to
//! get the original key back.
//!
//! Rows are packed into 64-bit words, one word per row. A column cache
//! (the transpose, also one word per column) is filled eagerly so the hot
//! matrix-vector multiply can XOR whole columns instead of computing a
//! parity per output bit.

use crate::constants::{MATRIX_SEED_BASE, MAX_MATRIX_ATTEMPTS};
use ahash::RandomState;
use std::hash::{BuildHasher, Hasher};
use thiserror::Error;

/// Error type for matrix construction
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MatrixError {
    /// No invertible matrix was found within the seed retry budget.
    /// Random GF(2) matrices are invertible with probability ~0.29 or
    /// better, so this indicates a broken random source.
    #[error("no invertible {dim}x{dim} bit matrix found after {attempts} seeds")]
    NoInvertibleMatrix {
        /// Matrix dimension that was requested
        dim: u32,
        /// Number of seeds tried before giving up
        attempts: u64,
    },
}

/// A square bit matrix over GF(2), acting on vectors of `dim` bits
/// packed into a `u64`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BitMatrix {
    dim: u32,
    /// Row `i`, bit `j` holds element (i, j). High `64 - dim` bits are zero.
    rows: Vec<u64>,
    /// Column cache: `cols[j]` is column `j` as a bit vector over rows.
    cols: Vec<u64>,
}

/// Mask selecting the low `dim` bits of a word.
#[inline]
const fn width_mask(dim: u32) -> u64 {
    if dim >= 64 {
        u64::MAX
    } else {
        (1u64 << dim) - 1
    }
}

impl BitMatrix {
    /// Build a matrix from explicit rows. Bits above `dim` in each row
    /// must be zero.
    ///
    /// # Panics
    /// Panics if `dim` is not in 1..=64, if the number of rows differs
    /// from `dim`, or if a row has bits set above the matrix width.
    pub fn from_rows(rows: Vec<u64>) -> Self {
        let dim = rows.len() as u32;
        assert!((1..=64).contains(&dim), "matrix dimension must be in 1..=64");
        let mask = width_mask(dim);
        for (i, &row) in rows.iter().enumerate() {
            assert_eq!(row & !mask, 0, "row {} has bits outside the matrix width", i);
        }
        let cols = transpose_words(&rows);
        Self { dim, rows, cols }
    }

    /// Build the `dim x dim` identity matrix.
    pub fn identity(dim: u32) -> Self {
        assert!((1..=64).contains(&dim), "matrix dimension must be in 1..=64");
        Self::from_rows((0..dim).map(|i| 1u64 << i).collect())
    }

    /// Build a random matrix, each element set with probability 1/2.
    ///
    /// The random source is a seeded ahash state, so the same `(dim, seed)`
    /// pair always produces the same matrix on every platform.
    pub fn random(dim: u32, seed: u64) -> Self {
        assert!((1..=64).contains(&dim), "matrix dimension must be in 1..=64");
        let state = RandomState::with_seeds(seed, !seed, seed.rotate_left(32), !seed.rotate_left(32));
        let mask = width_mask(dim);
        let rows = (0..dim)
            .map(|i| {
                let mut hasher = state.build_hasher();
                hasher.write_u64(i as u64);
                hasher.finish() & mask
            })
            .collect();
        Self::from_rows(rows)
    }

    /// Search successive seeds for an invertible matrix, returning the
    /// matrix together with its inverse.
    ///
    /// # Errors
    /// Returns [`MatrixError::NoInvertibleMatrix`] if the retry budget is
    /// exhausted, which is a fatal configuration error for callers.
    pub fn random_invertible(dim: u32) -> Result<(Self, Self), MatrixError> {
        for attempt in 0..MAX_MATRIX_ATTEMPTS {
            let matrix = Self::random(dim, MATRIX_SEED_BASE + attempt);
            if let Some(inverse) = matrix.invert() {
                return Ok((matrix, inverse));
            }
        }
        Err(MatrixError::NoInvertibleMatrix {
            dim,
            attempts: MAX_MATRIX_ATTEMPTS,
        })
    }

    /// Matrix dimension.
    #[inline]
    pub fn dim(&self) -> u32 {
        self.dim
    }

    /// Row `i` as a packed bit vector.
    #[inline]
    pub fn row(&self, i: usize) -> u64 {
        self.rows[i]
    }

    /// Multiply this matrix by a bit vector.
    ///
    /// Bit `j` of `vector` selects column `j`; the result is the XOR of the
    /// selected columns. The select mask `0u64.wrapping_sub(bit)` broadcasts
    /// the bit to a full word, keeping the inner loop branch-free with no
    /// parity instruction.
    #[inline]
    pub fn multiply(&self, vector: u64) -> u64 {
        let mut acc = 0u64;
        for (j, &col) in self.cols.iter().enumerate() {
            acc ^= col & 0u64.wrapping_sub((vector >> j) & 1);
        }
        acc
    }

    /// Invert the matrix by Gauss-Jordan elimination over GF(2).
    ///
    /// Forward elimination pivots each column onto the diagonal and clears
    /// it below; back substitution clears it above. Identical row
    /// operations applied to an identity companion leave the companion
    /// holding the inverse. Returns `None` if some pivot column is entirely
    /// zero, i.e. the matrix is singular.
    pub fn invert(&self) -> Option<Self> {
        let dim = self.dim as usize;
        let mut work = self.rows.clone();
        let mut companion: Vec<u64> = (0..dim).map(|i| 1u64 << i).collect();

        for col in 0..dim {
            let bit = 1u64 << col;
            let pivot = (col..dim).find(|&r| work[r] & bit != 0)?;
            work.swap(col, pivot);
            companion.swap(col, pivot);
            for r in col + 1..dim {
                if work[r] & bit != 0 {
                    work[r] ^= work[col];
                    companion[r] ^= companion[col];
                }
            }
        }

        for col in (0..dim).rev() {
            let bit = 1u64 << col;
            for r in 0..col {
                if work[r] & bit != 0 {
                    work[r] ^= work[col];
                    companion[r] ^= companion[col];
                }
            }
        }

        Some(Self::from_rows(companion))
    }
}

/// Transpose a square bit matrix held as one word per row.
fn transpose_words(rows: &[u64]) -> Vec<u64> {
    let dim = rows.len();
    let mut cols = vec![0u64; dim];
    for (i, &row) in rows.iter().enumerate() {
        let mut remaining = row;
        while remaining != 0 {
            let j = remaining.trailing_zeros() as usize;
            cols[j] |= 1u64 << i;
            remaining &= remaining - 1;
        }
    }
    cols
}
