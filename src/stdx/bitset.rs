//! Allocation bitset: a fixed bit array with all-or-nothing group allocation.
//!
//! Bits are stored in `u64` words. Set bits mark allocated slots, zero bits
//! mark free slots. [`AllocBitset::allocate`] hands out the lowest free bits
//! in ascending order and either satisfies the whole request or changes
//! nothing, which is what lets callers pre-validate a multi-slot reservation
//! and keep strong exception safety.
//!
//! # Invariants
//! - Padding bits (indices beyond `bit_length`) are always zero.
//! - `allocate` mutates the words only after confirming enough free bits
//!   exist (two passes: count, then set).

/// Fixed-capacity bitset tracking allocated (set) vs free (zero) slots.
///
/// Capacity is fixed at construction. All indexing operations panic when
/// `idx >= bit_length`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AllocBitset {
    words: Vec<u64>,
    bit_length: usize,
}

impl AllocBitset {
    /// Creates a bitset with `bit_length` addressable bits, all free.
    pub fn empty(bit_length: usize) -> Self {
        assert!(bit_length > 0, "AllocBitset capacity must be > 0");
        let words = vec![0u64; bit_length.div_ceil(64)];
        Self { words, bit_length }
    }

    /// Returns the number of addressable bits.
    #[inline]
    pub fn bit_length(&self) -> usize {
        self.bit_length
    }

    /// Returns a view of the backing words. Padding bits are zero.
    #[inline]
    pub fn words(&self) -> &[u64] {
        &self.words
    }

    #[inline]
    fn last_word_mask(&self) -> u64 {
        let remaining = self.bit_length % 64;
        if remaining == 0 {
            u64::MAX
        } else {
            (1u64 << remaining) - 1
        }
    }

    /// Counts allocated (set) bits; never exceeds `bit_length`.
    pub fn count(&self) -> usize {
        let total: usize = self.words.iter().map(|w| w.count_ones() as usize).sum();
        debug_assert!(total <= self.bit_length);
        total
    }

    /// Counts free (zero) bits.
    #[inline]
    pub fn free_count(&self) -> usize {
        self.bit_length - self.count()
    }

    /// Returns whether `idx` is allocated.
    ///
    /// Panics if `idx >= bit_length`.
    #[inline]
    pub fn is_set(&self, idx: usize) -> bool {
        assert!(idx < self.bit_length, "bit index out of bounds");
        (self.words[idx / 64] & (1u64 << (idx % 64))) != 0
    }

    /// Marks every bit free.
    #[inline]
    pub fn clear(&mut self) {
        self.words.fill(0);
    }

    /// Attempts to allocate `indexes.len()` free bits.
    ///
    /// On success the lowest free bits are set, their indexes are written to
    /// `indexes` in ascending order, and `true` is returned. If fewer free
    /// bits exist than requested, the bitset is left byte-identical to its
    /// pre-call state and `false` is returned. A zero-length request always
    /// succeeds without touching the words.
    pub fn allocate(&mut self, indexes: &mut [usize]) -> bool {
        let wanted = indexes.len();
        if wanted == 0 {
            return true;
        }

        // Pass 1: confirm enough zero bits exist. Padding bits in the last
        // word must not be counted as free.
        let last = self.words.len() - 1;
        let mut zeroes = 0usize;
        for (i, &word) in self.words.iter().enumerate() {
            let word = if i == last {
                word | !self.last_word_mask()
            } else {
                word
            };
            zeroes += (!word).count_ones() as usize;
            if zeroes >= wanted {
                break;
            }
        }
        if zeroes < wanted {
            return false;
        }

        // Pass 2: set the first `wanted` zero bits, recording their indexes.
        // Pass 1 guaranteed enough real (non-padding) zeroes, and zero bits
        // are visited in ascending order, so this loop never reaches padding.
        let mut found = 0usize;
        for (i, word) in self.words.iter_mut().enumerate() {
            let mut free = !*word;
            while free != 0 && found < wanted {
                let bit = free.trailing_zeros() as usize;
                let idx = i * 64 + bit;
                debug_assert!(idx < self.bit_length);
                indexes[found] = idx;
                found += 1;
                *word |= 1u64 << bit;
                free &= free - 1;
            }
            if found == wanted {
                break;
            }
        }

        assert!(found == wanted);
        true
    }

    /// Frees the bits at the given indexes.
    ///
    /// Freeing a bit that is not allocated is a programmer error, caught in
    /// debug builds only.
    ///
    /// Panics if any index is `>= bit_length`.
    pub fn free(&mut self, indexes: &[usize]) {
        for &idx in indexes {
            assert!(idx < self.bit_length, "bit index out of bounds");
            debug_assert!(self.is_set(idx), "freeing an unallocated bit");
            self.words[idx / 64] &= !(1u64 << (idx % 64));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::AllocBitset;

    #[test]
    fn empty_bitset() {
        let b = AllocBitset::empty(8);
        assert_eq!(b.bit_length(), 8);
        assert_eq!(b.count(), 0);
        assert_eq!(b.free_count(), 8);
    }

    #[test]
    fn allocate_ascending() {
        let mut b = AllocBitset::empty(8);
        let mut out = [0usize; 3];
        assert!(b.allocate(&mut out));
        assert_eq!(out, [0, 1, 2]);
        assert_eq!(b.count(), 3);
    }

    #[test]
    fn allocate_zero_is_noop() {
        let mut b = AllocBitset::empty(8);
        let mut out = [0usize; 0];
        assert!(b.allocate(&mut out));
        assert_eq!(b.count(), 0);
    }

    #[test]
    fn allocate_fills_holes_first() {
        let mut b = AllocBitset::empty(8);
        let mut out = [0usize; 5];
        assert!(b.allocate(&mut out));
        b.free(&[1, 3]);

        let mut out = [0usize; 3];
        assert!(b.allocate(&mut out));
        assert_eq!(out, [1, 3, 5]);
    }

    #[test]
    fn failed_allocate_leaves_words_unchanged() {
        // Bits 0, 1, 3, 4, 5 allocated: zeroes remain at 2, 6, 7.
        let mut b = AllocBitset::empty(8);
        let mut out = [0usize; 6];
        assert!(b.allocate(&mut out));
        b.free(&[2]);
        let before = b.words().to_vec();

        let mut out = [0usize; 4];
        assert!(!b.allocate(&mut out));
        assert_eq!(b.words(), &before[..]);

        let mut out = [0usize; 3];
        assert!(b.allocate(&mut out));
        assert_eq!(out, [2, 6, 7]);
        assert_eq!(b.count(), 8);
    }

    #[test]
    fn padding_bits_are_not_free() {
        // 10 bits leaves 54 padding bits in the single word; none of them
        // may satisfy an allocation.
        let mut b = AllocBitset::empty(10);
        let mut out = [0usize; 10];
        assert!(b.allocate(&mut out));

        let mut out = [0usize; 1];
        assert!(!b.allocate(&mut out));
    }

    #[test]
    fn allocate_across_word_boundary() {
        let mut b = AllocBitset::empty(130);
        let mut out = vec![0usize; 130];
        assert!(b.allocate(&mut out));
        assert_eq!(out[63], 63);
        assert_eq!(out[64], 64);
        assert_eq!(out[129], 129);
        assert_eq!(b.free_count(), 0);

        b.free(&[63, 64, 129]);
        let mut out = [0usize; 3];
        assert!(b.allocate(&mut out));
        assert_eq!(out, [63, 64, 129]);
    }

    #[test]
    fn free_then_reallocate() {
        let mut b = AllocBitset::empty(64);
        let mut out = [0usize; 64];
        assert!(b.allocate(&mut out));

        b.free(&[10, 20, 30]);
        assert_eq!(b.free_count(), 3);
        assert!(!b.is_set(10));
        assert!(b.is_set(11));

        let mut out = [0usize; 3];
        assert!(b.allocate(&mut out));
        assert_eq!(out, [10, 20, 30]);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "freeing an unallocated bit")]
    fn double_free_panics_in_debug() {
        let mut b = AllocBitset::empty(8);
        let mut out = [0usize; 1];
        assert!(b.allocate(&mut out));
        b.free(&[0]);
        b.free(&[0]);
    }

    #[test]
    #[should_panic(expected = "bit index out of bounds")]
    fn free_out_of_bounds_panics() {
        let mut b = AllocBitset::empty(8);
        b.free(&[8]);
    }
}

#[cfg(all(test, feature = "stdx-proptest"))]
mod proptests {
    use super::AllocBitset;
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    const PROPTEST_CASES: u32 = 32;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(
            crate::test_utils::proptest_cases(PROPTEST_CASES)
        ))]

        /// A failed allocation never mutates the words.
        #[test]
        fn failed_allocate_is_identity(
            bit_len in 1usize..200,
            pre in 0usize..200,
        ) {
            let mut b = AllocBitset::empty(bit_len);
            let pre = pre.min(bit_len);
            let mut out = vec![0usize; pre];
            prop_assert!(b.allocate(&mut out));

            let before = b.words().to_vec();
            let mut out = vec![0usize; bit_len - pre + 1];
            prop_assert!(!b.allocate(&mut out));
            prop_assert_eq!(b.words(), &before[..]);
        }

        /// Allocate returns ascending, previously-free, now-set indexes.
        #[test]
        fn allocate_contract(
            bit_len in 1usize..200,
            holes in prop::collection::btree_set(0usize..200, 0..64),
        ) {
            let mut b = AllocBitset::empty(bit_len);
            let mut out = vec![0usize; bit_len];
            prop_assert!(b.allocate(&mut out));

            let holes: BTreeSet<usize> =
                holes.into_iter().filter(|&i| i < bit_len).collect();
            let hole_vec: Vec<usize> = holes.iter().copied().collect();
            b.free(&hole_vec);

            let mut out = vec![0usize; hole_vec.len()];
            prop_assert!(b.allocate(&mut out));
            // Lowest-first means we get exactly the holes back, in order.
            prop_assert_eq!(out, hole_vec);
            prop_assert_eq!(b.free_count(), 0);
        }

        /// Count tracks allocations and frees exactly.
        #[test]
        fn count_matches_model(
            bit_len in 1usize..128,
            take in 0usize..128,
            give in 0usize..128,
        ) {
            let take = take.min(bit_len);
            let give = give.min(take);

            let mut b = AllocBitset::empty(bit_len);
            let mut out = vec![0usize; take];
            prop_assert!(b.allocate(&mut out));
            prop_assert_eq!(b.count(), take);

            b.free(&out[..give]);
            prop_assert_eq!(b.count(), take - give);
            prop_assert_eq!(b.free_count(), bit_len - take + give);
        }
    }
}
