//! Word-packed bitmap used by every index allocator in this crate.

use alloc::vec;
use alloc::vec::Vec;

const WORD_BITS: usize = u64::BITS as usize;

/// A fixed-capacity set of small integers, stored one bit per index.
///
/// A set bit means "claimed". [`Bitmap::find`] always hands out the lowest clear index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    words: Vec<u64>,
    bits: usize,
}

impl Bitmap {
    /// Creates a bitmap with `bits` indexes, all clear.
    pub fn new(bits: usize) -> Self {
        Self {
            words: vec![0; bits.div_ceil(WORD_BITS)],
            bits,
        }
    }

    /// Returns the number of indexes tracked.
    pub fn capacity(&self) -> usize {
        self.bits
    }

    /// Returns true if `index` is claimed.
    ///
    /// # Panics
    /// Panics if `index` is out of range.
    pub fn test(&self, index: usize) -> bool {
        let (word, mask) = self.locate(index);
        self.words[word] & mask != 0
    }

    /// Claims `index`.
    ///
    /// # Panics
    /// Panics if `index` is out of range.
    pub fn mark(&mut self, index: usize) {
        let (word, mask) = self.locate(index);
        self.words[word] |= mask;
    }

    /// Releases `index`.
    ///
    /// # Panics
    /// Panics if `index` is out of range or was not claimed. Releasing an index twice means
    /// two owners believed they held it, and continuing would hand it out twice.
    pub fn clear(&mut self, index: usize) {
        let (word, mask) = self.locate(index);
        assert!(
            self.words[word] & mask != 0,
            "bitmap index {} released while not claimed",
            index
        );
        self.words[word] &= !mask;
    }

    /// Claims and returns the lowest clear index, or `None` if every index is claimed.
    pub fn find(&mut self) -> Option<usize> {
        for (word_index, word) in self.words.iter_mut().enumerate() {
            if *word == u64::MAX {
                continue;
            }
            let bit = (!*word).trailing_zeros() as usize;
            let index = word_index * WORD_BITS + bit;
            if index >= self.bits {
                return None;
            }
            *word |= 1 << bit;
            return Some(index);
        }
        None
    }

    /// Returns the number of clear indexes.
    pub fn num_clear(&self) -> usize {
        let claimed: usize = self.words.iter().map(|w| w.count_ones() as usize).sum();
        self.bits - claimed
    }

    /// Iterates over the claimed indexes in ascending order.
    pub fn iter_claimed(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.bits).filter(move |&index| self.test(index))
    }

    fn locate(&self, index: usize) -> (usize, u64) {
        assert!(
            index < self.bits,
            "bitmap index {} out of range (capacity {})",
            index,
            self.bits
        );
        (index / WORD_BITS, 1 << (index % WORD_BITS))
    }
}
