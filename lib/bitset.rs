//! A dense, fixed-size set of instruction indices.

use serde::{Deserialize, Serialize};
use std::ops::Range;

const WORD_BITS: usize = 64;

/// A fixed-size bit set over `0..len`.
///
/// Indices outside `0..len` are never members. Inserting one is a no-op.
#[derive(Clone, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct BitSet {
    words: Vec<u64>,
    len: usize,
}

impl BitSet {
    /// Create an empty `BitSet` able to hold indices in `0..len`.
    pub fn new(len: usize) -> BitSet {
        BitSet {
            words: vec![0; len.div_ceil(WORD_BITS)],
            len,
        }
    }

    /// The number of indices this set can hold.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if no index is set.
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|word| *word == 0)
    }

    /// The number of indices set.
    pub fn count(&self) -> usize {
        self.words
            .iter()
            .map(|word| word.count_ones() as usize)
            .sum()
    }

    /// Returns `true` if `index` was newly inserted.
    pub fn insert(&mut self, index: usize) -> bool {
        if index >= self.len {
            return false;
        }
        let word = &mut self.words[index / WORD_BITS];
        let mask = 1u64 << (index % WORD_BITS);
        let inserted = *word & mask == 0;
        *word |= mask;
        inserted
    }

    /// Insert every index of `range` which fits in this set.
    pub fn insert_range(&mut self, range: Range<usize>) {
        for index in range.start..range.end.min(self.len) {
            self.insert(index);
        }
    }

    pub fn contains(&self, index: usize) -> bool {
        if index >= self.len {
            return false;
        }
        self.words[index / WORD_BITS] & (1u64 << (index % WORD_BITS)) != 0
    }

    /// Iterate over all set indices in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.len).filter(move |index| self.contains(*index))
    }
}
