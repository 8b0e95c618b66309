//! Implements a merge tree to merge an arbitrary number of sorted map outputs.
//! Genericized in order to build arbitrary merge trees.

use std::iter::{self, Peekable};

type Source<'a, T> = Peekable<Box<dyn Iterator<Item = T> + 'a>>;

/// Merges two sorted iterators; either side may itself be a ShardMergeIterator.
/// This type uses dynamic instead of static dispatch because it realizes an arbitrary
/// structure and can therefore not work with a single type signature.
///
/// On equal items the left side wins, so the merge is stable in source order.
pub struct ShardMergeIterator<'a, T: Ord> {
    left: Source<'a, T>,
    right: Source<'a, T>,
}

impl<'a, T: Ord + 'a> Iterator for ShardMergeIterator<'a, T> {
    type Item = T;
    fn next(&mut self) -> Option<Self::Item> {
        let take_left = match (self.left.peek(), self.right.peek()) {
            (None, None) => return None,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (Some(l), Some(r)) => l <= r,
        };
        if take_left {
            self.left.next()
        } else {
            self.right.next()
        }
    }
}

impl<'a, T: Ord + 'a> ShardMergeIterator<'a, T> {
    fn pair<L, R>(left: L, right: R) -> ShardMergeIterator<'a, T>
        where L: Iterator<Item = T> + 'a,
              R: Iterator<Item = T> + 'a
    {
        let left: Box<dyn Iterator<Item = T> + 'a> = Box::new(left);
        let right: Box<dyn Iterator<Item = T> + 'a> = Box::new(right);
        ShardMergeIterator {
            left: left.peekable(),
            right: right.peekable(),
        }
    }

    /// Takes multiple sorted iterators and generates one ShardMergeIterator yielding
    /// all of their items in order.
    pub fn build<It, ItIt>(sources: ItIt) -> ShardMergeIterator<'a, T>
        where It: Iterator<Item = T> + 'a,
              ItIt: IntoIterator<Item = It>
    {
        let mut sources = sources.into_iter();
        let mut merged = Vec::new();

        // Initial merging: Merge pairs of input iterators together.
        while let Some(src1) = sources.next() {
            match sources.next() {
                None => merged.push(ShardMergeIterator::pair(src1, iter::empty())),
                Some(src2) => merged.push(ShardMergeIterator::pair(src1, src2)),
            }
        }

        // Recursively build the merge tree from the leaves.
        ShardMergeIterator::merge(merged)
    }

    /// Merge multiple ShardMergeIterators, recursively (meaning it will result in a more
    /// or less balanced merge sort tree).
    fn merge(mut its: Vec<ShardMergeIterator<'a, T>>) -> ShardMergeIterator<'a, T> {
        match its.len() {
            0 => ShardMergeIterator::pair(iter::empty(), iter::empty()),
            1 => its.remove(0),
            _ => {
                let right = its.split_off(its.len() / 2);
                ShardMergeIterator::pair(ShardMergeIterator::merge(its),
                                         ShardMergeIterator::merge(right))
            }
        }
    }
}
