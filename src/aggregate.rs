//! The merge function shared by combiner and reducer.
//!
//! `merge` is associative and commutative over summaries of one shape, with
//! `Samples([])` and `Count(0)` as identities. That is what allows the engine to
//! pre-aggregate any subset of a key's values, in any order, before the reducer sees
//! them.

use crate::error::ProtocolError;
use crate::record_types::Summary;

/// Merges two summaries of the same shape.
pub fn merge(a: Summary, b: Summary) -> Result<Summary, ProtocolError> {
    match (a, b) {
        (Summary::Count(x), Summary::Count(y)) => Ok(Summary::Count(x.saturating_add(y))),
        (Summary::Samples(x), Summary::Samples(y)) => Ok(Summary::Samples(merge_sorted(x, y))),
        (a, b) => {
            Err(ProtocolError::SummaryMismatch {
                left: a.kind(),
                right: b.kind(),
            })
        }
    }
}

/// Folds all values into `identity`.
pub fn fold<I>(identity: Summary, values: I) -> Result<Summary, ProtocolError>
    where I: IntoIterator<Item = Summary>
{
    values.into_iter().try_fold(identity, merge)
}

/// Multiset union of two sorted sample lists, keeping the result sorted.
fn merge_sorted(a: Vec<u64>, b: Vec<u64>) -> Vec<u64> {
    if a.is_empty() {
        return b;
    }
    if b.is_empty() {
        return a;
    }
    let mut out = Vec::with_capacity(a.len() + b.len());
    let (mut ia, mut ib) = (a.into_iter().peekable(), b.into_iter().peekable());
    loop {
        let take_a = match (ia.peek(), ib.peek()) {
            (None, None) => break,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (Some(x), Some(y)) => x <= y,
        };
        let next = if take_a { ia.next() } else { ib.next() };
        out.extend(next);
    }
    out
}
