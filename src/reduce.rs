//! Implements the Reduce phase.

use std::collections::HashSet;
use std::io::Write;
use std::iter::Peekable;
use std::path::Path;

use tracing::debug;

use crate::error::{ProtocolError, Result};
use crate::formats::lines::LinesWriter;
use crate::mapreducer::Reducer;
use crate::parameters::MRParameters;
use crate::record_types::{CompositeKey, KVPair, MultiRecord};
use crate::shard_merge::ShardMergeIterator;

/// One reduce shard of the local controller: merges the sorted outputs every map
/// partition produced for this shard and folds each key group.
pub struct ReducePartition<MR: Reducer> {
    mr: MR,
    params: MRParameters,
    srcs: Vec<Vec<KVPair>>,
}

impl<MR: Reducer> ReducePartition<MR> {
    /// mr is the reduce function; srcs holds one sorted pair list per map partition.
    pub fn new(mr: MR, params: MRParameters, srcs: Vec<Vec<KVPair>>) -> ReducePartition<MR> {
        ReducePartition { mr, params, srcs }
    }

    /// Runs the partition, writing one aggregated record per key to `path`. The file
    /// is created even if the shard received no keys. Returns the number of records
    /// written.
    pub fn run(self, path: &Path) -> Result<usize> {
        let mut out = LinesWriter::new_to_file(path)?;
        let sorted_input = ShardMergeIterator::build(self.srcs.into_iter().map(Vec::into_iter));
        let n = reduce_stream(&self.mr, sorted_input.map(Ok), false, &mut out)?;
        debug!(shard = self.params.shard_id, records = n, path = %path.display(),
               "reduce partition done");
        Ok(n)
    }
}

/// Groups a key-sorted pair stream and writes one record per group. With `combine`
/// set, the partial fold is used and its output is again valid reducer input.
pub fn reduce_stream<MR, In, W>(mr: &MR, input: In, combine: bool, out: &mut LinesWriter<W>) -> Result<usize>
    where MR: Reducer,
          In: IntoIterator<Item = Result<KVPair>>,
          W: Write
{
    let mut written = 0;
    for group in RecordsToMultiRecords::new(input.into_iter(), 1) {
        let (key, values) = group?.into_parts();
        let rec = if combine {
            mr.combine(key, values)?
        } else {
            mr.reduce(key, values)?
        };
        out.write_record(&rec)?;
        written += 1;
    }
    out.flush()?;
    Ok(written)
}

/// Iterator adapter: Converts a stream of pairs into a stream of MultiRecords by
/// grouping subsequent pairs with identical key.
/// The input iterator must yield pairs in an order where identical keys are
/// adjacent; a key showing up again after its group ended is a ProtocolError.
///
/// No particular key order is assumed: a streaming engine sorts by the bytes of the
/// wire form, which is not the order of `CompositeKey`. Every closed key is therefore
/// remembered, so memory grows with the number of distinct keys in the input.
pub struct RecordsToMultiRecords<It: Iterator<Item = Result<KVPair>>> {
    it: Peekable<It>,
    /// Efficiency knob: How big groups of records are expected to be.
    expected_group_size: usize,
    closed: HashSet<CompositeKey>,
}

impl<It: Iterator<Item = Result<KVPair>>> RecordsToMultiRecords<It> {
    pub fn new(it: It, egs: usize) -> RecordsToMultiRecords<It> {
        RecordsToMultiRecords {
            it: it.peekable(),
            expected_group_size: egs,
            closed: HashSet::new(),
        }
    }
}

impl<It: Iterator<Item = Result<KVPair>>> Iterator for RecordsToMultiRecords<It> {
    type Item = Result<MultiRecord>;
    fn next(&mut self) -> Option<Self::Item> {
        let first = match self.it.next()? {
            Err(e) => return Some(Err(e)),
            Ok(pair) => pair,
        };
        if self.closed.contains(&first.key) {
            return Some(Err(ProtocolError::KeyRegrouped(first.key.to_string()).into()));
        }

        let mut collection = Vec::with_capacity(self.expected_group_size);
        collection.push(first.value);
        // An error ends the group; it is returned by the next call.
        while let Some(Ok(pair)) = self.it.next_if(|p| matches!(p, Ok(p) if p.key == first.key)) {
            collection.push(pair.value);
        }

        self.closed.insert(first.key.clone());
        Some(Ok(MultiRecord::new(first.key, collection)))
    }
}
