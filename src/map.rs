//! Implements the Map phase.

use std::collections::BTreeMap;
use std::io::Write;

use tracing::{debug, warn};

use crate::error::{Error, ExtractionError, Result};
use crate::formats::lines::LinesWriter;
use crate::mapreducer::{Mapper, Reducer, Sharder};
use crate::parameters::MRParameters;
use crate::record_types::{CompositeKey, KVPair, MEmitter, SubmissionRecord, Summary};

/// Hadoop streaming counter update for one skipped submission.
pub const SKIP_COUNTER: &str = "reporter:counter:corpusmr,skipped_submissions,1";

/// What happened to the submissions of one or more map partitions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MapStats {
    /// Input records seen, including skipped ones.
    pub submissions: usize,
    pub mapped: usize,
    pub skipped: usize,
    /// Records of other problems, ignored because of the problem filter.
    pub filtered: usize,
    /// Pairs leaving the partition (after combining, if enabled).
    pub pairs: usize,
}

impl MapStats {
    pub fn add(&mut self, other: &MapStats) {
        self.submissions += other.submissions;
        self.mapped += other.mapped;
        self.skipped += other.skipped;
        self.filtered += other.filtered;
        self.pairs += other.pairs;
    }
}

/// Sorted map output of one partition, one pair list per reduce shard.
#[derive(Debug)]
pub struct MapOutput {
    pub shards: Vec<Vec<KVPair>>,
    pub stats: MapStats,
}

/// This is the base of the mapping phase. It contains an input and the sorted
/// intermediary output. Every mapper thread has one MapPartition instance per input
/// chunk.
pub struct MapPartition<MR, MapInput>
    where MR: Mapper + Reducer + Sharder,
          MapInput: Iterator<Item = Result<SubmissionRecord>>
{
    mr: MR,
    params: MRParameters,
    input: MapInput,
    sorted_output: BTreeMap<CompositeKey, Vec<Summary>>,
    stats: MapStats,
}

impl<MR, MapInput> MapPartition<MR, MapInput>
    where MR: Mapper + Reducer + Sharder,
          MapInput: Iterator<Item = Result<SubmissionRecord>>
{
    pub fn new(params: MRParameters, input: MapInput, mr: MR) -> MapPartition<MR, MapInput> {
        MapPartition {
            mr,
            params,
            input,
            sorted_output: BTreeMap::new(),
            stats: MapStats::default(),
        }
    }

    /// Maps the whole input. Submissions failing extraction are skipped and counted;
    /// any other input error aborts the partition.
    pub fn run(mut self) -> Result<MapOutput> {
        self.do_map()?;
        let output = self.write_output()?;
        debug!(partition = self.params.shard_id, submissions = output.stats.submissions,
               skipped = output.stats.skipped, pairs = output.stats.pairs, "map partition done");
        Ok(output)
    }

    fn do_map(&mut self) -> Result<()> {
        while let Some(item) = self.input.next() {
            self.stats.submissions += 1;
            let record = match item {
                Ok(record) => record,
                Err(Error::Extraction(e)) => {
                    self.skip(&e);
                    continue;
                }
                Err(e) => return Err(e),
            };
            if !self.mr.selects(&record) {
                self.stats.filtered += 1;
                continue;
            }

            let mut e = MEmitter::new();
            match self.mr.map(&mut e, &record) {
                Ok(()) => {
                    self.stats.mapped += 1;
                    self.insert_result(e);
                }
                Err(err) => self.skip(&err),
            }
        }
        Ok(())
    }

    fn skip(&mut self, err: &ExtractionError) {
        self.stats.skipped += 1;
        warn!(partition = self.params.shard_id, "skipping submission: {}", err);
        if self.params.report_counters {
            eprintln!("{}", SKIP_COUNTER);
        }
    }

    fn insert_result(&mut self, emitter: MEmitter) {
        for pair in emitter.into_pairs() {
            self.sorted_output.entry(pair.key).or_default().push(pair.value);
        }
    }

    /// Distributes the buffered output over the reduce shards. Keys are visited in
    /// order, so every shard's list is sorted.
    fn write_output(&mut self) -> Result<MapOutput> {
        let reducers = self.params.reducers;
        let mut shards: Vec<Vec<KVPair>> = (0..reducers).map(|_| Vec::new()).collect();

        for (key, mut values) in std::mem::take(&mut self.sorted_output) {
            let shard = self.mr.shard(reducers, &key);
            if self.params.combine {
                let rec = self.mr.combine(key, values)?;
                shards[shard].push(KVPair {
                    key: rec.key,
                    value: rec.summary,
                });
            } else {
                values.sort();
                for value in values {
                    shards[shard].push(KVPair {
                        key: key.clone(),
                        value,
                    });
                }
            }
        }
        self.stats.pairs = shards.iter().map(Vec::len).sum();
        Ok(MapOutput {
            shards,
            stats: self.stats,
        })
    }
}

/// Maps a submission stream in partitions of `map_partition_size` records and writes
/// each partition's sorted output as key/value lines. This is the streaming mapper:
/// the engine shuffles, so output is not sharded.
pub fn map_stream<MR, In, W>(mr: &MR,
                             params: &MRParameters,
                             input: In,
                             out: &mut LinesWriter<W>)
                             -> Result<MapStats>
    where MR: Mapper + Reducer + Sharder,
          In: IntoIterator<Item = Result<SubmissionRecord>>,
          W: Write
{
    let mut input = input.into_iter();
    let mut stats = MapStats::default();
    let single_shard = params.clone().set_concurrency(params.mappers, 1);

    for partition in 0.. {
        let chunk: Vec<Result<SubmissionRecord>> =
            input.by_ref().take(params.map_partition_size).collect();
        if chunk.is_empty() {
            break;
        }
        let output = MapPartition::new(single_shard.clone().set_shard_id(partition),
                                       chunk.into_iter(),
                                       mr.clone())
            .run()?;
        for pair in output.shards.iter().flatten() {
            out.write_record(pair)?;
        }
        stats.add(&output.stats);
    }
    out.flush()?;
    Ok(stats)
}
