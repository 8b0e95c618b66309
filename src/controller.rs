//! Controls the execution of an analysis job on one machine.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, sync_channel};

use scoped_threadpool::Pool;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::formats::lines::files_with_prefix;
use crate::map::{MapOutput, MapPartition, MapStats};
use crate::mapreducer::{Mapper, Reducer, Sharder};
use crate::parameters::MRParameters;
use crate::record_types::{KVPair, SubmissionRecord};
use crate::reduce::ReducePartition;

/// Summary of a finished local run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobReport {
    pub map: MapStats,
    pub map_partitions: usize,
    /// Aggregated records over all part files.
    pub records: usize,
    /// Part files in shard order.
    pub outputs: Vec<PathBuf>,
}

pub struct MRController<MR: Mapper + Reducer + Sharder> {
    params: MRParameters,
    mr: MR,

    // How many map partitions have been run?
    map_partitions_run: usize,
}

/// Calculates the name of a reduce output shard from the parameters.
fn get_reduce_output_name(params: &MRParameters) -> String {
    format!("{}{:05}", params.reduce_output_shard_prefix, params.shard_id)
}

/// Reads up to `size` records. The flag is set when a record carries an error that
/// will abort the job, so no further input should be read.
fn read_map_input<In>(it: &mut In, size: usize) -> (Vec<Result<SubmissionRecord>>, bool)
    where In: Iterator<Item = Result<SubmissionRecord>>
{
    let mut partition = Vec::with_capacity(size.min(8192));
    for item in it.by_ref() {
        let fatal = matches!(item, Err(ref e) if !matches!(e, Error::Extraction(_)));
        partition.push(item);
        if fatal {
            return (partition, true);
        }
        if partition.len() == size {
            break;
        }
    }
    (partition, false)
}

impl<MR: Mapper + Reducer + Sharder> MRController<MR> {
    /// Run a job over `input`, writing one part file per reduce shard into `out_dir`.
    /// Part files of an earlier run with the same prefix are replaced.
    pub fn run<In>(mr: MR, params: MRParameters, input: In, out_dir: &Path) -> Result<JobReport>
        where In: IntoIterator<Item = Result<SubmissionRecord>>
    {
        params.validate()?;
        let mut controller = MRController {
            params,
            mr,
            map_partitions_run: 0,
        };
        info!(job = controller.params.job_type.name(), mappers = controller.params.mappers,
              reducers = controller.params.reducers, "starting job");

        let map_outputs = controller.run_map(input.into_iter())?;
        let mut stats = MapStats::default();
        for output in &map_outputs {
            stats.add(&output.stats);
        }

        controller.prepare_output(out_dir)?;
        let written = controller.run_reduce(map_outputs, out_dir)?;
        let records: usize = written.iter().map(|(_, n)| n).sum();

        info!(submissions = stats.submissions, mapped = stats.mapped, skipped = stats.skipped,
              filtered = stats.filtered, records, "job finished");
        Ok(JobReport {
            map: stats,
            map_partitions: controller.map_partitions_run,
            records,
            outputs: written.into_iter().map(|(path, _)| path).collect(),
        })
    }

    /// Maps the input partition by partition. At most `mappers` partitions are in
    /// memory at once; outputs are returned in input order.
    fn run_map<In>(&mut self, mut input: In) -> Result<Vec<MapOutput>>
        where In: Iterator<Item = Result<SubmissionRecord>>
    {
        let mut pool = Pool::new(self.params.mappers as u32);
        let (send, recv) = sync_channel(self.params.mappers);
        let (results_send, results_recv) = channel();

        for _ in 0..self.params.mappers {
            let _ = send.send(true);
        }

        let params = &self.params;
        let mr = &self.mr;
        let partitions_run = &mut self.map_partitions_run;
        pool.scoped(|scope| {
            loop {
                let _ = recv.recv();

                let (inp, stop) = read_map_input(&mut input, params.map_partition_size);
                if inp.is_empty() {
                    break;
                }

                let mr = mr.clone();
                let partition = *partitions_run;
                let params = params.clone().set_shard_id(partition);
                let done = send.clone();
                let results = results_send.clone();

                scope.execute(move || {
                    let output = MapPartition::new(params, inp.into_iter(), mr).run();
                    let _ = results.send((partition, output));
                    let _ = done.send(true);
                });
                *partitions_run += 1;
                if stop {
                    break;
                }
            }

            scope.join_all();
        });
        drop(results_send);

        let mut outputs: Vec<(usize, Result<MapOutput>)> = results_recv.into_iter().collect();
        outputs.sort_by_key(|(partition, _)| *partition);
        debug!(partitions = outputs.len(), "map phase done");
        outputs.into_iter().map(|(_, output)| output).collect()
    }

    fn prepare_output(&self, out_dir: &Path) -> Result<()> {
        fs::create_dir_all(out_dir)?;
        for stale in files_with_prefix(out_dir, &self.params.reduce_output_shard_prefix)? {
            debug!(path = %stale.display(), "removing output of previous run");
            fs::remove_file(stale)?;
        }
        Ok(())
    }

    fn run_reduce(&self, map_outputs: Vec<MapOutput>, out_dir: &Path) -> Result<Vec<(PathBuf, usize)>> {
        let reducers = self.params.reducers;
        let mut shard_inputs: Vec<Vec<Vec<KVPair>>> = (0..reducers).map(|_| Vec::new()).collect();
        for output in map_outputs {
            for (shard, pairs) in output.shards.into_iter().enumerate() {
                shard_inputs[shard].push(pairs);
            }
        }

        let mut pool = Pool::new(reducers as u32);
        let (results_send, results_recv) = channel();

        pool.scoped(|scope| {
            for (i, inputs) in shard_inputs.into_iter().enumerate() {
                let mr = self.mr.clone();
                let params = self.params.clone().set_shard_id(i);
                let path = out_dir.join(get_reduce_output_name(&params));
                let results = results_send.clone();

                scope.execute(move || {
                    let reduce_part = ReducePartition::new(mr, params, inputs);
                    let written = reduce_part.run(&path).map(|n| (path, n));
                    let _ = results.send((i, written));
                });
            }
        });
        drop(results_send);

        let mut written: Vec<(usize, Result<(PathBuf, usize)>)> = results_recv.into_iter().collect();
        written.sort_by_key(|(shard, _)| *shard);
        written.into_iter().map(|(_, w)| w).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapreducer::AnalysisJob;
    use crate::parameters::JobType;

    fn corpus(n: usize) -> Vec<Result<SubmissionRecord>> {
        (0..n).map(|i| {
                  let src = if i % 3 == 0 {
                      "import sys\nfor x in sys.argv:\n    print(x)\n".to_string()
                  } else {
                      format!("import math\nprint(math.sqrt({}))\n", i)
                  };
                  Ok(SubmissionRecord::new("p00001", "python", &format!("s{}", i), src))
              })
              .collect()
    }

    fn run(params: MRParameters, dir: &Path) -> JobReport {
        MRController::run(AnalysisJob::new(&params), params, corpus(50), dir).unwrap()
    }

    fn read_all(report: &JobReport) -> String {
        report.outputs.iter().map(|p| fs::read_to_string(p).unwrap()).collect()
    }

    #[test]
    fn test_reduce_output_name() {
        let params = MRParameters::new(JobType::LineCount).set_shard_id(3);
        assert_eq!(get_reduce_output_name(&params), "part-00003");
    }

    #[test]
    fn test_run_job() {
        let dir = tempfile::tempdir().unwrap();
        let params = MRParameters::new(JobType::ImportPop).set_concurrency(3, 2).set_partition_size(7);
        let report = run(params, dir.path());

        assert_eq!(report.map_partitions, 8);
        assert_eq!(report.map.submissions, 50);
        assert_eq!(report.outputs.len(), 2);
        assert_eq!(report.records, 2);

        let mut lines: Vec<String> = read_all(&report).lines().map(String::from).collect();
        lines.sort();
        assert_eq!(lines, vec!["p00001\tmath\t33", "p00001\tsys\t17"]);
    }

    #[test]
    fn test_rerun_is_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let params = MRParameters::new(JobType::LineCount).set_concurrency(4, 3).set_partition_size(5);
        let first = read_all(&run(params.clone(), dir.path()));
        let second = read_all(&run(params.set_combine(false), dir.path()));
        assert_eq!(first, second);
    }

    #[test]
    fn test_stale_parts_are_replaced() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("part-00009"), "stale\n").unwrap();
        let report = run(MRParameters::new(JobType::ConstructFreq).set_concurrency(2, 2),
                         dir.path());
        assert!(!dir.path().join("part-00009").exists());
        assert_eq!(report.outputs.len(), 2);
    }

    #[test]
    fn test_other_outputs_are_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("imports").join("part-00000");
        fs::create_dir_all(nested.parent().unwrap()).unwrap();
        fs::write(&nested, "p1\tsys\t1\n").unwrap();

        run(MRParameters::new(JobType::LineCount).set_concurrency(2, 1), dir.path());
        assert_eq!(fs::read_to_string(&nested).unwrap(), "p1\tsys\t1\n");
    }

    #[test]
    fn test_empty_output_prefix_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let submission = dir.path().join("corpus").join("s1.py");
        fs::create_dir_all(submission.parent().unwrap()).unwrap();
        fs::write(&submission, "print(1)\n").unwrap();
        fs::write(dir.path().join("notes.txt"), "keep\n").unwrap();

        let params = MRParameters::new(JobType::LineCount).set_out_name(String::new());
        let result = MRController::run(AnalysisJob::new(&params), params, corpus(3), dir.path());
        assert!(matches!(result, Err(Error::Config(_))));
        assert!(submission.exists());
        assert!(dir.path().join("notes.txt").exists());
    }

    #[test]
    fn test_fatal_input_error_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let params = MRParameters::new(JobType::LineCount);
        let mut input = corpus(3);
        input.push(Err(std::io::Error::other("truncated input").into()));
        input.extend(corpus(3));
        let result = MRController::run(AnalysisJob::new(&params), params, input, dir.path());
        assert!(matches!(result, Err(Error::Io(_))));
    }
}
