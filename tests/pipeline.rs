use std::fs;
use std::path::Path;

use corpusmr::controller::{JobReport, MRController};
use corpusmr::error::Result;
use corpusmr::formats::lines::{KVReader, LinesReader, LinesWriter};
use corpusmr::formats::submissions::CorpusWalker;
use corpusmr::map::map_stream;
use corpusmr::mapreducer::AnalysisJob;
use corpusmr::parameters::{JobType, MRParameters};
use corpusmr::record_types::SubmissionRecord;
use corpusmr::reduce::reduce_stream;

fn source_with_lines(n: usize) -> String {
    (0..n).map(|i| format!("x{} = {}\n", i, i)).collect()
}

fn run_job(params: MRParameters, input: Vec<Result<SubmissionRecord>>, out: &Path) -> JobReport {
    MRController::run(AnalysisJob::new(&params), params, input, out).unwrap()
}

/// All output lines of a run, in shard order.
fn output(report: &JobReport) -> Vec<String> {
    report.outputs
          .iter()
          .flat_map(|p| {
              fs::read_to_string(p).unwrap().lines().map(String::from).collect::<Vec<_>>()
          })
          .collect()
}

fn sorted(mut lines: Vec<String>) -> Vec<String> {
    lines.sort();
    lines
}

#[test]
fn line_count_samples_per_language() {
    let dir = tempfile::tempdir().unwrap();
    let input = [5, 5, 12, 0]
        .iter()
        .enumerate()
        .map(|(i, &n)| Ok(SubmissionRecord::new("p00018", "python", &format!("s{}", i), source_with_lines(n))))
        .collect();
    let report = run_job(MRParameters::new(JobType::LineCount).set_concurrency(2, 2),
                         input,
                         dir.path());
    assert_eq!(output(&report), vec!["p00018\tpython\t0,5,5,12"]);
}

#[test]
fn import_popularity_counts_submissions() {
    let dir = tempfile::tempdir().unwrap();
    let input = vec![Ok(SubmissionRecord::new("p00003", "python", "s1", "import sys\nprint(sys.argv)\n")),
                     Ok(SubmissionRecord::new("p00003", "python", "s2",
                                              "import sys\nimport math\nimport sys\n"))];
    let report = run_job(MRParameters::new(JobType::ImportPop), input, dir.path());
    assert_eq!(sorted(output(&report)), vec!["p00003\tmath\t1", "p00003\tsys\t2"]);
}

#[test]
fn construct_frequency_counts_presence() {
    let dir = tempfile::tempdir().unwrap();
    let input = (0..10)
        .map(|i| {
            let src = if i < 6 {
                "for a in range(3):\n    for b in range(a):\n        if a > b:\n            print(a)\n"
            } else {
                "print(42)\n"
            };
            Ok(SubmissionRecord::new("p00007", "python", &format!("s{}", i), src))
        })
        .collect();
    let report = run_job(MRParameters::new(JobType::ConstructFreq).set_partition_size(3),
                         input,
                         dir.path());
    assert_eq!(sorted(output(&report)), vec!["p00007\tconditional\t6", "p00007\tloop\t6"]);
}

#[test]
fn undecodable_submissions_are_skipped_and_counted() {
    let dir = tempfile::tempdir().unwrap();
    let mut input: Vec<Result<SubmissionRecord>> = (0..7)
        .map(|i| Ok(SubmissionRecord::new("p1", "c", &format!("ok{}", i), "int main() {}\n")))
        .collect();
    for i in 0..3 {
        input.push(Ok(SubmissionRecord::new("p1", "c", &format!("bad{}", i), vec![b'i', 0xc3, 0x28])));
    }
    let report = run_job(MRParameters::new(JobType::LineCount).set_partition_size(4),
                         input,
                         dir.path());
    assert_eq!(report.map.submissions, 10);
    assert_eq!(report.map.skipped, 3);
    assert_eq!(report.map.mapped, 7);
    assert_eq!(output(&report), vec!["p1\tc\t1,1,1,1,1,1,1"]);
}

fn mixed_corpus() -> Vec<Result<SubmissionRecord>> {
    let sources = [("python", "import heapq\ndef f(n):\n    return f(n - 1) if n else 0\n"),
                   ("C++", "#include <vector>\nint main() {\n  for (;;) {}\n}\n"),
                   ("Java", "import java.util.Scanner;\nclass Main {\n  void run() { if (true) {} }\n}\n"),
                   ("JavaScript", "const fs = require('fs');\nconst g = () => 1;\n")];
    (0..40)
        .map(|i| {
            let (language, src) = sources[i % sources.len()];
            let problem = format!("p{:05}", i % 3);
            Ok(SubmissionRecord::new(&problem, language, &format!("s{}", i), src))
        })
        .collect()
}

#[test]
fn rerun_is_byte_identical_and_combiner_transparent() {
    for job in JobType::ALL {
        let dir = tempfile::tempdir().unwrap();
        let params = MRParameters::new(job).set_concurrency(3, 2).set_partition_size(6);

        let first = run_job(params.clone(), mixed_corpus(), dir.path());
        let first_bytes: Vec<Vec<u8>> = first.outputs.iter().map(|p| fs::read(p).unwrap()).collect();
        let second = run_job(params.clone(), mixed_corpus(), dir.path());
        let second_bytes: Vec<Vec<u8>> = second.outputs.iter().map(|p| fs::read(p).unwrap()).collect();
        assert_eq!(first_bytes, second_bytes, "{:?}", job);

        let uncombined = run_job(params.set_combine(false), mixed_corpus(), dir.path());
        assert_eq!(output(&first), output(&uncombined), "{:?}", job);
    }
}

#[test]
fn streaming_tasks_match_local_run() {
    let dir = tempfile::tempdir().unwrap();
    let params = MRParameters::new(JobType::ImportPop).set_partition_size(5);
    let mr = AnalysisJob::new(&params);

    // map, then sort as the engine's shuffle would, then reduce.
    let mut mapped = Vec::new();
    {
        let mut out = LinesWriter::new_to_write(&mut mapped);
        map_stream(&mr, &params, mixed_corpus(), &mut out).unwrap();
    }
    let mut lines: Vec<&str> = std::str::from_utf8(&mapped).unwrap().lines().collect();
    lines.sort();
    let shuffled = lines.join("\n");

    let mut reduced = Vec::new();
    {
        let mut out = LinesWriter::new_to_write(&mut reduced);
        let input = KVReader::new(JobType::ImportPop, LinesReader::new(shuffled.as_bytes()));
        reduce_stream(&mr, input, false, &mut out).unwrap();
    }
    let streamed: Vec<String> = String::from_utf8(reduced).unwrap().lines().map(String::from).collect();

    let local = run_job(params.set_concurrency(2, 1), mixed_corpus(), dir.path());
    assert_eq!(streamed, output(&local));
}

#[test]
fn corpus_directory_end_to_end() {
    let corpus = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    for (problem, language, name, src) in [("p00001", "python", "a.py", "import sys\n"),
                                           ("p00001", "python", "b.py", "import os, sys\n"),
                                           ("p00002", "c", "c.c", "#include <stdio.h>\n")] {
        let dir = corpus.path().join(problem).join(language);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(name), src).unwrap();
    }

    let params = MRParameters::new(JobType::ImportPop);
    let mr = AnalysisJob::new(&params);
    let report = MRController::run(mr, params, CorpusWalker::new(corpus.path()), out.path()).unwrap();
    assert_eq!(report.map.mapped, 3);
    assert_eq!(sorted(output(&report)),
               vec!["p00001\tos\t1", "p00001\tsys\t2", "p00002\tstdio.h\t1"]);
}
