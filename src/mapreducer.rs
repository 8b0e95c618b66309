//! The Mapper/Reducer/Sharder traits and the analysis job implementing them.

use std::collections::hash_map::DefaultHasher;
use std::hash::Hasher;
use std::sync::Arc;

use tracing::trace;

use crate::aggregate;
use crate::error::{ExtractionError, ProtocolError};
use crate::features;
use crate::parameters::{JobType, MRParameters};
use crate::patterns::PatternSet;
use crate::record_types::{AggregatedRecord, CompositeKey, ErrorCombo, FeatureRecord, MEmitter,
                          SubmissionRecord, Summary};

/// Default sharding function: hash of the key's wire form, modulo n.
pub fn _std_shard(n: usize, key: &CompositeKey) -> usize {
    let mut h = DefaultHasher::new();
    h.write(key.to_string().as_bytes());
    (h.finish() % n as u64) as usize
}

pub trait Mapper: Send + Sync + Clone {
    /// Takes one submission and an emitter used to yield (key,value) pairs.
    ///
    /// Must be a pure function of the record: the engine may run it more than once.
    fn map(&self, em: &mut MEmitter, record: &SubmissionRecord) -> Result<(), ExtractionError>;

    /// Whether the record is input to this job at all. Rejected records are neither
    /// mapped nor counted as skipped.
    fn selects(&self, _record: &SubmissionRecord) -> bool {
        true
    }
}

pub trait Reducer: Send + Sync + Clone {
    /// Folds all values of one key into its aggregated record. Values arrive in no
    /// particular order.
    fn reduce<I>(&self, key: CompositeKey, values: I) -> Result<AggregatedRecord, ProtocolError>
        where I: IntoIterator<Item = Summary>;

    /// Partial aggregation of some of a key's values. Must agree with `reduce`, so the
    /// default is to reuse it.
    fn combine<I>(&self, key: CompositeKey, values: I) -> Result<AggregatedRecord, ProtocolError>
        where I: IntoIterator<Item = Summary>
    {
        self.reduce(key, values)
    }
}

pub trait Sharder {
    /// Determines how to map keys to (reduce) shards.
    /// Returns a number in [0; n) determining the shard the key belongs in.
    /// The default implementation uses a simple hash and modulo.
    fn shard(&self, n: usize, key: &CompositeKey) -> usize {
        _std_shard(n, key)
    }
}

/// One analysis over the corpus; mapper, combiner and reducer at once.
#[derive(Clone, Debug)]
pub struct AnalysisJob {
    job_type: JobType,
    problem_id: Option<String>,
    patterns: Arc<PatternSet>,
}

impl AnalysisJob {
    pub fn new(params: &MRParameters) -> AnalysisJob {
        AnalysisJob {
            job_type: params.job_type,
            problem_id: params.problem_id.clone(),
            patterns: params.patterns.clone(),
        }
    }

    pub fn job_type(&self) -> JobType {
        self.job_type
    }

    fn emit_features(&self, em: &mut MEmitter, f: FeatureRecord) {
        let problem_id = f.problem_id;
        match self.job_type {
            JobType::LineCount => {
                em.emit(CompositeKey::Language {
                            problem_id,
                            language: f.language,
                        },
                        Summary::sample(f.line_count));
            }
            JobType::ConstructFreq => {
                for construct in f.constructs {
                    em.emit(CompositeKey::Construct {
                                problem_id: problem_id.clone(),
                                construct,
                            },
                            Summary::Count(1));
                }
            }
            JobType::ImportPop => {
                for import_name in f.imports {
                    em.emit(CompositeKey::Import {
                                problem_id: problem_id.clone(),
                                import_name,
                            },
                            Summary::Count(1));
                }
            }
            JobType::ErrorFreq => {
                for error in f.errors {
                    em.emit(CompositeKey::Error {
                                problem_id: problem_id.clone(),
                                error,
                            },
                            Summary::Count(1));
                }
            }
            JobType::ErrorPairs => {
                for combo in ErrorCombo::all_of(&f.errors) {
                    em.emit(CompositeKey::ErrorCombo {
                                problem_id: problem_id.clone(),
                                combo,
                            },
                            Summary::Count(1));
                }
            }
        }
    }
}

impl Mapper for AnalysisJob {
    fn map(&self, em: &mut MEmitter, record: &SubmissionRecord) -> Result<(), ExtractionError> {
        if !self.selects(record) {
            return Ok(());
        }
        let f = features::extract(record, &self.patterns)?;
        trace!(submission = %record.submission_id, lines = f.line_count,
               constructs = f.constructs.len(), imports = f.imports.len(), "extracted features");
        self.emit_features(em, f);
        Ok(())
    }

    /// Only submissions of the configured problem, if any.
    fn selects(&self, record: &SubmissionRecord) -> bool {
        match &self.problem_id {
            None => true,
            Some(p) => *p == record.problem_id,
        }
    }
}

impl Reducer for AnalysisJob {
    fn reduce<I>(&self, key: CompositeKey, values: I) -> Result<AggregatedRecord, ProtocolError>
        where I: IntoIterator<Item = Summary>
    {
        let mut values = values.into_iter().peekable();
        if values.peek().is_none() {
            return Err(ProtocolError::EmptyGroup(key.to_string()));
        }
        let summary = aggregate::fold(self.job_type.identity(), values)?;
        Ok(AggregatedRecord { key, summary })
    }
}

impl Sharder for AnalysisJob {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patterns::ConstructTag;

    fn job(job_type: JobType) -> AnalysisJob {
        AnalysisJob::new(&MRParameters::new(job_type))
    }

    fn map_one(job: &AnalysisJob, rec: &SubmissionRecord) -> Vec<String> {
        let mut em = MEmitter::new();
        job.map(&mut em, rec).unwrap();
        em.into_pairs().iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn test_line_count_emits_exactly_one_pair() {
        let rec = SubmissionRecord::new("p00018", "python", "s1", "a = 1\n\nprint(a)\n");
        assert_eq!(map_one(&job(JobType::LineCount), &rec), vec!["p00018\tpython\t2"]);

        let empty = SubmissionRecord::new("p00018", "python", "s2", "");
        assert_eq!(map_one(&job(JobType::LineCount), &empty), vec!["p00018\tpython\t0"]);
    }

    #[test]
    fn test_construct_presence() {
        let src = "for a in b:\n    pass\nfor c in d:\n    if c:\n        pass\n";
        let rec = SubmissionRecord::new("p00003", "python", "s1", src);
        assert_eq!(map_one(&job(JobType::ConstructFreq), &rec),
                   vec!["p00003\tloop\t1", "p00003\tconditional\t1"]);
    }

    #[test]
    fn test_no_categories_emits_nothing() {
        let rec = SubmissionRecord::new("p00003", "python", "s1", "print(1)\n");
        assert!(map_one(&job(JobType::ConstructFreq), &rec).is_empty());
        assert!(map_one(&job(JobType::ImportPop), &rec).is_empty());
    }

    #[test]
    fn test_imports_and_errors() {
        let rec = SubmissionRecord::new("p00003", "python", "s1",
                                        "import sys\nimport math, sys\ntry:\n    x = 1\nexcept:\n    pass\n");
        assert_eq!(map_one(&job(JobType::ImportPop), &rec),
                   vec!["p00003\tmath\t1", "p00003\tsys\t1"]);
        assert_eq!(map_one(&job(JobType::ErrorFreq), &rec),
                   vec!["p00003\tbare-except\t1", "p00003\tempty-except\t1",
                        "p00003\tuseless-pass\t1"]);
    }

    #[test]
    fn test_error_pairs() {
        let rec = SubmissionRecord::new("p2", "python", "s1", "try:\n    print(1 / 0)\nexcept ValueError:\n    raise\n");
        assert_eq!(map_one(&job(JobType::ErrorPairs), &rec),
                   vec!["p2\tprint-debug\t1", "p2\tdivision-by-zero\t1",
                        "p2\tprint-debug+division-by-zero\t1"]);

        let clean = SubmissionRecord::new("p2", "python", "s2", "x = 1\n");
        assert!(map_one(&job(JobType::ErrorPairs), &clean).is_empty());
    }

    #[test]
    fn test_problem_filter() {
        let params = MRParameters::new(JobType::LineCount).set_problem("p00018".to_string());
        let j = AnalysisJob::new(&params);
        let other = SubmissionRecord::new("p00019", "python", "s1", "x\n");
        assert!(map_one(&j, &other).is_empty());
    }

    #[test]
    fn test_map_is_deterministic() {
        let rec = SubmissionRecord::new("p1", "C++", "s1",
                                        "#include <vector>\n#include <cstdio>\nint f(int n) { return n ? f(n - 1) : 0; }\n");
        for job_type in JobType::ALL {
            let j = job(job_type);
            assert_eq!(map_one(&j, &rec), map_one(&j, &rec));
        }
    }

    #[test]
    fn test_reduce() {
        let j = job(JobType::ConstructFreq);
        let key = CompositeKey::Construct {
            problem_id: "p1".to_string(),
            construct: ConstructTag::Loop,
        };
        let rec = j.reduce(key.clone(), vec![Summary::Count(1); 6]).unwrap();
        assert_eq!(rec.summary, Summary::Count(6));

        assert_eq!(j.reduce(key.clone(), Vec::new()),
                   Err(ProtocolError::EmptyGroup("p1\tloop".to_string())));
        assert!(j.reduce(key, vec![Summary::Count(1), Summary::sample(3)]).is_err());
    }

    #[test]
    fn test_shard_in_range_and_stable() {
        let j = job(JobType::ImportPop);
        for name in ["sys", "math", "heapq", "collections", "itertools"] {
            let key = CompositeKey::Import {
                problem_id: "p1".to_string(),
                import_name: name.to_string(),
            };
            let s = j.shard(3, &key);
            assert!(s < 3);
            assert_eq!(s, j.shard(3, &key));
        }
    }
}
