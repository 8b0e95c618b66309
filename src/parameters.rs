//! Parameters for an analysis job.
//!
//! One job is one analysis (`JobType`) over one problem, or over every problem in
//! the input when no problem filter is set. The job type fixes the key and summary
//! schema for the whole run.

use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use clap::ValueEnum;
use serde::Deserialize;

use crate::error::{ConfigError, Error, ProtocolError};
use crate::patterns::{ConstructTag, ErrorTag, PatternConfig, PatternSet};
use crate::record_types::{CompositeKey, ErrorCombo, Summary};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum JobType {
    /// Line-count samples per (problem, language), for box plots.
    LineCount,
    /// Submissions containing each construct, per problem.
    ConstructFreq,
    /// Submissions importing each module, per problem.
    ImportPop,
    /// Submissions showing each suspicious-code pattern, per problem.
    ErrorFreq,
    /// Submissions showing each pattern and each pair of patterns, per problem.
    ErrorPairs,
}

impl JobType {
    pub const ALL: [JobType; 5] = [JobType::LineCount,
                                   JobType::ConstructFreq,
                                   JobType::ImportPop,
                                   JobType::ErrorFreq,
                                   JobType::ErrorPairs];

    pub fn name(self) -> &'static str {
        match self {
            JobType::LineCount => "line-count",
            JobType::ConstructFreq => "construct-freq",
            JobType::ImportPop => "import-pop",
            JobType::ErrorFreq => "error-freq",
            JobType::ErrorPairs => "error-pairs",
        }
    }

    /// The summary every fold starts from.
    pub fn identity(self) -> Summary {
        match self {
            JobType::LineCount => Summary::Samples(Vec::new()),
            _ => Summary::Count(0),
        }
    }

    /// Rebuilds a key of this job's schema from its two wire fields.
    pub fn parse_key(self, problem_id: &str, bucket: &str) -> Result<CompositeKey, ProtocolError> {
        if problem_id.is_empty() || bucket.is_empty() {
            return Err(self.shape_error(&format!("{}\t{}", problem_id, bucket)));
        }
        let problem_id = problem_id.to_string();
        Ok(match self {
            JobType::LineCount => {
                CompositeKey::Language {
                    problem_id,
                    language: bucket.to_string(),
                }
            }
            JobType::ConstructFreq => {
                CompositeKey::Construct {
                    problem_id,
                    construct: ConstructTag::from_str(bucket).map_err(|_| self.shape_error(bucket))?,
                }
            }
            JobType::ImportPop => {
                CompositeKey::Import {
                    problem_id,
                    import_name: bucket.to_string(),
                }
            }
            JobType::ErrorFreq => {
                CompositeKey::Error {
                    problem_id,
                    error: ErrorTag::from_str(bucket).map_err(|_| self.shape_error(bucket))?,
                }
            }
            JobType::ErrorPairs => {
                CompositeKey::ErrorCombo {
                    problem_id,
                    combo: ErrorCombo::from_str(bucket).map_err(|_| self.shape_error(bucket))?,
                }
            }
        })
    }

    /// Parses a wire value. Sample lists are re-sorted, so input from other producers
    /// need not be canonical.
    pub fn parse_summary(self, value: &str) -> Result<Summary, ProtocolError> {
        match self {
            JobType::LineCount => {
                if value.is_empty() {
                    return Ok(Summary::Samples(Vec::new()));
                }
                let mut samples = value.split(',')
                    .map(|s| s.trim().parse::<u64>())
                    .collect::<Result<Vec<u64>, _>>()
                    .map_err(|_| self.shape_error(value))?;
                samples.sort_unstable();
                Ok(Summary::Samples(samples))
            }
            _ => {
                value.trim()
                     .parse::<u64>()
                     .map(Summary::Count)
                     .map_err(|_| self.shape_error(value))
            }
        }
    }

    fn shape_error(self, value: &str) -> ProtocolError {
        ProtocolError::ValueShape {
            schema: self.name(),
            value: value.to_string(),
        }
    }
}

impl FromStr for JobType {
    type Err = ConfigError;
    fn from_str(s: &str) -> Result<JobType, ConfigError> {
        JobType::ALL
            .into_iter()
            .find(|j| j.name() == s)
            .ok_or_else(|| ConfigError::UnknownJobType(s.to_string()))
    }
}

/// Contents of a TOML job file. Every field is optional; command-line flags take
/// precedence.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobFile {
    pub job: Option<JobType>,
    pub problem_id: Option<String>,
    pub mappers: Option<usize>,
    pub reducers: Option<usize>,
    pub map_partition_size: Option<usize>,
    pub combine: Option<bool>,
    pub output_prefix: Option<String>,
    #[serde(default)]
    pub patterns: Vec<PatternConfig>,
}

impl JobFile {
    pub fn load(path: &Path) -> Result<JobFile, Error> {
        let text = fs::read_to_string(path)?;
        Ok(JobFile::parse(&text)?)
    }

    pub fn parse(text: &str) -> Result<JobFile, ConfigError> {
        Ok(toml::from_str(text)?)
    }
}

#[derive(Clone, Debug)]
pub struct MRParameters {
    pub job_type: JobType,
    /// Only submissions of this problem are mapped.
    pub problem_id: Option<String>,

    pub mappers: usize,
    pub reducers: usize,

    /// Number of submissions handed to one map task by the local controller.
    pub map_partition_size: usize,
    /// Whether map output is pre-aggregated per key before the shuffle.
    pub combine: bool,

    pub reduce_output_shard_prefix: String,
    /// Write Hadoop streaming counter lines for skipped submissions to stderr.
    pub report_counters: bool,

    pub patterns: Arc<PatternSet>,

    // Internal parameters
    pub shard_id: usize,
}

impl MRParameters {
    pub fn new(job_type: JobType) -> MRParameters {
        MRParameters {
            job_type,
            problem_id: None,
            mappers: 4,
            reducers: 4,
            map_partition_size: 1024,
            combine: true,
            reduce_output_shard_prefix: String::from("part-"),
            report_counters: false,
            patterns: PatternSet::builtin(),
            shard_id: 0,
        }
    }

    /// Builds parameters from a job file. `job` overrides the file's job type; one of
    /// them must be present.
    pub fn from_file(file: JobFile, job: Option<JobType>) -> Result<MRParameters, ConfigError> {
        let job_type = job.or(file.job)
                          .ok_or_else(|| ConfigError::Invalid("no job type configured".to_string()))?;
        let mut params = MRParameters::new(job_type);

        if let Some(p) = file.problem_id {
            params = params.set_problem(p);
        }
        let mappers = file.mappers.unwrap_or(params.mappers);
        let reducers = file.reducers.unwrap_or(params.reducers);
        params = params.set_concurrency(mappers, reducers);
        if let Some(n) = file.map_partition_size {
            params = params.set_partition_size(n);
        }
        if let Some(c) = file.combine {
            params = params.set_combine(c);
        }
        if let Some(prefix) = file.output_prefix {
            params = params.set_out_name(prefix);
        }
        if !file.patterns.is_empty() {
            params = params.set_patterns(Arc::new(PatternSet::with_extra(&file.patterns)?));
        }
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mappers == 0 || self.reducers == 0 {
            return Err(ConfigError::Invalid("mappers and reducers must be at least 1".to_string()));
        }
        if u32::try_from(self.mappers).is_err() || u32::try_from(self.reducers).is_err() {
            return Err(ConfigError::Invalid(format!("at most {} mappers and reducers", u32::MAX)));
        }
        if self.reduce_output_shard_prefix.is_empty()
            || self.reduce_output_shard_prefix.contains(['/', '\\']) {
            return Err(ConfigError::Invalid(format!("invalid output prefix `{}`",
                                                    self.reduce_output_shard_prefix)));
        }
        if self.map_partition_size == 0 {
            return Err(ConfigError::Invalid("map_partition_size must be at least 1".to_string()));
        }
        if let Some(p) = &self.problem_id {
            if p.is_empty() || p.contains(char::is_whitespace) {
                return Err(ConfigError::Invalid(format!("invalid problem id `{}`", p)));
            }
        }
        Ok(())
    }

    /// Restricts the job to one problem.
    pub fn set_problem(mut self, problem_id: String) -> MRParameters {
        self.problem_id = Some(problem_id);
        self
    }

    /// Determines how many map and reduce tasks run in parallel in the local
    /// controller. The number of reducers also determines how map output is sharded.
    ///
    /// Default 4/4
    pub fn set_concurrency(mut self, mappers: usize, reducers: usize) -> MRParameters {
        self.mappers = mappers;
        self.reducers = reducers;
        self
    }

    /// How many submissions one map task processes. All of a partition's
    /// submissions and its map output are in memory at once.
    ///
    /// Default 1024
    pub fn set_partition_size(mut self, size: usize) -> MRParameters {
        self.map_partition_size = size;
        self
    }

    /// Pre-aggregate map output per key (combiner). Default: true.
    pub fn set_combine(mut self, combine: bool) -> MRParameters {
        self.combine = combine;
        self
    }

    /// Prefix for output files produced by the reduce phase.
    /// Default: part- (the zero-padded id of the reduce shard is appended)
    pub fn set_out_name(mut self, prefix: String) -> MRParameters {
        self.reduce_output_shard_prefix = prefix;
        self
    }

    pub fn set_report_counters(mut self, report: bool) -> MRParameters {
        self.report_counters = report;
        self
    }

    pub fn set_patterns(mut self, patterns: Arc<PatternSet>) -> MRParameters {
        self.patterns = patterns;
        self
    }

    /// For internal use: Sets the ID of the executing shard (for file naming etc.)
    pub fn set_shard_id(mut self, n: usize) -> MRParameters {
        self.shard_id = n;
        self
    }
}
