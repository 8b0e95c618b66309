use std::env;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use clap::{Args, Parser, Subcommand};
use tracing::{debug, error, info, trace};

use corpusmr::assemble::{self, OutputFormat};
use corpusmr::controller::MRController;
use corpusmr::error::Result as MrResult;
use corpusmr::formats::lines::{new_from_dir, KVReader, LinesReader, LinesWriter};
use corpusmr::formats::submissions::{ids_from_path, raw_submission, CorpusWalker, SubmissionReader};
use corpusmr::map::map_stream;
use corpusmr::mapreducer::AnalysisJob;
use corpusmr::parameters::{JobFile, JobType, MRParameters};
use corpusmr::record_types::SubmissionRecord;
use corpusmr::reduce::reduce_stream;

/// Map/reduce analysis of student code submissions
#[derive(Parser)]
#[command(name = "corpusmr", version)]
#[command(about = "Line counts, construct and import statistics over code submission corpora", long_about = None)]
struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct JobArgs {
    /// Analysis to run; overrides the job file
    #[arg(short, long, value_enum)]
    job: Option<JobType>,

    /// TOML job file
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Only analyze submissions of this problem
    #[arg(long)]
    problem: Option<String>,
}

impl JobArgs {
    fn params(&self) -> anyhow::Result<MRParameters> {
        let file = match &self.config {
            Some(path) => {
                JobFile::load(path).with_context(|| format!("loading job file {}", path.display()))?
            }
            None => JobFile::default(),
        };
        let mut params = MRParameters::from_file(file, self.job)?;
        if let Some(p) = &self.problem {
            params = params.set_problem(p.clone());
        }
        params.validate()?;
        Ok(params)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Streaming mapper: submissions in, key/value lines out
    Map {
        #[command(flatten)]
        job: JobArgs,

        /// JSON-lines submission file (default: stdin)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Treat stdin as one raw submission file
        #[arg(long, conflicts_with = "input")]
        raw: bool,

        /// Problem id of the raw submission (default: from map_input_file)
        #[arg(long, requires = "raw")]
        as_problem: Option<String>,

        /// Language of the raw submission (default: from map_input_file)
        #[arg(long, requires = "raw")]
        as_language: Option<String>,

        /// Submission id of the raw submission (default: from map_input_file)
        #[arg(long, requires = "raw")]
        as_submission: Option<String>,

        /// Report skipped submissions as Hadoop streaming counters on stderr
        #[arg(long)]
        counters: bool,

        /// Emit one pair per submission instead of pre-aggregating
        #[arg(long)]
        no_combine: bool,

        /// Submissions per in-memory map partition
        #[arg(long)]
        partition_size: Option<usize>,
    },
    /// Partial aggregation of key-grouped lines; output is valid reducer input
    Combine {
        #[command(flatten)]
        job: JobArgs,

        /// Key/value file or directory of part files (default: stdin)
        #[arg(short, long)]
        input: Option<PathBuf>,
    },
    /// Streaming reducer: key-grouped lines in, aggregated records out
    Reduce {
        #[command(flatten)]
        job: JobArgs,

        /// Key/value file or directory of part files (default: stdin)
        #[arg(short, long)]
        input: Option<PathBuf>,
    },
    /// Run a whole job locally on a thread pool
    Run {
        #[command(flatten)]
        job: JobArgs,

        /// Corpus directory laid out as <problem>/<language>/<submission>
        #[arg(long, conflicts_with = "input", required_unless_present = "input")]
        corpus: Option<PathBuf>,

        /// JSON-lines submission file
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Directory receiving the part files
        #[arg(short, long)]
        output: PathBuf,

        #[arg(long)]
        mappers: Option<usize>,

        #[arg(long)]
        reducers: Option<usize>,

        /// Submissions per map partition
        #[arg(long)]
        partition_size: Option<usize>,

        /// Disable the combiner
        #[arg(long)]
        no_combine: bool,

        /// Report skipped submissions as Hadoop streaming counters on stderr
        #[arg(long)]
        counters: bool,
    },
    /// Turn aggregated records into chart tables
    Assemble {
        /// Job that produced the records
        #[arg(short, long, value_enum)]
        job: JobType,

        /// Record file or directory of part files (default: stdin)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Line-count output of the same corpus, used to compute percentages
        #[arg(long)]
        totals: Option<PathBuf>,

        /// Keep only the N most frequent entries per problem
        #[arg(long)]
        top: Option<usize>,

        #[arg(short, long, value_enum, default_value = "tsv")]
        format: OutputFormat,
    },
}

fn main() {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    // stdout carries data; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .with_writer(io::stderr)
        .with_target(cli.verbose >= 2)
        .with_thread_ids(cli.verbose >= 2)
        .with_line_number(cli.verbose >= 2)
        .init();

    debug!("corpusmr started with verbosity level: {}", cli.verbose);
    trace!("Full CLI args: {:?}", env::args().collect::<Vec<_>>());

    let result = match cli.command {
        Commands::Map {
            job,
            input,
            raw,
            as_problem,
            as_language,
            as_submission,
            counters,
            no_combine,
            partition_size,
        } => {
            let raw_ids = RawIds {
                problem: as_problem,
                language: as_language,
                submission: as_submission,
            };
            run_map(&job, input, raw.then_some(raw_ids), counters, no_combine, partition_size)
        }
        Commands::Combine { job, input } => run_reduce(&job, input, true),
        Commands::Reduce { job, input } => run_reduce(&job, input, false),
        Commands::Run {
            job,
            corpus,
            input,
            output,
            mappers,
            reducers,
            partition_size,
            no_combine,
            counters,
        } => {
            let knobs = RunKnobs {
                mappers,
                reducers,
                partition_size,
                no_combine,
                counters,
            };
            run_local(&job, corpus, input, &output, knobs)
        }
        Commands::Assemble {
            job,
            input,
            totals,
            top,
            format,
        } => run_assemble(job, input, totals, top, format),
    };

    if let Err(e) = result {
        error!("Fatal error: {:#}", e);
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

/// Ids of a raw submission given on the command line.
struct RawIds {
    problem: Option<String>,
    language: Option<String>,
    submission: Option<String>,
}

impl RawIds {
    /// Fills missing ids from the input path Hadoop streaming exports to mappers.
    fn resolve(self) -> anyhow::Result<(String, String, String)> {
        let from_env = ["mapreduce_map_input_file", "map_input_file"]
            .iter()
            .find_map(|var| env::var(var).ok())
            .and_then(|path| ids_from_path(Path::new(&path)));
        let (env_problem, env_language, env_submission) = match from_env {
            Some((p, l, s)) => (Some(p), Some(l), Some(s)),
            None => (None, None, None),
        };
        let missing = |what: &str| {
            anyhow!("no {} for the raw submission: pass --as-{} or set map_input_file", what, what)
        };
        Ok((self.problem.or(env_problem).ok_or_else(|| missing("problem"))?,
            self.language.or(env_language).ok_or_else(|| missing("language"))?,
            self.submission.or(env_submission).ok_or_else(|| missing("submission"))?))
    }
}

/// Opens a line source: a file, all part files of a directory, or stdin.
fn open_lines(input: Option<&Path>, prefix: &str) -> io::Result<LinesReader<Box<dyn Read>>> {
    match input {
        Some(path) if path.is_dir() => new_from_dir(path, prefix),
        Some(path) => new_from_dir(path, ""),
        None => {
            let stdin: Box<dyn Read> = Box::new(io::stdin());
            Ok(LinesReader::new(stdin))
        }
    }
}

fn submissions(input: Option<&Path>) -> anyhow::Result<Box<dyn Iterator<Item = MrResult<SubmissionRecord>>>> {
    let lines = open_lines(input, "")?;
    let base = input.and_then(Path::parent).unwrap_or(Path::new("")).to_path_buf();
    Ok(Box::new(SubmissionReader::new(lines).with_base(&base)))
}

fn run_map(job: &JobArgs,
           input: Option<PathBuf>,
           raw: Option<RawIds>,
           counters: bool,
           no_combine: bool,
           partition_size: Option<usize>)
           -> anyhow::Result<()> {
    let mut params = job.params()?.set_report_counters(counters);
    if no_combine {
        params = params.set_combine(false);
    }
    if let Some(n) = partition_size {
        params = params.set_partition_size(n);
    }
    params.validate()?;
    let mr = AnalysisJob::new(&params);

    let records: Box<dyn Iterator<Item = MrResult<SubmissionRecord>>> = match raw {
        Some(ids) => {
            let (problem, language, submission) = ids.resolve()?;
            let record = raw_submission(&problem, &language, &submission, io::stdin().lock())?;
            Box::new(std::iter::once(Ok(record)))
        }
        None => submissions(input.as_deref())?,
    };

    let mut out = LinesWriter::new_to_write(io::stdout().lock());
    let stats = map_stream(&mr, &params, records, &mut out)?;
    info!(job = params.job_type.name(), submissions = stats.submissions, mapped = stats.mapped,
          skipped = stats.skipped, filtered = stats.filtered, pairs = stats.pairs, "map task finished");
    Ok(())
}

fn run_reduce(job: &JobArgs, input: Option<PathBuf>, combine: bool) -> anyhow::Result<()> {
    let params = job.params()?;
    let mr = AnalysisJob::new(&params);
    let lines = open_lines(input.as_deref(), &params.reduce_output_shard_prefix)?;

    let mut out = LinesWriter::new_to_write(io::stdout().lock());
    let records = reduce_stream(&mr, KVReader::new(params.job_type, lines), combine, &mut out)?;
    info!(job = params.job_type.name(), records, combine, "reduce task finished");
    Ok(())
}

struct RunKnobs {
    mappers: Option<usize>,
    reducers: Option<usize>,
    partition_size: Option<usize>,
    no_combine: bool,
    counters: bool,
}

fn run_local(job: &JobArgs,
             corpus: Option<PathBuf>,
             input: Option<PathBuf>,
             output: &Path,
             knobs: RunKnobs)
             -> anyhow::Result<()> {
    let mut params = job.params()?.set_report_counters(knobs.counters);
    let mappers = knobs.mappers.unwrap_or(params.mappers);
    let reducers = knobs.reducers.unwrap_or(params.reducers);
    params = params.set_concurrency(mappers, reducers);
    if let Some(n) = knobs.partition_size {
        params = params.set_partition_size(n);
    }
    if knobs.no_combine {
        params = params.set_combine(false);
    }
    let mr = AnalysisJob::new(&params);

    let records: Box<dyn Iterator<Item = MrResult<SubmissionRecord>>> = match corpus {
        Some(root) => {
            if !root.is_dir() {
                return Err(anyhow!("corpus directory {} does not exist", root.display()));
            }
            Box::new(CorpusWalker::new(&root))
        }
        None => submissions(input.as_deref())?,
    };

    let report = MRController::run(mr, params, records, output)?;
    for path in &report.outputs {
        println!("{}", path.display());
    }
    Ok(())
}

fn run_assemble(job: JobType,
                input: Option<PathBuf>,
                totals: Option<PathBuf>,
                top: Option<usize>,
                format: OutputFormat)
                -> anyhow::Result<()> {
    let prefix = MRParameters::new(job).reduce_output_shard_prefix;
    let records = assemble::read_records(job, open_lines(input.as_deref(), &prefix)?)?;
    let totals = match totals {
        Some(path) => {
            let line_counts = assemble::read_records(JobType::LineCount,
                                                     open_lines(Some(path.as_path()), &prefix)?)
                .with_context(|| format!("reading line-count totals from {}", path.display()))?;
            Some(assemble::problem_totals(&line_counts))
        }
        None => None,
    };

    let table = assemble::assemble(job, records, totals.as_ref(), top)?;
    debug!(rows = table.len(), "assembled table");
    table.write(format, io::stdout().lock())?;
    Ok(())
}
