//! Turns reducer output into the tables a charting tool consumes: box-plot statistics
//! for line counts, ranked frequency tables (optionally as percentages of a problem's
//! submissions) for the count jobs, and Jaccard similarities for error pairs.

use std::collections::{BTreeMap, HashMap};
use std::io::{Read, Write};

use clap::ValueEnum;
use serde::Serialize;

use crate::aggregate;
use crate::error::{ProtocolError, Result};
use crate::formats::lines::{KVReader, LinesReader};
use crate::parameters::JobType;
use crate::record_types::{AggregatedRecord, CompositeKey, ErrorCombo, Summary};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Tsv,
    Json,
}

/// Five-number summary of one (problem, language) line-count distribution. Whiskers
/// end at the most extreme samples within 1.5 IQR of the quartiles; samples beyond
/// them are outliers.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BoxStats {
    pub problem_id: String,
    pub language: String,
    pub n: usize,
    pub min: u64,
    pub q1: f64,
    pub median: f64,
    pub q3: f64,
    pub max: u64,
    pub mean: f64,
    pub lower_whisker: u64,
    pub upper_whisker: u64,
    pub outliers: Vec<u64>,
    /// Mean and median of the samples between the whiskers.
    pub trimmed_mean: f64,
    pub trimmed_median: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FrequencyRow {
    pub problem_id: String,
    pub name: String,
    pub count: u64,
    /// Submissions of the problem, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percent: Option<f64>,
}

/// How often two error tags show up in the same submission of a problem.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CooccurrenceRow {
    pub problem_id: String,
    pub first: String,
    pub second: String,
    /// Submissions showing both.
    pub both: u64,
    /// Submissions showing both over submissions showing either.
    pub jaccard: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Table {
    BoxPlots(Vec<BoxStats>),
    Frequencies(Vec<FrequencyRow>),
    Cooccurrences(Vec<CooccurrenceRow>),
}

/// Reads aggregated records of one job. Records of the same key (for instance from
/// concatenated runs) are merged.
pub fn read_records<Src: Read>(job: JobType, lines: LinesReader<Src>) -> Result<Vec<AggregatedRecord>> {
    let mut merged: BTreeMap<CompositeKey, Summary> = BTreeMap::new();
    for pair in KVReader::new(job, lines) {
        let pair = pair?;
        let summary = match merged.remove(&pair.key) {
            None => pair.value,
            Some(prev) => aggregate::merge(prev, pair.value)?,
        };
        merged.insert(pair.key, summary);
    }
    Ok(merged.into_iter()
             .map(|(key, summary)| AggregatedRecord { key, summary })
             .collect())
}

/// Submissions per problem, taken from line-count output: every submission
/// contributes exactly one sample.
pub fn problem_totals(line_counts: &[AggregatedRecord]) -> HashMap<String, u64> {
    let mut totals = HashMap::new();
    for rec in line_counts {
        if let Summary::Samples(samples) = &rec.summary {
            *totals.entry(rec.key.problem_id().to_string()).or_insert(0) += samples.len() as u64;
        }
    }
    totals
}

/// Percentile with linear interpolation between closest ranks. `sorted` must be
/// sorted and non-empty.
fn percentile(sorted: &[u64], p: f64) -> f64 {
    let rank = p / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    sorted[lo] as f64 + (sorted[hi] as f64 - sorted[lo] as f64) * frac
}

fn mean(sorted: &[u64]) -> f64 {
    sorted.iter().map(|&s| s as f64).sum::<f64>() / sorted.len() as f64
}

/// Box-plot statistics of one sample multiset; `None` for an empty one.
pub fn box_stats(problem_id: &str, language: &str, samples: &[u64]) -> Option<BoxStats> {
    let mut sorted = samples.to_vec();
    sorted.sort_unstable();
    let (&min, &max) = (sorted.first()?, sorted.last()?);

    let q1 = percentile(&sorted, 25.0);
    let q3 = percentile(&sorted, 75.0);
    let iqr = q3 - q1;
    let (lower, upper) = (q1 - 1.5 * iqr, q3 + 1.5 * iqr);
    let inside = |s: &&u64| (**s as f64) >= lower && (**s as f64) <= upper;
    // The quartiles lie within [min, max], so some sample is always inside.
    let trimmed: Vec<u64> = sorted.iter().filter(inside).copied().collect();

    Some(BoxStats {
        problem_id: problem_id.to_string(),
        language: language.to_string(),
        n: sorted.len(),
        min,
        q1,
        median: percentile(&sorted, 50.0),
        q3,
        max,
        mean: mean(&sorted),
        lower_whisker: trimmed.first().copied().unwrap_or(min),
        upper_whisker: trimmed.last().copied().unwrap_or(max),
        outliers: sorted.iter().filter(|s| !inside(s)).copied().collect(),
        trimmed_mean: if trimmed.is_empty() { mean(&sorted) } else { mean(&trimmed) },
        trimmed_median: if trimmed.is_empty() {
            percentile(&sorted, 50.0)
        } else {
            percentile(&trimmed, 50.0)
        },
    })
}

/// Jaccard similarity of every error pair, from `error-pairs` output. Rows are ranked
/// per problem by similarity, then by co-occurrence count, then by name.
fn cooccurrences(job: JobType, records: Vec<AggregatedRecord>, top: Option<usize>) -> Result<Table> {
    let mut singles: HashMap<(String, String), u64> = HashMap::new();
    let mut pairs = Vec::new();
    for rec in records {
        let count = match rec.summary {
            Summary::Count(n) => n,
            other => return Err(shape_error(job, &other)),
        };
        match rec.key {
            CompositeKey::ErrorCombo { problem_id, combo: ErrorCombo::Single(tag) } => {
                singles.insert((problem_id, tag.to_string()), count);
            }
            CompositeKey::ErrorCombo { problem_id, combo: ErrorCombo::Pair(a, b) } => {
                pairs.push((problem_id, a.to_string(), b.to_string(), count));
            }
            other => {
                return Err(ProtocolError::ValueShape {
                               schema: job.name(),
                               value: other.to_string(),
                           }
                           .into())
            }
        }
    }

    let mut by_problem: BTreeMap<String, Vec<CooccurrenceRow>> = BTreeMap::new();
    for (problem_id, first, second, both) in pairs {
        let alone = |tag: &String| {
            singles.get(&(problem_id.clone(), tag.clone())).copied().unwrap_or(0).max(both)
        };
        let either = alone(&first).saturating_add(alone(&second)) - both;
        let row = CooccurrenceRow {
            problem_id: problem_id.clone(),
            jaccard: if either > 0 { both as f64 / either as f64 } else { 0.0 },
            first,
            second,
            both,
        };
        by_problem.entry(problem_id).or_default().push(row);
    }

    let mut rows = Vec::new();
    for (_, mut group) in by_problem {
        group.sort_by(|a, b| {
            b.jaccard
             .total_cmp(&a.jaccard)
             .then_with(|| b.both.cmp(&a.both))
             .then_with(|| (&a.first, &a.second).cmp(&(&b.first, &b.second)))
        });
        group.truncate(top.unwrap_or(usize::MAX));
        rows.extend(group);
    }
    Ok(Table::Cooccurrences(rows))
}

/// Builds the table for a job's aggregated records. Frequency rows are ranked per
/// problem by count, ties broken by name, and cut to `top` rows per problem.
pub fn assemble(job: JobType,
                records: Vec<AggregatedRecord>,
                totals: Option<&HashMap<String, u64>>,
                top: Option<usize>)
                -> Result<Table> {
    if job == JobType::LineCount {
        let mut rows = Vec::new();
        for rec in records {
            match rec.summary {
                Summary::Samples(samples) => {
                    rows.extend(box_stats(rec.key.problem_id(), &rec.key.bucket(), &samples));
                }
                other => return Err(shape_error(job, &other)),
            }
        }
        return Ok(Table::BoxPlots(rows));
    }
    if job == JobType::ErrorPairs {
        return cooccurrences(job, records, top);
    }

    let mut by_problem: BTreeMap<String, Vec<FrequencyRow>> = BTreeMap::new();
    for rec in records {
        let count = match rec.summary {
            Summary::Count(n) => n,
            other => return Err(shape_error(job, &other)),
        };
        let problem_id = rec.key.problem_id().to_string();
        let total = totals.and_then(|t| t.get(&problem_id).copied());
        let row = FrequencyRow {
            name: rec.key.bucket().to_string(),
            count,
            total,
            percent: total.filter(|&t| t > 0).map(|t| count as f64 / t as f64 * 100.0),
            problem_id: problem_id.clone(),
        };
        by_problem.entry(problem_id).or_default().push(row);
    }

    let mut rows = Vec::new();
    for (_, mut group) in by_problem {
        group.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
        group.truncate(top.unwrap_or(usize::MAX));
        rows.extend(group);
    }
    Ok(Table::Frequencies(rows))
}

fn shape_error(job: JobType, summary: &Summary) -> crate::error::Error {
    ProtocolError::ValueShape {
        schema: job.name(),
        value: summary.to_string(),
    }
    .into()
}

fn opt(v: Option<impl ToString>) -> String {
    v.map(|v| v.to_string()).unwrap_or_default()
}

impl Table {
    pub fn len(&self) -> usize {
        match self {
            Table::BoxPlots(rows) => rows.len(),
            Table::Frequencies(rows) => rows.len(),
            Table::Cooccurrences(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn write<W: Write>(&self, format: OutputFormat, mut out: W) -> Result<()> {
        match format {
            OutputFormat::Json => {
                serde_json::to_writer_pretty(&mut out, self)?;
                writeln!(out)?;
            }
            OutputFormat::Tsv => self.write_tsv(&mut out)?,
        }
        out.flush()?;
        Ok(())
    }

    fn write_tsv<W: Write>(&self, out: &mut W) -> Result<()> {
        match self {
            Table::BoxPlots(rows) => {
                writeln!(out,
                         "problem_id\tlanguage\tn\tmin\tq1\tmedian\tq3\tmax\tmean\tlower_whisker\tupper_whisker\toutliers\ttrimmed_mean\ttrimmed_median")?;
                for r in rows {
                    let outliers: Vec<String> = r.outliers.iter().map(u64::to_string).collect();
                    writeln!(out,
                             "{}\t{}\t{}\t{}\t{:.2}\t{:.2}\t{:.2}\t{}\t{:.2}\t{}\t{}\t{}\t{:.2}\t{:.2}",
                             r.problem_id,
                             r.language,
                             r.n,
                             r.min,
                             r.q1,
                             r.median,
                             r.q3,
                             r.max,
                             r.mean,
                             r.lower_whisker,
                             r.upper_whisker,
                             outliers.join(","),
                             r.trimmed_mean,
                             r.trimmed_median)?;
                }
            }
            Table::Cooccurrences(rows) => {
                writeln!(out, "problem_id\tfirst\tsecond\tboth\tjaccard")?;
                for r in rows {
                    writeln!(out,
                             "{}\t{}\t{}\t{}\t{:.3}",
                             r.problem_id,
                             r.first,
                             r.second,
                             r.both,
                             r.jaccard)?;
                }
            }
            Table::Frequencies(rows) => {
                writeln!(out, "problem_id\tname\tcount\ttotal\tpercent")?;
                for r in rows {
                    writeln!(out,
                             "{}\t{}\t{}\t{}\t{}",
                             r.problem_id,
                             r.name,
                             r.count,
                             opt(r.total),
                             opt(r.percent.map(|p| format!("{:.2}", p))))?;
                }
            }
        }
        Ok(())
    }
}
