//! Records flowing through the pipeline: submissions in, features in the middle,
//! key/value pairs across the shuffle and aggregated records out.

use std::borrow::Cow;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::patterns::{ConstructTag, ErrorTag};

/// One student submission. Immutable input to the mapper.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubmissionRecord {
    pub problem_id: String,
    pub language: String,
    pub submission_id: String,
    /// Raw bytes; decoding happens during feature extraction.
    pub source: Vec<u8>,
}

impl SubmissionRecord {
    pub fn new<S: Into<Vec<u8>>>(problem_id: &str,
                                 language: &str,
                                 submission_id: &str,
                                 source: S)
                                 -> SubmissionRecord {
        SubmissionRecord {
            problem_id: problem_id.to_string(),
            language: language.to_string(),
            submission_id: submission_id.to_string(),
            source: source.into(),
        }
    }
}

/// Features derived from one submission.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FeatureRecord {
    pub problem_id: String,
    pub language: String,
    pub line_count: u64,
    pub constructs: BTreeSet<ConstructTag>,
    /// Import tokens, duplicates within the submission collapsed.
    pub imports: BTreeSet<String>,
    pub errors: BTreeSet<ErrorTag>,
}

/// One error tag on its own, or an unordered pair of distinct tags with the smaller
/// tag first. Wire form `a` or `a+b`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorCombo {
    Single(ErrorTag),
    Pair(ErrorTag, ErrorTag),
}

impl ErrorCombo {
    /// Every tag alone and every pair of tags, in order.
    pub fn all_of(errors: &BTreeSet<ErrorTag>) -> Vec<ErrorCombo> {
        let tags: Vec<ErrorTag> = errors.iter().copied().collect();
        let mut combos: Vec<ErrorCombo> = tags.iter().map(|&t| ErrorCombo::Single(t)).collect();
        for (i, &a) in tags.iter().enumerate() {
            combos.extend(tags[i + 1..].iter().map(|&b| ErrorCombo::Pair(a, b)));
        }
        combos
    }
}

impl fmt::Display for ErrorCombo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCombo::Single(t) => write!(f, "{}", t),
            ErrorCombo::Pair(a, b) => write!(f, "{}+{}", a, b),
        }
    }
}

impl FromStr for ErrorCombo {
    type Err = String;
    fn from_str(s: &str) -> Result<ErrorCombo, String> {
        match s.split_once('+') {
            None => Ok(ErrorCombo::Single(s.parse()?)),
            Some((a, b)) => {
                let (a, b): (ErrorTag, ErrorTag) = (a.parse()?, b.parse()?);
                if a < b {
                    Ok(ErrorCombo::Pair(a, b))
                } else {
                    Err(format!("`{}` is not an ordered pair of distinct tags", s))
                }
            }
        }
    }
}

/// The aggregation bucket. Which variant is in use is fixed by the job type for a
/// whole run.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CompositeKey {
    Language { problem_id: String, language: String },
    Construct { problem_id: String, construct: ConstructTag },
    Import { problem_id: String, import_name: String },
    Error { problem_id: String, error: ErrorTag },
    ErrorCombo { problem_id: String, combo: ErrorCombo },
}

impl CompositeKey {
    pub fn problem_id(&self) -> &str {
        match self {
            CompositeKey::Language { problem_id, .. }
            | CompositeKey::Construct { problem_id, .. }
            | CompositeKey::Import { problem_id, .. }
            | CompositeKey::Error { problem_id, .. }
            | CompositeKey::ErrorCombo { problem_id, .. } => problem_id,
        }
    }

    /// The second key component: language, construct, import, error or error pair.
    pub fn bucket(&self) -> Cow<'_, str> {
        match self {
            CompositeKey::Language { language, .. } => Cow::Borrowed(language),
            CompositeKey::Construct { construct, .. } => Cow::Borrowed(construct.as_str()),
            CompositeKey::Import { import_name, .. } => Cow::Borrowed(import_name),
            CompositeKey::Error { error, .. } => Cow::Borrowed(error.as_str()),
            CompositeKey::ErrorCombo { combo, .. } => Cow::Owned(combo.to_string()),
        }
    }
}

/// Wire form: both components separated by a tab.
impl fmt::Display for CompositeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\t{}", self.problem_id(), self.bucket())
    }
}

/// The aggregate for one key. Also used as the partial value a mapper emits, so that
/// combiner output and mapper output share one shape.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Summary {
    /// Multiset of line counts, kept sorted so equal multisets compare and print equal.
    Samples(Vec<u64>),
    Count(u64),
}

impl Summary {
    pub fn sample(n: u64) -> Summary {
        Summary::Samples(vec![n])
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Summary::Samples(_) => "samples",
            Summary::Count(_) => "count",
        }
    }
}

/// Wire form: comma-joined samples, or the bare count.
impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Summary::Count(n) => write!(f, "{}", n),
            Summary::Samples(samples) => {
                for (i, s) in samples.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{}", s)?;
                }
                Ok(())
            }
        }
    }
}

/// A (key,value) pair as emitted by the mapper. Pairs sort by key first, so a sorted
/// stream has all values of one key adjacent.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct KVPair {
    pub key: CompositeKey,
    pub value: Summary,
}

impl fmt::Display for KVPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\t{}", self.key, self.value)
    }
}

/// A (key,[value]) pair; the input of one reducer invocation.
/// Can be easily iterated over, e.g. in a `for` loop.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MultiRecord {
    key: CompositeKey,
    values: Vec<Summary>,
}

impl MultiRecord {
    pub fn new(key: CompositeKey, values: Vec<Summary>) -> MultiRecord {
        MultiRecord { key, values }
    }
    /// Retrieves the key of the record.
    pub fn key(&self) -> &CompositeKey {
        &self.key
    }
    pub fn len(&self) -> usize {
        self.values.len()
    }
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
    pub fn into_parts(self) -> (CompositeKey, Vec<Summary>) {
        (self.key, self.values)
    }
}

impl IntoIterator for MultiRecord {
    type Item = Summary;
    type IntoIter = std::vec::IntoIter<Summary>;
    /// Allows iterating over all the values.
    fn into_iter(self) -> Self::IntoIter {
        self.values.into_iter()
    }
}

/// The terminal artifact: one per key per job.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AggregatedRecord {
    pub key: CompositeKey,
    pub summary: Summary,
}

impl fmt::Display for AggregatedRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\t{}", self.key, self.summary)
    }
}

/// Emitter used in the map phase; collects (key,value) pairs in emission order.
#[derive(Default)]
pub struct MEmitter {
    r: Vec<KVPair>,
}

impl MEmitter {
    pub fn new() -> MEmitter {
        MEmitter { r: Vec::new() }
    }
    pub fn emit(&mut self, key: CompositeKey, value: Summary) {
        self.r.push(KVPair { key, value })
    }
    pub fn len(&self) -> usize {
        self.r.len()
    }
    pub fn is_empty(&self) -> bool {
        self.r.is_empty()
    }
    pub fn into_pairs(self) -> Vec<KVPair> {
        self.r
    }
}
