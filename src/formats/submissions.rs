//! Sources of submission records: JSON lines, a single raw file (one submission
//! per mapper process), or a corpus directory laid out as
//! `<root>/<problem_id>/<language>/<submission file>`.

use std::fs;
use std::io::Read;
use std::path::{Component, Path, PathBuf};

use serde::Deserialize;
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{Error, ExtractionError, Result};
use crate::formats::lines::LinesReader;
use crate::record_types::SubmissionRecord;

/// One JSON line. Exactly one of `source_text` and `source_path` must be set.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SubmissionLine {
    problem_id: String,
    language: String,
    submission_id: String,
    source_text: Option<String>,
    source_path: Option<PathBuf>,
}

/// Rejects ids that would break the tab-separated wire format.
fn check_id(line: usize, field: &str, value: &str) -> std::result::Result<(), ExtractionError> {
    if value.is_empty() || value.contains(['\t', '\n', '\r']) {
        return Err(ExtractionError::MalformedRecord {
            line,
            reason: format!("{} must be non-empty and free of tabs and newlines", field),
        });
    }
    Ok(())
}

fn read_source(submission_id: &str, path: &Path) -> std::result::Result<Vec<u8>, ExtractionError> {
    fs::read(path).map_err(|e| {
        ExtractionError::Unreadable {
            submission_id: submission_id.to_string(),
            path: path.display().to_string(),
            source: e,
        }
    })
}

/// Reads SubmissionRecords from JSON lines. Per-record problems surface as
/// `Error::Extraction` items and the reader keeps going; I/O errors on the stream
/// itself are fatal.
pub struct SubmissionReader<Src: Read> {
    lines: LinesReader<Src>,
    /// Relative `source_path`s are resolved against this directory.
    base: PathBuf,
}

impl<Src: Read> SubmissionReader<Src> {
    pub fn new(lines: LinesReader<Src>) -> SubmissionReader<Src> {
        SubmissionReader {
            lines,
            base: PathBuf::new(),
        }
    }

    pub fn with_base(mut self, base: &Path) -> SubmissionReader<Src> {
        self.base = base.to_path_buf();
        self
    }

    fn parse(&self, line_no: usize, line: &str) -> std::result::Result<SubmissionRecord, ExtractionError> {
        let rec: SubmissionLine = serde_json::from_str(line).map_err(|e| {
            ExtractionError::MalformedRecord {
                line: line_no,
                reason: e.to_string(),
            }
        })?;
        check_id(line_no, "problem_id", &rec.problem_id)?;
        check_id(line_no, "language", &rec.language)?;
        check_id(line_no, "submission_id", &rec.submission_id)?;

        let source = match (rec.source_text, rec.source_path) {
            (Some(text), None) => text.into_bytes(),
            (None, Some(path)) => read_source(&rec.submission_id, &self.base.join(path))?,
            _ => {
                return Err(ExtractionError::MalformedRecord {
                    line: line_no,
                    reason: "exactly one of source_text and source_path is required".to_string(),
                })
            }
        };
        Ok(SubmissionRecord {
            problem_id: rec.problem_id,
            language: rec.language,
            submission_id: rec.submission_id,
            source,
        })
    }
}

impl<Src: Read> Iterator for SubmissionReader<Src> {
    type Item = Result<SubmissionRecord>;
    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (line_no, line) = match self.lines.next()? {
                Err(e) => return Some(Err(Error::Io(e))),
                Ok(l) => l,
            };
            if line.trim().is_empty() {
                continue;
            }
            return Some(self.parse(line_no, &line).map_err(Error::from));
        }
    }
}

/// Derives `(problem_id, language, submission_id)` from a path ending in
/// `<problem_id>/<language>/<file>`; the submission id is the file stem.
pub fn ids_from_path(path: &Path) -> Option<(String, String, String)> {
    let mut parts = path.components().rev().filter_map(|c| match c {
        Component::Normal(s) => s.to_str(),
        _ => None,
    });
    let file = parts.next()?;
    let language = parts.next()?;
    let problem = parts.next()?;
    let stem = Path::new(file).file_stem()?.to_str()?;
    Some((problem.to_string(), language.to_string(), stem.to_string()))
}

/// Builds the record for a whole raw submission read from `src`.
pub fn raw_submission<R: Read>(problem_id: &str,
                               language: &str,
                               submission_id: &str,
                               mut src: R)
                               -> Result<SubmissionRecord> {
    let mut source = Vec::new();
    src.read_to_end(&mut source)?;
    Ok(SubmissionRecord::new(problem_id, language, submission_id, source))
}

/// Walks a corpus directory in file-name order, yielding one record per submission
/// file at depth three. Hidden files and directories are ignored.
pub struct CorpusWalker {
    entries: walkdir::IntoIter,
    root: PathBuf,
}

impl CorpusWalker {
    pub fn new(root: &Path) -> CorpusWalker {
        CorpusWalker {
            entries: WalkDir::new(root).min_depth(3).max_depth(3).sort_by_file_name().into_iter(),
            root: root.to_path_buf(),
        }
    }
}

impl Iterator for CorpusWalker {
    type Item = Result<SubmissionRecord>;
    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.entries.next()? {
                Err(e) => return Some(Err(Error::Io(e.into()))),
                Ok(entry) => entry,
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry.path().strip_prefix(&self.root).unwrap_or(entry.path());
            if relative.components().any(|c| c.as_os_str().to_string_lossy().starts_with('.')) {
                continue;
            }
            let Some((problem_id, language, submission_id)) = ids_from_path(relative) else {
                debug!(path = %entry.path().display(), "skipping file with non UTF-8 name");
                continue;
            };
            let source = match read_source(&submission_id, entry.path()) {
                Err(e) => return Some(Err(e.into())),
                Ok(s) => s,
            };
            return Some(Ok(SubmissionRecord {
                problem_id,
                language,
                submission_id,
                source,
            }));
        }
    }
}
