//! Line-oriented text streams: the `key<TAB>value` wire format between mapper,
//! combiner and reducer, and the reducer's output files.
//!
//! A key/value line has exactly three tab-separated fields: problem id, bucket
//! (language, construct, import or error name) and the serialized summary.

use std::fmt::Display;
use std::fs;
use std::io;
use std::io::{BufRead, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{Error, ProtocolError, Result};
use crate::parameters::JobType;
use crate::record_types::KVPair;

/// Iterator over the lines of a text source, with 1-based line numbers.
pub struct LinesReader<Src: Read> {
    src: io::Lines<io::BufReader<Src>>,
    line_no: usize,
}

impl<Src: Read> LinesReader<Src> {
    pub fn new(src: Src) -> LinesReader<Src> {
        LinesReader {
            src: io::BufReader::new(src).lines(),
            line_no: 0,
        }
    }
}

/// Returns a LinesReader reading lines from stdin.
pub fn new_from_stdin() -> LinesReader<io::Stdin> {
    LinesReader::new(io::stdin())
}

/// Returns a LinesReader reading from the given file.
pub fn new_from_file(path: &Path) -> io::Result<LinesReader<fs::File>> {
    fs::File::open(path).map(LinesReader::new)
}

/// Returns a LinesReader reading, in name order, all files directly in `path` whose name
/// starts with `prefix`. A plain file path is read as is.
pub fn new_from_dir(path: &Path, prefix: &str) -> io::Result<LinesReader<Box<dyn Read>>> {
    let mut reader: Box<dyn Read> = Box::new(io::empty());
    for file in files_with_prefix(path, prefix)? {
        let f = fs::File::open(&file)?;
        reader = Box::new(reader.chain(f));
    }
    Ok(LinesReader::new(reader))
}

/// Files directly in `path` (or `path` itself) whose name starts with `prefix`, sorted.
/// Subdirectories are not entered.
pub fn files_with_prefix(path: &Path, prefix: &str) -> io::Result<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(path).max_depth(1).sort_by_file_name() {
        let entry = entry.map_err(io::Error::other)?;
        if entry.file_type().is_file()
            && entry.file_name().to_string_lossy().starts_with(prefix) {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

impl<Src: Read> Iterator for LinesReader<Src> {
    type Item = io::Result<(usize, String)>;
    fn next(&mut self) -> Option<Self::Item> {
        let line = self.src.next()?;
        self.line_no += 1;
        Some(line.map(|l| (self.line_no, l)))
    }
}

/// Writer that terminates every record with a '\n' character.
pub struct LinesWriter<W: Write> {
    file: BufWriter<W>,
    records_written: usize,
}

impl LinesWriter<fs::File> {
    pub fn new_to_file(path: &Path) -> io::Result<LinesWriter<fs::File>> {
        let f = fs::OpenOptions::new().write(true).create(true).truncate(true).open(path)?;
        Ok(LinesWriter::new_to_write(f))
    }
}

impl<W: Write> LinesWriter<W> {
    pub fn new_to_write(w: W) -> LinesWriter<W> {
        LinesWriter {
            file: BufWriter::new(w),
            records_written: 0,
        }
    }

    pub fn write_record<D: Display>(&mut self, record: &D) -> io::Result<()> {
        writeln!(self.file, "{}", record)?;
        self.records_written += 1;
        Ok(())
    }

    pub fn records_written(&self) -> usize {
        self.records_written
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// Parses one `problem<TAB>bucket<TAB>value` line under the job's schema.
pub fn parse_kv_line(job: JobType, line_no: usize, line: &str) -> std::result::Result<KVPair, ProtocolError> {
    let line = line.strip_suffix('\r').unwrap_or(line);
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() != 3 {
        return Err(ProtocolError::MalformedLine {
            line: line_no,
            reason: format!("expected 3 tab-separated fields, found {}", fields.len()),
        });
    }
    Ok(KVPair {
        key: job.parse_key(fields[0], fields[1])?,
        value: job.parse_summary(fields[2])?,
    })
}

/// Reads key/value pairs of one job schema from a line source. Blank lines are
/// skipped.
pub struct KVReader<Src: Read> {
    job: JobType,
    lines: LinesReader<Src>,
}

impl<Src: Read> KVReader<Src> {
    pub fn new(job: JobType, lines: LinesReader<Src>) -> KVReader<Src> {
        KVReader { job, lines }
    }
}

impl<Src: Read> Iterator for KVReader<Src> {
    type Item = Result<KVPair>;
    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (line_no, line) = match self.lines.next()? {
                Err(e) => return Some(Err(Error::Io(e))),
                Ok(l) => l,
            };
            if line.trim().is_empty() {
                continue;
            }
            return Some(parse_kv_line(self.job, line_no, &line).map_err(Error::from));
        }
    }
}
