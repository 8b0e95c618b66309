//! Map/reduce analysis of programming-problem submissions.
//!
//! A mapper turns each submission into key/value pairs (line-count samples, construct
//! or import occurrences), a reducer folds all values of a key with an associative,
//! commutative merge. The same code runs as Hadoop streaming tasks (`map`, `combine`,
//! `reduce`) or as a local thread-pool job (`controller`).

pub mod aggregate;
pub mod assemble;
pub mod controller;
pub mod error;
pub mod features;
pub mod formats;
pub mod map;
pub mod mapreducer;
pub mod parameters;
pub mod patterns;
pub mod record_types;
pub mod reduce;
pub mod shard_merge;
pub mod source;
