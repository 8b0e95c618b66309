//! Input and output formats: submission sources and the line-based key/value codec.

pub mod lines;
pub mod submissions;
