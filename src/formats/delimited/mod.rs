//! Delimited (CSV/TSV) parsing

pub mod reader;
