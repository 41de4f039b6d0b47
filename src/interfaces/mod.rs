//! CLI input and output formats.

pub mod csv;
pub mod json;
