// src/pipeline/mod.rs
pub mod dedup;
pub mod parser;

pub use parser::{parse, FieldValue, ParsedPost};
