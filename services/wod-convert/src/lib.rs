//! WOD cast file converter.
//!
//! Thin file-to-file wrapper over `wod-engine`: decode binary or text cast
//! files to JSON, encode interchange JSON to the binary container, tabulate
//! any input to CSV, and inspect container structure.

pub mod config;
pub mod convert;

pub use config::{load_engine_config, EngineFlags};
pub use convert::{
    decode_to_json, encode_file, inspect_file, read_document, tabulate, write_output,
    EncodeSummary, InputFormat, Inspection,
};
