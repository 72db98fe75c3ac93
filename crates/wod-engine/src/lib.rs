//! WOD cast conversion engine.
//!
//! Converts World Ocean Database cast files between the binary container,
//! the legacy text variant, the JSON document model and flat tables.
//!
//! # Architecture
//!
//! Every flow passes through [`wod_common::Document`]:
//!
//! - [`decode_binary`] / [`decode_text`] build a document from file bytes
//! - [`prepare_document`] cleans arbitrary interchange JSON into one
//! - [`infer`] + [`encode_binary`] write a document back to a container
//! - [`flatten`] + [`write_csv`] project it onto one row per sample
//!
//! Container files are read and written through the netCDF C library (see
//! [`container`]). Calls are synchronous and hold no state between
//! invocations.

pub mod config;
pub mod container;
pub mod decode;
pub mod encode;
pub mod error;
pub mod impute;
pub mod normalize;
pub mod prepare;
pub mod schema;
pub mod tabular;
pub mod text;

// Re-exports
pub use config::EngineConfig;
pub use container::{Container, ContainerWriter, Format};
pub use decode::{decode_binary, decode_container, detect_subtype};
pub use encode::{encode_binary, encode_document, Encoded};
pub use error::ConfigError;
pub use impute::{impute, impute_value};
pub use normalize::{normalize, NativeValue};
pub use prepare::{prepare_document, prepare_document_str, Prepared};
pub use schema::{infer, infer_checked, ElementType, Layout, Schema, VariableSchema};
pub use tabular::{flatten, write_csv, Table};
pub use text::decode_text;
