//! Common types shared by the WOD cast conversion crates.

pub mod document;
pub mod error;
pub mod value;
pub mod vocab;

pub use document::{Cast, Document, GlobalAttributes, InvestigatorInfo};
pub use error::{CoercionWarning, WodError, WodResult};
pub use value::Value;
pub use vocab::{FileSubtype, TextWidth};
