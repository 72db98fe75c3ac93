//! Error types for cast conversion.

use serde::Serialize;
use thiserror::Error;

/// Result type alias using WodError.
pub type WodResult<T> = Result<T, WodError>;

/// Primary error type for decode, encode and tabulate operations.
#[derive(Debug, Error)]
pub enum WodError {
    // === Input Errors ===
    /// Structurally invalid binary or text input
    #[error("Malformed container: {0}")]
    MalformedContainer(String),

    /// A native value with no normalization rule
    #[error("Unsupported value kind: {0}")]
    UnsupportedValueKind(String),

    // === Write Path Errors ===
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("Validation failed: {0}")]
    ValidationError(String),

    // === Infrastructure Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl WodError {
    /// Short machine-readable name of the error class.
    pub fn kind(&self) -> &'static str {
        match self {
            WodError::MalformedContainer(_) => "MalformedContainer",
            WodError::UnsupportedValueKind(_) => "UnsupportedValueKind",
            WodError::SchemaMismatch(_) => "SchemaMismatch",
            WodError::ValidationError(_) => "ValidationError",
            WodError::Io(_) => "Io",
            WodError::Json(_) => "Json",
        }
    }

    /// Process exit code used by the command-line converter.
    pub fn exit_code(&self) -> i32 {
        match self {
            WodError::MalformedContainer(_) | WodError::UnsupportedValueKind(_) => 65,

            WodError::SchemaMismatch(_) | WodError::ValidationError(_) => 66,

            WodError::Json(_) => 65,
            WodError::Io(_) => 74,
        }
    }
}

/// Non-fatal problem recorded while encoding; the affected field is skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CoercionWarning {
    /// Cast the value belongs to, `None` for file-level values
    pub cast_index: Option<usize>,
    pub field: String,
    pub message: String,
}

impl CoercionWarning {
    pub fn new(cast_index: Option<usize>, field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            cast_index,
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for CoercionWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.cast_index {
            Some(index) => write!(f, "cast {} field '{}': {}", index, self.field, self.message),
            None => write!(f, "field '{}': {}", self.field, self.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let err = WodError::MalformedContainer("missing 'casts' dimension".into());
        assert_eq!(err.kind(), "MalformedContainer");
        assert_eq!(err.exit_code(), 65);
        assert_eq!(
            err.to_string(),
            "Malformed container: missing 'casts' dimension"
        );
    }

    #[test]
    fn test_json_error_converts() {
        let err: WodError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert_eq!(err.kind(), "Json");
    }

    #[test]
    fn test_warning_display() {
        let warning = CoercionWarning::new(Some(3), "lat", "cannot parse 'north' as float");
        assert_eq!(
            warning.to_string(),
            "cast 3 field 'lat': cannot parse 'north' as float"
        );
    }
}
