//! Error types for the wkhtmltopdf bindings

use thiserror::Error;

/// Errors that can occur when driving the converter
#[derive(Error, Debug)]
pub enum PdfError {
    #[error("Engine rejected setting {key}={value}")]
    Settings { key: String, value: String },

    #[error("Conversion failed with status {status} (http status {http_error_code}){}", join_errors(.errors))]
    ConversionFailed {
        status: i32,
        http_error_code: i32,
        errors: Vec<String>,
    },

    #[error("Output not available: no successful conversion")]
    OutputNotAvailable,

    #[error("Converter used after destroy")]
    UseAfterDestroy,

    #[error("Converter has already run a conversion")]
    AlreadyConverted,

    #[error("Settings belong to a different engine")]
    EngineMismatch,

    #[error("Engine used off the thread that initialized it")]
    WrongThread,

    #[error("Value of setting {key} does not fit in {capacity} bytes")]
    ValueTooLong { key: String, capacity: usize },

    #[error("Engine returned a null {0} handle")]
    NullHandle(&'static str),

    #[error("String contains an interior NUL byte")]
    InvalidString(#[from] std::ffi::NulError),

    #[error("Invalid settings JSON: {0}")]
    SettingsJson(#[from] serde_json::Error),

    #[error("Engine initialization failed: {0}")]
    Init(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PdfError {
    /// Build the error for a non-zero convert status
    pub(crate) fn from_status(status: i32, http_error_code: i32, errors: Vec<String>) -> Self {
        PdfError::ConversionFailed {
            status,
            http_error_code,
            errors,
        }
    }
}

fn join_errors(errors: &[String]) -> String {
    if errors.is_empty() {
        String::new()
    } else {
        format!(": {}", errors.join("; "))
    }
}

/// Result type alias for converter operations
pub type Result<T> = std::result::Result<T, PdfError>;
