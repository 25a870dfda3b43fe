//! Reference data error types.

/// Errors that can occur while loading reference data.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ReferenceError {
    /// Reference file could not be read
    #[error("failed to read {path}: {message}")]
    Io { path: String, message: String },

    /// Reference file is not valid JSON for the expected shape
    #[error("JSON parse error: {message}")]
    Json { message: String },
}
