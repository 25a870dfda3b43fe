//! Domain error types.
//!
//! These errors represent validation failures of identifiers and query
//! parameters. They are distinct from transport/IO errors.

/// Domain-level validation errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DomainError {
    /// Train identifier is malformed
    #[error("invalid train id: {0}")]
    InvalidTrainId(&'static str),

    /// Board query parameter out of range
    #[error("invalid board query: {0}")]
    InvalidQuery(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = DomainError::InvalidTrainId("empty");
        assert_eq!(err.to_string(), "invalid train id: empty");

        let err = DomainError::InvalidQuery("rows must be 1-150".into());
        assert_eq!(err.to_string(), "invalid board query: rows must be 1-150");
    }
}
