//! # Error Hierarchy
//!
//! Structured error types for the NexusComply domain core, built with
//! `thiserror`. Each variant carries the offending input so operators and
//! API clients can see what was rejected.

use thiserror::Error;

/// Top-level error type for the domain core.
#[derive(Error, Debug)]
pub enum NexusError {
    /// Domain value validation failure.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Status lifecycle violation.
    #[error("invalid status transition from {from} to {to}")]
    InvalidTransition {
        /// Current status name.
        from: String,
        /// Requested status name.
        to: String,
    },

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Validation errors for domain values parsed from user input.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Frequency label is not one of the recognized cycle names.
    #[error("unknown frequency \"{0}\" (expected Daily, Weekly, Monthly, Quarterly, Bi-annually or Annually)")]
    UnknownFrequency(String),

    /// Week start setting is neither monday nor sunday.
    #[error("invalid week start \"{0}\" (expected monday or sunday)")]
    InvalidWeekStart(String),

    /// Status name is not part of the record lifecycle.
    #[error("unknown status \"{0}\"")]
    UnknownStatus(String),

    /// Severity name is not recognized.
    #[error("unknown severity \"{0}\" (expected low, medium, high or critical)")]
    UnknownSeverity(String),

    /// Form template structure is malformed.
    #[error("invalid form structure: {0}")]
    InvalidFormStructure(String),

    /// Submitted form value does not match its template.
    #[error("invalid form value: {0}")]
    InvalidFormValue(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_frequency_message_names_input() {
        let err = ValidationError::UnknownFrequency("Fortnightly".into());
        assert!(err.to_string().contains("Fortnightly"));
    }

    #[test]
    fn validation_converts_into_nexus_error() {
        let err: NexusError = ValidationError::UnknownStatus("archived".into()).into();
        assert!(matches!(err, NexusError::Validation(_)));
        assert!(err.to_string().contains("archived"));
    }

    #[test]
    fn transition_message_names_both_states() {
        let err = NexusError::InvalidTransition {
            from: "approved".into(),
            to: "draft".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("approved"));
        assert!(msg.contains("draft"));
    }
}
