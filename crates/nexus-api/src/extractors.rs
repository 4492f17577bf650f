//! # Custom Extractors & Validation
//!
//! Provides the [`Validate`] trait for request DTOs and helpers to extract
//! and validate JSON bodies in handlers. Validation collects every failing
//! field so clients receive all messages in one 422 response.

use axum::extract::rejection::JsonRejection;
use axum::Json;

use crate::error::{AppError, Violations};

/// Trait for request types that check business rules beyond what serde
/// deserialization enforces.
pub trait Validate {
    /// Record every rule violation in `violations`.
    fn validate(&self, violations: &mut Violations);
}

/// Extract a JSON body, mapping deserialization errors to [`AppError::BadRequest`].
pub fn extract_json<T>(result: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    result
        .map(|Json(v)| v)
        .map_err(|err| AppError::BadRequest(err.body_text()))
}

/// Extract a JSON body and validate it using the [`Validate`] trait.
pub fn extract_validated_json<T: Validate>(
    result: Result<Json<T>, JsonRejection>,
) -> Result<T, AppError> {
    let value = extract_json(result)?;
    let mut violations = Violations::new();
    value.validate(&mut violations);
    violations.into_result()?;
    Ok(value)
}

/// Whether `s` is empty after trimming.
pub fn is_blank(s: &str) -> bool {
    s.trim().is_empty()
}

/// Minimal shape check for an email address: `local@domain.tld`.
pub fn looks_like_email(s: &str) -> bool {
    match s.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && domain.contains('.')
                && !s.chars().any(char::is_whitespace)
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_shapes() {
        assert!(looks_like_email("outlet@nexus.test"));
        assert!(!looks_like_email("outlet.nexus.test"));
        assert!(!looks_like_email("@nexus.test"));
        assert!(!looks_like_email("outlet@localhost"));
        assert!(!looks_like_email("out let@nexus.test"));
    }

    #[test]
    fn blank_strings() {
        assert!(is_blank("   "));
        assert!(!is_blank(" a "));
    }
}
