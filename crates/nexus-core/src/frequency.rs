//! # Compliance Frequencies
//!
//! How often a compliance requirement recurs. The labels are the exact
//! strings stored on requirements and sent by clients; matching is
//! case-sensitive.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Recurrence cycle of a compliance requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Frequency {
    /// Every day.
    Daily,
    /// Every calendar week.
    Weekly,
    /// Every calendar month.
    Monthly,
    /// Every three months.
    Quarterly,
    /// Every six months.
    #[serde(rename = "Bi-annually")]
    BiAnnually,
    /// Every calendar year.
    Annually,
}

impl Frequency {
    /// Every recognized frequency, in increasing cycle length.
    pub const ALL: [Frequency; 6] = [
        Self::Daily,
        Self::Weekly,
        Self::Monthly,
        Self::Quarterly,
        Self::BiAnnually,
        Self::Annually,
    ];

    /// The stored label of this frequency.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "Daily",
            Self::Weekly => "Weekly",
            Self::Monthly => "Monthly",
            Self::Quarterly => "Quarterly",
            Self::BiAnnually => "Bi-annually",
            Self::Annually => "Annually",
        }
    }

    /// Look up a frequency by its exact label. Returns `None` for anything
    /// else; due-date derivation treats `None` as the monthly fallback.
    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.as_str() == label)
    }
}

impl std::fmt::Display for Frequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Frequency {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_label(s).ok_or_else(|| ValidationError::UnknownFrequency(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_roundtrip_through_from_label() {
        for f in Frequency::ALL {
            assert_eq!(Frequency::from_label(f.as_str()), Some(f));
        }
    }

    #[test]
    fn label_matching_is_case_sensitive() {
        assert_eq!(Frequency::from_label("monthly"), None);
        assert_eq!(Frequency::from_label("Bi-Annually"), None);
    }

    #[test]
    fn from_str_rejects_unknown_label() {
        let err = "Fortnightly".parse::<Frequency>().unwrap_err();
        assert_eq!(err, ValidationError::UnknownFrequency("Fortnightly".into()));
    }

    #[test]
    fn serde_uses_stored_labels() {
        let json = serde_json::to_string(&Frequency::BiAnnually).unwrap();
        assert_eq!(json, "\"Bi-annually\"");
        let back: Frequency = serde_json::from_str("\"Quarterly\"").unwrap();
        assert_eq!(back, Frequency::Quarterly);
    }
}
