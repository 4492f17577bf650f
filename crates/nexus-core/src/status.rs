//! # Record Statuses
//!
//! Audits, audit forms and form templates share one review lifecycle:
//!
//! ```text
//! DRAFT ─submit──▶ PENDING ─approve──▶ APPROVED
//!                    │  ▲
//!                 reject │ resubmit
//!                    ▼  │
//!                 REJECTED ─edit──▶ REVISING
//!                                      │
//!                                  resubmit ──▶ PENDING
//! ```
//!
//! `APPROVED` is terminal. Records are editable only in `DRAFT`,
//! `REJECTED` and `REVISING`.
//!
//! Issues raised against an audit follow their own [`IssueStatus`].

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{NexusError, ValidationError};

/// Review lifecycle state of an audit, audit form or form template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// Being filled in; not yet submitted.
    Draft,
    /// Submitted and awaiting review.
    Pending,
    /// Accepted by a reviewer. Terminal.
    Approved,
    /// Sent back by a reviewer.
    Rejected,
    /// Being corrected after a rejection.
    Revising,
}

impl RecordStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [RecordStatus; 5] = [
        Self::Draft,
        Self::Pending,
        Self::Approved,
        Self::Rejected,
        Self::Revising,
    ];

    /// Canonical lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Revising => "revising",
        }
    }

    /// Human-readable title.
    pub fn title(&self) -> &'static str {
        match self {
            Self::Draft => "Draft",
            Self::Pending => "Pending Review",
            Self::Approved => "Approved",
            Self::Rejected => "Rejected",
            Self::Revising => "Revising",
        }
    }

    /// Parse a canonical name. Returns `None` for anything else.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == name)
    }

    /// Whether the record's content may still be changed.
    pub fn is_editable(&self) -> bool {
        matches!(self, Self::Draft | Self::Rejected | Self::Revising)
    }

    /// Whether no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        self.valid_transitions().is_empty()
    }

    /// Statuses reachable from this one.
    pub fn valid_transitions(&self) -> &'static [RecordStatus] {
        match self {
            Self::Draft => &[Self::Pending],
            Self::Pending => &[Self::Approved, Self::Rejected],
            Self::Approved => &[],
            Self::Rejected => &[Self::Revising, Self::Pending],
            Self::Revising => &[Self::Pending],
        }
    }

    /// Validate a transition to `target`, returning the target on success.
    pub fn transition_to(self, target: RecordStatus) -> Result<RecordStatus, NexusError> {
        if self.valid_transitions().contains(&target) {
            Ok(target)
        } else {
            Err(NexusError::InvalidTransition {
                from: self.as_str().to_string(),
                to: target.as_str().to_string(),
            })
        }
    }
}

impl std::fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| ValidationError::UnknownStatus(s.to_string()))
    }
}

/// Resolution state of an issue found during an audit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueStatus {
    /// Raised, no action yet.
    Open,
    /// Corrective work under way.
    InProgress,
    /// Corrective work done, awaiting verification.
    Resolved,
    /// Verified and closed.
    Closed,
}

impl IssueStatus {
    /// Canonical snake_case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::InProgress => "in_progress",
            Self::Resolved => "resolved",
            Self::Closed => "closed",
        }
    }

    /// Parse a canonical name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "open" => Some(Self::Open),
            "in_progress" => Some(Self::InProgress),
            "resolved" => Some(Self::Resolved),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }
}

impl std::fmt::Display for IssueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity of an audit issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Cosmetic or advisory.
    Low,
    /// Should be corrected before the next cycle.
    Medium,
    /// Must be corrected promptly.
    High,
    /// Immediate risk; blocks approval.
    Critical,
}

impl Severity {
    /// Canonical lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl FromStr for Severity {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(ValidationError::UnknownSeverity(other.to_string())),
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_roundtrip() {
        for s in RecordStatus::ALL {
            assert_eq!(RecordStatus::from_name(s.as_str()), Some(s));
            assert_eq!(s.as_str().parse::<RecordStatus>().unwrap(), s);
        }
        assert!("archived".parse::<RecordStatus>().is_err());
    }

    #[test]
    fn only_approved_is_terminal() {
        for s in RecordStatus::ALL {
            assert_eq!(s.is_terminal(), s == RecordStatus::Approved, "{s}");
        }
    }

    #[test]
    fn draft_submits_to_pending_only() {
        assert_eq!(
            RecordStatus::Draft.transition_to(RecordStatus::Pending).unwrap(),
            RecordStatus::Pending
        );
        assert!(RecordStatus::Draft.transition_to(RecordStatus::Approved).is_err());
    }

    #[test]
    fn pending_is_reviewed_to_approved_or_rejected() {
        assert!(RecordStatus::Pending.transition_to(RecordStatus::Approved).is_ok());
        assert!(RecordStatus::Pending.transition_to(RecordStatus::Rejected).is_ok());
        assert!(RecordStatus::Pending.transition_to(RecordStatus::Draft).is_err());
    }

    #[test]
    fn rejected_can_be_revised_and_resubmitted() {
        let revising = RecordStatus::Rejected
            .transition_to(RecordStatus::Revising)
            .unwrap();
        assert_eq!(
            revising.transition_to(RecordStatus::Pending).unwrap(),
            RecordStatus::Pending
        );
    }

    #[test]
    fn approved_rejects_every_transition() {
        for target in RecordStatus::ALL {
            let err = RecordStatus::Approved.transition_to(target).unwrap_err();
            assert!(err.to_string().contains("approved"));
        }
    }

    #[test]
    fn editable_states() {
        assert!(RecordStatus::Draft.is_editable());
        assert!(RecordStatus::Rejected.is_editable());
        assert!(RecordStatus::Revising.is_editable());
        assert!(!RecordStatus::Pending.is_editable());
        assert!(!RecordStatus::Approved.is_editable());
    }

    #[test]
    fn serde_uses_snake_case() {
        assert_eq!(
            serde_json::to_string(&IssueStatus::InProgress).unwrap(),
            "\"in_progress\""
        );
        assert_eq!(
            serde_json::to_string(&RecordStatus::Revising).unwrap(),
            "\"revising\""
        );
    }

    #[test]
    fn severity_orders_by_impact() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::Low < Severity::Medium);
        assert_eq!("high".parse::<Severity>().unwrap(), Severity::High);
        assert!("urgent".parse::<Severity>().is_err());
    }
}
