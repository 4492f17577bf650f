#![deny(missing_docs)]

//! # nexus-core: Domain Core for NexusComply
//!
//! Pure types and functions shared by every NexusComply surface. The crate
//! has no I/O and no internal dependencies; only `serde`, `serde_json`,
//! `thiserror`, and `chrono` from the external ecosystem.
//!
//! ## What lives here
//!
//! - [`Frequency`] and the due-date derivation in [`schedule`]: given an
//!   audit start time and a requirement's frequency label, compute the
//!   deadline of that compliance cycle.
//! - [`progress`]: completion percentage of an audit from submitted forms.
//! - [`RecordStatus`]: the shared draft → pending → approved/rejected
//!   lifecycle for audits, audit forms and form templates.
//! - [`access`]: user → role → ability evaluation, including roles that
//!   implicitly grant every ability.
//! - [`form`]: the JSON structure of dynamic form templates and the
//!   required-field check applied to submissions.

pub mod access;
pub mod error;
pub mod form;
pub mod frequency;
pub mod progress;
pub mod schedule;
pub mod status;

pub use access::{RoleAbilities, ResolvedAbilities};
pub use error::{NexusError, ValidationError};
pub use form::{FieldType, FormField, FormSection, FormStructure};
pub use frequency::Frequency;
pub use progress::progress_percentage;
pub use schedule::{due_date, DueDatePolicy, WeekStart};
pub use status::{IssueStatus, RecordStatus, Severity};
