//! # API Route Modules
//!
//! Route modules for the NexusComply API surface:
//!
//! - `account` handles login, logout, password reset and the current user.
//!   Login and password reset are the only unauthenticated `/api` routes.
//! - `audits`: the audit lifecycle for outlet users (`/api/audits`) and
//!   the review queue for managers (`/admin/audits`).
//! - `audit_forms`: form submission with progress tracking, and per-form
//!   review.
//! - `outlets`, `compliance`, `form_templates`: master data. Read access
//!   for the mobile app under `/api`, management under `/admin`.
//! - `users` and `roles`: account, role and ability administration.
//!   Mutations invalidate the resolved-ability cache.
//! - `issues`: findings raised against audits and their corrective actions.
//! - `activity_logs`: the audit trail with CSV and PDF export.
//! - `files`: audit evidence upload and download.

pub mod account;
pub mod activity_logs;
pub mod audit_forms;
pub mod audits;
pub mod compliance;
pub mod files;
pub mod form_templates;
pub mod issues;
pub mod outlets;
pub mod roles;
pub mod users;

use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};

/// Pagination parameters for list endpoints.
#[derive(Debug, Deserialize, Default, ToSchema, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PaginationParams {
    /// Maximum number of items to return (default: 100, max: 1000).
    pub limit: Option<usize>,
    /// Number of items to skip (default: 0).
    pub offset: Option<usize>,
}

impl PaginationParams {
    const DEFAULT_LIMIT: usize = 100;
    const MAX_LIMIT: usize = 1000;

    fn effective_limit(&self) -> usize {
        self.limit
            .unwrap_or(Self::DEFAULT_LIMIT)
            .min(Self::MAX_LIMIT)
    }

    fn effective_offset(&self) -> usize {
        self.offset.unwrap_or(0)
    }

    /// Apply the window to an already ordered list.
    pub fn apply<T>(&self, items: Vec<T>) -> Vec<T> {
        items
            .into_iter()
            .skip(self.effective_offset())
            .take(self.effective_limit())
            .collect()
    }
}

/// Case-insensitive substring match used by `search` filters.
pub(crate) fn matches_search(haystacks: &[&str], needle: Option<&str>) -> bool {
    match needle.map(str::trim).filter(|n| !n.is_empty()) {
        None => true,
        Some(needle) => {
            let needle = needle.to_lowercase();
            haystacks
                .iter()
                .any(|h| h.to_lowercase().contains(&needle))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_defaults_and_caps() {
        let p = PaginationParams::default();
        assert_eq!(p.apply((0..250).collect::<Vec<_>>()).len(), 100);

        let p = PaginationParams {
            limit: Some(5000),
            offset: Some(10),
        };
        let page = p.apply((0..2000).collect::<Vec<_>>());
        assert_eq!(page.len(), 1000);
        assert_eq!(page[0], 10);
    }

    #[test]
    fn search_is_case_insensitive_and_blank_matches_all() {
        assert!(matches_search(&["Harbour Kitchen"], Some("harbour")));
        assert!(!matches_search(&["Harbour Kitchen"], Some("airport")));
        assert!(matches_search(&["anything"], Some("   ")));
        assert!(matches_search(&["anything"], None));
    }
}
