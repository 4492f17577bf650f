//! # Activity Logs API
//!
//! Read-only access to the activity trail, newest first, with CSV and PDF
//! exports of the same filtered listing. Exports are not paginated.

use axum::extract::{Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{NaiveDate, Utc};
use nexus_core::access::abilities;
use serde::Deserialize;
use utoipa::IntoParams;

use crate::auth::{require_ability, CallerIdentity};
use crate::error::AppError;
use crate::export::{self, ExportRow};
use crate::routes::PaginationParams;
use crate::state::{ActivityLogRecord, AppState};

#[derive(Debug, Deserialize, Default, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ActivityFilter {
    pub user_id: Option<i64>,
    /// Exact action name, e.g. `approved`.
    pub action: Option<String>,
    /// Exact target type, e.g. `audit`.
    pub target_type: Option<String>,
    pub target_id: Option<i64>,
    /// First day included (UTC).
    pub from: Option<NaiveDate>,
    /// Last day included (UTC).
    pub to: Option<NaiveDate>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl ActivityFilter {
    fn matches(&self, entry: &ActivityLogRecord) -> bool {
        let day = entry.created_at.date_naive();
        self.user_id.map_or(true, |id| entry.user_id == Some(id))
            && self.action.as_deref().map_or(true, |a| entry.action == a)
            && self
                .target_type
                .as_deref()
                .map_or(true, |t| entry.target_type == t)
            && self.target_id.map_or(true, |id| entry.target_id == Some(id))
            && self.from.map_or(true, |from| day >= from)
            && self.to.map_or(true, |to| day <= to)
    }
}

pub fn admin_router() -> Router<AppState> {
    Router::new()
        .route("/admin/activity-logs", get(list_activity))
        .route("/admin/activity-logs/export/csv", get(export_csv))
        .route("/admin/activity-logs/export/pdf", get(export_pdf))
}

/// Matching entries, newest first.
fn matching(state: &AppState, filter: &ActivityFilter) -> Vec<ActivityLogRecord> {
    let mut entries = state.activity_logs.filter(|e| filter.matches(e));
    entries.reverse();
    entries
}

fn export_rows<'a>(state: &AppState, entries: &'a [ActivityLogRecord]) -> Vec<ExportRow<'a>> {
    entries
        .iter()
        .map(|entry| ExportRow {
            user: entry
                .user_id
                .and_then(|id| state.users.get(&id))
                .map(|u| u.name),
            entry,
        })
        .collect()
}

fn attachment(content_type: &'static str, extension: &str, body: Vec<u8>) -> Response {
    let file_name = format!(
        "activity-logs-{}.{extension}",
        Utc::now().format("%Y%m%d-%H%M%S")
    );
    (
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{file_name}\""),
            ),
        ],
        body,
    )
        .into_response()
}

/// GET /admin/activity-logs: Activity entries, newest first.
#[utoipa::path(
    get,
    path = "/admin/activity-logs",
    params(ActivityFilter),
    responses((status = 200, description = "Activity entries", body = Vec<ActivityLogRecord>)),
    tag = "activity-logs"
)]
pub(crate) async fn list_activity(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Query(filter): Query<ActivityFilter>,
) -> Result<Json<Vec<ActivityLogRecord>>, AppError> {
    require_ability(&caller, abilities::VIEW_ACTIVITY_LOGS)?;
    let page = PaginationParams {
        limit: filter.limit,
        offset: filter.offset,
    };
    Ok(Json(page.apply(matching(&state, &filter))))
}

/// GET /admin/activity-logs/export/csv: Download matching entries as CSV.
#[utoipa::path(
    get,
    path = "/admin/activity-logs/export/csv",
    params(ActivityFilter),
    responses((status = 200, description = "CSV file", content_type = "text/csv")),
    tag = "activity-logs"
)]
pub(crate) async fn export_csv(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Query(filter): Query<ActivityFilter>,
) -> Result<Response, AppError> {
    require_ability(&caller, abilities::VIEW_ACTIVITY_LOGS)?;
    let entries = matching(&state, &filter);
    let csv = export::to_csv(&export_rows(&state, &entries));
    tracing::info!(user_id = caller.user_id, rows = entries.len(), "activity log exported as CSV");
    Ok(attachment("text/csv; charset=utf-8", "csv", csv.into_bytes()))
}

/// GET /admin/activity-logs/export/pdf: Download matching entries as PDF.
#[utoipa::path(
    get,
    path = "/admin/activity-logs/export/pdf",
    params(ActivityFilter),
    responses((status = 200, description = "PDF report", content_type = "application/pdf")),
    tag = "activity-logs"
)]
pub(crate) async fn export_pdf(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Query(filter): Query<ActivityFilter>,
) -> Result<Response, AppError> {
    require_ability(&caller, abilities::VIEW_ACTIVITY_LOGS)?;
    let entries = matching(&state, &filter);
    let pdf = export::to_pdf(
        "NexusComply Activity Log",
        Utc::now(),
        &export_rows(&state, &entries),
    );
    tracing::info!(user_id = caller.user_id, rows = entries.len(), "activity log exported as PDF");
    Ok(attachment("application/pdf", "pdf", pdf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(user_id: Option<i64>, action: &str, day: &str) -> ActivityLogRecord {
        let created_at = NaiveDate::parse_from_str(day, "%Y-%m-%d")
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
            .and_utc();
        ActivityLogRecord {
            id: 1,
            user_id,
            action: action.into(),
            target_type: "audit".into(),
            target_id: Some(9),
            details: json!({}),
            created_at,
        }
    }

    #[test]
    fn date_bounds_are_inclusive() {
        let filter = ActivityFilter {
            from: NaiveDate::from_ymd_opt(2024, 3, 1),
            to: NaiveDate::from_ymd_opt(2024, 3, 31),
            ..Default::default()
        };
        assert!(filter.matches(&entry(Some(1), "approved", "2024-03-01")));
        assert!(filter.matches(&entry(Some(1), "approved", "2024-03-31")));
        assert!(!filter.matches(&entry(Some(1), "approved", "2024-04-01")));
    }

    #[test]
    fn user_and_action_filters_combine() {
        let filter = ActivityFilter {
            user_id: Some(1),
            action: Some("approved".into()),
            ..Default::default()
        };
        assert!(filter.matches(&entry(Some(1), "approved", "2024-03-05")));
        assert!(!filter.matches(&entry(Some(2), "approved", "2024-03-05")));
        assert!(!filter.matches(&entry(None, "approved", "2024-03-05")));
        assert!(!filter.matches(&entry(Some(1), "rejected", "2024-03-05")));
    }
}
