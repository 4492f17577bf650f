//! # Issues & Corrective Actions API
//!
//! Reviewers raise issues against an audit and plan corrective actions for
//! them. Both move through `open -> in_progress -> resolved -> closed`.
//! An issue can only be closed once none of its corrective actions is still
//! open or in progress. Deleting an issue deletes its corrective actions.

use std::str::FromStr;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::{Local, NaiveDate, Utc};
use nexus_core::access::abilities;
use nexus_core::{IssueStatus, Severity};
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::{IntoParams, ToSchema};

use crate::auth::{require_ability, CallerIdentity};
use crate::error::{AppError, Violations};
use crate::extractors::{extract_validated_json, is_blank, Validate};
use crate::routes::PaginationParams;
use crate::state::{AppState, CorrectiveActionRecord, IssueRecord};

fn check_severity(v: &mut Violations, severity: Option<&str>) {
    v.check(
        severity.is_some_and(|s| Severity::from_str(s).is_err()),
        "severity",
        "The severity must be one of low, medium, high or critical.",
    );
}

fn check_status(v: &mut Violations, status: Option<&str>) {
    v.check(
        status.is_some_and(|s| IssueStatus::from_name(s).is_none()),
        "status",
        "The status must be one of open, in_progress, resolved or closed.",
    );
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateIssueRequest {
    pub audit_id: i64,
    pub description: String,
    #[schema(example = "high")]
    pub severity: String,
    pub due_date: Option<NaiveDate>,
}

impl Validate for CreateIssueRequest {
    fn validate(&self, v: &mut Violations) {
        v.check(
            is_blank(&self.description),
            "description",
            "The description field is required.",
        );
        check_severity(v, Some(&self.severity));
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateIssueRequest {
    pub description: Option<String>,
    pub severity: Option<String>,
    pub due_date: Option<NaiveDate>,
    #[schema(example = "in_progress")]
    pub status: Option<String>,
}

impl Validate for UpdateIssueRequest {
    fn validate(&self, v: &mut Violations) {
        v.check(
            self.description.as_deref().is_some_and(is_blank),
            "description",
            "The description field is required.",
        );
        check_severity(v, self.severity.as_deref());
        check_status(v, self.status.as_deref());
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateActionRequest {
    pub description: String,
    pub assigned_to: Option<i64>,
    pub completion_date: Option<NaiveDate>,
}

impl Validate for CreateActionRequest {
    fn validate(&self, v: &mut Violations) {
        v.check(
            is_blank(&self.description),
            "description",
            "The description field is required.",
        );
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateActionRequest {
    pub description: Option<String>,
    pub assigned_to: Option<i64>,
    pub completion_date: Option<NaiveDate>,
    pub verification_date: Option<NaiveDate>,
    #[schema(example = "resolved")]
    pub status: Option<String>,
}

impl Validate for UpdateActionRequest {
    fn validate(&self, v: &mut Violations) {
        v.check(
            self.description.as_deref().is_some_and(is_blank),
            "description",
            "The description field is required.",
        );
        check_status(v, self.status.as_deref());
    }
}

#[derive(Debug, Deserialize, Default, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct IssueFilter {
    pub audit_id: Option<i64>,
    pub status: Option<String>,
    pub severity: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// Issue with its corrective actions.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct IssueDetail {
    #[serde(flatten)]
    pub issue: IssueRecord,
    pub corrective_actions: Vec<CorrectiveActionRecord>,
}

pub fn admin_router() -> Router<AppState> {
    Router::new()
        .route("/admin/issues", get(list_issues).post(create_issue))
        .route(
            "/admin/issues/:id",
            get(get_issue).put(update_issue).delete(delete_issue),
        )
        .route(
            "/admin/issues/:id/corrective-actions",
            post(create_action),
        )
        .route(
            "/admin/corrective-actions/:id",
            put(update_action).delete(delete_action),
        )
}

fn issue_detail(state: &AppState, issue: IssueRecord) -> IssueDetail {
    let corrective_actions = state.corrective_actions.filter(|c| c.issue_id == issue.id);
    IssueDetail {
        issue,
        corrective_actions,
    }
}

fn check_assignee(state: &AppState, assigned_to: Option<i64>) -> Result<(), AppError> {
    if assigned_to.is_some_and(|id| !state.users.contains(&id)) {
        return Err(AppError::InvalidFields(Violations::single(
            "assigned_to",
            "The selected assigned to is invalid.",
        )));
    }
    Ok(())
}

async fn persist_issue(state: &AppState, issue: &IssueRecord) {
    crate::db::write_through(state.db_pool.as_ref(), "issue", issue.id, |pool| {
        crate::db::issues::upsert_issue(pool, issue)
    })
    .await;
}

async fn persist_action(state: &AppState, action: &CorrectiveActionRecord) {
    crate::db::write_through(state.db_pool.as_ref(), "corrective_action", action.id, |pool| {
        crate::db::issues::upsert_corrective_action(pool, action)
    })
    .await;
}

fn issue_not_found(id: i64) -> AppError {
    AppError::NotFound(format!("issue {id} not found"))
}

fn action_not_found(id: i64) -> AppError {
    AppError::NotFound(format!("corrective action {id} not found"))
}

fn is_unfinished(status: IssueStatus) -> bool {
    matches!(status, IssueStatus::Open | IssueStatus::InProgress)
}

/// GET /admin/issues: List issues.
#[utoipa::path(
    get,
    path = "/admin/issues",
    params(IssueFilter),
    responses((status = 200, description = "Issues", body = Vec<IssueDetail>)),
    tag = "issues"
)]
pub(crate) async fn list_issues(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Query(filter): Query<IssueFilter>,
) -> Result<Json<Vec<IssueDetail>>, AppError> {
    require_ability(&caller, abilities::MANAGE_ISSUES)?;
    let mut v = Violations::new();
    check_severity(&mut v, filter.severity.as_deref());
    check_status(&mut v, filter.status.as_deref());
    v.into_result()?;
    let severity = filter.severity.as_deref().and_then(|s| Severity::from_str(s).ok());
    let status = filter.status.as_deref().and_then(IssueStatus::from_name);

    let issues = state.issues.filter(|i| {
        filter.audit_id.map_or(true, |id| i.audit_id == id)
            && severity.map_or(true, |s| i.severity == s)
            && status.map_or(true, |s| i.status == s)
    });
    let page = PaginationParams {
        limit: filter.limit,
        offset: filter.offset,
    };
    Ok(Json(
        page.apply(issues)
            .into_iter()
            .map(|i| issue_detail(&state, i))
            .collect(),
    ))
}

/// GET /admin/issues/{id}: One issue with its corrective actions.
#[utoipa::path(
    get,
    path = "/admin/issues/{id}",
    params(("id" = i64, Path, description = "Issue ID")),
    responses(
        (status = 200, description = "Issue found", body = IssueDetail),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
    ),
    tag = "issues"
)]
pub(crate) async fn get_issue(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<i64>,
) -> Result<Json<IssueDetail>, AppError> {
    require_ability(&caller, abilities::MANAGE_ISSUES)?;
    let issue = state.issues.get(&id).ok_or_else(|| issue_not_found(id))?;
    Ok(Json(issue_detail(&state, issue)))
}

/// POST /admin/issues: Raise an issue against an audit.
#[utoipa::path(
    post,
    path = "/admin/issues",
    request_body = CreateIssueRequest,
    responses(
        (status = 201, description = "Issue raised", body = IssueRecord),
        (status = 422, description = "Validation failed", body = crate::error::ErrorBody),
    ),
    tag = "issues"
)]
pub(crate) async fn create_issue(
    State(state): State<AppState>,
    caller: CallerIdentity,
    body: Result<Json<CreateIssueRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<IssueRecord>), AppError> {
    require_ability(&caller, abilities::MANAGE_ISSUES)?;
    let req = extract_validated_json(body)?;
    if !state.audits.contains(&req.audit_id) {
        return Err(AppError::InvalidFields(Violations::single(
            "audit_id",
            "The selected audit id is invalid.",
        )));
    }
    let severity = Severity::from_str(&req.severity)?;

    let now = Utc::now();
    let issue = state.issues.insert_with(|id| IssueRecord {
        id,
        audit_id: req.audit_id,
        description: req.description.trim().to_string(),
        severity,
        due_date: req.due_date,
        status: IssueStatus::Open,
        raised_by: Some(caller.user_id),
        created_at: now,
        updated_at: now,
    });

    persist_issue(&state, &issue).await;
    crate::activity::record(
        &state,
        Some(caller.user_id),
        "created",
        "issue",
        Some(issue.id),
        json!({ "audit_id": issue.audit_id, "severity": issue.severity }),
    )
    .await;
    if issue.severity == Severity::Critical {
        tracing::warn!(issue_id = issue.id, audit_id = issue.audit_id, "critical issue raised");
    }
    Ok((StatusCode::CREATED, Json(issue)))
}

/// PUT /admin/issues/{id}: Update an issue.
#[utoipa::path(
    put,
    path = "/admin/issues/{id}",
    params(("id" = i64, Path, description = "Issue ID")),
    request_body = UpdateIssueRequest,
    responses(
        (status = 200, description = "Issue updated", body = IssueRecord),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
        (status = 409, description = "Corrective actions still open", body = crate::error::ErrorBody),
    ),
    tag = "issues"
)]
pub(crate) async fn update_issue(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<i64>,
    body: Result<Json<UpdateIssueRequest>, JsonRejection>,
) -> Result<Json<IssueRecord>, AppError> {
    require_ability(&caller, abilities::MANAGE_ISSUES)?;
    let req = extract_validated_json(body)?;
    if !state.issues.contains(&id) {
        return Err(issue_not_found(id));
    }
    let severity = req.severity.as_deref().map(Severity::from_str).transpose()?;
    let status = req.status.as_deref().and_then(IssueStatus::from_name);
    if status == Some(IssueStatus::Closed) {
        let open = state
            .corrective_actions
            .count(|c| c.issue_id == id && is_unfinished(c.status));
        if open > 0 {
            return Err(AppError::Conflict(format!(
                "issue {id} has {open} unfinished corrective action(s)"
            )));
        }
    }

    let issue = state
        .issues
        .update(&id, |i| {
            if let Some(description) = &req.description {
                i.description = description.trim().to_string();
            }
            if let Some(severity) = severity {
                i.severity = severity;
            }
            if req.due_date.is_some() {
                i.due_date = req.due_date;
            }
            if let Some(status) = status {
                i.status = status;
            }
            i.updated_at = Utc::now();
        })
        .ok_or_else(|| issue_not_found(id))?;

    persist_issue(&state, &issue).await;
    crate::activity::record(
        &state,
        Some(caller.user_id),
        "updated",
        "issue",
        Some(issue.id),
        json!({ "status": issue.status, "severity": issue.severity }),
    )
    .await;
    Ok(Json(issue))
}

/// DELETE /admin/issues/{id}: Delete an issue and its corrective actions.
#[utoipa::path(
    delete,
    path = "/admin/issues/{id}",
    params(("id" = i64, Path, description = "Issue ID")),
    responses(
        (status = 204, description = "Issue deleted"),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
    ),
    tag = "issues"
)]
pub(crate) async fn delete_issue(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    require_ability(&caller, abilities::MANAGE_ISSUES)?;
    let issue = state.issues.remove(&id).ok_or_else(|| issue_not_found(id))?;
    let actions = state.corrective_actions.remove_where(|c| c.issue_id == id);

    crate::db::write_through(state.db_pool.as_ref(), "issue", id, |pool| {
        crate::db::issues::delete_issue(pool, id)
    })
    .await;
    crate::activity::record(
        &state,
        Some(caller.user_id),
        "deleted",
        "issue",
        Some(id),
        json!({ "audit_id": issue.audit_id, "actions_removed": actions.len() }),
    )
    .await;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /admin/issues/{id}/corrective-actions: Plan a corrective action.
#[utoipa::path(
    post,
    path = "/admin/issues/{id}/corrective-actions",
    params(("id" = i64, Path, description = "Issue ID")),
    request_body = CreateActionRequest,
    responses(
        (status = 201, description = "Corrective action created", body = CorrectiveActionRecord),
        (status = 404, description = "Issue not found", body = crate::error::ErrorBody),
        (status = 409, description = "Issue is closed", body = crate::error::ErrorBody),
    ),
    tag = "issues"
)]
pub(crate) async fn create_action(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(issue_id): Path<i64>,
    body: Result<Json<CreateActionRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CorrectiveActionRecord>), AppError> {
    require_ability(&caller, abilities::MANAGE_ISSUES)?;
    let req = extract_validated_json(body)?;
    let issue = state
        .issues
        .get(&issue_id)
        .ok_or_else(|| issue_not_found(issue_id))?;
    if issue.status == IssueStatus::Closed {
        return Err(AppError::Conflict(format!("issue {issue_id} is closed")));
    }
    check_assignee(&state, req.assigned_to)?;

    let now = Utc::now();
    let action = state.corrective_actions.insert_with(|id| CorrectiveActionRecord {
        id,
        issue_id,
        description: req.description.trim().to_string(),
        assigned_to: req.assigned_to,
        completion_date: req.completion_date,
        verification_date: None,
        status: IssueStatus::Open,
        created_at: now,
        updated_at: now,
    });

    // Planning work on an open issue puts it in progress.
    let issue = if issue.status == IssueStatus::Open {
        state.issues.update(&issue_id, |i| {
            i.status = IssueStatus::InProgress;
            i.updated_at = now;
        })
    } else {
        None
    };

    persist_action(&state, &action).await;
    if let Some(issue) = &issue {
        persist_issue(&state, issue).await;
    }
    crate::activity::record(
        &state,
        Some(caller.user_id),
        "created",
        "corrective_action",
        Some(action.id),
        json!({ "issue_id": issue_id, "assigned_to": action.assigned_to }),
    )
    .await;
    Ok((StatusCode::CREATED, Json(action)))
}

/// PUT /admin/corrective-actions/{id}: Update a corrective action.
///
/// Moving to `resolved` stamps today's completion date and moving to
/// `closed` today's verification date, unless the request sets them.
#[utoipa::path(
    put,
    path = "/admin/corrective-actions/{id}",
    params(("id" = i64, Path, description = "Corrective action ID")),
    request_body = UpdateActionRequest,
    responses(
        (status = 200, description = "Corrective action updated", body = CorrectiveActionRecord),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
    ),
    tag = "issues"
)]
pub(crate) async fn update_action(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<i64>,
    body: Result<Json<UpdateActionRequest>, JsonRejection>,
) -> Result<Json<CorrectiveActionRecord>, AppError> {
    require_ability(&caller, abilities::MANAGE_ISSUES)?;
    let req = extract_validated_json(body)?;
    check_assignee(&state, req.assigned_to)?;
    let status = req.status.as_deref().and_then(IssueStatus::from_name);
    let today = Local::now().date_naive();

    let action = state
        .corrective_actions
        .update(&id, |c| {
            if let Some(description) = &req.description {
                c.description = description.trim().to_string();
            }
            if req.assigned_to.is_some() {
                c.assigned_to = req.assigned_to;
            }
            if req.completion_date.is_some() {
                c.completion_date = req.completion_date;
            }
            if req.verification_date.is_some() {
                c.verification_date = req.verification_date;
            }
            if let Some(status) = status {
                c.status = status;
                if status == IssueStatus::Resolved && c.completion_date.is_none() {
                    c.completion_date = Some(today);
                }
                if status == IssueStatus::Closed && c.verification_date.is_none() {
                    c.verification_date = Some(today);
                }
            }
            c.updated_at = Utc::now();
        })
        .ok_or_else(|| action_not_found(id))?;

    persist_action(&state, &action).await;
    crate::activity::record(
        &state,
        Some(caller.user_id),
        "updated",
        "corrective_action",
        Some(action.id),
        json!({ "issue_id": action.issue_id, "status": action.status }),
    )
    .await;
    Ok(Json(action))
}

/// DELETE /admin/corrective-actions/{id}: Delete a corrective action.
#[utoipa::path(
    delete,
    path = "/admin/corrective-actions/{id}",
    params(("id" = i64, Path, description = "Corrective action ID")),
    responses(
        (status = 204, description = "Corrective action deleted"),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
    ),
    tag = "issues"
)]
pub(crate) async fn delete_action(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    require_ability(&caller, abilities::MANAGE_ISSUES)?;
    let action = state
        .corrective_actions
        .remove(&id)
        .ok_or_else(|| action_not_found(id))?;

    crate::db::write_through(state.db_pool.as_ref(), "corrective_action", id, |pool| {
        crate::db::issues::delete_corrective_action(pool, id)
    })
    .await;
    crate::activity::record(
        &state,
        Some(caller.user_id),
        "deleted",
        "corrective_action",
        Some(id),
        json!({ "issue_id": action.issue_id }),
    )
    .await;
    Ok(StatusCode::NO_CONTENT)
}
