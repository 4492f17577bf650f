//! # Audit Forms API
//!
//! `POST /api/audit-forms` is an upsert keyed on `(audit_id, form_id)`:
//! the first submission creates the row (201), later ones replace its name
//! and value and reset it to draft (200). Each submission recomputes the
//! audit's progress; a failed recompute is reported in `progress` without
//! failing the request.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use nexus_core::access::abilities;
use nexus_core::RecordStatus;
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;

use crate::auth::{require_ability, CallerIdentity};
use crate::error::{AppError, Violations};
use crate::extractors::{extract_validated_json, is_blank, Validate};
use crate::orchestration::{self, FormSubmission, ProgressOutcome, ReviewDecision};
use crate::routes::audits::{persist_audit, persist_forms};
use crate::state::{AppState, AuditFormRecord};

#[derive(Debug, Deserialize, ToSchema)]
pub struct SubmitFormRequest {
    pub audit_id: i64,
    /// Form template id.
    pub form_id: i64,
    pub name: String,
    /// Answers keyed by field id.
    pub value: serde_json::Value,
}

impl Validate for SubmitFormRequest {
    fn validate(&self, v: &mut Violations) {
        v.check(is_blank(&self.name), "name", "The name field is required.");
        v.check(
            !self.value.is_object(),
            "value",
            "The value must be an object keyed by field id.",
        );
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SubmitFormResponse {
    pub form: AuditFormRecord,
    /// Audit status after the submission.
    #[schema(value_type = Option<String>, example = "draft")]
    pub audit_status: Option<RecordStatus>,
    /// Audit progress after the submission.
    pub audit_progress: Option<f64>,
    /// `{"outcome": "updated", "progress": 50.0}`, `{"outcome": "unchanged"}`
    /// or `{"outcome": "failed", "warning": "..."}`.
    #[schema(value_type = Object)]
    pub progress: ProgressOutcome,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ReviewFormRequest {
    pub decision: ReviewDecision,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/api/audit-forms", post(submit_form))
}

pub fn admin_router() -> Router<AppState> {
    Router::new()
        .route("/admin/audit-forms/:id", get(get_form))
        .route("/admin/audit-forms/:id/review", post(review_form))
}

/// POST /api/audit-forms: Create or update the form of an audit.
#[utoipa::path(
    post,
    path = "/api/audit-forms",
    request_body = SubmitFormRequest,
    responses(
        (status = 201, description = "Form created", body = SubmitFormResponse),
        (status = 200, description = "Form updated", body = SubmitFormResponse),
        (status = 409, description = "Audit is no longer editable", body = crate::error::ErrorBody),
        (status = 422, description = "Invalid form or missing required fields", body = crate::error::ErrorBody),
    ),
    tag = "audit-forms"
)]
pub(crate) async fn submit_form(
    State(state): State<AppState>,
    caller: CallerIdentity,
    body: Result<Json<SubmitFormRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SubmitFormResponse>), AppError> {
    require_ability(&caller, abilities::CREATE_AUDITS)?;
    let req = extract_validated_json(body)?;
    let audit = state.audits.get(&req.audit_id).ok_or_else(|| {
        AppError::InvalidFields(Violations::single(
            "audit_id",
            "The selected audit id is invalid.",
        ))
    })?;
    if audit.user_id != caller.user_id {
        return Err(AppError::Forbidden(format!(
            "audit {} belongs to another user",
            audit.id
        )));
    }

    let result = orchestration::submit_form(
        &state,
        FormSubmission {
            audit_id: req.audit_id,
            form_id: req.form_id,
            name: req.name,
            value: req.value,
        },
    )?;

    persist_forms(&state, std::slice::from_ref(&result.form)).await;
    if let Some(audit) = &result.audit {
        persist_audit(&state, audit).await;
    }
    crate::activity::record(
        &state,
        Some(caller.user_id),
        if result.created { "created" } else { "updated" },
        "audit_form",
        Some(result.form.id),
        json!({ "audit_id": result.form.audit_id, "form_id": result.form.form_id }),
    )
    .await;

    let status = if result.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((
        status,
        Json(SubmitFormResponse {
            audit_status: result.audit.as_ref().map(|a| a.status),
            audit_progress: result.audit.as_ref().map(|a| a.progress),
            form: result.form,
            progress: result.progress,
        }),
    ))
}

/// GET /admin/audit-forms/{id}: One submitted form.
#[utoipa::path(
    get,
    path = "/admin/audit-forms/{id}",
    params(("id" = i64, Path, description = "Audit form ID")),
    responses(
        (status = 200, description = "Audit form", body = AuditFormRecord),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
    ),
    tag = "audit-forms"
)]
pub(crate) async fn get_form(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<i64>,
) -> Result<Json<AuditFormRecord>, AppError> {
    require_ability(&caller, abilities::VIEW_AUDITS)?;
    state
        .audit_forms
        .get(&id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("audit form {id} not found")))
}

/// POST /admin/audit-forms/{id}/review: Approve or reject one pending form.
#[utoipa::path(
    post,
    path = "/admin/audit-forms/{id}/review",
    params(("id" = i64, Path, description = "Audit form ID")),
    request_body = ReviewFormRequest,
    responses(
        (status = 200, description = "Form reviewed", body = AuditFormRecord),
        (status = 409, description = "Form is not pending", body = crate::error::ErrorBody),
    ),
    tag = "audit-forms"
)]
pub(crate) async fn review_form(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<i64>,
    body: Result<Json<ReviewFormRequest>, JsonRejection>,
) -> Result<Json<AuditFormRecord>, AppError> {
    require_ability(&caller, abilities::REVIEW_AUDITS)?;
    let req = crate::extractors::extract_json(body)?;

    let form = orchestration::review_form(&state, id, req.decision)?;
    persist_forms(&state, std::slice::from_ref(&form)).await;
    crate::activity::record(
        &state,
        Some(caller.user_id),
        match req.decision {
            ReviewDecision::Approve => "approved",
            ReviewDecision::Reject => "rejected",
        },
        "audit_form",
        Some(form.id),
        json!({ "audit_id": form.audit_id }),
    )
    .await;
    Ok(Json(form))
}
