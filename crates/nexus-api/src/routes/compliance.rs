//! # Compliance Requirements API
//!
//! A requirement names a recurring obligation (its frequency drives audit
//! due dates) and the form templates an audit against it must fill in.
//! The mobile app lists the active requirements with template summaries.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use nexus_core::access::abilities;
use nexus_core::{Frequency, RecordStatus};
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::{IntoParams, ToSchema};

use crate::auth::{require_ability, CallerIdentity};
use crate::error::{AppError, Violations};
use crate::extractors::{extract_validated_json, is_blank, Validate};
use crate::routes::{matches_search, PaginationParams};
use crate::state::{AppState, ComplianceRequirementRecord, SubmissionType};

#[derive(Debug, Deserialize, ToSchema)]
pub struct ComplianceRequest {
    pub title: String,
    pub description: Option<String>,
    pub category: Option<String>,
    /// One of `Daily`, `Weekly`, `Monthly`, `Quarterly`, `Bi-annually`, `Annually`.
    #[schema(example = "Monthly")]
    pub frequency: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default = "default_submission_type")]
    pub submission_type: SubmissionType,
    pub document_upload_instructions: Option<String>,
    /// Form templates an audit must submit.
    #[serde(default)]
    pub form_template_ids: Vec<i64>,
}

fn default_true() -> bool {
    true
}

fn default_submission_type() -> SubmissionType {
    SubmissionType::Form
}

impl ComplianceRequest {
    fn frequency(&self) -> Option<Frequency> {
        self.frequency
            .as_deref()
            .filter(|f| !f.trim().is_empty())
            .and_then(Frequency::from_label)
    }

    /// Template ids with duplicates dropped, order kept.
    fn template_ids(&self) -> Vec<i64> {
        let mut ids = Vec::with_capacity(self.form_template_ids.len());
        for id in &self.form_template_ids {
            if !ids.contains(id) {
                ids.push(*id);
            }
        }
        ids
    }
}

impl Validate for ComplianceRequest {
    fn validate(&self, v: &mut Violations) {
        v.check(is_blank(&self.title), "title", "The title field is required.");
        v.check(
            self.title.chars().count() > 255,
            "title",
            "The title may not be greater than 255 characters.",
        );
        v.check(
            self.frequency
                .as_deref()
                .is_some_and(|f| !f.trim().is_empty() && Frequency::from_label(f).is_none()),
            "frequency",
            "The selected frequency is invalid.",
        );
        v.check(
            self.submission_type != SubmissionType::Upload && self.form_template_ids.is_empty(),
            "form_template_ids",
            "At least one form template is required for form submissions.",
        );
    }
}

#[derive(Debug, Deserialize, Default, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ComplianceFilter {
    /// Matches title or category.
    pub search: Option<String>,
    pub category: Option<String>,
    pub is_active: Option<bool>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// Template summary shown with a requirement.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TemplateSummary {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    #[schema(value_type = String, example = "approved")]
    pub status: RecordStatus,
}

/// Requirement with its form templates resolved.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ComplianceWithTemplates {
    #[serde(flatten)]
    pub requirement: ComplianceRequirementRecord,
    pub form_templates: Vec<TemplateSummary>,
    /// Audits started against the requirement.
    pub audits_count: usize,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/api/compliance-requirements", get(list_active))
}

pub fn admin_router() -> Router<AppState> {
    Router::new()
        .route(
            "/admin/compliance-requirements",
            get(list_requirements).post(create_requirement),
        )
        .route(
            "/admin/compliance-requirements/:id",
            get(get_requirement)
                .put(update_requirement)
                .delete(delete_requirement),
        )
}

fn with_templates(
    state: &AppState,
    requirement: ComplianceRequirementRecord,
) -> ComplianceWithTemplates {
    let form_templates = requirement
        .form_template_ids
        .iter()
        .filter_map(|id| state.form_templates.get(id))
        .map(|t| TemplateSummary {
            id: t.id,
            name: t.name,
            description: t.description,
            status: t.status,
        })
        .collect();
    let audits_count = state.audits.count(|a| a.compliance_id == requirement.id);
    ComplianceWithTemplates {
        requirement,
        form_templates,
        audits_count,
    }
}

fn check_templates(state: &AppState, ids: &[i64]) -> Result<(), AppError> {
    let unknown: Vec<String> = ids
        .iter()
        .filter(|id| !state.form_templates.contains(id))
        .map(|id| id.to_string())
        .collect();
    if unknown.is_empty() {
        return Ok(());
    }
    Err(AppError::InvalidFields(Violations::single(
        "form_template_ids",
        format!("Unknown form template ids: {}.", unknown.join(", ")),
    )))
}

async fn persist(state: &AppState, requirement: &ComplianceRequirementRecord) {
    crate::db::write_through(
        state.db_pool.as_ref(),
        "compliance_requirement",
        requirement.id,
        |pool| crate::db::compliance::upsert(pool, requirement),
    )
    .await;
}

fn not_found(id: i64) -> AppError {
    AppError::NotFound(format!("compliance requirement {id} not found"))
}

/// GET /api/compliance-requirements: Active requirements with their templates.
#[utoipa::path(
    get,
    path = "/api/compliance-requirements",
    responses((status = 200, description = "Active requirements", body = Vec<ComplianceWithTemplates>)),
    tag = "compliance"
)]
pub(crate) async fn list_active(
    State(state): State<AppState>,
    caller: CallerIdentity,
) -> Result<Json<Vec<ComplianceWithTemplates>>, AppError> {
    require_ability(&caller, abilities::VIEW_COMPLIANCE)?;
    let requirements = state
        .compliance_requirements
        .filter(|c| c.is_active)
        .into_iter()
        .map(|c| with_templates(&state, c))
        .collect();
    Ok(Json(requirements))
}

/// GET /admin/compliance-requirements: List requirements.
#[utoipa::path(
    get,
    path = "/admin/compliance-requirements",
    params(ComplianceFilter),
    responses((status = 200, description = "Requirements", body = Vec<ComplianceWithTemplates>)),
    tag = "compliance"
)]
pub(crate) async fn list_requirements(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Query(filter): Query<ComplianceFilter>,
) -> Result<Json<Vec<ComplianceWithTemplates>>, AppError> {
    require_ability(&caller, abilities::VIEW_COMPLIANCE)?;
    let requirements = state.compliance_requirements.filter(|c| {
        let category = c.category.as_deref().unwrap_or_default();
        filter.is_active.map_or(true, |a| c.is_active == a)
            && filter
                .category
                .as_deref()
                .map_or(true, |want| category.eq_ignore_ascii_case(want))
            && matches_search(&[c.title.as_str(), category], filter.search.as_deref())
    });
    let page = PaginationParams {
        limit: filter.limit,
        offset: filter.offset,
    };
    Ok(Json(
        page.apply(requirements)
            .into_iter()
            .map(|c| with_templates(&state, c))
            .collect(),
    ))
}

/// GET /admin/compliance-requirements/{id}: One requirement.
#[utoipa::path(
    get,
    path = "/admin/compliance-requirements/{id}",
    params(("id" = i64, Path, description = "Compliance requirement ID")),
    responses(
        (status = 200, description = "Requirement found", body = ComplianceWithTemplates),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
    ),
    tag = "compliance"
)]
pub(crate) async fn get_requirement(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<i64>,
) -> Result<Json<ComplianceWithTemplates>, AppError> {
    require_ability(&caller, abilities::VIEW_COMPLIANCE)?;
    let requirement = state
        .compliance_requirements
        .get(&id)
        .ok_or_else(|| not_found(id))?;
    Ok(Json(with_templates(&state, requirement)))
}

/// POST /admin/compliance-requirements: Create a requirement.
#[utoipa::path(
    post,
    path = "/admin/compliance-requirements",
    request_body = ComplianceRequest,
    responses(
        (status = 201, description = "Requirement created", body = ComplianceRequirementRecord),
        (status = 422, description = "Validation failed", body = crate::error::ErrorBody),
    ),
    tag = "compliance"
)]
pub(crate) async fn create_requirement(
    State(state): State<AppState>,
    caller: CallerIdentity,
    body: Result<Json<ComplianceRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ComplianceRequirementRecord>), AppError> {
    require_ability(&caller, abilities::MANAGE_COMPLIANCE)?;
    let req = extract_validated_json(body)?;
    let template_ids = req.template_ids();
    check_templates(&state, &template_ids)?;

    let now = Utc::now();
    let frequency = req.frequency();
    let requirement = state
        .compliance_requirements
        .insert_with(|id| ComplianceRequirementRecord {
            id,
            title: req.title.trim().to_string(),
            description: req.description,
            category: req.category,
            frequency,
            is_active: req.is_active,
            submission_type: req.submission_type,
            document_upload_instructions: req.document_upload_instructions,
            form_template_ids: template_ids,
            created_at: now,
            updated_at: now,
        });

    persist(&state, &requirement).await;
    crate::activity::record(
        &state,
        Some(caller.user_id),
        "created",
        "compliance_requirement",
        Some(requirement.id),
        json!({ "title": requirement.title, "frequency": requirement.frequency }),
    )
    .await;
    Ok((StatusCode::CREATED, Json(requirement)))
}

/// PUT /admin/compliance-requirements/{id}: Replace a requirement.
///
/// Changing the frequency does not move due dates of existing audits.
#[utoipa::path(
    put,
    path = "/admin/compliance-requirements/{id}",
    params(("id" = i64, Path, description = "Compliance requirement ID")),
    request_body = ComplianceRequest,
    responses(
        (status = 200, description = "Requirement updated", body = ComplianceRequirementRecord),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
        (status = 422, description = "Validation failed", body = crate::error::ErrorBody),
    ),
    tag = "compliance"
)]
pub(crate) async fn update_requirement(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<i64>,
    body: Result<Json<ComplianceRequest>, JsonRejection>,
) -> Result<Json<ComplianceRequirementRecord>, AppError> {
    require_ability(&caller, abilities::MANAGE_COMPLIANCE)?;
    let req = extract_validated_json(body)?;
    let template_ids = req.template_ids();
    check_templates(&state, &template_ids)?;
    let frequency = req.frequency();

    let requirement = state
        .compliance_requirements
        .update(&id, |c| {
            c.title = req.title.trim().to_string();
            c.description = req.description;
            c.category = req.category;
            c.frequency = frequency;
            c.is_active = req.is_active;
            c.submission_type = req.submission_type;
            c.document_upload_instructions = req.document_upload_instructions;
            c.form_template_ids = template_ids;
            c.updated_at = Utc::now();
        })
        .ok_or_else(|| not_found(id))?;

    persist(&state, &requirement).await;
    crate::activity::record(
        &state,
        Some(caller.user_id),
        "updated",
        "compliance_requirement",
        Some(requirement.id),
        json!({ "title": requirement.title, "is_active": requirement.is_active }),
    )
    .await;
    Ok(Json(requirement))
}

/// DELETE /admin/compliance-requirements/{id}: Delete a requirement without audits.
#[utoipa::path(
    delete,
    path = "/admin/compliance-requirements/{id}",
    params(("id" = i64, Path, description = "Compliance requirement ID")),
    responses(
        (status = 204, description = "Requirement deleted"),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
        (status = 409, description = "Requirement has audits", body = crate::error::ErrorBody),
    ),
    tag = "compliance"
)]
pub(crate) async fn delete_requirement(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    require_ability(&caller, abilities::MANAGE_COMPLIANCE)?;
    if !state.compliance_requirements.contains(&id) {
        return Err(not_found(id));
    }
    let audits = state.audits.count(|a| a.compliance_id == id);
    if audits > 0 {
        return Err(AppError::Conflict(format!(
            "compliance requirement {id} has {audits} audit(s); deactivate it instead"
        )));
    }
    let requirement = state
        .compliance_requirements
        .remove(&id)
        .ok_or_else(|| not_found(id))?;

    crate::db::write_through(state.db_pool.as_ref(), "compliance_requirement", id, |pool| {
        crate::db::compliance::delete(pool, id)
    })
    .await;
    crate::activity::record(
        &state,
        Some(caller.user_id),
        "deleted",
        "compliance_requirement",
        Some(id),
        json!({ "title": requirement.title }),
    )
    .await;
    Ok(StatusCode::NO_CONTENT)
}
