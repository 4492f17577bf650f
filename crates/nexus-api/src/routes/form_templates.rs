//! # Form Templates API
//!
//! Templates describe the questions of a compliance form as `sections[]`,
//! each holding `fields[]`. The structure is validated on every write.
//! Template status follows the record lifecycle, so publishing a draft is
//! `draft -> pending -> approved`.

use std::str::FromStr;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use nexus_core::access::abilities;
use nexus_core::{FormStructure, RecordStatus};
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::{IntoParams, ToSchema};

use crate::auth::{require_ability, CallerIdentity};
use crate::error::{AppError, Violations};
use crate::extractors::{extract_validated_json, is_blank, Validate};
use crate::routes::{matches_search, PaginationParams};
use crate::state::{AppState, FormTemplateRecord};

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateTemplateRequest {
    pub name: String,
    pub description: Option<String>,
    /// `{"sections": [{"title", "fields": [{"id", "label", "type", "required"?, "options"?}]}]}`
    pub structure: serde_json::Value,
}

impl Validate for CreateTemplateRequest {
    fn validate(&self, v: &mut Violations) {
        v.check(is_blank(&self.name), "name", "The name field is required.");
        check_structure(v, Some(&self.structure));
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateTemplateRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub structure: Option<serde_json::Value>,
    /// Next lifecycle status.
    #[schema(example = "pending")]
    pub status: Option<String>,
}

impl Validate for UpdateTemplateRequest {
    fn validate(&self, v: &mut Violations) {
        v.check(
            self.name.as_deref().is_some_and(is_blank),
            "name",
            "The name field is required.",
        );
        check_structure(v, self.structure.as_ref());
        v.check(
            self.status
                .as_deref()
                .is_some_and(|s| RecordStatus::from_name(s).is_none()),
            "status",
            "The selected status is invalid.",
        );
    }
}

fn check_structure(v: &mut Violations, structure: Option<&serde_json::Value>) {
    if let Some(Err(e)) = structure.map(FormStructure::parse) {
        v.add("structure", e.to_string());
    }
}

#[derive(Debug, Deserialize, Default, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct TemplateFilter {
    /// Matches name or description.
    pub search: Option<String>,
    pub status: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// Template with usage counts.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TemplateDetail {
    #[serde(flatten)]
    pub template: FormTemplateRecord,
    pub field_count: usize,
    /// Requirements the template is attached to.
    pub compliance_ids: Vec<i64>,
    /// Audit forms submitted against the template.
    pub submissions_count: usize,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/api/form-templates/:id", get(get_template))
}

pub fn admin_router() -> Router<AppState> {
    Router::new()
        .route("/admin/form-templates", get(list_templates).post(create_template))
        .route(
            "/admin/form-templates/:id",
            get(admin_get_template)
                .put(update_template)
                .delete(delete_template),
        )
}

fn detail(state: &AppState, template: FormTemplateRecord) -> TemplateDetail {
    let field_count = FormStructure::parse(&template.structure)
        .map(|s| s.field_count())
        .unwrap_or(0);
    let compliance_ids = state
        .compliance_requirements
        .filter(|c| c.form_template_ids.contains(&template.id))
        .into_iter()
        .map(|c| c.id)
        .collect();
    let submissions_count = state.audit_forms.count(|f| f.form_id == template.id);
    TemplateDetail {
        template,
        field_count,
        compliance_ids,
        submissions_count,
    }
}

async fn persist(state: &AppState, template: &FormTemplateRecord) {
    crate::db::write_through(state.db_pool.as_ref(), "form_template", template.id, |pool| {
        crate::db::form_templates::upsert(pool, template)
    })
    .await;
}

fn not_found(id: i64) -> AppError {
    AppError::NotFound(format!("form template {id} not found"))
}

/// GET /api/form-templates/{id}: A template for rendering on the device.
#[utoipa::path(
    get,
    path = "/api/form-templates/{id}",
    params(("id" = i64, Path, description = "Form template ID")),
    responses(
        (status = 200, description = "Template found", body = FormTemplateRecord),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
    ),
    tag = "form-templates"
)]
pub(crate) async fn get_template(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<i64>,
) -> Result<Json<FormTemplateRecord>, AppError> {
    require_ability(&caller, abilities::VIEW_COMPLIANCE)?;
    state
        .form_templates
        .get(&id)
        .map(Json)
        .ok_or_else(|| not_found(id))
}

/// GET /admin/form-templates: List templates.
#[utoipa::path(
    get,
    path = "/admin/form-templates",
    params(TemplateFilter),
    responses((status = 200, description = "Templates", body = Vec<TemplateDetail>)),
    tag = "form-templates"
)]
pub(crate) async fn list_templates(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Query(filter): Query<TemplateFilter>,
) -> Result<Json<Vec<TemplateDetail>>, AppError> {
    require_ability(&caller, abilities::MANAGE_FORMS)?;
    let status = filter
        .status
        .as_deref()
        .map(RecordStatus::from_str)
        .transpose()?;
    let templates = state.form_templates.filter(|t| {
        status.map_or(true, |s| t.status == s)
            && matches_search(
                &[t.name.as_str(), t.description.as_deref().unwrap_or_default()],
                filter.search.as_deref(),
            )
    });
    let page = PaginationParams {
        limit: filter.limit,
        offset: filter.offset,
    };
    Ok(Json(
        page.apply(templates)
            .into_iter()
            .map(|t| detail(&state, t))
            .collect(),
    ))
}

/// GET /admin/form-templates/{id}: One template with usage.
#[utoipa::path(
    get,
    path = "/admin/form-templates/{id}",
    params(("id" = i64, Path, description = "Form template ID")),
    responses(
        (status = 200, description = "Template found", body = TemplateDetail),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
    ),
    tag = "form-templates"
)]
pub(crate) async fn admin_get_template(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<i64>,
) -> Result<Json<TemplateDetail>, AppError> {
    require_ability(&caller, abilities::MANAGE_FORMS)?;
    let template = state.form_templates.get(&id).ok_or_else(|| not_found(id))?;
    Ok(Json(detail(&state, template)))
}

/// POST /admin/form-templates: Create a draft template.
#[utoipa::path(
    post,
    path = "/admin/form-templates",
    request_body = CreateTemplateRequest,
    responses(
        (status = 201, description = "Template created", body = FormTemplateRecord),
        (status = 422, description = "Invalid structure", body = crate::error::ErrorBody),
    ),
    tag = "form-templates"
)]
pub(crate) async fn create_template(
    State(state): State<AppState>,
    caller: CallerIdentity,
    body: Result<Json<CreateTemplateRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<FormTemplateRecord>), AppError> {
    require_ability(&caller, abilities::MANAGE_FORMS)?;
    let req = extract_validated_json(body)?;

    let now = Utc::now();
    let template = state.form_templates.insert_with(|id| FormTemplateRecord {
        id,
        name: req.name.trim().to_string(),
        description: req.description,
        structure: req.structure,
        status: RecordStatus::Draft,
        created_by: Some(caller.user_id),
        created_at: now,
        updated_at: now,
    });

    persist(&state, &template).await;
    crate::activity::record(
        &state,
        Some(caller.user_id),
        "created",
        "form_template",
        Some(template.id),
        json!({ "name": template.name }),
    )
    .await;
    Ok((StatusCode::CREATED, Json(template)))
}

/// PUT /admin/form-templates/{id}: Update fields and optionally advance status.
#[utoipa::path(
    put,
    path = "/admin/form-templates/{id}",
    params(("id" = i64, Path, description = "Form template ID")),
    request_body = UpdateTemplateRequest,
    responses(
        (status = 200, description = "Template updated", body = FormTemplateRecord),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
        (status = 409, description = "Status transition not allowed", body = crate::error::ErrorBody),
        (status = 422, description = "Invalid structure", body = crate::error::ErrorBody),
    ),
    tag = "form-templates"
)]
pub(crate) async fn update_template(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<i64>,
    body: Result<Json<UpdateTemplateRequest>, JsonRejection>,
) -> Result<Json<FormTemplateRecord>, AppError> {
    require_ability(&caller, abilities::MANAGE_FORMS)?;
    let req = extract_validated_json(body)?;
    let target = req.status.as_deref().and_then(RecordStatus::from_name);

    let (template, previous) = state
        .form_templates
        .try_update(&id, |t| {
            let previous = t.status;
            if let Some(target) = target.filter(|s| *s != t.status) {
                t.status = t.status.transition_to(target)?;
            }
            if let Some(name) = &req.name {
                t.name = name.trim().to_string();
            }
            if req.description.is_some() {
                t.description = req.description.clone();
            }
            if let Some(structure) = &req.structure {
                t.structure = structure.clone();
            }
            t.updated_at = Utc::now();
            Ok::<_, AppError>((t.clone(), previous))
        })
        .ok_or_else(|| not_found(id))??;

    persist(&state, &template).await;
    crate::activity::record(
        &state,
        Some(caller.user_id),
        "updated",
        "form_template",
        Some(template.id),
        json!({ "name": template.name, "from": previous, "status": template.status }),
    )
    .await;
    Ok(Json(template))
}

/// DELETE /admin/form-templates/{id}: Delete an unused template.
#[utoipa::path(
    delete,
    path = "/admin/form-templates/{id}",
    params(("id" = i64, Path, description = "Form template ID")),
    responses(
        (status = 204, description = "Template deleted"),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
        (status = 409, description = "Template attached or in use", body = crate::error::ErrorBody),
    ),
    tag = "form-templates"
)]
pub(crate) async fn delete_template(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    require_ability(&caller, abilities::MANAGE_FORMS)?;
    let template = state.form_templates.get(&id).ok_or_else(|| not_found(id))?;
    let usage = detail(&state, template);
    if !usage.compliance_ids.is_empty() || usage.submissions_count > 0 {
        return Err(AppError::Conflict(format!(
            "form template {id} is attached to {} requirement(s) and has {} submission(s)",
            usage.compliance_ids.len(),
            usage.submissions_count
        )));
    }
    state.form_templates.remove(&id);

    crate::db::write_through(state.db_pool.as_ref(), "form_template", id, |pool| {
        crate::db::form_templates::delete(pool, id)
    })
    .await;
    crate::activity::record(
        &state,
        Some(caller.user_id),
        "deleted",
        "form_template",
        Some(id),
        json!({ "name": usage.template.name }),
    )
    .await;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structure_errors_land_on_the_structure_field() {
        let req = CreateTemplateRequest {
            name: "Kitchen".into(),
            description: None,
            structure: json!({ "sections": [] }),
        };
        let mut v = Violations::new();
        req.validate(&mut v);
        let messages = v.get("structure").unwrap();
        assert!(messages[0].contains("at least one section"));
    }

    #[test]
    fn update_rejects_unknown_status_names() {
        let req = UpdateTemplateRequest {
            name: None,
            description: None,
            structure: None,
            status: Some("published".into()),
        };
        let mut v = Violations::new();
        req.validate(&mut v);
        assert!(v.get("status").is_some());
        assert!(v.get("structure").is_none());
    }
}
