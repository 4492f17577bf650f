//! # Outlets API
//!
//! The mobile app reads a single outlet; the assigned outlet user may read
//! their own outlet without `view-outlets`. Management lives under
//! `/admin/outlets`. `PUT` replaces the editable fields.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use nexus_core::access::abilities;
use serde::Deserialize;
use serde_json::json;
use utoipa::{IntoParams, ToSchema};

use crate::auth::{require_ability, CallerIdentity};
use crate::error::{AppError, Violations};
use crate::extractors::{extract_validated_json, is_blank, Validate};
use crate::routes::{matches_search, PaginationParams};
use crate::state::{AppState, OutletRecord};

#[derive(Debug, Deserialize, ToSchema)]
pub struct OutletRequest {
    pub name: String,
    pub address: String,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub phone_number: Option<String>,
    #[serde(default)]
    pub operating_hours_info: Option<serde_json::Value>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    pub outlet_user_id: Option<i64>,
    pub manager_id: Option<i64>,
}

fn default_true() -> bool {
    true
}

impl Validate for OutletRequest {
    fn validate(&self, v: &mut Violations) {
        for (field, value) in [
            ("name", &self.name),
            ("address", &self.address),
            ("city", &self.city),
            ("state", &self.state),
            ("postal_code", &self.postal_code),
        ] {
            v.check(
                is_blank(value),
                field,
                &format!("The {} field is required.", field.replace('_', " ")),
            );
        }
        v.check(
            self.name.chars().count() > 255,
            "name",
            "The name may not be greater than 255 characters.",
        );
        v.check(
            self.operating_hours_info
                .as_ref()
                .is_some_and(|h| !h.is_object() && !h.is_null()),
            "operating_hours_info",
            "The operating hours info must be an object.",
        );
    }
}

#[derive(Debug, Deserialize, Default, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct OutletFilter {
    /// Matches name, city or postal code.
    pub search: Option<String>,
    pub is_active: Option<bool>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/api/outlets/:id", get(get_outlet))
}

pub fn admin_router() -> Router<AppState> {
    Router::new()
        .route("/admin/outlets", get(list_outlets).post(create_outlet))
        .route(
            "/admin/outlets/:id",
            get(admin_get_outlet).put(update_outlet).delete(delete_outlet),
        )
}

fn check_assignees(state: &AppState, req: &OutletRequest) -> Result<(), AppError> {
    let mut v = Violations::new();
    v.check(
        req.outlet_user_id.is_some_and(|id| !state.users.contains(&id)),
        "outlet_user_id",
        "The selected outlet user id is invalid.",
    );
    v.check(
        req.manager_id.is_some_and(|id| !state.users.contains(&id)),
        "manager_id",
        "The selected manager id is invalid.",
    );
    v.into_result()
}

fn hours(value: Option<serde_json::Value>) -> serde_json::Value {
    value
        .filter(|h| h.is_object())
        .unwrap_or_else(|| json!({}))
}

async fn persist(state: &AppState, outlet: &OutletRecord) {
    crate::db::write_through(state.db_pool.as_ref(), "outlet", outlet.id, |pool| {
        crate::db::outlets::upsert(pool, outlet)
    })
    .await;
}

fn not_found(id: i64) -> AppError {
    AppError::NotFound(format!("outlet {id} not found"))
}

/// GET /api/outlets/{id}: Outlet details for the mobile app.
#[utoipa::path(
    get,
    path = "/api/outlets/{id}",
    params(("id" = i64, Path, description = "Outlet ID")),
    responses(
        (status = 200, description = "Outlet found", body = OutletRecord),
        (status = 403, description = "Outlet not visible to caller", body = crate::error::ErrorBody),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
    ),
    tag = "outlets"
)]
pub(crate) async fn get_outlet(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<i64>,
) -> Result<Json<OutletRecord>, AppError> {
    let outlet = state.outlets.get(&id).ok_or_else(|| not_found(id))?;
    if outlet.outlet_user_id != Some(caller.user_id) {
        require_ability(&caller, abilities::VIEW_OUTLETS)?;
    }
    Ok(Json(outlet))
}

/// GET /admin/outlets: List outlets.
#[utoipa::path(
    get,
    path = "/admin/outlets",
    params(OutletFilter),
    responses((status = 200, description = "Outlets", body = Vec<OutletRecord>)),
    tag = "outlets"
)]
pub(crate) async fn list_outlets(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Query(filter): Query<OutletFilter>,
) -> Result<Json<Vec<OutletRecord>>, AppError> {
    require_ability(&caller, abilities::VIEW_OUTLETS)?;
    let outlets = state.outlets.filter(|o| {
        filter.is_active.map_or(true, |a| o.is_active == a)
            && matches_search(
                &[o.name.as_str(), o.city.as_str(), o.postal_code.as_str()],
                filter.search.as_deref(),
            )
    });
    let page = PaginationParams {
        limit: filter.limit,
        offset: filter.offset,
    };
    Ok(Json(page.apply(outlets)))
}

/// GET /admin/outlets/{id}: One outlet.
#[utoipa::path(
    get,
    path = "/admin/outlets/{id}",
    params(("id" = i64, Path, description = "Outlet ID")),
    responses(
        (status = 200, description = "Outlet found", body = OutletRecord),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
    ),
    tag = "outlets"
)]
pub(crate) async fn admin_get_outlet(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<i64>,
) -> Result<Json<OutletRecord>, AppError> {
    require_ability(&caller, abilities::VIEW_OUTLETS)?;
    state.outlets.get(&id).map(Json).ok_or_else(|| not_found(id))
}

/// POST /admin/outlets: Create an outlet.
#[utoipa::path(
    post,
    path = "/admin/outlets",
    request_body = OutletRequest,
    responses(
        (status = 201, description = "Outlet created", body = OutletRecord),
        (status = 422, description = "Validation failed", body = crate::error::ErrorBody),
    ),
    tag = "outlets"
)]
pub(crate) async fn create_outlet(
    State(state): State<AppState>,
    caller: CallerIdentity,
    body: Result<Json<OutletRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<OutletRecord>), AppError> {
    require_ability(&caller, abilities::MANAGE_OUTLETS)?;
    let req = extract_validated_json(body)?;
    check_assignees(&state, &req)?;

    let now = Utc::now();
    let outlet = state.outlets.insert_with(|id| OutletRecord {
        id,
        name: req.name.trim().to_string(),
        address: req.address,
        city: req.city,
        state: req.state,
        postal_code: req.postal_code,
        phone_number: req.phone_number,
        operating_hours_info: hours(req.operating_hours_info),
        is_active: req.is_active,
        outlet_user_id: req.outlet_user_id,
        manager_id: req.manager_id,
        created_at: now,
        updated_at: now,
    });

    persist(&state, &outlet).await;
    crate::activity::record(
        &state,
        Some(caller.user_id),
        "created",
        "outlet",
        Some(outlet.id),
        json!({ "name": outlet.name }),
    )
    .await;
    Ok((StatusCode::CREATED, Json(outlet)))
}

/// PUT /admin/outlets/{id}: Replace an outlet's details and assignments.
#[utoipa::path(
    put,
    path = "/admin/outlets/{id}",
    params(("id" = i64, Path, description = "Outlet ID")),
    request_body = OutletRequest,
    responses(
        (status = 200, description = "Outlet updated", body = OutletRecord),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
        (status = 422, description = "Validation failed", body = crate::error::ErrorBody),
    ),
    tag = "outlets"
)]
pub(crate) async fn update_outlet(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<i64>,
    body: Result<Json<OutletRequest>, JsonRejection>,
) -> Result<Json<OutletRecord>, AppError> {
    require_ability(&caller, abilities::MANAGE_OUTLETS)?;
    let req = extract_validated_json(body)?;
    check_assignees(&state, &req)?;

    let outlet = state
        .outlets
        .update(&id, |o| {
            o.name = req.name.trim().to_string();
            o.address = req.address;
            o.city = req.city;
            o.state = req.state;
            o.postal_code = req.postal_code;
            o.phone_number = req.phone_number;
            o.operating_hours_info = hours(req.operating_hours_info);
            o.is_active = req.is_active;
            o.outlet_user_id = req.outlet_user_id;
            o.manager_id = req.manager_id;
            o.updated_at = Utc::now();
        })
        .ok_or_else(|| not_found(id))?;

    persist(&state, &outlet).await;
    crate::activity::record(
        &state,
        Some(caller.user_id),
        "updated",
        "outlet",
        Some(outlet.id),
        json!({ "name": outlet.name, "is_active": outlet.is_active }),
    )
    .await;
    Ok(Json(outlet))
}

/// DELETE /admin/outlets/{id}: Delete an outlet that has no audits.
#[utoipa::path(
    delete,
    path = "/admin/outlets/{id}",
    params(("id" = i64, Path, description = "Outlet ID")),
    responses(
        (status = 204, description = "Outlet deleted"),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
        (status = 409, description = "Outlet has audits", body = crate::error::ErrorBody),
    ),
    tag = "outlets"
)]
pub(crate) async fn delete_outlet(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    require_ability(&caller, abilities::MANAGE_OUTLETS)?;
    if !state.outlets.contains(&id) {
        return Err(not_found(id));
    }
    let audits = state.audits.count(|a| a.outlet_id == id);
    if audits > 0 {
        return Err(AppError::Conflict(format!(
            "outlet {id} has {audits} audit(s); deactivate it instead"
        )));
    }
    let outlet = state.outlets.remove(&id).ok_or_else(|| not_found(id))?;

    crate::db::write_through(state.db_pool.as_ref(), "outlet", id, |pool| {
        crate::db::outlets::delete(pool, id)
    })
    .await;
    crate::activity::record(
        &state,
        Some(caller.user_id),
        "deleted",
        "outlet",
        Some(id),
        json!({ "name": outlet.name }),
    )
    .await;
    Ok(StatusCode::NO_CONTENT)
}
