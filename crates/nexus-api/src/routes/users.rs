//! # Users API
//!
//! Account administration. Role assignments feed the permission cache, so
//! every change to `role_ids` invalidates the user's cached abilities.
//! Deactivating an account or changing its password revokes its sessions.

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

use crate::auth::{self, require_ability, CallerIdentity};
use crate::error::{AppError, Violations};
use crate::extractors::{extract_validated_json, is_blank, looks_like_email, Validate};
use crate::routes::account::check_new_password;
use crate::routes::{matches_search, PaginationParams};
use crate::state::{AppState, UserRecord, UserView};

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateUserRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub role_ids: Vec<i64>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

impl Validate for CreateUserRequest {
    fn validate(&self, v: &mut Violations) {
        v.check(is_blank(&self.name), "name", "The name field is required.");
        v.check(
            !looks_like_email(&self.email),
            "email",
            "The email must be a valid email address.",
        );
        check_new_password(v, &self.password, None);
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateUserRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    /// New password; existing sessions are revoked.
    pub password: Option<String>,
    /// Replaces the role assignment when present.
    pub role_ids: Option<Vec<i64>>,
    pub is_active: Option<bool>,
}

impl Validate for UpdateUserRequest {
    fn validate(&self, v: &mut Violations) {
        v.check(
            self.name.as_deref().is_some_and(is_blank),
            "name",
            "The name field is required.",
        );
        v.check(
            self.email.as_deref().is_some_and(|e| !looks_like_email(e)),
            "email",
            "The email must be a valid email address.",
        );
        if let Some(password) = &self.password {
            check_new_password(v, password, None);
        }
    }
}

#[derive(Debug, Deserialize, Default, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct UserFilter {
    /// Matches name or email.
    pub search: Option<String>,
    /// Role name, e.g. `manager`.
    pub role: Option<String>,
    pub is_active: Option<bool>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

pub fn admin_router() -> Router<AppState> {
    Router::new()
        .route("/admin/users", get(list_users).post(create_user))
        .route(
            "/admin/users/:id",
            get(get_user).put(update_user).delete(delete_user),
        )
}

fn check_email_free(state: &AppState, email: &str, except: Option<i64>) -> Result<(), AppError> {
    let taken = state
        .users
        .find(|u| u.email.eq_ignore_ascii_case(email.trim()) && Some(u.id) != except)
        .is_some();
    if taken {
        return Err(AppError::InvalidFields(Violations::single(
            "email",
            "The email has already been taken.",
        )));
    }
    Ok(())
}

fn check_roles(state: &AppState, role_ids: &[i64]) -> Result<(), AppError> {
    let unknown: Vec<String> = role_ids
        .iter()
        .filter(|id| !state.roles.contains(id))
        .map(|id| id.to_string())
        .collect();
    if unknown.is_empty() {
        return Ok(());
    }
    Err(AppError::InvalidFields(Violations::single(
        "role_ids",
        format!("Unknown role ids: {}.", unknown.join(", ")),
    )))
}

fn dedup(ids: &[i64]) -> Vec<i64> {
    let mut out: Vec<i64> = Vec::with_capacity(ids.len());
    for id in ids {
        if !out.contains(id) {
            out.push(*id);
        }
    }
    out
}

async fn persist(state: &AppState, user: &UserRecord) {
    crate::db::write_through(state.db_pool.as_ref(), "user", user.id, |pool| {
        crate::db::users::upsert(pool, user)
    })
    .await;
}

fn not_found(id: i64) -> AppError {
    AppError::NotFound(format!("user {id} not found"))
}

/// GET /admin/users: List users with their roles.
#[utoipa::path(
    get,
    path = "/admin/users",
    params(UserFilter),
    responses((status = 200, description = "Users", body = Vec<UserView>)),
    tag = "users"
)]
pub(crate) async fn list_users(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Query(filter): Query<UserFilter>,
) -> Result<Json<Vec<UserView>>, AppError> {
    require_ability(&caller, abilities::VIEW_USERS)?;
    let role_id = match filter.role.as_deref() {
        Some(name) => match state.roles.find(|r| r.name == name) {
            Some(role) => Some(role.id),
            None => return Ok(Json(Vec::new())),
        },
        None => None,
    };
    let users = state.users.filter(|u| {
        filter.is_active.map_or(true, |a| u.is_active == a)
            && role_id.map_or(true, |id| u.role_ids.contains(&id))
            && matches_search(&[u.name.as_str(), u.email.as_str()], filter.search.as_deref())
    });
    let page = PaginationParams {
        limit: filter.limit,
        offset: filter.offset,
    };
    Ok(Json(
        page.apply(users)
            .iter()
            .map(|u| state.user_view(u))
            .collect(),
    ))
}

/// GET /admin/users/{id}: One user.
#[utoipa::path(
    get,
    path = "/admin/users/{id}",
    params(("id" = i64, Path, description = "User ID")),
    responses(
        (status = 200, description = "User found", body = UserView),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
    ),
    tag = "users"
)]
pub(crate) async fn get_user(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<i64>,
) -> Result<Json<UserView>, AppError> {
    require_ability(&caller, abilities::VIEW_USERS)?;
    let user = state.users.get(&id).ok_or_else(|| not_found(id))?;
    Ok(Json(state.user_view(&user)))
}

/// POST /admin/users: Create an account.
#[utoipa::path(
    post,
    path = "/admin/users",
    request_body = CreateUserRequest,
    responses(
        (status = 201, description = "User created", body = UserView),
        (status = 422, description = "Validation failed", body = crate::error::ErrorBody),
    ),
    tag = "users"
)]
pub(crate) async fn create_user(
    State(state): State<AppState>,
    caller: CallerIdentity,
    body: Result<Json<CreateUserRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<UserView>), AppError> {
    require_ability(&caller, abilities::CREATE_USERS)?;
    let req = extract_validated_json(body)?;
    check_email_free(&state, &req.email, None)?;
    let role_ids = dedup(&req.role_ids);
    check_roles(&state, &role_ids)?;

    let now = Utc::now();
    let password_hash = auth::hash_password(&req.password, state.config.password_iterations);
    let user = state.users.insert_with(|id| UserRecord {
        id,
        name: req.name.trim().to_string(),
        email: req.email.trim().to_string(),
        password_hash,
        role_ids,
        is_active: req.is_active,
        created_at: now,
        updated_at: now,
    });
    state.permissions.invalidate_user(user.id);

    persist(&state, &user).await;
    crate::activity::record(
        &state,
        Some(caller.user_id),
        "created",
        "user",
        Some(user.id),
        json!({ "email": user.email, "role_ids": user.role_ids }),
    )
    .await;
    Ok((StatusCode::CREATED, Json(state.user_view(&user))))
}

/// PUT /admin/users/{id}: Update an account.
#[utoipa::path(
    put,
    path = "/admin/users/{id}",
    params(("id" = i64, Path, description = "User ID")),
    request_body = UpdateUserRequest,
    responses(
        (status = 200, description = "User updated", body = UserView),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
        (status = 409, description = "Cannot deactivate yourself", body = crate::error::ErrorBody),
        (status = 422, description = "Validation failed", body = crate::error::ErrorBody),
    ),
    tag = "users"
)]
pub(crate) async fn update_user(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<i64>,
    body: Result<Json<UpdateUserRequest>, JsonRejection>,
) -> Result<Json<UserView>, AppError> {
    require_ability(&caller, abilities::EDIT_USERS)?;
    let req = extract_validated_json(body)?;
    if !state.users.contains(&id) {
        return Err(not_found(id));
    }
    if id == caller.user_id && req.is_active == Some(false) {
        return Err(AppError::Conflict("you cannot deactivate your own account".into()));
    }
    if let Some(email) = &req.email {
        check_email_free(&state, email, Some(id))?;
    }
    let role_ids = req.role_ids.as_deref().map(dedup);
    if let Some(role_ids) = &role_ids {
        if id == caller.user_id {
            // Role edits on oneself go through another administrator.
            return Err(AppError::Conflict("you cannot change your own roles".into()));
        }
        check_roles(&state, role_ids)?;
    }
    let password_hash = req
        .password
        .as_deref()
        .map(|p| auth::hash_password(p, state.config.password_iterations));
    let password_changed = password_hash.is_some();

    let user = state
        .users
        .update(&id, |u| {
            if let Some(name) = &req.name {
                u.name = name.trim().to_string();
            }
            if let Some(email) = &req.email {
                u.email = email.trim().to_string();
            }
            if let Some(hash) = password_hash {
                u.password_hash = hash;
            }
            if let Some(role_ids) = role_ids {
                u.role_ids = role_ids;
            }
            if let Some(active) = req.is_active {
                u.is_active = active;
            }
            u.updated_at = Utc::now();
        })
        .ok_or_else(|| not_found(id))?;
    state.permissions.invalidate_user(id);

    persist(&state, &user).await;
    let revoked = if password_changed || !user.is_active {
        auth::revoke_user_sessions(&state, id).await
    } else {
        0
    };
    crate::activity::record(
        &state,
        Some(caller.user_id),
        "updated",
        "user",
        Some(id),
        json!({
            "email": user.email,
            "role_ids": user.role_ids,
            "is_active": user.is_active,
            "sessions_revoked": revoked,
        }),
    )
    .await;
    Ok(Json(state.user_view(&user)))
}

/// DELETE /admin/users/{id}: Delete an account without audits.
///
/// Outlet assignments, raised issues, corrective action assignments and
/// authored templates of the user are kept and unlinked.
#[utoipa::path(
    delete,
    path = "/admin/users/{id}",
    params(("id" = i64, Path, description = "User ID")),
    responses(
        (status = 204, description = "User deleted"),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
        (status = 409, description = "User has audits or is the caller", body = crate::error::ErrorBody),
    ),
    tag = "users"
)]
pub(crate) async fn delete_user(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    require_ability(&caller, abilities::DELETE_USERS)?;
    if id == caller.user_id {
        return Err(AppError::Conflict("you cannot delete your own account".into()));
    }
    if !state.users.contains(&id) {
        return Err(not_found(id));
    }
    let audits = state.audits.count(|a| a.user_id == id);
    if audits > 0 {
        return Err(AppError::Conflict(format!(
            "user {id} has started {audits} audit(s); deactivate the account instead"
        )));
    }
    let user = state.users.remove(&id).ok_or_else(|| not_found(id))?;
    state.permissions.invalidate_user(id);
    state.sessions.write().retain(|_, s| s.user_id != id);

    // Rows in Postgres are unlinked by ON DELETE SET NULL.
    let now = Utc::now();
    state.outlets.update_where(
        |o| o.outlet_user_id == Some(id) || o.manager_id == Some(id),
        |o| {
            if o.outlet_user_id == Some(id) {
                o.outlet_user_id = None;
            }
            if o.manager_id == Some(id) {
                o.manager_id = None;
            }
            o.updated_at = now;
        },
    );
    state
        .issues
        .update_where(|i| i.raised_by == Some(id), |i| i.raised_by = None);
    state
        .corrective_actions
        .update_where(|c| c.assigned_to == Some(id), |c| c.assigned_to = None);
    state
        .form_templates
        .update_where(|t| t.created_by == Some(id), |t| t.created_by = None);

    crate::db::write_through(state.db_pool.as_ref(), "user", id, |pool| {
        crate::db::users::delete(pool, id)
    })
    .await;
    crate::activity::record(
        &state,
        Some(caller.user_id),
        "deleted",
        "user",
        Some(id),
        json!({ "email": user.email }),
    )
    .await;
    Ok(StatusCode::NO_CONTENT)
}
