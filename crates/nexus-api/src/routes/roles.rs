//! # Roles & Abilities API
//!
//! Roles group abilities; users hold roles. Any change here can alter the
//! effective abilities of many users, so every mutation clears the whole
//! permission cache. The `admin` role and the built-in abilities checked by
//! the API cannot be deleted.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get};
use axum::{Json, Router};
use chrono::Utc;
use nexus_core::access::{abilities, is_known_ability, ADMIN_ROLE};
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;

use crate::auth::{require_ability, CallerIdentity};
use crate::error::{AppError, Violations};
use crate::extractors::{extract_validated_json, is_blank, Validate};
use crate::state::{AbilityRecord, AppState, RoleRecord};

/// Role and ability names are lowercase kebab-case.
fn is_slug(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('-')
        && !name.ends_with('-')
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RoleRequest {
    #[schema(example = "area-manager")]
    pub name: String,
    pub title: String,
    #[serde(default)]
    pub grants_all: bool,
    #[serde(default)]
    pub ability_ids: Vec<i64>,
}

impl Validate for RoleRequest {
    fn validate(&self, v: &mut Violations) {
        v.check(
            !is_slug(&self.name),
            "name",
            "The name may only contain lowercase letters, digits and dashes.",
        );
        v.check(is_blank(&self.title), "title", "The title field is required.");
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AbilityRequest {
    #[schema(example = "export-reports")]
    pub name: String,
    pub title: String,
}

impl Validate for AbilityRequest {
    fn validate(&self, v: &mut Violations) {
        v.check(
            !is_slug(&self.name),
            "name",
            "The name may only contain lowercase letters, digits and dashes.",
        );
        v.check(is_blank(&self.title), "title", "The title field is required.");
    }
}

/// Role with resolved ability names and member count.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RoleDetail {
    #[serde(flatten)]
    pub role: RoleRecord,
    pub abilities: Vec<String>,
    pub users_count: usize,
}

/// Ability with a flag for the names the API itself checks.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AbilityDetail {
    #[serde(flatten)]
    pub ability: AbilityRecord,
    pub built_in: bool,
}

pub fn admin_router() -> Router<AppState> {
    Router::new()
        .route("/admin/roles", get(list_roles).post(create_role))
        .route(
            "/admin/roles/:id",
            get(get_role).put(update_role).delete(delete_role),
        )
        .route("/admin/abilities", get(list_abilities).post(create_ability))
        .route("/admin/abilities/:id", delete(delete_ability))
}

fn role_detail(state: &AppState, role: RoleRecord) -> RoleDetail {
    let abilities = if role.grants_all {
        vec!["*".to_string()]
    } else {
        role.ability_ids
            .iter()
            .filter_map(|id| state.abilities.get(id))
            .map(|a| a.name)
            .collect()
    };
    let users_count = state.users.count(|u| u.role_ids.contains(&role.id));
    RoleDetail {
        role,
        abilities,
        users_count,
    }
}

fn check_role_fields(
    state: &AppState,
    req: &RoleRequest,
    except: Option<i64>,
) -> Result<(), AppError> {
    let mut v = Violations::new();
    v.check(
        state
            .roles
            .find(|r| r.name == req.name && Some(r.id) != except)
            .is_some(),
        "name",
        "The name has already been taken.",
    );
    let unknown: Vec<String> = req
        .ability_ids
        .iter()
        .filter(|id| !state.abilities.contains(id))
        .map(|id| id.to_string())
        .collect();
    if !unknown.is_empty() {
        v.add(
            "ability_ids",
            format!("Unknown ability ids: {}.", unknown.join(", ")),
        );
    }
    v.into_result()
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

async fn persist_role(state: &AppState, role: &RoleRecord) {
    crate::db::write_through(state.db_pool.as_ref(), "role", role.id, |pool| {
        crate::db::roles::upsert_role(pool, role)
    })
    .await;
}

fn role_not_found(id: i64) -> AppError {
    AppError::NotFound(format!("role {id} not found"))
}

/// GET /admin/roles: Roles with their abilities.
#[utoipa::path(
    get,
    path = "/admin/roles",
    responses((status = 200, description = "Roles", body = Vec<RoleDetail>)),
    tag = "roles"
)]
pub(crate) async fn list_roles(
    State(state): State<AppState>,
    caller: CallerIdentity,
) -> Result<Json<Vec<RoleDetail>>, AppError> {
    require_ability(&caller, abilities::MANAGE_ROLES)?;
    Ok(Json(
        state
            .roles
            .list()
            .into_iter()
            .map(|r| role_detail(&state, r))
            .collect(),
    ))
}

/// GET /admin/roles/{id}: One role.
#[utoipa::path(
    get,
    path = "/admin/roles/{id}",
    params(("id" = i64, Path, description = "Role ID")),
    responses(
        (status = 200, description = "Role found", body = RoleDetail),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
    ),
    tag = "roles"
)]
pub(crate) async fn get_role(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<i64>,
) -> Result<Json<RoleDetail>, AppError> {
    require_ability(&caller, abilities::MANAGE_ROLES)?;
    let role = state.roles.get(&id).ok_or_else(|| role_not_found(id))?;
    Ok(Json(role_detail(&state, role)))
}

/// POST /admin/roles: Create a role.
#[utoipa::path(
    post,
    path = "/admin/roles",
    request_body = RoleRequest,
    responses(
        (status = 201, description = "Role created", body = RoleDetail),
        (status = 422, description = "Validation failed", body = crate::error::ErrorBody),
    ),
    tag = "roles"
)]
pub(crate) async fn create_role(
    State(state): State<AppState>,
    caller: CallerIdentity,
    body: Result<Json<RoleRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<RoleDetail>), AppError> {
    require_ability(&caller, abilities::MANAGE_ROLES)?;
    let req = extract_validated_json(body)?;
    check_role_fields(&state, &req, None)?;

    let now = Utc::now();
    let role = state.roles.insert_with(|id| RoleRecord {
        id,
        name: req.name.clone(),
        title: req.title.trim().to_string(),
        grants_all: req.grants_all,
        ability_ids: dedup(&req.ability_ids),
        created_at: now,
        updated_at: now,
    });
    state.permissions.invalidate_all();

    persist_role(&state, &role).await;
    crate::activity::record(
        &state,
        Some(caller.user_id),
        "created",
        "role",
        Some(role.id),
        json!({ "name": role.name, "ability_ids": role.ability_ids }),
    )
    .await;
    Ok((StatusCode::CREATED, Json(role_detail(&state, role))))
}

/// PUT /admin/roles/{id}: Replace a role's name, title and abilities.
#[utoipa::path(
    put,
    path = "/admin/roles/{id}",
    params(("id" = i64, Path, description = "Role ID")),
    request_body = RoleRequest,
    responses(
        (status = 200, description = "Role updated", body = RoleDetail),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
        (status = 409, description = "The admin role is fixed", body = crate::error::ErrorBody),
        (status = 422, description = "Validation failed", body = crate::error::ErrorBody),
    ),
    tag = "roles"
)]
pub(crate) async fn update_role(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<i64>,
    body: Result<Json<RoleRequest>, JsonRejection>,
) -> Result<Json<RoleDetail>, AppError> {
    require_ability(&caller, abilities::MANAGE_ROLES)?;
    let req = extract_validated_json(body)?;
    let existing = state.roles.get(&id).ok_or_else(|| role_not_found(id))?;
    if existing.name == ADMIN_ROLE && (req.name != ADMIN_ROLE || !req.grants_all) {
        return Err(AppError::Conflict(
            "the admin role must keep its name and grant every ability".into(),
        ));
    }
    check_role_fields(&state, &req, Some(id))?;

    let role = state
        .roles
        .update(&id, |r| {
            r.name = req.name.clone();
            r.title = req.title.trim().to_string();
            r.grants_all = req.grants_all;
            r.ability_ids = dedup(&req.ability_ids);
            r.updated_at = Utc::now();
        })
        .ok_or_else(|| role_not_found(id))?;
    state.permissions.invalidate_all();

    persist_role(&state, &role).await;
    crate::activity::record(
        &state,
        Some(caller.user_id),
        "updated",
        "role",
        Some(role.id),
        json!({ "name": role.name, "ability_ids": role.ability_ids }),
    )
    .await;
    Ok(Json(role_detail(&state, role)))
}

/// DELETE /admin/roles/{id}: Delete a role and unassign it from its users.
#[utoipa::path(
    delete,
    path = "/admin/roles/{id}",
    params(("id" = i64, Path, description = "Role ID")),
    responses(
        (status = 204, description = "Role deleted"),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
        (status = 409, description = "The admin role cannot be deleted", body = crate::error::ErrorBody),
    ),
    tag = "roles"
)]
pub(crate) async fn delete_role(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    require_ability(&caller, abilities::MANAGE_ROLES)?;
    let role = state.roles.get(&id).ok_or_else(|| role_not_found(id))?;
    if role.name == ADMIN_ROLE {
        return Err(AppError::Conflict("the admin role cannot be deleted".into()));
    }
    state.roles.remove(&id);
    let unassigned = state.users.update_where(
        |u| u.role_ids.contains(&id),
        |u| u.role_ids.retain(|r| *r != id),
    );
    state.permissions.invalidate_all();

    crate::db::write_through(state.db_pool.as_ref(), "role", id, |pool| {
        crate::db::roles::delete_role(pool, id)
    })
    .await;
    crate::activity::record(
        &state,
        Some(caller.user_id),
        "deleted",
        "role",
        Some(id),
        json!({ "name": role.name, "users_unassigned": unassigned.len() }),
    )
    .await;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /admin/abilities: Every ability.
#[utoipa::path(
    get,
    path = "/admin/abilities",
    responses((status = 200, description = "Abilities", body = Vec<AbilityDetail>)),
    tag = "roles"
)]
pub(crate) async fn list_abilities(
    State(state): State<AppState>,
    caller: CallerIdentity,
) -> Result<Json<Vec<AbilityDetail>>, AppError> {
    require_ability(&caller, abilities::MANAGE_ROLES)?;
    Ok(Json(
        state
            .abilities
            .list()
            .into_iter()
            .map(|a| AbilityDetail {
                built_in: is_known_ability(&a.name),
                ability: a,
            })
            .collect(),
    ))
}

/// POST /admin/abilities: Create an ability.
#[utoipa::path(
    post,
    path = "/admin/abilities",
    request_body = AbilityRequest,
    responses(
        (status = 201, description = "Ability created", body = AbilityDetail),
        (status = 422, description = "Validation failed", body = crate::error::ErrorBody),
    ),
    tag = "roles"
)]
pub(crate) async fn create_ability(
    State(state): State<AppState>,
    caller: CallerIdentity,
    body: Result<Json<AbilityRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<AbilityDetail>), AppError> {
    require_ability(&caller, abilities::MANAGE_ROLES)?;
    let req = extract_validated_json(body)?;
    if state.abilities.find(|a| a.name == req.name).is_some() {
        return Err(AppError::InvalidFields(Violations::single(
            "name",
            "The name has already been taken.",
        )));
    }

    let ability = state.abilities.insert_with(|id| AbilityRecord {
        id,
        name: req.name,
        title: req.title.trim().to_string(),
        created_at: Utc::now(),
    });
    state.permissions.invalidate_all();

    crate::db::write_through(state.db_pool.as_ref(), "ability", ability.id, |pool| {
        crate::db::roles::upsert_ability(pool, &ability)
    })
    .await;
    crate::activity::record(
        &state,
        Some(caller.user_id),
        "created",
        "ability",
        Some(ability.id),
        json!({ "name": ability.name }),
    )
    .await;
    Ok((
        StatusCode::CREATED,
        Json(AbilityDetail {
            built_in: is_known_ability(&ability.name),
            ability,
        }),
    ))
}

/// DELETE /admin/abilities/{id}: Delete a custom ability.
#[utoipa::path(
    delete,
    path = "/admin/abilities/{id}",
    params(("id" = i64, Path, description = "Ability ID")),
    responses(
        (status = 204, description = "Ability deleted"),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
        (status = 409, description = "Built-in abilities cannot be deleted", body = crate::error::ErrorBody),
    ),
    tag = "roles"
)]
pub(crate) async fn delete_ability(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    require_ability(&caller, abilities::MANAGE_ROLES)?;
    let ability = state
        .abilities
        .get(&id)
        .ok_or_else(|| AppError::NotFound(format!("ability {id} not found")))?;
    if is_known_ability(&ability.name) {
        return Err(AppError::Conflict(format!(
            "ability {} is built in and cannot be deleted",
            ability.name
        )));
    }
    state.abilities.remove(&id);
    state.roles.update_where(
        |r| r.ability_ids.contains(&id),
        |r| r.ability_ids.retain(|a| *a != id),
    );
    state.permissions.invalidate_all();

    crate::db::write_through(state.db_pool.as_ref(), "ability", id, |pool| {
        crate::db::roles::delete_ability(pool, id)
    })
    .await;
    crate::activity::record(
        &state,
        Some(caller.user_id),
        "deleted",
        "ability",
        Some(id),
        json!({ "name": ability.name }),
    )
    .await;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugs_are_lowercase_kebab_case() {
        assert!(is_slug("outlet-user"));
        assert!(is_slug("view-activity-logs"));
        assert!(!is_slug("Outlet User"));
        assert!(!is_slug("-leading"));
        assert!(!is_slug(""));
    }
}
