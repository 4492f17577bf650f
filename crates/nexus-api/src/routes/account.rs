//! # Account API
//!
//! Login issues a bearer session token; logout revokes the presented one.
//! Forgot-password answers identically for known and unknown addresses and
//! never returns the reset token; delivery goes through the `nexus::mail`
//! log target. A successful reset revokes every session of the account.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;

use crate::auth::{self, CallerIdentity};
use crate::error::{AppError, Violations};
use crate::extractors::{extract_validated_json, is_blank, looks_like_email, Validate};
use crate::state::{AppState, UserView};

/// Minimum length of a new password.
pub const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    /// Label for the session, e.g. the phone model.
    pub device_name: Option<String>,
}

impl Validate for LoginRequest {
    fn validate(&self, v: &mut Violations) {
        v.check(is_blank(&self.email), "email", "The email field is required.");
        v.check(
            !is_blank(&self.email) && !looks_like_email(&self.email),
            "email",
            "The email must be a valid email address.",
        );
        v.check(self.password.is_empty(), "password", "The password field is required.");
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LoginResponse {
    /// Bearer token for the `Authorization` header.
    pub token: String,
    pub user: UserView,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

impl Validate for ForgotPasswordRequest {
    fn validate(&self, v: &mut Violations) {
        v.check(
            !looks_like_email(&self.email),
            "email",
            "The email must be a valid email address.",
        );
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ResetPasswordRequest {
    pub email: String,
    pub token: String,
    pub password: String,
    pub password_confirmation: String,
}

impl Validate for ResetPasswordRequest {
    fn validate(&self, v: &mut Violations) {
        v.check(
            !looks_like_email(&self.email),
            "email",
            "The email must be a valid email address.",
        );
        v.check(is_blank(&self.token), "token", "The token field is required.");
        check_new_password(v, &self.password, Some(&self.password_confirmation));
    }
}

/// Shared password rules for reset and user administration.
pub(crate) fn check_new_password(v: &mut Violations, password: &str, confirmation: Option<&str>) {
    v.check(
        password.chars().count() < MIN_PASSWORD_LEN,
        "password",
        "The password must be at least 8 characters.",
    );
    if let Some(confirmation) = confirmation {
        v.check(
            password != confirmation,
            "password",
            "The password confirmation does not match.",
        );
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    fn new(message: &str) -> Json<Self> {
        Json(Self {
            message: message.to_string(),
        })
    }
}

/// Unauthenticated account routes.
pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/api/login", post(login))
        .route("/api/forgot-password", post(forgot_password))
        .route("/api/reset-password", post(reset_password))
}

/// Account routes that require a session.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/logout", post(logout))
        .route("/api/me", get(me))
}

/// POST /api/login: Exchange credentials for a bearer token.
#[utoipa::path(
    post,
    path = "/api/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in", body = LoginResponse),
        (status = 422, description = "Invalid credentials", body = crate::error::ErrorBody),
    ),
    security(()),
    tag = "account"
)]
pub(crate) async fn login(
    State(state): State<AppState>,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<LoginResponse>, AppError> {
    let req = extract_validated_json(body)?;

    let user = state
        .users
        .find(|u| u.email.eq_ignore_ascii_case(req.email.trim()))
        .filter(|u| u.is_active && auth::verify_password(&req.password, &u.password_hash));
    let Some(user) = user else {
        tracing::warn!(email = %req.email, "login rejected");
        return Err(AppError::InvalidFields(Violations::single(
            "email",
            "The provided credentials are incorrect.",
        )));
    };

    let token = auth::issue_session(&state, user.id, req.device_name.clone()).await;
    crate::activity::record(
        &state,
        Some(user.id),
        "logged_in",
        "user",
        Some(user.id),
        json!({ "device_name": req.device_name }),
    )
    .await;

    Ok(Json(LoginResponse {
        token,
        user: state.user_view(&user),
    }))
}

/// POST /api/logout: Revoke the presented session token.
#[utoipa::path(
    post,
    path = "/api/logout",
    responses((status = 200, description = "Logged out", body = MessageResponse)),
    tag = "account"
)]
pub(crate) async fn logout(
    State(state): State<AppState>,
    caller: CallerIdentity,
) -> Result<Json<MessageResponse>, AppError> {
    auth::revoke_session(&state, &caller.session_digest).await;
    crate::activity::record(
        &state,
        Some(caller.user_id),
        "logged_out",
        "user",
        Some(caller.user_id),
        json!({}),
    )
    .await;
    Ok(MessageResponse::new("Logged out successfully."))
}

/// GET /api/me: The authenticated user with roles and abilities.
#[utoipa::path(
    get,
    path = "/api/me",
    responses((status = 200, description = "Current user", body = UserView)),
    tag = "account"
)]
pub(crate) async fn me(
    State(state): State<AppState>,
    caller: CallerIdentity,
) -> Result<Json<UserView>, AppError> {
    let user = state
        .users
        .get(&caller.user_id)
        .ok_or_else(|| AppError::NotFound(format!("user {} not found", caller.user_id)))?;
    Ok(Json(state.user_view(&user)))
}

const RESET_LINK_SENT: &str = "If the address belongs to an account, a reset link has been sent.";

/// POST /api/forgot-password: Issue a password reset token.
#[utoipa::path(
    post,
    path = "/api/forgot-password",
    request_body = ForgotPasswordRequest,
    responses((status = 200, description = "Request accepted", body = MessageResponse)),
    security(()),
    tag = "account"
)]
pub(crate) async fn forgot_password(
    State(state): State<AppState>,
    body: Result<Json<ForgotPasswordRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>, AppError> {
    let req = extract_validated_json(body)?;
    match auth::issue_reset_token(&state, req.email.trim()) {
        Some(token) => {
            tracing::info!(
                target: "nexus::mail",
                to = %req.email,
                token = %token,
                ttl_minutes = state.config.reset_token_ttl_minutes,
                "password reset token issued"
            );
        }
        None => tracing::debug!(email = %req.email, "password reset requested for unknown account"),
    }
    Ok(MessageResponse::new(RESET_LINK_SENT))
}

/// POST /api/reset-password: Set a new password with a reset token.
#[utoipa::path(
    post,
    path = "/api/reset-password",
    request_body = ResetPasswordRequest,
    responses(
        (status = 200, description = "Password changed", body = MessageResponse),
        (status = 422, description = "Invalid token or password", body = crate::error::ErrorBody),
    ),
    security(()),
    tag = "account"
)]
pub(crate) async fn reset_password(
    State(state): State<AppState>,
    body: Result<Json<ResetPasswordRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>, AppError> {
    let req = extract_validated_json(body)?;
    let user_id = auth::consume_reset_token(&state, req.email.trim(), &req.token).ok_or_else(|| {
        AppError::InvalidFields(Violations::single(
            "email",
            "This password reset token is invalid.",
        ))
    })?;

    let hash = auth::hash_password(&req.password, state.config.password_iterations);
    let user = state
        .users
        .update(&user_id, |u| {
            u.password_hash = hash;
            u.updated_at = Utc::now();
        })
        .ok_or_else(|| AppError::NotFound(format!("user {user_id} not found")))?;

    crate::db::write_through(state.db_pool.as_ref(), "user", user.id, |pool| {
        crate::db::users::upsert(pool, &user)
    })
    .await;
    let revoked = auth::revoke_user_sessions(&state, user.id).await;
    crate::activity::record(
        &state,
        Some(user.id),
        "password_reset",
        "user",
        Some(user.id),
        json!({ "sessions_revoked": revoked }),
    )
    .await;

    Ok(MessageResponse::new("Your password has been reset."))
}
