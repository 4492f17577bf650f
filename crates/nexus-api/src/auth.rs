//! # Authentication & Authorization
//!
//! Session-token authentication with ability-based access control.
//!
//! ## Passwords
//!
//! Stored as `sha256i$<iterations>$<salt-hex>$<digest-hex>`: a random
//! 16-byte salt and an iterated SHA-256 chain over salt and password.
//! Verification re-derives the chain and compares in constant time.
//!
//! ## Sessions
//!
//! `POST /api/login` issues a random 32-byte token (hex). Only its SHA-256
//! digest is kept, so a leaked session table does not leak usable tokens.
//! Requests present the token as `Authorization: Bearer <token>`.
//!
//! ## CallerIdentity
//!
//! The auth middleware injects a [`CallerIdentity`] carrying the user id and
//! resolved abilities into request extensions. Handlers extract it via the
//! `FromRequestParts` impl and gate actions with [`require_ability`].

use axum::extract::{Request, State};
use axum::http::request::Parts;
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{Duration, Utc};
use nexus_core::ResolvedAbilities;
use rand_core::{OsRng, RngCore};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::error::{AppError, ErrorBody, ErrorDetail};
use crate::state::{AppState, PasswordResetRecord, SessionRecord};

/// Iteration count applied to new password hashes.
pub const DEFAULT_PASSWORD_ITERATIONS: u32 = 100_000;

const HASH_SCHEME: &str = "sha256i";
const SALT_LEN: usize = 16;
const TOKEN_LEN: usize = 32;

// ── Hex ─────────────────────────────────────────────────────────────────────

pub(crate) fn to_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}

fn from_hex(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 || !s.is_ascii() {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}

// ── Passwords ───────────────────────────────────────────────────────────────

fn derive(password: &str, salt: &[u8], iterations: u32) -> Zeroizing<[u8; 32]> {
    let mut digest: [u8; 32] = Sha256::new()
        .chain_update(salt)
        .chain_update(password.as_bytes())
        .finalize()
        .into();
    for _ in 1..iterations {
        digest = Sha256::new()
            .chain_update(digest)
            .chain_update(password.as_bytes())
            .finalize()
            .into();
    }
    Zeroizing::new(digest)
}

/// Hash a password with a fresh random salt.
pub fn hash_password(password: &str, iterations: u32) -> String {
    let iterations = iterations.max(1);
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    let digest = derive(password, &salt, iterations);
    format!(
        "{HASH_SCHEME}${iterations}${}${}",
        to_hex(&salt),
        to_hex(&digest[..])
    )
}

/// Check `password` against an encoded hash. Malformed hashes never verify.
pub fn verify_password(password: &str, encoded: &str) -> bool {
    let mut parts = encoded.split('$');
    let (Some(scheme), Some(iterations), Some(salt), Some(expected), None) = (
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
    ) else {
        return false;
    };
    if scheme != HASH_SCHEME {
        return false;
    }
    let (Ok(iterations), Some(salt), Some(expected)) =
        (iterations.parse::<u32>(), from_hex(salt), from_hex(expected))
    else {
        return false;
    };
    if iterations == 0 || expected.len() != 32 {
        return false;
    }
    let actual = derive(password, &salt, iterations);
    actual[..].ct_eq(&expected[..]).into()
}

// ── Tokens ──────────────────────────────────────────────────────────────────

/// Hex SHA-256 digest of a bearer or reset token, the key it is stored under.
pub fn token_digest(token: &str) -> String {
    to_hex(&Sha256::digest(token.as_bytes()))
}

fn random_token() -> String {
    let mut bytes = Zeroizing::new([0u8; TOKEN_LEN]);
    OsRng.fill_bytes(&mut bytes[..]);
    to_hex(&bytes[..])
}

/// Open a session for `user_id` and return the plaintext bearer token.
pub async fn issue_session(state: &AppState, user_id: i64, device_name: Option<String>) -> String {
    let token = random_token();
    let digest = token_digest(&token);
    let now = Utc::now();
    let session = SessionRecord {
        user_id,
        device_name,
        created_at: now,
        last_used_at: now,
    };
    state.sessions.write().insert(digest.clone(), session.clone());

    crate::db::write_through(state.db_pool.as_ref(), "session", user_id, |pool| {
        crate::db::sessions::insert(pool, &digest, &session)
    })
    .await;

    token
}

/// Revoke the session stored under `digest`.
pub async fn revoke_session(state: &AppState, digest: &str) -> bool {
    let removed = state.sessions.write().remove(digest);
    if let Some(session) = &removed {
        crate::db::write_through(state.db_pool.as_ref(), "session", session.user_id, |pool| {
            crate::db::sessions::delete(pool, digest)
        })
        .await;
    }
    removed.is_some()
}

/// Revoke every session of `user_id`. Returns the number revoked.
pub async fn revoke_user_sessions(state: &AppState, user_id: i64) -> usize {
    let revoked = {
        let mut sessions = state.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, s| s.user_id != user_id);
        before - sessions.len()
    };
    crate::db::write_through(state.db_pool.as_ref(), "session", user_id, |pool| {
        crate::db::sessions::delete_for_user(pool, user_id)
    })
    .await;
    revoked
}

/// Issue a password reset token for the active account with `email`.
///
/// Returns `None` for unknown or inactive accounts. Only the digest is kept;
/// any previous reset token of the user is replaced.
pub fn issue_reset_token(state: &AppState, email: &str) -> Option<String> {
    let user = state
        .users
        .find(|u| u.is_active && u.email.eq_ignore_ascii_case(email))?;
    let token = random_token();
    let expires_at = Utc::now() + Duration::minutes(state.config.reset_token_ttl_minutes);

    let mut resets = state.password_resets.write();
    resets.retain(|_, r| r.user_id != user.id);
    resets.insert(
        token_digest(&token),
        PasswordResetRecord {
            user_id: user.id,
            expires_at,
        },
    );
    Some(token)
}

/// Consume a reset token, returning the user it was issued to.
///
/// The token must exist, be unexpired, and belong to the account with `email`.
/// A consumed or expired token is removed.
pub fn consume_reset_token(state: &AppState, email: &str, token: &str) -> Option<i64> {
    let digest = token_digest(token);
    let record = state.password_resets.write().remove(&digest)?;
    if record.expires_at < Utc::now() {
        return None;
    }
    let user = state.users.get(&record.user_id)?;
    if !user.email.eq_ignore_ascii_case(email) {
        // Issued to another account; leave it usable.
        state.password_resets.write().insert(digest, record);
        return None;
    }
    Some(user.id)
}

// ── CallerIdentity ──────────────────────────────────────────────────────────

/// Identity of the authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    pub user_id: i64,
    /// Abilities resolved at authentication time.
    pub abilities: ResolvedAbilities,
    /// Digest of the presented bearer token, used by logout.
    pub session_digest: String,
}

impl CallerIdentity {
    /// Whether the caller holds `ability`.
    pub fn can(&self, ability: &str) -> bool {
        self.abilities.allows(ability)
    }
}

/// Extracts the identity that the auth middleware injected into extensions.
/// Returns 401 if no identity is present.
#[axum::async_trait]
impl<S: Send + Sync> axum::extract::FromRequestParts<S> for CallerIdentity {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CallerIdentity>()
            .cloned()
            .ok_or_else(|| AppError::Unauthorized("no caller identity in request context".into()))
    }
}

/// Check that the caller holds `ability`. Returns 403 Forbidden otherwise.
pub fn require_ability(caller: &CallerIdentity, ability: &str) -> Result<(), AppError> {
    if caller.can(ability) {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!("ability '{ability}' required")))
    }
}

/// Resolve a bearer token to the caller's identity.
pub fn authenticate(state: &AppState, token: &str) -> Result<CallerIdentity, &'static str> {
    let digest = token_digest(token);
    let user_id = {
        let mut sessions = state.sessions.write();
        match sessions.get_mut(&digest) {
            Some(session) => {
                session.last_used_at = Utc::now();
                session.user_id
            }
            None => return Err("invalid or revoked token"),
        }
    };

    match state.users.get(&user_id) {
        Some(user) if user.is_active => Ok(CallerIdentity {
            user_id,
            abilities: state.abilities_for(user_id),
            session_digest: digest,
        }),
        _ => Err("account is inactive or no longer exists"),
    }
}

// ── Middleware ───────────────────────────────────────────────────────────────

/// Validate the bearer session token and inject [`CallerIdentity`].
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    let token = match auth_header {
        Some(value) if value.starts_with("Bearer ") => value[7..].trim(),
        Some(_) => {
            tracing::warn!("authentication failed: non-Bearer authorization scheme");
            return unauthorized_response("authorization header must use Bearer scheme");
        }
        None => {
            return unauthorized_response("missing authorization header");
        }
    };

    match authenticate(&state, token) {
        Ok(identity) => {
            request.extensions_mut().insert(identity);
            next.run(request).await
        }
        Err(msg) => {
            tracing::warn!(reason = %msg, "authentication failed");
            unauthorized_response(msg)
        }
    }
}

fn unauthorized_response(message: &str) -> Response {
    let body = ErrorBody {
        error: ErrorDetail {
            code: "UNAUTHORIZED".to_string(),
            message: message.to_string(),
            details: None,
        },
    };
    (StatusCode::UNAUTHORIZED, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{AppConfig, UserRecord};
    use axum::body::Body;
    use axum::http::Request;
    use axum::middleware::from_fn_with_state;
    use axum::routing::get;
    use axum::Router;
    use tower::ServiceExt;

    fn add_user(state: &AppState, email: &str) -> i64 {
        let now = Utc::now();
        state
            .users
            .insert_with(|id| UserRecord {
                id,
                name: "Outlet Staff".into(),
                email: email.into(),
                password_hash: hash_password("correct horse", 10),
                role_ids: vec![],
                is_active: true,
                created_at: now,
                updated_at: now,
            })
            .id
    }

    fn test_app(state: AppState) -> Router {
        Router::new()
            .route("/test", get(|| async { "ok" }))
            .layer(from_fn_with_state(state.clone(), auth_middleware))
            .with_state(state)
    }

    #[test]
    fn password_roundtrip() {
        let encoded = hash_password("correct horse", 50);
        assert!(encoded.starts_with("sha256i$50$"));
        assert!(verify_password("correct horse", &encoded));
        assert!(!verify_password("correct horse ", &encoded));
    }

    #[test]
    fn same_password_gets_distinct_salts() {
        assert_ne!(hash_password("pw", 5), hash_password("pw", 5));
    }

    #[test]
    fn malformed_hashes_never_verify() {
        for encoded in [
            "",
            "plain",
            "sha256i$x$00$00",
            "sha256i$0$00$00",
            "md5$10$00$00",
            "sha256i$10$zz$00",
        ] {
            assert!(!verify_password("pw", encoded), "{encoded}");
        }
    }

    #[test]
    fn token_digest_is_hex_sha256() {
        let d = token_digest("abc");
        assert_eq!(
            d,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn valid_session_accepted() {
        let state = AppState::new();
        let id = add_user(&state, "staff@nexus.test");
        let token = issue_session(&state, id, None).await;

        let response = test_app(state)
            .oneshot(
                Request::builder()
                    .uri("/test")
                    .header("authorization", format!("Bearer {token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn missing_header_and_wrong_scheme_rejected() {
        let app = test_app(AppState::new());
        let response = app
            .clone()
            .oneshot(Request::builder().uri("/test").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/test")
                    .header("authorization", "Basic dXNlcjpwYXNz")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn revoked_session_rejected() {
        let state = AppState::new();
        let id = add_user(&state, "staff@nexus.test");
        let token = issue_session(&state, id, None).await;
        assert!(revoke_session(&state, &token_digest(&token)).await);
        assert!(authenticate(&state, &token).is_err());
    }

    #[tokio::test]
    async fn deactivated_user_rejected() {
        let state = AppState::new();
        let id = add_user(&state, "staff@nexus.test");
        let token = issue_session(&state, id, None).await;
        state.users.update(&id, |u| u.is_active = false);
        assert!(authenticate(&state, &token).is_err());
    }

    #[tokio::test]
    async fn revoke_user_sessions_removes_all() {
        let state = AppState::new();
        let id = add_user(&state, "staff@nexus.test");
        issue_session(&state, id, Some("phone".into())).await;
        issue_session(&state, id, Some("tablet".into())).await;
        assert_eq!(revoke_user_sessions(&state, id).await, 2);
        assert!(state.sessions.read().is_empty());
    }

    #[test]
    fn reset_token_single_use_and_bound_to_email() {
        let state = AppState::new();
        let id = add_user(&state, "staff@nexus.test");
        let token = issue_reset_token(&state, "STAFF@nexus.test").unwrap();

        assert_eq!(consume_reset_token(&state, "other@nexus.test", &token), None);
        assert_eq!(
            consume_reset_token(&state, "staff@nexus.test", &token),
            Some(id)
        );
        assert_eq!(consume_reset_token(&state, "staff@nexus.test", &token), None);
    }

    #[test]
    fn expired_reset_token_rejected() {
        let state = AppState::seeded(AppConfig {
            reset_token_ttl_minutes: -1,
            ..AppConfig::default()
        });
        add_user(&state, "staff@nexus.test");
        let token = issue_reset_token(&state, "staff@nexus.test").unwrap();
        assert_eq!(consume_reset_token(&state, "staff@nexus.test", &token), None);
    }

    #[test]
    fn unknown_email_gets_no_reset_token() {
        let state = AppState::new();
        assert!(issue_reset_token(&state, "ghost@nexus.test").is_none());
    }
}
