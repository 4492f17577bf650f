//! # nexus-api: NexusComply HTTP Services
//!
//! Axum application serving two surfaces over one in-memory state:
//!
//! - **Mobile API** (`/api/*`): outlet users start audits, submit forms,
//!   upload evidence and submit audits for review.
//! - **Admin API** (`/admin/*`): managers review audits and forms, and
//!   maintain outlets, compliance requirements, form templates, users,
//!   roles, abilities, issues and corrective actions.
//!
//! Every route except login, password reset, the health probes and
//! `/metrics` requires a bearer session token. Authorization is
//! ability-based; see [`permissions`].
//!
//! ## Persistence
//!
//! The in-memory stores in [`AppState`] are authoritative at runtime.
//! When `DATABASE_URL` is set, mutations are written through to Postgres
//! and the stores are hydrated from it on startup.

pub mod activity;
pub mod auth;
pub mod bootstrap;
pub mod db;
pub mod error;
pub mod export;
pub mod extractors;
pub mod middleware;
pub mod openapi;
pub mod orchestration;
pub mod permissions;
pub mod routes;
pub mod state;
pub mod storage;

pub use error::AppError;
pub use state::{AppConfig, AppState};

use std::collections::HashMap;

use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::middleware::{from_fn, from_fn_with_state};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Extension, Router};
use nexus_core::RecordStatus;

use crate::middleware::metrics::ApiMetrics;
use crate::middleware::rate_limit::{RateLimitConfig, RateLimiter};

/// Build the complete application router.
pub fn app(state: AppState) -> Router {
    let limiter = RateLimiter::new(RateLimitConfig {
        trusted_proxies: state.config.trusted_proxies.clone(),
        ..RateLimitConfig::default()
    });
    let metrics_on = state.config.metrics_enabled;

    // Middleware order (outermost first):
    //   Trace -> Metrics -> Auth -> RateLimit -> Handler
    // Auth runs first so the limiter can key on the authenticated user.
    let protected = Router::new()
        .merge(routes::account::router())
        .merge(routes::audits::router())
        .merge(routes::audits::admin_router())
        .merge(routes::audit_forms::router())
        .merge(routes::audit_forms::admin_router())
        .merge(routes::outlets::router())
        .merge(routes::outlets::admin_router())
        .merge(routes::compliance::router())
        .merge(routes::compliance::admin_router())
        .merge(routes::form_templates::router())
        .merge(routes::form_templates::admin_router())
        .merge(routes::users::admin_router())
        .merge(routes::roles::admin_router())
        .merge(routes::issues::admin_router())
        .merge(routes::activity_logs::admin_router())
        .merge(routes::files::router())
        .merge(openapi::router())
        .layer(from_fn(middleware::rate_limit::rate_limit_middleware))
        .layer(from_fn_with_state(state.clone(), auth::auth_middleware));

    // Login and password reset: rate limited per peer address.
    let public = routes::account::public_router()
        .layer(from_fn(middleware::rate_limit::rate_limit_middleware));

    // Body size limit: 2 MiB. The upload route overrides it.
    let mut api = Router::new()
        .merge(public)
        .merge(protected)
        .layer(DefaultBodyLimit::max(2 * 1024 * 1024));

    if metrics_on {
        api = api
            .layer(from_fn(middleware::metrics::metrics_middleware))
            .layer(Extension(state.metrics.clone()));
    }

    let api = api
        .layer(middleware::tracing_layer::layer())
        .layer(Extension(limiter))
        .with_state(state.clone());

    let mut unauthenticated = Router::new()
        .route("/health/liveness", get(liveness))
        .route("/health/readiness", get(readiness));

    if metrics_on {
        unauthenticated = unauthenticated.route("/metrics", get(prometheus_metrics));
    }

    let unauthenticated = unauthenticated.with_state(state);

    Router::new().merge(unauthenticated).merge(api)
}

/// GET /metrics: Prometheus scrape endpoint.
///
/// Domain gauges are refreshed from the stores on each scrape.
async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    let metrics: &ApiMetrics = &state.metrics;

    let mut by_status: HashMap<&'static str, usize> = RecordStatus::ALL
        .iter()
        .map(|s| (s.as_str(), 0))
        .collect();
    for audit in state.audits.list() {
        *by_status.entry(audit.status.as_str()).or_default() += 1;
    }
    metrics.audits_total().reset();
    for (status, count) in &by_status {
        metrics
            .audits_total()
            .with_label_values(&[status])
            .set(*count as f64);
    }

    metrics
        .outlets_total()
        .set(state.outlets.count(|o| o.is_active) as f64);
    metrics
        .active_sessions()
        .set(state.sessions.read().len() as f64);

    match metrics.gather_and_encode() {
        Ok(body) => (
            StatusCode::OK,
            [(
                axum::http::header::CONTENT_TYPE,
                "text/plain; version=0.0.4; charset=utf-8",
            )],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("Failed to encode Prometheus metrics: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, e).into_response()
        }
    }
}

/// Liveness probe: 200 while the process is running.
async fn liveness() -> &'static str {
    "ok"
}

/// Readiness probe.
///
/// Checks the file storage root exists (creating it if needed) and, when
/// configured, that the database answers. Returns 200 "ready" or 503 naming the failure.
async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    if !state.storage.is_available().await {
        tracing::warn!(root = %state.storage.root().display(), "File storage health check failed");
        return (StatusCode::SERVICE_UNAVAILABLE, "file storage unavailable").into_response();
    }

    if let Some(pool) = &state.db_pool {
        if let Err(e) = sqlx::query("SELECT 1").execute(pool).await {
            tracing::warn!("Database health check failed: {e}");
            return (StatusCode::SERVICE_UNAVAILABLE, "database unreachable").into_response();
        }
    }

    (StatusCode::OK, "ready").into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_state(root: &std::path::Path) -> AppState {
        AppState::seeded(AppConfig {
            storage_root: root.to_path_buf(),
            ..AppConfig::default()
        })
    }

    async fn get_text(app: Router, uri: &str) -> (StatusCode, String) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn liveness_needs_no_token() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) = get_text(app(test_state(dir.path())), "/health/liveness").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");
    }

    #[tokio::test]
    async fn readiness_reports_unusable_storage() {
        let dir = tempfile::tempdir().unwrap();
        let occupied = dir.path().join("storage");
        std::fs::write(&occupied, b"not a directory").unwrap();
        let state = test_state(&occupied);
        let (status, _) = get_text(app(state), "/health/readiness").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn metrics_expose_audit_gauge() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) = get_text(app(test_state(dir.path())), "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("nexus_audits_total"));
    }

    #[tokio::test]
    async fn metrics_route_absent_when_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::seeded(AppConfig {
            storage_root: dir.path().to_path_buf(),
            metrics_enabled: false,
            ..AppConfig::default()
        });
        let (status, _) = get_text(app(state), "/metrics").await;
        assert_ne!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn api_routes_require_a_token() {
        let dir = tempfile::tempdir().unwrap();
        let (status, _) = get_text(app(test_state(dir.path())), "/api/audits").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
