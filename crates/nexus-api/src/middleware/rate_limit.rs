//! # Per-Client Rate Limiting
//!
//! Fixed-window limiter keyed by client. Authenticated requests are keyed
//! by user id. Anything else is keyed by the peer address of the
//! connection; `X-Forwarded-For` is only read when that peer is one of the
//! configured trusted proxies. Without connection info (in-process tests)
//! every anonymous request shares one bucket.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{ConnectInfo, Request};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use parking_lot::Mutex;

use crate::auth::CallerIdentity;
use crate::error::{ErrorBody, ErrorDetail};

/// Rate limiter configuration.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum requests per window.
    pub max_requests: u64,
    /// Window duration in seconds.
    pub window_secs: u64,
    /// Bucket count above which expired windows are swept.
    pub max_tracked_clients: usize,
    /// Reverse proxies whose `X-Forwarded-For` is believed.
    pub trusted_proxies: Vec<IpAddr>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 1000,
            window_secs: 60,
            max_tracked_clients: 10_000,
            trusted_proxies: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
struct BucketState {
    count: u64,
    window_start: Instant,
}

/// Shared rate limiter state.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    config: Arc<RateLimitConfig>,
    buckets: Arc<Mutex<HashMap<String, BucketState>>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config: Arc::new(config),
            buckets: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Whether a request from `key` fits in the current window.
    fn check(&self, key: &str) -> bool {
        let mut buckets = self.buckets.lock();
        let now = Instant::now();
        let window_secs = self.config.window_secs;

        if buckets.len() >= self.config.max_tracked_clients && !buckets.contains_key(key) {
            buckets.retain(|_, b| now.duration_since(b.window_start).as_secs() < window_secs);
        }

        let bucket = buckets.entry(key.to_string()).or_insert(BucketState {
            count: 0,
            window_start: now,
        });

        if now.duration_since(bucket.window_start).as_secs() >= window_secs {
            bucket.count = 0;
            bucket.window_start = now;
        }

        if bucket.count >= self.config.max_requests {
            false
        } else {
            bucket.count += 1;
            true
        }
    }

    #[cfg(test)]
    fn tracked_clients(&self) -> usize {
        self.buckets.lock().len()
    }

    fn client_key(&self, request: &Request) -> String {
        if let Some(caller) = request.extensions().get::<CallerIdentity>() {
            return format!("user:{}", caller.user_id);
        }
        let Some(ConnectInfo(peer)) = request.extensions().get::<ConnectInfo<SocketAddr>>()
        else {
            return "anonymous".to_string();
        };
        let peer = peer.ip();
        if self.config.trusted_proxies.contains(&peer) {
            // The proxy appends the address it saw; earlier entries are client-supplied.
            let forwarded = request
                .headers()
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.rsplit(',').next())
                .and_then(|ip| ip.trim().parse::<IpAddr>().ok());
            if let Some(client) = forwarded {
                return format!("ip:{client}");
            }
        }
        format!("ip:{peer}")
    }
}

/// Middleware that enforces per-client rate limits.
pub async fn rate_limit_middleware(request: Request, next: Next) -> Response {
    let limiter = request.extensions().get::<RateLimiter>().cloned();

    if let Some(limiter) = limiter {
        let key = limiter.client_key(&request);
        if !limiter.check(&key) {
            tracing::warn!(client = %key, "rate limit exceeded");
            let body = ErrorBody {
                error: ErrorDetail {
                    code: "RATE_LIMITED".to_string(),
                    message: "rate limit exceeded".to_string(),
                    details: None,
                },
            };
            return (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
        }
    }

    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::middleware::from_fn;
    use axum::routing::get;
    use axum::Router;
    use tower::ServiceExt;

    fn test_app(config: RateLimitConfig) -> Router {
        Router::new()
            .route("/ping", get(|| async { "pong" }))
            .layer(from_fn(rate_limit_middleware))
            .layer(axum::Extension(RateLimiter::new(config)))
    }

    fn limited(max_requests: u64) -> RateLimitConfig {
        RateLimitConfig {
            max_requests,
            ..RateLimitConfig::default()
        }
    }

    fn request(peer: &str, forwarded: Option<&str>) -> axum::http::Request<Body> {
        let mut builder = axum::http::Request::builder().uri("/ping");
        if let Some(forwarded) = forwarded {
            builder = builder.header("x-forwarded-for", forwarded);
        }
        let mut request = builder.body(Body::empty()).unwrap();
        let addr: SocketAddr = format!("{peer}:40000").parse().unwrap();
        request.extensions_mut().insert(ConnectInfo(addr));
        request
    }

    #[tokio::test]
    async fn blocks_after_limit() {
        let app = test_app(limited(2));
        for _ in 0..2 {
            let r = app.clone().oneshot(request("10.0.0.1", None)).await.unwrap();
            assert_eq!(r.status(), StatusCode::OK);
        }
        let r = app.oneshot(request("10.0.0.1", None)).await.unwrap();
        assert_eq!(r.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn peers_are_independent() {
        let app = test_app(limited(1));
        let r = app.clone().oneshot(request("10.0.0.1", None)).await.unwrap();
        assert_eq!(r.status(), StatusCode::OK);
        let r = app.oneshot(request("10.0.0.2", None)).await.unwrap();
        assert_eq!(r.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn rotating_forwarded_for_does_not_reset_the_limit() {
        let app = test_app(limited(3));
        let mut statuses = Vec::new();
        for n in 0..5 {
            let spoofed = format!("198.51.100.{n}");
            let r = app
                .clone()
                .oneshot(request("203.0.113.9", Some(&spoofed)))
                .await
                .unwrap();
            statuses.push(r.status());
        }
        assert_eq!(
            statuses.iter().filter(|s| **s == StatusCode::TOO_MANY_REQUESTS).count(),
            2
        );
    }

    #[tokio::test]
    async fn trusted_proxy_forwards_the_client_address() {
        let proxy: IpAddr = "10.0.0.254".parse().unwrap();
        let app = test_app(RateLimitConfig {
            max_requests: 1,
            trusted_proxies: vec![proxy],
            ..RateLimitConfig::default()
        });
        let r = app
            .clone()
            .oneshot(request("10.0.0.254", Some("1.1.1.1, 192.0.2.10")))
            .await
            .unwrap();
        assert_eq!(r.status(), StatusCode::OK);
        // Same client behind the proxy, different spoofed prefix.
        let r = app
            .clone()
            .oneshot(request("10.0.0.254", Some("8.8.8.8, 192.0.2.10")))
            .await
            .unwrap();
        assert_eq!(r.status(), StatusCode::TOO_MANY_REQUESTS);
        let r = app
            .oneshot(request("10.0.0.254", Some("192.0.2.11")))
            .await
            .unwrap();
        assert_eq!(r.status(), StatusCode::OK);
    }

    #[test]
    fn window_reset_allows_again() {
        let limiter = RateLimiter::new(RateLimitConfig {
            max_requests: 1,
            window_secs: 0,
            ..RateLimitConfig::default()
        });
        assert!(limiter.check("k"));
        assert!(limiter.check("k"));
    }

    #[test]
    fn expired_windows_are_swept_at_capacity() {
        let limiter = RateLimiter::new(RateLimitConfig {
            window_secs: 0,
            max_tracked_clients: 4,
            ..RateLimitConfig::default()
        });
        for n in 0..50 {
            assert!(limiter.check(&format!("ip:192.0.2.{n}")));
        }
        assert!(limiter.tracked_clients() <= 4);
    }
}
