//! # Prometheus Metrics
//!
//! HTTP-level metrics (request counts, latency, errors) are recorded in
//! middleware. Domain gauges (audits by status, outlets, sessions) are
//! refreshed on each `/metrics` scrape; see the metrics handler in `lib.rs`.
//! Progress recompute failures are counted where they happen.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use prometheus::core::Collector;
use prometheus::{
    Encoder, Gauge, GaugeVec, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts,
    Registry, TextEncoder,
};

/// Shared metrics state backed by a Prometheus registry.
#[derive(Clone)]
pub struct ApiMetrics {
    inner: Arc<Inner>,
}

struct Inner {
    registry: Registry,

    // -- HTTP middleware metrics (push model) --
    http_requests_total: IntCounterVec,
    http_request_duration_seconds: HistogramVec,
    http_errors_total: IntCounterVec,

    // -- Domain counters (push model) --
    progress_update_failures_total: IntCounter,

    // -- Domain gauges (pull model, updated on /metrics scrape) --
    audits_total: GaugeVec,
    outlets_total: Gauge,
    active_sessions: Gauge,
}

impl std::fmt::Debug for ApiMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiMetrics")
            .field("requests", &self.requests())
            .field("errors", &self.errors())
            .field("progress_failures", &self.progress_failures())
            .finish()
    }
}

impl ApiMetrics {
    /// Create a new metrics instance with a fresh Prometheus registry.
    pub fn new() -> Self {
        let registry = Registry::new();

        let http_requests_total = IntCounterVec::new(
            Opts::new("nexus_http_requests_total", "Total HTTP requests"),
            &["method", "path", "status"],
        )
        .expect("metric can be created");

        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "nexus_http_request_duration_seconds",
                "HTTP request duration in seconds",
            )
            .buckets(vec![
                0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
            ]),
            &["method", "path"],
        )
        .expect("metric can be created");

        let http_errors_total = IntCounterVec::new(
            Opts::new("nexus_http_errors_total", "Total HTTP errors (4xx and 5xx)"),
            &["method", "path", "status"],
        )
        .expect("metric can be created");

        let progress_update_failures_total = IntCounter::new(
            "nexus_progress_update_failures_total",
            "Audit progress recomputations that failed after a form submission",
        )
        .expect("metric can be created");

        let audits_total = GaugeVec::new(
            Opts::new("nexus_audits_total", "Total audits by status"),
            &["status"],
        )
        .expect("metric can be created");

        let outlets_total = Gauge::new("nexus_outlets_total", "Total outlets")
            .expect("metric can be created");

        let active_sessions = Gauge::new("nexus_active_sessions", "Open bearer sessions")
            .expect("metric can be created");

        let collectors: [Box<dyn Collector>; 7] = [
            Box::new(http_requests_total.clone()),
            Box::new(http_request_duration_seconds.clone()),
            Box::new(http_errors_total.clone()),
            Box::new(progress_update_failures_total.clone()),
            Box::new(audits_total.clone()),
            Box::new(outlets_total.clone()),
            Box::new(active_sessions.clone()),
        ];
        for collector in collectors {
            registry
                .register(collector)
                .expect("metric can be registered");
        }

        Self {
            inner: Arc::new(Inner {
                registry,
                http_requests_total,
                http_request_duration_seconds,
                http_errors_total,
                progress_update_failures_total,
                audits_total,
                outlets_total,
                active_sessions,
            }),
        }
    }

    /// Total request count (sum across all labels).
    pub fn requests(&self) -> u64 {
        sum_counter(&self.inner.http_requests_total)
    }

    /// Total error count (sum across all labels).
    pub fn errors(&self) -> u64 {
        sum_counter(&self.inner.http_errors_total)
    }

    /// Number of failed progress recomputations.
    pub fn progress_failures(&self) -> u64 {
        self.inner.progress_update_failures_total.get()
    }

    /// Count a failed progress recomputation.
    pub fn record_progress_failure(&self) {
        self.inner.progress_update_failures_total.inc();
    }

    /// Record an HTTP request (called by the middleware).
    fn record_request(&self, method: &str, path: &str, status: u16, duration_secs: f64) {
        let status_str = status.to_string();
        self.inner
            .http_requests_total
            .with_label_values(&[method, path, &status_str])
            .inc();

        self.inner
            .http_request_duration_seconds
            .with_label_values(&[method, path])
            .observe(duration_secs);

        if status >= 400 {
            self.inner
                .http_errors_total
                .with_label_values(&[method, path, &status_str])
                .inc();
        }
    }

    // -- Domain gauge accessors (used by the /metrics handler) --

    pub fn audits_total(&self) -> &GaugeVec {
        &self.inner.audits_total
    }

    pub fn outlets_total(&self) -> &Gauge {
        &self.inner.outlets_total
    }

    pub fn active_sessions(&self) -> &Gauge {
        &self.inner.active_sessions
    }

    /// Gather all metrics and encode to Prometheus text format.
    pub fn gather_and_encode(&self) -> Result<String, String> {
        let encoder = TextEncoder::new();
        let metric_families = self.inner.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| format!("failed to encode metrics: {e}"))?;
        String::from_utf8(buffer)
            .map_err(|e| format!("metrics encoding produced invalid UTF-8: {e}"))
    }
}

impl Default for ApiMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn sum_counter(counter: &IntCounterVec) -> u64 {
    counter
        .collect()
        .iter()
        .flat_map(|mf| mf.get_metric())
        .map(|m| m.get_counter().get_value() as u64)
        .sum()
}

/// Replace numeric id segments with `{id}` to bound label cardinality.
///
/// File names under `/api/files/` are collapsed to `{filename}`.
fn normalize_path(path: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    let mut previous = "";
    for segment in path.split('/') {
        let normalized = if previous == "files" && !segment.is_empty() {
            "{filename}"
        } else if !segment.is_empty() && segment.chars().all(|c| c.is_ascii_digit()) {
            "{id}"
        } else {
            segment
        };
        out.push(normalized);
        previous = segment;
    }
    out.join("/")
}

/// Middleware that records HTTP request metrics via Prometheus.
pub async fn metrics_middleware(request: Request, next: Next) -> Response {
    let metrics = request.extensions().get::<ApiMetrics>().cloned();
    let method = request.method().to_string();
    let path = normalize_path(request.uri().path());
    let start = Instant::now();

    let response = next.run(request).await;

    if let Some(m) = metrics {
        let duration = start.elapsed().as_secs_f64();
        m.record_request(&method, &path, response.status().as_u16(), duration);
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_zero() {
        let m = ApiMetrics::new();
        assert_eq!(m.requests(), 0);
        assert_eq!(m.errors(), 0);
        assert_eq!(m.progress_failures(), 0);
    }

    #[test]
    fn requests_and_errors_counted_independently() {
        let m = ApiMetrics::new();
        m.record_request("GET", "/api/audits", 200, 0.01);
        m.record_request("POST", "/api/audit-forms", 201, 0.02);
        m.record_request("GET", "/api/audits/{id}", 404, 0.005);
        assert_eq!(m.requests(), 3);
        assert_eq!(m.errors(), 1);
    }

    #[test]
    fn progress_failures_are_counted_and_exported() {
        let m = ApiMetrics::new();
        m.record_progress_failure();
        m.record_progress_failure();
        assert_eq!(m.progress_failures(), 2);
        let text = m.gather_and_encode().unwrap();
        assert!(text.contains("nexus_progress_update_failures_total 2"));
    }

    #[test]
    fn normalize_numeric_segments() {
        assert_eq!(normalize_path("/api/audits/42/forms"), "/api/audits/{id}/forms");
        assert_eq!(normalize_path("/admin/users/7"), "/admin/users/{id}");
        assert_eq!(normalize_path("/api/compliance-requirements"), "/api/compliance-requirements");
    }

    #[test]
    fn normalize_file_names() {
        assert_eq!(
            normalize_path("/api/files/fridge-photo.jpg"),
            "/api/files/{filename}"
        );
    }

    #[test]
    fn domain_gauges_export() {
        let m = ApiMetrics::new();
        m.audits_total().with_label_values(&["draft"]).set(3.0);
        m.outlets_total().set(2.0);
        let text = m.gather_and_encode().unwrap();
        assert!(text.contains("nexus_audits_total{status=\"draft\"} 3"));
        assert!(text.contains("nexus_outlets_total 2"));
    }
}
