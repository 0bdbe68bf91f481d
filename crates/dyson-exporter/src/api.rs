//! HTTP endpoints.
//!
//! - `GET /metrics`: Prometheus text exposition of the registry
//! - `GET /api/health`: liveness check
//! - `GET /api/status`: collector state and per-device statistics
//! - `GET /api/devices/{serial}`: statistics for one device
//!
//! Scrapes never fail: `/metrics` renders whatever the registry holds,
//! including stale values of unreachable devices.
//!
//! # Example
//!
//! ```ignore
//! use dyson_exporter::api;
//!
//! let app = api::router().with_state(state);
//! ```

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{StatusCode, header},
    response::IntoResponse,
    routing::get,
};
use serde::Serialize;
use time::OffsetDateTime;

use crate::registry::CONTENT_TYPE;
use crate::state::{AppState, DeviceCollectionStats};

/// Create the router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/metrics", get(metrics))
        .route("/api/health", get(health))
        .route("/api/status", get(get_status))
        .route("/api/devices/{serial}", get(get_device))
}

async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, CONTENT_TYPE)],
        state.registry.encode_text(),
    )
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: OffsetDateTime::now_utc(),
    })
}

/// Service status response.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub version: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub collector: CollectorStatus,
    /// Per-device collection statistics.
    pub devices: Vec<DeviceCollectionStats>,
}

/// Collector status.
#[derive(Debug, Serialize)]
pub struct CollectorStatus {
    pub running: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    /// How long the collector has been running (in seconds).
    pub uptime_seconds: Option<u64>,
    /// Number of declared metric families.
    pub metric_families: usize,
}

async fn get_status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let running = state.collector.is_running();
    let started_at = state.collector.started_at();
    let uptime_seconds = started_at.map(|s| {
        let now = OffsetDateTime::now_utc();
        (now - s).whole_seconds().max(0) as u64
    });

    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION"),
        timestamp: OffsetDateTime::now_utc(),
        collector: CollectorStatus {
            running,
            started_at,
            uptime_seconds,
            metric_families: state.registry.metric_names().len(),
        },
        devices: state.collector.devices(),
    })
}

async fn get_device(
    State(state): State<Arc<AppState>>,
    Path(serial): Path<String>,
) -> Result<Json<DeviceCollectionStats>, AppError> {
    state
        .collector
        .devices()
        .into_iter()
        .find(|d| d.serial.eq_ignore_ascii_case(&serial))
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Device {} is not monitored", serial)))
}

/// Application error type.
#[derive(Debug)]
pub enum AppError {
    NotFound(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use dyson_types::DeviceIdentity;

    use crate::config::Config;
    use crate::registry::MetricRegistry;
    use crate::schema;
    use crate::state::{CollectorState, Trigger};

    fn create_test_state() -> Arc<AppState> {
        let registry = Arc::new(MetricRegistry::new());
        schema::register_all(&registry).unwrap();
        AppState::new(registry, Arc::new(CollectorState::new()), Config::default())
    }

    async fn response_body(response: axum::response::Response) -> String {
        let body = response.into_body();
        let bytes = body.collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    async fn get(state: Arc<AppState>, uri: &str) -> axum::response::Response {
        router()
            .with_state(state)
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let response = get(create_test_state(), "/api/health").await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = response_body(response).await;
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();

        assert_eq!(json["status"], "ok");
        assert!(json["version"].is_string());
        assert!(json["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_metrics_empty_registry() {
        let response = get(create_test_state(), "/metrics").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            CONTENT_TYPE
        );

        assert!(response_body(response).await.is_empty());
    }

    #[tokio::test]
    async fn test_metrics_renders_samples() {
        let state = create_test_state();
        state
            .registry
            .set_gauge(
                schema::HUMIDITY,
                &[("name", "Hall"), ("serial", "AAA-1")],
                41.0,
            )
            .unwrap();

        let body = response_body(get(state, "/metrics").await).await;
        assert!(body.contains("# TYPE dyson_humidity_percent gauge"));
        assert!(body.contains(r#"dyson_humidity_percent{name="Hall",serial="AAA-1"} 41"#));
    }

    #[tokio::test]
    async fn test_status_endpoint() {
        let state = create_test_state();
        let identity = DeviceIdentity::new("AAA-1", "Hall", "475", true).unwrap();
        state.collector.track(&identity);
        state.collector.record_success("AAA-1", Trigger::Poll);
        state.collector.set_running(true);

        let response = get(state, "/api/status").await;
        assert_eq!(response.status(), StatusCode::OK);

        let json: serde_json::Value =
            serde_json::from_str(&response_body(response).await).unwrap();
        assert_eq!(json["collector"]["running"], true);
        assert!(json["collector"]["uptime_seconds"].is_u64());
        assert_eq!(
            json["collector"]["metric_families"],
            schema::METRICS.len()
        );
        assert_eq!(json["devices"][0]["serial"], "AAA-1");
        assert_eq!(json["devices"][0]["status"], "connected");
        assert_eq!(json["devices"][0]["poll_success_count"], 1);
    }

    #[tokio::test]
    async fn test_device_endpoint() {
        let state = create_test_state();
        let identity = DeviceIdentity::new("AAA-1", "Hall", "475", true).unwrap();
        state.collector.track(&identity);

        let response = get(Arc::clone(&state), "/api/devices/aaa-1").await;
        assert_eq!(response.status(), StatusCode::OK);
        let json: serde_json::Value =
            serde_json::from_str(&response_body(response).await).unwrap();
        assert_eq!(json["name"], "Hall");

        let response = get(state, "/api/devices/BBB-2").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let json: serde_json::Value =
            serde_json::from_str(&response_body(response).await).unwrap();
        assert!(json["error"].as_str().unwrap().contains("BBB-2"));
    }
}
