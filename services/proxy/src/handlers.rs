//! Admin-plane handlers for health checks and metrics

use crate::store::bots::BotRegistry;
use axum::{
    extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router,
};
use proxywall_common::redis::RedisHandle;
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AdminState {
    pub redis: Arc<RedisHandle>,
    pub bots: Arc<BotRegistry>,
}

/// Create the admin router
pub fn admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/health/live", get(liveness_check))
        .route("/health/ready", get(readiness_check))
        .route("/metrics", get(metrics))
        .route("/version", get(version))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health status response
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    redis: Option<&'static str>,
    crawler_ranges: usize,
}

/// Main health check endpoint
async fn health_check(State(state): State<AdminState>) -> impl IntoResponse {
    let mut redis_status = None;
    let mut overall_healthy = true;

    if state.redis.is_active() {
        match state.redis.ping().await {
            Ok(()) => redis_status = Some("healthy"),
            Err(_) => {
                redis_status = Some("unhealthy");
                overall_healthy = false;
            }
        }
    }

    let response = HealthResponse {
        status: if overall_healthy {
            "healthy"
        } else {
            "unhealthy"
        },
        service: "proxywall",
        version: env!("CARGO_PKG_VERSION"),
        redis: redis_status,
        crawler_ranges: state.bots.len(),
    };

    let status_code = if overall_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(response))
}

/// Kubernetes liveness probe
async fn liveness_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Kubernetes readiness probe; the firewall degrades to local-only caches
/// when the external store is down, so readiness does not depend on it
async fn readiness_check() -> impl IntoResponse {
    (StatusCode::OK, "READY")
}

/// Prometheus metrics endpoint
async fn metrics() -> impl IntoResponse {
    let metrics = proxywall_common::metrics::gather();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        metrics,
    )
}

/// Version information
#[derive(Serialize)]
struct VersionResponse {
    version: &'static str,
    git_commit: &'static str,
    build_time: &'static str,
}

async fn version() -> impl IntoResponse {
    Json(VersionResponse {
        version: env!("CARGO_PKG_VERSION"),
        git_commit: option_env!("GIT_COMMIT").unwrap_or("unknown"),
        build_time: option_env!("BUILD_TIME").unwrap_or("unknown"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proxywall_common::config::BotFeedConfig;

    fn state() -> AdminState {
        AdminState {
            redis: RedisHandle::disabled(),
            bots: BotRegistry::new(RedisHandle::disabled(), BotFeedConfig::default()),
        }
    }

    #[tokio::test]
    async fn test_health_without_redis() {
        let response = health_check(State(state())).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_probes() {
        let live = liveness_check().await.into_response();
        assert_eq!(live.status(), StatusCode::OK);
        let ready = readiness_check().await.into_response();
        assert_eq!(ready.status(), StatusCode::OK);
    }
}
