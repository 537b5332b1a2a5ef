//! HTTP Observability Server
//!
//! 提供Prometheus metrics和健康检查端点
//!
//! ## 端点
//! - `GET /metrics` - Prometheus格式的指标
//! - `GET /health` - 健康检查（含挂起市场列表）
//! - `GET /health/ready` - 就绪检查
//! - `GET /health/live` - 存活检查
//!
//! ## 使用示例
//! ```rust,ignore
//! let server = ObservabilityServer::new(9090, checker);
//! tokio::spawn(server.run());
//! ```

use super::health::{HealthChecker, HealthStatus};
use crate::shared::metrics::METRICS;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

/// 可观测性服务器
pub struct ObservabilityServer {
    addr: SocketAddr,
    health_checker: Arc<HealthChecker>,
}

impl ObservabilityServer {
    pub fn new(port: u16, health_checker: Arc<HealthChecker>) -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], port)),
            health_checker,
        }
    }

    pub fn health_checker(&self) -> Arc<HealthChecker> {
        self.health_checker.clone()
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/metrics", get(metrics_handler))
            .route("/health", get(health_handler))
            .route("/health/ready", get(readiness_handler))
            .route("/health/live", get(liveness_handler))
            .with_state(self.health_checker.clone())
    }

    /// 启动HTTP服务器，直到监听失败才返回
    pub async fn run(self) -> std::io::Result<()> {
        let app = self.router();
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        info!(addr = %self.addr, "observability server listening");
        axum::serve(listener, app).await
    }
}

async fn metrics_handler() -> Response {
    (StatusCode::OK, METRICS.export()).into_response()
}

async fn health_handler(State(checker): State<Arc<HealthChecker>>) -> Response {
    let response = checker.check_health();
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response)).into_response()
}

/// Kubernetes readiness probe
async fn readiness_handler(State(checker): State<Arc<HealthChecker>>) -> StatusCode {
    if checker.check_readiness() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Kubernetes liveness probe
async fn liveness_handler(State(checker): State<Arc<HealthChecker>>) -> StatusCode {
    if checker.check_liveness() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observability_server_creation() {
        let server = ObservabilityServer::new(9090, Arc::new(HealthChecker::new("1.0.0")));
        assert_eq!(server.addr.port(), 9090);
    }

    #[tokio::test]
    async fn test_metrics_handler() {
        METRICS.trades_total.with_label_values(&["1:1"]).inc();
        let response = metrics_handler().await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health_status_codes() {
        let checker = Arc::new(HealthChecker::new("1.0.0"));
        assert_eq!(health_handler(State(checker.clone())).await.status(), StatusCode::OK);
        assert_eq!(readiness_handler(State(checker.clone())).await, StatusCode::OK);

        checker.set_status(HealthStatus::Unhealthy);
        assert_eq!(
            health_handler(State(checker.clone())).await.status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(readiness_handler(State(checker.clone())).await, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(liveness_handler(State(checker)).await, StatusCode::OK);
    }
}
