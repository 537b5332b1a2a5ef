//! Observability Module
//!
//! - `health` - 健康检查，挂起市场时降级
//! - `http_server` - `/metrics` 与 `/health*` 端点

pub mod health;
pub mod http_server;

pub use health::{HealthChecker, HealthDetails, HealthResponse, HealthSource, HealthStatus};
pub use http_server::ObservabilityServer;
