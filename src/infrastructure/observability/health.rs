//! Health Check
//!
//! 汇总引擎状态，供负载均衡器和监控系统使用
//!
//! ## 状态规则
//! - `unhealthy`: 被显式标记（例如正在关闭）
//! - `degraded`: 至少一个市场被挂起，其余市场照常撮合
//! - `healthy`: 其他情况
//!
//! ## 响应格式
//! ```json
//! {
//!   "status": "degraded",
//!   "uptime_seconds": 3600,
//!   "version": "0.1.0",
//!   "timestamp": 1234567890,
//!   "details": {
//!     "active_markets": 12,
//!     "suspended_markets": [{ "market": "7:1", "reason": "event log append failed" }]
//!   }
//! }
//! ```

use crate::domain::entities::MarketKey;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// 健康状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    /// 部分市场不可写
    Degraded,
    Unhealthy,
}

/// Where the checker reads market state from.
pub trait HealthSource: Send + Sync {
    fn active_markets(&self) -> usize;

    /// Suspended markets with the reason each was suspended.
    fn suspended_markets(&self) -> Vec<(MarketKey, String)>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuspendedMarket {
    pub market: String,
    pub reason: String,
}

/// 详细健康信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthDetails {
    pub active_markets: usize,
    pub suspended_markets: Vec<SuspendedMarket>,
}

/// 健康检查响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub uptime_seconds: u64,
    pub version: String,
    pub timestamp: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<HealthDetails>,
}

/// 健康检查器
pub struct HealthChecker {
    start_time: SystemTime,
    /// 显式设置的基础状态
    status: RwLock<HealthStatus>,
    version: String,
    source: Option<Arc<dyn HealthSource>>,
}

impl HealthChecker {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            start_time: SystemTime::now(),
            status: RwLock::new(HealthStatus::Healthy),
            version: version.into(),
            source: None,
        }
    }

    /// 从市场注册表读取挂起状态
    pub fn with_source(mut self, source: Arc<dyn HealthSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().map(|d| d.as_secs()).unwrap_or(0)
    }

    fn current_timestamp() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }

    pub fn set_status(&self, status: HealthStatus) {
        *self.status.write() = status;
    }

    /// 基础状态叠加市场挂起情况
    pub fn get_status(&self) -> HealthStatus {
        let base = *self.status.read();
        if base != HealthStatus::Healthy {
            return base;
        }
        match &self.source {
            Some(source) if !source.suspended_markets().is_empty() => HealthStatus::Degraded,
            _ => HealthStatus::Healthy,
        }
    }

    pub fn details(&self) -> Option<HealthDetails> {
        let source = self.source.as_ref()?;
        Some(HealthDetails {
            active_markets: source.active_markets(),
            suspended_markets: source
                .suspended_markets()
                .into_iter()
                .map(|(market, reason)| SuspendedMarket {
                    market: market.to_string(),
                    reason,
                })
                .collect(),
        })
    }

    pub fn check_health(&self) -> HealthResponse {
        HealthResponse {
            status: self.get_status(),
            uptime_seconds: self.uptime_seconds(),
            version: self.version.clone(),
            timestamp: Self::current_timestamp(),
            details: self.details(),
        }
    }

    /// liveness probe: 进程能响应即存活
    pub fn check_liveness(&self) -> bool {
        true
    }

    /// readiness probe: 挂起个别市场不影响接收流量
    pub fn check_readiness(&self) -> bool {
        self.get_status() != HealthStatus::Unhealthy
    }
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new(env!("CARGO_PKG_VERSION"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct FakeSource {
        suspended: Mutex<Vec<(MarketKey, String)>>,
    }

    impl HealthSource for FakeSource {
        fn active_markets(&self) -> usize {
            3
        }

        fn suspended_markets(&self) -> Vec<(MarketKey, String)> {
            self.suspended.lock().clone()
        }
    }

    #[test]
    fn test_health_checker_creation() {
        let checker = HealthChecker::new("1.0.0");
        assert_eq!(checker.version, "1.0.0");
        assert_eq!(checker.get_status(), HealthStatus::Healthy);
        assert!(checker.check_health().details.is_none());
    }

    #[test]
    fn test_suspended_market_degrades() {
        let source = Arc::new(FakeSource::default());
        let checker = HealthChecker::new("1.0.0").with_source(source.clone());
        assert_eq!(checker.get_status(), HealthStatus::Healthy);

        source
            .suspended
            .lock()
            .push((MarketKey::new(7, 1), "event log append failed".into()));
        let response = checker.check_health();
        assert_eq!(response.status, HealthStatus::Degraded);
        assert!(checker.check_readiness());

        let details = response.details.unwrap();
        assert_eq!(details.active_markets, 3);
        assert_eq!(details.suspended_markets[0].market, "7:1");

        source.suspended.lock().clear();
        assert_eq!(checker.get_status(), HealthStatus::Healthy);
    }

    #[test]
    fn test_explicit_status_wins() {
        let checker = HealthChecker::new("1.0.0").with_source(Arc::new(FakeSource::default()));
        checker.set_status(HealthStatus::Unhealthy);
        assert_eq!(checker.get_status(), HealthStatus::Unhealthy);
        assert!(!checker.check_readiness());
    }

    #[test]
    fn test_serialization() {
        let response = HealthChecker::new("1.0.0").check_health();
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("healthy"));
        assert!(json.contains("1.0.0"));
        assert!(!json.contains("details"));
    }
}
