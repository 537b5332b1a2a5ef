//! Prometheus Metrics Module
//!
//! 撮合引擎与分布式协调层的核心指标
//!
//! ## 指标类型
//! - **Counter**: 订单、成交、撤单、队列饱和、租约争用、持久化失败、投递失败
//! - **Histogram**: 撮合延迟（微秒）
//! - **Gauge**: 挂起市场数、分区队列深度
//!
//! ## 使用示例
//! ```rust,ignore
//! use outcome_engine::shared::metrics::METRICS;
//!
//! METRICS.orders_total.with_label_values(&["buy", "12:1"]).inc();
//!
//! let timer = METRICS.matching_duration.with_label_values(&["12:1"]).start_timer();
//! // ... 执行撮合 ...
//! timer.observe_duration();
//! ```

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram_vec,
    CounterVec, Encoder, Gauge, GaugeVec, HistogramVec, TextEncoder,
};

lazy_static! {
    /// 全局Metrics实例
    pub static ref METRICS: Metrics = Metrics::new();
}

pub struct Metrics {
    /// 订单总数 (side, market)
    pub orders_total: CounterVec,

    /// 成交总数 (market)
    pub trades_total: CounterVec,

    /// 撤单总数 (market, status)
    pub cancellations_total: CounterVec,

    /// 撮合延迟分布 (微秒)
    pub matching_duration: HistogramVec,

    /// 提交队列满被拒绝的次数 (partition)
    pub queue_saturated_total: CounterVec,

    /// 分区队列当前深度
    pub partition_queue_depth: GaugeVec,

    /// 租约获取失败次数 (market)
    pub lease_contention_total: CounterVec,

    /// 事件日志写入失败次数 (market)
    pub durability_failures_total: CounterVec,

    /// 当前被挂起的市场数量
    pub suspended_markets: Gauge,

    /// 出站通知投递失败次数 (subscriber)
    pub delivery_failures_total: CounterVec,

    /// 超时后才完成的订单数 (market)
    pub late_results_total: CounterVec,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            orders_total: register_counter_vec!(
                "outcome_engine_orders_total",
                "Total number of orders accepted",
                &["side", "market"]
            )
            .unwrap(),

            trades_total: register_counter_vec!(
                "outcome_engine_trades_total",
                "Total number of trades executed",
                &["market"]
            )
            .unwrap(),

            cancellations_total: register_counter_vec!(
                "outcome_engine_cancellations_total",
                "Total number of order cancellations",
                &["market", "status"]
            )
            .unwrap(),

            matching_duration: register_histogram_vec!(
                "outcome_engine_matching_duration_microseconds",
                "Order matching duration in microseconds, including the log append",
                &["market"],
                vec![10.0, 50.0, 100.0, 500.0, 1000.0, 5000.0, 20000.0, 100000.0]
            )
            .unwrap(),

            queue_saturated_total: register_counter_vec!(
                "outcome_engine_queue_saturated_total",
                "Submissions rejected because a partition queue was full",
                &["partition"]
            )
            .unwrap(),

            partition_queue_depth: register_gauge_vec!(
                "outcome_engine_partition_queue_depth",
                "Pending submissions per partition",
                &["partition"]
            )
            .unwrap(),

            lease_contention_total: register_counter_vec!(
                "outcome_engine_lease_contention_total",
                "Lease acquisitions that failed after all retries",
                &["market"]
            )
            .unwrap(),

            durability_failures_total: register_counter_vec!(
                "outcome_engine_durability_failures_total",
                "Event log append failures",
                &["market"]
            )
            .unwrap(),

            suspended_markets: register_gauge!(
                "outcome_engine_suspended_markets",
                "Markets currently suspended on this instance"
            )
            .unwrap(),

            delivery_failures_total: register_counter_vec!(
                "outcome_engine_delivery_failures_total",
                "Outbound notifications dropped after exhausting retries",
                &["subscriber"]
            )
            .unwrap(),

            late_results_total: register_counter_vec!(
                "outcome_engine_late_results_total",
                "Orders that completed after their caller timed out",
                &["market"]
            )
            .unwrap(),
        }
    }

    /// 导出Prometheus格式的指标
    pub fn export(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = prometheus::gather();
        let mut buffer = vec![];
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::warn!(error = %e, "failed to encode metrics");
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_global() {
        METRICS.orders_total.with_label_values(&["buy", "0:0"]).inc();
        let output = METRICS.export();
        assert!(output.contains("outcome_engine_orders_total"));
    }

    #[test]
    fn test_histogram_global() {
        METRICS.matching_duration.with_label_values(&["0:0"]).observe(125.5);
        let output = METRICS.export();
        assert!(output.contains("outcome_engine_matching_duration_microseconds"));
    }

    #[test]
    fn test_gauge_global() {
        // 全局共享，只验证能导出
        METRICS.suspended_markets.set(0.0);
        let output = METRICS.export();
        assert!(output.contains("outcome_engine_suspended_markets"));
    }
}
