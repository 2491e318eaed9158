//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取；同一端口提供 /health 探针。

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::config::ObservabilityConfig;

/// 扇出事件处理结果标签
pub mod outcome {
    pub const ACKED: &str = "acked";
    pub const REJECTED: &str = "rejected";
}

/// Metrics 资源守卫
///
/// Drop 时终止指标 HTTP 服务器。
pub struct MetricsHandle {
    server_handle: tokio::task::JoinHandle<()>,
}

impl Drop for MetricsHandle {
    fn drop(&mut self) {
        self.server_handle.abort();
    }
}

/// 初始化 Prometheus 指标导出
///
/// 启动一个独立的 HTTP 服务器在指定端口暴露 `/metrics` 与 `/health` 端点。
pub async fn init(config: &ObservabilityConfig, service_name: &str) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    register_fanout_metrics(service_name);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle { server_handle })
}

/// 描述扇出相关指标，描述文本出现在 /metrics 的 HELP 注释中
fn register_fanout_metrics(service_name: &str) {
    metrics::describe_counter!(
        "fanout_events_total",
        "Activity events processed, labelled by outcome (acked/rejected)"
    );
    metrics::describe_counter!(
        "fanout_failures_total",
        "Activity events rejected, labelled by failing stage"
    );
    metrics::describe_counter!(
        "fanout_notifications_total",
        "Notifications persisted by fan-out"
    );
    metrics::describe_counter!(
        "fanout_cache_invalidation_failures_total",
        "Fan-out batches whose cache invalidation failed"
    );
    metrics::describe_histogram!(
        "fanout_event_duration_seconds",
        "Time from receiving an activity event to ack/reject"
    );

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

/// 启动指标 HTTP 服务器
async fn start_metrics_server(
    addr: SocketAddr,
    handle: PrometheusHandle,
) -> Result<tokio::task::JoinHandle<()>> {
    let app = Router::new()
        .route("/metrics", get(move || std::future::ready(handle.render())))
        .route("/health", get(|| async { "OK" }));

    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok(server_handle)
}

// ============================================================================
// 指标记录函数
// ============================================================================

/// 记录一条活动事件的最终结果与耗时
#[inline]
pub fn record_fanout_event(outcome: &'static str, duration_secs: f64) {
    metrics::counter!("fanout_events_total", "outcome" => outcome).increment(1);
    metrics::histogram!("fanout_event_duration_seconds", "outcome" => outcome)
        .record(duration_secs);
}

/// 记录扇出失败所在阶段（decode / resolve / persist）
#[inline]
pub fn record_fanout_failure(stage: &'static str) {
    metrics::counter!("fanout_failures_total", "stage" => stage).increment(1);
}

/// 记录写入的通知条数
#[inline]
pub fn record_notifications_created(count: usize) {
    metrics::counter!("fanout_notifications_total").increment(count as u64);
}

/// 记录缓存失效失败
#[inline]
pub fn record_cache_invalidation_failure() {
    metrics::counter!("fanout_cache_invalidation_failures_total").increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_functions_do_not_panic() {
        // 即使没有初始化 recorder，这些函数也不应该 panic
        record_fanout_event(outcome::ACKED, 0.01);
        record_fanout_event(outcome::REJECTED, 0.02);
        record_fanout_failure("decode");
        record_notifications_created(3);
        record_cache_invalidation_failure();
    }
}
