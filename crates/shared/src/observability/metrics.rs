//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取。

use std::net::SocketAddr;

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio::net::TcpListener;
use tracing::{error, info};

use super::ObservabilityConfig;

/// Metrics 资源守卫
pub struct MetricsHandle {
    server_handle: tokio::task::JoinHandle<()>,
}

impl MetricsHandle {
    /// 停止指标 HTTP 服务器
    pub fn shutdown(self) {
        self.server_handle.abort();
    }
}

/// 初始化 Prometheus 指标导出
///
/// 启动一个独立的 HTTP 服务器在指定端口暴露 `/metrics` 端点。
pub async fn init(config: &ObservabilityConfig) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    register_common_metrics();

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle { server_handle })
}

/// 注册指标描述，出现在 /metrics 端点的 HELP 注释中
fn register_common_metrics() {
    metrics::describe_counter!("http_requests_total", "Total number of HTTP requests");
    metrics::describe_histogram!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds"
    );

    metrics::describe_counter!(
        "order_outcomes_total",
        "Resolved order deliveries by final classification"
    );
    metrics::describe_counter!(
        "coupon_validations_total",
        "Coupon validation calls by classified result"
    );
    metrics::describe_counter!(
        "coupon_validation_attempts_total",
        "HTTP attempts made against the coupon validation endpoint"
    );
    metrics::describe_histogram!(
        "coupon_validation_duration_seconds",
        "Coupon validation duration in seconds, retries included"
    );
    metrics::describe_counter!(
        "queue_resolution_errors_total",
        "Failed ack/reject calls against the message queue"
    );
    metrics::describe_counter!(
        "coupon_checks_total",
        "Coupon checks answered by the validation endpoint"
    );
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

/// 记录 HTTP 请求
#[inline]
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let status_str = status.to_string();
    metrics::counter!(
        "http_requests_total",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status_str.clone()
    )
    .increment(1);

    metrics::histogram!(
        "http_request_duration_seconds",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status_str
    )
    .record(duration_secs);
}

/// 记录一条消息的最终分类（Valid / Invalid / TransientFailure / DecodeError）
#[inline]
pub fn record_order_outcome(outcome: &str) {
    metrics::counter!("order_outcomes_total", "outcome" => outcome.to_string()).increment(1);
}

/// 记录一次优惠券校验调用
#[inline]
pub fn record_coupon_validation(result: &str, attempts: u32, duration_secs: f64) {
    metrics::counter!("coupon_validations_total", "result" => result.to_string()).increment(1);
    metrics::counter!("coupon_validation_attempts_total").increment(u64::from(attempts));
    metrics::histogram!(
        "coupon_validation_duration_seconds",
        "result" => result.to_string()
    )
    .record(duration_secs);
}

/// 记录 ack / reject 失败
#[inline]
pub fn record_resolution_error(action: &str) {
    metrics::counter!("queue_resolution_errors_total", "action" => action.to_string())
        .increment(1);
}

/// 记录校验服务的一次应答
#[inline]
pub fn record_coupon_check(status: &str) {
    metrics::counter!("coupon_checks_total", "status" => status.to_string()).increment(1);
}
