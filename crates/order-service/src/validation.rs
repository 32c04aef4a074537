//! 优惠券校验客户端
//!
//! 通过 HTTP 表单 `coupon=<code>` 调用校验端点，对瞬时故障做有界重试，
//! 并把所有结果归类为 `ValidationOutcome`，调用方不会收到错误值。
//! 通过 CouponValidator trait 抽象调用，便于测试时注入 mock 实现。

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use coupon_shared::config::ValidationConfig;
use coupon_shared::observability::metrics;
use coupon_shared::retry::{RetryPolicy, RetryReport, retry_with_policy};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::OrderServiceError;

// ---------------------------------------------------------------------------
// 校验结果
// ---------------------------------------------------------------------------

/// 瞬时失败的具体原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// 传输层失败或可重试状态码，且尝试次数已用尽
    Unreachable,
    /// 整体时限已到
    DeadlineExceeded,
    /// 不可重试的非 2xx 状态码
    UnexpectedStatus(u16),
    /// 响应体无法解析，或状态字面量既不是 valid 也不是 invalid
    UnexpectedResponse(String),
}

impl FailureReason {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Unreachable => "unreachable",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::UnexpectedStatus(_) => "unexpected_status",
            Self::UnexpectedResponse(_) => "unexpected_response",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unreachable => write!(f, "校验服务不可达"),
            Self::DeadlineExceeded => write!(f, "校验超出整体时限"),
            Self::UnexpectedStatus(code) => write!(f, "校验服务返回异常状态码 {code}"),
            Self::UnexpectedResponse(detail) => write!(f, "校验服务响应无法识别: {detail}"),
        }
    }
}

/// 一次校验的分类结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    Valid,
    Invalid,
    TransientFailure { reason: FailureReason, attempts: u32 },
}

impl ValidationOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Valid => "valid",
            Self::Invalid => "invalid",
            Self::TransientFailure { .. } => "transient_failure",
        }
    }
}

// ---------------------------------------------------------------------------
// Trait 抽象
// ---------------------------------------------------------------------------

/// 优惠券校验接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CouponValidator: Send + Sync {
    /// 校验优惠券代码；失败也以 `TransientFailure` 返回，不会出错
    async fn validate(&self, coupon_code: &str) -> ValidationOutcome;
}

// ---------------------------------------------------------------------------
// HTTP 实现
// ---------------------------------------------------------------------------

/// 单次尝试的失败，决定是否继续重试
#[derive(Debug, thiserror::Error)]
enum AttemptError {
    #[error("请求发送失败: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("可重试的状态码 {0}")]
    RetryableStatus(StatusCode),

    #[error("不可重试的状态码 {0}")]
    Status(StatusCode),

    #[error("{0}")]
    Response(String),
}

impl AttemptError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::RetryableStatus(_))
    }

    fn into_reason(self) -> FailureReason {
        match self {
            Self::Transport(_) | Self::RetryableStatus(_) => FailureReason::Unreachable,
            Self::Status(code) => FailureReason::UnexpectedStatus(code.as_u16()),
            Self::Response(detail) => FailureReason::UnexpectedResponse(detail),
        }
    }
}

/// 校验端点的响应体；兼容旧端点返回的 `Status` 字段名
#[derive(Debug, Deserialize)]
struct ValidationResponse {
    #[serde(alias = "Status")]
    status: String,
}

/// 基于 reqwest 的校验客户端
///
/// 单次尝试的超时设置在 HTTP 客户端上，整体时限包住整个重试序列。
pub struct HttpCouponValidator {
    client: reqwest::Client,
    endpoint: Url,
    retry: RetryPolicy,
    overall_timeout: Duration,
}

impl HttpCouponValidator {
    pub fn new(config: &ValidationConfig) -> Result<Self, OrderServiceError> {
        let endpoint = Url::parse(&config.endpoint_url)
            .map_err(|e| OrderServiceError::InvalidEndpoint(format!("{}: {e}", config.endpoint_url)))?;

        let client = reqwest::Client::builder()
            .timeout(config.attempt_timeout)
            .build()
            .map_err(|e| OrderServiceError::HttpClient(e.to_string()))?;

        info!(
            endpoint = %endpoint,
            max_attempts = config.retry.max_attempts,
            attempt_timeout_ms = config.attempt_timeout.as_millis() as u64,
            overall_timeout_ms = config.overall_timeout.as_millis() as u64,
            "优惠券校验客户端已初始化"
        );

        Ok(Self {
            client,
            endpoint,
            retry: config.retry.clone(),
            overall_timeout: config.overall_timeout,
        })
    }

    async fn attempt(&self, coupon_code: &str) -> Result<ValidationOutcome, AttemptError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .form(&[("coupon", coupon_code)])
            .send()
            .await?;

        let status = response.status();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(AttemptError::RetryableStatus(status));
        }
        if !status.is_success() {
            return Err(AttemptError::Status(status));
        }

        let body = response.bytes().await?;
        let parsed: ValidationResponse = serde_json::from_slice(&body).map_err(|e| {
            AttemptError::Response(format!(
                "{e}: {}",
                String::from_utf8_lossy(&body[..body.len().min(128)])
            ))
        })?;

        match parsed.status.as_str() {
            "valid" => Ok(ValidationOutcome::Valid),
            "invalid" => Ok(ValidationOutcome::Invalid),
            other => Err(AttemptError::Response(format!("未知状态 {other:?}"))),
        }
    }
}

fn classify(report: RetryReport<ValidationOutcome, AttemptError>) -> ValidationOutcome {
    match report.result {
        Ok(outcome) => outcome,
        Err(err) => ValidationOutcome::TransientFailure {
            reason: err.into_reason(),
            attempts: report.attempts,
        },
    }
}

#[async_trait]
impl CouponValidator for HttpCouponValidator {
    // 优惠券代码不进入 span
    #[tracing::instrument(skip_all, fields(endpoint = %self.endpoint))]
    async fn validate(&self, coupon_code: &str) -> ValidationOutcome {
        let started = Instant::now();
        let attempts = AtomicU32::new(0);

        let sequence = retry_with_policy(
            &self.retry,
            "coupon_validation",
            AttemptError::is_retryable,
            || {
                attempts.fetch_add(1, Ordering::Relaxed);
                self.attempt(coupon_code)
            },
        );

        let outcome = match tokio::time::timeout(self.overall_timeout, sequence).await {
            Ok(report) => classify(report),
            Err(_) => {
                warn!(
                    timeout_ms = self.overall_timeout.as_millis() as u64,
                    "优惠券校验超出整体时限"
                );
                ValidationOutcome::TransientFailure {
                    reason: FailureReason::DeadlineExceeded,
                    attempts: attempts.load(Ordering::Relaxed),
                }
            }
        };

        let attempts = attempts.load(Ordering::Relaxed);
        metrics::record_coupon_validation(
            outcome.label(),
            attempts,
            started.elapsed().as_secs_f64(),
        );
        debug!(outcome = outcome.label(), attempts, "优惠券校验完成");

        outcome
    }
}

// ---------------------------------------------------------------------------
// 单元测试
// ---------------------------------------------------------------------------
