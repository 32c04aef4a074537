//! 重试策略与执行器
//!
//! 提供指数退避重试机制，用于瞬时故障（连接被拒、超时、服务端 5xx 等）的自动恢复。
//! 确定性的业务结果不应被重试，由调用方通过 `is_retryable` 闭包控制。

use std::future::Future;
use std::time::Duration;

use serde::Deserialize;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// RetryPolicy: 重试策略配置
// ---------------------------------------------------------------------------

/// 重试策略配置
///
/// `max_attempts` 是总尝试次数（含首次执行），例如 5 表示最多发起 5 次调用。
/// 两次尝试之间按指数退避等待：initial_delay, initial_delay * multiplier, ...
/// 直到达到 max_delay。
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// 最大尝试次数（含首次执行）
    pub max_attempts: u32,
    /// 首次重试前的等待时间
    #[serde(with = "millis")]
    pub initial_delay: Duration,
    /// 退避时间上限
    #[serde(with = "millis")]
    pub max_delay: Duration,
    /// 每次重试的退避倍数
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    /// 默认策略：最多尝试 5 次，初始等待 500 毫秒，最大等待 5 秒，倍数 2.0
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// 计算第 N 次重试前的等待时间（retry 从 0 开始）
    ///
    /// 公式: initial_delay * multiplier^retry，结果不超过 max_delay。
    pub fn delay_for_attempt(&self, retry: u32) -> Duration {
        let base_ms = self.initial_delay.as_millis() as f64;
        let delay_ms = base_ms * self.multiplier.powi(retry as i32);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped_ms as u64)
    }

    /// 已经尝试 `attempts` 次后是否还能继续
    ///
    /// max_attempts 为 0 时按 1 处理，保证至少执行一次。
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts.max(1)
    }
}

/// 毫秒数与 Duration 之间的 serde 转换，配置文件中统一以毫秒书写
pub mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

// ---------------------------------------------------------------------------
// retry_with_policy: 带重试的异步执行器
// ---------------------------------------------------------------------------

/// 一次带重试执行的结果，附带实际尝试次数
#[derive(Debug)]
pub struct RetryReport<T, E> {
    pub result: Result<T, E>,
    pub attempts: u32,
}

/// 带重试的异步执行器
///
/// 对任意异步操作应用重试策略。仅在操作返回可重试错误时才重试，
/// 不可重试的错误直接返回。无论成败都报告实际尝试次数，便于上层分类和打点。
pub async fn retry_with_policy<F, Fut, T, E>(
    policy: &RetryPolicy,
    operation_name: &str,
    is_retryable: impl Fn(&E) -> bool,
    mut operation: F,
) -> RetryReport<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempts: u32 = 0;

    loop {
        attempts += 1;

        match operation().await {
            Ok(value) => {
                if attempts > 1 {
                    info!(operation = operation_name, attempts, "操作在重试后成功");
                }
                return RetryReport {
                    result: Ok(value),
                    attempts,
                };
            }
            Err(err) => {
                if !is_retryable(&err) {
                    warn!(
                        operation = operation_name,
                        attempts,
                        error = %err,
                        "操作失败且不可重试，直接返回错误"
                    );
                    return RetryReport {
                        result: Err(err),
                        attempts,
                    };
                }

                if !policy.should_retry(attempts) {
                    warn!(
                        operation = operation_name,
                        attempts,
                        max_attempts = policy.max_attempts,
                        error = %err,
                        "已达最大尝试次数，放弃重试"
                    );
                    return RetryReport {
                        result: Err(err),
                        attempts,
                    };
                }

                let delay = policy.delay_for_attempt(attempts - 1);
                warn!(
                    operation = operation_name,
                    attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "操作失败，将在退避后重试"
                );

                tokio::time::sleep(delay).await;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// 单元测试
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            multiplier: 2.0,
        }
    }

    #[test]
    fn test_default_retry_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.initial_delay, Duration::from_millis(500));
        assert_eq!(policy.max_delay, Duration::from_secs(5));
        assert!((policy.multiplier - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_delay_capped_at_max() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
        };

        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(4));
        // 8s -> 受限于 max_delay
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(5));
        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(5));
    }

    #[test]
    fn test_should_retry_counts_total_attempts() {
        let policy = fast_policy(3);
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));

        // 0 次尝试配置仍然保证执行一次
        let zero = fast_policy(0);
        assert!(zero.should_retry(0));
        assert!(!zero.should_retry(1));
    }

    #[test]
    fn test_policy_deserializes_millis() {
        let policy: RetryPolicy = serde_json::from_str(
            r#"{"max_attempts": 3, "initial_delay": 250, "max_delay": 1000}"#,
        )
        .unwrap();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial_delay, Duration::from_millis(250));
        assert_eq!(policy.max_delay, Duration::from_secs(1));
        // 未给出的字段取默认值
        assert!((policy.multiplier - 2.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_retry_with_policy_succeeds_first_try() {
        let call_count = Arc::new(AtomicU32::new(0));
        let counter = call_count.clone();

        let report = retry_with_policy(
            &fast_policy(5),
            "test_op",
            |_: &PipelineError| true,
            || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, PipelineError>(42)
                }
            },
        )
        .await;

        assert_eq!(report.result.unwrap(), 42);
        assert_eq!(report.attempts, 1);
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_with_policy_succeeds_after_retries() {
        let call_count = Arc::new(AtomicU32::new(0));
        let counter = call_count.clone();

        let report = retry_with_policy(
            &fast_policy(5),
            "test_op",
            |_: &PipelineError| true,
            || {
                let counter = counter.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Err(PipelineError::Kafka("模拟瞬时故障".to_string()))
                    } else {
                        Ok(99)
                    }
                }
            },
        )
        .await;

        assert_eq!(report.result.unwrap(), 99);
        assert_eq!(report.attempts, 3);
    }

    #[tokio::test]
    async fn test_retry_with_policy_exhausts_attempts() {
        let call_count = Arc::new(AtomicU32::new(0));
        let counter = call_count.clone();

        let report: RetryReport<i32, _> = retry_with_policy(
            &fast_policy(5),
            "test_op",
            |_: &PipelineError| true,
            || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(PipelineError::Kafka("持续故障".to_string()))
                }
            },
        )
        .await;

        assert!(report.result.is_err());
        assert_eq!(report.attempts, 5);
        assert_eq!(call_count.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_retry_with_policy_stops_on_non_retryable() {
        let report: RetryReport<i32, _> = retry_with_policy(
            &fast_policy(5),
            "test_op",
            |e: &PipelineError| e.is_retryable(),
            || async { Err(PipelineError::QueueClosed) },
        )
        .await;

        assert!(report.result.is_err());
        assert_eq!(report.attempts, 1);
    }
}
