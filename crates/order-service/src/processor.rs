//! 订单消息处理器
//!
//! 负责单条消息的完整生命周期：解码 -> 校验 -> 分类 -> ack/reject。
//! 每条消息恰好被终结一次，并产生一条结构化日志和一次指标计数。

use std::sync::Arc;

use coupon_shared::error::PipelineError;
use coupon_shared::observability::metrics;
use coupon_shared::queue::Delivery;
use tracing::{error, info, warn};

use crate::order::decode;
use crate::validation::{CouponValidator, ValidationOutcome};

/// 消息处理后的最终分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Valid,
    Invalid,
    TransientFailure,
    DecodeError,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Valid => "valid",
            Self::Invalid => "invalid",
            Self::TransientFailure => "transient_failure",
            Self::DecodeError => "decode_error",
        }
    }
}

impl From<&ValidationOutcome> for Classification {
    fn from(outcome: &ValidationOutcome) -> Self {
        match outcome {
            ValidationOutcome::Valid => Self::Valid,
            ValidationOutcome::Invalid => Self::Invalid,
            ValidationOutcome::TransientFailure { .. } => Self::TransientFailure,
        }
    }
}

/// 对消息执行的终结动作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Ack,
    Reject { requeue: bool },
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ack => "ack",
            Self::Reject { requeue: true } => "requeue",
            Self::Reject { requeue: false } => "reject",
        }
    }
}

/// 根据分类和投递次数决定终结动作
///
/// 瞬时失败只在投递次数低于 `transient_requeue_limit` 时重新入队，
/// 上限为 0 时一律转入死信。
pub fn decide(
    classification: Classification,
    delivery_count: u32,
    transient_requeue_limit: u32,
) -> Action {
    match classification {
        Classification::Valid | Classification::Invalid => Action::Ack,
        Classification::DecodeError => Action::Reject { requeue: false },
        Classification::TransientFailure => Action::Reject {
            requeue: delivery_count < transient_requeue_limit,
        },
    }
}

/// 单条消息的处理记录
#[derive(Debug, Clone)]
pub struct ProcessedDelivery {
    pub tag: String,
    /// 解码失败时为 None
    pub order_id: Option<String>,
    pub classification: Classification,
    pub action: Action,
    pub outcome: Option<ValidationOutcome>,
    /// ack/reject 调用本身是否失败
    pub resolution_failed: bool,
    /// reject 的转投失败，消息未离开原位置，消费循环必须停下
    pub handoff_failed: bool,
}

/// 订单处理器
pub struct OrderProcessor {
    validator: Arc<dyn CouponValidator>,
    transient_requeue_limit: u32,
}

impl OrderProcessor {
    pub fn new(validator: Arc<dyn CouponValidator>, transient_requeue_limit: u32) -> Self {
        Self {
            validator,
            transient_requeue_limit,
        }
    }

    /// 处理一条消息并终结它
    ///
    /// 不返回错误：解码失败、校验失败、ack/reject 失败都体现在返回的记录里。
    pub async fn process<D: Delivery>(&self, delivery: D) -> ProcessedDelivery {
        let tag = delivery.tag();
        let delivery_count = delivery.delivery_count();

        let decoded = decode(delivery.body());
        let (order_id, classification, outcome, reason) = match decoded {
            Ok(order) => {
                let outcome = self.validator.validate(&order.coupon_code).await;
                let reason = match &outcome {
                    ValidationOutcome::Valid => "优惠券有效".to_string(),
                    ValidationOutcome::Invalid => "优惠券无效".to_string(),
                    ValidationOutcome::TransientFailure { reason, attempts } => {
                        format!("{reason}（尝试 {attempts} 次）")
                    }
                };
                (
                    Some(order.id),
                    Classification::from(&outcome),
                    Some(outcome),
                    reason,
                )
            }
            Err(err) => (None, Classification::DecodeError, None, err.to_string()),
        };

        let action = decide(classification, delivery_count, self.transient_requeue_limit);

        let resolution = match action {
            Action::Ack => delivery.ack().await,
            Action::Reject { requeue } => delivery.reject(requeue, &reason).await,
        };

        let handoff_failed = matches!(resolution, Err(PipelineError::Handoff { .. }));
        let resolution_failed = match resolution {
            Ok(()) => false,
            Err(err) => {
                error!(
                    tag = %tag,
                    action = action.as_str(),
                    code = err.code(),
                    error = %err,
                    "消息终结动作执行失败"
                );
                metrics::record_resolution_error(action.as_str());
                true
            }
        };

        let subject = order_id.as_deref().unwrap_or(&tag);
        match classification {
            Classification::Valid | Classification::Invalid => info!(
                order_id = subject,
                classification = classification.as_str(),
                action = action.as_str(),
                reason = %reason,
                "订单处理完成"
            ),
            Classification::TransientFailure | Classification::DecodeError => warn!(
                order_id = subject,
                classification = classification.as_str(),
                action = action.as_str(),
                delivery_count,
                reason = %reason,
                "订单处理失败"
            ),
        }
        metrics::record_order_outcome(classification.as_str());

        ProcessedDelivery {
            tag,
            order_id,
            classification,
            action,
            outcome,
            resolution_failed,
            handoff_failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::{FailureReason, MockCouponValidator};
    use async_trait::async_trait;
    use coupon_shared::error::Result as PipelineResult;
    use coupon_shared::queue::{DeliverySource, Resolution, memory_queue};

    fn processor_with(mock: MockCouponValidator, requeue_limit: u32) -> OrderProcessor {
        OrderProcessor::new(Arc::new(mock), requeue_limit)
    }

    fn unreachable() -> ValidationOutcome {
        ValidationOutcome::TransientFailure {
            reason: FailureReason::Unreachable,
            attempts: 5,
        }
    }

    #[test]
    fn test_decide() {
        assert_eq!(decide(Classification::Valid, 1, 0), Action::Ack);
        assert_eq!(decide(Classification::Invalid, 1, 0), Action::Ack);
        assert_eq!(
            decide(Classification::DecodeError, 1, 3),
            Action::Reject { requeue: false }
        );
        assert_eq!(
            decide(Classification::TransientFailure, 1, 0),
            Action::Reject { requeue: false }
        );
        assert_eq!(
            decide(Classification::TransientFailure, 2, 3),
            Action::Reject { requeue: true }
        );
        assert_eq!(
            decide(Classification::TransientFailure, 3, 3),
            Action::Reject { requeue: false }
        );
    }

    #[tokio::test]
    async fn test_valid_coupon_is_acked() {
        let mut mock = MockCouponValidator::new();
        mock.expect_validate()
            .withf(|code| code == "abc")
            .times(1)
            .returning(|_| ValidationOutcome::Valid);
        let processor = processor_with(mock, 0);

        let (publisher, mut source) = memory_queue();
        let ledger = source.ledger();
        publisher.publish(r#"{"id":"order-1","coupon":"abc"}"#).unwrap();

        let delivery = source.recv().await.unwrap().unwrap();
        let processed = processor.process(delivery).await;

        assert_eq!(processed.classification, Classification::Valid);
        assert_eq!(processed.action, Action::Ack);
        assert_eq!(processed.order_id.as_deref(), Some("order-1"));
        assert!(!processed.resolution_failed);
        assert_eq!(ledger.acked(), 1);
        assert_eq!(ledger.rejected(), 0);
    }

    #[tokio::test]
    async fn test_invalid_coupon_is_acked() {
        let mut mock = MockCouponValidator::new();
        mock.expect_validate()
            .times(1)
            .returning(|_| ValidationOutcome::Invalid);
        let processor = processor_with(mock, 0);

        let (publisher, mut source) = memory_queue();
        let ledger = source.ledger();
        publisher.publish(r#"{"coupon":"zzz"}"#).unwrap();

        let delivery = source.recv().await.unwrap().unwrap();
        let processed = processor.process(delivery).await;

        assert_eq!(processed.classification, Classification::Invalid);
        assert_eq!(processed.outcome, Some(ValidationOutcome::Invalid));
        assert_eq!(ledger.acked(), 1);
        assert_eq!(ledger.rejected(), 0);
    }

    #[tokio::test]
    async fn test_malformed_body_is_dead_lettered_without_validation() {
        let mut mock = MockCouponValidator::new();
        mock.expect_validate().never();
        let processor = processor_with(mock, 5);

        let (publisher, mut source) = memory_queue();
        let ledger = source.ledger();
        let tag = publisher.publish("not json").unwrap();

        let delivery = source.recv().await.unwrap().unwrap();
        let processed = processor.process(delivery).await;

        assert_eq!(processed.classification, Classification::DecodeError);
        assert_eq!(processed.order_id, None);
        assert_eq!(processed.tag, tag);

        let records = ledger.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].resolution, Resolution::Rejected { requeue: false });
        assert!(records[0].reason.as_deref().unwrap().contains("格式错误"));
        assert_eq!(ledger.acked(), 0);
    }

    #[tokio::test]
    async fn test_transient_failure_rejected_without_requeue() {
        let mut mock = MockCouponValidator::new();
        mock.expect_validate().times(1).returning(|_| unreachable());
        let processor = processor_with(mock, 0);

        let (publisher, mut source) = memory_queue();
        let ledger = source.ledger();
        publisher.publish(r#"{"coupon":"abc"}"#).unwrap();

        let delivery = source.recv().await.unwrap().unwrap();
        let processed = processor.process(delivery).await;

        assert_eq!(processed.classification, Classification::TransientFailure);
        assert_eq!(processed.action, Action::Reject { requeue: false });

        let records = ledger.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].resolution, Resolution::Rejected { requeue: false });
        assert!(records[0].reason.as_deref().unwrap().contains("5"));
    }

    #[tokio::test]
    async fn test_transient_failure_requeue_is_bounded() {
        let mut mock = MockCouponValidator::new();
        mock.expect_validate().times(2).returning(|_| unreachable());
        let processor = processor_with(mock, 2);

        let (publisher, mut source) = memory_queue();
        let ledger = source.ledger();
        publisher.publish(r#"{"coupon":"abc"}"#).unwrap();
        drop(publisher);

        let first = processor.process(source.recv().await.unwrap().unwrap()).await;
        assert_eq!(first.action, Action::Reject { requeue: true });

        let second = processor.process(source.recv().await.unwrap().unwrap()).await;
        assert_eq!(second.action, Action::Reject { requeue: false });

        assert!(source.recv().await.is_none());
        let records = ledger.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].delivery_count, 1);
        assert_eq!(records[1].delivery_count, 2);
    }

    /// ack/reject 总是失败的消息
    struct BrokenDelivery;

    #[async_trait]
    impl Delivery for BrokenDelivery {
        fn body(&self) -> &[u8] {
            br#"{"coupon":"abc"}"#
        }

        fn tag(&self) -> String {
            "broken#0".to_string()
        }

        fn delivery_count(&self) -> u32 {
            1
        }

        async fn ack(self) -> PipelineResult<()> {
            Err(PipelineError::Kafka("commit failed".to_string()))
        }

        async fn reject(self, _requeue: bool, _reason: &str) -> PipelineResult<()> {
            Err(PipelineError::Kafka("commit failed".to_string()))
        }
    }

    #[tokio::test]
    async fn test_resolution_failure_is_reported() {
        let mut mock = MockCouponValidator::new();
        mock.expect_validate()
            .times(1)
            .returning(|_| ValidationOutcome::Valid);
        let processor = processor_with(mock, 0);

        let processed = processor.process(BrokenDelivery).await;

        assert_eq!(processed.classification, Classification::Valid);
        assert!(processed.resolution_failed);
        assert!(!processed.handoff_failed);
    }

    /// 转投死信失败的消息
    struct UndeliverableDelivery;

    #[async_trait]
    impl Delivery for UndeliverableDelivery {
        fn body(&self) -> &[u8] {
            b"garbage"
        }

        fn tag(&self) -> String {
            "orders/0@7".to_string()
        }

        fn delivery_count(&self) -> u32 {
            1
        }

        async fn ack(self) -> PipelineResult<()> {
            Ok(())
        }

        async fn reject(self, _requeue: bool, _reason: &str) -> PipelineResult<()> {
            Err(PipelineError::Handoff {
                tag: "orders/0@7".to_string(),
                message: "dlq send timed out".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_failed_handoff_is_flagged() {
        let mut mock = MockCouponValidator::new();
        mock.expect_validate().never();
        let processor = processor_with(mock, 0);

        let processed = processor.process(UndeliverableDelivery).await;

        assert_eq!(processed.classification, Classification::DecodeError);
        assert_eq!(processed.action, Action::Reject { requeue: false });
        assert!(processed.resolution_failed);
        assert!(processed.handoff_failed);
    }
}
