//! 死信队列
//!
//! 无法解码的订单消息、以及校验服务在重试预算内始终不可用的订单，
//! 都会以 `DeadLetterMessage` 信封的形式写入死信 topic，而不是在主 topic 上无限循环。
//! 信封保留原始消息体和失败原因，供人工排查或离线重放。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;
use crate::kafka::KafkaProducer;

// ---------------------------------------------------------------------------
// DeadLetterMessage: 死信消息信封
// ---------------------------------------------------------------------------

/// 死信消息信封
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterMessage {
    /// 原始消息 key（缺失时为 topic/partition@offset）
    pub message_id: String,
    /// 原始 topic
    pub source_topic: String,
    /// 原始消息体；非 UTF-8 字节按替换字符处理
    pub payload: String,
    /// 失败原因
    pub error: String,
    /// 进入死信前已投递的次数
    pub delivery_count: u32,
    pub failed_at: DateTime<Utc>,
    /// 来源服务
    pub source_service: String,
}

impl DeadLetterMessage {
    pub fn new(
        message_id: impl Into<String>,
        source_topic: impl Into<String>,
        payload: &[u8],
        error: impl Into<String>,
        delivery_count: u32,
        source_service: impl Into<String>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            source_topic: source_topic.into(),
            payload: String::from_utf8_lossy(payload).into_owned(),
            error: error.into(),
            delivery_count,
            failed_at: Utc::now(),
            source_service: source_service.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// DlqProducer: 将失败消息发送到死信队列
// ---------------------------------------------------------------------------

/// DLQ 生产者
pub struct DlqProducer {
    producer: KafkaProducer,
    topic: String,
    source_service: String,
}

impl DlqProducer {
    pub fn new(producer: KafkaProducer, topic: &str, source_service: &str) -> Self {
        Self {
            producer,
            topic: topic.to_string(),
            source_service: source_service.to_string(),
        }
    }

    /// 将失败消息发送到死信队列
    pub async fn send_to_dlq(
        &self,
        message_id: &str,
        source_topic: &str,
        payload: &[u8],
        error: &str,
        delivery_count: u32,
    ) -> Result<()> {
        let dlq_msg = DeadLetterMessage::new(
            message_id,
            source_topic,
            payload,
            error,
            delivery_count,
            &self.source_service,
        );

        self.producer
            .send_json(&self.topic, message_id, &dlq_msg)
            .await?;

        warn!(
            message_id,
            source_topic,
            dlq_topic = %self.topic,
            error,
            "消息已发送到死信队列"
        );

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// 单元测试
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dead_letter_message_creation() {
        let msg = DeadLetterMessage::new(
            "order-001",
            "orders",
            br#"{"coupon":"abc"}"#,
            "校验服务不可达",
            1,
            "order-service",
        );

        assert_eq!(msg.message_id, "order-001");
        assert_eq!(msg.source_topic, "orders");
        assert_eq!(msg.payload, r#"{"coupon":"abc"}"#);
        assert_eq!(msg.error, "校验服务不可达");
        assert_eq!(msg.delivery_count, 1);
        assert_eq!(msg.source_service, "order-service");
    }

    #[test]
    fn test_dead_letter_keeps_non_utf8_payload_readable() {
        let msg = DeadLetterMessage::new("k", "orders", &[0xFF, b'{'], "解码失败", 1, "svc");
        assert!(msg.payload.ends_with('{'));
        assert!(msg.payload.contains('\u{FFFD}'));
    }

    #[test]
    fn test_dead_letter_serialization() {
        let msg = DeadLetterMessage::new(
            "order-002",
            "orders",
            b"not json",
            "订单消息格式错误",
            2,
            "order-service",
        );

        let json = serde_json::to_string(&msg).unwrap();

        assert!(json.contains("messageId"));
        assert!(json.contains("sourceTopic"));
        assert!(json.contains("deliveryCount"));
        assert!(json.contains("failedAt"));
        assert!(json.contains("sourceService"));

        let back: DeadLetterMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back.message_id, "order-002");
        assert_eq!(back.payload, "not json");
        assert_eq!(back.delivery_count, 2);
    }
}
