//! 订单服务专用错误类型
//!
//! 在共享库 PipelineError 基础上定义本服务特有的错误变体。
//! 单条消息的处理失败都会被分类为结果值，不会以错误形式中断消费循环；
//! 这里的错误只出现在启动装配、broker 连接和消息转投失败这几个层面。

use coupon_shared::error::PipelineError;

/// 订单消息解码错误，对所属消息是终结性的，不会重试
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// 非 JSON、截断、缺少 coupon 字段或字段类型错误
    #[error("订单消息格式错误: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("订单消息缺少优惠券代码")]
    EmptyCoupon,
}

/// 订单服务错误
#[derive(Debug, thiserror::Error)]
pub enum OrderServiceError {
    /// 校验服务地址无法解析
    #[error("无效的校验服务地址: {0}")]
    InvalidEndpoint(String),

    /// 构建 HTTP 客户端失败
    #[error("HTTP 客户端初始化失败: {0}")]
    HttpClient(String),

    /// 连续接收失败次数超过上限，认为 broker 连接已不可用
    #[error("消息接收连续失败 {failures} 次: {source}")]
    BrokerUnavailable {
        failures: u32,
        #[source]
        source: PipelineError,
    },

    /// reject 的转投最终失败，消息停留在原偏移量，继续消费会越过它
    #[error("消息 {tag} 无法转投，停止消费以保留其偏移量")]
    HandoffFailed { tag: String },

    /// 透传共享库错误
    #[error(transparent)]
    Shared(#[from] PipelineError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            DecodeError::EmptyCoupon.to_string(),
            "订单消息缺少优惠券代码"
        );

        let err = OrderServiceError::InvalidEndpoint("not a url".to_string());
        assert_eq!(err.to_string(), "无效的校验服务地址: not a url");

        let err = OrderServiceError::BrokerUnavailable {
            failures: 10,
            source: PipelineError::Kafka("broker 不可达".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "消息接收连续失败 10 次: Kafka 错误: broker 不可达"
        );

        let err = OrderServiceError::HandoffFailed {
            tag: "orders/0@7".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "消息 orders/0@7 无法转投，停止消费以保留其偏移量"
        );

        let err = OrderServiceError::Shared(PipelineError::QueueClosed);
        assert_eq!(err.to_string(), "消息队列已关闭");
    }

    #[test]
    fn test_malformed_wraps_serde_error() {
        let serde_err = serde_json::from_slice::<serde_json::Value>(b"{").unwrap_err();
        let err = DecodeError::from(serde_err);
        assert!(err.to_string().starts_with("订单消息格式错误"));
    }
}
