//! 统一错误处理模块
//!
//! 定义各服务共享的基础设施错误类型，使用 thiserror 提供良好的错误信息。

use thiserror::Error;

/// 基础设施错误类型
#[derive(Debug, Error)]
pub enum PipelineError {
    // ==================== Kafka / 队列错误 ====================
    #[error("Kafka 错误: {0}")]
    Kafka(String),

    /// 队列已关闭（内存队列的发送端全部释放或消费者已停止）
    #[error("消息队列已关闭")]
    QueueClosed,

    /// 对单条消息执行 ack / reject 失败
    #[error("消息确认失败: {action} {tag} - {message}")]
    Resolution {
        action: &'static str,
        tag: String,
        message: String,
    },

    /// reject 时转投死信或重新入队失败，消息仍停留在原偏移量上
    #[error("消息转投失败: {tag} - {message}")]
    Handoff { tag: String, message: String },

    // ==================== 序列化 ====================
    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// 错误结果类型别名
pub type Result<T> = std::result::Result<T, PipelineError>;

impl PipelineError {
    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::Kafka(_) => "KAFKA_ERROR",
            Self::QueueClosed => "QUEUE_CLOSED",
            Self::Resolution { .. } => "RESOLUTION_FAILED",
            Self::Handoff { .. } => "HANDOFF_FAILED",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// 是否为可重试错误（broker 层面的瞬时故障）
    ///
    /// 转投死信/重新入队时以此决定是否再次发送。
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Kafka(_))
    }
}
