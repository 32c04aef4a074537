//! 共享库
//!
//! 包含订单服务与优惠券服务共用的配置、错误处理、Kafka、重试、死信队列和可观测性等基础设施代码。

pub mod config;
pub mod dlq;
pub mod error;
pub mod kafka;
pub mod observability;
pub mod queue;
pub mod retry;
