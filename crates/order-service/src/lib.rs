//! 订单优惠券校验服务
//!
//! 消费订单消息，解码后调用优惠券校验服务（带有界重试与总时限），
//! 按分类结果对消息执行 ack 或 reject：
//! - Valid / Invalid -> ack（优惠券无效是正常业务结果，不是处理失败）
//! - TransientFailure -> reject，默认不重新入队，交由死信队列
//! - 无法解码 -> reject 并转入死信，不会在主队列上无限循环

pub mod consumer;
pub mod error;
pub mod order;
pub mod processor;
pub mod validation;
