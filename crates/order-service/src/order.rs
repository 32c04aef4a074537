//! 订单消息模型与解码
//!
//! 消息体为 JSON `{id?, coupon, payment_reference?}`，
//! 同时兼容旧生产者的字段名 `ID` / `Coupon` / `CCNumber`。

use serde::Deserialize;
use uuid::Uuid;

use crate::error::DecodeError;

/// 已解码的订单，解码后不再修改
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub id: String,
    pub coupon_code: String,
    /// 支付凭据，仅透传，从不写入日志
    pub payment_reference: String,
}

/// 线上消息格式
#[derive(Debug, Deserialize)]
struct OrderMessage {
    #[serde(default, alias = "ID")]
    id: Option<String>,
    #[serde(alias = "Coupon")]
    coupon: String,
    #[serde(default, alias = "CCNumber", alias = "cc_number")]
    payment_reference: Option<String>,
}

/// 将原始消息体解码为订单
///
/// - 非 JSON、截断、字段类型错误或缺少 coupon 时返回 `DecodeError::Malformed`
/// - coupon 为空白时返回 `DecodeError::EmptyCoupon`
/// - id 缺失或为空时生成 UUID v7
pub fn decode(body: &[u8]) -> Result<Order, DecodeError> {
    let message: OrderMessage = serde_json::from_slice(body)?;

    if message.coupon.trim().is_empty() {
        return Err(DecodeError::EmptyCoupon);
    }

    let id = match message.id {
        Some(id) if !id.trim().is_empty() => id,
        _ => Uuid::now_v7().to_string(),
    };

    Ok(Order {
        id,
        coupon_code: message.coupon,
        payment_reference: message.payment_reference.unwrap_or_default(),
    })
}
