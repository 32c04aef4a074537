//! 优惠券校验端点
//!
//! 接收表单字段 `coupon`，通过注入的 `CouponLookup` 判断是否有效。

use std::sync::Arc;

use axum::{
    Form, Json, Router,
    extract::State,
    middleware,
    routing::{get, post},
};
use coupon_shared::observability::{metrics, middleware::http_tracing};
use serde::{Deserialize, Serialize};

use crate::lookup::CouponLookup;

/// 校验结果字面量
pub const STATUS_VALID: &str = "valid";
pub const STATUS_INVALID: &str = "invalid";

/// 校验服务状态
pub struct CouponServiceState {
    pub lookup: Arc<dyn CouponLookup>,
}

impl CouponServiceState {
    pub fn new(lookup: Arc<dyn CouponLookup>) -> Self {
        Self { lookup }
    }
}

// ============================================================================
// 请求/响应 DTO
// ============================================================================

/// 校验请求表单
#[derive(Debug, Deserialize)]
pub struct CheckCouponForm {
    /// 缺失时按空代码处理，结果为 invalid
    #[serde(default)]
    pub coupon: String,
}

/// 校验响应
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckCouponResponse {
    pub status: String,
}

// ============================================================================
// 路由配置
// ============================================================================

/// 构建校验服务路由
pub fn coupon_routes() -> Router<Arc<CouponServiceState>> {
    Router::new()
        .route("/", post(check_coupon))
        .route("/health", get(|| async { "OK" }))
        .layer(middleware::from_fn(http_tracing))
}

// ============================================================================
// 端点处理函数
// ============================================================================

/// 校验优惠券
#[tracing::instrument(skip_all)]
async fn check_coupon(
    State(state): State<Arc<CouponServiceState>>,
    Form(form): Form<CheckCouponForm>,
) -> Json<CheckCouponResponse> {
    let status = if state.lookup.is_valid(&form.coupon).await {
        STATUS_VALID
    } else {
        STATUS_INVALID
    };

    tracing::info!(coupon = %form.coupon, status, "优惠券校验完成");
    metrics::record_coupon_check(status);

    Json(CheckCouponResponse {
        status: status.to_string(),
    })
}
