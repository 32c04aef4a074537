//! 优惠券校验服务
//!
//! 订单服务调用的 HTTP 校验端点：`POST /` 携带表单字段 `coupon`，
//! 返回 `{"status":"valid"}` 或 `{"status":"invalid"}`。
//!
//! # 主要模块
//!
//! - `lookup`: 优惠券查询能力（注入式，默认内存实现）
//! - `services`: HTTP 路由与处理函数
//! - `cli`: 命令行参数
//!
//! # 使用示例
//!
//! ```rust
//! use std::sync::Arc;
//! use coupon_service::lookup::InMemoryCouponLookup;
//! use coupon_service::services::{CouponServiceState, coupon_routes};
//!
//! let lookup = InMemoryCouponLookup::from_codes(["abc"]);
//! let state = Arc::new(CouponServiceState::new(Arc::new(lookup)));
//! let app: axum::Router = coupon_routes().with_state(state);
//! ```

pub mod cli;
pub mod lookup;
pub mod services;
