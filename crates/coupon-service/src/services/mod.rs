//! HTTP 服务模块

pub mod coupon_service;


pub use coupon_service::{CouponServiceState, coupon_routes};
