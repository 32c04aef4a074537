//! 优惠券查询能力
//!
//! 校验端点只依赖 `CouponLookup` trait 判断优惠券是否存在，
//! 有效优惠券集合由启动时注入，而不是进程级的全局变量。

use async_trait::async_trait;
use dashmap::DashSet;

/// 优惠券查询接口
#[async_trait]
pub trait CouponLookup: Send + Sync {
    /// 优惠券代码是否有效
    async fn is_valid(&self, code: &str) -> bool;
}

/// 基于 DashSet 的内存实现，支持并发读取与新增
#[derive(Debug, Default)]
pub struct InMemoryCouponLookup {
    codes: DashSet<String>,
}

impl InMemoryCouponLookup {
    pub fn new() -> Self {
        Self::default()
    }

    /// 由一组优惠券代码构造；空白代码会被忽略
    pub fn from_codes<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let lookup = Self::new();
        for code in codes {
            lookup.add(code.as_ref());
        }
        lookup
    }

    /// 添加一个有效优惠券，返回是否为新增
    pub fn add(&self, code: &str) -> bool {
        let code = code.trim();
        if code.is_empty() {
            return false;
        }
        self.codes.insert(code.to_string())
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}

#[async_trait]
impl CouponLookup for InMemoryCouponLookup {
    async fn is_valid(&self, code: &str) -> bool {
        self.codes.contains(code)
    }
}
