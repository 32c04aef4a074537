//! 命令行参数
//!
//! 命令行参数优先于配置文件与环境变量。
//!
//! ```bash
//! coupon-service --port 9092 --coupon abc --coupon SUMMER10
//! ```

use clap::Parser;
use coupon_shared::config::AppConfig;

/// 优惠券校验服务
#[derive(Parser, Debug, Default)]
#[command(name = "coupon-service")]
#[command(version, about = "优惠券校验 HTTP 服务")]
pub struct Cli {
    /// 监听端口，覆盖 server.port
    #[arg(short, long)]
    pub port: Option<u16>,

    /// 有效优惠券代码，可重复指定；给出时替换 coupons.codes
    #[arg(short, long = "coupon")]
    pub coupons: Vec<String>,
}

impl Cli {
    /// 将命令行参数合并进配置
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if !self.coupons.is_empty() {
            config.coupons.codes = self.coupons.clone();
        }
    }
}
