//! 配置管理模块
//!
//! 支持多格式配置文件加载，环境变量覆盖，以及类型安全的配置访问。
//! 所有配置段都有默认值，缺失的文件或字段不会导致启动失败。

use std::path::Path;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::retry::{RetryPolicy, millis};

/// Kafka 配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KafkaConfig {
    pub brokers: String,
    pub consumer_group: String,
    pub auto_offset_reset: String,
    /// 订单事件 topic
    pub order_topic: String,
    /// 无法处理的订单消息转投的死信 topic
    pub dead_letter_topic: String,
    /// 转投死信或重新入队时的发送重试策略
    pub publish_retry: RetryPolicy,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            // 本地 docker-compose 的外部监听端口，避免与校验服务默认端口冲突
            brokers: "localhost:29092".to_string(),
            consumer_group: "order-service".to_string(),
            auto_offset_reset: "earliest".to_string(),
            order_topic: "orders".to_string(),
            dead_letter_topic: "orders.dlq".to_string(),
            publish_retry: RetryPolicy::default(),
        }
    }
}

/// 服务监听配置（优惠券校验服务使用）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9092,
        }
    }
}

/// 优惠券校验客户端配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// 校验服务地址，订单消费者向其 POST `coupon=<code>`
    pub endpoint_url: String,
    /// 单次 HTTP 尝试的超时
    #[serde(with = "millis")]
    pub attempt_timeout: Duration,
    /// 整个重试序列的总时限，防止单条消息无限阻塞消费循环
    #[serde(with = "millis")]
    pub overall_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            endpoint_url: "http://localhost:9092".to_string(),
            attempt_timeout: Duration::from_secs(5),
            overall_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }
}

/// 消费循环配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    /// 校验瞬时失败时允许重新入队的次数上限；0 表示直接进入死信（requeue=false）
    pub transient_requeue_limit: u32,
    /// 连续接收失败达到该次数后认为与 broker 的连接已不可用，退出消费循环
    pub max_consecutive_receive_errors: u32,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            transient_requeue_limit: 0,
            max_consecutive_receive_errors: 10,
        }
    }
}

/// 校验服务认可的优惠券代码
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CouponsConfig {
    pub codes: Vec<String>,
}

impl Default for CouponsConfig {
    fn default() -> Self {
        Self {
            codes: vec!["abc".to_string()],
        }
    }
}

/// 可观测性配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// 服务名称，由 AppConfig 注入
    pub service_name: String,
    pub log_level: String,
    /// 日志输出格式：json（结构化）或 pretty（人类可读）
    pub log_format: String,
    pub metrics_enabled: bool,
    pub metrics_port: u16,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown-service".to_string(),
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: true,
            metrics_port: 9090,
        }
    }
}

impl ObservabilityConfig {
    pub fn with_service_name(mut self, service_name: &str) -> Self {
        self.service_name = service_name.to_string();
        self
    }

    pub fn json_logs(&self) -> bool {
        self.log_format.eq_ignore_ascii_case("json")
    }
}

/// 应用配置
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub service_name: String,
    pub environment: String,
    pub server: ServerConfig,
    pub kafka: KafkaConfig,
    pub validation: ValidationConfig,
    pub consumer: ConsumerConfig,
    pub coupons: CouponsConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// 从 .env、配置文件和环境变量加载配置
    ///
    /// 加载顺序（后加载的会覆盖先加载的同名配置项）：
    /// 1. .env 文件（仅填充尚未设置的环境变量）
    /// 2. config/default.toml
    /// 3. config/{environment}.toml
    /// 4. config/{service_name}.toml
    /// 5. 环境变量（APP_ 前缀，`__` 分隔层级，如 APP_VALIDATION__ENDPOINT_URL -> validation.endpoint_url）
    pub fn load(service_name: &str) -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());
        let config_dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| "config".to_string());

        let builder = Config::builder()
            .set_default("service_name", service_name)?
            .set_default("environment", env.clone())?
            .add_source(File::from(Path::new(&config_dir).join("default.toml")).required(false))
            .add_source(
                File::from(Path::new(&config_dir).join(format!("{env}.toml"))).required(false),
            )
            .add_source(
                File::from(Path::new(&config_dir).join(format!("{service_name}.toml")))
                    .required(false),
            )
            .add_source(
                Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("coupons.codes")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// 获取服务监听地址
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// 注入服务名后的可观测性配置
    pub fn observability(&self) -> ObservabilityConfig {
        self.observability
            .clone()
            .with_service_name(&self.service_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 9092);
        assert_eq!(config.validation.endpoint_url, "http://localhost:9092");
        assert_eq!(config.validation.retry.max_attempts, 5);
        assert_eq!(config.consumer.transient_requeue_limit, 0);
        assert_eq!(config.kafka.dead_letter_topic, "orders.dlq");
        assert_eq!(config.kafka.publish_retry.max_attempts, 5);
        assert_eq!(config.coupons.codes, vec!["abc".to_string()]);
    }

    #[test]
    fn test_server_addr() {
        let config = AppConfig {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 3000,
            },
            ..Default::default()
        };
        assert_eq!(config.server_addr(), "127.0.0.1:3000");
    }

    #[test]
    fn test_partial_sections_fall_back_to_defaults() {
        let config: AppConfig = serde_json::from_str(
            r#"{
                "service_name": "order-service",
                "validation": {"endpoint_url": "http://coupon:9092", "overall_timeout": 1500},
                "consumer": {"transient_requeue_limit": 3}
            }"#,
        )
        .unwrap();

        assert_eq!(config.validation.endpoint_url, "http://coupon:9092");
        assert_eq!(config.validation.overall_timeout, Duration::from_millis(1500));
        assert_eq!(config.validation.attempt_timeout, Duration::from_secs(5));
        assert_eq!(config.consumer.transient_requeue_limit, 3);
        assert_eq!(config.consumer.max_consecutive_receive_errors, 10);
        assert_eq!(config.kafka.order_topic, "orders");
    }

    #[test]
    fn test_observability_receives_service_name() {
        let config = AppConfig {
            service_name: "coupon-service".to_string(),
            ..Default::default()
        };
        let obs = config.observability();
        assert_eq!(obs.service_name, "coupon-service");
        assert!(!obs.json_logs());
    }
}
