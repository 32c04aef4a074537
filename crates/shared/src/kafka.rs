//! Kafka 基础设施封装
//!
//! 将 rdkafka 的底层 API 封装为 `DeliverySource` / `Delivery` 实现。
//! 消费者关闭自动提交，偏移量只在消息被 ack 或 reject 之后提交，
//! 保证每条消息都有明确的终结动作后才会从队列中"消失"。
//! reject 的转投失败时不提交，由消费循环退出，重启后从该偏移量重新投递。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Header, Headers, Message, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::{Offset, TopicPartitionList};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::KafkaConfig;
use crate::dlq::DlqProducer;
use crate::error::{PipelineError, Result};
use crate::queue::{Delivery, DeliverySource};
use crate::retry::{RetryPolicy, RetryReport, retry_with_policy};

/// 记录投递次数的消息头
pub const DELIVERY_COUNT_HEADER: &str = "x-delivery-count";

// ---------------------------------------------------------------------------
// ConsumerMessage
// ---------------------------------------------------------------------------

/// 消费到的 Kafka 消息的统一表示
///
/// 将 rdkafka 的 `BorrowedMessage`（带生命周期约束）转换为拥有所有权的结构体，
/// 使消息可以安全地跨 await 点传递给异步处理函数。
#[derive(Debug, Clone)]
pub struct ConsumerMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub payload: Vec<u8>,
    pub headers: HashMap<String, String>,
}

impl ConsumerMessage {
    /// 从 rdkafka 的借用消息构造，提取并拥有所有字段
    fn from_borrowed(msg: &BorrowedMessage<'_>) -> Self {
        let key = msg
            .key()
            .and_then(|k| std::str::from_utf8(k).ok())
            .map(String::from);

        let payload = msg.payload().map(|p| p.to_vec()).unwrap_or_default();

        let mut headers = HashMap::new();
        if let Some(h) = msg.headers() {
            for idx in 0..h.count() {
                let header = h.get(idx);
                if let Some(raw) = header.value
                    && let Ok(value) = std::str::from_utf8(raw)
                {
                    headers.insert(header.key.to_string(), value.to_string());
                }
            }
        }

        Self {
            topic: msg.topic().to_string(),
            partition: msg.partition(),
            offset: msg.offset(),
            key,
            payload,
            headers,
        }
    }

    /// 形如 `orders/0@42` 的定位标识
    pub fn tag(&self) -> String {
        format!("{}/{}@{}", self.topic, self.partition, self.offset)
    }

    /// 投递次数，缺失或无法解析的消息头按首次投递处理
    pub fn delivery_count(&self) -> u32 {
        self.headers
            .get(DELIVERY_COUNT_HEADER)
            .and_then(|v| v.parse().ok())
            .unwrap_or(1)
    }
}

// ---------------------------------------------------------------------------
// KafkaProducer
// ---------------------------------------------------------------------------

/// 面向业务的 Kafka 生产者
///
/// 内部已派生 Clone（`FutureProducer` 本身是 Arc 包装的）。
#[derive(Clone)]
pub struct KafkaProducer {
    producer: FutureProducer,
}

impl KafkaProducer {
    /// 根据配置创建生产者
    ///
    /// `message.timeout.ms` 设为 5 秒，超时后由调用方决定如何处理，而非无限等待。
    pub fn new(config: &KafkaConfig) -> Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("message.timeout.ms", "5000")
            .create()
            .map_err(|e| PipelineError::Kafka(format!("创建生产者失败: {e}")))?;

        info!(brokers = %config.brokers, "Kafka 生产者已初始化");
        Ok(Self { producer })
    }

    /// 发送原始字节消息，可附带消息头
    pub async fn send(
        &self,
        topic: &str,
        key: &str,
        payload: &[u8],
        headers: &[(&str, &str)],
    ) -> Result<(i32, i64)> {
        let owned_headers = headers
            .iter()
            .fold(OwnedHeaders::new(), |acc, &(name, value)| {
                acc.insert(Header {
                    key: name,
                    value: Some(value),
                })
            });

        let record = FutureRecord::to(topic)
            .key(key)
            .payload(payload)
            .headers(owned_headers);

        let delivery = self
            .producer
            .send(record, Duration::from_secs(5))
            .await
            .map_err(|(e, _)| PipelineError::Kafka(format!("发送消息失败: {e}")))?;

        debug!(
            topic,
            key,
            partition = delivery.partition,
            offset = delivery.offset,
            "消息已发送"
        );
        Ok((delivery.partition, delivery.offset))
    }

    /// 将值序列化为 JSON 后发送
    pub async fn send_json<T: Serialize>(
        &self,
        topic: &str,
        key: &str,
        value: &T,
    ) -> Result<(i32, i64)> {
        let payload = serde_json::to_vec(value)?;
        self.send(topic, key, &payload, &[]).await
    }
}

// ---------------------------------------------------------------------------
// KafkaSource: 手动提交偏移量的消费端
// ---------------------------------------------------------------------------

/// 已终结消息的下一个偏移量，按 (topic, partition) 记录
type ResolvedOffsets = Arc<Mutex<HashMap<(String, i32), i64>>>;

/// Kafka 消息来源
///
/// 生产者用于 requeue 时回写原 topic，死信生产者用于 `reject(requeue=false)`。
/// 关闭了 librdkafka 的自动偏移量存储，只有显式终结的消息才会被提交。
pub struct KafkaSource {
    consumer: Arc<StreamConsumer>,
    producer: KafkaProducer,
    dlq: Arc<DlqProducer>,
    publish_retry: RetryPolicy,
    resolved: ResolvedOffsets,
}

impl KafkaSource {
    /// 创建消费者并订阅订单 topic
    pub fn new(config: &KafkaConfig, producer: KafkaProducer, dlq: DlqProducer) -> Result<Self> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &config.consumer_group)
            .set("auto.offset.reset", &config.auto_offset_reset)
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false")
            .create()
            .map_err(|e| PipelineError::Kafka(format!("创建消费者失败: {e}")))?;

        consumer
            .subscribe(&[config.order_topic.as_str()])
            .map_err(|e| PipelineError::Kafka(format!("订阅 topic 失败: {e}")))?;

        info!(
            brokers = %config.brokers,
            group_id = %config.consumer_group,
            topic = %config.order_topic,
            "Kafka 消费者已初始化"
        );

        Ok(Self {
            consumer: Arc::new(consumer),
            producer,
            dlq: Arc::new(dlq),
            publish_retry: config.publish_retry.clone(),
            resolved: Arc::default(),
        })
    }
}

#[async_trait]
impl DeliverySource for KafkaSource {
    type Delivery = KafkaDelivery;

    async fn recv(&mut self) -> Option<Result<KafkaDelivery>> {
        let received = self
            .consumer
            .recv()
            .await
            .map(|msg| ConsumerMessage::from_borrowed(&msg));

        let delivery = match received {
            Ok(message) => {
                debug!(tag = %message.tag(), "收到 Kafka 消息");
                Ok(KafkaDelivery {
                    message,
                    consumer: self.consumer.clone(),
                    producer: self.producer.clone(),
                    dlq: self.dlq.clone(),
                    publish_retry: self.publish_retry.clone(),
                    resolved: self.resolved.clone(),
                })
            }
            Err(e) => Err(PipelineError::Kafka(format!("接收消息出错: {e}"))),
        };
        Some(delivery)
    }

    async fn close(self) -> Result<()> {
        // 异步提交可能尚未完成，退订前按已终结的偏移量同步提交一次；
        // 未终结的消息不在表中，重启后会被重新投递
        let tpl = resolved_offsets(&self.resolved)?;
        if tpl.count() > 0
            && let Err(e) = self.consumer.commit(&tpl, CommitMode::Sync)
        {
            warn!(error = %e, "关闭前同步提交偏移量失败");
        }
        self.consumer.unsubscribe();
        info!("Kafka 消费者已退订并关闭");
        Ok(())
    }
}

fn resolved_offsets(resolved: &ResolvedOffsets) -> Result<TopicPartitionList> {
    let offsets = resolved
        .lock()
        .map_err(|_| PipelineError::Kafka("偏移量记录锁已损坏".to_string()))?;

    let mut tpl = TopicPartitionList::new();
    for ((topic, partition), offset) in offsets.iter() {
        tpl.add_partition_offset(topic, *partition, Offset::Offset(*offset))
            .map_err(|e| PipelineError::Kafka(format!("构造偏移量列表失败: {e}")))?;
    }
    Ok(tpl)
}

/// Kafka 中的一条消息
pub struct KafkaDelivery {
    message: ConsumerMessage,
    consumer: Arc<StreamConsumer>,
    producer: KafkaProducer,
    dlq: Arc<DlqProducer>,
    publish_retry: RetryPolicy,
    resolved: ResolvedOffsets,
}

impl KafkaDelivery {
    /// 提交当前消息之后的偏移量
    fn commit(&self, action: &'static str) -> Result<()> {
        let next = self.message.offset + 1;
        let resolution_error = |message: String| PipelineError::Resolution {
            action,
            tag: self.message.tag(),
            message,
        };

        self.resolved
            .lock()
            .map_err(|_| resolution_error("偏移量记录锁已损坏".to_string()))?
            .insert((self.message.topic.clone(), self.message.partition), next);

        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(
            &self.message.topic,
            self.message.partition,
            Offset::Offset(next),
        )
        .and_then(|_| self.consumer.commit(&tpl, CommitMode::Async))
        .map_err(|e| resolution_error(e.to_string()))
    }

    fn message_key(&self) -> String {
        self.message.key.clone().unwrap_or_else(|| self.message.tag())
    }

    /// 将消息带着递增后的投递次数写回原 topic
    async fn republish(&self, key: &str) -> RetryReport<(), PipelineError> {
        let producer = &self.producer;
        let topic = self.message.topic.as_str();
        let payload = self.message.payload.as_slice();
        let next_count = (self.delivery_count() + 1).to_string();
        let headers = [(DELIVERY_COUNT_HEADER, next_count.as_str())];
        let headers = &headers[..];

        retry_with_policy(
            &self.publish_retry,
            "requeue_publish",
            PipelineError::is_retryable,
            move || async move {
                producer
                    .send(topic, key, payload, headers)
                    .await
                    .map(|_| ())
            },
        )
        .await
    }

    /// 将消息包装为死信信封发送
    async fn dead_letter(&self, key: &str, reason: &str) -> RetryReport<(), PipelineError> {
        let dlq = self.dlq.as_ref();
        let topic = self.message.topic.as_str();
        let payload = self.message.payload.as_slice();
        let delivery_count = self.delivery_count();

        retry_with_policy(
            &self.publish_retry,
            "dead_letter_publish",
            PipelineError::is_retryable,
            move || async move {
                dlq.send_to_dlq(key, topic, payload, reason, delivery_count)
                    .await
            },
        )
        .await
    }
}

#[async_trait]
impl Delivery for KafkaDelivery {
    fn body(&self) -> &[u8] {
        &self.message.payload
    }

    fn tag(&self) -> String {
        self.message.tag()
    }

    fn delivery_count(&self) -> u32 {
        self.message.delivery_count()
    }

    async fn ack(self) -> Result<()> {
        self.commit("ack")
    }

    /// 先转投（死信或原 topic），成功后才提交偏移量
    ///
    /// 转投在重试后仍失败时返回 `Handoff` 且不提交，消息留在原偏移量上。
    async fn reject(self, requeue: bool, reason: &str) -> Result<()> {
        let key = self.message_key();

        let report = if requeue {
            self.republish(&key).await
        } else {
            self.dead_letter(&key, reason).await
        };

        if let Err(err) = report.result {
            let tag = self.message.tag();
            error!(
                tag = %tag,
                requeue,
                attempts = report.attempts,
                error = %err,
                "消息转投失败，偏移量保持不变"
            );
            return Err(PipelineError::Handoff {
                tag,
                message: err.to_string(),
            });
        }

        self.commit("reject")
    }
}

// ---------------------------------------------------------------------------
// 测试
// ---------------------------------------------------------------------------
