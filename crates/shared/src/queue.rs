//! 消息队列抽象
//!
//! 消费循环只依赖 `DeliverySource` / `Delivery` 两个 trait，不关心底层是 Kafka 还是内存通道。
//! `Delivery` 的两个终结动作 `ack` 与 `reject` 都按值消费自身，
//! 因此同一条消息不可能既被确认又被拒绝，也不可能被确认两次。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{PipelineError, Result};

// ---------------------------------------------------------------------------
// Trait 抽象
// ---------------------------------------------------------------------------

/// 一条已接收、尚未处理完成的消息
#[async_trait]
pub trait Delivery: Send + 'static {
    /// 原始消息体
    fn body(&self) -> &[u8];

    /// 用于日志定位的消息标识，如 `orders/0@42`
    fn tag(&self) -> String;

    /// 第几次投递（首次为 1）
    fn delivery_count(&self) -> u32;

    /// 处理成功，从队列中移除
    async fn ack(self) -> Result<()>;

    /// 拒绝消息；`requeue=false` 时转入死信，`reason` 随死信一同记录
    async fn reject(self, requeue: bool, reason: &str) -> Result<()>;
}

/// 消息来源
#[async_trait]
pub trait DeliverySource: Send {
    type Delivery: Delivery;

    /// 拉取下一条消息；返回 `None` 表示消息流已结束
    async fn recv(&mut self) -> Option<Result<Self::Delivery>>;

    /// 释放底层连接
    async fn close(self) -> Result<()>;
}

// ---------------------------------------------------------------------------
// 内存队列: 本地运行与测试使用
// ---------------------------------------------------------------------------

/// 消息的最终处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Acked,
    Rejected { requeue: bool },
}

/// 一次终结动作的记录
#[derive(Debug, Clone)]
pub struct ResolutionRecord {
    pub tag: String,
    pub body: Vec<u8>,
    pub delivery_count: u32,
    pub resolution: Resolution,
    pub reason: Option<String>,
}

/// 内存队列中所有终结动作的账本
#[derive(Debug, Clone, Default)]
pub struct ResolutionLedger {
    records: Arc<Mutex<Vec<ResolutionRecord>>>,
}

impl ResolutionLedger {
    fn push(&self, record: ResolutionRecord) {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(record);
    }

    pub fn records(&self) -> Vec<ResolutionRecord> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn acked(&self) -> usize {
        self.count(|r| matches!(r, Resolution::Acked))
    }

    pub fn rejected(&self) -> usize {
        self.count(|r| matches!(r, Resolution::Rejected { .. }))
    }

    fn count(&self, predicate: impl Fn(&Resolution) -> bool) -> usize {
        self.records().iter().filter(|r| predicate(&r.resolution)).count()
    }
}

struct Envelope {
    tag: String,
    body: Vec<u8>,
    delivery_count: u32,
}

/// 创建一个内存队列，返回发布端与消费端
///
/// 所有发布端被释放且没有待重投的消息后，消费端的 `recv` 返回 `None`。
pub fn memory_queue() -> (MemoryPublisher, MemorySource) {
    let (tx, rx) = mpsc::unbounded_channel();

    let publisher = MemoryPublisher {
        tx,
        sequence: Arc::new(AtomicU64::new(0)),
    };
    let source = MemorySource {
        rx,
        requeued: Arc::default(),
        ledger: ResolutionLedger::default(),
    };

    (publisher, source)
}

type RequeueBuffer = Arc<Mutex<VecDeque<Envelope>>>;

fn lock_buffer(buffer: &RequeueBuffer) -> MutexGuard<'_, VecDeque<Envelope>> {
    buffer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// 内存队列发布端
#[derive(Clone)]
pub struct MemoryPublisher {
    tx: mpsc::UnboundedSender<Envelope>,
    sequence: Arc<AtomicU64>,
}

impl MemoryPublisher {
    /// 发布一条消息，返回分配的消息标识
    pub fn publish(&self, body: impl Into<Vec<u8>>) -> Result<String> {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        let tag = format!("memory#{seq}");
        self.tx
            .send(Envelope {
                tag: tag.clone(),
                body: body.into(),
                delivery_count: 1,
            })
            .map_err(|_| PipelineError::QueueClosed)?;
        Ok(tag)
    }
}

/// 内存队列消费端
pub struct MemorySource {
    rx: mpsc::UnboundedReceiver<Envelope>,
    requeued: RequeueBuffer,
    ledger: ResolutionLedger,
}

impl MemorySource {
    pub fn ledger(&self) -> ResolutionLedger {
        self.ledger.clone()
    }
}

#[async_trait]
impl DeliverySource for MemorySource {
    type Delivery = MemoryDelivery;

    async fn recv(&mut self) -> Option<Result<MemoryDelivery>> {
        // 重新入队的消息优先投递
        let requeued = lock_buffer(&self.requeued).pop_front();
        let envelope = match requeued {
            Some(envelope) => envelope,
            None => self.rx.recv().await?,
        };

        Some(Ok(MemoryDelivery {
            envelope,
            requeued: self.requeued.clone(),
            ledger: self.ledger.clone(),
        }))
    }

    async fn close(mut self) -> Result<()> {
        self.rx.close();
        debug!("内存队列已关闭");
        Ok(())
    }
}

/// 内存队列中的一条消息
pub struct MemoryDelivery {
    envelope: Envelope,
    requeued: RequeueBuffer,
    ledger: ResolutionLedger,
}

impl MemoryDelivery {
    fn record(&self, resolution: Resolution, reason: Option<&str>) {
        self.ledger.push(ResolutionRecord {
            tag: self.envelope.tag.clone(),
            body: self.envelope.body.clone(),
            delivery_count: self.envelope.delivery_count,
            resolution,
            reason: reason.map(String::from),
        });
    }
}

#[async_trait]
impl Delivery for MemoryDelivery {
    fn body(&self) -> &[u8] {
        &self.envelope.body
    }

    fn tag(&self) -> String {
        self.envelope.tag.clone()
    }

    fn delivery_count(&self) -> u32 {
        self.envelope.delivery_count
    }

    async fn ack(self) -> Result<()> {
        self.record(Resolution::Acked, None);
        Ok(())
    }

    async fn reject(self, requeue: bool, reason: &str) -> Result<()> {
        self.record(Resolution::Rejected { requeue }, Some(reason));

        if requeue {
            let envelope = Envelope {
                delivery_count: self.envelope.delivery_count + 1,
                ..self.envelope
            };
            lock_buffer(&self.requeued).push_back(envelope);
        }
        Ok(())
    }
}
