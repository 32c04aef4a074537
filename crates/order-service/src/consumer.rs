//! 订单消费循环
//!
//! 从 `DeliverySource` 逐条拉取消息交给 OrderProcessor，按接收顺序串行处理，
//! 同一时刻最多一个校验调用在途。收到 shutdown 信号或消息流结束时退出，
//! 退出前总会关闭消息源。一条消息转投失败时立即退出，不再处理后续消息，
//! 避免后续的确认把偏移量提交到它之后。

use std::time::Duration;

use coupon_shared::queue::DeliverySource;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::error::OrderServiceError;
use crate::processor::{Action, OrderProcessor, ProcessedDelivery};

/// 接收失败后的等待时间，避免 broker 故障时空转
const RECEIVE_ERROR_BACKOFF: Duration = Duration::from_millis(200);

/// 消费循环退出时的统计
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerStats {
    pub processed: u64,
    pub acked: u64,
    pub rejected: u64,
    pub resolution_failures: u64,
}

impl ConsumerStats {
    fn record(&mut self, processed: &ProcessedDelivery) {
        self.processed += 1;
        match processed.action {
            Action::Ack => self.acked += 1,
            Action::Reject { .. } => self.rejected += 1,
        }
        if processed.resolution_failed {
            self.resolution_failures += 1;
        }
    }
}

/// 订单消费者
pub struct OrderConsumer {
    processor: OrderProcessor,
    max_consecutive_receive_errors: u32,
}

impl OrderConsumer {
    pub fn new(processor: OrderProcessor, max_consecutive_receive_errors: u32) -> Self {
        Self {
            processor,
            max_consecutive_receive_errors,
        }
    }

    /// 启动消费循环，直到收到 shutdown 信号或消息流结束
    ///
    /// 单条消息的失败不会中断循环；连续接收失败达到上限或某条消息转投失败时
    /// 返回错误，由进程退出后交给外部重启。
    pub async fn run<S: DeliverySource>(
        &self,
        mut source: S,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<ConsumerStats, OrderServiceError> {
        let mut stats = ConsumerStats::default();
        let mut consecutive_errors: u32 = 0;
        let error_limit = self.max_consecutive_receive_errors.max(1);

        info!("订单消费者已启动");

        let outcome = loop {
            if *shutdown.borrow() {
                info!("收到关闭信号，停止消费");
                break Ok(());
            }

            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("收到关闭信号，停止消费");
                        break Ok(());
                    }
                }

                received = source.recv() => match received {
                    None => {
                        info!("消息流已结束");
                        break Ok(());
                    }
                    Some(Err(err)) => {
                        consecutive_errors += 1;
                        error!(
                            code = err.code(),
                            error = %err,
                            consecutive_errors,
                            limit = error_limit,
                            "消息接收失败"
                        );
                        if consecutive_errors >= error_limit {
                            break Err(OrderServiceError::BrokerUnavailable {
                                failures: consecutive_errors,
                                source: err,
                            });
                        }
                        tokio::time::sleep(RECEIVE_ERROR_BACKOFF).await;
                    }
                    Some(Ok(delivery)) => {
                        consecutive_errors = 0;
                        let processed = self.processor.process(delivery).await;
                        stats.record(&processed);
                        if processed.handoff_failed {
                            error!(tag = %processed.tag, "消息转投失败，停止消费");
                            break Err(OrderServiceError::HandoffFailed { tag: processed.tag });
                        }
                    }
                },
            }
        };

        if let Err(err) = source.close().await {
            warn!(error = %err, "关闭消息源失败");
        }

        info!(
            processed = stats.processed,
            acked = stats.acked,
            rejected = stats.rejected,
            resolution_failures = stats.resolution_failures,
            "订单消费者已停止"
        );

        outcome.map(|()| stats)
    }
}
