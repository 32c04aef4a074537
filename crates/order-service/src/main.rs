//! 订单优惠券校验服务
//!
//! 消费 Kafka 订单消息，调用优惠券校验服务并按结果确认或拒绝消息。

use std::sync::Arc;

use anyhow::Result;
use coupon_shared::{
    config::AppConfig,
    dlq::DlqProducer,
    kafka::{KafkaProducer, KafkaSource},
    observability,
};
use order_service::{
    consumer::OrderConsumer, processor::OrderProcessor, validation::HttpCouponValidator,
};
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};

const SERVICE_NAME: &str = "order-service";

#[tokio::main]
async fn main() -> Result<()> {
    let (config, load_error) = match AppConfig::load(SERVICE_NAME) {
        Ok(config) => (config, None),
        Err(e) => (
            AppConfig {
                service_name: SERVICE_NAME.to_string(),
                ..Default::default()
            },
            Some(e),
        ),
    };

    let _guard = observability::init(&config.observability()).await?;
    if let Some(e) = load_error {
        warn!("Failed to load config, using defaults: {}", e);
    }

    info!("Starting order-service...");

    let validator = HttpCouponValidator::new(&config.validation)?;
    let processor = OrderProcessor::new(
        Arc::new(validator),
        config.consumer.transient_requeue_limit,
    );
    let consumer = OrderConsumer::new(processor, config.consumer.max_consecutive_receive_errors);

    let producer = KafkaProducer::new(&config.kafka)?;
    let dlq = DlqProducer::new(
        producer.clone(),
        &config.kafka.dead_letter_topic,
        SERVICE_NAME,
    );
    let source = KafkaSource::new(&config.kafka, producer, dlq)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let stats = consumer.run(source, shutdown_rx).await?;

    info!(
        processed = stats.processed,
        acked = stats.acked,
        rejected = stats.rejected,
        "order-service stopped"
    );
    Ok(())
}

/// 优雅关闭信号处理
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown...");
        }
    }
}
