//! 优惠券校验服务
//!
//! 订单服务通过 HTTP 调用本服务校验优惠券。

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use coupon_service::cli::Cli;
use coupon_service::lookup::InMemoryCouponLookup;
use coupon_service::services::{CouponServiceState, coupon_routes};
use coupon_shared::{config::AppConfig, observability};
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

const SERVICE_NAME: &str = "coupon-service";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (mut config, load_error) = match AppConfig::load(SERVICE_NAME) {
        Ok(config) => (config, None),
        Err(e) => (
            AppConfig {
                service_name: SERVICE_NAME.to_string(),
                ..Default::default()
            },
            Some(e),
        ),
    };
    cli.apply(&mut config);

    let _guard = observability::init(&config.observability()).await?;
    if let Some(e) = load_error {
        warn!("Failed to load config, using defaults: {}", e);
    }

    info!("Starting coupon-service...");

    let lookup = InMemoryCouponLookup::from_codes(&config.coupons.codes);
    info!(coupon_count = lookup.len(), "Coupon lookup initialized");

    let state = Arc::new(CouponServiceState::new(Arc::new(lookup)));
    let app = coupon_routes().with_state(state);

    let addr = config.server_addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("Coupon service listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("coupon-service stopped");
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
