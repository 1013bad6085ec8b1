use std::sync::Arc;

use mps::InMemoryChannelManager;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mps_proxy::config::{load_channels, ProxyConfig};
use mps_proxy::content::load_content_file;
use mps_proxy::PaywalledProxy;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ProxyConfig::from_env().expect("Failed to load configuration");
    let debug = std::env::var("MPS_DEBUG")
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false);

    tracing::info!("Starting mps-proxy on {}:{}", config.host, config.port);
    tracing::info!("Receiver address: {:#x}", config.receiver_address());
    tracing::info!("Channel contract: {:#x}", config.contract_address);

    let manager = Arc::new(InMemoryChannelManager::new(
        config.receiver_address(),
        config.contract_address,
    ));
    if let Some(ref path) = config.channels_file {
        let channels = load_channels(path).expect("Failed to load channels file");
        tracing::info!("Restoring {} channels from {}", channels.len(), path.display());
        for channel in channels {
            let key = channel.key();
            if let Err(e) = manager.restore_channel(channel) {
                tracing::warn!(channel = %key, error = %e, "Skipping seeded channel");
            }
        }
    }

    let content = match config.content_file {
        Some(ref path) => load_content_file(path).expect("Failed to load content file"),
        None => Vec::new(),
    };
    if content.is_empty() {
        tracing::warn!("No paywalled content configured; every content path will 404");
    }

    let mut proxy = PaywalledProxy::new(manager, config).map_err(std::io::Error::other)?;
    for item in content {
        tracing::info!("Paywalled: /{} at {}", item.pattern(), item.price());
        proxy.add_content(item);
    }

    proxy.start(debug).await.map_err(std::io::Error::other)?;

    let interrupted = tokio::select! {
        result = proxy.join() => {
            result.map_err(std::io::Error::other)?;
            false
        }
        _ = tokio::signal::ctrl_c() => true,
    };

    if interrupted {
        tracing::info!("Shutdown signal received");
        proxy.stop().await.map_err(std::io::Error::other)?;
    }
    Ok(())
}
