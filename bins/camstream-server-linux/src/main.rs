use camstream_server::{MemoryFrameSource, PoolConfig, ServerConfig, StreamServer};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,camstream_server=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("camstream server starting...");

    // Configuration
    let frames_dir = PathBuf::from(
        std::env::var("CAMSTREAM_FRAMES_DIR").unwrap_or_else(|_| "./frames".into()),
    );
    let bind_addr: SocketAddr = std::env::var("CAMSTREAM_BIND")
        .unwrap_or_else(|_| "0.0.0.0:8080".into())
        .parse()?;

    let source = MemoryFrameSource::from_dir(&frames_dir, PoolConfig::default())?;
    tracing::info!(
        "Loaded {} frames from {}",
        source.frame_count(),
        frames_dir.display()
    );

    let config = ServerConfig {
        bind_addr,
        ..Default::default()
    };
    let server = StreamServer::new(config, Arc::new(source));

    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.run().await {
            tracing::error!("Stream server error: {}", e);
        }
    });

    tracing::info!("📷 camstream ready!");
    tracing::info!("   Stream: http://localhost:{}/stream", bind_addr.port());
    tracing::info!("");
    tracing::info!("Open the stream URL in a browser, or try:");
    tracing::info!("   curl -N http://localhost:{}/stream | head -c 512", bind_addr.port());

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received Ctrl+C, shutting down...");
        }
        _ = server_handle => {
            tracing::warn!("Stream server stopped");
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
