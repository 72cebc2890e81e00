use anyhow::Result;
use relay_protocol::RelayEvent;
use relay_server::{Config, RelayServer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relay_server=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting relay server...");

    // Load configuration
    let config = Config::load()?;

    let mut server = RelayServer::new(config)?;

    // Report evicted sessions to whoever tails the log
    if let Some(mut cleanup) = server.take_cleanup_receiver() {
        tokio::spawn(async move {
            while let Some(mid) = cleanup.recv().await {
                match RelayEvent::evicted(mid).to_json() {
                    Ok(event) => tracing::info!(target: "relay_server::events", "{}", event),
                    Err(e) => tracing::error!("Failed to encode eviction event: {}", e),
                }
            }
        });
    }

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
        })
        .await?;

    Ok(())
}
