//! Relay server wiring
//!
//! Validates configuration, initializes the WebRTC transport, builds the
//! router registry and runs the RTP listener and health sweep until shutdown.

use std::future::Future;
use std::sync::Arc;

use crate::bootstrap::{self, WebRtcTransport};
use crate::config::Config;
use crate::error::Result;
use crate::ingest::Listener;
use crate::registry::RouterRegistry;
use crate::router::{RouterFactory, RtpRouterFactory};
use crate::sweep::{self, CleanupReceiver, CleanupSender, HealthSweep};

pub struct RelayServer {
    config: Config,
    registry: Arc<RouterRegistry>,
    transport: WebRtcTransport,
    cleanup_tx: CleanupSender,
    cleanup_rx: Option<CleanupReceiver>,
}

impl RelayServer {
    /// Server forwarding with the built-in RTP router
    pub fn new(config: Config) -> Result<Self> {
        Self::with_factory(config, Arc::new(RtpRouterFactory))
    }

    pub fn with_factory(config: Config, factory: Arc<dyn RouterFactory>) -> Result<Self> {
        bootstrap::validate_plugin_config(&config.plugins)?;
        config.transport_mode()?;

        let transport = bootstrap::init_transport(
            bootstrap::ice_servers_from(&config.ice),
            config.ice.port_range_start,
            config.ice.port_range_end,
        )?;

        let registry = Arc::new(RouterRegistry::new(factory));
        registry.set_plugin_config(config.plugins.clone());
        registry.set_router_config(config.router.clone());

        let (cleanup_tx, cleanup_rx) = sweep::cleanup_channel();

        Ok(Self {
            config,
            registry,
            transport,
            cleanup_tx,
            cleanup_rx: Some(cleanup_rx),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &Arc<RouterRegistry> {
        &self.registry
    }

    pub fn transport(&self) -> &WebRtcTransport {
        &self.transport
    }

    /// Evicted sessions, for the signaling layer. Can be taken once.
    pub fn take_cleanup_receiver(&mut self) -> Option<CleanupReceiver> {
        self.cleanup_rx.take()
    }

    /// Bind the RTP listener on the configured port
    pub async fn bind(&self) -> Result<Listener> {
        let mode = self.config.transport_mode()?;
        Listener::bind(&mode, self.config.rtp_port, self.config.handshake_timeout()).await
    }

    /// Bind, then serve until `shutdown` resolves
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let listener = self.bind().await?;
        self.serve(listener, shutdown).await;
        Ok(())
    }

    /// Serve connections from `listener` until `shutdown` resolves, then
    /// close every router
    pub async fn serve<F>(self, listener: Listener, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let sweep = HealthSweep::new(Arc::clone(&self.registry), self.cleanup_tx.clone())
            .with_interval(self.config.sweep_interval())
            .spawn();

        tracing::info!("Relay serving RTP on {}", listener.local_addr());

        tokio::select! {
            _ = shutdown => {
                tracing::info!("Shutdown requested");
            }
            _ = listener.run(Arc::clone(&self.registry)) => {
                tracing::warn!("RTP listener stopped unexpectedly");
            }
        }

        self.registry.close().await;
        sweep.abort();
        tracing::info!("Relay stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RelayError;

    fn config() -> Config {
        let mut config = Config::default();
        config.rtp_port = 0;
        config.ice.stun_servers = vec![];
        config.ice.port_range_start = 0;
        config.ice.port_range_end = 0;
        config
    }

    #[test]
    fn test_invalid_plugins_stop_startup() {
        let mut config = config();
        config.plugins.jitter_buffer.max_buffer_time = 0;
        assert!(matches!(
            RelayServer::new(config),
            Err(RelayError::InvalidPluginConfig(_))
        ));
    }

    #[test]
    fn test_half_configured_tunnel_stops_startup() {
        let mut config = config();
        config.tunnel_salt = "salt".to_string();
        assert!(matches!(
            RelayServer::new(config),
            Err(RelayError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_configs_reach_registry() {
        let mut config = config();
        config.router.max_subscribers = 3;
        let mut server = RelayServer::new(config).unwrap();

        assert_eq!(server.registry().router_config().max_subscribers, 3);
        assert!(server.take_cleanup_receiver().is_some());
        assert!(server.take_cleanup_receiver().is_none());
    }

    #[tokio::test]
    async fn test_shutdown_closes_registry() {
        let server = RelayServer::new(config()).unwrap();
        let registry = Arc::clone(server.registry());

        server.run_until(async {}).await.unwrap();

        assert!(registry.is_closed());
    }
}
