//! Connection ingestion
//!
//! Accepts connections from the transport listener and binds each one to
//! the router of the session it declares.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use relay_protocol::{PeerId, RelayEvent, SessionId};

use crate::error::{IngestError, RelayError};
use crate::registry::RouterRegistry;
use crate::transport::{self, Incoming, RtpConnection, TransportMode};

pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

pub struct Listener {
    incoming: Incoming,
    handshake_timeout: Duration,
}

impl Listener {
    pub async fn bind(
        mode: &TransportMode,
        port: u16,
        handshake_timeout: Duration,
    ) -> Result<Self, RelayError> {
        let incoming = transport::bind(mode, port).await?;
        let secured = matches!(mode, TransportMode::Secured { .. });
        tracing::info!(
            "RTP listener on {} ({})",
            incoming.local_addr(),
            if secured { "secured tunnel" } else { "plain udp" }
        );
        Ok(Self::from_incoming(incoming, handshake_timeout))
    }

    pub fn from_incoming(incoming: Incoming, handshake_timeout: Duration) -> Self {
        Self {
            incoming,
            handshake_timeout,
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.incoming.local_addr()
    }

    /// Dispatch connections until the registry closes or the transport stops
    pub async fn run(mut self, registry: Arc<RouterRegistry>) {
        while let Some(conn) = self.incoming.accept().await {
            if registry.is_closed() {
                tracing::debug!("Registry closed, refusing connection from {}", conn.remote_addr());
                break;
            }

            let registry = Arc::clone(&registry);
            let timeout = self.handshake_timeout;
            tokio::spawn(async move {
                let remote = conn.remote_addr();
                if let Err(e) = bind_connection(&registry, conn, timeout).await {
                    tracing::warn!("Dropping connection from {}: {}", remote, e);
                }
            });
        }

        tracing::info!("Acceptance loop on {} stopped", self.incoming.local_addr());
    }
}

/// Resolve the connection's session and hand it to that session's router
/// as publisher
pub async fn bind_connection(
    registry: &RouterRegistry,
    mut conn: RtpConnection,
    handshake_timeout: Duration,
) -> Result<SessionId, IngestError> {
    let id = tokio::time::timeout(handshake_timeout, conn.session_id())
        .await
        .map_err(|_| IngestError::HandshakeTimeout(handshake_timeout))??;

    if id.is_empty() {
        return Err(IngestError::MissingSessionId);
    }

    let router = registry
        .get_or_new_router(&id)
        .await
        .ok_or_else(|| IngestError::RouterUnavailable(id.to_string()))?;

    let publisher = PeerId::from(&id);
    let event = RelayEvent::PublisherBound {
        mid: id.clone(),
        uid: publisher.clone(),
        connection_id: conn.id(),
        remote: conn.remote_addr().to_string(),
    };
    router.add_pub(publisher, conn).await;

    if let Ok(event) = event.to_json() {
        tracing::debug!(target: "relay_server::events", "{}", event);
    }
    Ok(id)
}
