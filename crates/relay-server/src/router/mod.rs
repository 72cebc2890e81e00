//! Forwarding engine contract
//!
//! A router forwards one session's media: RTP from its single publisher is
//! fanned out to every subscriber. The registry only relies on the [`Router`]
//! trait; [`RtpRouter`] is the engine the relay ships with.

mod rtp_router;

#[cfg(test)]
pub(crate) mod mock;

pub use rtp_router::{RtpRouter, RtpRouterFactory};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use relay_protocol::{PeerId, SessionId};
use serde::Deserialize;
use tokio::sync::mpsc;
use webrtc::rtp::packet::Packet;

use crate::error::RouterError;
use crate::plugins::{JitterStats, PluginConfig};
use crate::transport::RtpConnection;

#[async_trait]
pub trait Router: Send + Sync {
    fn id(&self) -> &SessionId;

    /// Bind `conn` as this session's publisher, replacing any previous one
    async fn add_pub(&self, publisher: PeerId, conn: RtpConnection);

    /// Currently bound publisher
    async fn publisher(&self) -> Option<PeerId>;

    async fn add_sub(&self, subscriber: PeerId) -> Result<mpsc::Receiver<Packet>, RouterError>;

    async fn del_sub(&self, subscriber: &PeerId) -> bool;

    async fn subs(&self) -> HashMap<PeerId, SubscriberHandle>;

    /// Sequence accounting for each publisher SSRC, ordered by SSRC. Empty
    /// when the router keeps none.
    async fn stream_stats(&self) -> Vec<(u32, JitterStats)> {
        Vec::new()
    }

    /// Liveness check. Never fails; anything wrong inside means "not alive".
    async fn alive(&self) -> bool;

    /// Stop forwarding. Idempotent.
    async fn close(&self);
}

/// Builds routers for the registry
#[async_trait]
pub trait RouterFactory: Send + Sync {
    async fn build(
        &self,
        id: &SessionId,
        plugins: Arc<PluginConfig>,
        config: Arc<RouterConfig>,
    ) -> Result<Arc<dyn Router>, RouterError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Packets buffered per subscriber before forwarding drops
    pub subscriber_queue: usize,
    /// A router without publisher activity for this long is dead
    pub liveness_timeout_ms: u64,
    /// Maximum subscribers per router (0 = unlimited)
    pub max_subscribers: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            subscriber_queue: 256,
            liveness_timeout_ms: 10_000,
            max_subscribers: 0,
        }
    }
}

impl RouterConfig {
    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_millis(self.liveness_timeout_ms)
    }

    /// Set the liveness timeout
    pub fn with_liveness_timeout(mut self, timeout: Duration) -> Self {
        self.liveness_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the per-subscriber queue size
    pub fn with_subscriber_queue(mut self, size: usize) -> Self {
        self.subscriber_queue = size.max(1);
        self
    }

    pub fn with_max_subscribers(mut self, max: usize) -> Self {
        self.max_subscribers = max;
        self
    }
}

/// A subscriber's end of the fan-out
#[derive(Debug, Clone)]
pub struct SubscriberHandle {
    peer_id: PeerId,
    tx: mpsc::Sender<Packet>,
}

impl SubscriberHandle {
    pub fn new(peer_id: PeerId, tx: mpsc::Sender<Packet>) -> Self {
        Self { peer_id, tx }
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    /// Whether the subscriber dropped its receiver
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Queue a packet without waiting. `false` if it was dropped.
    pub fn try_forward(&self, packet: &Packet) -> bool {
        self.tx.try_send(packet.clone()).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_router_config_builders() {
        let config = RouterConfig::default()
            .with_liveness_timeout(Duration::from_secs(3))
            .with_subscriber_queue(0)
            .with_max_subscribers(8);

        assert_eq!(config.liveness_timeout(), Duration::from_secs(3));
        assert_eq!(config.subscriber_queue, 1);
        assert_eq!(config.max_subscribers, 8);
    }

    #[test]
    fn test_huge_liveness_timeout_saturates() {
        let config = RouterConfig::default().with_liveness_timeout(Duration::MAX);
        assert_eq!(config.liveness_timeout_ms, u64::MAX);
        assert_eq!(config.liveness_timeout(), Duration::from_millis(u64::MAX));
    }

    #[tokio::test]
    async fn test_subscriber_handle_drops_when_full() {
        let (tx, mut rx) = mpsc::channel(1);
        let handle = SubscriberHandle::new(PeerId::from("bob"), tx);
        let packet = Packet::default();

        assert!(handle.try_forward(&packet));
        assert!(!handle.try_forward(&packet));
        assert!(rx.recv().await.is_some());

        drop(rx);
        assert!(handle.is_closed());
    }
}
