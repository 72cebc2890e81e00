//! Default forwarding engine
//!
//! Reads RTP packets from the publisher's connection, runs them through the
//! router's plugin chain and forwards a copy to every subscriber queue.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use relay_protocol::{PeerId, SessionId};
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::task::JoinHandle;
use uuid::Uuid;
use webrtc::rtp::packet::Packet;

use super::{Router, RouterConfig, RouterFactory, SubscriberHandle};
use crate::error::RouterError;
use crate::plugins::{JitterStats, PluginChain, PluginConfig};
use crate::transport::RtpConnection;

type Subscribers = Arc<RwLock<HashMap<PeerId, SubscriberHandle>>>;

struct Publisher {
    peer_id: PeerId,
    connection_id: Uuid,
    task: JoinHandle<()>,
}

pub struct RtpRouter {
    id: SessionId,
    config: Arc<RouterConfig>,
    plugins: Arc<PluginConfig>,
    chain: Arc<parking_lot::Mutex<PluginChain>>,
    publisher: Mutex<Option<Publisher>>,
    subscribers: Subscribers,
    /// Last publisher bind or packet
    last_activity: Arc<parking_lot::Mutex<Instant>>,
    closed: AtomicBool,
}

impl RtpRouter {
    /// Create a router, starting its plugin chain
    pub async fn new(
        id: SessionId,
        plugins: Arc<PluginConfig>,
        config: Arc<RouterConfig>,
    ) -> Result<Self, RouterError> {
        let chain = PluginChain::build(&plugins).await?;

        Ok(Self {
            id,
            config,
            plugins,
            chain: Arc::new(parking_lot::Mutex::new(chain)),
            publisher: Mutex::new(None),
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            last_activity: Arc::new(parking_lot::Mutex::new(Instant::now())),
            closed: AtomicBool::new(false),
        })
    }

    /// The plugin configuration this router was built with
    pub fn plugin_config(&self) -> &PluginConfig {
        &self.plugins
    }

    pub fn router_config(&self) -> &RouterConfig {
        &self.config
    }

    /// Packets the forwarder plugin relayed so far
    pub fn forwarded_by_plugins(&self) -> u64 {
        self.chain.lock().forwarded()
    }

    async fn forward(
        id: SessionId,
        mut conn: RtpConnection,
        chain: Arc<parking_lot::Mutex<PluginChain>>,
        subscribers: Subscribers,
        last_activity: Arc<parking_lot::Mutex<Instant>>,
    ) {
        let mut packet_count = 0u64;
        let mut dropped = 0u64;

        while let Some(packet) = conn.recv().await {
            packet_count += 1;
            *last_activity.lock() = Instant::now();

            chain.lock().process(&packet);

            let subs = subscribers.read().await;
            for (subscriber_id, handle) in subs.iter() {
                if !handle.try_forward(&packet) && !handle.is_closed() {
                    dropped += 1;
                    if dropped % 100 == 1 {
                        tracing::warn!(
                            "Subscriber {} of session {} is falling behind ({} packets dropped)",
                            subscriber_id,
                            id,
                            dropped
                        );
                    }
                }
            }

            if packet_count % 1000 == 1 {
                tracing::debug!(
                    "Session {} forwarded packet {} (seq: {}) to {} subscribers",
                    id,
                    packet_count,
                    packet.header.sequence_number,
                    subs.len()
                );
            }
        }

        tracing::info!(
            "Publisher connection {} for session {} ended after {} packets",
            conn.remote_addr(),
            id,
            packet_count
        );
    }
}

#[async_trait]
impl Router for RtpRouter {
    fn id(&self) -> &SessionId {
        &self.id
    }

    async fn add_pub(&self, publisher: PeerId, conn: RtpConnection) {
        if self.closed.load(Ordering::Acquire) {
            tracing::warn!(
                "Rejecting publisher {} for closed session {}",
                publisher,
                self.id
            );
            return;
        }

        let connection_id = conn.id();
        let remote = conn.remote_addr();
        *self.last_activity.lock() = Instant::now();

        let task = tokio::spawn(Self::forward(
            self.id.clone(),
            conn,
            Arc::clone(&self.chain),
            Arc::clone(&self.subscribers),
            Arc::clone(&self.last_activity),
        ));

        let previous = self.publisher.lock().await.replace(Publisher {
            peer_id: publisher.clone(),
            connection_id,
            task,
        });

        if let Some(previous) = previous {
            previous.task.abort();
            tracing::info!(
                "Publisher {} (connection {}) replaced in session {}",
                previous.peer_id,
                previous.connection_id,
                self.id
            );
        }

        tracing::info!(
            "Publisher {} bound to session {} from {}",
            publisher,
            self.id,
            remote
        );
    }

    async fn publisher(&self) -> Option<PeerId> {
        self.publisher
            .lock()
            .await
            .as_ref()
            .map(|p| p.peer_id.clone())
    }

    async fn add_sub(&self, subscriber: PeerId) -> Result<mpsc::Receiver<Packet>, RouterError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(RouterError::Closed);
        }

        let mut subs = self.subscribers.write().await;
        let limit = self.config.max_subscribers;
        if limit > 0 && subs.len() >= limit && !subs.contains_key(&subscriber) {
            return Err(RouterError::SubscriberLimit(limit));
        }

        let (tx, rx) = mpsc::channel(self.config.subscriber_queue.max(1));
        subs.insert(subscriber.clone(), SubscriberHandle::new(subscriber.clone(), tx));

        tracing::info!(
            "Added subscriber {} to session {} ({} subscribers)",
            subscriber,
            self.id,
            subs.len()
        );

        Ok(rx)
    }

    async fn del_sub(&self, subscriber: &PeerId) -> bool {
        let removed = self.subscribers.write().await.remove(subscriber).is_some();
        if removed {
            tracing::info!("Removed subscriber {} from session {}", subscriber, self.id);
        }
        removed
    }

    async fn subs(&self) -> HashMap<PeerId, SubscriberHandle> {
        self.subscribers.read().await.clone()
    }

    async fn stream_stats(&self) -> Vec<(u32, JitterStats)> {
        self.chain.lock().stream_stats()
    }

    async fn alive(&self) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        self.last_activity.lock().elapsed() < self.config.liveness_timeout()
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Some(publisher) = self.publisher.lock().await.take() {
            publisher.task.abort();
        }
        self.subscribers.write().await.clear();
        self.chain.lock().close();

        tracing::info!("Router for session {} closed", self.id);
    }
}

/// Builds [`RtpRouter`]s
#[derive(Debug, Default, Clone, Copy)]
pub struct RtpRouterFactory;

#[async_trait]
impl RouterFactory for RtpRouterFactory {
    async fn build(
        &self,
        id: &SessionId,
        plugins: Arc<PluginConfig>,
        config: Arc<RouterConfig>,
    ) -> Result<Arc<dyn Router>, RouterError> {
        let router = RtpRouter::new(id.clone(), plugins, config).await?;
        Ok(Arc::new(router))
    }
}
