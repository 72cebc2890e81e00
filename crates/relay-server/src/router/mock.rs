//! In-memory router doubles for registry, sweep and ingestion tests

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use relay_protocol::{PeerId, SessionId};
use tokio::sync::mpsc;
use webrtc::rtp::packet::Packet;

use super::{Router, RouterConfig, RouterFactory, SubscriberHandle};
use crate::error::{PluginError, RouterError};
use crate::plugins::PluginConfig;
use crate::transport::RtpConnection;

pub(crate) struct MockRouter {
    id: SessionId,
    pub plugins: Arc<PluginConfig>,
    pub config: Arc<RouterConfig>,
    pub alive: AtomicBool,
    pub closes: AtomicUsize,
    pub publishers: parking_lot::Mutex<Vec<PeerId>>,
    subscribers: parking_lot::Mutex<HashMap<PeerId, SubscriberHandle>>,
}

impl MockRouter {
    pub fn new(id: SessionId, plugins: Arc<PluginConfig>, config: Arc<RouterConfig>) -> Self {
        Self {
            id,
            plugins,
            config,
            alive: AtomicBool::new(true),
            closes: AtomicUsize::new(0),
            publishers: parking_lot::Mutex::new(Vec::new()),
            subscribers: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    pub fn kill(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Router for MockRouter {
    fn id(&self) -> &SessionId {
        &self.id
    }

    async fn add_pub(&self, publisher: PeerId, _conn: RtpConnection) {
        self.publishers.lock().push(publisher);
    }

    async fn publisher(&self) -> Option<PeerId> {
        self.publishers.lock().last().cloned()
    }

    async fn add_sub(&self, subscriber: PeerId) -> Result<mpsc::Receiver<Packet>, RouterError> {
        let (tx, rx) = mpsc::channel(8);
        self.subscribers
            .lock()
            .insert(subscriber.clone(), SubscriberHandle::new(subscriber, tx));
        Ok(rx)
    }

    async fn del_sub(&self, subscriber: &PeerId) -> bool {
        self.subscribers.lock().remove(subscriber).is_some()
    }

    async fn subs(&self) -> HashMap<PeerId, SubscriberHandle> {
        self.subscribers.lock().clone()
    }

    async fn alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.alive.store(false, Ordering::SeqCst);
    }
}

/// Hands out [`MockRouter`]s and keeps them reachable for assertions
#[derive(Default)]
pub(crate) struct MockFactory {
    pub built: AtomicUsize,
    pub fail: AtomicBool,
    pub routers: parking_lot::Mutex<Vec<Arc<MockRouter>>>,
}

impl MockFactory {
    pub fn built(&self) -> usize {
        self.built.load(Ordering::SeqCst)
    }

    pub fn router(&self, id: &str) -> Option<Arc<MockRouter>> {
        self.routers
            .lock()
            .iter()
            .rev()
            .find(|r| r.id.as_str() == id)
            .cloned()
    }
}

#[async_trait]
impl RouterFactory for MockFactory {
    async fn build(
        &self,
        id: &SessionId,
        plugins: Arc<PluginConfig>,
        config: Arc<RouterConfig>,
    ) -> Result<Arc<dyn Router>, RouterError> {
        // give concurrent callers a chance to interleave
        tokio::task::yield_now().await;

        if self.fail.load(Ordering::SeqCst) {
            return Err(RouterError::PluginInit(PluginError::Forwarder(
                "mock failure".to_string(),
            )));
        }

        self.built.fetch_add(1, Ordering::SeqCst);
        let router = Arc::new(MockRouter::new(id.clone(), plugins, config));
        self.routers.lock().push(Arc::clone(&router));
        Ok(router)
    }
}

/// Pointer identity for trait objects, ignoring vtables
pub(crate) fn same_router(a: &Arc<dyn Router>, b: &Arc<dyn Router>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}
