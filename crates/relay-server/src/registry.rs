//! Router registry
//!
//! Owns one router per active session. Every mutation holds the write half
//! of the map lock, so a session can never end up with two routers and no
//! router is observed halfway through deletion.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use relay_protocol::SessionId;
use tokio::sync::{RwLock, RwLockWriteGuard};

use crate::plugins::PluginConfig;
use crate::router::{Router, RouterConfig, RouterFactory};

pub(crate) type RouterMap = HashMap<SessionId, Arc<dyn Router>>;

pub struct RouterRegistry {
    routers: RwLock<RouterMap>,
    factory: Arc<dyn RouterFactory>,
    plugins: parking_lot::RwLock<Arc<PluginConfig>>,
    router_config: parking_lot::RwLock<Arc<RouterConfig>>,
    closed: AtomicBool,
}

impl RouterRegistry {
    pub fn new(factory: Arc<dyn RouterFactory>) -> Self {
        Self {
            routers: RwLock::new(HashMap::new()),
            factory,
            plugins: parking_lot::RwLock::new(Arc::new(PluginConfig::default())),
            router_config: parking_lot::RwLock::new(Arc::new(RouterConfig::default())),
            closed: AtomicBool::new(false),
        }
    }

    /// Plugin configuration for routers built from now on
    pub fn set_plugin_config(&self, config: PluginConfig) {
        tracing::info!("Plugin config set: {:?}", config);
        *self.plugins.write() = Arc::new(config);
    }

    /// Router configuration for routers built from now on
    pub fn set_router_config(&self, config: RouterConfig) {
        tracing::info!("Router config set: {:?}", config);
        *self.router_config.write() = Arc::new(config);
    }

    pub fn plugin_config(&self) -> Arc<PluginConfig> {
        self.plugins.read().clone()
    }

    pub fn router_config(&self) -> Arc<RouterConfig> {
        self.router_config.read().clone()
    }

    /// Existing router for `id`, or a freshly built one
    pub async fn get_or_new_router(&self, id: &SessionId) -> Option<Arc<dyn Router>> {
        tracing::debug!("Get or create router for session {}", id);
        if let Some(router) = self.get_router(id).await {
            return Some(router);
        }
        self.add_router(id).await
    }

    pub async fn get_router(&self, id: &SessionId) -> Option<Arc<dyn Router>> {
        self.routers.read().await.get(id).cloned()
    }

    /// Register a router for `id`
    ///
    /// Returns the already registered router if there is one. `None` if the
    /// registry is closed or the router could not be built; nothing is
    /// registered in that case.
    pub async fn add_router(&self, id: &SessionId) -> Option<Arc<dyn Router>> {
        if self.is_closed() {
            tracing::debug!("Registry closed, not creating router for session {}", id);
            return None;
        }

        let mut routers = self.routers.write().await;
        if self.is_closed() {
            return None;
        }
        if let Some(existing) = routers.get(id) {
            return Some(Arc::clone(existing));
        }

        let plugins = self.plugin_config();
        let config = self.router_config();
        match self.factory.build(id, plugins, config).await {
            Ok(router) => {
                routers.insert(id.clone(), Arc::clone(&router));
                tracing::info!("Created router for session {} ({} active)", id, routers.len());
                Some(router)
            }
            Err(e) => {
                tracing::error!("Failed to create router for session {}: {}", id, e);
                None
            }
        }
    }

    /// Close and remove the router for `id`. No-op if there is none.
    pub async fn del_router(&self, id: &SessionId) {
        let mut routers = self.routers.write().await;
        let Some(router) = routers.get(id).cloned() else {
            return;
        };

        router.close().await;
        routers.remove(id);
        tracing::info!("Deleted router for session {}", id);
    }

    /// Close every router and refuse new ones. Only the first call does anything.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let mut routers = self.routers.write().await;
        let count = routers.len();
        for (id, router) in routers.drain() {
            router.close().await;
            tracing::debug!("Closed router for session {}", id);
        }
        tracing::info!("Registry closed, {} routers shut down", count);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub async fn len(&self) -> usize {
        self.routers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.routers.read().await.is_empty()
    }

    pub async fn session_ids(&self) -> Vec<SessionId> {
        self.routers.read().await.keys().cloned().collect()
    }

    /// Exclusive access to the whole map, for the health sweep
    pub(crate) async fn lock_exclusive(&self) -> RwLockWriteGuard<'_, RouterMap> {
        self.routers.write().await
    }
}
