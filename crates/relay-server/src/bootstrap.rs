//! Process bootstrap
//!
//! Startup checks and the WebRTC transport the signaling layer creates peer
//! connections from.

use std::sync::Arc;

use webrtc::api::API;
use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::ice::udp_network::{EphemeralUDP, UDPNetwork};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;

use crate::config::IceConfig;
use crate::error::{RelayError, Result};
use crate::plugins::{self, PluginConfig};

/// Shared WebRTC API plus the ICE settings every peer connection uses
pub struct WebRtcTransport {
    api: Arc<API>,
    ice_servers: Vec<RTCIceServer>,
    port_range: (u16, u16),
}

impl WebRtcTransport {
    pub fn api(&self) -> &Arc<API> {
        &self.api
    }

    /// Ephemeral UDP range for ICE candidates, `(0, 0)` when left to the OS
    pub fn port_range(&self) -> (u16, u16) {
        self.port_range
    }

    /// ICE servers as handed to clients
    pub fn ice_servers(&self) -> Vec<relay_protocol::IceServer> {
        self.ice_servers
            .iter()
            .map(|server| relay_protocol::IceServer {
                urls: server.urls.clone(),
                username: (!server.username.is_empty()).then(|| server.username.clone()),
                credential: (!server.credential.is_empty()).then(|| server.credential.clone()),
            })
            .collect()
    }

    pub async fn new_peer_connection(&self) -> Result<Arc<RTCPeerConnection>> {
        let config = RTCConfiguration {
            ice_servers: self.ice_servers.clone(),
            ..Default::default()
        };

        let pc = self
            .api
            .new_peer_connection(config)
            .await
            .map_err(|e| RelayError::TransportBootstrap(e.to_string()))?;
        Ok(Arc::new(pc))
    }
}

impl std::fmt::Debug for WebRtcTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebRtcTransport")
            .field("ice_servers", &self.ice_servers.len())
            .field("port_range", &self.port_range)
            .finish()
    }
}

/// Build the WebRTC API: default codecs and interceptors, candidates
/// gathered on `port_start..=port_end` (both 0 for OS-assigned ports)
pub fn init_transport(
    ice_servers: Vec<RTCIceServer>,
    port_start: u16,
    port_end: u16,
) -> Result<WebRtcTransport> {
    let bootstrap = |e: webrtc::error::Error| RelayError::TransportBootstrap(e.to_string());

    let mut media_engine = MediaEngine::default();
    media_engine.register_default_codecs().map_err(bootstrap)?;

    let mut registry = Registry::new();
    registry = register_default_interceptors(registry, &mut media_engine).map_err(bootstrap)?;

    let mut setting_engine = SettingEngine::default();
    if (port_start, port_end) != (0, 0) {
        if port_start > port_end {
            return Err(RelayError::TransportBootstrap(format!(
                "ICE port range {}-{} is inverted",
                port_start, port_end
            )));
        }
        let ephemeral = EphemeralUDP::new(port_start, port_end)
            .map_err(|e| RelayError::TransportBootstrap(e.to_string()))?;
        setting_engine.set_udp_network(UDPNetwork::Ephemeral(ephemeral));
    }

    let api = APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .with_setting_engine(setting_engine)
        .build();

    tracing::info!(
        "WebRTC transport ready ({} ICE servers, ports {}-{})",
        ice_servers.len(),
        port_start,
        port_end
    );

    Ok(WebRtcTransport {
        api: Arc::new(api),
        ice_servers,
        port_range: (port_start, port_end),
    })
}

pub fn ice_servers_from(config: &IceConfig) -> Vec<RTCIceServer> {
    let mut ice_servers = vec![];

    for stun_url in &config.stun_servers {
        ice_servers.push(RTCIceServer {
            urls: vec![stun_url.clone()],
            ..Default::default()
        });
    }

    for turn in &config.turn_servers {
        ice_servers.push(RTCIceServer {
            urls: vec![turn.url.clone()],
            username: turn.username.clone(),
            credential: turn.credential.clone(),
            ..Default::default()
        });
    }

    ice_servers
}

/// Reject a plugin configuration before any router is built with it
pub fn validate_plugin_config(config: &PluginConfig) -> Result<()> {
    plugins::validate(config)?;
    Ok(())
}
