//! Per-router plugin chain
//!
//! Every router builds its own chain from the `PluginConfig` snapshot that was
//! current when the router was constructed. Plugins observe each RTP packet
//! the publisher sends before it is fanned out to subscribers.

mod forwarder;
mod jitter;

pub use forwarder::RtpForwarder;
pub use jitter::{JitterBuffer, JitterStats};

use serde::Deserialize;
use webrtc::rtp::packet::Packet;

use crate::error::PluginError;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PluginConfig {
    /// Master switch for the whole chain
    pub on: bool,
    pub jitter_buffer: JitterBufferConfig,
    pub rtp_forwarder: RtpForwarderConfig,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            on: true,
            jitter_buffer: JitterBufferConfig::default(),
            rtp_forwarder: RtpForwarderConfig::default(),
        }
    }
}

impl PluginConfig {
    /// A config with every plugin switched off
    pub fn disabled() -> Self {
        Self {
            on: false,
            jitter_buffer: JitterBufferConfig {
                on: false,
                ..Default::default()
            },
            rtp_forwarder: RtpForwarderConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct JitterBufferConfig {
    pub on: bool,
    /// Milliseconds a gap is tracked before it counts as lost for good
    pub max_buffer_time: u64,
}

impl Default for JitterBufferConfig {
    fn default() -> Self {
        Self {
            on: true,
            max_buffer_time: 1000,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RtpForwarderConfig {
    pub on: bool,
    /// `host:port` the packets are relayed to
    pub addr: String,
    /// When both are set, relayed datagrams are sealed with the tunnel cipher
    pub key: String,
    pub salt: String,
}

/// Checks a plugin configuration without building anything
pub fn validate(config: &PluginConfig) -> Result<(), PluginError> {
    if !config.on {
        return Ok(());
    }

    let jb = &config.jitter_buffer;
    let fwd = &config.rtp_forwarder;

    if !jb.on && !fwd.on {
        return Err(PluginError::NoPluginEnabled);
    }

    if jb.on && jb.max_buffer_time == 0 {
        return Err(PluginError::JitterBuffer(
            "max_buffer_time must be positive".to_string(),
        ));
    }

    if fwd.on {
        let port = fwd
            .addr
            .rsplit_once(':')
            .filter(|(host, _)| !host.is_empty())
            .and_then(|(_, port)| port.parse::<u16>().ok());
        if port.is_none() {
            return Err(PluginError::Forwarder(format!(
                "addr must be host:port, got {:?}",
                fwd.addr
            )));
        }
        if fwd.key.is_empty() != fwd.salt.is_empty() {
            return Err(PluginError::Forwarder(
                "key and salt must be set together".to_string(),
            ));
        }
    }

    Ok(())
}

/// The plugins one router runs its publisher's packets through
#[derive(Default)]
pub struct PluginChain {
    jitter_buffer: Option<JitterBuffer>,
    forwarder: Option<RtpForwarder>,
}

impl PluginChain {
    /// Build the chain, failing if any enabled plugin cannot start
    pub async fn build(config: &PluginConfig) -> Result<Self, PluginError> {
        if !config.on {
            return Ok(Self::default());
        }
        validate(config)?;

        let jitter_buffer = config
            .jitter_buffer
            .on
            .then(|| JitterBuffer::new(&config.jitter_buffer));

        let forwarder = if config.rtp_forwarder.on {
            Some(RtpForwarder::connect(&config.rtp_forwarder).await?)
        } else {
            None
        };

        Ok(Self {
            jitter_buffer,
            forwarder,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.jitter_buffer.is_none() && self.forwarder.is_none()
    }

    pub fn process(&mut self, packet: &Packet) {
        if let Some(jb) = self.jitter_buffer.as_mut() {
            jb.push(packet);
        }
        if let Some(fwd) = self.forwarder.as_mut() {
            fwd.relay(packet);
        }
    }

    /// Per-SSRC sequence accounting, empty without a jitter buffer
    pub fn stream_stats(&self) -> Vec<(u32, JitterStats)> {
        self.jitter_buffer
            .as_ref()
            .map(|jb| jb.all_stats())
            .unwrap_or_default()
    }

    pub fn forwarded(&self) -> u64 {
        self.forwarder.as_ref().map(|f| f.relayed()).unwrap_or(0)
    }

    pub fn close(&mut self) {
        self.jitter_buffer = None;
        if let Some(fwd) = self.forwarder.take() {
            tracing::debug!("RTP forwarder to {} closed after {} packets", fwd.target(), fwd.relayed());
        }
    }
}
