use std::net::SocketAddr;

use tokio::net::UdpSocket;
use webrtc::rtp::packet::Packet;
use webrtc::util::Marshal;

use super::RtpForwarderConfig;
use crate::error::PluginError;
use crate::transport::tunnel::TunnelCipher;

/// Relays every publisher packet to another host over UDP
///
/// Sends never block the forwarding loop: a datagram the socket cannot take
/// right away is dropped.
pub struct RtpForwarder {
    socket: UdpSocket,
    target: SocketAddr,
    cipher: Option<TunnelCipher>,
    relayed: u64,
    failed: u64,
}

impl RtpForwarder {
    pub async fn connect(config: &RtpForwarderConfig) -> Result<Self, PluginError> {
        let target = tokio::net::lookup_host(config.addr.as_str())
            .await
            .map_err(|e| PluginError::Forwarder(format!("cannot resolve {}: {}", config.addr, e)))?
            .next()
            .ok_or_else(|| PluginError::Forwarder(format!("no address for {}", config.addr)))?;

        let bind_addr: SocketAddr = if target.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(bind_addr)
            .await
            .map_err(|e| PluginError::Forwarder(e.to_string()))?;
        socket
            .connect(target)
            .await
            .map_err(|e| PluginError::Forwarder(e.to_string()))?;

        let cipher = if config.key.is_empty() {
            None
        } else {
            Some(
                TunnelCipher::new(&config.key, &config.salt)
                    .map_err(|e| PluginError::Forwarder(e.to_string()))?,
            )
        };

        tracing::info!(
            "RTP forwarder relaying to {} (sealed: {})",
            target,
            cipher.is_some()
        );

        Ok(Self {
            socket,
            target,
            cipher,
            relayed: 0,
            failed: 0,
        })
    }

    pub fn relay(&mut self, packet: &Packet) {
        let raw = match packet.marshal() {
            Ok(raw) => raw,
            Err(e) => {
                tracing::debug!("Failed to marshal packet for forwarding: {}", e);
                self.failed += 1;
                return;
            }
        };

        let datagram = match &self.cipher {
            Some(cipher) => match cipher.seal(&raw) {
                Ok(sealed) => sealed,
                Err(e) => {
                    tracing::debug!("Failed to seal forwarded packet: {}", e);
                    self.failed += 1;
                    return;
                }
            },
            None => raw.to_vec(),
        };

        match self.socket.try_send(&datagram) {
            Ok(_) => self.relayed += 1,
            Err(e) => {
                self.failed += 1;
                if self.failed % 100 == 1 {
                    tracing::warn!("RTP forwarder to {} dropped packet: {}", self.target, e);
                }
            }
        }
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    pub fn relayed(&self) -> u64 {
        self.relayed
    }
}
