//! RTP transports
//!
//! Two mutually exclusive listeners produce the same kind of connection:
//! plain RTP over UDP, or a secured tunnel over TCP. Either way a connection
//! first has to declare its session (see [`handshake`]) before any of its
//! packets are handed on.

pub mod handshake;
pub mod tunnel;
mod udp;

use std::net::SocketAddr;

use relay_protocol::SessionId;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;
use webrtc::rtp::packet::Packet;

use crate::error::{IngestError, RelayError};

/// Packets buffered per connection before the transport starts dropping
pub const PACKET_QUEUE_SIZE: usize = 256;

/// Connections accepted but not yet picked up by the acceptance loop
const ACCEPT_BACKLOG: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportMode {
    Plain,
    Secured { key: String, salt: String },
}

/// A live RTP binding from one remote peer
pub struct RtpConnection {
    id: Uuid,
    remote: SocketAddr,
    session: Option<oneshot::Receiver<SessionId>>,
    packets: mpsc::Receiver<Packet>,
}

impl RtpConnection {
    pub fn new(
        remote: SocketAddr,
        session: oneshot::Receiver<SessionId>,
        packets: mpsc::Receiver<Packet>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            remote,
            session: Some(session),
            packets,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    /// Wait for the peer to declare its session. Can only be called once.
    pub async fn session_id(&mut self) -> Result<SessionId, IngestError> {
        let session = self.session.take().ok_or(IngestError::AlreadyResolved)?;
        session.await.map_err(|_| IngestError::ConnectionClosed)
    }

    /// Next packet after the handshake; `None` once the peer is gone
    pub async fn recv(&mut self) -> Option<Packet> {
        self.packets.recv().await
    }
}

impl std::fmt::Debug for RtpConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RtpConnection")
            .field("id", &self.id)
            .field("remote", &self.remote)
            .field("resolved", &self.session.is_none())
            .finish()
    }
}

/// Transport side of an [`RtpConnection`]
pub(crate) struct ConnectionFeed {
    remote: SocketAddr,
    session: Option<oneshot::Sender<SessionId>>,
    packets: mpsc::Sender<Packet>,
    dropped: u64,
}

impl ConnectionFeed {
    pub(crate) fn pair(remote: SocketAddr) -> (ConnectionFeed, RtpConnection) {
        let (session_tx, session_rx) = oneshot::channel();
        let (packets_tx, packets_rx) = mpsc::channel(PACKET_QUEUE_SIZE);

        let feed = ConnectionFeed {
            remote,
            session: Some(session_tx),
            packets: packets_tx,
            dropped: 0,
        };
        (feed, RtpConnection::new(remote, session_rx, packets_rx))
    }

    pub(crate) fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    /// Whether the owner released the connection
    pub(crate) fn is_closed(&self) -> bool {
        self.packets.is_closed()
    }

    /// Resolves once the owner releases the connection
    pub(crate) async fn closed(&self) {
        self.packets.closed().await
    }

    /// Hand a packet to the connection's owner.
    ///
    /// Returns `false` once nobody holds the connection any more.
    pub(crate) fn push(&mut self, packet: Packet) -> bool {
        if self.packets.is_closed() {
            return false;
        }

        if self.session.is_some() {
            let Some(id) = handshake::session_id(&packet) else {
                tracing::trace!("Dropping packet from {} before handshake", self.remote);
                return true;
            };
            if let Some(session) = self.session.take() {
                if session.send(id).is_err() {
                    return false;
                }
            }
        }

        match self.packets.try_send(packet) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped += 1;
                if self.dropped % 100 == 1 {
                    tracing::warn!(
                        "Packet queue for {} full, {} packets dropped",
                        self.remote,
                        self.dropped
                    );
                }
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

/// Stream of accepted connections from one listener
pub struct Incoming {
    local_addr: SocketAddr,
    connections: mpsc::Receiver<RtpConnection>,
    task: JoinHandle<()>,
}

impl Incoming {
    fn new(
        local_addr: SocketAddr,
        connections: mpsc::Receiver<RtpConnection>,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            local_addr,
            connections,
            task,
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn accept(&mut self) -> Option<RtpConnection> {
        self.connections.recv().await
    }
}

impl Drop for Incoming {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Plain RTP on `port`
pub async fn serve(port: u16) -> Result<Incoming, RelayError> {
    udp::serve(port).await
}

/// Secured tunnel on `port`, keyed by the pre-shared `key` and `salt`
pub async fn serve_secured(port: u16, key: &str, salt: &str) -> Result<Incoming, RelayError> {
    tunnel::serve(port, key, salt).await
}

pub async fn bind(mode: &TransportMode, port: u16) -> Result<Incoming, RelayError> {
    match mode {
        TransportMode::Plain => serve(port).await,
        TransportMode::Secured { key, salt } => serve_secured(port, key, salt).await,
    }
}
