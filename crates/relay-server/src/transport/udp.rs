//! Plain RTP over UDP
//!
//! One socket serves every publisher; datagrams are demultiplexed by remote
//! address. The first datagram from an unknown address, or from one whose
//! previous connection was released, opens a new connection.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use webrtc::rtp::packet::Packet;
use webrtc::util::Unmarshal;

use super::{ACCEPT_BACKLOG, ConnectionFeed, Incoming, RtpConnection};
use crate::error::RelayError;

/// Largest UDP payload, so oversized datagrams are never truncated
const RECEIVE_BUFFER: usize = 64 * 1024;

/// How often peers whose connection was released are forgotten
const PRUNE_INTERVAL: Duration = Duration::from_secs(5);

pub(super) async fn serve(port: u16) -> Result<Incoming, RelayError> {
    let socket = UdpSocket::bind(("0.0.0.0", port)).await?;
    let local_addr = socket.local_addr()?;
    tracing::info!("RTP listening on udp {}", local_addr);

    let (conn_tx, conn_rx) = mpsc::channel(ACCEPT_BACKLOG);
    let task = tokio::spawn(demux(socket, conn_tx));

    Ok(Incoming::new(local_addr, conn_rx, task))
}

async fn demux(socket: UdpSocket, conn_tx: mpsc::Sender<RtpConnection>) {
    let mut peers: HashMap<SocketAddr, ConnectionFeed> = HashMap::new();
    let mut buf = vec![0u8; RECEIVE_BUFFER];
    let mut prune = tokio::time::interval(PRUNE_INTERVAL);
    prune.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let received = tokio::select! {
            received = socket.recv_from(&mut buf) => received,
            _ = prune.tick() => {
                let released = prune_released(&mut peers);
                if released > 0 {
                    tracing::debug!("Forgot {} released RTP peers ({} active)", released, peers.len());
                }
                continue;
            }
        };

        let (len, remote) = match received {
            Ok(received) => received,
            Err(e) => {
                // ICMP port unreachable and friends surface here; keep serving
                tracing::debug!("UDP receive error: {}", e);
                continue;
            }
        };

        let packet = match Packet::unmarshal(&mut &buf[..len]) {
            Ok(packet) => packet,
            Err(e) => {
                tracing::debug!("Dropping non-RTP datagram from {}: {}", remote, e);
                continue;
            }
        };

        // an unknown peer, or one whose previous connection was released,
        // gets a fresh connection starting with this datagram
        let reopen = peers.get(&remote).map(|feed| feed.is_closed()).unwrap_or(true);
        if reopen {
            let (feed, connection) = ConnectionFeed::pair(remote);
            if conn_tx.send(connection).await.is_err() {
                tracing::debug!("UDP listener dropped, stopping demux");
                return;
            }
            tracing::debug!("New RTP connection from {}", remote);
            peers.insert(remote, feed);
        }

        let still_wanted = peers
            .get_mut(&remote)
            .map(|feed| feed.push(packet))
            .unwrap_or(false);

        if !still_wanted {
            peers.remove(&remote);
            tracing::debug!("Released RTP peer {}", remote);
        }
    }
}

/// Drop feeds whose connection nobody holds any more
fn prune_released(peers: &mut HashMap<SocketAddr, ConnectionFeed>) -> usize {
    let before = peers.len();
    peers.retain(|_, feed| !feed.is_closed());
    before - peers.len()
}
