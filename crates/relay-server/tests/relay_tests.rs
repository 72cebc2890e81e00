//! Integration tests for the relay server
//!
//! Each test starts a server on an ephemeral port and publishes real RTP
//! over UDP or the secured tunnel.
//!
//! Run with: cargo test -p relay-server --test relay_tests

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use relay_protocol::{PeerId, SessionId};
use relay_server::sweep::CleanupReceiver;
use relay_server::transport::handshake;
use relay_server::transport::tunnel::TunnelCipher;
use relay_server::{Config, RelayServer, Router, RouterRegistry};
use tokio::io::AsyncReadExt;
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use webrtc::rtp::header::Header;
use webrtc::rtp::packet::Packet;
use webrtc::util::{Marshal, Unmarshal};

/// Test server wrapper
struct TestServer {
    addr: SocketAddr,
    registry: Arc<RouterRegistry>,
    cleanup: CleanupReceiver,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl TestServer {
    async fn start(config: Config) -> Self {
        let mut server = RelayServer::new(config).expect("Failed to build test server");
        let registry = Arc::clone(server.registry());
        let cleanup = server.take_cleanup_receiver().unwrap();
        let listener = server.bind().await.expect("Failed to bind RTP listener");
        let addr = SocketAddr::from(([127, 0, 0, 1], listener.local_addr().port()));

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(async move {
            server
                .serve(listener, async {
                    shutdown_rx.await.ok();
                })
                .await;
        });

        Self {
            addr,
            registry,
            cleanup,
            shutdown_tx: Some(shutdown_tx),
            task,
        }
    }

    async fn wait_for_router(&self, id: &str) -> Arc<dyn Router> {
        let id = SessionId::from(id);
        timeout(Duration::from_secs(5), async {
            loop {
                if let Some(router) = self.registry.get_router(&id).await {
                    return router;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("Router was never created")
    }

    async fn stop(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        timeout(Duration::from_secs(5), self.task)
            .await
            .expect("Server did not stop")
            .expect("Server task panicked");
    }
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.rtp_port = 0;
    config.ice.stun_servers = vec![];
    config.ice.port_range_start = 0;
    config.ice.port_range_end = 0;
    config.plugins.on = false;
    config
}

fn untagged(seq: u16) -> Packet {
    Packet {
        header: Header {
            version: 2,
            payload_type: 96,
            sequence_number: seq,
            timestamp: seq as u32 * 3000,
            ssrc: 0x1234_5678,
            ..Default::default()
        },
        payload: Bytes::from(vec![seq as u8; 32]),
    }
}

fn rtp(seq: u16, session: &str) -> Packet {
    let mut packet = untagged(seq);
    handshake::tag_session(&mut packet, &SessionId::from(session)).unwrap();
    packet
}

async fn publish(socket: &UdpSocket, target: SocketAddr, seq: u16, session: &str) {
    let raw = rtp(seq, session).marshal().unwrap();
    socket.send_to(&raw, target).await.unwrap();
}

#[tokio::test]
async fn test_udp_publisher_reaches_subscriber() {
    let server = TestServer::start(test_config()).await;
    let publisher = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    publish(&publisher, server.addr, 1, "room-1").await;
    let router = server.wait_for_router("room-1").await;
    let mut viewer = router.add_sub(PeerId::from("viewer")).await.unwrap();

    for seq in 2..=4 {
        publish(&publisher, server.addr, seq, "room-1").await;
    }

    for seq in 2..=4 {
        let packet = timeout(Duration::from_secs(2), viewer.recv())
            .await
            .expect("No packet forwarded")
            .unwrap();
        assert_eq!(packet.header.sequence_number, seq);
        assert_eq!(packet.payload.len(), 32);
    }

    assert_eq!(router.publisher().await, Some(PeerId::from("room-1")));
    server.stop().await;
}

#[tokio::test]
async fn test_sessions_are_isolated() {
    let server = TestServer::start(test_config()).await;
    let alice = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let bob = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    publish(&alice, server.addr, 1, "room-a").await;
    publish(&bob, server.addr, 1, "room-b").await;

    let room_a = server.wait_for_router("room-a").await;
    let room_b = server.wait_for_router("room-b").await;
    let mut viewer_a = room_a.add_sub(PeerId::from("viewer")).await.unwrap();
    let mut viewer_b = room_b.add_sub(PeerId::from("viewer")).await.unwrap();

    publish(&alice, server.addr, 10, "room-a").await;
    publish(&bob, server.addr, 20, "room-b").await;

    let a = timeout(Duration::from_secs(2), viewer_a.recv()).await.unwrap().unwrap();
    let b = timeout(Duration::from_secs(2), viewer_b.recv()).await.unwrap().unwrap();
    assert_eq!(a.header.sequence_number, 10);
    assert_eq!(b.header.sequence_number, 20);
    assert_eq!(server.registry.len().await, 2);

    server.stop().await;
}

#[tokio::test]
async fn test_untagged_traffic_creates_nothing() {
    let server = TestServer::start(test_config()).await;
    let stranger = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    stranger
        .send_to(&untagged(1).marshal().unwrap(), server.addr)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(server.registry.is_empty().await);

    server.stop().await;
}

#[tokio::test]
async fn test_secured_tunnel_publisher() {
    let mut config = test_config();
    config.tunnel_key = "shared-secret".to_string();
    config.tunnel_salt = "pepper".to_string();
    let server = TestServer::start(config).await;

    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    let cipher = TunnelCipher::new("shared-secret", "pepper").unwrap();

    cipher.write_packet(&mut stream, &rtp(1, "room-1")).await.unwrap();
    let router = server.wait_for_router("room-1").await;
    let mut viewer = router.add_sub(PeerId::from("viewer")).await.unwrap();

    cipher.write_packet(&mut stream, &rtp(2, "room-1")).await.unwrap();
    let packet = timeout(Duration::from_secs(2), viewer.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(packet.header.sequence_number, 2);

    server.stop().await;
}

#[tokio::test]
async fn test_unidentified_tunnel_is_closed_after_handshake_timeout() {
    let mut config = test_config();
    config.tunnel_key = "shared-secret".to_string();
    config.tunnel_salt = "pepper".to_string();
    config.handshake_timeout_ms = 100;
    let server = TestServer::start(config).await;

    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    let mut buf = [0u8; 16];
    let read = timeout(Duration::from_secs(1), stream.read(&mut buf))
        .await
        .expect("Server kept an unidentified tunnel open");
    assert!(matches!(read, Ok(0) | Err(_)));
    assert!(server.registry.is_empty().await);

    server.stop().await;
}

#[tokio::test]
async fn test_publisher_resumes_after_eviction() {
    let mut config = test_config();
    config.sweep_interval_ms = 50;
    config.router.liveness_timeout_ms = 300;
    let mut server = TestServer::start(config).await;
    let publisher = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    publish(&publisher, server.addr, 1, "room-1").await;
    server.wait_for_router("room-1").await;
    let evicted = timeout(Duration::from_secs(5), server.cleanup.recv())
        .await
        .expect("Session was never evicted")
        .unwrap();
    assert_eq!(evicted, SessionId::from("room-1"));

    // let the evicted router's forwarding task wind down
    tokio::time::sleep(Duration::from_millis(100)).await;

    // a single datagram is enough to open a new connection and router
    publish(&publisher, server.addr, 2, "room-1").await;
    let router = server.wait_for_router("room-1").await;
    assert_eq!(router.publisher().await, Some(PeerId::from("room-1")));

    server.stop().await;
}

#[tokio::test]
async fn test_silent_session_is_evicted() {
    let mut config = test_config();
    config.sweep_interval_ms = 50;
    config.router.liveness_timeout_ms = 300;
    let mut server = TestServer::start(config).await;
    let publisher = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    publish(&publisher, server.addr, 1, "room-1").await;
    server.wait_for_router("room-1").await;

    let evicted = timeout(Duration::from_secs(5), server.cleanup.recv())
        .await
        .expect("Session was never evicted")
        .unwrap();
    assert_eq!(evicted, SessionId::from("room-1"));
    assert!(server.registry.get_router(&evicted).await.is_none());

    server.stop().await;
}

#[tokio::test]
async fn test_forwarder_plugin_relays_published_packets() {
    let sink = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    let mut config = test_config();
    config.plugins.on = true;
    config.plugins.rtp_forwarder.on = true;
    config.plugins.rtp_forwarder.addr = sink.local_addr().unwrap().to_string();
    let server = TestServer::start(config).await;
    let publisher = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    publish(&publisher, server.addr, 7, "room-1").await;

    let mut buf = vec![0u8; 1500];
    let (n, _) = timeout(Duration::from_secs(2), sink.recv_from(&mut buf))
        .await
        .expect("Forwarder relayed nothing")
        .unwrap();
    let relayed = Packet::unmarshal(&mut &buf[..n]).unwrap();
    assert_eq!(relayed.header.sequence_number, 7);

    server.stop().await;
}

#[tokio::test]
async fn test_shutdown_closes_every_router() {
    let server = TestServer::start(test_config()).await;
    let publisher = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    publish(&publisher, server.addr, 1, "room-1").await;
    let router = server.wait_for_router("room-1").await;
    let registry = Arc::clone(&server.registry);

    server.stop().await;

    assert!(registry.is_closed());
    assert!(registry.is_empty().await);
    assert!(!router.alive().await);
    assert!(registry.get_or_new_router(&SessionId::from("late")).await.is_none());
}

#[tokio::test]
async fn test_control_api_lifecycle() {
    let server = TestServer::start(test_config()).await;
    let id = SessionId::from("signaled");

    let router = server.registry.get_or_new_router(&id).await.unwrap();
    let _sub = tokio_test::assert_ok!(router.add_sub(PeerId::from("alice")).await);
    assert_eq!(router.subs().await.len(), 1);

    server.registry.del_router(&id).await;
    server.registry.del_router(&id).await;
    assert!(server.registry.get_router(&id).await.is_none());
    assert!(!router.alive().await);

    server.stop().await;
}
