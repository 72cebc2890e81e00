//! Secured RTP tunnel
//!
//! A TCP stream of sealed frames:
//!
//! ```text
//! [len: u16 BE] [nonce(12)] [ChaCha20-Poly1305 ciphertext + tag(16)]
//! ```
//!
//! The cipher key is HKDF-SHA256 over the pre-shared key and salt, so both
//! ends only need the same two strings.

use std::sync::Arc;

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use hkdf::Hkdf;
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::Sha256;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use webrtc::rtp::packet::Packet;
use webrtc::util::{Marshal, Unmarshal};

use super::{ACCEPT_BACKLOG, ConnectionFeed, Incoming};
use crate::error::RelayError;

const KEY_INFO: &[u8] = b"rtp-tunnel";
const NONCE_LEN: usize = 12;

#[derive(Error, Debug)]
pub enum TunnelError {
    #[error("key derivation failed")]
    KeyDerivation,

    #[error("frame too short")]
    Truncated,

    #[error("frame of {0} bytes exceeds the tunnel limit")]
    TooLarge(usize),

    #[error("frame failed to authenticate")]
    Authentication,

    #[error("seal failed")]
    Seal,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub struct TunnelCipher {
    cipher: ChaCha20Poly1305,
}

impl TunnelCipher {
    pub fn new(key: &str, salt: &str) -> Result<Self, TunnelError> {
        let hk = Hkdf::<Sha256>::new(Some(salt.as_bytes()), key.as_bytes());
        let mut okm = [0u8; 32];
        hk.expand(KEY_INFO, &mut okm)
            .map_err(|_| TunnelError::KeyDerivation)?;

        Ok(Self {
            cipher: ChaCha20Poly1305::new(Key::from_slice(&okm)),
        })
    }

    /// `nonce || ciphertext`
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, TunnelError> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| TunnelError::Seal)?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, TunnelError> {
        if sealed.len() <= NONCE_LEN {
            return Err(TunnelError::Truncated);
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| TunnelError::Authentication)
    }

    pub async fn write_frame<W>(&self, writer: &mut W, plaintext: &[u8]) -> Result<(), TunnelError>
    where
        W: AsyncWrite + Unpin,
    {
        let sealed = self.seal(plaintext)?;
        let len = u16::try_from(sealed.len()).map_err(|_| TunnelError::TooLarge(sealed.len()))?;
        writer.write_u16(len).await?;
        writer.write_all(&sealed).await?;
        Ok(())
    }

    /// Read one frame. `Ok(None)` on a clean end of stream.
    ///
    /// A frame that fails to authenticate is consumed and reported as
    /// `Authentication`; the stream stays usable.
    pub async fn read_frame<R>(&self, reader: &mut R) -> Result<Option<Vec<u8>>, TunnelError>
    where
        R: AsyncRead + Unpin,
    {
        let len = match reader.read_u16().await {
            Ok(len) => len as usize,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut sealed = vec![0u8; len];
        reader.read_exact(&mut sealed).await?;
        self.open(&sealed).map(Some)
    }

    pub async fn write_packet<W>(&self, writer: &mut W, packet: &Packet) -> Result<(), TunnelError>
    where
        W: AsyncWrite + Unpin,
    {
        let raw = packet.marshal().map_err(|_| TunnelError::Seal)?;
        self.write_frame(writer, &raw).await
    }
}

pub(super) async fn serve(port: u16, key: &str, salt: &str) -> Result<Incoming, RelayError> {
    let cipher = TunnelCipher::new(key, salt)
        .map_err(|e| RelayError::TransportBootstrap(e.to_string()))?;
    let cipher = Arc::new(cipher);

    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    let local_addr = listener.local_addr()?;
    tracing::info!("Secured RTP tunnel listening on tcp {}", local_addr);

    let (conn_tx, conn_rx) = mpsc::channel(ACCEPT_BACKLOG);
    let task = tokio::spawn(async move {
        loop {
            let (stream, remote) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::error!("Failed to accept tunnel connection: {}", e);
                    continue;
                }
            };

            if let Err(e) = stream.set_nodelay(true) {
                tracing::debug!("Failed to set TCP_NODELAY for {}: {}", remote, e);
            }

            let (feed, connection) = ConnectionFeed::pair(remote);
            if conn_tx.send(connection).await.is_err() {
                tracing::debug!("Tunnel listener dropped, stopping accept loop");
                return;
            }
            tokio::spawn(read_stream(stream, feed, Arc::clone(&cipher)));
        }
    });

    Ok(Incoming::new(local_addr, conn_rx, task))
}

async fn read_stream(mut stream: TcpStream, mut feed: ConnectionFeed, cipher: Arc<TunnelCipher>) {
    let remote = feed.remote_addr();
    let mut rejected = 0u64;

    loop {
        let frame = tokio::select! {
            frame = cipher.read_frame(&mut stream) => frame,
            _ = feed.closed() => {
                tracing::debug!("Tunnel {} released by its owner, closing", remote);
                break;
            }
        };

        let plaintext = match frame {
            Ok(Some(plaintext)) => plaintext,
            Ok(None) => {
                tracing::debug!("Tunnel {} closed by peer", remote);
                break;
            }
            Err(TunnelError::Authentication) | Err(TunnelError::Truncated) => {
                rejected += 1;
                if rejected % 100 == 1 {
                    tracing::warn!("Tunnel {} sent a frame that failed to authenticate", remote);
                }
                continue;
            }
            Err(e) => {
                tracing::debug!("Tunnel {} read error: {}", remote, e);
                break;
            }
        };

        let packet = match Packet::unmarshal(&mut plaintext.as_slice()) {
            Ok(packet) => packet,
            Err(e) => {
                tracing::debug!("Tunnel {} sent a malformed RTP packet: {}", remote, e);
                continue;
            }
        };

        if !feed.push(packet) {
            tracing::debug!("Connection owner for tunnel {} went away", remote);
            break;
        }
    }
}
