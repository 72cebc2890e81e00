//! In-band session handshake
//!
//! A publisher declares its session by putting the session id in an RTP
//! header extension. The first packet carrying the extension resolves the
//! connection's session; packets before it are discarded.

use bytes::Bytes;
use relay_protocol::SessionId;
use webrtc::rtp::packet::Packet;

use crate::error::IngestError;

/// Header extension id reserved for the session id
pub const SESSION_ID_EXTENSION: u8 = 1;

/// Session id declared by this packet, if any
///
/// An extension that is present but not valid UTF-8 resolves to an empty id,
/// which the binder rejects.
pub fn session_id(packet: &Packet) -> Option<SessionId> {
    let raw = packet.header.get_extension(SESSION_ID_EXTENSION)?;
    let id = std::str::from_utf8(&raw).unwrap_or_default();
    Some(SessionId::new(id.trim_end_matches('\0')))
}

/// Tag an outgoing packet with its session id
pub fn tag_session(packet: &mut Packet, id: &SessionId) -> Result<(), IngestError> {
    packet
        .header
        .set_extension(SESSION_ID_EXTENSION, Bytes::copy_from_slice(id.as_str().as_bytes()))
        .map_err(|e| IngestError::Malformed(e.to_string()))
}
