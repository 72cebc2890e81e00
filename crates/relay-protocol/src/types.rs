use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of one forwarding session (a published media stream and its subscribers)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Identifier of a publisher or subscriber inside a session
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// A publisher that joins over a raw RTP transport is named after its session
impl From<&SessionId> for PeerId {
    fn from(id: &SessionId) -> Self {
        Self(id.0.clone())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

/// Track metadata as announced by a publisher
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrackInfo {
    pub id: String,
    pub ssrc: u32,
    pub payload_type: u8,
    pub kind: TrackKind,
    pub codec: String,
    pub fmtp: String,
}

/// Where a session's media lives
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MediaInfo {
    /// Data center
    pub dc: String,
    /// Node hosting the router
    pub nid: String,
    /// Room
    pub rid: String,
    /// Media (session) id
    pub mid: SessionId,
}

/// Publisher description handed to the signaling layer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PubInfo {
    #[serde(flatten)]
    pub media: MediaInfo,
    pub uid: PeerId,
    pub tracks: Vec<TrackInfo>,
}

/// ICE server configuration for WebRTC
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IceServer {
    pub urls: Vec<String>,
    pub username: Option<String>,
    pub credential: Option<String>,
}
