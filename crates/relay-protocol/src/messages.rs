use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{PeerId, SessionId};

/// Events the relay reports to the signaling layer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayEvent {
    /// A router was reclaimed by the health sweep
    RouterEvicted {
        mid: SessionId,
        at: DateTime<Utc>,
    },

    /// A transport connection was bound as a session's publisher
    PublisherBound {
        mid: SessionId,
        uid: PeerId,
        connection_id: Uuid,
        remote: String,
    },
}

impl RelayEvent {
    pub fn evicted(mid: SessionId) -> Self {
        RelayEvent::RouterEvicted {
            mid,
            at: Utc::now(),
        }
    }

    /// The session this event is about
    pub fn mid(&self) -> &SessionId {
        match self {
            RelayEvent::RouterEvicted { mid, .. } | RelayEvent::PublisherBound { mid, .. } => mid,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
