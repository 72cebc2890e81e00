//! Shared types for the RTP relay
//!
//! Session and peer identifiers, media/track records exchanged with the
//! signaling layer, and the events the relay reports back to it.

pub mod messages;
pub mod types;

pub use messages::RelayEvent;
pub use types::*;
