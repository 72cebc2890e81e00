//! Relay Server Library
//!
//! Session and router control core of an RTP selective forwarding relay.
//! Exposes the server components for testing and embedding.

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod ingest;
pub mod plugins;
pub mod registry;
pub mod router;
pub mod server;
pub mod sweep;
pub mod transport;

pub use config::Config;
pub use error::{IngestError, PluginError, RelayError, RouterError};
pub use registry::RouterRegistry;
pub use router::{Router, RouterConfig, RouterFactory, RtpRouter, RtpRouterFactory};
pub use server::RelayServer;
