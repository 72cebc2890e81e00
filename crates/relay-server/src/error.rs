use thiserror::Error;

/// Startup errors. Any of these stops the relay before ingestion begins.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Configuration error: {0}")]
    Config(#[from] ::config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid plugin configuration: {0}")]
    InvalidPluginConfig(#[from] PluginError),

    #[error("Transport bootstrap failed: {0}")]
    TransportBootstrap(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Per-connection failures on the ingestion path. Logged, never propagated.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IngestError {
    #[error("Connection declared an empty session id")]
    MissingSessionId,

    #[error("No session id received within {0:?}")]
    HandshakeTimeout(std::time::Duration),

    #[error("Connection closed before the handshake completed")]
    ConnectionClosed,

    #[error("Session id was already taken from this connection")]
    AlreadyResolved,

    #[error("No router available for session {0}")]
    RouterUnavailable(String),

    #[error("Malformed packet: {0}")]
    Malformed(String),
}

#[derive(Error, Debug)]
pub enum RouterError {
    #[error("Plugin initialization failed: {0}")]
    PluginInit(#[from] PluginError),

    #[error("Router is closed")]
    Closed,

    #[error("Subscriber limit of {0} reached")]
    SubscriberLimit(usize),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PluginError {
    #[error("Plugins are enabled but none is switched on")]
    NoPluginEnabled,

    #[error("Jitter buffer: {0}")]
    JitterBuffer(String),

    #[error("RTP forwarder: {0}")]
    Forwarder(String),
}

pub type Result<T> = std::result::Result<T, RelayError>;
