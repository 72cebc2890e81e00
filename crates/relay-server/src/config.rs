use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{RelayError, Result};
use crate::plugins::PluginConfig;
use crate::router::RouterConfig;
use crate::transport::TransportMode;

/// Config file looked up in the working directory, any supported extension
const DEFAULT_CONFIG_FILE: &str = "relay";
const ENV_PREFIX: &str = "RELAY";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Port of the RTP listener
    pub rtp_port: u16,
    /// Pre-shared key of the secured tunnel. Plain UDP when empty.
    pub tunnel_key: String,
    pub tunnel_salt: String,
    pub ice: IceConfig,
    pub sweep_interval_ms: u64,
    pub handshake_timeout_ms: u64,
    pub plugins: PluginConfig,
    pub router: RouterConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IceConfig {
    pub stun_servers: Vec<String>,
    pub turn_servers: Vec<TurnServer>,
    /// Ephemeral UDP range for ICE candidates; 0..0 lets the OS choose
    pub port_range_start: u16,
    pub port_range_end: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TurnServer {
    pub url: String,
    pub username: String,
    pub credential: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rtp_port: 6668,
            tunnel_key: String::new(),
            tunnel_salt: String::new(),
            ice: IceConfig::default(),
            sweep_interval_ms: 3000,
            handshake_timeout_ms: 10_000,
            plugins: PluginConfig::default(),
            router: RouterConfig::default(),
        }
    }
}

impl Default for IceConfig {
    fn default() -> Self {
        Self {
            stun_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            turn_servers: vec![],
            port_range_start: 5000,
            port_range_end: 5200,
        }
    }
}

impl Config {
    /// Load from `relay.toml` (optional) and `RELAY__*` environment variables
    pub fn load() -> Result<Self> {
        Self::build(::config::File::with_name(DEFAULT_CONFIG_FILE).required(false))
    }

    /// Load from the given file (optional) and the environment
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        Self::build(::config::File::from(path.as_ref()).required(false))
    }

    fn build<S>(file: S) -> Result<Self>
    where
        S: ::config::Source + Send + Sync + 'static,
    {
        let config: Config = ::config::Config::builder()
            .add_source(file)
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("ice.stun_servers"),
            )
            .build()?
            .try_deserialize()?;

        if config.tunnel_key.is_empty() && config.tunnel_salt.is_empty() {
            tracing::debug!("No tunnel key configured, RTP listener will be plain UDP");
        }
        Ok(config)
    }

    /// Listener mode implied by the tunnel settings
    pub fn transport_mode(&self) -> Result<TransportMode> {
        match (self.tunnel_key.is_empty(), self.tunnel_salt.is_empty()) {
            (true, true) => Ok(TransportMode::Plain),
            (false, false) => Ok(TransportMode::Secured {
                key: self.tunnel_key.clone(),
                salt: self.tunnel_salt.clone(),
            }),
            _ => Err(RelayError::InvalidConfig(
                "tunnel_key and tunnel_salt must be set together".to_string(),
            )),
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}
