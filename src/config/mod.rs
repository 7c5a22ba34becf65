pub mod env;
pub use env::apply_env_overrides;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::time::Duration;

/// Complete Gatewatch configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GatewatchConfig {
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub stream: StreamConfig,
}

/// Bridge HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Browser origins allowed to call the bridge cross-origin (none by default)
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

fn default_listen_addr() -> String {
    "0.0.0.0:3000".to_string()
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            allowed_origins: Vec::new(),
        }
    }
}

/// Messaging session configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// WebSocket endpoint of the device-link gateway
    #[serde(default = "default_gateway_url")]
    pub gateway_url: String,
    /// Canonical suffix appended to normalized recipients
    #[serde(default = "default_address_suffix")]
    pub address_suffix: String,
    /// Re-open the session after an unexpected transport closure
    #[serde(default)]
    pub auto_reinitialize: bool,
    #[serde(default = "default_reinitialize_delay_ms")]
    pub reinitialize_delay_ms: u64,
    /// Bounded wait for the steps before delivery (registration check, media read).
    /// The delivery itself is bounded by `request_timeout_ms` only.
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
    /// Bounded wait for one gateway request/response round trip
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Use the in-process loopback channel instead of the gateway
    #[serde(default)]
    pub dry_run: bool,
}

fn default_gateway_url() -> String {
    "ws://127.0.0.1:3100/link".to_string()
}

fn default_address_suffix() -> String {
    "@c.us".to_string()
}

fn default_reinitialize_delay_ms() -> u64 {
    5_000
}

fn default_send_timeout_ms() -> u64 {
    15_000
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

impl SessionConfig {
    pub fn reinitialize_delay(&self) -> Duration {
        Duration::from_millis(self.reinitialize_delay_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            gateway_url: default_gateway_url(),
            address_suffix: default_address_suffix(),
            auto_reinitialize: false,
            reinitialize_delay_ms: default_reinitialize_delay_ms(),
            send_timeout_ms: default_send_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            dry_run: false,
        }
    }
}

/// Inbound relay configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    #[serde(default = "default_forward_timeout_ms")]
    pub forward_timeout_ms: u64,
}

fn default_forward_timeout_ms() -> u64 {
    5_000
}

impl RelayConfig {
    pub fn forward_timeout(&self) -> Duration {
        Duration::from_millis(self.forward_timeout_ms)
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            forward_timeout_ms: default_forward_timeout_ms(),
        }
    }
}

/// Decision backend endpoints
#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_backend_url")]
    pub base_url: String,
    #[serde(default = "default_stats_path")]
    pub stats_path: String,
    #[serde(default = "default_decision_path")]
    pub decision_path: String,
}

fn default_backend_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_stats_path() -> String {
    "/api/dashboard/stats".to_string()
}

fn default_decision_path() -> String {
    "/api/whatsapp/webhook".to_string()
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_backend_url(),
            stats_path: default_stats_path(),
            decision_path: default_decision_path(),
        }
    }
}

/// Dashboard event stream configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    #[serde(default = "default_stream_url")]
    pub url: String,
    /// Fixed delay before the single reconnect attempt after a close/error
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// AlertBuffer capacity
    #[serde(default = "default_alert_capacity")]
    pub alert_capacity: usize,
    /// Time an alert stays in the "currently alerting" view (0 disables expiry)
    #[serde(default = "default_alert_expiry_ms")]
    pub alert_expiry_ms: u64,
    /// Fetch a stats snapshot from the backend before connecting
    #[serde(default = "default_bootstrap_stats")]
    pub bootstrap_stats: bool,
}

fn default_stream_url() -> String {
    "ws://localhost:8000/ws/alerts".to_string()
}

fn default_reconnect_delay_ms() -> u64 {
    3_000
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_alert_capacity() -> usize {
    5
}

fn default_alert_expiry_ms() -> u64 {
    5_000
}

fn default_bootstrap_stats() -> bool {
    true
}

impl StreamConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn alert_expiry(&self) -> Option<Duration> {
        match self.alert_expiry_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            url: default_stream_url(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            alert_capacity: default_alert_capacity(),
            alert_expiry_ms: default_alert_expiry_ms(),
            bootstrap_stats: default_bootstrap_stats(),
        }
    }
}

impl GatewatchConfig {
    /// Rejects values that would break an invariant at runtime.
    pub fn validate(&self) -> Result<()> {
        if self.stream.alert_capacity == 0 {
            bail!("stream.alert_capacity must be at least 1");
        }
        if self.stream.reconnect_delay_ms == 0 {
            bail!("stream.reconnect_delay_ms must be positive");
        }
        let suffix = &self.session.address_suffix;
        if suffix.is_empty()
            || suffix.starts_with('+')
            || suffix
                .chars()
                .any(|c| c.is_whitespace() || matches!(c, '(' | ')' | '-'))
        {
            bail!(
                "session.address_suffix '{}' must be non-empty and free of whitespace, parentheses, dashes and a leading '+'",
                suffix
            );
        }
        Ok(())
    }
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> Result<GatewatchConfig> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read config '{}'", path))?;
    let config: GatewatchConfig =
        toml::from_str(&contents).with_context(|| format!("Failed to parse config '{}'", path))?;
    Ok(config)
}

/// Resolve configuration: optional file (first CLI arg or `GATEWATCH_CONFIG`),
/// then env overrides, then validation.
pub fn resolve_config() -> Result<GatewatchConfig> {
    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("GATEWATCH_CONFIG").ok());

    let mut config = match path {
        Some(path) => load_config(&path)?,
        None => GatewatchConfig::default(),
    };
    apply_env_overrides(&mut config);
    config.validate()?;
    Ok(config)
}
