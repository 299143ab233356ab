#![expect(
    clippy::module_name_repetitions,
    reason = "Configuration types intentionally mirror the module name for clarity"
)]

use std::collections::HashMap;
use std::time::Duration;

use bon::Builder;
use serde::Deserialize;
use serde_with::{DurationMilliSeconds, serde_as};
use url::Url;

use crate::Result;
use crate::error::Error;

const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 3;
const DEFAULT_RECONNECT_STEP_DURATION: Duration = Duration::from_secs(1);

/// Configuration for a managed WebSocket connection.
///
/// Immutable once handed to [`ConnectionManager::new`](super::ConnectionManager::new).
///
/// ```
/// use resilient_ws::ws::config::Config;
///
/// let config = Config::builder()
///     .server_uri("ws://localhost:9001/feed".parse()?)
///     .auto_reconnect(true)
///     .build();
/// assert!(config.connect_timeout.is_none());
/// # Ok::<_, url::ParseError>(())
/// ```
#[serde_as]
#[non_exhaustive]
#[derive(Debug, Clone, Builder, Deserialize)]
pub struct Config {
    /// WebSocket endpoint, `ws://` or `wss://`
    pub server_uri: Url,
    /// Sub-protocol requested through `Sec-WebSocket-Protocol`; `None` uses the transport default
    #[builder(into)]
    pub protocol_draft: Option<String>,
    /// Extra headers added to the upgrade request
    #[builder(default)]
    #[serde(default)]
    pub http_headers: HashMap<String, String>,
    /// Upper bound on the handshake wait; `None`, or a duration too large to schedule, waits indefinitely
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    #[serde(rename = "connect_timeout_ms")]
    pub connect_timeout: Option<Duration>,
    /// Reconnect automatically when an established connection fails
    #[builder(default)]
    #[serde(default)]
    pub auto_reconnect: bool,
    /// Reconnection pacing, only consulted when `auto_reconnect` is set
    #[builder(default)]
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

impl Config {
    /// Configuration with every option at its default.
    pub fn from_uri(uri: &str) -> Result<Self> {
        Ok(Self::builder().server_uri(Url::parse(uri)?).build())
    }

    /// Parse a JSON document such as `{"server_uri": "wss://...", "auto_reconnect": true}`.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !matches!(self.server_uri.scheme(), "ws" | "wss") {
            return Err(Error::validation(format!(
                "server uri must use ws or wss, got {}",
                self.server_uri.scheme()
            )));
        }
        if self.connect_timeout.is_some_and(|timeout| timeout.is_zero()) {
            return Err(Error::validation("connect timeout must be greater than zero"));
        }
        if self.reconnect.step.is_zero() {
            return Err(Error::validation("reconnect step must be greater than zero"));
        }
        Ok(())
    }
}

/// Configuration for automatic reconnection behavior.
#[serde_as]
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Builder, Deserialize)]
pub struct ReconnectConfig {
    /// Maximum number of reconnection attempts before giving up
    #[builder(default = DEFAULT_MAX_RECONNECT_ATTEMPTS)]
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay unit; attempt `i` waits `i * step`
    #[builder(default = DEFAULT_RECONNECT_STEP_DURATION)]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(default = "default_step", rename = "step_ms")]
    pub step: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            step: DEFAULT_RECONNECT_STEP_DURATION,
        }
    }
}

const fn default_max_attempts() -> u32 {
    DEFAULT_MAX_RECONNECT_ATTEMPTS
}

const fn default_step() -> Duration {
    DEFAULT_RECONNECT_STEP_DURATION
}
