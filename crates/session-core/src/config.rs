//! Session configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use crate::errors::ConfigError;

/// Default connect timeout in milliseconds
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Default time allowed for the channel and the media session to confirm closure
pub const DEFAULT_TEARDOWN_TIMEOUT_MS: u64 = 5_000;

/// Close codes treated as an orderly closure: normal closure and going away
pub const DEFAULT_EXPECTED_CLOSE_CODES: [u16; 2] = [1000, 1001];

/// Default capacity of the observer broadcast channel
pub const DEFAULT_EVENT_BUFFER: usize = 256;

/// Configuration for a [`Session`](crate::Session)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Signaling server URL (`ws://` or `wss://`)
    pub url: String,

    /// Time allowed between `connect` and the connected state, in milliseconds
    pub connect_timeout_ms: u64,

    /// Time allowed for teardown to converge, in milliseconds; layers that have
    /// not confirmed closure by then are reported as failed
    pub teardown_timeout_ms: u64,

    /// Channel close codes that do not count as an error
    pub expected_close_codes: Vec<u16>,

    /// Capacity of the [`SessionEvent`](crate::SessionEvent) broadcast channel
    pub event_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8080/signaling".to_string(),
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            teardown_timeout_ms: DEFAULT_TEARDOWN_TIMEOUT_MS,
            expected_close_codes: DEFAULT_EXPECTED_CLOSE_CODES.to_vec(),
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

impl SessionConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Load a configuration from JSON; missing fields take their defaults
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = duration_ms(timeout);
        self
    }

    pub fn with_teardown_timeout(mut self, timeout: Duration) -> Self {
        self.teardown_timeout_ms = duration_ms(timeout);
        self
    }

    pub fn with_expected_close_codes(mut self, codes: Vec<u16>) -> Self {
        self.expected_close_codes = codes;
        self
    }

    pub fn with_event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity;
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn teardown_timeout(&self) -> Duration {
        Duration::from_millis(self.teardown_timeout_ms)
    }

    /// Parse and check the signaling URL
    pub fn signaling_url(&self) -> Result<Url, ConfigError> {
        let url = Url::parse(&self.url).map_err(|e| ConfigError::InvalidUrl {
            url: self.url.clone(),
            reason: e.to_string(),
        })?;
        match url.scheme() {
            "ws" | "wss" => Ok(url),
            other => Err(ConfigError::InvalidUrl {
                url: self.url.clone(),
                reason: format!("scheme must be ws or wss, got {}", other),
            }),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.signaling_url()?;
        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::invalid("connect timeout must be greater than zero"));
        }
        if self.teardown_timeout_ms == 0 {
            return Err(ConfigError::invalid("teardown timeout must be greater than zero"));
        }
        if self.event_buffer == 0 {
            return Err(ConfigError::invalid("event buffer must be greater than zero"));
        }
        Ok(())
    }
}

/// Whole milliseconds, saturating; sub-millisecond durations round up to 1
fn duration_ms(duration: Duration) -> u64 {
    if duration.is_zero() {
        return 0;
    }
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX).max(1)
}
