//! Client configuration.

use serde::{Deserialize, Serialize};
use staffpulse_core::ClientMessage;
use std::time::Duration;

use crate::error::{ClientError, Result};

/// Configuration for the connection manager.
///
/// Reconnection uses exponential backoff: the delay before attempt `k` is
/// `base_delay_ms * 2^(k-1)`, and the manager gives up after `max_attempts`
/// consecutive failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// WebSocket endpoint URL.
    pub url: String,

    /// Delay before the first reconnection attempt in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Consecutive failed attempts before the manager stops for good.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Handshake timeout in milliseconds.
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,

    /// Messages re-issued after every successful connect.
    #[serde(default = "default_subscriptions")]
    pub default_subscriptions: Vec<ClientMessage>,
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_attempts() -> u32 {
    5
}

fn default_handshake_timeout_ms() -> u64 {
    20_000
}

fn default_subscriptions() -> Vec<ClientMessage> {
    vec![ClientMessage::SubscribeDashboard]
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            base_delay_ms: default_base_delay_ms(),
            max_attempts: default_max_attempts(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            default_subscriptions: default_subscriptions(),
        }
    }
}

impl ClientConfig {
    /// Creates a new builder for `ClientConfig`.
    #[must_use]
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Returns the handshake timeout as a Duration.
    #[must_use]
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// Check the endpoint URL and limits.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Config` for a non-WebSocket URL or a zero
    /// handshake timeout.
    pub fn validate(&self) -> Result<()> {
        let url = url::Url::parse(&self.url)
            .map_err(|e| ClientError::config(format!("invalid url {:?}: {e}", self.url)))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(ClientError::config(format!(
                "url scheme must be ws or wss, got {}",
                url.scheme()
            )));
        }
        if self.handshake_timeout_ms == 0 {
            return Err(ClientError::config("handshake_timeout_ms must be positive"));
        }
        Ok(())
    }
}

/// `base_ms * 2^(attempt-1)`, saturating at `u64::MAX` milliseconds.
pub(crate) fn backoff(base_ms: u64, attempt: u32) -> Duration {
    let factor = 2u64
        .checked_pow(attempt.saturating_sub(1))
        .unwrap_or(u64::MAX);
    Duration::from_millis(base_ms.saturating_mul(factor))
}

/// Builder for `ClientConfig`.
#[derive(Debug, Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    /// Sets the WebSocket URL.
    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.config.url = url.into();
        self
    }

    /// Sets the base reconnect delay in milliseconds.
    #[must_use]
    pub fn base_delay_ms(mut self, ms: u64) -> Self {
        self.config.base_delay_ms = ms;
        self
    }

    /// Sets the maximum number of reconnection attempts.
    #[must_use]
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.max_attempts = attempts;
        self
    }

    /// Sets the handshake timeout in milliseconds.
    #[must_use]
    pub fn handshake_timeout_ms(mut self, ms: u64) -> Self {
        self.config.handshake_timeout_ms = ms;
        self
    }

    /// Replaces the subscriptions re-issued on connect.
    #[must_use]
    pub fn default_subscriptions(mut self, subscriptions: Vec<ClientMessage>) -> Self {
        self.config.default_subscriptions = subscriptions;
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> ClientConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.base_delay_ms, 1_000);
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.handshake_timeout(), Duration::from_secs(20));
        assert_eq!(
            config.default_subscriptions,
            vec![ClientMessage::SubscribeDashboard]
        );
    }

    #[test]
    fn test_backoff_sequence() {
        let delays: Vec<u64> = (1..=5)
            .map(|k| backoff(1_000, k).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![1_000, 2_000, 4_000, 8_000, 16_000]);
    }

    #[test]
    fn test_backoff_saturates() {
        assert_eq!(backoff(1_000, 200), Duration::from_millis(u64::MAX));
    }

    #[test]
    fn test_validate() {
        assert!(ClientConfig::builder()
            .url("ws://127.0.0.1:4000/ws")
            .build()
            .validate()
            .is_ok());
        assert!(ClientConfig::builder()
            .url("http://127.0.0.1:4000/ws")
            .build()
            .validate()
            .is_err());
        assert!(ClientConfig::builder().url("nope").build().validate().is_err());
        assert!(ClientConfig::builder()
            .url("ws://127.0.0.1:4000/ws")
            .handshake_timeout_ms(0)
            .build()
            .validate()
            .is_err());
    }

    proptest! {
        #[test]
        fn backoff_doubles_each_attempt(base in 1u64..10_000, attempt in 1u32..20) {
            let expected = base * 2u64.pow(attempt - 1);
            prop_assert_eq!(backoff(base, attempt), Duration::from_millis(expected));
            prop_assert_eq!(backoff(base, attempt + 1), backoff(base, attempt) * 2);
        }
    }
}
