//! Client configuration parsed from environment variables.

use std::time::Duration;

use crate::reconnect::ReconnectPolicy;

pub const DEFAULT_BROKER_URL: &str = "ws://127.0.0.1:8000";
pub const DEFAULT_RECONNECT_MS: u64 = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Broker WebSocket URL.
    pub url: String,
    pub reconnect: ReconnectPolicy,
    /// Per-call deadline. `None` waits forever.
    pub call_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_BROKER_URL.to_owned(),
            reconnect: ReconnectPolicy::default(),
            call_timeout: None,
        }
    }
}

impl ClientConfig {
    /// Build config from the process environment.
    ///
    /// Optional:
    /// - `BROKER_URL`: default `ws://127.0.0.1:8000`
    /// - `BROKER_RECONNECT_MS`: delay between attempts, default 1000
    /// - `BROKER_RECONNECT_MAX_MS`: when larger than the delay, attempts back
    ///   off exponentially up to this cap
    /// - `BROKER_CALL_TIMEOUT_MS`: per-call deadline, unset or 0 disables it
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let url = lookup("BROKER_URL")
            .map(|u| u.trim().to_owned())
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| DEFAULT_BROKER_URL.to_owned());

        let base_ms = parse_u64(lookup("BROKER_RECONNECT_MS")).unwrap_or(DEFAULT_RECONNECT_MS);
        let reconnect = match parse_u64(lookup("BROKER_RECONNECT_MAX_MS")) {
            Some(max_ms) if max_ms > base_ms => ReconnectPolicy::Backoff {
                initial: Duration::from_millis(base_ms),
                max: Duration::from_millis(max_ms),
            },
            _ => ReconnectPolicy::Fixed(Duration::from_millis(base_ms)),
        };

        let call_timeout = parse_u64(lookup("BROKER_CALL_TIMEOUT_MS"))
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis);

        Self { url, reconnect, call_timeout }
    }

    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    #[must_use]
    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    #[must_use]
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }
}

fn parse_u64(raw: Option<String>) -> Option<u64> {
    raw.and_then(|v| v.trim().parse::<u64>().ok())
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
