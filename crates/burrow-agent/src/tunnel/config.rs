//! Tunnel agent configuration.

use std::time::Duration;

/// Configuration for the agent's connection to the relay and the local
/// service it proxies to.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Relay address as seen from this machine.
    pub server_host: String,

    /// Relay tunnel port.
    pub server_port: u16,

    /// Base URL of the local HTTP service (e.g. "http://localhost:5001").
    pub local_api_url: String,

    /// Shared HMAC-SHA256 secret; must match the relay.
    pub secret: String,

    /// Total deadline for one call to the local service.
    pub local_timeout: Duration,

    /// Reconnection policy.
    pub reconnect: ReconnectPolicy,
}

impl AgentConfig {
    /// Create an agent config with required fields and defaults.
    pub fn new(
        server_host: String,
        server_port: u16,
        local_api_url: String,
        secret: String,
    ) -> Self {
        Self {
            server_host,
            server_port,
            local_api_url,
            secret,
            local_timeout: Duration::from_secs(60),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// Exponential backoff reconnection policy.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnect attempt.
    pub initial_delay: Duration,
    /// Ceiling on the delay between attempts.
    pub max_delay: Duration,
    /// Multiplier applied after each failed attempt.
    pub multiplier: f64,
    /// Maximum number of attempts (None = retry forever).
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    /// Delay for a given attempt number (0-indexed), capped at
    /// `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.initial_delay.as_millis() as f64;
        let delay_ms = base_ms * self.multiplier.powi(attempt as i32);
        Duration::from_millis(delay_ms.min(self.max_delay.as_millis() as f64) as u64)
    }

    /// Whether another attempt should be made.
    pub fn should_retry(&self, attempt: u32) -> bool {
        self.max_attempts.is_none_or(|max| attempt < max)
    }
}
