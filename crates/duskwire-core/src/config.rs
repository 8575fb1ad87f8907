//! Protocol tunables.

use std::time::Duration;

/// Timing and size parameters for peer sessions.
#[derive(Debug, Clone)]
pub struct ProtocolConfig {
    /// Maximum time for a handshake to complete before the connection is
    /// closed.
    pub handshake_timeout: Duration,
    /// Idle time (no bytes in either direction) before a keepalive ack is
    /// sent.
    pub idle_keepalive: Duration,
    /// Base delay for outbound connect retries (doubled per attempt).
    pub retry_base_delay: Duration,
    /// Maximum outbound connect attempts before giving up.
    pub max_connect_attempts: u32,
    /// Interval after which accumulated transfer progress is flushed to the
    /// store.
    pub progress_flush_interval: Duration,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(30),
            idle_keepalive: Duration::from_secs(300),
            retry_base_delay: Duration::from_secs(2),
            max_connect_attempts: 5,
            progress_flush_interval: Duration::from_millis(700),
        }
    }
}
