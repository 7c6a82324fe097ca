//! Timeout configuration for client operations.

use std::time::Duration;

/// Timeout configuration for HTTP requests and the event-stream connection.
///
/// # Examples
///
/// ```rust
/// use tablesync::SyncTimeouts;
/// use std::time::Duration;
///
/// // Use defaults (recommended for most cases)
/// let timeouts = SyncTimeouts::default();
///
/// // Custom timeouts for high-latency environments
/// let timeouts = SyncTimeouts::builder()
///     .connection_timeout(Duration::from_secs(60))
///     .request_timeout(Duration::from_secs(120))
///     .build();
///
/// // Aggressive timeouts for local development
/// let timeouts = SyncTimeouts::fast();
/// ```
#[derive(Debug, Clone)]
pub struct SyncTimeouts {
    /// Timeout for establishing connections (TCP + TLS + WS handshake).
    /// Default: 10 seconds
    pub connection_timeout: Duration,

    /// Timeout for a full HTTP request (introspection, bulk read, mutation).
    /// Default: 30 seconds
    pub request_timeout: Duration,

    /// Keep-alive ping interval for the event-stream connection.
    /// Set to 0 to disable keep-alive pings.
    /// Default: 20 seconds
    pub keepalive_interval: Duration,

    /// Maximum time to wait for any frame after sending a keepalive ping.
    /// If nothing arrives within this window the connection is considered
    /// dead and the reconnect path runs. Set to 0 to disable.
    /// Default: 5 seconds
    pub pong_timeout: Duration,
}

impl Default for SyncTimeouts {
    fn default() -> Self {
        Self {
            connection_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            keepalive_interval: Duration::from_secs(20),
            pong_timeout: Duration::from_secs(5),
        }
    }
}

impl SyncTimeouts {
    /// Create a new builder for custom timeout configuration.
    pub fn builder() -> SyncTimeoutsBuilder {
        SyncTimeoutsBuilder::new()
    }

    /// Timeouts optimized for fast local development.
    pub fn fast() -> Self {
        Self {
            connection_timeout: Duration::from_secs(2),
            request_timeout: Duration::from_secs(5),
            keepalive_interval: Duration::from_secs(15),
            pong_timeout: Duration::from_secs(3),
        }
    }

    /// Timeouts optimized for high-latency or unreliable networks.
    pub fn relaxed() -> Self {
        Self {
            connection_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(120),
            keepalive_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(10),
        }
    }

    /// Check if a duration represents "no timeout" (zero or very large).
    pub fn is_no_timeout(duration: Duration) -> bool {
        duration.is_zero() || duration > Duration::from_secs(86400 * 365)
    }
}

/// Builder for creating custom [`SyncTimeouts`] configurations.
#[derive(Debug, Clone)]
pub struct SyncTimeoutsBuilder {
    timeouts: SyncTimeouts,
}

impl SyncTimeoutsBuilder {
    fn new() -> Self {
        Self {
            timeouts: SyncTimeouts::default(),
        }
    }

    /// Set the connection timeout (TCP + TLS + WS handshake).
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.connection_timeout = timeout;
        self
    }

    /// Set the HTTP request timeout.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.request_timeout = timeout;
        self
    }

    /// Set the keepalive ping interval. Zero disables keepalive.
    pub fn keepalive_interval(mut self, interval: Duration) -> Self {
        self.timeouts.keepalive_interval = interval;
        self
    }

    /// Set the pong timeout. Zero disables dead-connection detection.
    pub fn pong_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.pong_timeout = timeout;
        self
    }

    /// Build the timeout configuration.
    pub fn build(self) -> SyncTimeouts {
        self.timeouts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timeouts() {
        let timeouts = SyncTimeouts::default();
        assert_eq!(timeouts.connection_timeout, Duration::from_secs(10));
        assert_eq!(timeouts.request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_builder() {
        let timeouts = SyncTimeouts::builder()
            .connection_timeout(Duration::from_secs(60))
            .request_timeout(Duration::from_secs(120))
            .build();

        assert_eq!(timeouts.connection_timeout, Duration::from_secs(60));
        assert_eq!(timeouts.request_timeout, Duration::from_secs(120));
    }

    #[test]
    fn test_presets() {
        assert!(SyncTimeouts::fast().connection_timeout <= Duration::from_secs(5));
        assert!(SyncTimeouts::relaxed().request_timeout >= Duration::from_secs(60));
    }

    #[test]
    fn test_is_no_timeout() {
        assert!(SyncTimeouts::is_no_timeout(Duration::ZERO));
        assert!(!SyncTimeouts::is_no_timeout(Duration::from_secs(1)));
    }
}
