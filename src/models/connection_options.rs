use serde::{Deserialize, Serialize};

/// Connection-level options for the event stream and reconnection behavior.
///
/// Separate from [`SyncTimeouts`](crate::SyncTimeouts), which bounds
/// individual operations; these options shape the long-running connection
/// lifecycle.
///
/// # Example
///
/// ```rust
/// use tablesync::ConnectionOptions;
///
/// let options = ConnectionOptions::default()
///     .with_reconnect_delay_ms(500)
///     .with_max_reconnect_attempts(Some(10));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionOptions {
    /// Initial delay in milliseconds between reconnection attempts.
    /// Doubles on every failed attempt up to `max_reconnect_delay_ms`.
    /// Default: 1000ms
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Maximum delay between reconnection attempts.
    /// Default: 30000ms
    #[serde(default = "default_max_reconnect_delay_ms")]
    pub max_reconnect_delay_ms: u64,

    /// Maximum number of reconnection attempts before the session is
    /// declared dead and the failure is surfaced as fatal.
    /// Default: None (retry forever)
    #[serde(default)]
    pub max_reconnect_attempts: Option<u32>,

    /// Interval for the periodic full-resync fallback, in seconds.
    ///
    /// When the server exposes per-table revision counters, gap detection
    /// makes this timer redundant and it only acts as a safety net. When it
    /// does not, this bounds how stale the cache can get after silently
    /// missed events. Set to 0 to disable.
    /// Default: 300 (5 minutes)
    #[serde(default = "default_resync_interval_secs")]
    pub resync_interval_secs: u64,
}

fn default_reconnect_delay_ms() -> u64 {
    1000
}

fn default_max_reconnect_delay_ms() -> u64 {
    30000
}

fn default_resync_interval_secs() -> u64 {
    300
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_reconnect_delay_ms: default_max_reconnect_delay_ms(),
            max_reconnect_attempts: None,
            resync_interval_secs: default_resync_interval_secs(),
        }
    }
}

impl ConnectionOptions {
    /// Create options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the initial reconnect delay.
    pub fn with_reconnect_delay_ms(mut self, ms: u64) -> Self {
        self.reconnect_delay_ms = ms;
        self
    }

    /// Set the backoff delay cap.
    pub fn with_max_reconnect_delay_ms(mut self, ms: u64) -> Self {
        self.max_reconnect_delay_ms = ms;
        self
    }

    /// Set the reconnect attempt ceiling (None retries forever).
    pub fn with_max_reconnect_attempts(mut self, attempts: Option<u32>) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    /// Set the periodic resync interval in seconds (0 disables).
    pub fn with_resync_interval_secs(mut self, secs: u64) -> Self {
        self.resync_interval_secs = secs;
        self
    }
}
