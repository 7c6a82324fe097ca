//! Connection lifecycle hooks for the sync client.
//!
//! Callback-based hooks for observing the event-stream connection:
//!
//! - [`on_connect`](EventHandlers::on_connect): fired when the event stream is established
//! - [`on_disconnect`](EventHandlers::on_disconnect): fired when the event stream closes
//! - [`on_error`](EventHandlers::on_error): fired on connection or protocol errors
//!
//! # Example
//!
//! ```rust,no_run
//! use tablesync::EventHandlers;
//!
//! let handlers = EventHandlers::new()
//!     .on_connect(|| println!("event stream up"))
//!     .on_disconnect(|reason| println!("event stream down: {}", reason))
//!     .on_error(|err| eprintln!("sync error (recoverable={}): {}", err.recoverable, err));
//! ```

use std::fmt;
use std::sync::Arc;

/// Reason for a disconnect event.
#[derive(Debug, Clone)]
pub struct DisconnectReason {
    /// Human-readable description of why the connection closed.
    pub message: String,
    /// WebSocket close code, if available (e.g. 1000 = normal, 1006 = abnormal).
    pub code: Option<u16>,
}

impl DisconnectReason {
    /// Create a new disconnect reason with a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    /// Create a new disconnect reason with a message and close code.
    pub fn with_code(message: impl Into<String>, code: u16) -> Self {
        Self {
            message: message.into(),
            code: Some(code),
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(code) = self.code {
            write!(f, "{} (code: {})", self.message, code)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

/// Error information passed to the `on_error` handler.
#[derive(Debug, Clone)]
pub struct ConnectionError {
    /// Human-readable error message.
    pub message: String,
    /// Whether this error is recoverable, i.e. auto-reconnect may succeed.
    pub recoverable: bool,
}

impl ConnectionError {
    /// Create a new connection error.
    pub fn new(message: impl Into<String>, recoverable: bool) -> Self {
        Self {
            message: message.into(),
            recoverable,
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Type alias for the on_connect callback.
pub type OnConnectCallback = Arc<dyn Fn() + Send + Sync>;

/// Type alias for the on_disconnect callback.
pub type OnDisconnectCallback = Arc<dyn Fn(DisconnectReason) + Send + Sync>;

/// Type alias for the on_error callback.
pub type OnErrorCallback = Arc<dyn Fn(ConnectionError) + Send + Sync>;

/// Connection lifecycle event handlers.
///
/// All handlers are optional. The builder pattern makes it easy to register
/// only the handlers you need. Handlers are `Send + Sync` so they can fire
/// from the tokio background tasks that run the event stream.
#[derive(Clone, Default)]
pub struct EventHandlers {
    /// Called when the event-stream connection is successfully established.
    pub(crate) on_connect: Option<OnConnectCallback>,

    /// Called when the event-stream connection closes (intentionally or not).
    pub(crate) on_disconnect: Option<OnDisconnectCallback>,

    /// Called when a connection or protocol error occurs.
    pub(crate) on_error: Option<OnErrorCallback>,
}

impl fmt::Debug for EventHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHandlers")
            .field("on_connect", &self.on_connect.is_some())
            .field("on_disconnect", &self.on_disconnect.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

impl EventHandlers {
    /// Create a new empty `EventHandlers` (no callbacks registered).
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback invoked when the event-stream connection is established.
    ///
    /// Fires on the initial connection and again after every successful
    /// reconnect.
    pub fn on_connect(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_connect = Some(Arc::new(f));
        self
    }

    /// Register a callback invoked when the event-stream connection is closed.
    ///
    /// The callback receives a [`DisconnectReason`] with details about why
    /// the connection was closed.
    pub fn on_disconnect(mut self, f: impl Fn(DisconnectReason) + Send + Sync + 'static) -> Self {
        self.on_disconnect = Some(Arc::new(f));
        self
    }

    /// Register a callback invoked when a connection error occurs.
    ///
    /// The callback receives a [`ConnectionError`] indicating whether the
    /// error is recoverable (auto-reconnect may help) or fatal.
    pub fn on_error(mut self, f: impl Fn(ConnectionError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    /// Returns `true` if any handler is registered.
    pub fn has_any(&self) -> bool {
        self.on_connect.is_some() || self.on_disconnect.is_some() || self.on_error.is_some()
    }

    // ---------------------------------------------------------------
    // Internal dispatch helpers
    // ---------------------------------------------------------------

    pub(crate) fn emit_connect(&self) {
        if let Some(cb) = &self.on_connect {
            cb();
        }
    }

    pub(crate) fn emit_disconnect(&self, reason: DisconnectReason) {
        if let Some(cb) = &self.on_disconnect {
            cb(reason);
        }
    }

    pub(crate) fn emit_error(&self, error: ConnectionError) {
        if let Some(cb) = &self.on_error {
            cb(error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn empty_handlers_emit_without_panicking() {
        let handlers = EventHandlers::new();
        assert!(!handlers.has_any());
        handlers.emit_connect();
        handlers.emit_disconnect(DisconnectReason::new("closed"));
        handlers.emit_error(ConnectionError::new("boom", true));
    }

    #[test]
    fn registered_handlers_fire() {
        let connects = Arc::new(AtomicUsize::new(0));
        let errors = Arc::new(AtomicUsize::new(0));
        let c = connects.clone();
        let e = errors.clone();
        let handlers = EventHandlers::new()
            .on_connect(move || {
                c.fetch_add(1, Ordering::SeqCst);
            })
            .on_error(move |err| {
                assert!(!err.recoverable);
                e.fetch_add(1, Ordering::SeqCst);
            });
        assert!(handlers.has_any());
        handlers.emit_connect();
        handlers.emit_connect();
        handlers.emit_error(ConnectionError::new("gave up", false));
        assert_eq!(connects.load(Ordering::SeqCst), 2);
        assert_eq!(errors.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn disconnect_reason_display_includes_code() {
        let reason = DisconnectReason::with_code("server closed", 1006);
        assert_eq!(reason.to_string(), "server closed (code: 1006)");
        let plain = DisconnectReason::new("stopped");
        assert_eq!(plain.to_string(), "stopped");
    }
}
