//! Main sync client with builder pattern.
//!
//! The client introspects the remote schema, mirrors every table into
//! memory and keeps the mirror synchronized through the event stream.

use crate::auth::AuthProvider;
use crate::dispatcher::{ChangeCallback, Dispatcher, EntryChange};
use crate::error::{Result, SyncError};
use crate::event_handlers::EventHandlers;
use crate::models::{ChangeAction, ConnectionOptions, IntrospectionRow};
use crate::mutation::RequestContext;
use crate::schema::Schema;
use crate::store::EntryStore;
use crate::subscriber::{self, SyncContext};
use crate::table::Table;
use crate::timeouts::SyncTimeouts;
use std::sync::{Arc, Mutex};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

const DEFAULT_QUERY_PATH: &str = "/query";
const DEFAULT_STATE_PATH: &str = "/state";

/// A connected session's moving parts.
struct Session {
    schema: Arc<Schema>,
    store: Arc<EntryStore>,
    context: RequestContext,
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Schema-aware, event-synchronized mirror of a remote relational API.
///
/// Build with [`SyncClient::builder`], then [`connect`](SyncClient::connect)
/// to introspect the schema, bulk-load every table and start following the
/// event stream. Reads are synchronous against the in-memory mirror; writes
/// go through per-table [batches](Table::batch).
///
/// # Example
///
/// ```rust,no_run
/// use tablesync::{SyncClient, SnapshotFilter};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let mut client = SyncClient::builder()
///     .base_url("http://localhost:8080")
///     .on_change(|action, table, changes| {
///         println!("{} on {}: {} rows", action, table, changes.len());
///         Ok(())
///     })
///     .build()?;
///
/// client.connect().await?;
/// let pets = client.table("pets")?;
/// for pet in pets.snapshot(&SnapshotFilter::All) {
///     println!("{}", pet.to_json());
/// }
/// client.stop().await;
/// # Ok(())
/// # }
/// ```
pub struct SyncClient {
    base_url: String,
    query_path: String,
    ws_url: String,
    http_client: reqwest::Client,
    auth: AuthProvider,
    timeouts: SyncTimeouts,
    options: ConnectionOptions,
    handlers: EventHandlers,
    callback: Option<ChangeCallback>,
    session: Mutex<Option<Session>>,
}

impl SyncClient {
    /// Create a new builder for configuring the client.
    pub fn builder() -> SyncClientBuilder {
        SyncClientBuilder::new()
    }

    /// Introspect the schema, bulk-load every table and start the event
    /// stream.
    ///
    /// Fails without side effects: if introspection, the stream connection
    /// or the initial load fails, no tables are exposed and `connect` can be
    /// retried.
    pub async fn connect(&mut self) -> Result<()> {
        if self.is_connected() {
            return Err(SyncError::Configuration("client is already connected".to_string()));
        }

        let schema = Arc::new(Schema::from_rows(self.fetch_introspection().await?)?);
        log::info!("introspected {} table(s)", schema.len());

        let store = Arc::new(EntryStore::new(&schema));
        let (stop_tx, stop_rx) = watch::channel(false);
        let context = RequestContext {
            base_url: self.base_url.clone(),
            query_path: self.query_path.clone(),
            http_client: self.http_client.clone(),
            auth: self.auth.clone(),
            stop: stop_rx,
        };

        let dispatcher = Dispatcher::spawn(&store, self.callback.clone());
        let (ready_tx, ready_rx) = oneshot::channel();
        let task = tokio::spawn(subscriber::run_sync(
            SyncContext {
                request: context.clone(),
                ws_url: self.ws_url.clone(),
                schema: Arc::clone(&schema),
                dispatcher,
                timeouts: self.timeouts.clone(),
                options: self.options.clone(),
                handlers: self.handlers.clone(),
            },
            ready_tx,
        ));

        match ready_rx.await {
            Ok(Ok(())) => {},
            Ok(Err(e)) => {
                let _ = task.await;
                return Err(e);
            },
            Err(_) => {
                let _ = task.await;
                return Err(SyncError::Connection(
                    "sync task exited before signalling readiness".to_string(),
                ));
            },
        }

        let mut session = self.session.lock().unwrap_or_else(|e| e.into_inner());
        *session = Some(Session {
            schema,
            store,
            context,
            stop_tx,
            task,
        });
        Ok(())
    }

    /// The schema discovered at connect time.
    pub fn schema(&self) -> Result<Arc<Schema>> {
        let session = self.session.lock().unwrap_or_else(|e| e.into_inner());
        session
            .as_ref()
            .map(|s| Arc::clone(&s.schema))
            .ok_or_else(|| SyncError::Configuration("client is not connected".to_string()))
    }

    /// Handle to one mirrored table.
    pub fn table(&self, name: &str) -> Result<Table> {
        let session = self.session.lock().unwrap_or_else(|e| e.into_inner());
        let session = session
            .as_ref()
            .ok_or_else(|| SyncError::Configuration("client is not connected".to_string()))?;
        let cache = session
            .store
            .table(name)
            .ok_or_else(|| SyncError::Schema(format!("unknown table '{}'", name)))?;
        Ok(Table::new(Arc::clone(cache), session.context.clone()))
    }

    /// True while a session is established.
    pub fn is_connected(&self) -> bool {
        let session = self.session.lock().unwrap_or_else(|e| e.into_inner());
        session.is_some()
    }

    /// Stop the session: close the event stream, drain pending event
    /// application, cancel in-flight batches and drop the mirrored data.
    ///
    /// Idempotent; a stopped client can `connect` again.
    pub async fn stop(&mut self) {
        let session = {
            let mut session = self.session.lock().unwrap_or_else(|e| e.into_inner());
            session.take()
        };
        let Some(session) = session else {
            return;
        };

        let _ = session.stop_tx.send(true);
        if let Err(e) = session.task.await {
            log::warn!("sync task panicked during stop: {}", e);
        }
        session.store.clear();
        log::debug!("client stopped");
    }

    async fn fetch_introspection(&self) -> Result<Vec<IntrospectionRow>> {
        let url = format!("{}/", self.base_url);
        log::debug!("fetching schema introspection from {}", url);
        let response = self
            .auth
            .apply_to_request(self.http_client.get(&url))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::Schema(format!(
                "schema introspection failed: status {}",
                status
            )));
        }
        Ok(response.json().await?)
    }
}

impl std::fmt::Debug for SyncClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncClient")
            .field("base_url", &self.base_url)
            .field("ws_url", &self.ws_url)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl Drop for SyncClient {
    fn drop(&mut self) {
        // Best-effort: signal the background task; entry caches go with it.
        let session = self.session.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(session) = session.as_ref() {
            let _ = session.stop_tx.send(true);
        }
    }
}

/// Builder for [`SyncClient`].
#[derive(Default)]
pub struct SyncClientBuilder {
    base_url: Option<String>,
    query_path: Option<String>,
    state_path: Option<String>,
    event_url: Option<String>,
    auth: AuthProvider,
    timeouts: SyncTimeouts,
    options: ConnectionOptions,
    handlers: EventHandlers,
    callback: Option<ChangeCallback>,
}

impl SyncClientBuilder {
    /// Create a builder with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// REST base URL of the remote API (required), e.g.
    /// `http://localhost:8080`.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Path prefix of the table endpoints. Default `/query`.
    pub fn query_path(mut self, path: impl Into<String>) -> Self {
        self.query_path = Some(path.into());
        self
    }

    /// Path of the event-stream endpoint on the base host. Default `/state`.
    pub fn state_path(mut self, path: impl Into<String>) -> Self {
        self.state_path = Some(path.into());
        self
    }

    /// Full event-stream URL override (`ws://` or `wss://`); takes
    /// precedence over [`state_path`](Self::state_path).
    pub fn event_url(mut self, url: impl Into<String>) -> Self {
        self.event_url = Some(url.into());
        self
    }

    /// Authenticate with a bearer token on every request, including the
    /// event-stream handshake.
    pub fn bearer_token(mut self, token: impl Into<String>) -> Self {
        self.auth = AuthProvider::bearer(token);
        self
    }

    /// Set the full authentication provider.
    pub fn auth(mut self, auth: AuthProvider) -> Self {
        self.auth = auth;
        self
    }

    /// Operation timeouts.
    pub fn timeouts(mut self, timeouts: SyncTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Reconnection and resync behavior.
    pub fn connection_options(mut self, options: ConnectionOptions) -> Self {
        self.options = options;
        self
    }

    /// Connection lifecycle hooks.
    pub fn event_handlers(mut self, handlers: EventHandlers) -> Self {
        self.handlers = handlers;
        self
    }

    /// Register the change callback, invoked once per applied event after
    /// the cache reflects it.
    pub fn on_change<F>(mut self, callback: F) -> Self
    where
        F: Fn(ChangeAction, &str, &[EntryChange]) -> std::result::Result<(), crate::dispatcher::CallbackError>
            + Send
            + Sync
            + 'static,
    {
        self.callback = Some(Arc::new(callback));
        self
    }

    /// Build the client. Validates the URLs; no I/O happens until
    /// [`connect`](SyncClient::connect).
    pub fn build(self) -> Result<SyncClient> {
        let base_url = self
            .base_url
            .ok_or_else(|| SyncError::Configuration("base_url is required".to_string()))?;
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        let query_path = self.query_path.unwrap_or_else(|| DEFAULT_QUERY_PATH.to_string());
        let state_path = self.state_path.unwrap_or_else(|| DEFAULT_STATE_PATH.to_string());

        let ws_url =
            subscriber::resolve_ws_url(&base_url, &state_path, self.event_url.as_deref())?;

        // Pooled connections: bulk loads issue one GET per table back to back.
        let mut http_builder = reqwest::Client::builder()
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(std::time::Duration::from_secs(90));
        if !SyncTimeouts::is_no_timeout(self.timeouts.request_timeout) {
            http_builder = http_builder.timeout(self.timeouts.request_timeout);
        }
        if !SyncTimeouts::is_no_timeout(self.timeouts.connection_timeout) {
            http_builder = http_builder.connect_timeout(self.timeouts.connection_timeout);
        }
        let http_client = http_builder
            .build()
            .map_err(|e| SyncError::Configuration(e.to_string()))?;

        Ok(SyncClient {
            base_url,
            query_path,
            ws_url,
            http_client,
            auth: self.auth,
            timeouts: self.timeouts,
            options: self.options,
            handlers: self.handlers,
            callback: self.callback,
            session: Mutex::new(None),
        })
    }
}
