//! Background event-stream task.
//!
//! One tokio task owns the WebSocket connection and the whole sync
//! lifecycle: initial bulk load, incremental event application through the
//! dispatcher, revision gap detection, periodic resync fallback, keepalive
//! pings and automatic reconnection with exponential backoff.

use crate::dispatcher::Dispatcher;
use crate::entry::{Entry, EntryKey};
use crate::error::{Result, SyncError};
use crate::event_handlers::{ConnectionError, DisconnectReason, EventHandlers};
use crate::models::{ConnectionOptions, EventMessage};
use crate::mutation::RequestContext;
use crate::schema::{Schema, TableSchema};
use crate::timeouts::SyncTimeouts;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::time::Instant as TokioInstant;
use tokio_tungstenite::tungstenite::{client::IntoClientRequest, protocol::Message};
use url::Url;

type WebSocketStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<TcpStream>>;

const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 3600);

/// Everything the sync task needs, bundled at spawn time.
pub(crate) struct SyncContext {
    pub(crate) request: RequestContext,
    pub(crate) ws_url: String,
    pub(crate) schema: Arc<Schema>,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) timeouts: SyncTimeouts,
    pub(crate) options: ConnectionOptions,
    pub(crate) handlers: EventHandlers,
}

// ── URL resolution ──────────────────────────────────────────────────────────

/// Derive the event-stream URL from the REST base URL, or validate an
/// explicit override.
pub(crate) fn resolve_ws_url(
    base_url: &str,
    state_path: &str,
    override_url: Option<&str>,
) -> Result<String> {
    let base = Url::parse(base_url.trim()).map_err(|e| {
        SyncError::Configuration(format!("invalid base_url '{}': {}", base_url, e))
    })?;
    validate_ws_url(&base, false, "base_url")?;

    if let Some(url) = override_url {
        let parsed = Url::parse(url.trim()).map_err(|e| {
            SyncError::Configuration(format!("invalid event URL override '{}': {}", url, e))
        })?;
        validate_ws_url(&parsed, true, "event URL override")?;
        if base.scheme() == "https" && parsed.scheme() == "ws" {
            return Err(SyncError::Configuration(
                "refusing insecure ws:// override when base_url uses https://".to_string(),
            ));
        }
        return Ok(parsed.to_string());
    }

    let mut ws_url = base.clone();
    let ws_scheme = match base.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(SyncError::Configuration(format!(
                "unsupported base_url scheme '{}'; expected http(s) or ws(s)",
                other
            )));
        },
    };
    ws_url
        .set_scheme(ws_scheme)
        .map_err(|_| SyncError::Configuration("failed to set event URL scheme".to_string()))?;
    ws_url.set_fragment(None);
    ws_url.set_query(None);
    ws_url.set_path(state_path);
    Ok(ws_url.to_string())
}

fn validate_ws_url(url: &Url, require_ws_scheme: bool, context: &str) -> Result<()> {
    if url.host_str().is_none() {
        return Err(SyncError::Configuration(format!("{} must include a host", context)));
    }
    if !url.username().is_empty() || url.password().is_some() {
        return Err(SyncError::Configuration(format!(
            "{} must not embed credentials",
            context
        )));
    }
    if require_ws_scheme && !matches!(url.scheme(), "ws" | "wss") {
        return Err(SyncError::Configuration(format!(
            "{} must use ws:// or wss://",
            context
        )));
    }
    Ok(())
}

/// Spread keepalive pings across clients to avoid synchronized bursts.
///
/// Deterministic jitter derived from the server URL, so reconnecting keeps
/// the same phase instead of re-rolling it.
fn jitter_keepalive_interval(base: Duration, key: &str) -> Duration {
    if base.is_zero() {
        return base;
    }
    Duration::from_millis(jitter_ms(base.as_millis() as u64, key, 0))
}

/// Deterministic +/-20% jitter around `base_ms`, keyed so distinct salts
/// (reconnect attempts) land at distinct points in the window.
fn jitter_ms(base_ms: u64, key: &str, salt: u32) -> u64 {
    if base_ms <= 1 {
        return base_ms;
    }
    let jitter_span = (base_ms / 5).max(1);
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    salt.hash(&mut hasher);
    let hashed = hasher.finish();

    let offset = (hashed % (2 * jitter_span + 1)) as i64 - jitter_span as i64;
    if offset >= 0 {
        base_ms.saturating_add(offset as u64)
    } else {
        base_ms.saturating_sub((-offset) as u64).max(1)
    }
}

// ── Revision gap detection ──────────────────────────────────────────────────

#[derive(Debug, PartialEq, Eq)]
enum RevisionCheck {
    /// Next expected revision (or no revision tracking): apply the event.
    Apply,
    /// Revision at or below the last applied one: already seen, skip.
    Stale,
    /// Revisions were skipped: the cache may have missed events.
    Gap,
}

/// Compare an event's revision against the last one applied for its table.
///
/// Contiguous revisions are recorded here; a gapped revision is recorded by
/// the caller only once the table reload succeeds, so a failed reload keeps
/// reporting the gap and retries on the next frame.
fn check_revision(revisions: &mut HashMap<String, u64>, event: &EventMessage) -> RevisionCheck {
    let revision = match event.revision {
        Some(revision) => revision,
        None => return RevisionCheck::Apply,
    };
    match revisions.get(&event.table).copied() {
        Some(last) if revision <= last => RevisionCheck::Stale,
        Some(last) if revision > last + 1 => RevisionCheck::Gap,
        _ => {
            revisions.insert(event.table.clone(), revision);
            RevisionCheck::Apply
        },
    }
}

// ── Bulk loading ────────────────────────────────────────────────────────────

/// Fetch one table's full contents and decode them into keyed entries.
///
/// Rows that fail to decode or lack a complete key are skipped with a
/// warning rather than failing the whole load.
async fn load_table(
    request: &RequestContext,
    schema: &TableSchema,
) -> Result<BTreeMap<EntryKey, Arc<Entry>>> {
    let url = request.table_url(&schema.name);
    let response = request
        .auth
        .apply_to_request(request.http_client.get(&url))
        .send()
        .await?;
    let status = response.status();
    if !status.is_success() {
        return Err(SyncError::Connection(format!(
            "bulk load of table '{}' failed: status {}",
            schema.name, status
        )));
    }
    let rows: Vec<JsonMap<String, JsonValue>> = response.json().await?;

    let mut contents = BTreeMap::new();
    for row in &rows {
        let entry = match Entry::from_row(schema, row) {
            Ok(entry) => entry,
            Err(e) => {
                log::warn!("bulk load: skipping row in '{}': {}", schema.name, e);
                continue;
            },
        };
        match entry.key(schema) {
            Ok(key) => {
                contents.insert(key, Arc::new(entry));
            },
            Err(e) => {
                log::warn!("bulk load: skipping keyless row in '{}': {}", schema.name, e);
            },
        }
    }
    log::debug!("loaded {} entries for table '{}'", contents.len(), schema.name);
    Ok(contents)
}

async fn load_all_tables(
    request: &RequestContext,
    schema: &Schema,
) -> Result<HashMap<String, BTreeMap<EntryKey, Arc<Entry>>>> {
    let mut loaded = HashMap::with_capacity(schema.len());
    for name in schema.table_names() {
        if let Some(table) = schema.table(name) {
            loaded.insert(name.to_string(), load_table(request, table).await?);
        }
    }
    Ok(loaded)
}

fn decode_frame(text: &str) -> Option<EventMessage> {
    match serde_json::from_str::<EventMessage>(text) {
        Ok(event) => Some(event),
        Err(e) => {
            log::warn!("skipping malformed event frame: {}", e);
            None
        },
    }
}

// ── Connection establishment ────────────────────────────────────────────────

async fn establish_ws(ctx: &SyncContext) -> Result<WebSocketStream> {
    log::debug!("establishing event stream to {}", ctx.ws_url);
    let mut request = ctx
        .ws_url
        .as_str()
        .into_client_request()
        .map_err(|e| SyncError::Connection(format!("failed to build stream request: {}", e)))?;
    ctx.request.auth.apply_to_ws_request(&mut request)?;

    let connect = tokio_tungstenite::connect_async(request);
    let result = if !SyncTimeouts::is_no_timeout(ctx.timeouts.connection_timeout) {
        tokio::time::timeout(ctx.timeouts.connection_timeout, connect).await
    } else {
        Ok(connect.await)
    };

    match result {
        Ok(Ok((stream, _response))) => Ok(stream),
        Ok(Err(tokio_tungstenite::tungstenite::error::Error::Http(response))) => {
            let status = response.status();
            let message = match status.as_u16() {
                401 => "unauthorized: event stream requires valid credentials".to_string(),
                403 => "forbidden: access to event stream denied".to_string(),
                code => format!("event stream HTTP error: {}", code),
            };
            let recoverable = !matches!(status.as_u16(), 401 | 403);
            ctx.handlers.emit_error(ConnectionError::new(&message, recoverable));
            Err(SyncError::Connection(message))
        },
        Ok(Err(e)) => {
            let message = format!("event stream connection failed: {}", e);
            ctx.handlers.emit_error(ConnectionError::new(&message, true));
            Err(SyncError::Connection(message))
        },
        Err(_) => {
            let message = format!("connection timeout ({:?})", ctx.timeouts.connection_timeout);
            ctx.handlers.emit_error(ConnectionError::new(&message, true));
            Err(SyncError::Timeout(message))
        },
    }
}

/// Bulk-load every table while the stream is live, buffering frames that
/// arrive during the load, then swap the snapshots in and replay the buffer.
///
/// Replay is safe because application is idempotent: frames already folded
/// into the snapshot leave the cache unchanged.
async fn resync_all(ctx: &SyncContext, ws: &mut WebSocketStream) -> Result<()> {
    let load = load_all_tables(&ctx.request, &ctx.schema);
    tokio::pin!(load);
    let mut buffered: Vec<EventMessage> = Vec::new();

    let loaded = loop {
        tokio::select! {
            biased;
            result = &mut load => break result?,
            frame = ws.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if let Some(event) = decode_frame(&text) {
                        buffered.push(event);
                    }
                },
                Some(Ok(Message::Ping(payload))) => {
                    let _ = ws.send(Message::Pong(payload)).await;
                },
                Some(Ok(Message::Close(_))) | None => {
                    return Err(SyncError::Connection(
                        "event stream closed during resync".to_string(),
                    ));
                },
                Some(Ok(_)) => {},
                Some(Err(e)) => {
                    return Err(SyncError::Connection(format!(
                        "event stream failed during resync: {}",
                        e
                    )));
                },
            },
        }
    };

    for (table, contents) in loaded {
        ctx.dispatcher.swap(&table, contents).await;
    }
    if !buffered.is_empty() {
        log::debug!("replaying {} frames buffered during resync", buffered.len());
        for event in buffered {
            ctx.dispatcher.dispatch(event).await;
        }
    }
    Ok(())
}

// ── The task itself ─────────────────────────────────────────────────────────

/// Run the sync lifecycle until the client stops or reconnection gives up.
///
/// `ready_tx` resolves once the initial connection and bulk load succeed, or
/// with the error that prevented them.
pub(crate) async fn run_sync(ctx: SyncContext, ready_tx: oneshot::Sender<Result<()>>) {
    let mut stop = ctx.request.stop.clone();

    let mut ws = match establish_ws(&ctx).await {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            ctx.dispatcher.shutdown().await;
            return;
        },
    };
    if let Err(e) = resync_all(&ctx, &mut ws).await {
        let _ = ready_tx.send(Err(e));
        ctx.dispatcher.shutdown().await;
        return;
    }
    ctx.handlers.emit_connect();
    let _ = ready_tx.send(Ok(()));

    let keepalive_dur = if ctx.timeouts.keepalive_interval.is_zero() {
        FAR_FUTURE
    } else {
        jitter_keepalive_interval(ctx.timeouts.keepalive_interval, &ctx.ws_url)
    };
    let has_keepalive = !ctx.timeouts.keepalive_interval.is_zero();
    let pong_timeout_dur = ctx.timeouts.pong_timeout;
    let has_pong_timeout = has_keepalive && !pong_timeout_dur.is_zero();

    let resync_period = if ctx.options.resync_interval_secs == 0 {
        FAR_FUTURE
    } else {
        Duration::from_secs(ctx.options.resync_interval_secs)
    };

    let mut idle_deadline = TokioInstant::now() + keepalive_dur;
    let mut awaiting_pong = false;
    let mut pong_deadline = TokioInstant::now() + FAR_FUTURE;
    let mut resync_deadline = TokioInstant::now() + resync_period;
    let mut revisions: HashMap<String, u64> = HashMap::new();
    let mut reconnect_attempt: u32 = 0;
    let mut connected = true;

    loop {
        if connected {
            let idle_sleep = tokio::time::sleep_until(idle_deadline);
            tokio::pin!(idle_sleep);
            let pong_sleep = tokio::time::sleep_until(pong_deadline);
            tokio::pin!(pong_sleep);
            let resync_sleep = tokio::time::sleep_until(resync_deadline);
            tokio::pin!(resync_sleep);

            tokio::select! {
                biased;

                _ = stop.changed() => {
                    let _ = ws.close(None).await;
                    ctx.handlers.emit_disconnect(DisconnectReason::new("client stopped"));
                    ctx.dispatcher.shutdown().await;
                    return;
                }

                _ = &mut pong_sleep, if has_pong_timeout && awaiting_pong => {
                    log::warn!("pong timeout ({:?}), server unresponsive", pong_timeout_dur);
                    ctx.handlers.emit_disconnect(DisconnectReason::new(format!(
                        "pong timeout ({:?}), server unresponsive",
                        pong_timeout_dur
                    )));
                    awaiting_pong = false;
                    connected = false;
                    continue;
                }

                _ = &mut idle_sleep, if has_keepalive && !awaiting_pong => {
                    if let Err(e) = ws.send(Message::Ping(Bytes::new())).await {
                        log::warn!("keepalive ping failed: {}", e);
                        ctx.handlers.emit_disconnect(DisconnectReason::new(format!(
                            "keepalive ping failed: {}",
                            e
                        )));
                        awaiting_pong = false;
                        connected = false;
                        continue;
                    }
                    if has_pong_timeout {
                        awaiting_pong = true;
                        pong_deadline = TokioInstant::now() + pong_timeout_dur;
                    }
                    idle_deadline = TokioInstant::now() + keepalive_dur;
                }

                _ = &mut resync_sleep => {
                    log::debug!("periodic resync");
                    match resync_all(&ctx, &mut ws).await {
                        Ok(()) => revisions.clear(),
                        Err(e) => {
                            log::warn!("periodic resync failed: {}", e);
                            ctx.handlers.emit_disconnect(DisconnectReason::new(e.to_string()));
                            connected = false;
                            continue;
                        },
                    }
                    resync_deadline = TokioInstant::now() + resync_period;
                }

                frame = ws.next() => {
                    idle_deadline = TokioInstant::now() + keepalive_dur;
                    if awaiting_pong {
                        awaiting_pong = false;
                        pong_deadline = TokioInstant::now() + FAR_FUTURE;
                    }

                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            if let Some(event) = decode_frame(&text) {
                                match check_revision(&mut revisions, &event) {
                                    RevisionCheck::Apply => ctx.dispatcher.dispatch(event).await,
                                    RevisionCheck::Stale => {
                                        log::debug!(
                                            "skipping stale event for table '{}'",
                                            event.table
                                        );
                                    },
                                    RevisionCheck::Gap => {
                                        log::warn!(
                                            "revision gap on table '{}', resyncing it",
                                            event.table
                                        );
                                        if let Some(table) = ctx.schema.table(&event.table) {
                                            match load_table(&ctx.request, table).await {
                                                Ok(contents) => {
                                                    ctx.dispatcher
                                                        .swap(&event.table, contents)
                                                        .await;
                                                    if let Some(revision) = event.revision {
                                                        revisions.insert(
                                                            event.table.clone(),
                                                            revision,
                                                        );
                                                    }
                                                },
                                                // The stale recorded revision makes
                                                // the next frame re-trigger the reload.
                                                Err(e) => log::warn!(
                                                    "gap resync of '{}' failed: {}",
                                                    event.table,
                                                    e
                                                ),
                                            }
                                        }
                                    },
                                }
                            }
                        },
                        Some(Ok(Message::Ping(payload))) => {
                            let _ = ws.send(Message::Pong(payload)).await;
                        },
                        Some(Ok(Message::Pong(_))) => {
                            log::debug!("keepalive: received pong");
                        },
                        Some(Ok(Message::Close(frame))) => {
                            let reason = match frame {
                                Some(f) => DisconnectReason::with_code(
                                    f.reason.to_string(),
                                    f.code.into(),
                                ),
                                None => DisconnectReason::new("server closed connection"),
                            };
                            ctx.handlers.emit_disconnect(reason);
                            connected = false;
                            continue;
                        },
                        Some(Ok(_)) => {},
                        Some(Err(e)) => {
                            let message = e.to_string();
                            ctx.handlers.emit_error(ConnectionError::new(&message, true));
                            ctx.handlers.emit_disconnect(DisconnectReason::new(format!(
                                "event stream error: {}",
                                message
                            )));
                            connected = false;
                            continue;
                        },
                        None => {
                            ctx.handlers
                                .emit_disconnect(DisconnectReason::new("event stream ended"));
                            connected = false;
                            continue;
                        },
                    }
                }
            }
        } else {
            // ── Not connected: back off, reconnect, resync ──────────────
            if let Some(max) = ctx.options.max_reconnect_attempts {
                if reconnect_attempt >= max {
                    log::warn!("max reconnection attempts ({}) reached, giving up", max);
                    ctx.handlers.emit_error(ConnectionError::new(
                        format!("max reconnection attempts ({}) reached", max),
                        false,
                    ));
                    ctx.dispatcher.shutdown().await;
                    return;
                }
            }

            let capped = std::cmp::min(
                ctx.options
                    .reconnect_delay_ms
                    .saturating_mul(2u64.saturating_pow(reconnect_attempt)),
                ctx.options.max_reconnect_delay_ms,
            );
            let delay = jitter_ms(capped, &ctx.ws_url, reconnect_attempt);
            reconnect_attempt += 1;
            log::info!("reconnecting in {}ms (attempt {})", delay, reconnect_attempt);

            tokio::select! {
                biased;
                _ = stop.changed() => {
                    ctx.handlers.emit_disconnect(DisconnectReason::new("client stopped"));
                    ctx.dispatcher.shutdown().await;
                    return;
                }
                _ = tokio::time::sleep(Duration::from_millis(delay)) => {}
            }

            match establish_ws(&ctx).await {
                Ok(mut stream) => match resync_all(&ctx, &mut stream).await {
                    Ok(()) => {
                        log::info!("reconnection successful");
                        reconnect_attempt = 0;
                        revisions.clear();
                        ws = stream;
                        connected = true;
                        ctx.handlers.emit_connect();
                        idle_deadline = TokioInstant::now() + keepalive_dur;
                        awaiting_pong = false;
                        pong_deadline = TokioInstant::now() + FAR_FUTURE;
                        resync_deadline = TokioInstant::now() + resync_period;
                    },
                    Err(e) => {
                        log::warn!("resync after reconnect failed: {}", e);
                    },
                },
                Err(e) => {
                    log::warn!("reconnection attempt {} failed: {}", reconnect_attempt, e);
                },
            }
        }
    }
}
