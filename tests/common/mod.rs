//! In-process mock of the remote API: a minimal HTTP responder for the
//! introspection and table endpoints plus a WebSocket listener for the
//! event stream. Tests drive it through [`MockServer`].

#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Map as JsonMap, Value as JsonValue};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, watch};
use tokio_tungstenite::tungstenite::protocol::Message;

#[derive(Clone)]
enum WsCommand {
    Frame(String),
    Close,
}

struct ServerState {
    introspection: JsonValue,
    tables: HashMap<String, Vec<JsonMap<String, JsonValue>>>,
    reject_mutations: bool,
    emit_events: bool,
    revision_counter: Option<u64>,
}

/// A fake remote API: one HTTP port for REST, one WS port for events.
pub struct MockServer {
    pub base_url: String,
    pub event_url: String,
    state: Arc<Mutex<ServerState>>,
    ws_tx: broadcast::Sender<WsCommand>,
    ws_connections: watch::Receiver<usize>,
}

/// Route crate logs through the test harness when `RUST_LOG` is set.
fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

impl MockServer {
    /// Start a server exposing the pets schema, optionally pre-seeded.
    pub async fn start(seed: Vec<JsonValue>) -> Self {
        init_logging();
        let mut tables = HashMap::new();
        tables.insert(
            "pets".to_string(),
            seed.into_iter()
                .map(|v| v.as_object().expect("seed rows must be objects").clone())
                .collect(),
        );
        let state = Arc::new(Mutex::new(ServerState {
            introspection: pets_introspection(),
            tables,
            reject_mutations: false,
            emit_events: true,
            revision_counter: None,
        }));

        let (ws_tx, _) = broadcast::channel::<WsCommand>(64);
        let (conn_tx, ws_connections) = watch::channel(0usize);

        let http_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", http_listener.local_addr().unwrap());
        let ws_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let event_url = format!("ws://{}/state", ws_listener.local_addr().unwrap());

        let http_state = state.clone();
        let http_events = ws_tx.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = http_listener.accept().await else {
                    break;
                };
                let state = http_state.clone();
                let events = http_events.clone();
                tokio::spawn(handle_http(stream, state, events));
            }
        });

        let accept_events = ws_tx.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = ws_listener.accept().await else {
                    break;
                };
                let mut rx = accept_events.subscribe();
                conn_tx.send_modify(|n| *n += 1);
                tokio::spawn(async move {
                    let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                        return;
                    };
                    loop {
                        tokio::select! {
                            cmd = rx.recv() => match cmd {
                                Ok(WsCommand::Frame(text)) => {
                                    if ws.send(Message::Text(text.into())).await.is_err() {
                                        break;
                                    }
                                },
                                Ok(WsCommand::Close) => {
                                    let _ = ws.close(None).await;
                                    break;
                                },
                                Err(_) => break,
                            },
                            frame = ws.next() => match frame {
                                Some(Ok(Message::Ping(p))) => {
                                    let _ = ws.send(Message::Pong(p)).await;
                                },
                                Some(Ok(Message::Close(_))) | None => break,
                                Some(Ok(_)) => {},
                                Some(Err(_)) => break,
                            },
                        }
                    }
                });
            }
        });

        Self {
            base_url,
            event_url,
            state,
            ws_tx,
            ws_connections,
        }
    }

    /// Push a raw event frame to every connected stream client.
    pub fn push_event(&self, event: JsonValue) {
        let _ = self.ws_tx.send(WsCommand::Frame(event.to_string()));
    }

    /// Close every connected stream client (simulates a network drop).
    pub fn drop_connections(&self) {
        let _ = self.ws_tx.send(WsCommand::Close);
    }

    /// Total stream connections accepted so far.
    pub fn connection_count(&self) -> usize {
        *self.ws_connections.borrow()
    }

    /// Wait until at least `count` stream connections were accepted.
    pub async fn wait_for_connections(&self, count: usize) {
        let mut rx = self.ws_connections.clone();
        tokio::time::timeout(Duration::from_secs(5), async {
            while *rx.borrow_and_update() < count {
                rx.changed().await.unwrap();
            }
        })
        .await
        .expect("timed out waiting for stream connections");
    }

    /// Make every mutation batch fail with HTTP 409.
    pub fn reject_mutations(&self, reject: bool) {
        self.state.lock().unwrap().reject_mutations = reject;
    }

    /// Stop emitting stream events for accepted mutations.
    pub fn suppress_events(&self, suppress: bool) {
        self.state.lock().unwrap().emit_events = !suppress;
    }

    /// Tag emitted events with monotonically increasing revisions, starting
    /// after `current`.
    pub fn enable_revisions(&self, current: u64) {
        self.state.lock().unwrap().revision_counter = Some(current);
    }

    /// Replace a table's rows directly, without emitting events.
    pub fn set_rows(&self, table: &str, rows: Vec<JsonValue>) {
        self.state.lock().unwrap().tables.insert(
            table.to_string(),
            rows.into_iter()
                .map(|v| v.as_object().unwrap().clone())
                .collect(),
        );
    }

    /// Current rows of a table as the server sees them.
    pub fn rows(&self, table: &str) -> Vec<JsonValue> {
        self.state.lock().unwrap().tables[table]
            .iter()
            .map(|r| JsonValue::Object(r.clone()))
            .collect()
    }
}

/// The pets schema used by most tests: composite text key, one extra column.
pub fn pets_introspection() -> JsonValue {
    let pk = |field: &str| {
        json!({
            "table": "pets", "field": field, "main": true, "type": "text",
            "dims": 0, "null": false, "info": null, "refs": [null, null]
        })
    };
    json!([
        pk("type"),
        pk("breed"),
        pk("name"),
        {
            "table": "pets", "field": "color", "main": false, "type": "int8",
            "dims": 0, "null": true, "info": null, "refs": [null, null]
        }
    ])
}

pub fn pet(ty: &str, breed: &str, name: &str, color: Option<i64>) -> JsonValue {
    json!({"type": ty, "breed": breed, "name": name, "color": color})
}

/// Poll `cond` until it holds or the timeout expires.
pub async fn wait_until<F: FnMut() -> bool>(mut cond: F, what: &str) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {}",
            what
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn handle_http(
    mut stream: TcpStream,
    state: Arc<Mutex<ServerState>>,
    events: broadcast::Sender<WsCommand>,
) {
    let Some((method, path, body)) = read_request(&mut stream).await else {
        return;
    };

    let (status, body) = {
        let mut state = state.lock().unwrap();
        route(&mut state, &events, &method, &path, &body)
    };
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}

fn route(
    state: &mut ServerState,
    events: &broadcast::Sender<WsCommand>,
    method: &str,
    path: &str,
    body: &str,
) -> (&'static str, String) {
    match (method, path) {
        ("GET", "/") => ("200 OK", state.introspection.to_string()),
        ("GET", p) if p.starts_with("/query/") => {
            let table = &p["/query/".len()..];
            match state.tables.get(table) {
                Some(rows) => ("200 OK", JsonValue::Array(
                    rows.iter().map(|r| JsonValue::Object(r.clone())).collect(),
                )
                .to_string()),
                None => ("404 Not Found", json!({"code": "not_found", "message": "no such table"}).to_string()),
            }
        },
        ("POST", p) if p.starts_with("/query/") => {
            let table = p["/query/".len()..].to_string();
            if state.reject_mutations {
                return (
                    "409 Conflict",
                    json!({"code": "conflict", "message": "batch rejected", "details": {"table": table}})
                        .to_string(),
                );
            }
            apply_batch(state, events, &table, body)
        },
        _ => ("404 Not Found", json!({"code": "not_found", "message": "no route"}).to_string()),
    }
}

/// Apply a mutation batch to the in-memory rows and emit one event per op.
fn apply_batch(
    state: &mut ServerState,
    events: &broadcast::Sender<WsCommand>,
    table: &str,
    body: &str,
) -> (&'static str, String) {
    let Ok(request) = serde_json::from_str::<JsonValue>(body) else {
        return ("400 Bad Request", json!({"code": "bad_request", "message": "invalid JSON"}).to_string());
    };
    let ops = request["ops"].as_array().cloned().unwrap_or_default();
    let mut results: Vec<JsonValue> = Vec::new();
    let mut emitted: Vec<JsonValue> = Vec::new();

    let rows = state.tables.entry(table.to_string()).or_default();
    for op in &ops {
        let action = op["action"].as_str().unwrap_or_default();
        match action {
            "create" => {
                let mut row = op["values"].as_object().cloned().unwrap_or_default();
                row.entry("color".to_string()).or_insert(JsonValue::Null);
                rows.push(row.clone());
                let row = JsonValue::Object(row);
                results.push(json!([row]));
                emitted.push(json!({"action": "create", "table": table, "rows": [row]}));
            },
            "update" => {
                let filter = op["filter"].as_object().cloned().unwrap_or_default();
                let values = op["values"].as_object().cloned().unwrap_or_default();
                let mut touched = Vec::new();
                let mut old = Vec::new();
                for row in rows.iter_mut() {
                    if filter.iter().all(|(k, v)| row.get(k) == Some(v)) {
                        old.push(JsonValue::Object(row.clone()));
                        for (k, v) in &values {
                            row.insert(k.clone(), v.clone());
                        }
                        touched.push(JsonValue::Object(row.clone()));
                    }
                }
                results.push(JsonValue::Array(touched.clone()));
                emitted.push(json!({
                    "action": "update", "table": table, "rows": touched, "old_rows": old
                }));
            },
            "delete" => {
                let filter = op["filter"].as_object().cloned().unwrap_or_default();
                let mut removed = Vec::new();
                rows.retain(|row| {
                    if filter.iter().all(|(k, v)| row.get(k) == Some(v)) {
                        removed.push(JsonValue::Object(row.clone()));
                        false
                    } else {
                        true
                    }
                });
                results.push(JsonValue::Array(removed.clone()));
                emitted.push(json!({"action": "delete", "table": table, "rows": removed}));
            },
            _ => {
                results.push(json!([]));
            },
        }
    }

    if state.emit_events {
        for mut event in emitted {
            if let Some(counter) = state.revision_counter.as_mut() {
                *counter += 1;
                event["revision"] = json!(*counter);
            }
            let _ = events.send(WsCommand::Frame(event.to_string()));
        }
    }
    ("200 OK", json!({ "results": results }).to_string())
}

/// Parse one HTTP/1.1 request: request line, headers, Content-Length body.
async fn read_request(stream: &mut TcpStream) -> Option<(String, String, String)> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    let header_end = loop {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = find_header_end(&buf) {
            break pos;
        }
        if buf.len() > 1 << 20 {
            return None;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = head.lines();
    let request_line = lines.next()?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next()?.to_string();
    let path = parts.next()?.to_string();

    let content_length = lines
        .filter_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())?
        })
        .next()
        .unwrap_or(0);

    let mut body = buf[header_end + 4..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }
    Some((method, path, String::from_utf8_lossy(&body).to_string()))
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}
