//! Per-table ordered application of change events.
//!
//! Every table gets its own tokio task fed by a bounded mpsc channel. The
//! event stream pushes decoded frames in arrival order and the task is the
//! only writer of that table's cache, so application order per table is the
//! stream's delivery order. User callbacks run on a dedicated notifier
//! thread behind a bounded queue: user code can delay other callbacks, but
//! never cache application and never shutdown.

use crate::entry::{Entry, EntryKey};
use crate::models::{ChangeAction, EventMessage};
use crate::store::{EntryStore, TableCache, Upsert};
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Commands queued per table, processed strictly in order.
pub(crate) enum TableCommand {
    /// Apply one change event incrementally.
    Apply(EventMessage),
    /// Replace the whole table contents (resync snapshot).
    Swap(BTreeMap<EntryKey, Arc<Entry>>),
}

/// One row's transition as seen by the change callback.
///
/// `previous` is `None` for a creation, `current` is `None` for a deletion,
/// and both are set for an update.
#[derive(Debug, Clone)]
pub struct EntryChange {
    /// The entry that was in the cache before the event, if any.
    pub previous: Option<Arc<Entry>>,
    /// The entry now in the cache, if any.
    pub current: Option<Arc<Entry>>,
}

/// Error type user callbacks may return; it is logged, never propagated.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

/// User callback invoked after a change event has been applied to the cache.
///
/// Fired at most once per received event frame, after the cache already
/// reflects the change. Returning an error logs a warning; the sync loop
/// keeps running.
pub type ChangeCallback =
    Arc<dyn Fn(ChangeAction, &str, &[EntryChange]) -> Result<(), CallbackError> + Send + Sync>;

type Notification = (ChangeAction, String, Vec<EntryChange>);

/// Fan-out of decoded events to one writer task per table.
pub(crate) struct Dispatcher {
    senders: std::collections::HashMap<String, mpsc::Sender<TableCommand>>,
    handles: Vec<JoinHandle<()>>,
    notifier: Option<Notifier>,
}

const TABLE_QUEUE_DEPTH: usize = 256;
const CALLBACK_QUEUE_DEPTH: usize = 256;
const CALLBACK_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

impl Dispatcher {
    /// Spawn one writer task per store table, plus the notifier thread when
    /// a callback is registered.
    pub(crate) fn spawn(store: &EntryStore, callback: Option<ChangeCallback>) -> Self {
        let notifier = callback.map(Notifier::spawn);
        let notify_tx = notifier.as_ref().map(|n| n.tx.clone());
        let mut senders = std::collections::HashMap::new();
        let mut handles = Vec::new();
        for cache in store.tables() {
            let (tx, rx) = mpsc::channel(TABLE_QUEUE_DEPTH);
            senders.insert(cache.name().to_string(), tx);
            let cache = Arc::clone(cache);
            handles.push(tokio::spawn(run_table(cache, notify_tx.clone(), rx)));
        }
        Self {
            senders,
            handles,
            notifier,
        }
    }

    /// Queue one event for its table. Events for unknown tables are dropped
    /// with a log line; the schema is fixed for the session.
    pub(crate) async fn dispatch(&self, event: EventMessage) {
        match self.senders.get(&event.table) {
            Some(tx) => {
                if tx.send(TableCommand::Apply(event)).await.is_err() {
                    log::warn!("table writer task gone, event dropped");
                }
            },
            None => {
                log::debug!("ignoring event for unknown table '{}'", event.table);
            },
        }
    }

    /// Queue a full-contents swap for one table (resync).
    pub(crate) async fn swap(&self, table: &str, contents: BTreeMap<EntryKey, Arc<Entry>>) {
        if let Some(tx) = self.senders.get(table) {
            if tx.send(TableCommand::Swap(contents)).await.is_err() {
                log::warn!("table writer task gone, swap for '{}' dropped", table);
            }
        }
    }

    /// Close all queues, wait for every writer task to drain and exit, then
    /// give the notifier a bounded window to deliver queued callbacks.
    ///
    /// A callback that never returns is abandoned after the deadline; no
    /// further callback fires once this method returns.
    pub(crate) async fn shutdown(mut self) {
        self.senders.clear();
        for handle in self.handles.drain(..) {
            if let Err(e) = handle.await {
                log::warn!("table writer task panicked: {}", e);
            }
        }
        if let Some(notifier) = self.notifier.take() {
            notifier.drain().await;
        }
    }
}

/// The callback's dedicated OS thread and its bounded feed queue.
struct Notifier {
    tx: std_mpsc::SyncSender<Notification>,
    stopped: Arc<AtomicBool>,
    done_rx: oneshot::Receiver<()>,
}

impl Notifier {
    fn spawn(callback: ChangeCallback) -> Self {
        let (tx, rx) = std_mpsc::sync_channel::<Notification>(CALLBACK_QUEUE_DEPTH);
        let stopped = Arc::new(AtomicBool::new(false));
        let (done_tx, done_rx) = oneshot::channel();
        let flag = Arc::clone(&stopped);
        let spawned = std::thread::Builder::new()
            .name("tablesync-notify".to_string())
            .spawn(move || {
                while let Ok((action, table, changes)) = rx.recv() {
                    if flag.load(Ordering::Acquire) {
                        continue;
                    }
                    if let Err(e) = callback(action, &table, &changes) {
                        log::warn!(
                            "change callback failed for table '{}' ({} {:?} changes): {}",
                            table,
                            changes.len(),
                            action,
                            e
                        );
                    }
                }
                let _ = done_tx.send(());
            });
        if let Err(e) = spawned {
            log::warn!("failed to spawn callback thread: {}", e);
        }
        Self {
            tx,
            stopped,
            done_rx,
        }
    }

    /// Wait for queued notifications to be delivered, up to the drain
    /// deadline, then stop further delivery.
    async fn drain(self) {
        let Self {
            tx,
            stopped,
            done_rx,
        } = self;
        drop(tx);
        if tokio::time::timeout(CALLBACK_DRAIN_TIMEOUT, done_rx).await.is_err() {
            stopped.store(true, Ordering::Release);
            log::warn!(
                "change callback did not drain within {:?}, abandoning it",
                CALLBACK_DRAIN_TIMEOUT
            );
        }
    }
}

async fn run_table(
    cache: Arc<TableCache>,
    notify_tx: Option<std_mpsc::SyncSender<Notification>>,
    mut rx: mpsc::Receiver<TableCommand>,
) {
    while let Some(command) = rx.recv().await {
        match command {
            TableCommand::Apply(event) => {
                let Some(note) = apply_event(&cache, event) else {
                    continue;
                };
                let Some(tx) = &notify_tx else {
                    continue;
                };
                match tx.try_send(note) {
                    Ok(()) => {},
                    Err(std_mpsc::TrySendError::Full((_, table, _))) => {
                        log::warn!(
                            "callback queue full, dropping notification for table '{}'",
                            table
                        );
                    },
                    Err(std_mpsc::TrySendError::Disconnected(_)) => {},
                }
            },
            TableCommand::Swap(contents) => {
                log::debug!(
                    "table '{}': swapping in snapshot of {} entries",
                    cache.name(),
                    contents.len()
                );
                cache.swap(contents);
            },
        }
    }
}

/// Apply one event to the cache, returning the notification to deliver.
///
/// Upserts that leave the cache structurally unchanged are dropped from the
/// change list; a mutation's direct response and its confirming stream event
/// describe the same row, and the second arrival must not re-notify.
fn apply_event(cache: &TableCache, event: EventMessage) -> Option<Notification> {
    let schema = Arc::clone(cache.schema());
    let mut changes = Vec::with_capacity(event.rows.len());

    for (i, row) in event.rows.iter().enumerate() {
        let entry = match Entry::from_row(&schema, row) {
            Ok(entry) => entry,
            Err(e) => {
                log::warn!("table '{}': skipping undecodable event row: {}", schema.name, e);
                continue;
            },
        };
        let key = match entry.key(&schema) {
            Ok(key) => key,
            Err(e) => {
                log::warn!("table '{}': skipping event row without key: {}", schema.name, e);
                continue;
            },
        };

        match event.action {
            ChangeAction::Create | ChangeAction::Update => {
                let entry = Arc::new(entry);
                match cache.upsert(key, Arc::clone(&entry)) {
                    Upsert::Inserted => changes.push(EntryChange {
                        previous: decode_old_row(&schema, &event.old_rows, i),
                        current: Some(entry),
                    }),
                    Upsert::Replaced(previous) => changes.push(EntryChange {
                        previous: Some(previous),
                        current: Some(entry),
                    }),
                    Upsert::Unchanged => {},
                }
            },
            ChangeAction::Delete => {
                if let Some(previous) = cache.remove(&key) {
                    changes.push(EntryChange {
                        previous: Some(previous),
                        current: None,
                    });
                }
            },
        }
    }

    // Deletes notify even when nothing was removed (the caller may be
    // tracking the server's view); creates and updates only notify when
    // the cache actually changed.
    let notify = !changes.is_empty() || event.action == ChangeAction::Delete;
    notify.then(|| (event.action, schema.name.clone(), changes))
}

/// Decode the matching `old_rows` element, when the server sent one.
fn decode_old_row(
    schema: &crate::schema::TableSchema,
    old_rows: &Option<Vec<JsonMap<String, JsonValue>>>,
    index: usize,
) -> Option<Arc<Entry>> {
    let row = old_rows.as_ref()?.get(index)?;
    match Entry::from_row(schema, row) {
        Ok(entry) => Some(Arc::new(entry)),
        Err(e) => {
            log::debug!("table '{}': ignoring undecodable old row: {}", schema.name, e);
            None
        },
    }
}
