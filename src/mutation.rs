//! Batched mutation pipeline.
//!
//! Mutations never touch the local cache directly. A batch is submitted as
//! one HTTP request, the server applies it all-or-nothing, and the cache
//! catches up through the event stream (plus the direct response, which the
//! store absorbs idempotently). Each queued operation carries a handle the
//! caller can await for its individual result.

use crate::auth::AuthProvider;
use crate::entry::Entry;
use crate::error::{Result, SyncError};
use crate::models::{ChangeAction, ErrorDetail, MutationOp, MutationRequest, MutationResponse};
use crate::schema::TableSchema;
use log::{debug, warn};
use serde_json::Value as JsonValue;
use std::sync::{Arc, Mutex};
use tokio::sync::{oneshot, watch};

/// Shared HTTP context handed to tables and their batches.
#[derive(Clone)]
pub(crate) struct RequestContext {
    pub(crate) base_url: String,
    pub(crate) query_path: String,
    pub(crate) http_client: reqwest::Client,
    pub(crate) auth: AuthProvider,
    pub(crate) stop: watch::Receiver<bool>,
}

impl RequestContext {
    pub(crate) fn table_url(&self, table: &str) -> String {
        format!("{}{}/{}", self.base_url, self.query_path, table)
    }
}

/// Lifecycle of one queued operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingState {
    /// Queued in a batch, not yet sent.
    Queued,
    /// Sent to the server, awaiting the response.
    Submitted,
    /// Confirmed by the server.
    Resolved,
    /// Rejected by the server (the whole batch was rolled back).
    Rejected,
    /// The client stopped before a response arrived.
    Cancelled,
}

/// Handle to one queued operation's outcome.
///
/// [`wait`](PendingHandle::wait) resolves to the rows the server reports as
/// written by this operation. Dropping the handle does not cancel anything;
/// the batch result is still available from
/// [`MutationBatch::submit`].
#[derive(Debug)]
pub struct PendingHandle {
    table: String,
    index: usize,
    action: ChangeAction,
    state: Arc<Mutex<PendingState>>,
    rx: oneshot::Receiver<Result<Vec<Arc<Entry>>>>,
}

impl PendingHandle {
    /// The table this operation targets.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Zero-based position of this operation in its batch.
    pub fn index(&self) -> usize {
        self.index
    }

    /// The action this operation performs.
    pub fn action(&self) -> ChangeAction {
        self.action
    }

    /// Current lifecycle state.
    pub fn state(&self) -> PendingState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Wait for this operation's result.
    pub async fn wait(self) -> Result<Vec<Arc<Entry>>> {
        match self.rx.await {
            Ok(result) => result,
            // Sender dropped without resolving: the client shut down.
            Err(_) => Err(SyncError::Cancelled),
        }
    }
}

struct PendingSlot {
    state: Arc<Mutex<PendingState>>,
    tx: oneshot::Sender<Result<Vec<Arc<Entry>>>>,
}

impl PendingSlot {
    fn set_state(&self, state: PendingState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }
}

/// A chainable batch of mutations against one table.
///
/// Created by [`Table::batch`](crate::Table::batch). Operations accumulate
/// locally; nothing is sent until [`submit`](MutationBatch::submit).
pub struct MutationBatch {
    table: Arc<TableSchema>,
    context: RequestContext,
    ops: Vec<MutationOp>,
    slots: Vec<PendingSlot>,
    handles: Vec<PendingHandle>,
    invalid: Option<String>,
}

impl MutationBatch {
    pub(crate) fn new(table: Arc<TableSchema>, context: RequestContext) -> Self {
        Self {
            table,
            context,
            ops: Vec::new(),
            slots: Vec::new(),
            handles: Vec::new(),
            invalid: None,
        }
    }

    /// Queue a row creation.
    ///
    /// `values` must be a JSON object of column values.
    pub fn create(mut self, values: JsonValue) -> Self {
        match values {
            JsonValue::Object(values) => self.push(MutationOp::Create { values }),
            other => self.mark_invalid("create", &other),
        }
        self
    }

    /// Queue an update of every row matching `filter`.
    ///
    /// Both arguments must be JSON objects: equality conditions and the
    /// column values to apply.
    pub fn update(mut self, filter: JsonValue, values: JsonValue) -> Self {
        match (filter, values) {
            (JsonValue::Object(filter), JsonValue::Object(values)) => {
                self.push(MutationOp::Update { filter, values });
            },
            (JsonValue::Object(_), other) | (other, _) => self.mark_invalid("update", &other),
        }
        self
    }

    /// Queue a deletion of every row matching `filter`.
    pub fn delete(mut self, filter: JsonValue) -> Self {
        match filter {
            JsonValue::Object(filter) => self.push(MutationOp::Delete { filter }),
            other => self.mark_invalid("delete", &other),
        }
        self
    }

    /// Number of queued operations.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// True when no operations are queued.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Take the per-operation handles queued so far.
    ///
    /// Handles are in queue order. Call before [`submit`](Self::submit);
    /// awaiting a handle resolves once the batch response arrives.
    pub fn handles(&mut self) -> Vec<PendingHandle> {
        std::mem::take(&mut self.handles)
    }

    fn push(&mut self, op: MutationOp) {
        let state = Arc::new(Mutex::new(PendingState::Queued));
        let (tx, rx) = oneshot::channel();
        self.handles.push(PendingHandle {
            table: self.table.name.clone(),
            index: self.ops.len(),
            action: op.action(),
            state: Arc::clone(&state),
            rx,
        });
        self.slots.push(PendingSlot { state, tx });
        self.ops.push(op);
    }

    fn mark_invalid(&mut self, op: &str, value: &JsonValue) {
        if self.invalid.is_none() {
            self.invalid = Some(format!(
                "{} on table '{}' requires a JSON object, got {}",
                op, self.table.name, json_kind(value)
            ));
        }
    }

    /// Submit the batch as one all-or-nothing request.
    ///
    /// On success, returns the written rows per operation in queue order and
    /// resolves every handle with its slice. On rejection, every handle is
    /// rejected and the cache is untouched. An empty batch is a no-op.
    pub async fn submit(mut self) -> Result<Vec<Vec<Arc<Entry>>>> {
        if let Some(message) = self.invalid.take() {
            let err = SyncError::Configuration(message);
            self.fail_all(&err);
            return Err(err);
        }
        if self.ops.is_empty() {
            return Ok(Vec::new());
        }

        let mut stop = self.context.stop.clone();
        if *stop.borrow() {
            let err = SyncError::Cancelled;
            self.cancel_all();
            return Err(err);
        }

        for slot in &self.slots {
            slot.set_state(PendingState::Submitted);
        }

        let url = self.context.table_url(&self.table.name);
        let request = MutationRequest {
            ops: std::mem::take(&mut self.ops),
        };
        debug!(
            "submitting batch of {} ops to {}",
            request.ops.len(),
            url
        );

        let req = self
            .context
            .auth
            .apply_to_request(self.context.http_client.post(&url).json(&request));

        let response = tokio::select! {
            biased;
            _ = stop.changed() => {
                self.cancel_all();
                return Err(SyncError::Cancelled);
            }
            result = req.send() => match result {
                Ok(response) => response,
                Err(e) => {
                    let err = SyncError::from(e);
                    self.fail_all(&err);
                    return Err(err);
                },
            },
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail: ErrorDetail = serde_json::from_str(&body).unwrap_or(ErrorDetail {
                code: None,
                message: None,
                details: None,
            });
            let err = SyncError::Mutation {
                status: status.as_u16(),
                message: detail
                    .message
                    .or(detail.code)
                    .unwrap_or_else(|| body.trim().to_string()),
                detail: detail.details,
            };
            warn!(
                "batch rejected by table '{}': status={} {}",
                self.table.name, status, err
            );
            self.fail_all(&err);
            return Err(err);
        }

        let decoded: MutationResponse = match response.json().await {
            Ok(decoded) => decoded,
            Err(e) => {
                let err = SyncError::from(e);
                self.fail_all(&err);
                return Err(err);
            },
        };
        if decoded.results.len() != request.ops.len() {
            let err = SyncError::Decode(format!(
                "batch response for table '{}' has {} result sets for {} ops",
                self.table.name,
                decoded.results.len(),
                request.ops.len()
            ));
            self.fail_all(&err);
            return Err(err);
        }

        let mut results = Vec::with_capacity(decoded.results.len());
        for rows in &decoded.results {
            let mut entries = Vec::with_capacity(rows.len());
            for row in rows {
                match Entry::from_row(&self.table, row) {
                    Ok(entry) => entries.push(Arc::new(entry)),
                    Err(e) => {
                        self.fail_all(&e);
                        return Err(e);
                    },
                }
            }
            results.push(entries);
        }

        for (slot, entries) in self.slots.drain(..).zip(results.iter()) {
            slot.set_state(PendingState::Resolved);
            let _ = slot.tx.send(Ok(entries.clone()));
        }
        Ok(results)
    }

    fn fail_all(&mut self, err: &SyncError) {
        for slot in self.slots.drain(..) {
            slot.set_state(PendingState::Rejected);
            let _ = slot.tx.send(Err(clone_error(err)));
        }
    }

    fn cancel_all(&mut self) {
        for slot in self.slots.drain(..) {
            slot.set_state(PendingState::Cancelled);
            let _ = slot.tx.send(Err(SyncError::Cancelled));
        }
    }
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "an array",
        JsonValue::Object(_) => "an object",
    }
}

/// Rebuild an error for per-handle delivery; `SyncError` owns no shared state
/// worth preserving beyond its message.
fn clone_error(err: &SyncError) -> SyncError {
    match err {
        SyncError::Configuration(m) => SyncError::Configuration(m.clone()),
        SyncError::Schema(m) => SyncError::Schema(m.clone()),
        SyncError::Decode(m) => SyncError::Decode(m.clone()),
        SyncError::Connection(m) => SyncError::Connection(m.clone()),
        SyncError::Timeout(m) => SyncError::Timeout(m.clone()),
        SyncError::Mutation {
            status,
            message,
            detail,
        } => SyncError::Mutation {
            status: *status,
            message: message.clone(),
            detail: detail.clone(),
        },
        SyncError::Cancelled => SyncError::Cancelled,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::IntrospectionRow;
    use crate::schema::Schema;
    use serde_json::json;

    fn pets_schema() -> Arc<TableSchema> {
        let rows = ["type", "breed", "name"]
            .iter()
            .map(|f| IntrospectionRow {
                table: "pets".to_string(),
                field: f.to_string(),
                main: true,
                type_name: "text".to_string(),
                dims: 0,
                null: false,
                info: None,
                refs: (None, None),
            })
            .collect();
        Schema::from_rows(rows).unwrap().table("pets").unwrap().clone()
    }

    fn context(stop: watch::Receiver<bool>) -> RequestContext {
        RequestContext {
            base_url: "http://127.0.0.1:9".to_string(),
            query_path: "/query".to_string(),
            http_client: reqwest::Client::new(),
            auth: AuthProvider::none(),
            stop,
        }
    }

    #[test]
    fn test_batch_accumulates_ops_in_order() {
        let (_tx, rx) = watch::channel(false);
        let mut batch = MutationBatch::new(pets_schema(), context(rx))
            .create(json!({"type": "Fish", "breed": "Koi", "name": "Aqui"}))
            .update(json!({"name": "Aqui"}), json!({"breed": "Goldfish"}))
            .delete(json!({"type": "Fish"}));

        assert_eq!(batch.len(), 3);
        let handles = batch.handles();
        let actions: Vec<ChangeAction> = handles.iter().map(|h| h.action()).collect();
        assert_eq!(
            actions,
            vec![ChangeAction::Create, ChangeAction::Update, ChangeAction::Delete]
        );
        for (i, handle) in handles.iter().enumerate() {
            assert_eq!(handle.table(), "pets");
            assert_eq!(handle.index(), i);
            assert_eq!(handle.state(), PendingState::Queued);
        }
    }

    #[tokio::test]
    async fn test_non_object_values_fail_the_batch() {
        let (_tx, rx) = watch::channel(false);
        let mut batch = MutationBatch::new(pets_schema(), context(rx)).create(json!("not an object"));
        let handles = batch.handles();
        let err = batch.submit().await.unwrap_err();
        assert!(matches!(err, SyncError::Configuration(_)));
        for handle in handles {
            assert!(handle.wait().await.is_err());
        }
    }

    #[tokio::test]
    async fn test_empty_batch_is_a_noop() {
        let (_tx, rx) = watch::channel(false);
        let batch = MutationBatch::new(pets_schema(), context(rx));
        assert!(batch.is_empty());
        assert_eq!(batch.submit().await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_submit_after_stop_cancels_all_handles() {
        let (tx, rx) = watch::channel(false);
        tx.send(true).ok();
        let mut batch = MutationBatch::new(pets_schema(), context(rx))
            .create(json!({"type": "Dog", "breed": "Shiba Inu", "name": "Munch"}));
        let handles = batch.handles();

        let err = batch.submit().await.unwrap_err();
        assert!(matches!(err, SyncError::Cancelled));
        for handle in handles {
            assert_eq!(handle.state(), PendingState::Cancelled);
            assert!(matches!(handle.wait().await, Err(SyncError::Cancelled)));
        }
    }
}
