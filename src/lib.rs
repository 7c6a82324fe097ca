//! Schema-aware, event-synchronized client cache for auto-generated
//! relational REST APIs.
//!
//! `tablesync` mirrors the tables of a remote API into local memory and
//! keeps the mirror current by following the server's change-event stream:
//!
//! - **Schema introspection**: the table layout, field types and primary
//!   keys are discovered at connect time, never hardcoded.
//! - **Typed entries**: raw JSON rows are coerced into [`Value`]s by their
//!   declared column types; entries are immutable snapshots shared as
//!   `Arc<Entry>`.
//! - **Ordered application**: each table has a single writer applying
//!   events in stream order; reads are synchronous and non-blocking.
//! - **Batched mutations**: writes are queued per table and submitted as
//!   one all-or-nothing request; the cache catches up via the stream.
//! - **Self-healing**: keepalive pings, reconnection with exponential
//!   backoff, revision gap detection and periodic full resync.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use tablesync::{SyncClient, SnapshotFilter};
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut client = SyncClient::builder()
//!     .base_url("http://localhost:8080")
//!     .build()?;
//! client.connect().await?;
//!
//! let pets = client.table("pets")?;
//! let batch = pets
//!     .batch()
//!     .create(json!({"type": "Dog", "breed": "Shiba Inu", "name": "Munch"}));
//! let results = batch.submit().await?;
//! println!("created {} row(s)", results[0].len());
//!
//! for pet in pets.snapshot(&SnapshotFilter::field_eq("type", "Dog")) {
//!     println!("{}", pet.to_json());
//! }
//! client.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod client;
pub mod dispatcher;
pub mod entry;
pub mod error;
pub mod event_handlers;
pub mod models;
pub mod mutation;
pub mod schema;
pub mod store;
mod subscriber;
pub mod table;
pub mod timeouts;
pub mod value;

pub use auth::AuthProvider;
pub use client::{SyncClient, SyncClientBuilder};
pub use dispatcher::{CallbackError, ChangeCallback, EntryChange};
pub use entry::{Entry, EntryKey, SnapshotFilter};
pub use error::{Result, SyncError};
pub use event_handlers::{ConnectionError, DisconnectReason, EventHandlers};
pub use models::{ChangeAction, ConnectionOptions, EventMessage, IntrospectionRow};
pub use mutation::{MutationBatch, PendingHandle, PendingState};
pub use schema::{Field, FieldRef, Schema, TableSchema};
pub use store::{EntryStore, TableCache};
pub use table::Table;
pub use timeouts::{SyncTimeouts, SyncTimeoutsBuilder};
pub use value::{PgType, Value};
