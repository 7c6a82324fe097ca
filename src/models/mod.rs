//! Wire models for the tablesync client.
//!
//! Request and response structures for the introspection, mutation and
//! event-stream endpoints.

pub mod change_action;
pub mod connection_options;
pub mod error_detail;
pub mod event_message;
pub mod introspection_row;
pub mod mutation_op;

pub use change_action::ChangeAction;
pub use connection_options::ConnectionOptions;
pub use error_detail::ErrorDetail;
pub use event_message::EventMessage;
pub use introspection_row::IntrospectionRow;
pub use mutation_op::{MutationOp, MutationRequest, MutationResponse};
