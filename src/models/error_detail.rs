use serde::{Deserialize, Serialize};

/// Error body returned by the remote API when it rejects a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Error code
    #[serde(default)]
    pub code: Option<String>,

    /// Human-readable error message
    #[serde(default)]
    pub message: Option<String>,

    /// Optional additional details
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}
