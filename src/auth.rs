//! Bearer-token authentication for the tablesync client.
//!
//! The token is an opaque string supplied by the caller; the client attaches
//! it unmodified to both the HTTP endpoints and the WebSocket upgrade and
//! never inspects or refreshes it.

use crate::error::{Result, SyncError};
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, AUTHORIZATION};

/// Authentication credentials for the remote API.
#[derive(Debug, Clone, Default)]
pub enum AuthProvider {
    /// Opaque bearer token, sent as `Authorization: Bearer <token>`.
    Bearer(String),

    /// No authentication (for unsecured local deployments).
    #[default]
    None,
}

impl AuthProvider {
    /// Create a bearer-token provider.
    pub fn bearer(token: impl Into<String>) -> Self {
        Self::Bearer(token.into())
    }

    /// No authentication.
    pub fn none() -> Self {
        Self::None
    }

    /// Check if credentials are configured.
    pub fn is_authenticated(&self) -> bool {
        !matches!(self, Self::None)
    }

    /// Attach the Authorization header to an HTTP request builder.
    pub fn apply_to_request(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self {
            Self::Bearer(token) => request.bearer_auth(token),
            Self::None => request,
        }
    }

    /// Attach the Authorization header to a WebSocket upgrade request.
    pub fn apply_to_ws_request(
        &self,
        request: &mut tokio_tungstenite::tungstenite::http::Request<()>,
    ) -> Result<()> {
        if let Self::Bearer(token) = self {
            let value = format!("Bearer {}", token);
            let header_value = HeaderValue::from_str(&value).map_err(|e| {
                SyncError::Configuration(format!(
                    "Invalid bearer token for Authorization header: {}",
                    e
                ))
            })?;
            request.headers_mut().insert(AUTHORIZATION, header_value);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_provider_creation() {
        let bearer = AuthProvider::bearer("tok");
        assert!(bearer.is_authenticated());

        let none = AuthProvider::none();
        assert!(!none.is_authenticated());
    }

    #[test]
    fn test_ws_header_attachment() {
        use tokio_tungstenite::tungstenite::client::IntoClientRequest;

        let mut request = "ws://localhost:4000/state".into_client_request().unwrap();
        AuthProvider::bearer("secret").apply_to_ws_request(&mut request).unwrap();
        assert_eq!(
            request.headers().get(AUTHORIZATION).unwrap().to_str().unwrap(),
            "Bearer secret"
        );
    }

    #[test]
    fn test_ws_header_rejects_control_chars() {
        use tokio_tungstenite::tungstenite::client::IntoClientRequest;

        let mut request = "ws://localhost:4000/state".into_client_request().unwrap();
        let result = AuthProvider::bearer("bad\ntoken").apply_to_ws_request(&mut request);
        assert!(result.is_err());
    }
}
