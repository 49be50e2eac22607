//! HTTP transport implementation using `reqwest`.
//!
//! [`HttpTransport`] resolves endpoint paths against a configured base URL
//! and performs the uniform error translation the rest of the crate relies
//! on. No retries happen here; retry policy belongs to the match engine.
//!
//! # Feature gate
//!
//! Only available when the `transport-http` feature is enabled (it is
//! enabled by default).
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), duello_client::DuelloError> {
//! use duello_client::transport::{Method, Transport};
//! use duello_client::HttpTransport;
//!
//! let transport = HttpTransport::new("https://quiz.example.com");
//! let profile = transport
//!     .call(Method::Get, "/api/duello/profile/42", None, &[])
//!     .await?;
//! println!("profile: {profile}");
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use serde_json::Value;

use crate::error::DuelloError;
use crate::transport::{Method, Transport};

/// A [`Transport`] implementation backed by a shared `reqwest` client.
///
/// Cheap to clone; clones share the underlying connection pool.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    /// Create a transport with a default client and the given base URL.
    ///
    /// A trailing slash on the base URL is tolerated.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    /// Create a transport from a preconfigured client (custom timeouts,
    /// proxies, default headers).
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    /// The configured base URL, without a trailing slash.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        query: &[(&str, String)],
    ) -> Result<Value, DuelloError> {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!(%method, %url, "transport call");

        let mut request = match method {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url),
        };
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = &body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| DuelloError::Network(e.to_string()))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| DuelloError::Network(e.to_string()))?;

        if !status.is_success() {
            // Prefer the server-supplied message; fall back to the raw code.
            let message = serde_json::from_str::<Value>(&text)
                .ok()
                .as_ref()
                .and_then(|b| b.get("message").or_else(|| b.get("error")))
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| status.as_u16().to_string());
            return Err(DuelloError::Http {
                status: status.as_u16(),
                message,
            });
        }

        Ok(serde_json::from_str(&text)?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn base_url_trailing_slash_is_normalized() {
        let transport = HttpTransport::new("https://quiz.example.com/");
        assert_eq!(transport.base_url(), "https://quiz.example.com");
    }
}
