//! Provider capability and the error type shared by all providers.

use std::fmt;

use async_trait::async_trait;

/// One completion call: a system prompt, a user prompt and sampling options.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub temperature: f32,
}

/// A language model that answers a prompt with text.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Short provider label used in logs, e.g. `deepseek`.
    fn name(&self) -> &'static str;

    /// Model identifier recorded as provenance on generated code.
    fn model(&self) -> &str;

    /// Send one request and return the raw response text.
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError>;
}

/// Category of a provider failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// Connection, DNS or TLS failure.
    Transport,
    /// The HTTP request timed out.
    Timeout,
    /// Non-success HTTP status other than rate limiting.
    Api { status: u16 },
    /// Rate limited or out of quota (HTTP 429).
    Quota,
    /// The provider answered without any text.
    EmptyResponse,
    /// The response body did not have the expected shape.
    Malformed,
    /// The provider is not usable with the current configuration.
    Configuration,
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderErrorKind::Transport => f.write_str("transport"),
            ProviderErrorKind::Timeout => f.write_str("timeout"),
            ProviderErrorKind::Api { status } => write!(f, "api status {status}"),
            ProviderErrorKind::Quota => f.write_str("quota"),
            ProviderErrorKind::EmptyResponse => f.write_str("empty response"),
            ProviderErrorKind::Malformed => f.write_str("malformed response"),
            ProviderErrorKind::Configuration => f.write_str("configuration"),
        }
    }
}

/// A failed provider call.
#[derive(Debug, thiserror::Error)]
#[error("{provider} request failed ({kind}): {message}")]
pub struct ProviderError {
    pub provider: &'static str,
    pub kind: ProviderErrorKind,
    pub message: String,
}

impl ProviderError {
    pub fn new(provider: &'static str, kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            provider,
            kind,
            message: message.into(),
        }
    }

    /// Classify a `reqwest` error.
    pub(crate) fn from_reqwest(provider: &'static str, err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            ProviderErrorKind::Timeout
        } else if err.is_decode() {
            ProviderErrorKind::Malformed
        } else {
            ProviderErrorKind::Transport
        };
        // Strip the URL: Gemini carries the API key in the query string.
        Self::new(provider, kind, err.without_url().to_string())
    }

    pub(crate) fn from_status(provider: &'static str, status: u16, body: String) -> Self {
        let kind = if status == 429 {
            ProviderErrorKind::Quota
        } else {
            ProviderErrorKind::Api { status }
        };
        Self::new(provider, kind, body)
    }
}

// ---- shared HTTP helpers ----

/// Maximum number of response-body characters kept in an error message.
const MAX_ERROR_BODY_CHARS: usize = 2000;

/// Ensure the response has a success status code. Returns the response
/// unchanged on success, or an error carrying the status and body text.
pub(crate) async fn ensure_success(
    provider: &'static str,
    response: reqwest::Response,
) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());
        let body: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
        return Err(ProviderError::from_status(provider, status.as_u16(), body));
    }
    Ok(response)
}

/// Parse a successful JSON response body into the expected type.
pub(crate) async fn parse_response<T: serde::de::DeserializeOwned>(
    provider: &'static str,
    response: reqwest::Response,
) -> Result<T, ProviderError> {
    let response = ensure_success(provider, response).await?;
    response
        .json::<T>()
        .await
        .map_err(|e| ProviderError::from_reqwest(provider, e))
}
