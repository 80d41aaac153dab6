//! Completion service error types.

use thiserror::Error;

/// Errors returned by a [`CompletionClient`](super::CompletionClient).
#[derive(Error, Debug)]
pub enum CompletionError {
    /// The service rejected the credential (HTTP 401/403).
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// The service is rate limiting this client (HTTP 429).
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// The service refused the request, including when it cannot produce
    /// valid structured output.
    #[error("service error (HTTP {status}): {body}")]
    Service { status: u16, body: String },

    /// The response body was not a chat completion.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The response contained no choices.
    #[error("no completion choices returned")]
    EmptyChoices,

    #[error("request timed out")]
    Timeout,

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}
