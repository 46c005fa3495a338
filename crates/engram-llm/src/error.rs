//! Unified error type for completion, codec, and orchestration failures.
//!
//! Every adapter maps its native failures into [`LlmError`], so callers
//! match on one type regardless of which backend produced the stream.
//!
//! Failures fall into a few families:
//!
//! | Family | Variants |
//! |--------|----------|
//! | Transport | [`Http`](LlmError::Http), [`Timeout`](LlmError::Timeout) |
//! | Request | [`Auth`](LlmError::Auth), [`InvalidRequest`](LlmError::InvalidRequest), [`UnknownModel`](LlmError::UnknownModel) |
//! | Provider | [`Provider`](LlmError::Provider) |
//! | Decode | [`ResponseFormat`](LlmError::ResponseFormat), [`SchemaValidation`](LlmError::SchemaValidation) |
//! | Contract | [`Contract`](LlmError::Contract) |
//!
//! Unknown tools and argument validation failures are deliberately *not*
//! here: they surface as [`ToolFailure`](crate::tool::ToolFailure) values so
//! a conversation can carry on with an explanatory tool message.
//!
//! # Retryability
//!
//! Nothing in this workspace retries. Callers wrap whole completion
//! invocations and consult [`LlmError::is_retryable`]:
//!
//! ```rust
//! use engram_llm::LlmError;
//!
//! fn should_retry(err: &LlmError) -> bool {
//!     err.is_retryable()
//! }
//!
//! assert!(should_retry(&LlmError::Timeout { elapsed_ms: 30_000 }));
//! assert!(!should_retry(&LlmError::Auth("revoked".into())));
//! ```

use serde_json::Value;

/// The unified error type returned by completion services.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum LlmError {
    /// An HTTP-level failure: connection refused, non-success status, or a
    /// stream that broke off before its terminal frame.
    ///
    /// `status` is `None` when no response status was received.
    #[error("HTTP error (status={status:?}): {message}")]
    Http {
        /// The HTTP status code, if one was received.
        status: Option<http::StatusCode>,
        /// A human-readable description of the failure.
        message: String,
        /// Whether the caller may retry the whole invocation.
        retryable: bool,
    },

    /// The API key or token was rejected.
    #[error("Authentication error: {0}")]
    Auth(String),

    /// The request could not be built or was rejected as malformed.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// An error reported in-band by the provider.
    #[error("Provider error ({code}): {message}")]
    Provider {
        /// Provider-defined error code (e.g. `"overloaded_error"`).
        code: String,
        /// Human-readable error description.
        message: String,
        /// Whether the caller may retry the whole invocation.
        retryable: bool,
    },

    /// A provider frame, stream line, or embedded tool-call block could not
    /// be decoded.
    #[error("Response format error: {message}")]
    ResponseFormat {
        /// What went wrong during decoding.
        message: String,
        /// The offending raw text, for diagnostics.
        raw: String,
    },

    /// A value failed JSON Schema validation.
    #[error("Schema validation error: {message}")]
    SchemaValidation {
        /// Concatenated validation error messages.
        message: String,
        /// The schema the value was validated against.
        schema: Value,
        /// The value that failed validation.
        actual: Value,
    },

    /// The operation exceeded its transport deadline.
    #[error("Operation timed out after {elapsed_ms}ms")]
    Timeout {
        /// Milliseconds elapsed before the timeout fired.
        elapsed_ms: u64,
    },

    /// No completion service is registered under the requested model id.
    #[error("model {0} not found")]
    UnknownModel(String),

    /// A completion stream broke the `Text* [ToolCalls] End` contract, or a
    /// derived helper received an event it cannot represent (tool calls in
    /// batch mode, text in tool-only mode).
    #[error("Completion contract violated: {0}")]
    Contract(String),
}

impl LlmError {
    /// Returns `true` if the error is transient and a fresh invocation may
    /// succeed.
    ///
    /// ```rust
    /// use engram_llm::LlmError;
    ///
    /// let err = LlmError::Timeout { elapsed_ms: 5000 };
    /// assert!(err.is_retryable());
    ///
    /// let err = LlmError::Contract("text after end".into());
    /// assert!(!err.is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http { retryable, .. } | Self::Provider { retryable, .. } => *retryable,
            Self::Timeout { .. } => true,
            _ => false,
        }
    }

    /// Shorthand for a [`ResponseFormat`](Self::ResponseFormat) error.
    pub fn decode(message: impl Into<String>, raw: impl Into<String>) -> Self {
        Self::ResponseFormat {
            message: message.into(),
            raw: raw.into(),
        }
    }

    /// Error for a byte stream that ended before the provider's terminal frame.
    pub fn truncated(provider: &str) -> Self {
        Self::Http {
            status: None,
            message: format!("{provider} stream ended before completion"),
            retryable: true,
        }
    }
}

impl From<serde_json::Error> for LlmError {
    fn from(err: serde_json::Error) -> Self {
        Self::ResponseFormat {
            message: err.to_string(),
            raw: String::new(),
        }
    }
}

/// Maps a non-success HTTP status and its (already extracted) error message
/// to an [`LlmError`].
///
/// 401/403 are authentication failures, 400 is a rejected request, and
/// 429/500/502/503 are retryable transport errors.
pub fn from_status(status: http::StatusCode, message: String) -> LlmError {
    if status == http::StatusCode::UNAUTHORIZED || status == http::StatusCode::FORBIDDEN {
        return LlmError::Auth(message);
    }

    if status == http::StatusCode::BAD_REQUEST {
        return LlmError::InvalidRequest(message);
    }

    let retryable = matches!(status.as_u16(), 429 | 500 | 502 | 503);

    LlmError::Http {
        status: Some(status),
        message,
        retryable,
    }
}
