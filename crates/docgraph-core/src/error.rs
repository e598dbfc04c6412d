//! Error types shared by the indexing and retrieval pipelines.
//!
//! Two layers:
//!
//! - [`BackendError`] is what a collaborator (embedder, vector store, graph
//!   store, generator) returns. It only says whether the failure is worth
//!   retrying.
//! - [`RagError`] is what callers of the pipelines see. Every variant has a
//!   stable [`code`](RagError::code) and a short, backend-agnostic message.

use thiserror::Error;

/// Result alias for pipeline operations.
pub type Result<T> = std::result::Result<T, RagError>;

/// Longest reason string carried into a caller-visible error.
const MAX_REASON_LEN: usize = 160;

/// Caller-visible failure of an indexing or retrieval operation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RagError {
    #[error("Input is empty: {0}")]
    EmptyInput(String),

    #[error("Invalid options: {0}")]
    InvalidOptions(String),

    #[error("Embedding failed: {0}")]
    EmbeddingFailed(String),

    #[error("Vector search failed: {0}")]
    SearchFailed(String),

    #[error("Answer synthesis failed: {0}")]
    SynthesisFailed(String),

    #[error("Graph operation failed: {0}")]
    GraphFailed(String),

    #[error("Backend '{backend}' is temporarily unavailable: {reason}")]
    BackendUnavailable { backend: String, reason: String },

    #[error("Operation cancelled")]
    OperationCancelled,

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl RagError {
    /// Stable machine-readable code for this error kind.
    pub fn code(&self) -> &'static str {
        match self {
            Self::EmptyInput(_) => "E_EMPTY_INPUT",
            Self::InvalidOptions(_) => "E_INVALID_OPTIONS",
            Self::EmbeddingFailed(_) => "E_EMBEDDING_FAILED",
            Self::SearchFailed(_) => "E_SEARCH_FAILED",
            Self::SynthesisFailed(_) => "E_SYNTHESIS_FAILED",
            Self::GraphFailed(_) => "E_GRAPH_FAILED",
            Self::BackendUnavailable { .. } => "E_BACKEND_UNAVAILABLE",
            Self::OperationCancelled => "E_CANCELLED",
            Self::Unexpected(_) => "E_UNEXPECTED",
        }
    }

    /// Whether the caller may reasonably try the same request again later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::BackendUnavailable { .. })
    }

    pub fn unexpected(err: impl std::fmt::Display) -> Self {
        Self::Unexpected(short_reason(&err.to_string()))
    }
}

/// Failure reported by an external collaborator.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    /// Worth retrying: network errors, timeouts, rate limits, 5xx, busy locks.
    #[error("transient: {0}")]
    Transient(String),

    /// Retrying will not help: bad request, malformed response, bad data.
    #[error("rejected: {0}")]
    Rejected(String),
}

impl BackendError {
    pub fn transient(err: impl std::fmt::Display) -> Self {
        Self::Transient(err.to_string())
    }

    pub fn rejected(err: impl std::fmt::Display) -> Self {
        Self::Rejected(err.to_string())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// The underlying message, trimmed for display to callers.
    pub fn reason(&self) -> String {
        match self {
            Self::Transient(m) | Self::Rejected(m) => short_reason(m),
        }
    }
}

/// First line of `message`, bounded to a short length.
///
/// Backend errors can carry response bodies or SQL; callers only get this.
pub fn short_reason(message: &str) -> String {
    let line = message.lines().next().unwrap_or("").trim();
    if line.chars().count() <= MAX_REASON_LEN {
        return line.to_string();
    }
    let mut out: String = line.chars().take(MAX_REASON_LEN).collect();
    out.push('…');
    out
}
