//! Error type shared by every store operation
//!
//! Read paths never hand these to callers: a failed fetch leaves the value
//! pending and is only logged. Errors surface from writes, registration and
//! configuration.

use thiserror::Error;

/// Top-level error type for `zukit-store-core`.
#[derive(Debug, Error)]
pub enum Error {
    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, timeout, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The endpoint answered with a non-success status.
    #[error("HTTP {status} from {path}: {body}")]
    Http {
        status: u16,
        path: String,
        body: String,
    },

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Response body was not valid JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Catch-all for transports that are not HTTP based (test doubles, etc.)
    #[error("Request failed: {0}")]
    Request(String),

    // ── Registry ────────────────────────────────────────────────────
    /// No store registered under this name.
    #[error("Unknown store: {0}")]
    UnknownStore(String),

    /// A store with this name is already registered.
    #[error("Store already registered: {0}")]
    DuplicateStore(String),

    /// The store was registered without setters.
    #[error("Store {0} is read-only")]
    ReadOnly(String),

    // ── Merge policy ────────────────────────────────────────────────
    /// A key has no rule in a merge policy without fallback.
    #[error("No merge rule for key {key:?}")]
    MergeGap { key: String },

    // ── Configuration ───────────────────────────────────────────────
    /// Invalid or incomplete configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Returns `true` if the remote side answered 404.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Transport(e) => e.status() == Some(reqwest::StatusCode::NOT_FOUND),
            Self::Http { status: 404, .. } => true,
            _ => false,
        }
    }

    /// Returns `true` if the error came from the network layer rather than
    /// from the store itself.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Http { .. } | Self::Json(_) | Self::Request(_)
        )
    }
}

/// Convenience alias used across the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;
