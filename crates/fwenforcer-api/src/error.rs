use thiserror::Error;

use crate::types::ErrorReason;

/// Top-level error type for the `fwenforcer-api` crate.
///
/// Covers every failure mode of the compute and storage REST surfaces:
/// credentials, transport, structured HTTP errors, and operation polling.
/// `fwenforcer-core` classifies these into enforcement outcomes.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// Access token missing or not usable as a header value.
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// TLS setup or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── HTTP ────────────────────────────────────────────────────────
    /// Non-success response, parsed from the `{"error": {...}}` envelope
    /// when the body carries one.
    #[error("HTTP {status}: {message}")]
    Http {
        status: u16,
        message: String,
        reasons: Vec<ErrorReason>,
    },

    // ── Operations ──────────────────────────────────────────────────
    /// A global operation did not reach `DONE` within the allotted time.
    #[error("Operation {operation} did not complete within {timeout_secs}s")]
    OperationTimeout { operation: String, timeout_secs: u64 },

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },

    /// A `gs://` location that does not name a bucket and object.
    #[error("Invalid storage path: {0}")]
    InvalidStoragePath(String),
}

impl Error {
    /// HTTP status code, when the error came from a response.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::Http { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Returns `true` if this is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    /// Returns `true` if the project is gone or scheduled for deletion.
    ///
    /// The compute API answers 400 or 404 for projects that no longer
    /// exist, and 403 for projects pending deletion.
    pub fn is_project_deleted(&self) -> bool {
        let Self::Http {
            status, message, ..
        } = self
        else {
            return false;
        };
        match status {
            400 | 404 => {
                message.contains("Invalid value for project")
                    || message.contains("Failed to find project")
            }
            403 => message.contains("scheduled for deletion"),
            _ => false,
        }
    }

    /// Returns `true` if the compute API is not enabled for the project.
    pub fn is_api_disabled(&self) -> bool {
        let Self::Http {
            status,
            message,
            reasons,
        } = self
        else {
            return false;
        };
        if *status != 403 {
            return false;
        }
        if message.contains("has not been used") {
            return true;
        }
        !reasons.is_empty()
            && reasons.iter().all(|r| {
                r.domain.as_deref() == Some("usageLimits")
                    && r.reason.as_deref() == Some("accessNotConfigured")
            })
    }
}
