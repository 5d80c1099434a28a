use thiserror::Error;

/// Top-level error type for the `switchboard-api` crate.
///
/// Covers every failure mode across the device transports:
/// HTTP, TLS, SSH CLI sessions, and payload decoding.
/// `switchboard-core` maps these into the orchestration error taxonomy.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// Credentials rejected by the device (HTTP 401, SSH auth failure).
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Request timed out.
    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// TLS handshake or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── Device responses ────────────────────────────────────────────
    /// Non-success HTTP status from a device REST endpoint.
    #[error("{operation} failed (HTTP {status}) at {url}: {message}")]
    Http {
        operation: &'static str,
        status: u16,
        url: String,
        message: String,
    },

    // ── CLI sessions ────────────────────────────────────────────────
    /// SSH session could not be established or was torn down.
    #[error("SSH session to {host} failed: {message}")]
    Session { host: String, message: String },

    /// Command batch ran but the remote side exited non-zero.
    #[error("Command batch on {host} exited with status {exit_code}: {output}")]
    CommandFailed {
        host: String,
        exit_code: i32,
        output: String,
    },

    /// Local I/O failure while driving a session process.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// HTTP status carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Returns `true` if the device refused the request with 403.
    ///
    /// Pooled-bridge switches answer 403 when the same physical port or
    /// tunnel number is already bound elsewhere.
    pub fn is_forbidden(&self) -> bool {
        self.status() == Some(403)
    }

    /// Returns `true` if this is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    /// Returns `true` if the device could not be reached at all.
    pub fn is_unreachable(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_connect() || e.is_timeout(),
            Self::Timeout { .. } | Self::Session { .. } => true,
            _ => false,
        }
    }

    /// Returns `true` if the session that produced this error must not be
    /// reused (auth failure, connection reset, dead SSH master, stalled
    /// command batch).
    pub fn is_session_fatal(&self) -> bool {
        match self {
            Self::Authentication { .. }
            | Self::Session { .. }
            | Self::Io(_)
            | Self::Timeout { .. } => true,
            Self::Transport(e) => e.is_connect() || e.is_request(),
            Self::Http { status, .. } => *status == 401,
            _ => false,
        }
    }

    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::Timeout { .. } => true,
            Self::Http { status, .. } => matches!(*status, 502..=504),
            _ => false,
        }
    }
}
