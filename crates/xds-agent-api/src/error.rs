use thiserror::Error;

/// Top-level error type for the `xds-agent-api` crate.
///
/// Covers every failure mode of the backend surfaces: HTTP transport,
/// REST error responses, the event socket, and payload decoding.
/// `xds-agent-core` maps these into domain errors.
#[derive(Debug, Error)]
pub enum Error {
    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// HTTP client could not be built.
    #[error("HTTP client setup failed: {0}")]
    ClientSetup(String),

    // ── Backend API ─────────────────────────────────────────────────
    /// Non-2xx answer from the backend REST API.
    #[error("Backend API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    // ── Event socket ────────────────────────────────────────────────
    /// WebSocket connection failed.
    #[error("WebSocket connection failed: {0}")]
    WebSocketConnect(String),

    /// Emit attempted on a socket whose reader task is gone.
    #[error("Event socket closed")]
    SocketClosed,

    /// Event name outside the closed set the agent understands.
    #[error("Unknown event: {name}")]
    UnknownEvent { name: String },

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` when the backend could not be reached at all.
    ///
    /// The connection layer uses this to flip a server to disconnected.
    pub fn is_connection_refused(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_connect(),
            _ => false,
        }
    }

    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::WebSocketConnect(_) | Self::SocketClosed => true,
            _ => false,
        }
    }

    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}
