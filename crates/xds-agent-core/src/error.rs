// ── Core error types ──
//
// Domain errors of the agent core. Callers never see raw reqwest or
// serde errors: the `From<xds_agent_api::Error>` impl folds transport and
// payload failures into connection and protocol variants.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot connect to XDS server at {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("XDS server {server} is not connected")]
    ServerDisconnected { server: String },

    #[error("XDS server {server} is disabled")]
    ServerDisabled { server: String },

    #[error("Event socket not established")]
    SocketNotEstablished,

    // ── Protocol errors ──────────────────────────────────────────────
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    #[error("Unsupported event type: {name}")]
    UnknownEvent { name: String },

    #[error("XDS server error{}: {message}", .status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    Backend { status: Option<u16>, message: String },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("{field} not set")]
    MissingField { field: &'static str },

    #[error("Project ID already exists: {id}")]
    DuplicateProjectId { id: String },

    #[error("Unknown server id: {id}")]
    UnknownServer { id: String },

    #[error("Project type not supported: {project_type}")]
    UnsupportedProjectType { project_type: String },

    #[error("Cloud sync engine not available")]
    SyncEngineUnavailable,

    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Lookup errors ────────────────────────────────────────────────
    #[error("Unknown id: {id}")]
    ProjectNotFound { id: String },

    #[error("Multiple IDs found with provided prefix: {prefix}")]
    AmbiguousProjectId { prefix: String },

    // ── Command table errors ─────────────────────────────────────────
    #[error("Command id already exists: {id}")]
    DuplicateCommand { id: String },

    #[error("Unknown command id: {id}")]
    UnknownCommand { id: String },

    // ── Sync errors ──────────────────────────────────────────────────
    #[error("Sync integrity check failed: {message}")]
    SyncIntegrity { message: String },

    #[error("Sync engine error: {message}")]
    SyncEngine { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("IO error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Multiple errors: {}", .0.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "))]
    Multiple(Vec<CoreError>),
}

impl CoreError {
    /// Returns `true` for errors raised while validating user input,
    /// before anything was pushed to a server.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::MissingField { .. }
                | Self::DuplicateProjectId { .. }
                | Self::UnknownServer { .. }
                | Self::ServerDisabled { .. }
                | Self::UnsupportedProjectType { .. }
                | Self::SyncEngineUnavailable
                | Self::Config { .. }
        )
    }

    /// Returns `true` if the server could not be reached.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed { .. } | Self::ServerDisconnected { .. }
        )
    }

    pub(crate) fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<xds_agent_api::Error> for CoreError {
    fn from(err: xds_agent_api::Error) -> Self {
        match err {
            xds_agent_api::Error::Transport(ref e) => {
                if e.is_connect() || e.is_timeout() {
                    CoreError::ConnectionFailed {
                        url: e
                            .url()
                            .map(ToString::to_string)
                            .unwrap_or_else(|| "<unknown>".into()),
                        reason: e.to_string(),
                    }
                } else {
                    CoreError::Backend {
                        status: e.status().map(|s| s.as_u16()),
                        message: e.to_string(),
                    }
                }
            }
            xds_agent_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            xds_agent_api::Error::ClientSetup(message) => CoreError::Config { message },
            xds_agent_api::Error::Api { status, message } => CoreError::Backend {
                status: Some(status),
                message,
            },
            xds_agent_api::Error::WebSocketConnect(reason) => CoreError::ConnectionFailed {
                url: String::new(),
                reason,
            },
            xds_agent_api::Error::SocketClosed => CoreError::SocketNotEstablished,
            xds_agent_api::Error::UnknownEvent { name } => CoreError::UnknownEvent { name },
            xds_agent_api::Error::Deserialization { message, .. } => {
                CoreError::Protocol { message }
            }
        }
    }
}
