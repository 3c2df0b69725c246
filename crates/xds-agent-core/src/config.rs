// ── Runtime connection configuration ──
//
// These types describe *how* to reach one XDS server. They never touch
// disk: the agent binary loads its config file and hands these in.

use std::time::Duration;

use url::Url;

/// Background reconnection schedule after an event socket loss.
///
/// The wait starts at `initial_delay` and is multiplied by `growth_factor`
/// every `attempts_per_step` failed attempts. Reconnection gives up once
/// the cumulative wait would exceed `max_total_wait`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Default: 1s.
    pub initial_delay: Duration,
    /// Default: 5.
    pub growth_factor: u32,
    /// Default: 60.
    pub attempts_per_step: u32,
    /// Default: 15 minutes.
    pub max_total_wait: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            growth_factor: 5,
            attempts_per_step: 60,
            max_total_wait: Duration::from_secs(15 * 60),
        }
    }
}

/// Configuration for connecting to a single XDS server.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Server base URL (e.g., `http://localhost:8000`).
    pub url: Url,
    /// Event socket URL. Derived from `url` when unset.
    pub socket_url: Option<Url>,
    /// Local route prefix under which passthrough routes are mounted.
    pub api_prefix: String,
    /// Handshake attempts made by `connect()` before giving up.
    pub conn_retry: u32,
    /// Spacing between handshake attempts.
    pub retry_interval: Duration,
    pub reconnect: ReconnectConfig,
    /// HTTP request timeout.
    pub timeout: Duration,
    /// Agent session id announced to the server.
    pub agent_sid: Option<String>,
}

impl ConnectionConfig {
    /// Defaults for a server at `url` mounted under `api_prefix`.
    pub fn new(url: Url, api_prefix: impl Into<String>) -> Self {
        Self {
            url,
            socket_url: None,
            api_prefix: api_prefix.into(),
            conn_retry: 10,
            retry_interval: Duration::from_secs(1),
            reconnect: ReconnectConfig::default(),
            timeout: Duration::from_secs(30),
            agent_sid: None,
        }
    }
}
