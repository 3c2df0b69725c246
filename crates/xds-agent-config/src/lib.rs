//! Configuration for the XDS agent.
//!
//! TOML file + `XDS_AGENT_*` environment overrides, and translation into
//! the runtime `xds_agent_core::ConnectionConfig` of each XDS server.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use xds_agent_core::{ConnectionConfig, ReconnectConfig};

/// Environment variable prefix. Nested keys are separated by `__`,
/// e.g. `XDS_AGENT_SYNCTHING__HOME`.
pub const ENV_PREFIX: &str = "XDS_AGENT_";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level agent configuration file.
#[derive(Debug, Deserialize, Serialize)]
pub struct AgentFileConfig {
    /// Agent identity written into PathMap marker files. A random one is
    /// generated at startup when unset.
    pub agent_uid: Option<String>,

    /// Port of the local UI-facing HTTP server.
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Directory for log files.
    pub logs_dir: Option<PathBuf>,

    /// XDS servers to connect to, in order.
    #[serde(default = "default_servers")]
    pub servers: Vec<ServerEntry>,

    /// Background reconnection schedule shared by every server.
    #[serde(default)]
    pub reconnect: ReconnectEntry,

    /// Local sync engine; CloudSync projects need it.
    pub syncthing: Option<SyncthingConfig>,
}

impl Default for AgentFileConfig {
    fn default() -> Self {
        Self {
            agent_uid: None,
            http_port: default_http_port(),
            logs_dir: None,
            servers: default_servers(),
            reconnect: ReconnectEntry::default(),
            syncthing: None,
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ServerEntry {
    /// Server base URL (e.g., "http://localhost:8000").
    pub url: String,

    /// Handshake attempts before the server is marked failed.
    #[serde(default = "default_conn_retry")]
    pub conn_retry: u32,

    /// Event socket URL, when not reachable at the base URL.
    pub socket_url: Option<String>,

    /// HTTP request timeout (e.g., "30s").
    pub timeout: Option<String>,
}

/// Durations are humantime strings ("1s", "15m").
#[derive(Debug, Deserialize, Serialize)]
pub struct ReconnectEntry {
    #[serde(default = "default_initial_delay")]
    pub initial_delay: String,

    #[serde(default = "default_growth_factor")]
    pub growth_factor: u32,

    #[serde(default = "default_attempts_per_step")]
    pub attempts_per_step: u32,

    #[serde(default = "default_max_total_wait")]
    pub max_total_wait: String,
}

impl Default for ReconnectEntry {
    fn default() -> Self {
        Self {
            initial_delay: default_initial_delay(),
            growth_factor: default_growth_factor(),
            attempts_per_step: default_attempts_per_step(),
            max_total_wait: default_max_total_wait(),
        }
    }
}

impl ReconnectEntry {
    pub fn to_reconnect_config(&self) -> Result<ReconnectConfig, ConfigError> {
        if self.growth_factor == 0 || self.attempts_per_step == 0 {
            return Err(ConfigError::Validation {
                field: "reconnect".into(),
                reason: "growth_factor and attempts_per_step must be positive".into(),
            });
        }
        Ok(ReconnectConfig {
            initial_delay: parse_duration("reconnect.initial_delay", &self.initial_delay)?,
            growth_factor: self.growth_factor,
            attempts_per_step: self.attempts_per_step,
            max_total_wait: parse_duration("reconnect.max_total_wait", &self.max_total_wait)?,
        })
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct SyncthingConfig {
    /// Sync engine home directory.
    pub home: Option<PathBuf>,

    /// Sync engine REST address (e.g., "http://localhost:8386").
    pub gui_address: Option<String>,

    /// REST API key (plaintext). Never written back out.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
}

impl SyncthingConfig {
    pub fn api_key(&self) -> Option<SecretString> {
        self.api_key.clone().map(SecretString::from)
    }
}

fn default_http_port() -> u16 {
    8800
}
fn default_conn_retry() -> u32 {
    10
}
fn default_servers() -> Vec<ServerEntry> {
    vec![ServerEntry {
        url: "http://localhost:8000".into(),
        conn_retry: default_conn_retry(),
        socket_url: None,
        timeout: None,
    }]
}
fn default_initial_delay() -> String {
    "1s".into()
}
fn default_growth_factor() -> u32 {
    5
}
fn default_attempts_per_step() -> u32 {
    60
}
fn default_max_total_wait() -> String {
    "15m".into()
}

impl AgentFileConfig {
    /// Configured agent uid, or a fresh random one.
    pub fn resolve_agent_uid(&self) -> String {
        self.agent_uid
            .clone()
            .filter(|uid| !uid.is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
    }

    /// URL UI tools use to reach this agent.
    pub fn agent_url(&self) -> String {
        format!("http://localhost:{}", self.http_port)
    }

    /// One runtime config per server; the local route prefix is
    /// `/api/v1/servers/<index>`.
    pub fn to_connection_configs(&self) -> Result<Vec<ConnectionConfig>, ConfigError> {
        if self.servers.is_empty() {
            return Err(ConfigError::Validation {
                field: "servers".into(),
                reason: "at least one XDS server must be configured".into(),
            });
        }

        let reconnect = self.reconnect.to_reconnect_config()?;
        self.servers
            .iter()
            .enumerate()
            .map(|(index, server)| {
                let url = parse_url(&format!("servers[{index}].url"), &server.url)?;
                let mut config = ConnectionConfig::new(url, format!("/api/v1/servers/{index}"));
                config.conn_retry = server.conn_retry;
                config.reconnect = reconnect.clone();
                if let Some(ref socket) = server.socket_url {
                    config.socket_url =
                        Some(parse_url(&format!("servers[{index}].socket_url"), socket)?);
                }
                if let Some(ref timeout) = server.timeout {
                    config.timeout = parse_duration(&format!("servers[{index}].timeout"), timeout)?;
                }
                Ok(config)
            })
            .collect()
    }

    /// Render the effective configuration as TOML. Secrets are omitted.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

fn parse_url(field: &str, raw: &str) -> Result<Url, ConfigError> {
    let url: Url = raw.parse().map_err(|e| ConfigError::Validation {
        field: field.into(),
        reason: format!("invalid URL '{raw}': {e}"),
    })?;
    match url.scheme() {
        "http" | "https" | "ws" | "wss" => Ok(url),
        other => Err(ConfigError::Validation {
            field: field.into(),
            reason: format!("unsupported scheme '{other}'"),
        }),
    }
}

fn parse_duration(field: &str, raw: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(raw).map_err(|e| ConfigError::Validation {
        field: field.into(),
        reason: format!("invalid duration '{raw}': {e}"),
    })
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "xds", "xds-agent").map_or_else(
        || {
            let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
            p.push(".xds");
            p.push("agent");
            p.push("agent-config.toml");
            p
        },
        |dirs| dirs.config_dir().join("agent-config.toml"),
    )
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the config from `path` (or the default path) + environment.
/// A missing file yields the defaults.
pub fn load_config(path: Option<&Path>) -> Result<AgentFileConfig, ConfigError> {
    let path = path.map_or_else(config_path, Path::to_path_buf);

    let figment = Figment::new()
        .merge(Serialized::defaults(AgentFileConfig::default()))
        .merge(Toml::file(&path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"));

    let config: AgentFileConfig = figment.extract()?;
    Ok(config)
}
