// ── Backend wire types ──
//
// JSON shapes exchanged with the XDS backend REST API and event socket.
// Field names follow the backend's camelCase convention.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

// ── Folder type / status ─────────────────────────────────────────────

/// Sharing strategy of a folder (a project, seen from the backend).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
pub enum FolderType {
    #[default]
    PathMap,
    CloudSync,
    /// Reserved by the backend, never implemented by the agent.
    #[serde(rename = "CIFS")]
    #[strum(serialize = "CIFS")]
    Cifs,
}

/// Status of a folder as reported by the backend or by a sync engine.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
pub enum FolderStatus {
    ErrorConfig,
    #[default]
    Disable,
    Enable,
    Pause,
    Syncing,
}

impl FolderStatus {
    /// States that stop a folder from making progress.
    pub fn is_blocking(self) -> bool {
        matches!(self, Self::ErrorConfig | Self::Disable | Self::Pause)
    }
}

// ── Folder ───────────────────────────────────────────────────────────

/// PathMap specific folder data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathMapConfig {
    #[serde(default)]
    pub server_path: String,
    /// Marker file path as seen by the backend, used for the share check.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub check_file: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub check_content: String,
}

/// CloudSync specific folder data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudSyncConfig {
    /// Sync-engine device id of the agent side.
    #[serde(default, rename = "syncThingID")]
    pub sync_thing_id: String,
    #[serde(default)]
    pub st_loc_is_in_sync: bool,
    #[serde(default)]
    pub st_loc_status: FolderStatus,
    #[serde(default)]
    pub st_svr_is_in_sync: bool,
    #[serde(default)]
    pub st_svr_status: FolderStatus,
}

/// A backend folder, the server-side view of a project.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderConfig {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub label: String,
    /// Local (agent side) path of the folder.
    #[serde(default, rename = "path")]
    pub client_path: String,
    #[serde(default, rename = "type")]
    pub folder_type: FolderType,
    #[serde(default)]
    pub status: FolderStatus,
    #[serde(default)]
    pub is_in_sync: bool,
    #[serde(default)]
    pub default_sdk: String,
    #[serde(default)]
    pub client_data: String,
    #[serde(default)]
    pub data_path_map: PathMapConfig,
    #[serde(default)]
    pub data_cloud_sync: CloudSyncConfig,
}

// ── Backend configuration ────────────────────────────────────────────

/// Builder metadata advertised by the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuilderConfig {
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub port: String,
    /// Sync-engine device id of the builder.
    #[serde(default, rename = "syncThingID")]
    pub sync_thing_id: String,
}

/// Answer of `GET /config`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendConfig {
    #[serde(rename = "id")]
    pub server_uid: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub api_version: String,
    /// Project types the backend can host, keyed by their wire name.
    #[serde(default)]
    pub supported_sharing: HashMap<String, bool>,
    #[serde(default)]
    pub builder: BuilderConfig,
}

impl BackendConfig {
    /// Whether the backend advertises support for `folder_type`.
    pub fn supports(&self, folder_type: FolderType) -> bool {
        self.supported_sharing
            .get(&folder_type.to_string())
            .copied()
            .unwrap_or(false)
    }
}

/// Answer of `GET /version`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionData {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub git_tag: String,
}

// ── Events registration ──────────────────────────────────────────────

/// Body of `POST /events/register`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRegisterArgs {
    pub name: String,
    #[serde(rename = "filterProjectID", default)]
    pub project_id: String,
}

// ── Exec ─────────────────────────────────────────────────────────────

/// Body of `POST /exec`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecArgs {
    /// Project id the command runs in.
    pub id: String,
    #[serde(default, rename = "sdkID")]
    pub sdk_id: String,
    #[serde(default, rename = "cmdID")]
    pub cmd_id: String,
    pub cmd: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: Vec<String>,
    #[serde(default, rename = "rpath")]
    pub rpath: String,
    #[serde(default)]
    pub tty: bool,
    #[serde(default)]
    pub tty_gdbserver_fix: bool,
    #[serde(default)]
    pub exit_immediate: bool,
    /// Completion timeout in seconds.
    #[serde(default, rename = "timeout")]
    pub cmd_timeout: u64,
}

/// Answer of `POST /exec` and `POST /signal`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecResult {
    #[serde(default)]
    pub status: String,
    #[serde(default, rename = "cmdID")]
    pub cmd_id: String,
}

/// Body of `POST /signal`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecSignalArgs {
    #[serde(rename = "cmdID")]
    pub cmd_id: String,
    pub signal: String,
}

/// `exec:input` / `exec:inferior-input` payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecInMsg {
    #[serde(rename = "cmdID")]
    pub cmd_id: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub stdin: String,
}

/// `exec:output` / `exec:inferior-output` payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecOutMsg {
    #[serde(rename = "cmdID")]
    pub cmd_id: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
}

/// `exec:exit` payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecExitMsg {
    #[serde(rename = "cmdID")]
    pub cmd_id: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub code: i32,
    #[serde(default)]
    pub error: Option<String>,
}

/// `event:sdk-install` / `event:sdk-remove` payload, kept loose since the
/// agent only relays it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SdkEvent {
    #[serde(default)]
    pub id: String,
    #[serde(flatten)]
    pub extra: serde_json::Value,
}
