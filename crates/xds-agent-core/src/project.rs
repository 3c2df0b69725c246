// ── Project model ──
//
// The user-facing project configuration, its conversion to and from the
// server's folder representation, and the CloudSync status merge.

use serde::{Deserialize, Serialize};
use xds_agent_api::{CloudSyncConfig, FolderConfig, FolderStatus, FolderType, PathMapConfig};

pub use xds_agent_api::{FolderStatus as ProjectStatus, FolderType as ProjectType};

/// A project as exposed to the UI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectConfig {
    #[serde(default)]
    pub id: String,
    #[serde(default, rename = "serverId")]
    pub server_id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub client_path: String,
    #[serde(default)]
    pub server_path: String,
    #[serde(default, rename = "type")]
    pub project_type: ProjectType,
    #[serde(default)]
    pub status: ProjectStatus,
    #[serde(default)]
    pub is_in_sync: bool,
    #[serde(default)]
    pub default_sdk: String,
    #[serde(default)]
    pub client_data: String,
}

/// Fields a UI may change on an existing project.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectUpdate {
    pub label: Option<String>,
    pub default_sdk: Option<String>,
    pub client_data: Option<String>,
}

impl ProjectUpdate {
    /// Apply the differing fields to `cfg`. Returns whether anything changed.
    pub fn apply_to(&self, cfg: &mut ProjectConfig) -> bool {
        let mut changed = false;
        for (new, current) in [
            (&self.label, &mut cfg.label),
            (&self.default_sdk, &mut cfg.default_sdk),
            (&self.client_data, &mut cfg.client_data),
        ] {
            if let Some(value) = new {
                if value.as_str() != current.as_str() {
                    current.clone_from(value);
                    changed = true;
                }
            }
        }
        changed
    }
}

// ── Status merge ─────────────────────────────────────────────────────

/// One side of a CloudSync project's status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncState {
    pub in_sync: bool,
    pub status: FolderStatus,
}

/// Merge the server and local sync-engine views into the visible state.
///
/// In-sync requires both sides. A blocking local state wins outright; a
/// local `Syncing` shows through unless the server side is blocked.
pub fn merge_status(remote: SyncState, local: SyncState) -> SyncState {
    let status = if local.status.is_blocking() {
        local.status
    } else if local.status == FolderStatus::Syncing && !remote.status.is_blocking() {
        FolderStatus::Syncing
    } else {
        remote.status
    };
    SyncState {
        in_sync: remote.in_sync && local.in_sync,
        status,
    }
}

// ── Conversion ───────────────────────────────────────────────────────

/// Build the project view of a server folder owned by `server_id`.
pub fn folder_to_project(folder: &FolderConfig, server_id: &str) -> ProjectConfig {
    let mut project = ProjectConfig {
        id: folder.id.clone(),
        server_id: server_id.to_owned(),
        label: folder.label.clone(),
        client_path: folder.client_path.clone(),
        server_path: folder.data_path_map.server_path.clone(),
        project_type: folder.folder_type,
        status: folder.status,
        is_in_sync: folder.is_in_sync,
        default_sdk: folder.default_sdk.clone(),
        client_data: folder.client_data.clone(),
    };

    if folder.folder_type == FolderType::CloudSync {
        let cs = &folder.data_cloud_sync;
        let merged = merge_status(
            SyncState {
                in_sync: cs.st_svr_is_in_sync,
                status: cs.st_svr_status,
            },
            SyncState {
                in_sync: cs.st_loc_is_in_sync,
                status: cs.st_loc_status,
            },
        );
        project.status = merged.status;
        project.is_in_sync = merged.in_sync;
    }

    project
}

/// Build the folder pushed to the server for `project`.
///
/// `local_device_id` is the agent's sync-engine device id, only used for
/// CloudSync projects.
pub fn project_to_folder(project: &ProjectConfig, local_device_id: &str) -> FolderConfig {
    let mut folder = FolderConfig {
        id: project.id.clone(),
        label: project.label.clone(),
        client_path: project.client_path.clone(),
        folder_type: project.project_type,
        status: project.status,
        is_in_sync: project.is_in_sync,
        default_sdk: project.default_sdk.clone(),
        client_data: project.client_data.clone(),
        data_path_map: PathMapConfig {
            server_path: project.server_path.clone(),
            ..PathMapConfig::default()
        },
        data_cloud_sync: CloudSyncConfig::default(),
    };

    if project.project_type == FolderType::CloudSync {
        folder.data_cloud_sync = CloudSyncConfig {
            sync_thing_id: local_device_id.to_owned(),
            st_loc_is_in_sync: project.is_in_sync,
            st_loc_status: project.status,
            st_svr_is_in_sync: project.is_in_sync,
            st_svr_status: project.status,
        };
    }

    folder
}
