// ── PathMap adapter ──
//
// Local and server directories are the same storage (shared filesystem,
// bind mount). Creation proves it with a marker file round trip: the
// agent writes a marker, the backend appends its own line to the same
// file seen through the server path.

use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

use tempfile::NamedTempFile;
use tracing::{debug, warn};
use xds_agent_api::FolderConfig;

use super::{AgentContext, FolderState, project_of};
use crate::connection::ServerConnection;
use crate::error::CoreError;
use crate::project::{ProjectConfig, project_to_folder};

const MARKER_PREFIX: &str = ".xds_pathmap_check";
const AGENT_MARKER: &str = "Pathmap checked message written by xds-agent ID: ";
const SERVER_MARKER: &str = "Pathmap checked message written by xds-server ID";

pub struct PathMapAdapter {
    agent_uid: String,
    conn: ServerConnection,
    folder: FolderState,
}

impl PathMapAdapter {
    pub(crate) fn new(ctx: &AgentContext, conn: ServerConnection) -> Self {
        Self {
            agent_uid: ctx.agent_uid.clone(),
            conn,
            folder: Arc::new(Mutex::new(FolderConfig::default())),
        }
    }

    pub(crate) async fn add(&self, cfg: &ProjectConfig) -> Result<ProjectConfig, CoreError> {
        if cfg.server_path.is_empty() {
            return Err(CoreError::MissingField {
                field: "ServerPath",
            });
        }

        let client_dir = Path::new(&cfg.client_path);
        tokio::fs::create_dir_all(client_dir)
            .await
            .map_err(|e| CoreError::io(&cfg.client_path, e))?;
        let meta = tokio::fs::metadata(client_dir)
            .await
            .map_err(|e| CoreError::io(&cfg.client_path, e))?;
        if !meta.is_dir() {
            return Err(CoreError::Config {
                message: format!("{} is not a directory", cfg.client_path),
            });
        }

        let content = format!("{AGENT_MARKER}{}\n", self.agent_uid);
        let dir = client_dir.to_path_buf();
        let body = content.clone();
        let marker = tokio::task::spawn_blocking(move || write_marker(&dir, &body))
            .await
            .map_err(|e| CoreError::io(&cfg.client_path, std::io::Error::other(e)))??;

        let outcome = self.round_trip(cfg, &marker, content).await;
        remove_marker(marker).await;
        let created = outcome?;

        self.store(created);
        Ok(self.project())
    }

    /// Register the folder with the marker location and check the server
    /// appended its line. A folder the server could not corroborate is
    /// deleted again.
    async fn round_trip(
        &self,
        cfg: &ProjectConfig,
        marker: &NamedTempFile,
        content: String,
    ) -> Result<FolderConfig, CoreError> {
        let mut folder = project_to_folder(cfg, "");
        folder.data_path_map.check_file = server_side_path(marker.path(), cfg);
        folder.data_path_map.check_content = content;
        debug!(
            check_file = %folder.data_path_map.check_file,
            "pathmap marker written"
        );

        let created = self.conn.folder_add(&folder).await?;

        let echoed = tokio::fs::read_to_string(marker.path())
            .await
            .map_err(|e| CoreError::io(marker.path().display().to_string(), e))?;
        if !echoed.contains(SERVER_MARKER) {
            if let Err(e) = self.conn.folder_delete(&created.id).await {
                warn!(
                    project = %created.id,
                    error = %e,
                    "cannot remove uncorroborated folder from server"
                );
            }
            return Err(CoreError::SyncIntegrity {
                message: format!(
                    "server did not corroborate marker file in {}; check the path mapping",
                    cfg.client_path
                ),
            });
        }
        Ok(created)
    }

    pub(crate) fn setup(&self, folder: FolderConfig) -> ProjectConfig {
        self.store(folder);
        self.project()
    }

    pub(crate) async fn update(&self, cfg: &ProjectConfig) -> Result<ProjectConfig, CoreError> {
        let updated = self.conn.folder_update(&project_to_folder(cfg, "")).await?;
        self.store(updated);
        Ok(self.project())
    }

    pub(crate) async fn delete(&self) -> Result<(), CoreError> {
        let id = self.folder_id();
        self.conn.folder_delete(&id).await.map(|_| ())
    }

    pub(crate) fn project(&self) -> ProjectConfig {
        project_of(&self.folder, &self.conn.id())
    }

    pub(crate) fn server(&self) -> &ServerConnection {
        &self.conn
    }

    fn folder_id(&self) -> String {
        self.folder.lock().expect("folder state lock poisoned").id.clone()
    }

    fn store(&self, folder: FolderConfig) {
        *self.folder.lock().expect("folder state lock poisoned") = folder;
    }
}

// ── Marker file ──────────────────────────────────────────────────

/// Create and fill the marker in `dir`. Blocking; run off the runtime.
fn write_marker(dir: &Path, content: &str) -> Result<NamedTempFile, CoreError> {
    let mut marker = tempfile::Builder::new()
        .prefix(MARKER_PREFIX)
        .tempfile_in(dir)
        .map_err(|e| CoreError::io(dir.display().to_string(), e))?;
    let path = marker.path().display().to_string();
    marker
        .write_all(content.as_bytes())
        .map_err(|e| CoreError::io(&path, e))?;
    marker.flush().map_err(|e| CoreError::io(path, e))?;
    Ok(marker)
}

async fn remove_marker(marker: NamedTempFile) {
    match tokio::task::spawn_blocking(move || marker.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "cannot remove pathmap marker file"),
        Err(e) => warn!(error = %e, "pathmap marker removal task failed"),
    }
}

/// Marker path as the backend sees it: client prefix swapped for the
/// server path.
fn server_side_path(marker: &Path, cfg: &ProjectConfig) -> String {
    match marker.strip_prefix(&cfg.client_path) {
        Ok(rel) => Path::new(&cfg.server_path).join(rel).display().to_string(),
        Err(_) => marker.display().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_path_is_rewritten_to_server_side() {
        let cfg = ProjectConfig {
            client_path: "/home/dev/prj".into(),
            server_path: "/xds/share/prj".into(),
            ..ProjectConfig::default()
        };
        let marker = Path::new("/home/dev/prj/.xds_pathmap_checkAbC123");
        assert_eq!(
            server_side_path(marker, &cfg),
            "/xds/share/prj/.xds_pathmap_checkAbC123"
        );
    }

    #[test]
    fn marker_outside_client_dir_is_kept() {
        let cfg = ProjectConfig {
            client_path: "/a".into(),
            server_path: "/b".into(),
            ..ProjectConfig::default()
        };
        assert_eq!(server_side_path(Path::new("/c/m"), &cfg), "/c/m");
    }
}
