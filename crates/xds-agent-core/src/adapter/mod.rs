// ── Project adapters ──
//
// Per-project strategy translating a project configuration into backend
// folder operations, and for CloudSync into local sync-engine operations.
// Dispatched once, at creation, on the project's declared type.

mod cloudsync;
mod pathmap;

use std::sync::{Arc, Mutex};

use xds_agent_api::FolderConfig;

use crate::broker::EventBroker;
use crate::connection::ServerConnection;
use crate::error::CoreError;
use crate::project::{ProjectConfig, ProjectType, folder_to_project};
use crate::sync_engine::SyncEngine;

pub use cloudsync::CloudSyncAdapter;
pub use pathmap::PathMapAdapter;

/// Agent-wide collaborators handed to every adapter.
#[derive(Clone)]
pub struct AgentContext {
    /// Identity written into PathMap marker files.
    pub agent_uid: String,
    /// URL UI tools use to reach this agent.
    pub agent_url: String,
    pub broker: EventBroker,
    /// Local sync engine; CloudSync projects are unavailable without one.
    pub sync_engine: Option<Arc<dyn SyncEngine>>,
}

/// Folder record shared between an adapter and its event callbacks.
pub(crate) type FolderState = Arc<Mutex<FolderConfig>>;

pub(crate) fn project_of(folder: &FolderState, server_id: &str) -> ProjectConfig {
    let folder = folder.lock().expect("folder state lock poisoned");
    folder_to_project(&folder, server_id)
}

// ── ProjectAdapter ───────────────────────────────────────────────

pub enum ProjectAdapter {
    PathMap(PathMapAdapter),
    CloudSync(CloudSyncAdapter),
}

impl ProjectAdapter {
    /// Build the adapter for `project_type`.
    ///
    /// CIFS is reserved and always rejected; CloudSync needs a sync engine.
    pub fn new(
        project_type: ProjectType,
        ctx: &AgentContext,
        conn: ServerConnection,
    ) -> Result<Self, CoreError> {
        match project_type {
            ProjectType::PathMap => Ok(Self::PathMap(PathMapAdapter::new(ctx, conn))),
            ProjectType::CloudSync => {
                let engine = ctx
                    .sync_engine
                    .clone()
                    .ok_or(CoreError::SyncEngineUnavailable)?;
                Ok(Self::CloudSync(CloudSyncAdapter::new(ctx, conn, engine)))
            }
            ProjectType::Cifs => Err(CoreError::UnsupportedProjectType {
                project_type: project_type.to_string(),
            }),
        }
    }

    pub fn project_type(&self) -> ProjectType {
        match self {
            Self::PathMap(_) => ProjectType::PathMap,
            Self::CloudSync(_) => ProjectType::CloudSync,
        }
    }

    /// Create the project on the backend (and locally where applicable).
    pub async fn add(&self, cfg: &ProjectConfig) -> Result<ProjectConfig, CoreError> {
        match self {
            Self::PathMap(a) => a.add(cfg).await,
            Self::CloudSync(a) => a.add(cfg).await,
        }
    }

    /// Wire up a project that already exists on the backend.
    pub async fn setup(&self, folder: FolderConfig) -> Result<ProjectConfig, CoreError> {
        match self {
            Self::PathMap(a) => Ok(a.setup(folder)),
            Self::CloudSync(a) => a.setup(folder).await,
        }
    }

    pub async fn delete(&self) -> Result<(), CoreError> {
        match self {
            Self::PathMap(a) => a.delete().await,
            Self::CloudSync(a) => a.delete().await,
        }
    }

    pub fn project(&self) -> ProjectConfig {
        match self {
            Self::PathMap(a) => a.project(),
            Self::CloudSync(a) => a.project(),
        }
    }

    pub async fn update(&self, cfg: &ProjectConfig) -> Result<ProjectConfig, CoreError> {
        match self {
            Self::PathMap(a) => a.update(cfg).await,
            Self::CloudSync(a) => a.update(cfg).await,
        }
    }

    pub fn server(&self) -> &ServerConnection {
        match self {
            Self::PathMap(a) => a.server(),
            Self::CloudSync(a) => a.server(),
        }
    }

    pub async fn sync(&self) -> Result<(), CoreError> {
        match self {
            Self::PathMap(_) => Ok(()),
            Self::CloudSync(a) => a.sync().await,
        }
    }

    pub fn is_in_sync(&self) -> Result<bool, CoreError> {
        match self {
            Self::PathMap(_) => Ok(true),
            Self::CloudSync(a) => Ok(a.project().is_in_sync),
        }
    }

    /// Drop every event subscription held by the adapter.
    pub fn release(&self) {
        if let Self::CloudSync(a) = self {
            a.release();
        }
    }
}

impl std::fmt::Debug for ProjectAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectAdapter")
            .field("type", &self.project_type())
            .field("project", &self.project().id)
            .field("server", &self.server().id())
            .finish()
    }
}
