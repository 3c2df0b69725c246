// ── Local sync engine seam ──
//
// CloudSync projects replicate through a local peer-to-peer sync engine
// whose process and protocol live outside the agent. The core only needs
// folder management, rescans, and state-change notifications, so that is
// all this trait exposes.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::CoreError;

/// Local folder creation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderChange {
    pub id: String,
    pub label: String,
    pub local_path: String,
    /// Device the folder is shared with.
    pub device_id: String,
}

/// Local folder as the sync engine reports it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalFolder {
    pub id: String,
    pub label: String,
    pub path: String,
}

/// Kinds of engine events a caller may register for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocalEventKind {
    StateChanged,
    FolderPaused,
}

/// An engine notification about one folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalEvent {
    /// Folder moved to state `to` (`idle`, `scanning`, `syncing`, ...).
    StateChanged { folder: String, to: String },
    FolderPaused { folder: String },
}

impl LocalEvent {
    pub fn kind(&self) -> LocalEventKind {
        match self {
            Self::StateChanged { .. } => LocalEventKind::StateChanged,
            Self::FolderPaused { .. } => LocalEventKind::FolderPaused,
        }
    }

    pub fn folder(&self) -> &str {
        match self {
            Self::StateChanged { folder, .. } | Self::FolderPaused { folder } => folder,
        }
    }
}

pub type LocalEventCallback = Arc<dyn Fn(&LocalEvent) + Send + Sync>;

/// The local sync engine.
#[async_trait]
pub trait SyncEngine: Send + Sync {
    /// This agent's device id.
    fn device_id(&self) -> String;

    /// Create or update a local folder. Returns the engine's folder id.
    async fn folder_change(&self, change: FolderChange) -> Result<String, CoreError>;

    async fn folder_delete(&self, id: &str) -> Result<(), CoreError>;

    async fn folder_config(&self, id: &str) -> Result<LocalFolder, CoreError>;

    /// Rescan `subpath` of a folder, or the whole folder when empty.
    async fn folder_scan(&self, id: &str, subpath: &str) -> Result<(), CoreError>;

    /// Register for events of `kind`, restricted to `folder_filter`.
    /// Returns a subscription id for [`unregister`](Self::unregister).
    fn register(
        &self,
        kind: LocalEventKind,
        folder_filter: &str,
        callback: LocalEventCallback,
    ) -> Result<u64, CoreError>;

    fn unregister(&self, subscription: u64) -> Result<(), CoreError>;
}
