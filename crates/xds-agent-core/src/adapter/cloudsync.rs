// ── CloudSync adapter ──
//
// The local directory is replicated to the server by a peer-to-peer sync
// engine. The visible project status merges what the backend reports
// about its side with what the local engine reports about ours.

use std::sync::{Arc, Mutex};

use tracing::{debug, error, warn};
use uuid::Uuid;
use xds_agent_api::{BackendEvent, BackendEventKind, FolderConfig, FolderStatus};

use super::{AgentContext, FolderState, project_of};
use crate::broker::{AgentEvent, EventBroker};
use crate::connection::{EventCallback, ServerConnection};
use crate::error::CoreError;
use crate::project::{ProjectConfig, folder_to_project, project_to_folder};
use crate::sync_engine::{FolderChange, LocalEvent, LocalEventCallback, LocalEventKind, SyncEngine};

#[derive(Default)]
struct Subscriptions {
    backend: Option<Uuid>,
    local: Vec<u64>,
}

pub struct CloudSyncAdapter {
    conn: ServerConnection,
    engine: Arc<dyn SyncEngine>,
    broker: EventBroker,
    folder: FolderState,
    subscriptions: Mutex<Subscriptions>,
}

impl CloudSyncAdapter {
    pub(crate) fn new(
        ctx: &AgentContext,
        conn: ServerConnection,
        engine: Arc<dyn SyncEngine>,
    ) -> Self {
        Self {
            conn,
            engine,
            broker: ctx.broker.clone(),
            folder: Arc::new(Mutex::new(FolderConfig::default())),
            subscriptions: Mutex::new(Subscriptions::default()),
        }
    }

    pub(crate) async fn add(&self, cfg: &ProjectConfig) -> Result<ProjectConfig, CoreError> {
        let folder = project_to_folder(cfg, &self.engine.device_id());
        let created = self.conn.folder_add(&folder).await?;
        let svr_prj = folder_to_project(&created, &self.conn.id());
        self.store(created);

        let device_id = self
            .conn
            .server_config()
            .map(|c| c.builder.sync_thing_id)
            .unwrap_or_default();
        let local_id = self
            .engine
            .folder_change(FolderChange {
                id: svr_prj.id.clone(),
                label: svr_prj.label.clone(),
                local_path: cfg.client_path.clone(),
                device_id,
            })
            .await?;

        let local = self.engine.folder_config(&local_id).await?;
        if local.id != svr_prj.id {
            error!(
                server_id = %svr_prj.id,
                local_id = %local.id,
                "project ID differs between XDS server and local sync engine"
            );
        }

        self.wire().await?;
        Ok(self.project())
    }

    /// Record a folder known by the backend and subscribe to its status
    /// changes from both sides.
    pub(crate) async fn setup(&self, folder: FolderConfig) -> Result<ProjectConfig, CoreError> {
        self.store(folder);
        self.wire().await?;
        Ok(self.project())
    }

    /// Subscribe once; later calls are no-ops.
    async fn wire(&self) -> Result<(), CoreError> {
        if self.is_wired() {
            return Ok(());
        }

        let id = self.folder_id();
        let event = BackendEventKind::FolderStateChange.name();
        self.conn.event_register(event, &id).await?;
        let listener = self.conn.event_on(event, id.clone(), self.server_callback())?;
        self.lock_subs().backend = Some(listener);

        for kind in [LocalEventKind::StateChanged, LocalEventKind::FolderPaused] {
            let sub = self.engine.register(kind, &id, self.local_callback())?;
            self.lock_subs().local.push(sub);
        }

        debug!(project = %id, server = %self.conn.id(), "cloudsync project wired");
        Ok(())
    }

    pub(crate) async fn update(&self, cfg: &ProjectConfig) -> Result<ProjectConfig, CoreError> {
        let current = self.folder_id();
        if current != cfg.id {
            return Err(CoreError::Config {
                message: format!("invalid id {} for project {current}", cfg.id),
            });
        }

        let updated = self
            .conn
            .folder_update(&project_to_folder(cfg, &self.engine.device_id()))
            .await?;
        {
            // The backend knows nothing of the local side; keep ours.
            let mut folder = self.folder.lock().expect("folder state lock poisoned");
            let local = folder.data_cloud_sync.clone();
            *folder = updated;
            folder.data_cloud_sync.st_loc_is_in_sync = local.st_loc_is_in_sync;
            folder.data_cloud_sync.st_loc_status = local.st_loc_status;
        }

        self.wire().await?;
        Ok(self.project())
    }

    /// Delete on the backend and in the local engine. Both are always
    /// attempted; the backend error wins.
    ///
    /// Subscriptions are released only once the backend dropped the folder,
    /// so a project kept after a failed delete still follows its status.
    pub(crate) async fn delete(&self) -> Result<(), CoreError> {
        let id = self.folder_id();
        let server = self.conn.folder_delete(&id).await;
        if server.is_ok() {
            self.release();
        }
        let local = self.engine.folder_delete(&id).await;

        match (server, local) {
            (Err(e), local) => {
                if let Err(local) = local {
                    warn!(project = %id, error = %local, "local folder delete also failed");
                }
                Err(e)
            }
            (Ok(_), Err(e)) => Err(CoreError::SyncEngine {
                message: e.to_string(),
            }),
            (Ok(_), Ok(())) => Ok(()),
        }
    }

    pub(crate) async fn sync(&self) -> Result<(), CoreError> {
        let id = self.folder_id();
        self.conn.folder_sync(&id).await?;
        self.engine.folder_scan(&id, "").await
    }

    pub(crate) fn project(&self) -> ProjectConfig {
        project_of(&self.folder, &self.conn.id())
    }

    pub(crate) fn server(&self) -> &ServerConnection {
        &self.conn
    }

    pub(crate) fn release(&self) {
        let subs = std::mem::take(&mut *self.lock_subs());
        if let Some(listener) = subs.backend {
            self.conn
                .event_off(BackendEventKind::FolderStateChange.name(), Some(listener));
        }
        for sub in subs.local {
            if let Err(e) = self.engine.unregister(sub) {
                warn!(subscription = sub, error = %e, "cannot unregister sync engine event");
            }
        }
    }

    // ── Event callbacks ──────────────────────────────────────────

    fn server_callback(&self) -> EventCallback {
        let folder = Arc::clone(&self.folder);
        let broker = self.broker.clone();
        let server_id = self.conn.id();
        Arc::new(move |_, event| {
            let BackendEvent::FolderStateChange(fld) = event else {
                return Ok(());
            };
            let changed = {
                let mut folder = folder.lock().expect("folder state lock poisoned");
                if folder.id != fld.id {
                    return Ok(());
                }
                apply_remote(&mut folder, fld.is_in_sync, fld.status)
            };
            if changed {
                notify_change(&broker, &folder, &server_id);
            }
            Ok(())
        })
    }

    fn local_callback(&self) -> LocalEventCallback {
        let folder = Arc::clone(&self.folder);
        let broker = self.broker.clone();
        let server_id = self.conn.id();
        Arc::new(move |event| {
            let changed = {
                let mut folder = folder.lock().expect("folder state lock poisoned");
                if folder.id != event.folder() {
                    return;
                }
                apply_local(&mut folder, event)
            };
            if changed {
                notify_change(&broker, &folder, &server_id);
            }
        })
    }

    // ── Helpers ──────────────────────────────────────────────────

    fn is_wired(&self) -> bool {
        let subs = self.lock_subs();
        subs.backend.is_some() || !subs.local.is_empty()
    }

    fn folder_id(&self) -> String {
        self.folder.lock().expect("folder state lock poisoned").id.clone()
    }

    fn store(&self, folder: FolderConfig) {
        *self.folder.lock().expect("folder state lock poisoned") = folder;
    }

    fn lock_subs(&self) -> std::sync::MutexGuard<'_, Subscriptions> {
        self.subscriptions
            .lock()
            .expect("subscriptions lock poisoned")
    }
}

impl Drop for CloudSyncAdapter {
    fn drop(&mut self) {
        self.release();
    }
}

/// Record the server side pair. Returns whether it changed.
fn apply_remote(folder: &mut FolderConfig, in_sync: bool, status: FolderStatus) -> bool {
    let cs = &mut folder.data_cloud_sync;
    if cs.st_svr_is_in_sync == in_sync && cs.st_svr_status == status {
        return false;
    }
    cs.st_svr_is_in_sync = in_sync;
    cs.st_svr_status = status;
    true
}

/// Record the local side pair from an engine event. Returns whether it
/// changed.
fn apply_local(folder: &mut FolderConfig, event: &LocalEvent) -> bool {
    let cs = &mut folder.data_cloud_sync;
    let mut status = cs.st_loc_status;
    let in_sync = match event {
        LocalEvent::StateChanged { to, .. } => {
            match to.as_str() {
                "scanning" | "syncing" => status = FolderStatus::Syncing,
                "idle" => status = FolderStatus::Enable,
                _ => {}
            }
            to == "idle"
        }
        LocalEvent::FolderPaused { .. } => {
            if status == FolderStatus::Enable {
                status = FolderStatus::Pause;
            }
            false
        }
    };

    if cs.st_loc_is_in_sync == in_sync && cs.st_loc_status == status {
        return false;
    }
    cs.st_loc_is_in_sync = in_sync;
    cs.st_loc_status = status;
    true
}

fn notify_change(broker: &EventBroker, folder: &FolderState, server_id: &str) {
    let project = project_of(folder, server_id);
    let report = broker.emit(AgentEvent::ProjectChange, &project, "");
    if !report.is_complete() {
        debug!(project = %project.id, "project change not delivered to every session");
    }
}
