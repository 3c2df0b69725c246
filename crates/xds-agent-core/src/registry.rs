// ── Project registry ──
//
// Owns every project adapter, keyed by project id. All mutations go
// through one registry-wide async lock so the project map and each
// adapter's state are observed and changed together.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use xds_agent_api::FolderConfig;

use crate::adapter::{AgentContext, ProjectAdapter};
use crate::broker::AgentEvent;
use crate::connection::{ReconnectHandler, ServerConnection};
use crate::error::CoreError;
use crate::pool::ConnectionPool;
use crate::project::{ProjectConfig, ProjectType, ProjectUpdate, folder_to_project};

/// Delay before the first forced sync of a new project, so the creation
/// answer reaches the caller before any sync notification.
pub const INITIAL_SYNC_DELAY: Duration = Duration::from_millis(500);

/// Shell snippet written into new project directories.
pub const PROJECT_CONF_FILE: &str = "xds-project.conf";

/// Cheaply cloneable handle to the project map.
#[derive(Clone)]
pub struct ProjectRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    projects: Mutex<HashMap<String, Arc<ProjectAdapter>>>,
    pool: ConnectionPool,
    ctx: AgentContext,
    sync_delay: Duration,
}

impl ProjectRegistry {
    pub fn new(ctx: AgentContext, pool: ConnectionPool) -> Self {
        Self::with_sync_delay(ctx, pool, INITIAL_SYNC_DELAY)
    }

    pub fn with_sync_delay(ctx: AgentContext, pool: ConnectionPool, sync_delay: Duration) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                projects: Mutex::new(HashMap::new()),
                pool,
                ctx,
                sync_delay,
            }),
        }
    }

    /// Handler reloading a connection's projects once it reconnects.
    pub fn reconnect_handler(&self) -> Arc<dyn ReconnectHandler> {
        Arc::new(RegistryReloader {
            registry: Arc::downgrade(&self.inner),
        })
    }

    // ── Loading ──────────────────────────────────────────────────

    /// Load the projects known by `conn`, or by every pool connection.
    ///
    /// Existing entries are replaced without a `project-add` event. Errors
    /// are collected per server and per project and returned together.
    /// Returns the number of registered projects.
    pub async fn init(&self, conn: Option<&ServerConnection>) -> Result<usize, CoreError> {
        let conns = match conn {
            Some(conn) => vec![conn.clone()],
            None => self.inner.pool.all(),
        };

        let mut errors = Vec::new();
        let mut projects = self.inner.projects.lock().await;

        for conn in conns {
            if conn.is_disabled() {
                continue;
            }
            let folders = match conn.get_folders().await {
                Ok(folders) => folders,
                Err(e) => {
                    warn!(server = %conn.id(), error = %e, "cannot retrieve folders");
                    errors.push(e);
                    continue;
                }
            };
            debug!(server = %conn.id(), count = folders.len(), "projects detected");

            for folder in &folders {
                let project = folder_to_project(folder, &conn.id());
                if project.project_type == ProjectType::CloudSync
                    && self.inner.ctx.sync_engine.is_none()
                {
                    debug!(project = %project.id, "skipping CloudSync project, no sync engine");
                    continue;
                }
                match self.setup_adapter(&conn, folder.clone()).await {
                    Ok(adapter) => {
                        let id = adapter.project().id;
                        if let Some(old) = projects.insert(id, adapter) {
                            old.release();
                        }
                    }
                    Err(e) => {
                        warn!(project = %project.id, error = %e, "cannot load project");
                        errors.push(e);
                    }
                }
            }
        }

        info!(count = projects.len(), "projects loaded");
        match errors.len() {
            0 => Ok(projects.len()),
            1 => Err(errors.remove(0)),
            _ => Err(CoreError::Multiple(errors)),
        }
    }

    async fn setup_adapter(
        &self,
        conn: &ServerConnection,
        folder: FolderConfig,
    ) -> Result<Arc<ProjectAdapter>, CoreError> {
        let adapter = ProjectAdapter::new(folder.folder_type, &self.inner.ctx, conn.clone())?;
        let loaded = adapter.setup(folder).await?;
        if loaded.id.is_empty() {
            return Err(CoreError::MissingField {
                field: "Project ID",
            });
        }
        Ok(Arc::new(adapter))
    }

    // ── Mutations ────────────────────────────────────────────────

    /// Create a project. `origin` is the session that asked for it.
    pub async fn add(&self, cfg: ProjectConfig, origin: &str) -> Result<ProjectConfig, CoreError> {
        let mut projects = self.inner.projects.lock().await;

        if !cfg.id.is_empty() && projects.contains_key(&cfg.id) {
            return Err(CoreError::DuplicateProjectId { id: cfg.id });
        }
        let conn = self.validate(&cfg)?;

        let adapter = ProjectAdapter::new(cfg.project_type, &self.inner.ctx, conn)?;
        let project = match adapter.add(&cfg).await {
            Ok(project) => project,
            Err(e) => {
                warn!(client_path = %cfg.client_path, error = %e, "adding project failed");
                return Err(e);
            }
        };
        if project.id.is_empty() {
            return Err(CoreError::MissingField {
                field: "Project ID",
            });
        }

        let adapter = Arc::new(adapter);
        projects.insert(project.id.clone(), Arc::clone(&adapter));
        drop(projects);

        self.schedule_sync(adapter);
        if let Err(e) = self.write_project_conf(&project).await {
            warn!(project = %project.id, error = %e, "cannot create {PROJECT_CONF_FILE}");
        }

        info!(project = %project.id, server = %project.server_id, "project added");
        self.inner
            .ctx
            .broker
            .emit(AgentEvent::ProjectAdd, &project, origin);
        Ok(project)
    }

    /// Resolve and check the owning connection of a new project.
    fn validate(&self, cfg: &ProjectConfig) -> Result<ServerConnection, CoreError> {
        if cfg.client_path.is_empty() {
            return Err(CoreError::MissingField {
                field: "ClientPath",
            });
        }
        if cfg.server_id.is_empty() {
            return Err(CoreError::MissingField { field: "Server ID" });
        }
        let conn = self
            .inner
            .pool
            .get(&cfg.server_id)
            .ok_or_else(|| CoreError::UnknownServer {
                id: cfg.server_id.clone(),
            })?;
        if conn.is_disabled() {
            return Err(CoreError::ServerDisabled {
                server: cfg.server_id.clone(),
            });
        }
        let supported = conn
            .server_config()
            .is_some_and(|sc| sc.supports(cfg.project_type));
        if !supported || cfg.project_type == ProjectType::Cifs {
            return Err(CoreError::UnsupportedProjectType {
                project_type: cfg.project_type.to_string(),
            });
        }
        Ok(conn)
    }

    fn schedule_sync(&self, adapter: Arc<ProjectAdapter>) {
        let delay = self.inner.sync_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = adapter.sync().await {
                warn!(project = %adapter.project().id, error = %e, "initial sync failed");
            }
        });
    }

    async fn write_project_conf(&self, project: &ProjectConfig) -> Result<(), CoreError> {
        let path = Path::new(&project.client_path).join(PROJECT_CONF_FILE);
        let display = path.display().to_string();
        if tokio::fs::try_exists(&path)
            .await
            .map_err(|e| CoreError::io(&display, e))?
        {
            return Ok(());
        }

        let sdk = if project.default_sdk.is_empty() {
            "#export XDS_SDK_ID=???".to_owned()
        } else {
            format!("export XDS_SDK_ID={}", project.default_sdk)
        };
        let content = format!(
            "# XDS project settings\nexport XDS_AGENT_URL={}\nexport XDS_PROJECT_ID={}\n{sdk}\n",
            self.inner.ctx.agent_url, project.id
        );
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| CoreError::io(display, e))
    }

    /// Delete a project.
    ///
    /// A backend failure keeps the project. A failure limited to the local
    /// sync engine is logged and the project is removed anyway.
    pub async fn delete(&self, id: &str, origin: &str) -> Result<ProjectConfig, CoreError> {
        let mut projects = self.inner.projects.lock().await;
        let adapter = projects
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::ProjectNotFound { id: id.to_owned() })?;
        let project = adapter.project();

        match adapter.delete().await {
            Ok(()) => {}
            Err(e @ CoreError::SyncEngine { .. }) => {
                warn!(project = %id, error = %e, "local cleanup failed, removing project anyway");
            }
            Err(e) => return Err(e),
        }

        projects.remove(id);
        drop(projects);

        info!(project = %id, "project deleted");
        self.inner
            .ctx
            .broker
            .emit(AgentEvent::ProjectDelete, &project, origin);
        Ok(project)
    }

    /// Apply the mutable fields of `update` to project `id`.
    ///
    /// Returns the current configuration untouched, with no event, when
    /// nothing differs.
    pub async fn update(
        &self,
        id: &str,
        update: &ProjectUpdate,
        origin: &str,
    ) -> Result<ProjectConfig, CoreError> {
        let projects = self.inner.projects.lock().await;
        let adapter = projects
            .get(id)
            .ok_or_else(|| CoreError::ProjectNotFound { id: id.to_owned() })?;

        let current = adapter.project();
        let mut next = current.clone();
        if !update.apply_to(&mut next) {
            return Ok(current);
        }

        let project = adapter.update(&next).await?;
        drop(projects);

        self.inner
            .ctx
            .broker
            .emit(AgentEvent::ProjectChange, &project, origin);
        Ok(project)
    }

    // ── Queries ──────────────────────────────────────────────────

    pub async fn force_sync(&self, id: &str) -> Result<(), CoreError> {
        self.adapter(id).await?.sync().await
    }

    pub async fn is_project_in_sync(&self, id: &str) -> Result<bool, CoreError> {
        self.adapter(id).await?.is_in_sync()
    }

    pub async fn get(&self, id: &str) -> Option<ProjectConfig> {
        let projects = self.inner.projects.lock().await;
        projects.get(id).map(|a| a.project())
    }

    /// Snapshot of every project.
    pub async fn get_project_arr(&self) -> Vec<ProjectConfig> {
        let projects = self.inner.projects.lock().await;
        let mut all: Vec<ProjectConfig> = projects.values().map(|a| a.project()).collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// Complete a project id from a unique prefix.
    pub async fn resolve_id(&self, prefix: &str) -> Result<String, CoreError> {
        if prefix.is_empty() {
            return Err(CoreError::MissingField {
                field: "Project ID",
            });
        }
        let projects = self.inner.projects.lock().await;
        let mut matches = projects.keys().filter(|id| id.starts_with(prefix));
        match (matches.next(), matches.next()) {
            (Some(id), None) => Ok(id.clone()),
            (None, _) => Err(CoreError::ProjectNotFound {
                id: prefix.to_owned(),
            }),
            (Some(_), Some(_)) => Err(CoreError::AmbiguousProjectId {
                prefix: prefix.to_owned(),
            }),
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.projects.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.projects.lock().await.is_empty()
    }

    async fn adapter(&self, id: &str) -> Result<Arc<ProjectAdapter>, CoreError> {
        let projects = self.inner.projects.lock().await;
        projects
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::ProjectNotFound { id: id.to_owned() })
    }
}

// ── Reconnect reload ─────────────────────────────────────────────

struct RegistryReloader {
    registry: Weak<RegistryInner>,
}

#[async_trait]
impl ReconnectHandler for RegistryReloader {
    async fn on_reconnect(&self, conn: &ServerConnection) -> Result<(), CoreError> {
        let Some(inner) = self.registry.upgrade() else {
            return Ok(());
        };
        let registry = ProjectRegistry { inner };
        let count = registry.init(Some(conn)).await?;
        debug!(server = %conn.id(), count, "projects reloaded after reconnect");
        Ok(())
    }
}
