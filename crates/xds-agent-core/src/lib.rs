// xds-agent-core: Server connections, event fan-out and project registry of the XDS agent.

pub mod adapter;
pub mod broker;
pub mod config;
pub mod connection;
pub mod error;
pub mod pool;
pub mod project;
pub mod registry;
pub mod sync_engine;

// ── Primary re-exports ──────────────────────────────────────────────
pub use adapter::{AgentContext, CloudSyncAdapter, PathMapAdapter, ProjectAdapter};
pub use broker::{
    AgentEvent, DeliveryFailure, EVENT_ALL, EmitReport, EventBroker, EventEnvelope, SessionSender,
    SessionSockets, SessionTable,
};
pub use config::{ConnectionConfig, ReconnectConfig};
pub use connection::{
    ConnectionState, EventCallback, PassthroughMethod, PassthroughRoute, ReconnectBackoff,
    ReconnectHandler, ServerConnection, ServerStatus, TEMP_ID_PREFIX,
};
pub use error::CoreError;
pub use pool::ConnectionPool;
pub use project::{
    ProjectConfig, ProjectStatus, ProjectType, ProjectUpdate, SyncState, folder_to_project,
    merge_status, project_to_folder,
};
pub use registry::{INITIAL_SYNC_DELAY, PROJECT_CONF_FILE, ProjectRegistry};
pub use sync_engine::{
    FolderChange, LocalEvent, LocalEventCallback, LocalEventKind, LocalFolder, SyncEngine,
};

// Wire types callers need alongside the core API.
pub use xds_agent_api::{BackendConfig, BackendEvent, BackendEventKind, ExecArgs, ExecSignalArgs};
