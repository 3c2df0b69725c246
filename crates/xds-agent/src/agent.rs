// ── Agent wiring ──
//
// Builds the broker, one connection per configured server, and the
// project registry, then drives them until shutdown.

use std::sync::Arc;

use futures_util::future::join_all;
use tracing::{info, warn};

use xds_agent_config::AgentFileConfig;
use xds_agent_core::{
    AgentContext, ConnectionConfig, ConnectionPool, EventBroker, ProjectRegistry,
    ServerConnection, SessionTable,
};

use crate::error::AgentError;

pub struct Agent {
    pool: ConnectionPool,
    registry: ProjectRegistry,
}

impl Agent {
    pub fn new(cfg: &AgentFileConfig, servers: Vec<ConnectionConfig>) -> Result<Self, AgentError> {
        let broker = EventBroker::new(Arc::new(SessionTable::new()));

        if cfg.syncthing.is_some() {
            warn!("no sync engine client available, CloudSync projects are disabled");
        }
        let ctx = AgentContext {
            agent_uid: cfg.resolve_agent_uid(),
            agent_url: cfg.agent_url(),
            broker: broker.clone(),
            sync_engine: None,
        };
        info!(agent_uid = %ctx.agent_uid, agent_url = %ctx.agent_url, "agent identity");

        let pool = ConnectionPool::new();
        let registry = ProjectRegistry::new(ctx, pool.clone());
        let reloader = registry.reconnect_handler();
        for config in servers {
            let conn = ServerConnection::new(config, broker.clone())?;
            conn.set_reconnect_handler(Arc::clone(&reloader));
            pool.add(conn);
        }

        Ok(Self { pool, registry })
    }

    /// Connect every server concurrently and load its projects.
    /// Returns how many servers are connected.
    pub async fn start(&self) -> usize {
        let results = join_all(self.pool.all().into_iter().map(|conn| async move {
            if let Err(e) = conn.connect().await {
                warn!(server = %conn.base_url(), error = %e, "XDS server unreachable");
                return false;
            }
            match self.registry.init(Some(&conn)).await {
                Ok(count) => info!(server = %conn.id(), projects = count, "projects loaded"),
                Err(e) => warn!(server = %conn.id(), error = %e, "some projects could not be loaded"),
            }
            true
        }))
        .await;

        let connected = results.into_iter().filter(|ok| *ok).count();
        if connected == 0 {
            warn!("no XDS server reachable, waiting for shutdown");
        }
        connected
    }

    pub fn shutdown(&self) {
        self.pool.close_all();
        info!("all server connections closed");
    }
}
