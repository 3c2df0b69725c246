// ── Connection pool ──
//
// Server connections keyed by server id. A connection starts under a
// temporary id and is re-keyed in place once its handshake learns the
// real one.

use std::sync::{Arc, Weak};

use dashmap::DashMap;
use tracing::debug;

use crate::connection::ServerConnection;

/// Cheaply cloneable map of live server connections.
#[derive(Clone, Default)]
pub struct ConnectionPool {
    inner: Arc<DashMap<String, ServerConnection>>,
}

impl ConnectionPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `conn` under its current id and keep the key in step with
    /// later id changes.
    pub fn add(&self, conn: ServerConnection) {
        let map: Weak<DashMap<String, ServerConnection>> = Arc::downgrade(&self.inner);
        conn.set_rekey_hook(Box::new(move |old, new| {
            let Some(map) = map.upgrade() else { return };
            if let Some((_, conn)) = map.remove(old) {
                debug!(old, new, "re-keying server connection");
                map.insert(new.to_owned(), conn);
            }
        }));
        self.inner.insert(conn.id(), conn);
    }

    pub fn get(&self, id: &str) -> Option<ServerConnection> {
        self.inner.get(id).map(|entry| entry.value().clone())
    }

    pub fn all(&self) -> Vec<ServerConnection> {
        self.inner.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn ids(&self) -> Vec<String> {
        self.inner.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn remove(&self, id: &str) -> Option<ServerConnection> {
        self.inner.remove(id).map(|(_, conn)| conn)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Connection whose command table holds `cmd_id`.
    pub fn find_command_owner(&self, cmd_id: &str) -> Option<ServerConnection> {
        self.all()
            .into_iter()
            .find(|conn| conn.command_get(cmd_id).is_some())
    }

    /// Close every connection and empty the pool.
    pub fn close_all(&self) {
        for conn in self.all() {
            conn.close();
        }
        self.inner.clear();
    }
}
