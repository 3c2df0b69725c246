// ── Event listener table ──

use std::collections::HashMap;
use std::sync::Arc;

use uuid::Uuid;
use xds_agent_api::BackendEvent;

use crate::error::CoreError;

/// Callback invoked for each matching backend event, with the private
/// data given at registration.
pub type EventCallback = Arc<dyn Fn(&str, &BackendEvent) -> Result<(), CoreError> + Send + Sync>;

#[derive(Clone)]
pub(crate) struct Listener {
    pub(crate) id: Uuid,
    pub(crate) private_data: String,
    pub(crate) callback: EventCallback,
}

/// Ordered listeners per event name.
#[derive(Default)]
pub(crate) struct ListenerTable {
    by_event: HashMap<String, Vec<Listener>>,
}

impl ListenerTable {
    /// Append a listener. Returns its id and whether it is the first
    /// listener ever registered for `name`.
    pub(crate) fn add(
        &mut self,
        name: &str,
        private_data: String,
        callback: EventCallback,
    ) -> (Uuid, bool) {
        let first = !self.by_event.contains_key(name);
        let id = Uuid::new_v4();
        self.by_event.entry(name.to_owned()).or_default().push(Listener {
            id,
            private_data,
            callback,
        });
        (id, first)
    }

    /// Remove one listener, or every listener of `name` when `id` is `None`.
    /// Returns how many were removed.
    pub(crate) fn remove(&mut self, name: &str, id: Option<Uuid>) -> usize {
        let Some(list) = self.by_event.get_mut(name) else {
            return 0;
        };
        let before = list.len();
        match id {
            Some(id) => list.retain(|l| l.id != id),
            None => list.clear(),
        }
        before - list.len()
    }

    /// Copy of the listeners for `name`, safe to invoke without the lock.
    pub(crate) fn snapshot(&self, name: &str) -> Vec<Listener> {
        self.by_event.get(name).cloned().unwrap_or_default()
    }

    pub(crate) fn len(&self, name: &str) -> usize {
        self.by_event.get(name).map_or(0, Vec::len)
    }

    /// Event names that have ever had a listener.
    pub(crate) fn names(&self) -> Vec<String> {
        self.by_event.keys().cloned().collect()
    }

    pub(crate) fn clear(&mut self) {
        self.by_event.clear();
    }
}
