// ── Event broker ──
//
// Process-local pub/sub between the agent and its UI sessions. Sessions
// register interest per event name (reference counted), and `emit` fans a
// timestamped envelope out to each registered session's delivery channel.
// A session whose channel is gone is recorded in the emit report, never
// treated as a failure of the emit itself.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use serde::Serialize;
use strum::{Display, EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::error::CoreError;

/// Pseudo event name that expands to every [`AgentEvent`].
pub const EVENT_ALL: &str = "event:all";

// ── AgentEvent ───────────────────────────────────────────────────────

/// Events the agent publishes to UI sessions.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter, IntoStaticStr,
)]
pub enum AgentEvent {
    #[strum(serialize = "event:server-config")]
    ServerConfig,
    #[strum(serialize = "event:project-add")]
    ProjectAdd,
    #[strum(serialize = "event:project-delete")]
    ProjectDelete,
    #[strum(serialize = "event:project-state-change")]
    ProjectChange,
}

impl AgentEvent {
    pub fn name(self) -> &'static str {
        self.into()
    }

    /// Resolve a name, expanding `event:all`.
    fn expand(name: &str) -> Result<Vec<Self>, CoreError> {
        if name == EVENT_ALL {
            return Ok(Self::iter().collect());
        }
        name.parse::<Self>()
            .map(|ev| vec![ev])
            .map_err(|_| CoreError::UnknownEvent {
                name: name.to_owned(),
            })
    }
}

// ── Envelope ─────────────────────────────────────────────────────────

/// Message delivered to a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventEnvelope {
    pub time: String,
    /// Session that caused the event, empty for agent-originated ones.
    #[serde(rename = "sessionID")]
    pub session_id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: serde_json::Value,
}

// ── Session sockets ──────────────────────────────────────────────────

pub type SessionSender = mpsc::UnboundedSender<Arc<EventEnvelope>>;

/// Lookup of a session's live delivery channel.
pub trait SessionSockets: Send + Sync {
    fn socket(&self, session_id: &str) -> Option<SessionSender>;
}

/// In-memory session table.
#[derive(Debug, Default)]
pub struct SessionTable {
    sockets: DashMap<String, SessionSender>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a delivery channel for `session_id`, replacing any previous one.
    pub fn attach(&self, session_id: &str) -> mpsc::UnboundedReceiver<Arc<EventEnvelope>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.sockets.insert(session_id.to_owned(), tx);
        rx
    }

    pub fn detach(&self, session_id: &str) {
        self.sockets.remove(session_id);
    }
}

impl SessionSockets for SessionTable {
    fn socket(&self, session_id: &str) -> Option<SessionSender> {
        self.sockets.get(session_id).map(|s| s.value().clone())
    }
}

// ── Emit report ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryFailure {
    /// The session has no delivery channel.
    NoSocket,
    /// The session's channel is closed.
    Closed,
}

/// Outcome of one [`EventBroker::emit`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmitReport {
    pub delivered: usize,
    pub failures: Vec<(String, DeliveryFailure)>,
}

impl EmitReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

// ── EventBroker ──────────────────────────────────────────────────────

/// Cheaply cloneable handle to the subscription table.
#[derive(Clone)]
pub struct EventBroker {
    inner: Arc<BrokerInner>,
}

struct BrokerInner {
    subscriptions: Mutex<HashMap<AgentEvent, HashMap<String, u32>>>,
    sockets: Arc<dyn SessionSockets>,
}

impl EventBroker {
    pub fn new(sockets: Arc<dyn SessionSockets>) -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                subscriptions: Mutex::new(HashMap::new()),
                sockets,
            }),
        }
    }

    /// Names of every event a session can register to.
    pub fn event_names() -> Vec<&'static str> {
        AgentEvent::iter().map(AgentEvent::name).collect()
    }

    /// Register `session_id` to `name` (or every event for `event:all`).
    pub fn register(&self, name: &str, session_id: &str) -> Result<(), CoreError> {
        let events = AgentEvent::expand(name)?;
        let mut subs = self.lock();
        for ev in events {
            *subs
                .entry(ev)
                .or_default()
                .entry(session_id.to_owned())
                .or_insert(0) += 1;
        }
        debug!(event = name, session = session_id, "session registered");
        Ok(())
    }

    /// Drop one registration of `session_id` to `name`.
    pub fn unregister(&self, name: &str, session_id: &str) -> Result<(), CoreError> {
        let events = AgentEvent::expand(name)?;
        let mut subs = self.lock();
        for ev in events {
            let Some(sessions) = subs.get_mut(&ev) else {
                continue;
            };
            if let Some(count) = sessions.get_mut(session_id) {
                *count -= 1;
                if *count == 0 {
                    sessions.remove(session_id);
                }
            }
        }
        debug!(event = name, session = session_id, "session unregistered");
        Ok(())
    }

    /// Forget every registration of a session (e.g. on logout).
    pub fn remove_session(&self, session_id: &str) {
        for sessions in self.lock().values_mut() {
            sessions.remove(session_id);
        }
    }

    /// Reference count of `session_id` on `event`.
    pub fn registration_count(&self, event: AgentEvent, session_id: &str) -> u32 {
        self.lock()
            .get(&event)
            .and_then(|s| s.get(session_id))
            .copied()
            .unwrap_or(0)
    }

    /// Emit a typed agent event.
    pub fn emit<T: Serialize>(&self, event: AgentEvent, data: &T, origin: &str) -> EmitReport {
        let data = match serde_json::to_value(data) {
            Ok(v) => v,
            Err(e) => {
                warn!(event = event.name(), error = %e, "event payload not serializable");
                return EmitReport::default();
            }
        };
        self.deliver(event, data, origin)
    }

    /// Emit by name. Fails only when `name` is not a known event.
    pub fn emit_named(
        &self,
        name: &str,
        data: serde_json::Value,
        origin: &str,
    ) -> Result<EmitReport, CoreError> {
        let event = name.parse::<AgentEvent>().map_err(|_| CoreError::UnknownEvent {
            name: name.to_owned(),
        })?;
        Ok(self.deliver(event, data, origin))
    }

    fn deliver(&self, event: AgentEvent, data: serde_json::Value, origin: &str) -> EmitReport {
        // Snapshot so delivery never runs under the table lock.
        let sessions: Vec<String> = self
            .lock()
            .get(&event)
            .map(|s| s.keys().cloned().collect())
            .unwrap_or_default();

        let envelope = Arc::new(EventEnvelope {
            time: chrono::Utc::now().to_rfc3339(),
            session_id: origin.to_owned(),
            event_type: event.name().to_owned(),
            data,
        });

        let mut report = EmitReport::default();
        for sid in sessions {
            let Some(tx) = self.inner.sockets.socket(&sid) else {
                debug!(event = event.name(), session = %sid, "no socket for session");
                report.failures.push((sid, DeliveryFailure::NoSocket));
                continue;
            };
            if tx.send(Arc::clone(&envelope)).is_err() {
                debug!(event = event.name(), session = %sid, "session socket closed");
                report.failures.push((sid, DeliveryFailure::Closed));
                continue;
            }
            report.delivered += 1;
        }

        trace!(
            event = event.name(),
            delivered = report.delivered,
            failed = report.failures.len(),
            "event emitted"
        );
        report
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<AgentEvent, HashMap<String, u32>>> {
        self.inner
            .subscriptions
            .lock()
            .expect("broker subscriptions lock poisoned")
    }
}

impl std::fmt::Debug for EventBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBroker").finish_non_exhaustive()
    }
}
