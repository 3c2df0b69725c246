// ── XDS server connection ──
//
// One `ServerConnection` per configured XDS server. Owns the HTTP client
// and the event socket, drives the connect / reconnect state machine,
// fans backend events out to local listeners, and keeps the table of
// in-flight commands.

mod backoff;
mod listeners;
mod passthrough;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use xds_agent_api::socket::{SocketSink, socket_url};
use xds_agent_api::{
    BackendClient, BackendConfig, BackendEvent, BackendEventKind, EventRegisterArgs, EventSocket,
    ExecArgs, ExecResult, ExecSignalArgs, FolderConfig, SocketEvent, TransportConfig, VersionData,
};

use crate::broker::{AgentEvent, EventBroker};
use crate::config::ConnectionConfig;
use crate::error::CoreError;

pub use backoff::ReconnectBackoff;
pub use listeners::EventCallback;
pub use passthrough::{PassthroughMethod, PassthroughRoute};

use listeners::ListenerTable;

/// Prefix of the placeholder id a connection carries until the server
/// tells it its real one.
pub const TEMP_ID_PREFIX: &str = "tempo-";

// ── ConnectionState ──────────────────────────────────────────────

/// Connection state observable by consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    Failed,
}

/// Payload of the `event:server-config` notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatus {
    pub id: String,
    pub url: String,
    pub api_url: String,
    pub partial_url: String,
    pub conn_retry: u32,
    pub connected: bool,
    pub disabled: bool,
}

/// Called after a background reconnection succeeds.
#[async_trait]
pub trait ReconnectHandler: Send + Sync {
    async fn on_reconnect(&self, conn: &ServerConnection) -> Result<(), CoreError>;
}

type RekeyHook = Box<dyn Fn(&str, &str) + Send + Sync>;

// ── ServerConnection ─────────────────────────────────────────────

/// Handle to one XDS server.
///
/// Cheaply cloneable via `Arc<ConnectionInner>`. Created disconnected;
/// call [`connect()`](Self::connect) to run the handshake.
#[derive(Clone)]
pub struct ServerConnection {
    inner: Arc<ConnectionInner>,
}

struct ConnectionInner {
    id: RwLock<String>,
    config: ConnectionConfig,
    client: BackendClient,
    broker: EventBroker,
    connected: AtomicBool,
    disabled: AtomicBool,
    state: watch::Sender<ConnectionState>,
    server_config: RwLock<Option<BackendConfig>>,
    socket: Mutex<Option<EventSocket>>,
    /// Bumped for every socket, so a stale socket's loss is ignored.
    socket_generation: AtomicU64,
    /// Highest generation whose socket reported a loss.
    lost_generation: AtomicU64,
    listeners: Mutex<ListenerTable>,
    commands: Mutex<HashMap<String, Value>>,
    routes: Mutex<Vec<(PassthroughMethod, String)>>,
    reconnect_cancel: Mutex<Option<CancellationToken>>,
    reconnect_handler: RwLock<Option<Arc<dyn ReconnectHandler>>>,
    rekey_hook: RwLock<Option<RekeyHook>>,
}

impl ServerConnection {
    /// Create a connection from configuration. Does NOT connect.
    pub fn new(config: ConnectionConfig, broker: EventBroker) -> Result<Self, CoreError> {
        let transport = TransportConfig {
            timeout: config.timeout,
            agent_sid: config.agent_sid.clone(),
            ..TransportConfig::default()
        };
        let client = BackendClient::new(&config.url, &transport)?;
        let (state, _) = watch::channel(ConnectionState::Disconnected);

        Ok(Self {
            inner: Arc::new(ConnectionInner {
                id: RwLock::new(format!("{TEMP_ID_PREFIX}{}", Uuid::new_v4())),
                config,
                client,
                broker,
                connected: AtomicBool::new(false),
                disabled: AtomicBool::new(false),
                state,
                server_config: RwLock::new(None),
                socket: Mutex::new(None),
                socket_generation: AtomicU64::new(0),
                lost_generation: AtomicU64::new(0),
                listeners: Mutex::new(ListenerTable::default()),
                commands: Mutex::new(HashMap::new()),
                routes: Mutex::new(Vec::new()),
                reconnect_cancel: Mutex::new(None),
                reconnect_handler: RwLock::new(None),
                rekey_hook: RwLock::new(None),
            }),
        })
    }

    // ── Accessors ────────────────────────────────────────────────

    pub fn id(&self) -> String {
        self.inner.id.read().expect("connection id lock poisoned").clone()
    }

    pub fn has_temporary_id(&self) -> bool {
        self.id().starts_with(TEMP_ID_PREFIX)
    }

    pub fn base_url(&self) -> &Url {
        &self.inner.config.url
    }

    pub fn api_url(&self) -> &Url {
        self.inner.client.api_url()
    }

    /// Local route prefix this connection's passthrough routes live under.
    pub fn api_prefix(&self) -> &str {
        &self.inner.config.api_prefix
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    pub fn is_disabled(&self) -> bool {
        self.inner.disabled.load(Ordering::SeqCst)
    }

    /// Subscribe to connection state changes.
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Capabilities learned during the last handshake.
    pub fn server_config(&self) -> Option<BackendConfig> {
        self.inner
            .server_config
            .read()
            .expect("server config lock poisoned")
            .clone()
    }

    pub fn status(&self) -> ServerStatus {
        ServerStatus {
            id: self.id(),
            url: self.inner.config.url.to_string(),
            api_url: self.api_url().to_string(),
            partial_url: xds_agent_api::client::API_PATH.to_owned(),
            conn_retry: self.inner.config.conn_retry,
            connected: self.is_connected(),
            disabled: self.is_disabled(),
        }
    }

    pub fn set_reconnect_handler(&self, handler: Arc<dyn ReconnectHandler>) {
        *self
            .inner
            .reconnect_handler
            .write()
            .expect("reconnect handler lock poisoned") = Some(handler);
    }

    pub(crate) fn client(&self) -> &BackendClient {
        &self.inner.client
    }

    pub(crate) fn set_rekey_hook(&self, hook: RekeyHook) {
        *self.inner.rekey_hook.write().expect("rekey hook lock poisoned") = Some(hook);
    }

    // ── Connection lifecycle ─────────────────────────────────────

    /// Connect to the server.
    ///
    /// Retries the HTTP handshake up to `conn_retry` times, then learns the
    /// server identity, opens the event socket, and notifies the new state.
    pub async fn connect(&self) -> Result<(), CoreError> {
        self.inner.disabled.store(false, Ordering::SeqCst);
        self.inner.connected.store(false, Ordering::SeqCst);
        self.set_state(ConnectionState::Connecting);

        let retries = self.inner.config.conn_retry.max(1);
        let mut last_err = None;
        for attempt in 1..=retries {
            match self.inner.client.get_version().await {
                Ok(version) => {
                    debug!(server = %self.base_url(), version = %version.version, "handshake ok");
                    last_err = None;
                    break;
                }
                Err(e) => {
                    if attempt == 1 {
                        // Only the first failure is notified, so startup does
                        // not flap between disconnected and connected.
                        self.notify_state();
                    }
                    info!(
                        server = %self.base_url(),
                        attempt,
                        retries,
                        error = %e,
                        "establishing connection to XDS server"
                    );
                    last_err = Some(e);
                    if attempt < retries {
                        tokio::time::sleep(self.inner.config.retry_interval).await;
                    }
                }
            }
        }

        if let Some(e) = last_err {
            self.set_state(ConnectionState::Failed);
            // An answering server with a bad reply is not an unreachable one.
            if !e.is_transient() {
                return Err(e.into());
            }
            return Err(CoreError::ConnectionFailed {
                url: self.base_url().to_string(),
                reason: e.to_string(),
            });
        }

        if let Err(e) = self.establish(false).await {
            self.set_state(ConnectionState::Failed);
            return Err(e);
        }
        Ok(())
    }

    /// Fetch server config, adopt its id, open the event socket.
    async fn establish(&self, reconnect: bool) -> Result<(), CoreError> {
        let server_cfg = match self.inner.client.get_config().await {
            Ok(cfg) => cfg,
            Err(e) => {
                self.inner.connected.store(false, Ordering::SeqCst);
                if !reconnect {
                    self.notify_state();
                }
                return Err(e.into());
            }
        };

        self.adopt_id(&server_cfg.server_uid);
        *self
            .inner
            .server_config
            .write()
            .expect("server config lock poisoned") = Some(server_cfg);

        let installed = match self.open_socket().await {
            Ok((socket, generation)) => self.install_socket(socket, generation),
            Err(e) => Err(e),
        };
        if let Err(e) = installed {
            warn!(server = %self.id(), error = %e, "event socket connection failed");
            if !reconnect {
                self.notify_state();
            }
            return Err(e);
        }

        info!(server = %self.id(), url = %self.base_url(), "connected to XDS server");
        self.notify_state();
        Ok(())
    }

    fn adopt_id(&self, server_uid: &str) {
        let old = self.id();
        if old == server_uid {
            return;
        }
        if !old.starts_with(TEMP_ID_PREFIX) {
            warn!(old = %old, new = %server_uid, "reconnected to server but ID differs");
            return;
        }
        *self.inner.id.write().expect("connection id lock poisoned") = server_uid.to_owned();
        debug!(old = %old, new = %server_uid, "server id learned");
        if let Some(hook) = self
            .inner
            .rekey_hook
            .read()
            .expect("rekey hook lock poisoned")
            .as_ref()
        {
            hook(&old, server_uid);
        }
    }

    async fn open_socket(&self) -> Result<(EventSocket, u64), CoreError> {
        let url = match &self.inner.config.socket_url {
            Some(url) => url.clone(),
            None => socket_url(&self.inner.config.url)?,
        };

        let generation = self.inner.socket_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let weak: Weak<ConnectionInner> = Arc::downgrade(&self.inner);
        let sink: SocketSink = Arc::new(move |event| {
            if let Some(inner) = weak.upgrade() {
                ServerConnection { inner }.on_socket_event(generation, event);
            }
        });

        let socket = EventSocket::connect(
            &url,
            self.inner.config.agent_sid.as_deref(),
            sink,
            CancellationToken::new(),
        )
        .await?;
        Ok((socket, generation))
    }

    /// Make `socket` the live one and mark the server connected.
    ///
    /// Runs under the socket lock, which `handle_disconnect` also takes, so
    /// a loss is either seen here or applied after the server is connected.
    /// A socket that already reported its loss is closed instead.
    fn install_socket(&self, socket: EventSocket, generation: u64) -> Result<(), CoreError> {
        let mut slot = self.lock_socket();
        if self.inner.lost_generation.load(Ordering::SeqCst) >= generation {
            socket.close();
            return Err(CoreError::ServerDisconnected { server: self.id() });
        }
        if let Some(old) = slot.replace(socket) {
            old.close();
        }

        // Listeners registered before the socket existed.
        let names = self.lock_listeners().names();
        if let Some(socket) = slot.as_ref() {
            for name in names {
                socket.subscribe(&name);
            }
        }
        self.inner.connected.store(true, Ordering::SeqCst);
        self.set_state(ConnectionState::Connected);
        Ok(())
    }

    fn on_socket_event(&self, generation: u64, event: SocketEvent) {
        match event {
            SocketEvent::Message { name, data } => self.dispatch(&name, data),
            SocketEvent::Disconnected { reason } => {
                self.inner
                    .lost_generation
                    .fetch_max(generation, Ordering::SeqCst);
                if generation != self.inner.socket_generation.load(Ordering::SeqCst) {
                    debug!(server = %self.id(), "ignoring loss of a replaced socket");
                    return;
                }
                info!(
                    server = %self.id(),
                    reason = reason.as_deref().unwrap_or("stream ended"),
                    "event socket disconnected"
                );
                self.handle_disconnect();
            }
        }
    }

    /// Flag the server as disconnected (e.g. after a refused request).
    pub(crate) fn mark_disconnected(&self) {
        self.handle_disconnect();
    }

    fn handle_disconnect(&self) {
        if let Some(socket) = self.lock_socket().take() {
            socket.close();
        }
        if !self.inner.connected.swap(false, Ordering::SeqCst) {
            return;
        }
        self.set_state(ConnectionState::Disconnected);
        self.notify_state();

        if !self.is_disabled() {
            self.spawn_reconnect();
        }
    }

    fn spawn_reconnect(&self) {
        let token = CancellationToken::new();
        if let Some(previous) = self
            .inner
            .reconnect_cancel
            .lock()
            .expect("reconnect token lock poisoned")
            .replace(token.clone())
        {
            previous.cancel();
        }
        tokio::spawn(reconnect_task(self.clone(), token));
    }

    /// Disable the connection for good: stops reconnection, drops the
    /// socket, and clears all listeners.
    pub fn close(&self) {
        self.inner.disabled.store(true, Ordering::SeqCst);
        if let Some(token) = self
            .inner
            .reconnect_cancel
            .lock()
            .expect("reconnect token lock poisoned")
            .take()
        {
            token.cancel();
        }
        if let Some(socket) = self.lock_socket().take() {
            socket.close();
        }
        self.lock_listeners().clear();
        self.inner.connected.store(false, Ordering::SeqCst);
        self.set_state(ConnectionState::Disconnected);
        self.notify_state();
        debug!(server = %self.id(), "connection closed");
    }

    fn set_state(&self, state: ConnectionState) {
        // `send_replace` updates unconditionally, even with zero receivers.
        self.inner.state.send_replace(state);
    }

    fn notify_state(&self) {
        let report = self
            .inner
            .broker
            .emit(AgentEvent::ServerConfig, &self.status(), "");
        if !report.is_complete() {
            debug!(
                server = %self.id(),
                failed = report.failures.len(),
                "server state notification not delivered to every session"
            );
        }
    }

    // ── Events ───────────────────────────────────────────────────

    /// Register a listener for backend event `name`.
    ///
    /// The first listener for a name opens the socket subscription; later
    /// ones share it.
    pub fn event_on(
        &self,
        name: &str,
        private_data: impl Into<String>,
        callback: EventCallback,
    ) -> Result<Uuid, CoreError> {
        if BackendEventKind::from_name(name).is_none() {
            return Err(CoreError::UnknownEvent {
                name: name.to_owned(),
            });
        }

        let (id, first) = self
            .lock_listeners()
            .add(name, private_data.into(), callback);
        if let Some(socket) = self.lock_socket().as_ref() {
            if socket.subscribe(name) {
                debug!(server = %self.id(), event = name, "socket subscription opened");
            }
        }
        debug!(server = %self.id(), event = name, %id, first, "listener added");
        Ok(id)
    }

    /// Remove listener `id` of `name`, or all of them when `id` is `None`.
    pub fn event_off(&self, name: &str, id: Option<Uuid>) -> usize {
        let removed = self.lock_listeners().remove(name, id);
        debug!(server = %self.id(), event = name, removed, "listeners removed");
        removed
    }

    pub fn listener_count(&self, name: &str) -> usize {
        self.lock_listeners().len(name)
    }

    /// Push an event to the server over the event socket.
    pub fn event_emit(&self, name: &str, args: Vec<Value>) -> Result<(), CoreError> {
        let guard = self.lock_socket();
        let socket = guard.as_ref().ok_or(CoreError::SocketNotEstablished)?;
        socket.emit(name, args)?;
        Ok(())
    }

    /// Ask the server to push `name` events, restricted to one project.
    pub async fn event_register(&self, name: &str, project_id: &str) -> Result<(), CoreError> {
        let args = EventRegisterArgs {
            name: name.to_owned(),
            project_id: project_id.to_owned(),
        };
        self.track(self.inner.client.event_register(&args).await)
    }

    fn dispatch(&self, name: &str, data: Value) {
        let event = match BackendEvent::decode(name, data) {
            Ok(ev) => ev,
            Err(e) => {
                warn!(server = %self.id(), event = name, error = %e, "dropping malformed event");
                return;
            }
        };

        let listeners = self.lock_listeners().snapshot(name);
        for listener in listeners {
            if let Err(e) = (listener.callback)(&listener.private_data, &event) {
                warn!(
                    server = %self.id(),
                    event = name,
                    listener = %listener.id,
                    error = %e,
                    "event listener failed"
                );
            }
        }
    }

    // ── HTTP ─────────────────────────────────────────────────────

    pub async fn get_version(&self) -> Result<VersionData, CoreError> {
        self.track(self.inner.client.get_version().await)
    }

    pub async fn get_folders(&self) -> Result<Vec<FolderConfig>, CoreError> {
        self.track(self.inner.client.get_folders().await)
    }

    pub async fn folder_add(&self, folder: &FolderConfig) -> Result<FolderConfig, CoreError> {
        self.track(self.inner.client.folder_add(folder).await)
    }

    pub async fn folder_update(&self, folder: &FolderConfig) -> Result<FolderConfig, CoreError> {
        self.track(self.inner.client.folder_update(folder).await)
    }

    pub async fn folder_delete(&self, id: &str) -> Result<FolderConfig, CoreError> {
        self.track(self.inner.client.folder_delete(id).await)
    }

    pub async fn folder_sync(&self, id: &str) -> Result<(), CoreError> {
        self.track(self.inner.client.folder_sync(id).await)
    }

    pub async fn command_exec(&self, args: &ExecArgs) -> Result<ExecResult, CoreError> {
        self.track(self.inner.client.exec(args).await)
    }

    pub async fn command_signal(&self, args: &ExecSignalArgs) -> Result<ExecResult, CoreError> {
        self.track(self.inner.client.signal(args).await)
    }

    /// POST an arbitrary command to the server.
    pub async fn send_command(&self, cmd: &str, body: &Value) -> Result<Value, CoreError> {
        self.track(self.inner.client.send_command(cmd, body).await)
    }

    /// Map a transport result, flagging the server disconnected when the
    /// connection was refused.
    pub(crate) fn track<T>(&self, result: Result<T, xds_agent_api::Error>) -> Result<T, CoreError> {
        result.map_err(|e| {
            if e.is_connection_refused() {
                warn!(server = %self.id(), "XDS server refused connection");
                self.mark_disconnected();
            }
            e.into()
        })
    }

    // ── Passthrough ──────────────────────────────────────────────

    /// Install a GET passthrough route for `pattern`.
    pub fn passthrough_get(&self, pattern: &str) -> PassthroughRoute {
        self.add_route(PassthroughMethod::Get, pattern)
    }

    /// Install a POST passthrough route for `pattern`.
    pub fn passthrough_post(&self, pattern: &str) -> PassthroughRoute {
        self.add_route(PassthroughMethod::Post, pattern)
    }

    fn add_route(&self, method: PassthroughMethod, pattern: &str) -> PassthroughRoute {
        let mut routes = self.inner.routes.lock().expect("routes lock poisoned");
        if !routes.iter().any(|(m, p)| *m == method && p == pattern) {
            routes.push((method, pattern.to_owned()));
        }
        PassthroughRoute {
            method,
            pattern: pattern.to_owned(),
            conn: self.clone(),
        }
    }

    pub fn routes(&self) -> Vec<PassthroughRoute> {
        self.inner
            .routes
            .lock()
            .expect("routes lock poisoned")
            .iter()
            .map(|(method, pattern)| PassthroughRoute {
                method: *method,
                pattern: pattern.clone(),
                conn: self.clone(),
            })
            .collect()
    }

    /// Route serving a local request, if any.
    pub fn route_for(&self, method: PassthroughMethod, path: &str) -> Option<PassthroughRoute> {
        self.routes()
            .into_iter()
            .find(|r| r.method == method && r.matches(path))
    }

    // ── Command table ────────────────────────────────────────────

    pub fn command_add(&self, cmd_id: &str, data: Value) -> Result<(), CoreError> {
        let mut commands = self.lock_commands();
        if commands.contains_key(cmd_id) {
            return Err(CoreError::DuplicateCommand {
                id: cmd_id.to_owned(),
            });
        }
        commands.insert(cmd_id.to_owned(), data);
        Ok(())
    }

    pub fn command_get(&self, cmd_id: &str) -> Option<Value> {
        self.lock_commands().get(cmd_id).cloned()
    }

    pub fn command_delete(&self, cmd_id: &str) -> Result<Value, CoreError> {
        self.lock_commands()
            .remove(cmd_id)
            .ok_or_else(|| CoreError::UnknownCommand {
                id: cmd_id.to_owned(),
            })
    }

    // ── Lock helpers ─────────────────────────────────────────────

    fn lock_socket(&self) -> std::sync::MutexGuard<'_, Option<EventSocket>> {
        self.inner.socket.lock().expect("socket lock poisoned")
    }

    fn lock_listeners(&self) -> std::sync::MutexGuard<'_, ListenerTable> {
        self.inner.listeners.lock().expect("listeners lock poisoned")
    }

    fn lock_commands(&self) -> std::sync::MutexGuard<'_, HashMap<String, Value>> {
        self.inner.commands.lock().expect("commands lock poisoned")
    }

    fn reconnect_handler(&self) -> Option<Arc<dyn ReconnectHandler>> {
        self.inner
            .reconnect_handler
            .read()
            .expect("reconnect handler lock poisoned")
            .clone()
    }
}

impl std::fmt::Debug for ServerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConnection")
            .field("id", &self.id())
            .field("url", &self.inner.config.url.as_str())
            .field("connected", &self.is_connected())
            .field("disabled", &self.is_disabled())
            .finish_non_exhaustive()
    }
}

// ── Background reconnection ──────────────────────────────────────

/// Retry the connect sequence with backoff until connected, disabled,
/// cancelled, or the wait window is exhausted.
async fn reconnect_task(conn: ServerConnection, cancel: CancellationToken) {
    let mut backoff = ReconnectBackoff::new(conn.inner.config.reconnect.clone());

    loop {
        if conn.is_disabled() || conn.is_connected() {
            break;
        }
        let Some(delay) = backoff.next() else {
            warn!(
                server = %conn.id(),
                url = %conn.base_url(),
                attempts = backoff.attempt(),
                "stop reconnecting to XDS server"
            );
            conn.set_state(ConnectionState::Failed);
            break;
        };

        conn.set_state(ConnectionState::Reconnecting {
            attempt: backoff.attempt(),
        });

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(delay) => {}
        }

        if conn.is_disabled() || conn.is_connected() {
            break;
        }
        info!(server = %conn.base_url(), attempt = backoff.attempt(), "trying to reconnect");

        match conn.establish(true).await {
            Ok(()) => {
                if let Some(handler) = conn.reconnect_handler() {
                    if let Err(e) = handler.on_reconnect(&conn).await {
                        warn!(server = %conn.id(), error = %e, "reload after reconnect failed");
                    }
                }
                break;
            }
            Err(e) if e.is_connection_error() => {
                debug!(server = %conn.base_url(), error = %e, "server still unreachable");
            }
            Err(e) => {
                warn!(server = %conn.base_url(), error = %e, "error while reconnecting");
            }
        }
    }

    debug!(server = %conn.id(), "reconnect task exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use crate::broker::SessionTable;

    fn conn() -> ServerConnection {
        let broker = EventBroker::new(Arc::new(SessionTable::new()));
        let url = Url::parse("http://127.0.0.1:9").unwrap();
        ServerConnection::new(ConnectionConfig::new(url, "/api/v1/servers/0"), broker).unwrap()
    }

    fn output_frame(cmd: &str) -> Value {
        serde_json::json!({"cmdID": cmd, "stdout": "x"})
    }

    #[test]
    fn starts_with_temporary_id() {
        let c = conn();
        assert!(c.has_temporary_id());
        assert!(!c.is_connected());
        assert!(!c.is_disabled());
    }

    #[test]
    fn temporary_id_is_replaced_once() {
        let c = conn();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_hook = Arc::clone(&seen);
        c.set_rekey_hook(Box::new(move |old, new| {
            seen_hook.lock().unwrap().push((old.to_owned(), new.to_owned()));
        }));

        c.adopt_id("srv-1");
        c.adopt_id("srv-2");

        assert_eq!(c.id(), "srv-1");
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].1, "srv-1");
        assert!(seen[0].0.starts_with(TEMP_ID_PREFIX));
    }

    #[test]
    fn unknown_backend_event_name_is_rejected() {
        let c = conn();
        let err = c.event_on("event:nope", "", Arc::new(|_, _| Ok(()))).unwrap_err();
        assert!(matches!(err, CoreError::UnknownEvent { .. }));
    }

    #[test]
    fn dispatch_reaches_listeners_with_private_data() {
        let c = conn();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_cb = Arc::clone(&seen);
        c.event_on(
            "exec:output",
            "session-a",
            Arc::new(move |private, ev| {
                seen_cb
                    .lock()
                    .unwrap()
                    .push((private.to_owned(), ev.cmd_id().unwrap_or_default().to_owned()));
                Ok(())
            }),
        )
        .unwrap();

        c.dispatch("exec:output", output_frame("c1"));

        assert_eq!(*seen.lock().unwrap(), vec![("session-a".into(), "c1".into())]);
    }

    #[test]
    fn removed_listener_never_fires_again() {
        let c = conn();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_cb = Arc::clone(&hits);
        let id = c
            .event_on(
                "exec:output",
                "",
                Arc::new(move |_, _| {
                    hits_cb.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            )
            .unwrap();

        c.dispatch("exec:output", output_frame("c1"));
        assert_eq!(c.event_off("exec:output", Some(id)), 1);
        c.dispatch("exec:output", output_frame("c2"));

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn event_off_without_id_removes_all() {
        let c = conn();
        for _ in 0..3 {
            c.event_on("exec:exit", "", Arc::new(|_, _| Ok(()))).unwrap();
        }
        assert_eq!(c.event_off("exec:exit", None), 3);
        assert_eq!(c.listener_count("exec:exit"), 0);
    }

    #[test]
    fn listener_added_during_dispatch_waits_for_next_pass() {
        let c = conn();
        let late_hits = Arc::new(AtomicUsize::new(0));

        let c_cb = c.clone();
        let late = Arc::clone(&late_hits);
        let added = Arc::new(AtomicBool::new(false));
        c.event_on(
            "exec:output",
            "",
            Arc::new(move |_, _| {
                if !added.swap(true, Ordering::SeqCst) {
                    let late = Arc::clone(&late);
                    c_cb.event_on(
                        "exec:output",
                        "",
                        Arc::new(move |_, _| {
                            late.fetch_add(1, Ordering::SeqCst);
                            Ok(())
                        }),
                    )?;
                }
                Ok(())
            }),
        )
        .unwrap();

        c.dispatch("exec:output", output_frame("c1"));
        assert_eq!(late_hits.load(Ordering::SeqCst), 0);
        c.dispatch("exec:output", output_frame("c2"));
        assert_eq!(late_hits.load(Ordering::SeqCst), 1);
        c.close();
    }

    #[test]
    fn listener_removed_during_dispatch_still_runs_once() {
        let c = conn();
        let second_hits = Arc::new(AtomicUsize::new(0));
        let second_id = Arc::new(Mutex::new(None::<Uuid>));

        let c_cb = c.clone();
        let second_id_cb = Arc::clone(&second_id);
        c.event_on(
            "exec:output",
            "",
            Arc::new(move |_, _| {
                if let Some(id) = *second_id_cb.lock().unwrap() {
                    c_cb.event_off("exec:output", Some(id));
                }
                Ok(())
            }),
        )
        .unwrap();

        let hits = Arc::clone(&second_hits);
        let id = c
            .event_on(
                "exec:output",
                "",
                Arc::new(move |_, _| {
                    hits.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            )
            .unwrap();
        *second_id.lock().unwrap() = Some(id);

        c.dispatch("exec:output", output_frame("c1"));
        c.dispatch("exec:output", output_frame("c2"));
        assert_eq!(second_hits.load(Ordering::SeqCst), 1);
        c.close();
    }

    #[test]
    fn malformed_event_is_dropped_and_dispatch_continues() {
        let c = conn();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_cb = Arc::clone(&hits);
        c.event_on(
            "exec:exit",
            "",
            Arc::new(move |_, _| {
                hits_cb.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        )
        .unwrap();

        c.dispatch("exec:exit", serde_json::json!({"code": "not a number"}));
        c.dispatch("exec:exit", serde_json::json!({"cmdID": "c1", "code": 0}));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn emit_without_socket_fails() {
        let c = conn();
        assert!(matches!(
            c.event_emit("exec:input", vec![]),
            Err(CoreError::SocketNotEstablished)
        ));
    }

    #[test]
    fn state_updates_before_anyone_subscribes() {
        let c = conn();
        c.set_state(ConnectionState::Reconnecting { attempt: 3 });
        assert_eq!(
            *c.state().borrow(),
            ConnectionState::Reconnecting { attempt: 3 }
        );
        c.close();
        assert_eq!(*c.state().borrow(), ConnectionState::Disconnected);
    }

    #[test]
    fn command_table_rejects_duplicates_and_unknown_ids() {
        let c = conn();
        c.command_add("cmd-1", serde_json::json!({"cmd": "make"})).unwrap();
        assert!(matches!(
            c.command_add("cmd-1", Value::Null),
            Err(CoreError::DuplicateCommand { .. })
        ));
        assert_eq!(c.command_get("cmd-1").unwrap()["cmd"], "make");
        c.command_delete("cmd-1").unwrap();
        assert!(c.command_get("cmd-1").is_none());
        assert!(matches!(
            c.command_delete("cmd-1"),
            Err(CoreError::UnknownCommand { .. })
        ));
    }

    #[test]
    fn passthrough_route_paths() {
        let c = conn();
        let fixed = c.passthrough_get("/sdks");
        let param = c.passthrough_get("/sdks/:id");
        c.passthrough_get("/sdks");

        assert_eq!(c.routes().len(), 2);
        assert!(fixed.matches("/api/v1/servers/0/sdks"));
        assert!(!fixed.matches("/api/v1/servers/0/sdks/abc"));
        assert!(param.matches("/api/v1/servers/0/sdks/abc"));
        assert!(!param.matches("/api/v1/servers/0/sdks/"));

        assert_eq!(fixed.server_path("/api/v1/servers/0/sdks"), "/sdks");
        assert_eq!(param.server_path("/api/v1/servers/0/sdks/abc"), "/sdks/abc");

        let found = c
            .route_for(PassthroughMethod::Get, "/api/v1/servers/0/sdks/xyz")
            .unwrap();
        assert_eq!(found.pattern(), "/sdks/:id");
        assert!(c.route_for(PassthroughMethod::Post, "/api/v1/servers/0/sdks").is_none());
    }

    #[test]
    fn close_disables_and_clears_listeners() {
        let c = conn();
        c.event_on("exec:exit", "", Arc::new(|_, _| Ok(()))).unwrap();
        c.close();
        assert!(c.is_disabled());
        assert!(!c.is_connected());
        assert_eq!(c.listener_count("exec:exit"), 0);
        assert_eq!(*c.state().borrow(), ConnectionState::Disconnected);
    }
}
