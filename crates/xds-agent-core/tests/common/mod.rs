#![allow(clippy::unwrap_used, dead_code)]
// Shared fixtures: a mocked XDS backend (HTTP + event socket), an
// in-memory sync engine, and a session collecting broker envelopes.

use std::collections::HashMap;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::Message;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use xds_agent_core::{
    AgentContext, ConnectionConfig, ConnectionPool, ConnectionState, CoreError, EventBroker,
    EventEnvelope, FolderChange, LocalEvent, LocalEventCallback, LocalEventKind, LocalFolder,
    ProjectRegistry, ReconnectConfig, ServerConnection, SessionTable, SyncEngine,
};

pub const SERVER_ID: &str = "srv-0123";
pub const BUILDER_DEVICE: &str = "BUILDER-DEVICE";
pub const LOCAL_DEVICE: &str = "LOCAL-DEVICE";
pub const SESSION: &str = "session-1";

// ── Event socket server ─────────────────────────────────────────────

/// WebSocket server accepting any number of clients.
///
/// Frames from clients arrive on `from_client`; `push` sends a frame to
/// every connected client and `drop_clients` closes them all.
pub struct SocketServer {
    pub url: Url,
    pub from_client: mpsc::UnboundedReceiver<Value>,
    to_clients: broadcast::Sender<Option<String>>,
    accepted: Arc<AtomicU64>,
}

impl SocketServer {
    pub async fn start() -> Self {
        Self::serve(false).await
    }

    /// Server that completes every upgrade and closes it right away.
    pub async fn start_closing() -> Self {
        Self::serve(true).await
    }

    async fn serve(close_on_accept: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (from_tx, from_client) = mpsc::unbounded_channel();
        let (to_clients, _) = broadcast::channel::<Option<String>>(64);
        let accepted = Arc::new(AtomicU64::new(0));

        let to_clients_task = to_clients.clone();
        let accepted_task = Arc::clone(&accepted);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                    continue;
                };
                accepted_task.fetch_add(1, Ordering::SeqCst);
                if close_on_accept {
                    let _ = ws.close(None).await;
                    continue;
                }
                let from_tx = from_tx.clone();
                let mut outgoing = to_clients_task.subscribe();
                tokio::spawn(async move {
                    let (mut write, mut read) = ws.split();
                    loop {
                        tokio::select! {
                            out = outgoing.recv() => match out {
                                Ok(Some(text)) => {
                                    if write.send(Message::text(text)).await.is_err() {
                                        break;
                                    }
                                }
                                _ => {
                                    let _ = write.send(Message::Close(None)).await;
                                    break;
                                }
                            },
                            frame = read.next() => match frame {
                                Some(Ok(Message::Text(text))) => {
                                    if let Ok(value) = serde_json::from_str::<Value>(text.as_str()) {
                                        let _ = from_tx.send(value);
                                    }
                                }
                                Some(Ok(_)) => {}
                                _ => break,
                            },
                        }
                    }
                });
            }
        });

        Self {
            url: Url::parse(&format!("ws://{addr}/events")).unwrap(),
            from_client,
            to_clients,
            accepted,
        }
    }

    pub fn push(&self, event: &str, data: Value) {
        let frame = json!({ "event": event, "data": data }).to_string();
        let _ = self.to_clients.send(Some(frame));
    }

    pub fn drop_clients(&self) {
        let _ = self.to_clients.send(None);
    }

    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Wait for a client frame matching `pred`.
    pub async fn expect_frame(&mut self, pred: impl Fn(&Value) -> bool) -> Value {
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(5), self.from_client.recv())
                .await
                .expect("timed out waiting for client frame")
                .expect("socket server gone");
            if pred(&frame) {
                return frame;
            }
        }
    }
}

// ── Mocked backend ──────────────────────────────────────────────────

pub struct Backend {
    pub http: MockServer,
    pub socket: SocketServer,
}

impl Backend {
    /// Backend supporting PathMap, and CloudSync when `cloud_sync` is set.
    pub async fn start(cloud_sync: bool) -> Self {
        Self::start_on(MockServer::start().await, cloud_sync).await
    }

    /// Same as [`start`](Self::start) on a server that is not pooled, so
    /// dropping it really closes the port.
    pub async fn start_bare(cloud_sync: bool) -> Self {
        Self::start_on(MockServer::builder().start().await, cloud_sync).await
    }

    async fn start_on(http: MockServer, cloud_sync: bool) -> Self {
        Mock::given(method("GET"))
            .and(path("/api/v1/version"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": SERVER_ID,
                "version": "1.2.3",
                "apiVersion": "1",
            })))
            .mount(&http)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/config"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": SERVER_ID,
                "version": "1.2.3",
                "apiVersion": "1",
                "supportedSharing": { "PathMap": true, "CloudSync": cloud_sync },
                "builder": { "ip": "10.0.0.2", "port": "8000", "syncThingID": BUILDER_DEVICE },
            })))
            .mount(&http)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/events/register"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&http)
            .await;

        let socket = SocketServer::start().await;
        Self { http, socket }
    }

    pub fn connection_config(&self) -> ConnectionConfig {
        let mut cfg = ConnectionConfig::new(Url::parse(&self.http.uri()).unwrap(), "/api/v1/servers/0");
        cfg.socket_url = Some(self.socket.url.clone());
        cfg.conn_retry = 2;
        cfg.retry_interval = Duration::from_millis(10);
        cfg.timeout = Duration::from_secs(5);
        cfg.reconnect = ReconnectConfig {
            initial_delay: Duration::from_millis(20),
            growth_factor: 2,
            attempts_per_step: 5,
            max_total_wait: Duration::from_secs(5),
        };
        cfg
    }

    /// Serve `folders` from `GET /folders`.
    pub async fn mount_folders(&self, folders: Value) {
        Mock::given(method("GET"))
            .and(path("/api/v1/folders"))
            .respond_with(ResponseTemplate::new(200).set_body_json(folders))
            .mount(&self.http)
            .await;
    }
}

/// Answers `POST /folders` like a backend sharing the client directory:
/// appends the server marker to the check file and assigns `id`.
pub struct SharedDirBackend {
    pub id: String,
    pub corroborate: bool,
}

impl Respond for SharedDirBackend {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let mut folder: Value = serde_json::from_slice(&request.body).unwrap();
        let check_file = folder["dataPathMap"]["checkFile"].as_str().unwrap_or_default().to_owned();
        if self.corroborate && !check_file.is_empty() {
            let mut file = std::fs::OpenOptions::new()
                .append(true)
                .open(&check_file)
                .unwrap();
            writeln!(file, "Pathmap checked message written by xds-server ID: {SERVER_ID}").unwrap();
        }
        folder["id"] = json!(self.id);
        folder["status"] = json!("Enable");
        folder["isInSync"] = json!(true);
        folder["dataPathMap"]["checkFile"] = json!("");
        folder["dataPathMap"]["checkContent"] = json!("");
        ResponseTemplate::new(200).set_body_json(folder)
    }
}

/// Echoes the posted folder back with `id` assigned and the server side
/// reported in sync.
pub struct EchoFolder {
    pub id: String,
}

impl Respond for EchoFolder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let mut folder: Value = serde_json::from_slice(&request.body).unwrap();
        folder["id"] = json!(self.id);
        folder["status"] = json!("Enable");
        folder["isInSync"] = json!(true);
        folder["dataCloudSync"]["stSvrIsInSync"] = json!(true);
        folder["dataCloudSync"]["stSvrStatus"] = json!("Enable");
        ResponseTemplate::new(200).set_body_json(folder)
    }
}

pub fn folder_json(id: &str, kind: &str, client_path: &str) -> Value {
    json!({
        "id": id,
        "label": format!("label-{id}"),
        "path": client_path,
        "type": kind,
        "status": "Enable",
        "isInSync": true,
        "defaultSdk": "",
        "clientData": "",
        "dataPathMap": { "serverPath": format!("/srv{client_path}") },
        "dataCloudSync": {
            "syncThingID": LOCAL_DEVICE,
            "stLocIsInSync": true,
            "stLocStatus": "Enable",
            "stSvrIsInSync": true,
            "stSvrStatus": "Enable"
        }
    })
}

// ── In-memory sync engine ───────────────────────────────────────────

struct Registration {
    kind: LocalEventKind,
    folder: String,
    callback: LocalEventCallback,
}

#[derive(Default)]
pub struct MemoryEngine {
    pub folders: Mutex<HashMap<String, FolderChange>>,
    pub scans: Mutex<Vec<String>>,
    pub fail_delete: std::sync::atomic::AtomicBool,
    registrations: Mutex<HashMap<u64, Registration>>,
    next_id: AtomicU64,
}

impl MemoryEngine {
    /// Deliver `event` to matching registrations, like the engine's event
    /// loop would.
    pub fn fire(&self, event: &LocalEvent) {
        let callbacks: Vec<LocalEventCallback> = self
            .registrations
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.kind == event.kind() && r.folder == event.folder())
            .map(|r| Arc::clone(&r.callback))
            .collect();
        for cb in callbacks {
            cb(event);
        }
    }

    pub fn registration_count(&self) -> usize {
        self.registrations.lock().unwrap().len()
    }
}

#[async_trait]
impl SyncEngine for MemoryEngine {
    fn device_id(&self) -> String {
        LOCAL_DEVICE.to_owned()
    }

    async fn folder_change(&self, change: FolderChange) -> Result<String, CoreError> {
        let id = change.id.clone();
        self.folders.lock().unwrap().insert(id.clone(), change);
        Ok(id)
    }

    async fn folder_delete(&self, id: &str) -> Result<(), CoreError> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(CoreError::SyncEngine {
                message: format!("cannot delete {id}"),
            });
        }
        self.folders.lock().unwrap().remove(id);
        Ok(())
    }

    async fn folder_config(&self, id: &str) -> Result<LocalFolder, CoreError> {
        let folders = self.folders.lock().unwrap();
        let change = folders.get(id).ok_or_else(|| CoreError::SyncEngine {
            message: format!("unknown folder {id}"),
        })?;
        Ok(LocalFolder {
            id: change.id.clone(),
            label: change.label.clone(),
            path: change.local_path.clone(),
        })
    }

    async fn folder_scan(&self, id: &str, _subpath: &str) -> Result<(), CoreError> {
        self.scans.lock().unwrap().push(id.to_owned());
        Ok(())
    }

    fn register(
        &self,
        kind: LocalEventKind,
        folder_filter: &str,
        callback: LocalEventCallback,
    ) -> Result<u64, CoreError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.registrations.lock().unwrap().insert(
            id,
            Registration {
                kind,
                folder: folder_filter.to_owned(),
                callback,
            },
        );
        Ok(id)
    }

    fn unregister(&self, subscription: u64) -> Result<(), CoreError> {
        self.registrations.lock().unwrap().remove(&subscription);
        Ok(())
    }
}

// ── Agent wiring ────────────────────────────────────────────────────

pub struct Agent {
    pub conn: ServerConnection,
    pub pool: ConnectionPool,
    pub broker: EventBroker,
    pub registry: ProjectRegistry,
    pub events: mpsc::UnboundedReceiver<Arc<EventEnvelope>>,
}

impl Agent {
    /// Connect to `backend` and register a UI session for every agent event.
    pub async fn connect(backend: &Backend, engine: Option<Arc<MemoryEngine>>) -> Self {
        let sessions = Arc::new(SessionTable::new());
        let events = sessions.attach(SESSION);
        let broker = EventBroker::new(sessions);
        broker.register("event:all", SESSION).unwrap();

        let conn = ServerConnection::new(backend.connection_config(), broker.clone()).unwrap();
        let pool = ConnectionPool::new();
        pool.add(conn.clone());

        let ctx = AgentContext {
            agent_uid: "agent-uid-1".into(),
            agent_url: "http://localhost:8800".into(),
            broker: broker.clone(),
            sync_engine: engine.map(|e| e as Arc<dyn SyncEngine>),
        };
        let registry = ProjectRegistry::with_sync_delay(ctx, pool.clone(), Duration::from_millis(10));
        conn.set_reconnect_handler(registry.reconnect_handler());

        conn.connect().await.unwrap();
        assert_eq!(*conn.state().borrow(), ConnectionState::Connected);

        let mut agent = Self {
            conn,
            pool,
            broker,
            registry,
            events,
        };
        agent.drain_events();
        agent
    }

    /// Event types received so far, oldest first.
    pub fn drain_events(&mut self) -> Vec<Arc<EventEnvelope>> {
        let mut out = Vec::new();
        while let Ok(ev) = self.events.try_recv() {
            out.push(ev);
        }
        out
    }

    pub fn drain_project_events(&mut self) -> Vec<Arc<EventEnvelope>> {
        self.drain_events()
            .into_iter()
            .filter(|ev| ev.event_type != "event:server-config")
            .collect()
    }

    pub async fn next_event(&mut self, event_type: &str) -> Arc<EventEnvelope> {
        loop {
            let ev = tokio::time::timeout(Duration::from_secs(5), self.events.recv())
                .await
                .expect("timed out waiting for agent event")
                .expect("session channel closed");
            if ev.event_type == event_type {
                return ev;
            }
        }
    }
}

/// Poll `cond` until it holds or five seconds pass.
pub async fn eventually(cond: impl Fn() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within 5s");
}
