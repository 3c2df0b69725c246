//! Backend event socket.
//!
//! A WebSocket to `<base>/events` that carries JSON text frames:
//!
//! - incoming `{"event": "<name>", "data": <payload>}`
//! - outgoing `{"event": "<name>", "args": [..]}`
//! - subscription requests `{"subscribe": "<name>"}`
//!
//! One background task owns both halves of the stream. Incoming frames for
//! subscribed names and the final disconnection are reported through a
//! [`SocketSink`] callback. Cancelling the socket (via [`EventSocket::close`]
//! or the parent token) tears the task down without reporting a
//! disconnection, so only unexpected loss reaches the sink.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder, Message};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::Error;
use crate::transport::AGENT_SID_HEADER;

/// Path of the event socket below a backend base URL.
pub const EVENTS_PATH: &str = "/events";

// ── SocketEvent ──────────────────────────────────────────────────────

/// What the socket task reports to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketEvent {
    /// A frame for a subscribed event name.
    Message { name: String, data: Value },
    /// The connection dropped without being asked to.
    Disconnected { reason: Option<String> },
}

/// Callback receiving [`SocketEvent`]s from the socket task.
pub type SocketSink = Arc<dyn Fn(SocketEvent) + Send + Sync>;

// ── EventSocket ──────────────────────────────────────────────────────

/// Handle to a live event socket.
pub struct EventSocket {
    outgoing: mpsc::UnboundedSender<Message>,
    subscriptions: Arc<Mutex<HashSet<String>>>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for EventSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSocket")
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl EventSocket {
    /// Open the socket and spawn its background task.
    ///
    /// Returns once the WebSocket upgrade has completed, so a failure to
    /// reach the backend is reported here rather than through the sink.
    pub async fn connect(
        url: &Url,
        agent_sid: Option<&str>,
        sink: SocketSink,
        cancel: CancellationToken,
    ) -> Result<Self, Error> {
        tracing::info!(url = %url, "Connecting event socket");

        let uri: tungstenite::http::Uri = url.as_str().parse().map_err(
            |e: tungstenite::http::uri::InvalidUri| Error::WebSocketConnect(e.to_string()),
        )?;

        let mut request = ClientRequestBuilder::new(uri);
        if let Some(sid) = agent_sid {
            request = request.with_header(AGENT_SID_HEADER, sid);
        }

        let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

        tracing::info!("Event socket connected");

        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let subscriptions = Arc::new(Mutex::new(HashSet::new()));

        let task_subs = Arc::clone(&subscriptions);
        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            socket_loop(ws_stream, outgoing_rx, task_subs, sink, task_cancel).await;
        });

        Ok(Self {
            outgoing,
            subscriptions,
            cancel,
        })
    }

    /// Subscribe to frames named `name`.
    ///
    /// Returns `true` when this is a new subscription, in which case a
    /// subscription request is also sent to the backend.
    pub fn subscribe(&self, name: &str) -> bool {
        let inserted = self
            .subscriptions
            .lock()
            .expect("socket subscriptions lock poisoned")
            .insert(name.to_owned());
        if inserted {
            let frame = json!({ "subscribe": name }).to_string();
            if self.outgoing.send(Message::text(frame)).is_err() {
                tracing::debug!(event = name, "subscription request dropped, socket closed");
            }
        }
        inserted
    }

    pub fn is_subscribed(&self, name: &str) -> bool {
        self.subscriptions
            .lock()
            .expect("socket subscriptions lock poisoned")
            .contains(name)
    }

    /// Push an event to the backend.
    pub fn emit(&self, name: &str, args: Vec<Value>) -> Result<(), Error> {
        let frame = json!({ "event": name, "args": args }).to_string();
        self.outgoing
            .send(Message::text(frame))
            .map_err(|_| Error::SocketClosed)
    }

    /// Whether the background task has exited.
    pub fn is_closed(&self) -> bool {
        self.outgoing.is_closed()
    }

    /// Tear the socket down without reporting a disconnection.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

impl Drop for EventSocket {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Derive the event socket URL (`ws`/`wss`) from a backend base URL.
pub fn socket_url(base_url: &Url) -> Result<Url, Error> {
    let base = base_url.as_str().trim_end_matches('/');
    let ws = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_owned()
    };
    Ok(Url::parse(&format!("{ws}{EVENTS_PATH}"))?)
}

// ── Background task ──────────────────────────────────────────────────

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn socket_loop(
    ws_stream: WsStream,
    mut outgoing_rx: mpsc::UnboundedReceiver<Message>,
    subscriptions: Arc<Mutex<HashSet<String>>>,
    sink: SocketSink,
    cancel: CancellationToken,
) {
    let (mut write, mut read) = ws_stream.split();

    let reason = loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                tracing::debug!("Event socket closed on request");
                return;
            }
            Some(msg) = outgoing_rx.recv() => {
                if let Err(e) = write.send(msg).await {
                    break Some(e.to_string());
                }
            }
            frame = read.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        dispatch_frame(text.as_str(), &subscriptions, &sink);
                    }
                    Some(Ok(Message::Ping(_))) => {
                        // tungstenite answers pings on the next write/flush
                        tracing::trace!("Event socket ping");
                    }
                    Some(Ok(Message::Close(frame))) => {
                        break frame.map(|cf| format!("close {}: {}", cf.code, cf.reason));
                    }
                    Some(Err(e)) => break Some(e.to_string()),
                    None => break None,
                    _ => {}
                }
            }
        }
    };

    tracing::info!(reason = reason.as_deref().unwrap_or("stream ended"), "Event socket lost");
    sink(SocketEvent::Disconnected { reason });
}

#[derive(Debug, Deserialize)]
struct IncomingFrame {
    event: String,
    #[serde(default)]
    data: Value,
}

fn dispatch_frame(text: &str, subscriptions: &Mutex<HashSet<String>>, sink: &SocketSink) {
    let frame: IncomingFrame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(e) => {
            tracing::debug!(error = %e, "Failed to parse event frame");
            return;
        }
    };

    let wanted = subscriptions
        .lock()
        .expect("socket subscriptions lock poisoned")
        .contains(&frame.event);
    if !wanted {
        tracing::trace!(event = %frame.event, "Dropping frame for unsubscribed event");
        return;
    }

    sink(SocketEvent::Message {
        name: frame.event,
        data: frame.data,
    });
}
