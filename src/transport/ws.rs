//! WebSocket transport driver.
//!
//! Bridges socket events to the reliability core. Each accepted connection
//! splits into a reader (this task) and a writer task that owns the sink;
//! the bounded channel feeding the writer is the per-socket send queue, and
//! producers reach it only through non-blocking [`SocketHandle::send_frame`].
//! A full queue means the consumer cannot keep up and the connection is
//! closed with 1009.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message, WebSocketConfig};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

use super::inspector::HandshakeInspector;
use crate::core::time::monotonic_millis;
use crate::qos::scheduler::RetryTarget;
use crate::qos::{ConnState, FrameSink, Inbound, QosEngine, ReliableOptions};
use crate::rpc::context::ReplySink;
use crate::session::{Session, SessionStore};

/// WebSocket close code for backpressure overflow.
pub const CLOSE_OVERFLOW: u16 = 1009;
/// WebSocket close code used when a newer socket replaces this one.
pub const CLOSE_REPLACED: u16 = 1000;

pub type ConnId = u64;

// ---------------------------------------------------------------------------
// Socket handle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct CloseCommand {
    code: u16,
    reason: String,
}

/// Cheap handle onto a connection's writer task. All sends and closes from
/// other tasks defer through these channels; only the writer touches the
/// socket.
#[derive(Debug, Clone)]
pub struct SocketHandle {
    conn_id: ConnId,
    frames: mpsc::Sender<Bytes>,
    control: mpsc::UnboundedSender<CloseCommand>,
}

impl SocketHandle {
    pub fn conn_id(&self) -> ConnId {
        self.conn_id
    }

    /// Asks the writer to send a close frame and shut the socket down.
    pub fn request_close(&self, code: u16, reason: &str) {
        let _ = self.control.send(CloseCommand {
            code,
            reason: reason.to_string(),
        });
    }
}

impl FrameSink for SocketHandle {
    fn send_frame(&self, frame: Bytes) -> bool {
        match self.frames.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(conn_id = self.conn_id, "send queue overflow; closing");
                self.request_close(CLOSE_OVERFLOW, "send queue overflow");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Reply port
// ---------------------------------------------------------------------------

/// Send path bound to one originating connection, handed to dispatch.
#[derive(Clone)]
pub struct ReplyPort {
    engine: QosEngine,
    state: Arc<ConnState>,
    socket: SocketHandle,
}

impl ReplySink for ReplyPort {
    fn reply(&self, payload: &[u8]) {
        self.engine.send(&self.socket, &self.state, payload);
    }

    fn close(&self, code: u16, reason: &str) {
        self.socket.request_close(code, reason);
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// One active connection as tracked by the transport.
#[derive(Clone)]
pub struct ConnEntry {
    pub session: Arc<Session>,
    pub state: Arc<ConnState>,
    pub socket: SocketHandle,
}

/// Callback invoked for each admitted DATA payload.
pub type DataCallback = Arc<dyn Fn(Vec<u8>, Arc<Session>, ReplyPort) + Send + Sync>;
/// Callback invoked when a session comes online on a connection.
pub type SessionCallback = Arc<dyn Fn(Arc<Session>) + Send + Sync>;

#[derive(Default)]
struct Callbacks {
    data: Option<DataCallback>,
    register: Option<SessionCallback>,
    disconnect: Option<SessionCallback>,
}

pub struct WsTransport {
    opts: Arc<ReliableOptions>,
    engine: QosEngine,
    store: Arc<SessionStore>,
    inspector: Arc<dyn HandshakeInspector>,
    connections: RwLock<HashMap<ConnId, ConnEntry>>,
    next_conn_id: AtomicU64,
    idle_timeout: Duration,
    max_payload_bytes: usize,
    callbacks: RwLock<Callbacks>,
}

impl WsTransport {
    pub fn new(
        opts: Arc<ReliableOptions>,
        store: Arc<SessionStore>,
        inspector: Arc<dyn HandshakeInspector>,
        idle_timeout: Duration,
        max_payload_bytes: usize,
    ) -> Self {
        Self {
            engine: QosEngine::new(opts.clone()),
            opts,
            store,
            inspector,
            connections: RwLock::new(HashMap::new()),
            next_conn_id: AtomicU64::new(1),
            idle_timeout,
            max_payload_bytes,
            callbacks: RwLock::new(Callbacks::default()),
        }
    }

    pub fn engine(&self) -> &QosEngine {
        &self.engine
    }

    pub fn set_data_callback(&self, cb: DataCallback) {
        self.callbacks.write().data = Some(cb);
    }

    pub fn set_register_callback(&self, cb: SessionCallback) {
        self.callbacks.write().register = Some(cb);
    }

    pub fn set_disconnect_callback(&self, cb: SessionCallback) {
        self.callbacks.write().disconnect = Some(cb);
    }

    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }

    /// Snapshot for the retry scheduler; taken under the read lock, used
    /// outside it.
    pub fn retry_targets(&self) -> Vec<RetryTarget> {
        self.connections
            .read()
            .values()
            .map(|entry| RetryTarget {
                state: entry.state.clone(),
                sink: Arc::new(entry.socket.clone()),
            })
            .collect()
    }

    /// Sends to every active connection at the configured QoS level.
    pub fn broadcast(&self, payload: &[u8]) {
        let entries: Vec<ConnEntry> = self.connections.read().values().cloned().collect();
        for entry in entries {
            self.engine.send(&entry.socket, &entry.state, payload);
        }
    }

    // -----------------------------------------------------------------------
    // Accept loop
    // -----------------------------------------------------------------------

    /// Serves upgrades until the shutdown flag flips.
    pub async fn serve(
        self: &Arc<Self>,
        listener: TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        let local = listener.local_addr().context("listener address")?;
        info!(%local, "websocket transport listening");
        if self.opts.enable_compression {
            info!(
                threshold = self.opts.compression_threshold_bytes,
                "compression negotiated per-socket via the websocket extension"
            );
        }
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let transport = self.clone();
                            tokio::spawn(async move {
                                if let Err(err) = transport.handle_connection(stream, peer).await {
                                    debug!(%peer, %err, "connection ended with error");
                                }
                            });
                        }
                        Err(err) => {
                            warn!(%err, "accept failed");
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("transport accept loop stopping");
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn handle_connection(self: Arc<Self>, stream: TcpStream, peer: SocketAddr) -> Result<()> {
        let mut accepted: Option<Arc<Session>> = None;
        let inspector = self.inspector.clone();
        let store = self.store.clone();
        let callback = |request: &Request, mut response: Response| {
            match inspector.extract(request.headers()) {
                Err(reason) => {
                    warn!(%peer, %reason, "handshake rejected");
                    let mut error = ErrorResponse::new(Some(reason));
                    *error.status_mut() = StatusCode::BAD_REQUEST;
                    Err(error)
                }
                Ok(identity) => {
                    let session = store.get_or_create(identity, monotonic_millis());
                    if let Ok(value) = HeaderValue::from_str(&session.identity().token_hex()) {
                        response.headers_mut().insert("x-session-token", value);
                    }
                    accepted = Some(session);
                    Ok(response)
                }
            }
        };
        let mut ws_config = WebSocketConfig::default();
        ws_config.max_message_size = Some(self.max_payload_bytes);
        let ws = tokio_tungstenite::accept_hdr_async_with_config(stream, callback, Some(ws_config))
            .await
            .context("websocket upgrade")?;
        let session = accepted.context("handshake produced no session")?;

        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        let (frame_tx, frame_rx) = mpsc::channel(self.opts.max_send_queue_size);
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let socket = SocketHandle {
            conn_id,
            frames: frame_tx,
            control: control_tx,
        };
        let entry = ConnEntry {
            session: session.clone(),
            state: session.conn_state().clone(),
            socket: socket.clone(),
        };

        // Rebind before publishing the connection so the old socket is
        // replaced through its own writer, never from the accept path.
        if let Some(stale) = session.rebind(socket.clone()) {
            info!(sid = session.id(), "closing stale connection for identity");
            stale.request_close(CLOSE_REPLACED, "connection replaced by new client");
        }
        self.connections.write().insert(conn_id, entry.clone());
        info!(sid = session.id(), conn_id, %peer,
            pending1 = entry.state.pending1_len(),
            "session online");

        let (sink, mut reader) = ws.split();
        let writer = tokio::spawn(writer_loop(sink, frame_rx, control_rx));

        // Queued offline messages go out first, in enqueue order, before
        // any post-reconnect frames.
        let drained = self.store.drain_offline(session.id(), |data| {
            self.engine.send(&socket, &entry.state, &data);
        });
        if drained > 0 {
            debug!(sid = session.id(), drained, "offline backlog flushed");
        }

        let register = self.callbacks.read().register.clone();
        if let Some(cb) = register {
            cb(session.clone());
        }

        loop {
            match tokio::time::timeout(self.idle_timeout, reader.next()).await {
                Err(_) => {
                    debug!(conn_id, "idle timeout");
                    socket.request_close(CLOSE_REPLACED, "idle timeout");
                    break;
                }
                Ok(None) => break,
                Ok(Some(Err(err))) => {
                    debug!(conn_id, %err, "read error");
                    break;
                }
                Ok(Some(Ok(Message::Binary(data)))) => self.on_binary(&entry, &data),
                Ok(Some(Ok(Message::Close(_)))) => break,
                Ok(Some(Ok(_))) => {
                    debug!(conn_id, "ignoring non-binary message");
                }
            }
        }

        self.on_close(conn_id, &session);
        // Wake the writer so it does not linger on an idle channel.
        socket.request_close(CLOSE_REPLACED, "connection closed");
        drop(socket);
        let _ = writer.await;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Event handlers
    // -----------------------------------------------------------------------

    fn on_binary(&self, entry: &ConnEntry, raw: &[u8]) {
        match self.engine.on_frame(&entry.socket, &entry.state, raw) {
            Inbound::Deliver(payload) => {
                if !entry
                    .session
                    .accept_request(&payload, self.opts.duplicate_ttl())
                {
                    debug!(sid = entry.session.id(), "suppressing replayed request");
                    return;
                }
                let data_cb = self.callbacks.read().data.clone();
                match data_cb {
                    Some(cb) => {
                        let port = ReplyPort {
                            engine: self.engine.clone(),
                            state: entry.state.clone(),
                            socket: entry.socket.clone(),
                        };
                        cb(payload, entry.session.clone(), port);
                    }
                    None => warn!("no data callback installed; dropping payload"),
                }
            }
            Inbound::Handled | Inbound::Dropped => {}
        }
    }

    fn on_close(&self, conn_id: ConnId, session: &Arc<Session>) {
        self.connections.write().remove(&conn_id);
        // Only the socket currently bound to the session may take it
        // offline; a replaced socket closing late must not.
        if session.unbind(conn_id) {
            session.set_expiry_ms(monotonic_millis() + self.opts.session_ttl_ms);
            info!(sid = session.id(), conn_id, "session offline");
            let disconnect = self.callbacks.read().disconnect.clone();
            if let Some(cb) = disconnect {
                cb(session.clone());
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Writer task
// ---------------------------------------------------------------------------

/// Sole owner of the socket sink. Drains the frame queue; a control command
/// preempts queued frames and terminates the connection.
async fn writer_loop(
    mut sink: futures::stream::SplitSink<WebSocketStream<TcpStream>, Message>,
    mut frames: mpsc::Receiver<Bytes>,
    mut control: mpsc::UnboundedReceiver<CloseCommand>,
) {
    loop {
        tokio::select! {
            biased;
            command = control.recv() => {
                if let Some(command) = command {
                    let close = CloseFrame {
                        code: CloseCode::from(command.code),
                        reason: command.reason.into(),
                    };
                    let _ = sink.send(Message::Close(Some(close))).await;
                }
                break;
            }
            frame = frames.recv() => {
                match frame {
                    Some(frame) => {
                        if sink.send(Message::Binary(frame.to_vec())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }
    let _ = sink.close().await;
}
