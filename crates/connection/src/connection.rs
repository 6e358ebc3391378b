//! The connection manager: one socket to the editor, request correlation,
//! keepalive, and automatic reconnection.

use std::sync::{Arc, Weak};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use gb_protocol::{decode, Decoded, Request, Response, CLOSE_CODE_ALREADY_CONNECTED};

use crate::builder::ConnectionBuilder;
use crate::diagnostics::{ConnectionDiagnostics, ConnectionState, DiagnosticsRecorder};
use crate::events::{ConnectionEvent, EventBus};
use crate::handshake::{self, HandshakeResult, HandshakeStatus};
use crate::keepalive::{KeepaliveConfig, KeepaliveMonitor};
use crate::log_limit::LogLimiter;
use crate::pending::PendingTable;
use crate::reconnect::{ReconnectBackoff, ReconnectScheduler};
use crate::types::BridgeError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

const OUTBOUND_CAPACITY: usize = 64;
const EVENT_CAPACITY: usize = 64;
const CLOSE_GRACE: Duration = Duration::from_secs(1);
const PONG_TIMEOUT_MESSAGE: &str = "Pong timeout - connection may be dead";

/// Resolved settings for one [`Connection`]. Produced by
/// [`ConnectionBuilder::build`].
#[derive(Debug, Clone)]
pub(crate) struct Settings {
    pub(crate) host: String,
    pub(crate) port: u16,
    pub(crate) auto_reconnect: bool,
    pub(crate) client_version: String,
    pub(crate) command_timeout: Duration,
    pub(crate) handshake_timeout: Duration,
    pub(crate) keepalive: KeepaliveConfig,
    pub(crate) reconnect_backoff: ReconnectBackoff,
}

/// Handle to the editor connection. Cheap to clone; all clones share one
/// socket. The socket is closed once the last clone is dropped.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

struct Inner {
    url: String,
    settings: Settings,
    state: Mutex<State>,
    pending: PendingTable,
    events: EventBus,
    log_limiter: LogLimiter,
}

struct State {
    lifecycle: ConnectionState,
    socket: Option<Socket>,
    /// A `connect()` call is between dialing and the end of its handshake.
    connecting: bool,
    /// Set by an explicit `disconnect()`; suppresses reconnection.
    closing: bool,
    /// Bumped per connection attempt and per explicit disconnect. Socket
    /// tasks carry the value they were started with and become no-ops once
    /// it is stale.
    generation: u64,
    handshake: Option<HandshakeResult>,
    diagnostics: DiagnosticsRecorder,
    reconnect: ReconnectScheduler,
}

struct Socket {
    generation: u64,
    outbound: mpsc::Sender<Message>,
    shutdown: CancellationToken,
    keepalive: KeepaliveMonitor,
}

impl Socket {
    fn close(self) {
        self.keepalive.stop();
        self.shutdown.cancel();
    }
}

impl Connection {
    pub fn builder() -> ConnectionBuilder {
        ConnectionBuilder::new()
    }

    pub(crate) fn from_settings(settings: Settings) -> Self {
        let url = build_url(&settings.host, settings.port);
        let state = State {
            lifecycle: ConnectionState::Disconnected,
            socket: None,
            connecting: false,
            closing: false,
            generation: 0,
            handshake: None,
            diagnostics: DiagnosticsRecorder::default(),
            reconnect: ReconnectScheduler::new(settings.reconnect_backoff.clone()),
        };
        Self {
            inner: Arc::new(Inner {
                url,
                settings,
                state: Mutex::new(state),
                pending: PendingTable::new(),
                events: EventBus::new(EVENT_CAPACITY),
                log_limiter: LogLimiter::new(),
            }),
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Open the socket and run the handshake.
    ///
    /// Returns `Ok` immediately if a socket is already open. A handshake that
    /// fails or times out is reported through
    /// [`ConnectionEvent::HandshakeFailed`] and does not fail this call.
    pub async fn connect(&self) -> Result<(), BridgeError> {
        self.inner.connect().await
    }

    /// Close the socket, fail every pending request, and stop reconnecting
    /// until the next explicit [`connect`](Self::connect).
    pub fn disconnect(&self) {
        self.inner.disconnect();
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Send `command` and wait for its reply, using the configured command
    /// timeout.
    pub async fn send_command(&self, command: &str, params: Value) -> Result<Value, BridgeError> {
        let timeout = self.inner.settings.command_timeout;
        self.send_command_with_timeout(command, params, timeout).await
    }

    /// Like [`send_command`](Self::send_command) with an explicit deadline.
    pub async fn send_command_with_timeout(
        &self,
        command: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, BridgeError> {
        if !self.is_connected() {
            return Err(BridgeError::Connectivity(format!(
                "Not connected to Godot\n{}",
                self.diagnostic_message()
            )));
        }
        let request = Request::new(command, params);
        tracing::debug!(request_id = %request.id, command, "sending command");
        self.inner.round_trip(request, timeout).await
    }

    // ── Accessors ────────────────────────────────────────────────────

    /// Whether a socket is open. True from socket open until close,
    /// including while the handshake runs.
    pub fn is_connected(&self) -> bool {
        self.inner.state.lock().socket.is_some()
    }

    pub fn url(&self) -> &str {
        &self.inner.url
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.lock().lifecycle
    }

    pub fn client_version(&self) -> &str {
        &self.inner.settings.client_version
    }

    /// `None` while no socket is open; status `Pending` until the addon
    /// answers.
    pub fn handshake(&self) -> Option<HandshakeResult> {
        self.inner.state.lock().handshake.clone()
    }

    pub fn addon_version(&self) -> Option<String> {
        self.with_handshake(|h| h.addon_version.clone())
    }

    pub fn godot_version(&self) -> Option<String> {
        self.with_handshake(|h| h.godot_version.clone())
    }

    pub fn project_path(&self) -> Option<String> {
        self.with_handshake(|h| h.project_path.clone())
    }

    pub fn project_name(&self) -> Option<String> {
        self.with_handshake(|h| h.project_name.clone())
    }

    /// False when there is no handshake result or the addon reported a
    /// different version than ours.
    pub fn versions_match(&self) -> bool {
        self.with_handshake(|h| h.versions_match(&self.inner.settings.client_version))
            .unwrap_or(false)
    }

    pub fn diagnostics(&self) -> ConnectionDiagnostics {
        let st = self.inner.state.lock();
        st.diagnostics
            .snapshot(st.lifecycle, st.reconnect.attempt(), &self.inner.url)
    }

    pub fn diagnostic_message(&self) -> String {
        self.diagnostics().render()
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.events.subscribe()
    }

    fn with_handshake<T>(&self, f: impl FnOnce(&HandshakeResult) -> T) -> Option<T> {
        self.inner.state.lock().handshake.as_ref().map(f)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("url", &self.inner.url)
            .field("state", &self.state())
            .finish()
    }
}

impl Inner {
    async fn connect(self: &Arc<Self>) -> Result<(), BridgeError> {
        let generation = {
            let mut st = self.state.lock();
            if st.socket.is_some() {
                return Ok(());
            }
            if st.connecting {
                return Err(BridgeError::Connectivity(
                    "connection attempt already in progress".into(),
                ));
            }
            st.connecting = true;
            st.closing = false;
            st.reconnect.cancel();
            st.generation += 1;
            st.lifecycle = if st.reconnect.attempt() > 0 {
                ConnectionState::Reconnecting
            } else {
                ConnectionState::Connecting
            };
            st.generation
        };

        tracing::debug!(url = %self.url, generation, "connecting to editor");

        let ws = match tokio_tungstenite::connect_async(self.url.as_str()).await {
            Ok((ws, _response)) => ws,
            Err(e) => return Err(self.connect_failed(generation, e)),
        };
        let (sink, stream) = ws.split();
        let (outbound, outbound_rx) = mpsc::channel::<Message>(OUTBOUND_CAPACITY);
        let shutdown = CancellationToken::new();

        {
            let mut st = self.state.lock();
            if st.generation != generation {
                // disconnect() won the race; close what we just opened.
                shutdown.cancel();
                tokio::spawn(write_loop(sink, outbound_rx, shutdown));
                return Err(BridgeError::Connectivity(
                    "connection attempt cancelled".into(),
                ));
            }

            let weak = Arc::downgrade(self);
            let keepalive =
                KeepaliveMonitor::start(self.settings.keepalive, outbound.clone(), move || {
                    if let Some(inner) = weak.upgrade() {
                        inner.keepalive_expired(generation);
                    }
                });
            st.socket = Some(Socket {
                generation,
                outbound,
                shutdown: shutdown.clone(),
                keepalive,
            });
            st.handshake = Some(HandshakeResult::unknown(HandshakeStatus::Pending));
            st.reconnect.reset();
        }

        tokio::spawn(write_loop(sink, outbound_rx, shutdown.clone()));
        tokio::spawn(read_loop(Arc::downgrade(self), generation, stream, shutdown));
        tracing::debug!(url = %self.url, generation, "socket open, starting handshake");

        let request = Request::handshake(&self.settings.client_version);
        let reply = self
            .round_trip(request, self.settings.handshake_timeout)
            .await;
        let evaluation = handshake::evaluate(reply);

        let mut st = self.state.lock();
        if st.generation == generation {
            st.connecting = false;
        }
        let live = matches!(&st.socket, Some(s) if s.generation == generation);
        if !live {
            return Err(BridgeError::Connectivity(
                "Connection closed during handshake".into(),
            ));
        }

        let result = evaluation.result;
        st.handshake = Some(result.clone());
        st.lifecycle = ConnectionState::Connected;

        if let Some(error) = evaluation.failure {
            tracing::debug!(
                error = %error,
                status = ?result.status,
                "handshake failed (addon may be outdated)"
            );
            self.events.emit(ConnectionEvent::HandshakeFailed { error });
        } else if !result.versions_match(&self.settings.client_version) {
            tracing::debug!(
                server_version = %self.settings.client_version,
                addon_version = %result.addon_version,
                project_path = %result.project_path,
                "addon version differs from bridge version"
            );
            self.events.emit(ConnectionEvent::VersionMismatch {
                server_version: self.settings.client_version.clone(),
                addon_version: result.addon_version.clone(),
                project_path: result.project_path.clone(),
            });
        }

        tracing::debug!(
            url = %self.url,
            addon_version = %result.addon_version,
            godot_version = %result.godot_version,
            project = %result.project_name,
            "connected to editor"
        );
        self.events.emit(ConnectionEvent::Connected);
        Ok(())
    }

    fn connect_failed(self: &Arc<Self>, generation: u64, err: WsError) -> BridgeError {
        let refused = matches!(
            &err,
            WsError::Io(io) if io.kind() == std::io::ErrorKind::ConnectionRefused
        );
        let message = err.to_string();
        let failure = BridgeError::Connectivity(format!("Failed to connect: {message}"));

        let mut st = self.state.lock();
        if st.generation != generation {
            return failure;
        }
        st.connecting = false;
        st.lifecycle = ConnectionState::Disconnected;
        st.diagnostics.record_transport_error(message.clone(), refused);
        st.diagnostics.record_close(None, false);

        tracing::debug!(url = %self.url, error = %message, refused, "connection attempt failed");
        self.events.emit(ConnectionEvent::Error { message });
        self.events.emit(ConnectionEvent::Disconnected);

        if self.settings.auto_reconnect && !st.closing {
            self.schedule_reconnect(&mut st);
        }
        failure
    }

    fn disconnect(&self) {
        let mut st = self.state.lock();
        st.closing = true;
        st.connecting = false;
        st.generation += 1;
        st.diagnostics.record_explicit_disconnect();
        st.lifecycle = ConnectionState::Disconnected;

        let had_socket = st.socket.is_some();
        self.cleanup(&mut st);
        if had_socket {
            tracing::debug!(url = %self.url, "disconnected from editor");
            self.events.emit(ConnectionEvent::Disconnected);
        }
    }

    /// Issue `request` on the current socket and wait for the matching reply.
    async fn round_trip(&self, request: Request, timeout: Duration) -> Result<Value, BridgeError> {
        let text = gb_protocol::encode(&request)
            .map_err(|e| BridgeError::Connectivity(format!("failed to encode request: {e}")))?;

        // `cleanup` rejects every entry under this lock.
        let (outbound, rx) = {
            let st = self.state.lock();
            let Some(socket) = st.socket.as_ref() else {
                return Err(BridgeError::connection_closed());
            };
            let rx = self
                .pending
                .register(&request.id, &request.command, timeout)?;
            (socket.outbound.clone(), rx)
        };
        if outbound.send(Message::Text(text)).await.is_err() {
            self.pending
                .reject(&request.id, BridgeError::connection_closed());
        }
        rx.await
            .unwrap_or_else(|_| Err(BridgeError::connection_closed()))
    }

    // ── Socket events ────────────────────────────────────────────────

    fn handle_text(&self, text: &str) {
        match decode(text) {
            Decoded::Reply(Response::Success { id, result }) => {
                if !self.pending.resolve(&id, result) {
                    self.unmatched(&id);
                }
            }
            Decoded::Reply(Response::Error { id, error }) => {
                let err = BridgeError::Command {
                    code: error.code,
                    message: error.message,
                };
                if !self.pending.reject(&id, err) {
                    self.unmatched(&id);
                }
            }
            Decoded::Malformed {
                id: Some(id),
                reason,
            } => {
                if !self
                    .pending
                    .reject(&id, BridgeError::MalformedResponse(reason.clone()))
                {
                    tracing::debug!(request_id = %id, reason = %reason, "malformed reply for unknown request");
                    self.events.emit(ConnectionEvent::Error {
                        message: format!("Invalid response (no matching request): {reason}"),
                    });
                }
            }
            Decoded::Malformed { id: None, reason } => {
                tracing::debug!(reason = %reason, "dropping frame without correlation id");
                self.events.emit(ConnectionEvent::Error {
                    message: format!("Invalid frame from Godot: {reason}"),
                });
            }
        }
    }

    fn unmatched(&self, id: &str) {
        tracing::debug!(request_id = %id, "reply for unknown or expired request");
        self.events.emit(ConnectionEvent::Error {
            message: format!("Response for unknown request {id}"),
        });
    }

    fn acknowledge_pong(&self, generation: u64, payload: Vec<u8>) {
        let st = self.state.lock();
        if let Some(socket) = st.socket.as_ref().filter(|s| s.generation == generation) {
            socket.keepalive.acknowledge(payload);
        }
    }

    fn keepalive_expired(&self, generation: u64) {
        let mut st = self.state.lock();
        let shutdown = match st.socket.as_ref() {
            Some(socket) if socket.generation == generation => socket.shutdown.clone(),
            _ => return,
        };
        st.diagnostics
            .record_transport_error(PONG_TIMEOUT_MESSAGE, false);
        tracing::debug!(url = %self.url, "no pong from editor, dropping socket");
        self.events.emit(ConnectionEvent::Error {
            message: PONG_TIMEOUT_MESSAGE.into(),
        });
        shutdown.cancel();
    }

    fn stream_error(&self, generation: u64, err: &WsError) {
        let mut st = self.state.lock();
        if !matches!(&st.socket, Some(s) if s.generation == generation) {
            return;
        }
        let message = err.to_string();
        st.diagnostics.record_transport_error(message.clone(), false);
        tracing::debug!(url = %self.url, error = %message, "socket error");
        self.events.emit(ConnectionEvent::Error { message });
    }

    /// The socket started under `generation` is gone.
    fn handle_close(self: &Arc<Self>, generation: u64, close: Option<(u16, String)>) {
        let mut st = self.state.lock();
        if !matches!(&st.socket, Some(s) if s.generation == generation) {
            return;
        }

        let code = close.as_ref().map(|(code, _)| *code);
        let was_connected = st.lifecycle == ConnectionState::Connected;
        st.lifecycle = ConnectionState::Disconnected;
        st.diagnostics.record_close(code, was_connected);

        if code == Some(CLOSE_CODE_ALREADY_CONNECTED) {
            let reason = close
                .as_ref()
                .map(|(_, reason)| reason.as_str())
                .filter(|r| !r.is_empty())
                .unwrap_or("Another client is already connected");
            tracing::error!(
                reason,
                suggestion = "Multiple bridge processes may be running",
                check_unix = "ps aux | grep godot-bridge",
                check_windows = "Get-Process -Name godot-bridge",
                "connection rejected: another client already connected"
            );
        } else {
            tracing::debug!(
                url = %self.url,
                code = ?code,
                reason = %st.diagnostics.reason(),
                "editor connection closed"
            );
        }

        self.cleanup(&mut st);
        self.events.emit(ConnectionEvent::Disconnected);

        if self.settings.auto_reconnect && !st.closing {
            self.schedule_reconnect(&mut st);
        }
    }

    /// Tear down everything tied to the current socket.
    fn cleanup(&self, st: &mut State) {
        if let Some(socket) = st.socket.take() {
            socket.close();
        }
        st.handshake = None;
        st.reconnect.cancel();
        let failed = self.pending.reject_all(BridgeError::connection_closed());
        if failed > 0 {
            tracing::debug!(failed, "failed pending requests on disconnect");
        }
    }

    fn schedule_reconnect(self: &Arc<Self>, st: &mut State) {
        let weak = Arc::downgrade(self);
        let retry = async move {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            inner.state.lock().reconnect.fired();
            if let Err(e) = inner.connect().await {
                if inner.log_limiter.allow("reconnect-failed") {
                    tracing::debug!(url = %inner.url, error = %e, "reconnect attempt failed");
                }
            }
        };

        if let Some((attempt, delay)) = st.reconnect.schedule(retry) {
            if self.log_limiter.allow("reconnect-scheduled") {
                tracing::debug!(
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "scheduling reconnect"
                );
            }
            self.events
                .emit(ConnectionEvent::Reconnecting { attempt, delay });
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let st = self.state.get_mut();
        if let Some(socket) = st.socket.take() {
            socket.close();
        }
        st.reconnect.cancel();
    }
}

// ── Socket tasks ─────────────────────────────────────────────────────

async fn write_loop(
    mut sink: WsSink,
    mut outbound: mpsc::Receiver<Message>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            msg = outbound.recv() => {
                let Some(msg) = msg else { break };
                // The reader observes the broken socket and runs close
                // handling; queued sends fail once the receiver is gone.
                if let Err(e) = sink.send(msg).await {
                    tracing::debug!(error = %e, "socket write failed");
                    return;
                }
            }
        }
    }

    let frame = CloseFrame {
        code: CloseCode::Normal,
        reason: "".into(),
    };
    let _ = tokio::time::timeout(CLOSE_GRACE, sink.send(Message::Close(Some(frame)))).await;
}

async fn read_loop(
    inner: Weak<Inner>,
    generation: u64,
    mut stream: WsSource,
    shutdown: CancellationToken,
) {
    let mut close = None;
    loop {
        let next = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            next = stream.next() => next,
        };
        let Some(conn) = inner.upgrade() else {
            return;
        };
        match next {
            Some(Ok(Message::Text(text))) => conn.handle_text(&text),
            Some(Ok(Message::Pong(payload))) => conn.acknowledge_pong(generation, payload),
            Some(Ok(Message::Close(frame))) => {
                close = frame.map(|f| (u16::from(f.code), f.reason.into_owned()));
                break;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                conn.stream_error(generation, &e);
                break;
            }
            None => break,
        }
    }

    if let Some(conn) = inner.upgrade() {
        conn.handle_close(generation, close);
    }
}

/// `ws://host:port`, bracketing bare IPv6 literals.
pub(crate) fn build_url(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("ws://[{host}]:{port}")
    } else {
        format!("ws://{host}:{port}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_url_plain_host() {
        assert_eq!(build_url("localhost", 6550), "ws://localhost:6550");
        assert_eq!(build_url("172.22.16.1", 7000), "ws://172.22.16.1:7000");
    }

    #[test]
    fn build_url_brackets_ipv6() {
        assert_eq!(build_url("::1", 6550), "ws://[::1]:6550");
        assert_eq!(build_url("[::1]", 6550), "ws://[::1]:6550");
    }

    #[tokio::test]
    async fn fresh_connection_is_disconnected() {
        let conn = Connection::builder().build().unwrap();
        assert!(!conn.is_connected());
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert_eq!(conn.url(), "ws://localhost:6550");
        assert!(conn.handshake().is_none());
        assert!(!conn.versions_match());
        assert_eq!(conn.pending_count(), 0);
    }

    #[tokio::test]
    async fn send_while_disconnected_renders_diagnostics() {
        let conn = Connection::builder().build().unwrap();
        let err = conn
            .send_command("get_scene_tree", serde_json::json!({}))
            .await
            .unwrap_err();
        match err {
            BridgeError::Connectivity(msg) => {
                assert!(msg.starts_with("Not connected to Godot\nStatus: Never successfully connected"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(conn.pending_count(), 0);
    }

    #[tokio::test]
    async fn disconnect_without_socket_is_quiet() {
        let conn = Connection::builder().build().unwrap();
        let mut events = conn.subscribe();
        conn.disconnect();
        assert!(events.try_recv().is_err());
        assert_eq!(
            conn.diagnostics().last_disconnect_reason,
            crate::diagnostics::DisconnectReason::ClosedNormally
        );
    }
}
