//! Connection Socket
//!
//! Single responsibility: Own at most one physical socket, translate its
//! events into `ConnectionState`, and carry request/response traffic.
//!
//! # Lifecycle
//!
//! `connect`, `disconnect_when_connected` and `cancel_connection` share one
//! critical section, so at most one physical socket exists at a time. Each
//! `connect` hands the new socket a `SocketListener` tagged with a fresh
//! generation; every teardown bumps the generation. A listener whose
//! generation is no longer current is inert, so callbacks from a replaced or
//! cancelled socket can never touch the state.
//!
//! # Requests
//!
//! Awaited requests are parked in a pending map keyed by request id until the
//! matching response arrives, the request times out, or the socket is torn
//! down. Teardown fails every parked request at once.
//!
//! Request ids below `KEEP_ALIVE_ID_BASE` belong to the caller (see
//! `next_request_id`); keep-alives draw from the range above it, so a
//! keep-alive response can never resolve a caller's request.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::protocol::{decode_frame, encode_request, encode_response, Frame, RequestFrame, ResponseFrame};
use super::state::{ConnectionState, StateCell, StateStream};
use super::transport::{Connector, HandshakeRequest, PhysicalSocket, SocketFailure};
use crate::error::SocketError;
use crate::login::CredentialAccessor;

/// Close codes treated as a clean shutdown rather than a failure.
const CLEAN_CLOSE_CODES: [u16; 2] = [1000, 1001];

/// First request id reserved for keep-alives.
pub const KEEP_ALIVE_ID_BASE: u64 = 1 << 63;

static NEXT_SOCKET_ID: AtomicU64 = AtomicU64::new(1);

/// Produces the URL for the next connect attempt.
pub type UrlProvider = Arc<dyn Fn() -> String + Send + Sync>;

type PendingSender = oneshot::Sender<Result<ResponseFrame, SocketError>>;

/// Told about every inbound frame, to reset keep-alive staleness.
pub trait LivenessObserver: Send + Sync {
    fn on_keep_alive_response(&self);
}

/// Configuration for a connection socket.
#[derive(Debug, Clone)]
pub struct SocketConfig {
    /// `User-Agent` sent with the handshake
    pub user_agent: String,
    /// How long an awaited request waits for its response
    pub request_timeout: Duration,
    /// Path of the keep-alive request
    pub keep_alive_path: String,
    /// Inbound peer requests held until `read_request` takes them
    pub incoming_queue_capacity: usize,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("chat-socket/{}", env!("CARGO_PKG_VERSION")),
            request_timeout: Duration::from_secs(10),
            keep_alive_path: "/v1/keepalive".to_string(),
            incoming_queue_capacity: 1024,
        }
    }
}

/// Map a socket failure to the state it leaves the connection in.
///
/// Returns `None` for a caller-initiated cancel, which has already moved the
/// state itself.
pub fn classify_failure(failure: &SocketFailure) -> Option<ConnectionState> {
    match failure {
        SocketFailure::Http { status: 401 | 403 } => Some(ConnectionState::AuthenticationFailed),
        SocketFailure::Http { status: 451 } => Some(ConnectionState::InactiveFailed),
        SocketFailure::UnknownHost(_) => Some(ConnectionState::UnknownHostFailed),
        SocketFailure::Canceled => None,
        SocketFailure::Http { .. } | SocketFailure::Transport(_) => Some(ConnectionState::Failed),
    }
}

struct Lifecycle {
    socket: Option<Box<dyn PhysicalSocket>>,
    generation: u64,
    connect_started: Option<Instant>,
}

impl Lifecycle {
    fn is_current(&self, generation: u64) -> bool {
        self.socket.is_some() && self.generation == generation
    }

    /// Drop the socket and invalidate its listener.
    fn retire(&mut self) -> Option<Box<dyn PhysicalSocket>> {
        self.generation += 1;
        self.connect_started = None;
        self.socket.take()
    }
}

/// Builder for `ConnectionSocket`.
pub struct ConnectionSocketBuilder {
    connector: Arc<dyn Connector>,
    url: UrlProvider,
    credentials: CredentialAccessor,
    config: SocketConfig,
    liveness: Option<Arc<dyn LivenessObserver>>,
}

impl ConnectionSocketBuilder {
    pub fn config(mut self, config: SocketConfig) -> Self {
        self.config = config;
        self
    }

    /// Install the liveness observer up front. `HealthMonitor::monitor`
    /// installs itself, so this is only needed for other observers.
    pub fn liveness(mut self, observer: Arc<dyn LivenessObserver>) -> Self {
        self.liveness = Some(observer);
        self
    }

    pub fn build(self) -> Arc<ConnectionSocket> {
        let (incoming_tx, incoming_rx) = mpsc::channel(self.config.incoming_queue_capacity.max(1));
        let id = NEXT_SOCKET_ID.fetch_add(1, Ordering::Relaxed);
        Arc::new_cyclic(|this| ConnectionSocket {
            this: this.clone(),
            name: format!("[ws][chat:{}]", id),
            config: self.config,
            connector: self.connector,
            url: self.url,
            credentials: self.credentials,
            liveness: RwLock::new(self.liveness),
            state: StateCell::new(),
            lifecycle: Mutex::new(Lifecycle {
                socket: None,
                generation: 0,
                connect_started: None,
            }),
            pending: DashMap::new(),
            incoming_tx,
            incoming_rx: tokio::sync::Mutex::new(incoming_rx),
            next_request_id: AtomicU64::new(1),
            next_keep_alive_id: AtomicU64::new(KEEP_ALIVE_ID_BASE),
        })
    }
}

/// The persistent chat connection.
///
/// Lifecycle calls are meant for `HealthMonitor`; application code uses the
/// send/read methods and the state stream.
pub struct ConnectionSocket {
    this: Weak<ConnectionSocket>,
    name: String,
    config: SocketConfig,
    connector: Arc<dyn Connector>,
    url: UrlProvider,
    credentials: CredentialAccessor,
    liveness: RwLock<Option<Arc<dyn LivenessObserver>>>,
    state: StateCell,
    lifecycle: Mutex<Lifecycle>,
    pending: DashMap<u64, PendingSender>,
    incoming_tx: mpsc::Sender<RequestFrame>,
    incoming_rx: tokio::sync::Mutex<mpsc::Receiver<RequestFrame>>,
    next_request_id: AtomicU64,
    next_keep_alive_id: AtomicU64,
}

impl ConnectionSocket {
    pub fn builder(
        connector: Arc<dyn Connector>,
        url: UrlProvider,
        credentials: CredentialAccessor,
    ) -> ConnectionSocketBuilder {
        ConnectionSocketBuilder {
            connector,
            url,
            credentials,
            config: SocketConfig::default(),
            liveness: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    /// Subscribe to state changes; the current state is visible immediately.
    pub fn subscribe(&self) -> StateStream {
        self.state.subscribe()
    }

    /// Number of awaited requests still waiting for a response.
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    /// A fresh caller request id, always below `KEEP_ALIVE_ID_BASE`.
    pub fn next_request_id(&self) -> u64 {
        self.next_request_id.fetch_add(1, Ordering::Relaxed) % KEEP_ALIVE_ID_BASE
    }

    /// Replace the observer told about every inbound frame.
    pub fn set_liveness(&self, observer: Arc<dyn LivenessObserver>) {
        *self.liveness.write() = Some(observer);
    }

    /// Start connecting unless a socket already exists.
    pub fn connect(&self) {
        let mut lifecycle = self.lifecycle.lock();
        info!(socket = %self.name, "connect()");

        if lifecycle.socket.is_some() {
            debug!(socket = %self.name, "Socket already exists, connect ignored");
            return;
        }

        let url = (self.url)();
        info!(socket = %self.name, url = %url, "Connecting");
        let request = HandshakeRequest {
            url,
            authorization: (self.credentials)(),
            user_agent: self.config.user_agent.clone(),
        };

        self.state.set(ConnectionState::Connecting);
        lifecycle.generation += 1;
        lifecycle.connect_started = Some(Instant::now());
        let listener = SocketListener {
            socket: self.this.clone(),
            generation: lifecycle.generation,
        };
        lifecycle.socket = Some(self.connector.open(request, listener));
    }

    /// Abort the socket, but only when currently connected.
    pub fn disconnect_when_connected(&self) {
        let mut lifecycle = self.lifecycle.lock();
        let state = self.state.get();
        info!(socket = %self.name, state = %state, "disconnect_when_connected()");
        if state != ConnectionState::Connected {
            return;
        }
        if let Some(socket) = lifecycle.retire() {
            socket.cancel();
            self.state.set(ConnectionState::Disconnected);
            self.fail_pending("disconnected");
        }
    }

    /// Abort the socket, but only while a connect attempt is still pending.
    ///
    /// Returns whether the attempt was cancelled. The check and the teardown
    /// happen in the same critical section, so an `on_open` racing with this
    /// call either wins and keeps the connection, or loses and is discarded.
    /// `on_cancel` runs inside that section, before `Disconnected` is
    /// published.
    pub fn cancel_if_connecting(&self, on_cancel: impl FnOnce()) -> bool {
        let mut lifecycle = self.lifecycle.lock();
        let state = self.state.get();
        if state != ConnectionState::Connecting {
            debug!(socket = %self.name, state = %state, "cancel_if_connecting() not connecting");
            return false;
        }
        info!(socket = %self.name, "cancel_if_connecting()");
        let Some(socket) = lifecycle.retire() else {
            return false;
        };
        socket.cancel();
        on_cancel();
        self.state.set(ConnectionState::Disconnected);
        self.fail_pending("canceled");
        true
    }

    /// Abort the socket from any state.
    pub fn cancel_connection(&self) {
        let mut lifecycle = self.lifecycle.lock();
        info!(socket = %self.name, state = %self.state.get(), "cancel_connection()");
        if let Some(socket) = lifecycle.retire() {
            socket.cancel();
            self.state.set(ConnectionState::Disconnected);
            self.fail_pending("canceled");
        }
    }

    /// Send a request without waiting for its response.
    pub fn send_request(&self, request: &RequestFrame) -> Result<(), SocketError> {
        debug!(
            socket = %self.name,
            request_id = request.request_id,
            verb = %request.verb,
            path = %request.path,
            "send_request()"
        );
        let bytes = encode_request(request)?;
        let lifecycle = self.lifecycle.lock();
        let socket = lifecycle
            .socket
            .as_ref()
            .ok_or_else(|| SocketError::NotConnected(format!("{} No connection", self.name)))?;
        if !socket.send_binary(bytes) {
            return Err(SocketError::WriteFailed(format!(
                "{} Send request on web socket failed",
                self.name
            )));
        }
        Ok(())
    }

    /// Send a request and obtain a future for its response.
    ///
    /// Fails immediately when not connected, when the id is already awaiting
    /// a response, or when it lies in the keep-alive range. The future
    /// resolves with the matching response, or fails after the request
    /// timeout or when the socket is torn down.
    pub fn send_request_await_response(
        &self,
        request: RequestFrame,
    ) -> Result<impl Future<Output = Result<ResponseFrame, SocketError>> + Send + 'static, SocketError>
    {
        debug!(
            socket = %self.name,
            request_id = request.request_id,
            verb = %request.verb,
            path = %request.path,
            "send_request_await_response()"
        );
        if self.state.get() != ConnectionState::Connected {
            return Err(SocketError::NotConnected(format!(
                "{} No connected connection",
                self.name
            )));
        }

        let id = request.request_id;
        if id >= KEEP_ALIVE_ID_BASE {
            return Err(SocketError::ReservedRequestId(id));
        }
        let bytes = encode_request(&request)?;
        let (response_tx, response_rx) = oneshot::channel();
        match self.pending.entry(id) {
            // A waiter that gave up leaves a closed sender behind
            Entry::Occupied(mut slot) if slot.get().is_closed() => {
                slot.insert(response_tx);
            }
            Entry::Occupied(_) => return Err(SocketError::DuplicateRequestId(id)),
            Entry::Vacant(slot) => {
                slot.insert(response_tx);
            }
        }

        let sent = {
            let lifecycle = self.lifecycle.lock();
            lifecycle
                .socket
                .as_ref()
                .is_some_and(|socket| socket.send_binary(bytes))
        };
        if !sent {
            self.pending.remove(&id);
            return Err(SocketError::WriteFailed(format!("{} Write failed", self.name)));
        }

        let timeout = self.config.request_timeout;
        let this = self.this.clone();
        Ok(async move {
            let outcome = tokio::time::timeout(timeout, response_rx).await;
            match outcome {
                Ok(Ok(result)) => result,
                Ok(Err(_)) => Err(SocketError::Closed("Response channel closed".into())),
                Err(_) => {
                    // Our receiver is gone, so only our own sender reads as closed
                    if let Some(socket) = this.upgrade() {
                        socket.pending.remove_if(&id, |_, sender| sender.is_closed());
                    }
                    Err(SocketError::RequestTimeout(id))
                }
            }
        })
    }

    /// Reply to a request the peer sent us.
    pub fn send_response(&self, response: &ResponseFrame) -> Result<(), SocketError> {
        debug!(
            socket = %self.name,
            request_id = response.request_id,
            status = response.status,
            "send_response()"
        );
        let bytes = encode_response(response)?;
        let lifecycle = self.lifecycle.lock();
        let socket = lifecycle
            .socket
            .as_ref()
            .ok_or_else(|| SocketError::Closed(format!("{} Connection closed", self.name)))?;
        if !socket.send_binary(bytes) {
            return Err(SocketError::WriteFailed(format!("{} Write failed", self.name)));
        }
        Ok(())
    }

    /// Acknowledge a peer request with `200 OK`.
    pub fn send_ack(&self, request_id: u64) -> Result<(), SocketError> {
        self.send_response(&ResponseFrame::ok(request_id))?;
        info!(socket = %self.name, request_id = request_id, "Sent ack");
        Ok(())
    }

    /// Send one keep-alive request.
    pub fn send_keep_alive(&self) -> Result<(), SocketError> {
        let id = self.next_keep_alive_id.fetch_add(1, Ordering::Relaxed) | KEEP_ALIVE_ID_BASE;
        let request = RequestFrame::new(id, "GET", &self.config.keep_alive_path);
        self.send_request(&request)
    }

    /// Wait for the next request pushed by the peer.
    pub async fn read_request(&self) -> Result<RequestFrame, SocketError> {
        self.incoming_rx
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| SocketError::Closed(format!("{} Incoming queue closed", self.name)))
    }

    fn signal_liveness(&self) {
        let observer = self.liveness.read().clone();
        if let Some(observer) = observer {
            observer.on_keep_alive_response();
        }
    }

    fn fail_pending(&self, reason: &str) {
        let ids: Vec<u64> = self.pending.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, sender)) = self.pending.remove(&id) {
                debug!(socket = %self.name, request_id = id, "Failing pending request");
                let _ = sender.send(Err(SocketError::Closed(format!(
                    "{} Closed unexpectedly: {}",
                    self.name, reason
                ))));
            }
        }
    }

    fn on_open(&self, generation: u64) {
        let mut lifecycle = self.lifecycle.lock();
        if !lifecycle.is_current(generation) {
            info!(socket = %self.name, generation = generation, "on_open() from stale socket, ignored");
            return;
        }
        let elapsed_ms = lifecycle
            .connect_started
            .take()
            .map(|started| started.elapsed().as_millis() as u64)
            .unwrap_or_default();
        info!(socket = %self.name, elapsed_ms = elapsed_ms, "on_open() connected");
        self.signal_liveness();
        self.state.set(ConnectionState::Connected);
    }

    fn on_message(&self, generation: u64, data: &[u8]) {
        let lifecycle = self.lifecycle.lock();
        if !lifecycle.is_current(generation) {
            debug!(socket = %self.name, generation = generation, "on_message() from stale socket, ignored");
            return;
        }
        self.signal_liveness();

        match decode_frame(data) {
            Ok(Frame::Request(request)) => {
                debug!(socket = %self.name, request_id = request.request_id, path = %request.path, "Inbound request");
                if let Err(e) = self.incoming_tx.try_send(request) {
                    // Unacked, so the peer delivers it again later
                    warn!(socket = %self.name, error = %e, "Inbound request queue full, dropping request");
                }
            }
            Ok(Frame::Response(response)) => {
                debug!(socket = %self.name, request_id = response.request_id, status = response.status, "Inbound response");
                match self.pending.remove(&response.request_id) {
                    Some((_, sender)) => {
                        let _ = sender.send(Ok(response));
                    }
                    None => debug!(socket = %self.name, request_id = response.request_id, "No pending request for response"),
                }
            }
            Err(e) => warn!(socket = %self.name, error = %e, "on_message() parse error"),
        }
        drop(lifecycle);
    }

    fn on_text(&self, generation: u64, text: &str) {
        let lifecycle = self.lifecycle.lock();
        if !lifecycle.is_current(generation) {
            return;
        }
        debug!(socket = %self.name, len = text.len(), "on_text()");
        self.signal_liveness();
        drop(lifecycle);
    }

    fn on_close(&self, generation: u64, code: u16, reason: &str, event: &str) {
        let mut lifecycle = self.lifecycle.lock();
        if !lifecycle.is_current(generation) {
            debug!(socket = %self.name, event = event, "Close from stale socket, ignored");
            return;
        }
        let state = self.state.get();
        if state.needs_reconnect() {
            warn!(socket = %self.name, state = %state, event = event, "Ignoring close callback");
            return;
        }
        info!(socket = %self.name, code = code, reason = %reason, event = event, "Socket closed by peer");
        if let Some(socket) = lifecycle.retire() {
            socket.cancel();
        }
        self.fail_pending(reason);
        let next = if CLEAN_CLOSE_CODES.contains(&code) {
            ConnectionState::Disconnected
        } else {
            ConnectionState::Failed
        };
        self.state.set(next);
    }

    fn on_failure(&self, generation: u64, failure: SocketFailure) {
        let mut lifecycle = self.lifecycle.lock();
        if !lifecycle.is_current(generation) {
            debug!(socket = %self.name, failure = ?failure, "on_failure() from stale socket, ignored");
            return;
        }
        let state = self.state.get();
        if state.needs_reconnect() {
            warn!(socket = %self.name, state = %state, "Ignoring on_failure() callback");
            return;
        }
        let Some(next) = classify_failure(&failure) else {
            info!(socket = %self.name, "on_failure() canceled, handled by caller");
            return;
        };
        warn!(socket = %self.name, failure = ?failure, next = %next, "on_failure()");
        if let Some(socket) = lifecycle.retire() {
            socket.cancel();
        }
        self.fail_pending("failure");
        self.state.set(next);
    }
}

impl Drop for ConnectionSocket {
    fn drop(&mut self) {
        if let Some(socket) = self.lifecycle.get_mut().retire() {
            socket.cancel();
        }
    }
}

/// Event sink handed to one physical socket.
///
/// Tagged with the generation current when the socket was opened; once the
/// connection moves on, every call is discarded.
#[derive(Clone)]
pub struct SocketListener {
    socket: Weak<ConnectionSocket>,
    generation: u64,
}

impl SocketListener {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn on_open(&self) {
        if let Some(socket) = self.socket.upgrade() {
            socket.on_open(self.generation);
        }
    }

    pub fn on_message(&self, data: Vec<u8>) {
        if let Some(socket) = self.socket.upgrade() {
            socket.on_message(self.generation, &data);
        }
    }

    pub fn on_text(&self, text: String) {
        if let Some(socket) = self.socket.upgrade() {
            socket.on_text(self.generation, &text);
        }
    }

    pub fn on_closing(&self, code: u16, reason: &str) {
        if let Some(socket) = self.socket.upgrade() {
            socket.on_close(self.generation, code, reason, "closing");
        }
    }

    pub fn on_closed(&self, code: u16, reason: &str) {
        if let Some(socket) = self.socket.upgrade() {
            socket.on_close(self.generation, code, reason, "closed");
        }
    }

    pub fn on_failure(&self, failure: SocketFailure) {
        if let Some(socket) = self.socket.upgrade() {
            socket.on_failure(self.generation, failure);
        }
    }
}
