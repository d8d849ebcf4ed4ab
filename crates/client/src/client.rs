//! The transport client: owns at most one live socket, demultiplexes the
//! inbound message stream, and reports connection lifecycle events.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Notify};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use gridfall_protocol::{CloseInfo, Envelope};

use crate::backoff::BackoffState;
use crate::config::{join_endpoint, ClientConfig, ReconnectPolicy};
use crate::error::ClientError;
use crate::registry::{HandlerId, HandlerRegistry};
use crate::state::ConnectionState;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Outbound messages are buffered through a bounded channel to the write task.
const OUTBOUND_CHANNEL_CAPACITY: usize = 32;

/// Recover a guard from a poisoned mutex. The protected data is plain state
/// that stays valid across a panicking handler.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct ClientInner {
    config: ClientConfig,
    state: AtomicU8,
    state_changed: Notify,
    /// Monotonic connection counter; read tasks from stale connections bail
    /// out instead of clobbering the current connection's state.
    generation: AtomicU64,
    url: Mutex<Option<String>>,
    last_close: Mutex<Option<CloseInfo>>,
    registry: Mutex<HandlerRegistry>,
    writer: Mutex<Option<mpsc::Sender<String>>>,
    intentional_disconnect: AtomicBool,
}

/// Transport client for the game server connection.
///
/// At most one underlying socket exists per client at a time; `connect` calls
/// made while an attempt is in flight coalesce onto that attempt. Handler
/// registrations are owned by the client, not the socket, so they survive
/// reconnects.
///
/// Cloning is cheap (`Arc` internally); the production composition root holds
/// one instance for the process lifetime and hands clones to the UI modules.
#[derive(Clone)]
pub struct GameClient {
    inner: Arc<ClientInner>,
}

impl GameClient {
    /// Create a client with the given configuration. No socket is opened
    /// until [`connect`](Self::connect) is called.
    pub fn new(config: ClientConfig) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                config,
                state: AtomicU8::new(ConnectionState::Idle.to_u8()),
                state_changed: Notify::new(),
                generation: AtomicU64::new(0),
                url: Mutex::new(None),
                last_close: Mutex::new(None),
                registry: Mutex::new(HandlerRegistry::default()),
                writer: Mutex::new(None),
                intentional_disconnect: AtomicBool::new(false),
            }),
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    pub fn is_connecting(&self) -> bool {
        self.state() == ConnectionState::Connecting
    }

    /// URL last used to open a connection, `None` before the first attempt.
    pub fn get_url(&self) -> Option<String> {
        lock(&self.inner.url).clone()
    }

    /// The most recent close record, `None` if the client has never closed.
    pub fn last_close_info(&self) -> Option<CloseInfo> {
        lock(&self.inner.last_close).clone()
    }

    // --- Subscriptions ---

    /// Subscribe to successful connection opens.
    pub fn on_connect(&self, handler: impl Fn() + Send + Sync + 'static) -> HandlerId {
        lock(&self.inner.registry).add_connect(Arc::new(handler))
    }

    /// Subscribe to connection closes; the handler receives the close record.
    pub fn on_disconnect(
        &self,
        handler: impl Fn(&CloseInfo) + Send + Sync + 'static,
    ) -> HandlerId {
        lock(&self.inner.registry).add_disconnect(Arc::new(handler))
    }

    /// Subscribe to transport and parse errors.
    pub fn on_error(&self, handler: impl Fn(&ClientError) + Send + Sync + 'static) -> HandlerId {
        lock(&self.inner.registry).add_error(Arc::new(handler))
    }

    /// Subscribe to every inbound message; the handler receives the full
    /// envelope regardless of type.
    pub fn on_message(&self, handler: impl Fn(&Envelope) + Send + Sync + 'static) -> HandlerId {
        lock(&self.inner.registry).add_message(Arc::new(handler))
    }

    /// Subscribe to messages of one declared type; the handler receives the
    /// payload only. Multiple handlers per type are permitted.
    pub fn on_message_type(
        &self,
        kind: impl Into<String>,
        handler: impl Fn(&Value) + Send + Sync + 'static,
    ) -> HandlerId {
        lock(&self.inner.registry).add_typed(kind.into(), Arc::new(handler))
    }

    /// Remove a subscription. Removing an id that is not registered is a
    /// silent no-op returning `false`.
    pub fn off(&self, id: HandlerId) -> bool {
        lock(&self.inner.registry).remove(id)
    }

    // --- Connection lifecycle ---

    /// Connect to the game server.
    ///
    /// `url` falls back to the configured base URL. `path` falls back to the
    /// configured default path, then to probing the discovery candidates.
    ///
    /// Resolves to `true` once the connection is open. A call made while
    /// another attempt is in flight does not open a second socket; it
    /// resolves with that attempt's outcome. Failures are reported through
    /// the error and disconnect handlers, never as a panic or an `Err`.
    pub async fn connect(&self, url: Option<&str>, path: Option<&str>) -> bool {
        // The claim is a synchronous CAS, so a rapid double-call cannot
        // start two attempts.
        if !self.inner.try_claim_connecting() {
            return match self.state() {
                ConnectionState::Open => true,
                ConnectionState::Connecting | ConnectionState::Closing => {
                    self.await_settled().await
                }
                _ => false,
            };
        }

        self.inner
            .intentional_disconnect
            .store(false, Ordering::SeqCst);
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let base = url.unwrap_or(&self.inner.config.server_url).to_string();
        let suffix = match path {
            Some(p) => p.to_string(),
            None => match &self.inner.config.default_path {
                Some(p) => p.clone(),
                None => self.discover_path(&base).await.unwrap_or_default(),
            },
        };
        let effective = join_endpoint(&base, &suffix);
        self.connect_to(effective, generation).await
    }

    /// Dial one effective URL. The `Connecting` state must already be
    /// claimed by the caller.
    ///
    /// Returns a boxed future to break the async recursion cycle
    /// (`connect_to` spawns `run_read_loop`, which spawns
    /// `reconnect_with_backoff`, which awaits `connect_to`); with an opaque
    /// `async fn` future the compiler cannot prove the cycle is `Send`.
    fn connect_to(
        &self,
        effective: String,
        generation: u64,
    ) -> futures_util::future::BoxFuture<'_, bool> {
        Box::pin(self.connect_to_inner(effective, generation))
    }

    async fn connect_to_inner(&self, effective: String, generation: u64) -> bool {
        {
            *lock(&self.inner.url) = Some(effective.clone());
        }

        if let Err(e) = url::Url::parse(&effective) {
            let error = ClientError::InvalidUrl {
                url: effective,
                reason: e.to_string(),
            };
            tracing::error!("{error}");
            return self.inner.fail_connect(error);
        }

        tracing::info!("connecting to game server at {effective}");
        let connect_timeout = self.inner.config.connect_timeout;
        let ws = match timeout(connect_timeout, connect_async(&effective)).await {
            Ok(Ok((ws, _response))) => ws,
            Ok(Err(e)) => {
                tracing::error!("failed to connect to game server: {e}");
                return self.inner.fail_connect(ClientError::Transport(e.to_string()));
            }
            Err(_) => {
                let error = ClientError::ConnectTimeout(connect_timeout);
                tracing::error!("{error}");
                return self.inner.fail_connect(error);
            }
        };

        if self.inner.intentional_disconnect.load(Ordering::SeqCst) {
            // disconnect() raced the handshake; discard the fresh socket
            let mut ws = ws;
            let _ = ws.close(None).await;
            self.inner.set_state(ConnectionState::Closed);
            return false;
        }

        let (write, read) = ws.split();
        let (tx, rx) = mpsc::channel::<String>(OUTBOUND_CHANNEL_CAPACITY);
        {
            *lock(&self.inner.writer) = Some(tx);
        }
        {
            *lock(&self.inner.last_close) = None;
        }
        self.inner.set_state(ConnectionState::Open);
        tracing::info!("connected to game server at {effective}");

        let handlers = { lock(&self.inner.registry).connect_handlers() };
        for handler in handlers {
            handler();
        }

        tokio::spawn(run_write_loop(write, rx));
        tokio::spawn(run_read_loop(self.clone(), read, generation));
        true
    }

    /// Wait for an in-flight attempt to settle, reporting its outcome.
    async fn await_settled(&self) -> bool {
        loop {
            let notified = self.inner.state_changed.notified();
            tokio::pin!(notified);
            // Register interest before re-checking so a state change between
            // the check and the await is not missed.
            notified.as_mut().enable();
            match self.state() {
                ConnectionState::Open => return true,
                ConnectionState::Connecting | ConnectionState::Closing => notified.await,
                _ => return false,
            }
        }
    }

    /// Probe the configured candidate paths against the base URL and return
    /// the first one the server accepts a connection on.
    ///
    /// Probe sockets are discarded as soon as their outcome is known. Never
    /// fails: `None` means no candidate accepted within its timeout.
    pub async fn test_connectivity(&self, url: Option<&str>) -> Option<String> {
        let base = url.unwrap_or(&self.inner.config.server_url).to_string();
        self.discover_path(&base).await
    }

    async fn discover_path(&self, base: &str) -> Option<String> {
        let probe_timeout = self.inner.config.probe_timeout;
        for candidate in &self.inner.config.candidate_paths {
            let target = join_endpoint(base, candidate);
            tracing::debug!("probing {target}");
            match timeout(probe_timeout, connect_async(&target)).await {
                Ok(Ok((mut ws, _response))) => {
                    let _ = ws.close(None).await;
                    tracing::info!("endpoint discovery succeeded at {target}");
                    return Some(candidate.clone());
                }
                Ok(Err(e)) => tracing::debug!("probe of {target} rejected: {e}"),
                Err(_) => tracing::debug!("probe of {target} timed out"),
            }
        }
        tracing::warn!("endpoint discovery exhausted all candidates for {base}");
        None
    }

    /// Close the live connection if there is one. Idempotent; registered
    /// handlers are kept for the next connection.
    pub fn disconnect(&self) -> &Self {
        let writer = { lock(&self.inner.writer).take() };
        let state = self.state();
        if writer.is_none() && state != ConnectionState::Connecting {
            return self;
        }
        self.inner
            .intentional_disconnect
            .store(true, Ordering::SeqCst);
        if let Some(writer) = writer {
            tracing::info!("disconnecting from game server");
            if state == ConnectionState::Open {
                self.inner.set_state(ConnectionState::Closing);
            }
            // Dropping the sender ends the write task, which performs the
            // close handshake; the read task sees the intentional flag and
            // stays quiet.
            drop(writer);
            self.inner.finish_close(CloseInfo::normal(), None);
        }
        self
    }

    /// Queue an envelope for delivery. Fire-and-forget: when the client is
    /// not connected, or the outbound buffer is full, the message is dropped
    /// with a log line rather than surfaced as an error.
    pub fn send(&self, kind: &str, payload: Value) -> &Self {
        if self.state() != ConnectionState::Open {
            tracing::debug!("dropping '{kind}' message: not connected");
            return self;
        }
        let tx = { lock(&self.inner.writer).clone() };
        let Some(tx) = tx else {
            tracing::debug!("dropping '{kind}' message: writer unavailable");
            return self;
        };
        match serde_json::to_string(&Envelope::new(kind, payload)) {
            Ok(json) => {
                if let Err(e) = tx.try_send(json) {
                    tracing::debug!("dropping '{kind}' message: {e}");
                }
            }
            Err(e) => tracing::error!("failed to serialize '{kind}' message: {e}"),
        }
        self
    }
}

impl ClientInner {
    fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Store the new state, wake `connect` waiters, and return the old state.
    fn set_state(&self, new_state: ConnectionState) -> ConnectionState {
        let prev = ConnectionState::from_u8(self.state.swap(new_state.to_u8(), Ordering::SeqCst));
        if prev != new_state {
            tracing::debug!("connection state {prev:?} -> {new_state:?}");
            self.state_changed.notify_waiters();
        }
        prev
    }

    /// Claim the `Connecting` slot. Fails when another attempt is in flight
    /// or the connection is already open.
    fn try_claim_connecting(&self) -> bool {
        for from in [ConnectionState::Idle, ConnectionState::Closed] {
            if self
                .state
                .compare_exchange(
                    from.to_u8(),
                    ConnectionState::Connecting.to_u8(),
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                )
                .is_ok()
            {
                self.state_changed.notify_waiters();
                return true;
            }
        }
        false
    }

    /// Dispatch one inbound text frame per the envelope routing rules:
    /// typed subscribers get the payload, generic subscribers get the full
    /// envelope, and a parse failure goes to error subscribers only.
    fn handle_frame(&self, text: &str) {
        let envelope = match serde_json::from_str::<Envelope>(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!("failed to parse inbound frame: {e}");
                let error = ClientError::MalformedFrame(e);
                let handlers = { lock(&self.registry).error_handlers() };
                for handler in handlers {
                    handler(&error);
                }
                return;
            }
        };

        let typed = { lock(&self.registry).typed_handlers(&envelope.kind) };
        for handler in typed {
            handler(&envelope.payload);
        }
        let generic = { lock(&self.registry).message_handlers() };
        for handler in generic {
            handler(&envelope);
        }
    }

    /// Report a failed connection attempt. When `disconnect()` raced the
    /// attempt, the failure is the caller's intent, so it closes quietly
    /// without firing handlers. Always returns `false`.
    fn fail_connect(&self, error: ClientError) -> bool {
        if self.intentional_disconnect.load(Ordering::SeqCst) {
            self.set_state(ConnectionState::Closed);
            return false;
        }
        self.finish_close(CloseInfo::abnormal(error.to_string()), Some(&error));
        false
    }

    /// Record the close, transition to `Closed`, and fire error/disconnect
    /// handlers. Only the first close of a connection wins; later calls are
    /// no-ops.
    fn finish_close(&self, info: CloseInfo, error: Option<&ClientError>) {
        {
            *lock(&self.writer) = None;
        }
        let prev = self.set_state(ConnectionState::Closed);
        if prev == ConnectionState::Closed {
            return;
        }
        {
            *lock(&self.last_close) = Some(info.clone());
        }
        if let Some(error) = error {
            let handlers = { lock(&self.registry).error_handlers() };
            for handler in handlers {
                handler(error);
            }
        }
        let handlers = { lock(&self.registry).disconnect_handlers() };
        for handler in handlers {
            handler(&info);
        }
    }
}

async fn run_write_loop(mut write: SplitSink<WsStream, Message>, mut rx: mpsc::Receiver<String>) {
    while let Some(json) = rx.recv().await {
        if let Err(e) = write.send(Message::Text(json)).await {
            tracing::error!("failed to send message: {e}");
            break;
        }
    }
    // Channel closed: disconnect() dropped the sender, or the connection is
    // being torn down. Send the close frame and let the server finish the
    // handshake.
    let _ = write.close().await;
}

async fn run_read_loop(client: GameClient, mut read: SplitStream<WsStream>, generation: u64) {
    let mut close_info: Option<CloseInfo> = None;
    let mut error: Option<ClientError> = None;

    while let Some(message) = read.next().await {
        match message {
            Ok(Message::Text(text)) => client.inner.handle_frame(&text),
            Ok(Message::Close(frame)) => {
                close_info = Some(close_info_from_frame(frame));
                break;
            }
            Ok(Message::Ping(_) | Message::Pong(_)) => {}
            Ok(_) => {}
            Err(e) => {
                tracing::error!("websocket error: {e}");
                error = Some(ClientError::Transport(e.to_string()));
                break;
            }
        }
    }

    if client
        .inner
        .intentional_disconnect
        .load(Ordering::SeqCst)
    {
        // disconnect() already recorded the close and fired handlers
        return;
    }
    if client.inner.generation.load(Ordering::SeqCst) != generation {
        // A newer connection superseded this one
        return;
    }

    let info = match (&close_info, &error) {
        (Some(info), _) => info.clone(),
        (None, Some(e)) => CloseInfo::abnormal(e.to_string()),
        // Stream ended without a close frame
        (None, None) => CloseInfo::abnormal(""),
    };
    tracing::info!("connection closed: code {} ({})", info.code, info.reason);
    client.inner.finish_close(info, error.as_ref());

    if matches!(client.inner.config.reconnect, ReconnectPolicy::Backoff(_)) {
        tokio::spawn(reconnect_with_backoff(client));
    }
}

fn close_info_from_frame(frame: Option<CloseFrame<'_>>) -> CloseInfo {
    match frame {
        Some(frame) => CloseInfo::new(u16::from(frame.code), frame.reason.to_string(), true),
        None => CloseInfo::abnormal(""),
    }
}

/// Retry the last endpoint after an unexpected close, with exponential
/// backoff. Cancelled by `disconnect()` or by exhausting the policy.
async fn reconnect_with_backoff(client: GameClient) {
    let ReconnectPolicy::Backoff(policy) = client.inner.config.reconnect else {
        return;
    };
    let Some(url) = client.get_url() else {
        return;
    };

    let mut backoff = BackoffState::new(policy);
    loop {
        let Some(delay) = backoff.next_delay_and_advance() else {
            tracing::error!("max reconnection attempts reached, giving up");
            return;
        };
        tracing::info!(
            "reconnection attempt {} of {}, waiting {:?}",
            backoff.attempts(),
            policy.max_attempts,
            delay
        );
        tokio::time::sleep(delay).await;

        if client
            .inner
            .intentional_disconnect
            .load(Ordering::SeqCst)
        {
            tracing::info!("reconnection cancelled by disconnect");
            return;
        }
        if !client.inner.try_claim_connecting() {
            // Someone else is already connecting (or connected); defer to them
            return;
        }
        let generation = client.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        if client.connect_to(url.clone(), generation).await {
            return;
        }
    }
}
