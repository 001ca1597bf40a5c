//! Core session: state machine, send path, reconnection and close.
//!
//! A [`Session`] is a cheap handle over shared state. Creating one starts
//! three background loops (inbound, outbound, heartbeat watchdog) which run
//! until the session reaches Closed. Reconnection and close are serialized
//! through the atomic state cell so racing callers cannot both win.

use crate::ack::{AckCorrelator, WaiterGuard};
use crate::backoff::{Backoff, DefaultBackoff, MAX_RECONNECT_ATTEMPTS};
use crate::error::{CloseReason, SessionError, TransportError};
use crate::handlers::{panic_message, Handlers, DISCONNECTION, RECONNECTION};
use crate::queue::{OutboundQueue, DEFAULT_QUEUE_CAPACITY};
use crate::state::{SessionState, StateCell};
use crate::transport::{Connector, Transport};
use crate::{inbound, keepalive, outbound};
use serde::Serialize;
use serde_json::Value;
use sio_wire::{AckId, Handshake, OutboundPacket, Packet, ProtocolVersion};
use std::net::SocketAddr;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Stand-in deadline for timeouts too large to add to the clock
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Configuration for a session
#[derive(Clone)]
pub struct SessionConfig {
    /// Outbound queue capacity; the write buffer overflows one below it
    pub queue_capacity: usize,
    /// How long a sender waits for queue space before the session overflows
    pub push_timeout: Duration,
    /// Pause between reads while not connected
    pub read_throttle: Duration,
    /// Pause between flush attempts while not connected
    pub write_pause: Duration,
    /// Reconnection attempts before giving up
    pub max_reconnect_attempts: u32,
    /// Delay strategy between reconnection attempts
    pub backoff: Arc<dyn Backoff>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            push_timeout: Duration::from_secs(30),
            read_throttle: Duration::from_millis(200),
            write_pause: Duration::from_millis(100),
            max_reconnect_attempts: MAX_RECONNECT_ATTEMPTS,
            backoff: Arc::new(DefaultBackoff),
        }
    }
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("queue_capacity", &self.queue_capacity)
            .field("push_timeout", &self.push_timeout)
            .field("read_throttle", &self.read_throttle)
            .field("write_pause", &self.write_pause)
            .field("max_reconnect_attempts", &self.max_reconnect_attempts)
            .finish_non_exhaustive()
    }
}

/// Per-message send options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageContext {
    /// Ask the transport for expedited handling. Does not reorder the queue.
    pub priority: bool,
}

/// Statistics for a session
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    /// Total bytes received
    pub bytes_in: u64,
    /// Total bytes sent
    pub bytes_out: u64,
    /// Packets waiting in the outbound queue
    pub queued: usize,
    /// Acknowledgements still awaited
    pub pending_acks: usize,
}

pub(crate) struct Inner {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) config: SessionConfig,
    pub(crate) state: StateCell,
    pub(crate) header: RwLock<Handshake>,
    pub(crate) queue: OutboundQueue,
    pub(crate) acks: AckCorrelator,
    /// Single-slot liveness signal consumed by the watchdog
    pub(crate) heartbeat: Notify,
    pub(crate) handlers: Handlers,
    pub(crate) shutdown: CancellationToken,
    backoff: RwLock<Arc<dyn Backoff>>,
    pinger: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to a live socket.io session
#[derive(Clone)]
pub struct Session {
    pub(crate) inner: Arc<Inner>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id())
            .field("state", &self.state())
            .field("protocol", &self.protocol())
            .finish()
    }
}

/// Builds a session with handlers registered before any packet is read
#[derive(Debug, Default)]
pub struct SessionBuilder {
    config: SessionConfig,
    handlers: Handlers,
}

impl SessionBuilder {
    /// Start from the default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the configuration
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the reconnection backoff
    pub fn backoff(mut self, backoff: impl Backoff + 'static) -> Self {
        self.config.backoff = Arc::new(backoff);
        self
    }

    /// Register an event handler
    pub fn on<F>(self, event: &str, handler: F) -> Self
    where
        F: Fn(&Session, Vec<Value>) -> Option<Vec<Value>> + Send + Sync + 'static,
    {
        self.handlers.on(event, handler);
        self
    }

    /// Dial `url` through `connector` and start the session.
    ///
    /// The engine.io version query (`EIO=3` or `EIO=4`) is appended to the URL.
    pub async fn dial(self, url: &str, connector: &dyn Connector) -> Result<Session, SessionError> {
        let url = with_protocol_query(url, connector.protocol());
        debug!("Dialing {}", url);
        let transport = connector.connect(&url).await.map_err(|e| {
            warn!("Dial to {} failed: {}", url, e);
            SessionError::Connect(e)
        })?;
        Ok(self.start(transport))
    }

    /// Start a session over an already connected transport.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(self, transport: Arc<dyn Transport>) -> Session {
        let backoff = Arc::clone(&self.config.backoff);
        let inner = Inner {
            transport,
            queue: OutboundQueue::new(self.config.queue_capacity),
            config: self.config,
            state: StateCell::new(),
            header: RwLock::new(Handshake::default()),
            acks: AckCorrelator::new(),
            heartbeat: Notify::new(),
            handlers: self.handlers,
            shutdown: CancellationToken::new(),
            backoff: RwLock::new(backoff),
            pinger: Mutex::new(None),
        };
        let session = Session {
            inner: Arc::new(inner),
        };

        tokio::spawn(inbound::run(session.clone()));
        tokio::spawn(outbound::run(session.clone()));
        tokio::spawn(keepalive::watchdog(session.clone()));

        session
    }
}

/// Dial `url` with `config` and no handlers registered up front
pub async fn dial(
    url: &str,
    connector: &dyn Connector,
    config: SessionConfig,
) -> Result<Session, SessionError> {
    SessionBuilder::new().config(config).dial(url, connector).await
}

fn with_protocol_query(url: &str, protocol: ProtocolVersion) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{}{}{}", url, separator, protocol.query())
}

/// Build an event packet, turning a panic during construction into an error
fn build_event(
    method: &str,
    id: Option<AckId>,
    ctx: Option<MessageContext>,
    args: Vec<Value>,
) -> Result<OutboundPacket, SessionError> {
    let packet = guarded(method, || {
        let packet = Packet::event(method, args);
        match id {
            Some(id) => packet.with_id(id),
            None => packet,
        }
    })?;
    let priority = ctx.map(|c| c.priority).unwrap_or(false);
    Ok(OutboundPacket::Packet { packet, priority })
}

/// Run `build`, logging and returning a panic as [`SessionError::SendPanicked`]
fn guarded<T>(method: &str, build: impl FnOnce() -> T) -> Result<T, SessionError> {
    catch_unwind(AssertUnwindSafe(build)).map_err(|panic| {
        let message = panic_message(&*panic);
        error!("Building packet for '{}' panicked: {}", method, message);
        SessionError::SendPanicked(message)
    })
}

impl Session {
    /// Server-assigned session ID; empty before the handshake
    pub fn id(&self) -> String {
        self.header().sid
    }

    /// Handshake header negotiated with the server
    pub fn header(&self) -> Handshake {
        self.inner
            .header
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn set_header(&self, header: Handshake) {
        *self.inner.header.write().unwrap_or_else(PoisonError::into_inner) = header;
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.inner.state.load()
    }

    /// Whether the session is Connected
    pub fn is_connected(&self) -> bool {
        self.inner.state.is_connected()
    }

    /// Protocol version spoken by the transport
    pub fn protocol(&self) -> ProtocolVersion {
        self.inner.transport.protocol()
    }

    /// Whether packets are exchanged as msgpack binary frames
    pub fn binary_message(&self) -> bool {
        self.inner.transport.use_binary()
    }

    /// Local socket address
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.transport.local_addr()
    }

    /// Remote socket address
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.inner.transport.remote_addr()
    }

    /// Bytes read by the transport
    pub fn read_bytes(&self) -> u64 {
        self.inner.transport.bytes_read()
    }

    /// Bytes written by the transport
    pub fn write_bytes(&self) -> u64 {
        self.inner.transport.bytes_written()
    }

    /// Acknowledgements still awaited
    pub fn pending_acks(&self) -> usize {
        self.inner.acks.pending()
    }

    /// Snapshot of traffic counters
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            bytes_in: self.read_bytes(),
            bytes_out: self.write_bytes(),
            queued: self.inner.queue.len(),
            pending_acks: self.pending_acks(),
        }
    }

    /// Replace the reconnection backoff
    pub fn set_backoff(&self, backoff: impl Backoff + 'static) {
        *self.inner.backoff.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(backoff);
    }

    fn backoff(&self) -> Arc<dyn Backoff> {
        Arc::clone(&self.inner.backoff.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Register an event handler
    pub fn on<F>(&self, event: &str, handler: F)
    where
        F: Fn(&Session, Vec<Value>) -> Option<Vec<Value>> + Send + Sync + 'static,
    {
        self.inner.handlers.on(event, handler);
    }

    pub(crate) fn fire(&self, event: &str, args: Vec<Value>) -> Option<Vec<Value>> {
        self.inner.handlers.call(self, event, args)
    }

    /// Send an event without waiting for a reply
    pub async fn emit(
        &self,
        method: &str,
        ctx: Option<MessageContext>,
        args: Vec<Value>,
    ) -> Result<(), SessionError> {
        let packet = build_event(method, None, ctx, args)?;
        self.push(packet).await
    }

    /// Send an event and wait up to `timeout` for the server's acknowledgement.
    ///
    /// The whole call, enqueueing included, is bounded by `timeout`. Dropping
    /// the returned future unregisters the request.
    pub async fn ack(
        &self,
        method: &str,
        timeout: Duration,
        ctx: Option<MessageContext>,
        args: Vec<Value>,
    ) -> Result<Vec<Value>, SessionError> {
        let now = Instant::now();
        let deadline = now.checked_add(timeout).unwrap_or_else(|| now + FAR_FUTURE);
        let acks = &self.inner.acks;
        let id = acks.next_id();
        let reply = acks.add_waiter(id);
        let _guard = WaiterGuard::new(acks, id);

        let packet = build_event(method, Some(id), ctx, args)?;
        self.push_within(packet, timeout).await?;

        match tokio::time::timeout_at(deadline, reply).await {
            Ok(Ok(args)) => Ok(args),
            Ok(Err(_)) => Err(SessionError::Closed),
            Err(_) => {
                debug!("Ack {} for '{}' timed out after {:?}", id, method, timeout);
                Err(SessionError::Timeout)
            }
        }
    }

    /// Enqueue waiting at most `limit`. Running out of a limit shorter than
    /// the push timeout is the caller's timeout, not a queue overflow.
    async fn push_within(&self, packet: OutboundPacket, limit: Duration) -> Result<(), SessionError> {
        if limit >= self.inner.config.push_timeout {
            return self.push(packet).await;
        }
        if self.state().is_terminal() {
            return Err(SessionError::Closed);
        }
        match self.inner.queue.push(packet, limit).await {
            Err(SessionError::Overflow) => Err(SessionError::Timeout),
            other => other,
        }
    }

    /// Enqueue a packet. A queue that stays full closes the session.
    pub(crate) async fn push(&self, packet: OutboundPacket) -> Result<(), SessionError> {
        if self.state().is_terminal() {
            return Err(SessionError::Closed);
        }
        match self.inner.queue.push(packet, self.inner.config.push_timeout).await {
            Err(SessionError::Overflow) => {
                error!("Outbound queue full for {:?}, closing session", self.inner.config.push_timeout);
                self.close_with(Some(CloseReason::QueueOverflow)).await;
                Err(SessionError::Overflow)
            }
            other => other,
        }
    }

    /// Reconnect the transport with backoff.
    ///
    /// Only a Connected session reconnects; in any other state this is a
    /// no-op. Pending acknowledgements keep waiting across the reconnect.
    pub(crate) async fn reconnect(&self) -> Result<(), SessionError> {
        if !self.inner.state.transition(SessionState::Connected, SessionState::Connecting) {
            debug!("Reconnect skipped in state {}", self.state());
            return Ok(());
        }
        info!("Reconnecting session {}", self.id());

        let attempts = self.inner.config.max_reconnect_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            let delay = self.backoff().delay(attempt);
            debug!("Reconnect attempt {}/{} in {:?}", attempt, attempts, delay);
            tokio::select! {
                _ = self.inner.shutdown.cancelled() => return Err(SessionError::Closed),
                _ = tokio::time::sleep(delay) => {}
            }

            match self.inner.transport.reconnect().await {
                Ok(()) => {
                    if !self.inner.state.transition(SessionState::Connecting, SessionState::Connected) {
                        return Err(SessionError::Closed);
                    }
                    info!("Session reconnected after {} attempt(s)", attempt);
                    self.fire(RECONNECTION, Vec::new());
                    return Ok(());
                }
                Err(e) => {
                    warn!("Reconnect attempt {}/{} failed: {}", attempt, attempts, e);
                    last_error = Some(e);
                }
            }
        }

        Err(SessionError::ReconnectFailed {
            attempts,
            source: last_error.unwrap_or_else(|| TransportError::Other("no attempt made".to_string())),
        })
    }

    /// Close the session. Idempotent and safe to call concurrently.
    pub async fn close(&self) {
        self.close_with(None).await;
    }

    /// Close with `reason`, defaulting to "transport close".
    ///
    /// Exactly one caller performs the teardown; the rest return at once.
    pub(crate) async fn close_with(&self, reason: Option<CloseReason>) {
        if !self.inner.state.begin_close() {
            return;
        }
        let reason = reason.unwrap_or(CloseReason::TransportClose);
        info!("Closing session {}: {}", self.id(), reason);

        self.inner.shutdown.cancel();
        self.inner.transport.close().await;
        let dropped = self.inner.queue.drain().await;
        if dropped > 0 {
            debug!("Discarded {} queued packet(s)", dropped);
        }
        if let Some(pinger) = self.take_pinger() {
            pinger.abort();
        }

        self.inner.state.finish_close();
        self.fire(DISCONNECTION, vec![reason.to_value()]);
    }

    /// Install a new pinger task, aborting any previous one
    pub(crate) fn replace_pinger(&self, pinger: JoinHandle<()>) {
        let previous = self
            .inner
            .pinger
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(pinger);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    fn take_pinger(&self) -> Option<JoinHandle<()>> {
        self.inner.pinger.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}
