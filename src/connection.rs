//! Per-client connection state and protocol loops.
//!
//! Each upgraded socket gets one [`Connection`] and two cooperating tasks: a
//! reader that decodes client frames and enforces the pong deadline, and a
//! writer that is the sole owner of the socket's write half, draining the
//! outbound queue and emitting periodic pings.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use axum::extract::ws::{Message, Utf8Bytes, WebSocket};
use chrono::Utc;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{interval_at, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::auth::{AuthenticateFn, Token};
use crate::error::Error;
use crate::helper::Helper;
use crate::index::Subscriber;
use crate::metrics::Collector;

/// Function that produces the payload of server ping frames.
pub type PingMessageFn = dyn Fn() -> Vec<u8> + Send + Sync;

/// Default capacity of the per-connection outbound queue.
pub const DEFAULT_OUTBOUND_BUFFER_SIZE: usize = 256;

/// Default time allowed between pongs before the connection is torn down.
pub const DEFAULT_PONG_WAIT: Duration = Duration::from_secs(60);

/// Default interval between server pings. Must stay below the pong wait.
pub const DEFAULT_PING_PERIOD: Duration = Duration::from_secs(54);

/// Default ping payload: the current unix epoch seconds as ASCII.
pub(crate) fn default_ping_message() -> Vec<u8> {
    Utc::now().timestamp().to_string().into_bytes()
}

/// Resolved per-connection settings, derived from the engine config.
#[derive(Clone)]
pub(crate) struct ConnectionConfig {
    pub(crate) outbound_buffer_size: usize,
    pub(crate) pong_wait: Duration,
    pub(crate) ping_period: Duration,
    pub(crate) ping_message_fn: Arc<PingMessageFn>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            outbound_buffer_size: DEFAULT_OUTBOUND_BUFFER_SIZE,
            pong_wait: DEFAULT_PONG_WAIT,
            ping_period: DEFAULT_PING_PERIOD,
            ping_message_fn: Arc::new(default_ping_message),
        }
    }
}

/// Lifecycle state of a connection. Transitions are monotonic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The connection accepts outbound messages.
    Open,
    /// Teardown has started; no new outbound messages are accepted.
    Closing,
    /// Teardown finished.
    Closed,
}

/// Server-side endpoint wrapping a single client socket.
pub struct Connection {
    id: Uuid,
    out: mpsc::Sender<Utf8Bytes>,
    status: RwLock<Status>,
    close_started: AtomicBool,
    token: RwLock<Option<Token>>,
    config: ConnectionConfig,
    auth_fn: Option<Arc<AuthenticateFn>>,
    helper: Arc<Helper>,
    collector: Arc<dyn Collector>,
    cancel: CancellationToken,
}

impl Connection {
    /// Creates the connection state and hands back the outbound receiver
    /// that [`Connection::spawn`] wires into the writer task.
    pub(crate) fn new(
        helper: Arc<Helper>,
        auth_fn: Option<Arc<AuthenticateFn>>,
        collector: Arc<dyn Collector>,
        cancel: CancellationToken,
        config: ConnectionConfig,
    ) -> (Arc<Self>, mpsc::Receiver<Utf8Bytes>) {
        let (out, out_rx) = mpsc::channel(config.outbound_buffer_size);

        let conn = Arc::new(Self {
            id: Uuid::new_v4(),
            out,
            status: RwLock::new(Status::Open),
            close_started: AtomicBool::new(false),
            token: RwLock::new(None),
            config,
            auth_fn,
            helper,
            collector,
            cancel,
        });

        conn.collector.open_connections_inc();

        (conn, out_rx)
    }

    /// Wraps an upgraded socket and starts the reader and writer tasks.
    ///
    /// The cancellation token must derive from the host's long-lived
    /// application token, not a request-scoped one: cancelling it is the
    /// global kill switch that tears every connection down.
    pub(crate) fn spawn(
        socket: WebSocket,
        helper: Arc<Helper>,
        auth_fn: Option<Arc<AuthenticateFn>>,
        collector: Arc<dyn Collector>,
        cancel: CancellationToken,
        config: ConnectionConfig,
    ) -> Arc<Self> {
        let (conn, out_rx) = Self::new(helper, auth_fn, collector, cancel, config);
        let (sink, stream) = socket.split();

        tokio::spawn(read_loop(Arc::clone(&conn), stream));
        tokio::spawn(write_loop(Arc::clone(&conn), sink, out_rx));

        debug!(id = %conn.id, "connection opened");
        conn
    }

    /// Returns the stable connection identifier.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Returns the current lifecycle status.
    #[must_use]
    pub fn status(&self) -> Status {
        *self.status.read().expect("status lock poisoned")
    }

    /// Returns the token's user if a token with a non-blank user is stored.
    #[must_use]
    pub fn user_id(&self) -> Option<String> {
        let token = self.token.read().expect("token lock poisoned");
        token.as_ref().and_then(|token| {
            if token.user_id.trim().is_empty() {
                None
            } else {
                Some(token.user_id.clone())
            }
        })
    }

    /// Validates a raw token via the host callback and stores the result.
    ///
    /// The token is stored only when the callback succeeds and the expiry is
    /// still in the future.
    ///
    /// # Errors
    ///
    /// [`Error::AuthFuncMissing`] without a configured callback, the host's
    /// own error when it rejects the token, or [`Error::AuthTokenExpired`]
    /// when the returned token is already stale.
    pub fn authenticate_and_store(&self, raw_token: &str) -> Result<(), Error> {
        let auth_fn = self.auth_fn.as_deref().ok_or(Error::AuthFuncMissing)?;

        let token = auth_fn(raw_token)?;
        if !token.is_fresh(Utc::now().timestamp()) {
            return Err(Error::AuthTokenExpired);
        }

        *self.token.write().expect("token lock poisoned") = Some(token);
        Ok(())
    }

    /// Re-validates the stored token.
    ///
    /// A token that has not reached its expiry passes without calling the
    /// host. A stale token is re-presented to the host callback with the
    /// previously seen token string, since its lifetime may have been
    /// extended out of band.
    ///
    /// # Errors
    ///
    /// [`Error::AuthTokenMissing`] when no token is stored, otherwise
    /// whatever [`Connection::authenticate_and_store`] returns.
    pub fn authenticate(&self) -> Result<(), Error> {
        let stored = self
            .token
            .read()
            .expect("token lock poisoned")
            .clone()
            .ok_or(Error::AuthTokenMissing)?;

        if stored.is_fresh(Utc::now().timestamp()) {
            return Ok(());
        }

        self.authenticate_and_store(&stored.token)
    }

    /// Enqueues a serialized frame for the writer task.
    ///
    /// Never blocks: the payload is either accepted into the bounded
    /// outbound queue or rejected immediately.
    ///
    /// # Errors
    ///
    /// [`Error::ConnectionClosed`] once teardown has started, or
    /// [`Error::OutboundBufferFull`] when a slow client has exhausted its
    /// queue.
    pub fn send_message(&self, message: Utf8Bytes) -> Result<(), Error> {
        if self.status() != Status::Open {
            return Err(Error::ConnectionClosed);
        }

        self.out.try_send(message).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => Error::OutboundBufferFull,
            mpsc::error::TrySendError::Closed(_) => Error::ConnectionClosed,
        })
    }

    /// Tears the connection down: purges its index entries, cancels the
    /// reader and writer tasks, and lets the write half drop the socket.
    ///
    /// Idempotent; the first caller performs the teardown, later calls
    /// return immediately. The outbound queue is never closed here: the
    /// writer task exiting is the only "no more reads" signal, so a late
    /// `send_message` fails cleanly instead of racing a closed queue.
    pub async fn close(&self) {
        if self.close_started.swap(true, Ordering::SeqCst) {
            return;
        }

        *self.status.write().expect("status lock poisoned") = Status::Closing;

        // index entries go first so dispatch stops selecting this
        // connection before the socket disappears
        self.helper.remove(self.id, self.user_id()).await;

        self.cancel.cancel();

        *self.status.write().expect("status lock poisoned") = Status::Closed;
        self.collector.open_connections_dec();

        debug!(id = %self.id, "connection closed");
    }
}

impl Subscriber for Connection {
    fn id(&self) -> Uuid {
        Connection::id(self)
    }

    fn user_id(&self) -> Option<String> {
        Connection::user_id(self)
    }

    fn authenticate(&self) -> Result<(), Error> {
        Connection::authenticate(self)
    }

    fn send_message(&self, message: Utf8Bytes) -> Result<(), Error> {
        Connection::send_message(self, message)
    }
}

/// Reads client frames until the peer closes, the pong deadline expires,
/// the transport fails, or the connection is cancelled.
async fn read_loop(conn: Arc<Connection>, mut stream: SplitStream<WebSocket>) {
    let pong_wait = conn.config.pong_wait;
    let mut deadline = Instant::now() + pong_wait;

    loop {
        let next = tokio::select! {
            () = conn.cancel.cancelled() => break,
            next = timeout_at(deadline, stream.next()) => next,
        };

        match next {
            Err(_elapsed) => {
                warn!(id = %conn.id, "pong deadline expired");
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(err))) => {
                debug!(id = %conn.id, error = %err, "failed to read frame");
                break;
            }
            Ok(Some(Ok(message))) => match message {
                Message::Close(_) => break,
                Message::Pong(_) => {
                    deadline = Instant::now() + pong_wait;
                }
                // the transport layer answers pings itself
                Message::Ping(_) => {}
                Message::Text(text) => {
                    conn.helper.parse_message(&conn, text.as_bytes()).await;
                }
                Message::Binary(data) => {
                    conn.helper.parse_message(&conn, &data).await;
                }
            },
        }
    }

    conn.close().await;
}

/// Sole writer of the socket: drains the outbound queue and emits pings on
/// the configured period.
async fn write_loop(
    conn: Arc<Connection>,
    mut sink: SplitSink<WebSocket, Message>,
    mut out: mpsc::Receiver<Utf8Bytes>,
) {
    let ping_period = conn.config.ping_period;
    let mut ticker = interval_at(Instant::now() + ping_period, ping_period);

    loop {
        tokio::select! {
            () = conn.cancel.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
            _ = ticker.tick() => {
                let payload = (conn.config.ping_message_fn)();
                if let Err(err) = sink.send(Message::Ping(payload.into())).await {
                    debug!(id = %conn.id, error = %err, "failed to write ping frame");
                    break;
                }
            }
            message = out.recv() => match message {
                Some(payload) => {
                    if let Err(err) = sink.send(Message::Text(payload)).await {
                        debug!(id = %conn.id, error = %err, "failed to write frame");
                        break;
                    }
                }
                None => break,
            },
        }
    }

    conn.close().await;
}
