//! Embeddable WebSocket pub/sub fan-out engine.
//!
//! A host application registers named channels (public or private), accepts
//! WebSocket clients over HTTP upgrades, and publishes messages the engine
//! delivers to every subscriber of a channel. Private channels require the
//! client to present a token that the host validates through an injected
//! authentication callback; messages on such channels are addressed to one
//! user and delivered only while that user is connected and the token is
//! still live.
//!
//! # Wire format
//!
//! Clients subscribe and unsubscribe with JSON text frames:
//!
//! ```json
//! { "type": "subscribe",
//!   "params": { "channels": ["news"], "token": "optional-string" } }
//! ```
//!
//! Published messages arrive wrapped per channel:
//!
//! ```json
//! { "channel": "news", "data": { "headline": "hello" } }
//! ```
//!
//! Failures the engine can attribute to a single frame (bad JSON, unknown
//! channels, rejected tokens) come back on the reserved `"error"` channel;
//! the connection stays open.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use axum::{routing::get, Router};
//! use channelcast::{handler::ws_handler, Channelcast, Config, Token};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = Arc::new(Channelcast::new(Config::default().with_auth_fn(
//!         |raw_token| Ok(Token::new(raw_token, "user-1", i64::MAX)),
//!     ))?);
//!
//!     let news = engine.register_public_channel("news");
//!     engine.register_private_channel("notifications");
//!
//!     let app = Router::new()
//!         .route("/ws", get(ws_handler))
//!         .with_state(Arc::clone(&engine));
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:8080").await?;
//!     tokio::spawn(async move {
//!         let _ = axum::serve(listener, app).await;
//!     });
//!
//!     engine
//!         .send_public(&news, &serde_json::json!({ "headline": "hello" }))
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod channels;
pub mod connection;
pub mod error;
pub mod handler;
pub mod messages;
pub mod metrics;

mod dispatch;
mod helper;
mod index;
#[cfg(test)]
mod mock;

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::WebSocket;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::auth::AuthenticateFn;
use crate::connection::{ConnectionConfig, PingMessageFn};
use crate::dispatch::Dispatch;
use crate::helper::Helper;
use crate::index::SubscriptionIndex;

pub use crate::auth::Token;
pub use crate::channels::{Channel, ChannelRegistry, ERROR_CHANNEL};
pub use crate::connection::{Connection, Status};
pub use crate::error::Error;
pub use crate::metrics::{AtomicCollector, Collector, NoopCollector};

/// Engine configuration.
///
/// Built in the `with_*` style; every knob has a production default. The
/// liveness timers must satisfy `ping_period < pong_wait`.
pub struct Config {
    outbound_buffer_size: usize,
    pong_wait: Duration,
    ping_period: Duration,
    ping_message_fn: Arc<PingMessageFn>,
    auth_fn: Option<Arc<AuthenticateFn>>,
    collector: Arc<dyn Collector>,
}

impl Default for Config {
    fn default() -> Self {
        let defaults = ConnectionConfig::default();
        Self {
            outbound_buffer_size: defaults.outbound_buffer_size,
            pong_wait: defaults.pong_wait,
            ping_period: defaults.ping_period,
            ping_message_fn: defaults.ping_message_fn,
            auth_fn: None,
            collector: Arc::new(NoopCollector),
        }
    }
}

impl Config {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the per-connection outbound queue capacity.
    #[must_use]
    pub fn with_outbound_buffer_size(mut self, size: usize) -> Self {
        self.outbound_buffer_size = size;
        self
    }

    /// Sets the time allowed between client pongs.
    #[must_use]
    pub fn with_pong_wait(mut self, duration: Duration) -> Self {
        self.pong_wait = duration;
        self
    }

    /// Sets the interval between server pings.
    #[must_use]
    pub fn with_ping_period(mut self, duration: Duration) -> Self {
        self.ping_period = duration;
        self
    }

    /// Sets the producer of ping frame payloads.
    #[must_use]
    pub fn with_ping_message_fn<F>(mut self, ping_message_fn: F) -> Self
    where
        F: Fn() -> Vec<u8> + Send + Sync + 'static,
    {
        self.ping_message_fn = Arc::new(ping_message_fn);
        self
    }

    /// Sets the host authentication callback for private channels.
    #[must_use]
    pub fn with_auth_fn<F>(mut self, auth_fn: F) -> Self
    where
        F: Fn(&str) -> Result<Token, Error> + Send + Sync + 'static,
    {
        self.auth_fn = Some(auth::into_auth_fn(auth_fn));
        self
    }

    /// Sets the metrics collector.
    #[must_use]
    pub fn with_collector(mut self, collector: Arc<dyn Collector>) -> Self {
        self.collector = collector;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] when the outbound queue capacity is
    /// zero or the ping period does not stay below the pong wait.
    pub fn validate(&self) -> Result<(), Error> {
        if self.outbound_buffer_size == 0 {
            return Err(Error::InvalidConfig(
                "outbound buffer size must be at least 1".to_string(),
            ));
        }

        if self.ping_period >= self.pong_wait {
            return Err(Error::InvalidConfig(
                "ping period must be shorter than pong wait".to_string(),
            ));
        }

        Ok(())
    }

    fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            outbound_buffer_size: self.outbound_buffer_size,
            pong_wait: self.pong_wait,
            ping_period: self.ping_period,
            ping_message_fn: Arc::clone(&self.ping_message_fn),
        }
    }
}

/// The engine façade.
///
/// Owns the channel registry, the subscription index, and the dispatcher,
/// and hands out one [`Connection`] per upgraded socket. Cheap to share as
/// `Arc<Channelcast>`; cancelling via [`Channelcast::shutdown`] cascades
/// teardown into every connection.
pub struct Channelcast {
    registry: Arc<ChannelRegistry>,
    helper: Arc<Helper>,
    dispatch: Dispatch,
    config: Config,
    shutdown: CancellationToken,
}

impl Channelcast {
    /// Creates an engine from the given configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] when the configuration fails
    /// [`Config::validate`].
    pub fn new(config: Config) -> Result<Self, Error> {
        Self::with_registry(Arc::new(ChannelRegistry::new()), config)
    }

    /// Creates an engine around an existing channel registry.
    ///
    /// Lets several engines, or an engine and its tests, share one set of
    /// registered channel names.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] when the configuration fails
    /// [`Config::validate`].
    pub fn with_registry(registry: Arc<ChannelRegistry>, config: Config) -> Result<Self, Error> {
        config.validate()?;

        let index = Arc::new(SubscriptionIndex::new(Arc::clone(&config.collector)));
        let helper = Arc::new(Helper::new(Arc::clone(&index), Arc::clone(&registry)));
        let dispatch = Dispatch::new(index);

        Ok(Self {
            registry,
            helper,
            dispatch,
            config,
            shutdown: CancellationToken::new(),
        })
    }

    /// Creates an engine with the default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the default configuration is invalid.
    pub fn with_defaults() -> Result<Self, Error> {
        Self::new(Config::default())
    }

    /// Registers a public channel.
    pub fn register_public_channel(&self, name: &str) -> Channel {
        self.registry.register_public(name)
    }

    /// Registers a list of public channels.
    pub fn register_public_channels(&self, names: &[&str]) -> Vec<Channel> {
        self.registry.register_public_channels(names)
    }

    /// Registers a private channel.
    pub fn register_private_channel(&self, name: &str) -> Channel {
        self.registry.register_private(name)
    }

    /// Registers a list of private channels.
    pub fn register_private_channels(&self, names: &[&str]) -> Vec<Channel> {
        self.registry.register_private_channels(names)
    }

    /// Returns the channel registry.
    #[must_use]
    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    /// Binds an upgraded socket to a new connection.
    ///
    /// The connection's workers derive from the engine's long-lived
    /// cancellation token, so [`Channelcast::shutdown`] tears them down.
    pub fn attach(&self, socket: WebSocket) -> Arc<Connection> {
        Connection::spawn(
            socket,
            Arc::clone(&self.helper),
            self.config.auth_fn.clone(),
            Arc::clone(&self.config.collector),
            self.shutdown.child_token(),
            self.config.connection_config(),
        )
    }

    /// Publishes a message to every subscriber of a public channel.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Encode`] when the payload cannot be serialized.
    /// Per-recipient delivery failures are logged, not surfaced.
    pub async fn send_public<T: Serialize>(
        &self,
        channel: &Channel,
        message: &T,
    ) -> Result<(), Error> {
        self.dispatch.send_public(channel, message).await
    }

    /// Publishes a message to one user on a private channel.
    ///
    /// # Errors
    ///
    /// Surfaces auth failures (after unsubscribing the stale user mapping),
    /// [`Error::Encode`], and per-recipient send failures. An absent
    /// recipient is a successful no-op.
    pub async fn send_private<T: Serialize>(
        &self,
        channel: &Channel,
        user_id: &str,
        message: &T,
    ) -> Result<(), Error> {
        self.dispatch.send_private(channel, user_id, message).await
    }

    /// Cancels every connection spawned by this engine.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}
