//! Concurrent subscription index.
//!
//! A bidirectional map between connections and channels, plus the
//! user-to-connection mapping private dispatch relies on. One readers-writer
//! lock guards all three maps; reads return detached snapshots.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use axum::extract::ws::Utf8Bytes;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::channels::Channel;
use crate::error::Error;
use crate::metrics::Collector;

/// The index-facing surface of a connection.
///
/// Implemented by [`crate::connection::Connection`]; kept as a trait so the
/// index and dispatcher can be exercised with test doubles.
pub(crate) trait Subscriber: Send + Sync {
    /// Stable connection identifier.
    fn id(&self) -> Uuid;

    /// The connected user, when an auth token with a user is stored.
    fn user_id(&self) -> Option<String>;

    /// Re-validates the stored auth token.
    fn authenticate(&self) -> Result<(), Error>;

    /// Enqueues an outbound payload without blocking.
    fn send_message(&self, message: Utf8Bytes) -> Result<(), Error>;
}

#[derive(Default)]
struct IndexInner {
    /// connection id → channels it subscribed to.
    conn_channels: HashMap<Uuid, HashSet<Channel>>,

    /// channel → subscribed connections, keyed by id. Reverse direction of
    /// `conn_channels` so fan-out never scans the whole index.
    channel_conns: HashMap<Channel, HashMap<Uuid, Arc<dyn Subscriber>>>,

    /// user → connection id of the connection holding that user's token.
    user_conns: HashMap<String, Uuid>,
}

/// Concurrent bidirectional subscription storage.
pub(crate) struct SubscriptionIndex {
    inner: RwLock<IndexInner>,
    collector: Arc<dyn Collector>,
}

impl SubscriptionIndex {
    pub(crate) fn new(collector: Arc<dyn Collector>) -> Self {
        Self {
            inner: RwLock::new(IndexInner::default()),
            collector,
        }
    }

    /// Subscribes a connection to the given channels.
    ///
    /// Duplicate subscriptions are idempotent. If the connection carries a
    /// user, the user mapping is recorded.
    pub(crate) async fn subscribe(&self, conn: Arc<dyn Subscriber>, channels: &[Channel]) {
        let id = conn.id();
        let mut inner = self.inner.write().await;

        inner.conn_channels.entry(id).or_default();

        if let Some(user_id) = conn.user_id() {
            if inner.user_conns.insert(user_id, id).is_none() {
                self.collector.private_connections_inc();
            }
        }

        for channel in channels {
            inner
                .conn_channels
                .entry(id)
                .or_default()
                .insert(channel.clone());
            inner
                .channel_conns
                .entry(channel.clone())
                .or_default()
                .insert(id, Arc::clone(&conn));
        }

        self.report_sizes(&inner);
    }

    /// Removes the given channel subscriptions for a connection.
    ///
    /// Entries that do not exist are silently tolerated. The user mapping is
    /// left untouched.
    pub(crate) async fn unsubscribe(&self, id: Uuid, channels: &[Channel]) {
        let mut inner = self.inner.write().await;

        for channel in channels {
            Self::remove_subscription(&mut inner, id, channel);
        }

        self.report_sizes(&inner);
    }

    /// Removes one channel subscription and the user mapping.
    ///
    /// Used when dispatch discovers an expired or missing token: the user
    /// must re-subscribe with a fresh token before private sends resume.
    pub(crate) async fn unsubscribe_user(&self, id: Uuid, user_id: &str, channel: &Channel) {
        let mut inner = self.inner.write().await;

        if inner.user_conns.remove(user_id).is_some() {
            self.collector.private_connections_dec();
        }

        Self::remove_subscription(&mut inner, id, channel);

        self.report_sizes(&inner);
    }

    /// Purges every entry for a connection, in both directions.
    pub(crate) async fn remove(&self, id: Uuid, user_id: Option<&str>) {
        let mut inner = self.inner.write().await;

        if let Some(channels) = inner.conn_channels.remove(&id) {
            for channel in channels {
                if let Some(conns) = inner.channel_conns.get_mut(&channel) {
                    conns.remove(&id);
                    if conns.is_empty() {
                        inner.channel_conns.remove(&channel);
                    }
                }
            }
        }

        if let Some(user_id) = user_id {
            if inner.user_conns.remove(user_id).is_some() {
                self.collector.private_connections_dec();
            }
        }

        self.report_sizes(&inner);
    }

    /// Returns a detached snapshot of the connections subscribed to a channel.
    pub(crate) async fn connections(&self, channel: &Channel) -> Vec<Arc<dyn Subscriber>> {
        let inner = self.inner.read().await;
        inner
            .channel_conns
            .get(channel)
            .map(|conns| conns.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns the connection holding `user_id`'s token, if it is subscribed
    /// to the channel.
    pub(crate) async fn connection_by_user(
        &self,
        channel: &Channel,
        user_id: &str,
    ) -> Option<Arc<dyn Subscriber>> {
        let inner = self.inner.read().await;
        let id = inner.user_conns.get(user_id)?;
        inner.channel_conns.get(channel)?.get(id).cloned()
    }

    fn remove_subscription(inner: &mut IndexInner, id: Uuid, channel: &Channel) {
        if let Some(channels) = inner.conn_channels.get_mut(&id) {
            channels.remove(channel);
        }

        if let Some(conns) = inner.channel_conns.get_mut(channel) {
            conns.remove(&id);
            if conns.is_empty() {
                inner.channel_conns.remove(channel);
            }
        }
    }

    fn report_sizes(&self, inner: &IndexInner) {
        self.collector.storage_open_connections(inner.conn_channels.len());
        self.collector
            .storage_private_connections(inner.user_conns.len());
        self.collector
            .storage_subscribed_channels(inner.channel_conns.len());
    }
}
