//! Metrics collector surface.
//!
//! The engine reports connection lifecycle and subscription-storage sizes to
//! a [`Collector`]. Hosts adapt the trait to their exporter; the default is
//! a no-op.

use std::sync::atomic::{AtomicU64, Ordering};

/// Receives engine gauges.
///
/// Every method has a no-op default so implementations pick what they care
/// about. The `storage_*` gauges are informational snapshot sizes of the
/// subscription index, refreshed after each index mutation.
pub trait Collector: Send + Sync {
    /// A connection was opened.
    fn open_connections_inc(&self) {}

    /// A connection was closed.
    fn open_connections_dec(&self) {}

    /// A user was attached to a connection in the index.
    fn private_connections_inc(&self) {}

    /// A user mapping was removed from the index.
    fn private_connections_dec(&self) {}

    /// Number of connections with at least one subscription.
    fn storage_open_connections(&self, _count: usize) {}

    /// Number of user-to-connection mappings.
    fn storage_private_connections(&self, _count: usize) {}

    /// Number of channels with at least one subscriber.
    fn storage_subscribed_channels(&self, _count: usize) {}
}

/// Collector that discards everything.
#[derive(Debug, Default)]
pub struct NoopCollector;

impl Collector for NoopCollector {}

/// Collector backed by atomic counters.
///
/// Useful in tests and for hosts that scrape gauges themselves.
#[derive(Debug, Default)]
pub struct AtomicCollector {
    open_connections: AtomicU64,
    private_connections: AtomicU64,
    storage_open_connections: AtomicU64,
    storage_private_connections: AtomicU64,
    storage_subscribed_channels: AtomicU64,
}

impl AtomicCollector {
    /// Creates a new collector with all gauges at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current number of open connections.
    #[must_use]
    pub fn open_connections(&self) -> u64 {
        self.open_connections.load(Ordering::Relaxed)
    }

    /// Current number of private (user-mapped) connections.
    #[must_use]
    pub fn private_connections(&self) -> u64 {
        self.private_connections.load(Ordering::Relaxed)
    }

    /// Last reported count of connections with subscriptions.
    #[must_use]
    pub fn storage_open_connections(&self) -> u64 {
        self.storage_open_connections.load(Ordering::Relaxed)
    }

    /// Last reported count of user mappings.
    #[must_use]
    pub fn storage_private_connections(&self) -> u64 {
        self.storage_private_connections.load(Ordering::Relaxed)
    }

    /// Last reported count of channels with subscribers.
    #[must_use]
    pub fn storage_subscribed_channels(&self) -> u64 {
        self.storage_subscribed_channels.load(Ordering::Relaxed)
    }
}

impl Collector for AtomicCollector {
    fn open_connections_inc(&self) {
        self.open_connections.fetch_add(1, Ordering::Relaxed);
    }

    fn open_connections_dec(&self) {
        self.open_connections.fetch_sub(1, Ordering::Relaxed);
    }

    fn private_connections_inc(&self) {
        self.private_connections.fetch_add(1, Ordering::Relaxed);
    }

    fn private_connections_dec(&self) {
        self.private_connections.fetch_sub(1, Ordering::Relaxed);
    }

    fn storage_open_connections(&self, count: usize) {
        self.storage_open_connections
            .store(count as u64, Ordering::Relaxed);
    }

    fn storage_private_connections(&self, count: usize) {
        self.storage_private_connections
            .store(count as u64, Ordering::Relaxed);
    }

    fn storage_subscribed_channels(&self, count: usize) {
        self.storage_subscribed_channels
            .store(count as u64, Ordering::Relaxed);
    }
}
