//! Channel names and the public/private registry.
//!
//! Channels are host-registered string names. A name is either public (any
//! subscriber may join) or private (messages are addressed to one user and
//! require a token). Registration is expected at startup but is safe under
//! concurrent callers.

use std::collections::HashSet;
use std::fmt;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

/// Name of the reserved channel used to push engine errors to a client.
pub const ERROR_CHANNEL: &str = "error";

/// A named delivery topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Channel(String);

impl Channel {
    /// Creates a channel name without registering it.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The reserved error channel.
    #[must_use]
    pub fn error() -> Self {
        Self(ERROR_CHANNEL.to_string())
    }

    /// Returns the channel name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Channel {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

#[derive(Debug, Default)]
struct RegistryInner {
    public: HashSet<Channel>,
    private: HashSet<Channel>,
}

/// Registry of the channel names the engine will accept subscriptions for.
///
/// Guarded by a single readers-writer lock; registration happens at startup,
/// reads dominate afterwards. The first registration of a name decides its
/// classification for good: registering the same name again, as either kind,
/// is a no-op that keeps the original classification.
#[derive(Debug, Default)]
pub struct ChannelRegistry {
    inner: RwLock<RegistryInner>,
}

impl ChannelRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a public channel and returns it.
    pub fn register_public(&self, name: &str) -> Channel {
        let channel = Channel::from(name);
        let mut inner = self.inner.write().expect("registry lock poisoned");
        if !inner.private.contains(&channel) {
            inner.public.insert(channel.clone());
        }
        channel
    }

    /// Registers a private channel and returns it.
    pub fn register_private(&self, name: &str) -> Channel {
        let channel = Channel::from(name);
        let mut inner = self.inner.write().expect("registry lock poisoned");
        if !inner.public.contains(&channel) {
            inner.private.insert(channel.clone());
        }
        channel
    }

    /// Registers a list of public channels.
    pub fn register_public_channels(&self, names: &[&str]) -> Vec<Channel> {
        names.iter().map(|name| self.register_public(name)).collect()
    }

    /// Registers a list of private channels.
    pub fn register_private_channels(&self, names: &[&str]) -> Vec<Channel> {
        names.iter().map(|name| self.register_private(name)).collect()
    }

    /// Returns true if the channel has been registered at all.
    #[must_use]
    pub fn is_known(&self, channel: &Channel) -> bool {
        let inner = self.inner.read().expect("registry lock poisoned");
        inner.public.contains(channel) || inner.private.contains(channel)
    }

    /// Returns true if the channel is registered as public.
    #[must_use]
    pub fn is_public(&self, channel: &Channel) -> bool {
        let inner = self.inner.read().expect("registry lock poisoned");
        inner.public.contains(channel)
    }

    /// Returns true if the channel is registered as private.
    #[must_use]
    pub fn is_private(&self, channel: &Channel) -> bool {
        let inner = self.inner.read().expect("registry lock poisoned");
        inner.private.contains(channel)
    }
}
