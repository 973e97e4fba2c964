//! Authentication token and host callback contract.
//!
//! The engine never interprets tokens itself. The host supplies a callback
//! that exchanges the raw token string for a [`Token`]; the engine only
//! compares `expires_at` against its own clock.

use std::sync::Arc;

use crate::error::Error;

/// Authentication callback implemented by the host.
///
/// Called when a client subscribes to a private channel and again whenever a
/// stored token has passed its expiry (tokens may be rotated or extended out
/// of band). It is the sole source of truth for token validity.
pub type AuthenticateFn = dyn Fn(&str) -> Result<Token, Error> + Send + Sync;

/// A validated client token as returned by the host's [`AuthenticateFn`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// The raw token string the client presented.
    pub token: String,

    /// The user that owns the token.
    pub user_id: String,

    /// Expiration time as unix seconds.
    pub expires_at: i64,
}

impl Token {
    /// Creates a new token.
    #[must_use]
    pub fn new(token: impl Into<String>, user_id: impl Into<String>, expires_at: i64) -> Self {
        Self {
            token: token.into(),
            user_id: user_id.into(),
            expires_at,
        }
    }

    /// Returns true if the token expiry is still in the future.
    #[must_use]
    pub fn is_fresh(&self, now: i64) -> bool {
        now < self.expires_at
    }
}

/// Wraps a plain closure into the shared callback form the engine stores.
pub(crate) fn into_auth_fn<F>(f: F) -> Arc<AuthenticateFn>
where
    F: Fn(&str) -> Result<Token, Error> + Send + Sync + 'static,
{
    Arc::new(f)
}
