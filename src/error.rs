//! Engine error types.
//!
//! Provides the error enum shared by connections, the dispatcher, and the
//! host-facing API.

/// Errors produced by the engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The websocket connection is no longer open.
    #[error("websocket connection is closed")]
    ConnectionClosed,

    /// The per-connection outbound queue is full.
    #[error("connection outbound buffer is full")]
    OutboundBufferFull,

    /// An inbound frame could not be decoded.
    #[error("failed to decode inbound frame: {0}")]
    Decode(#[source] serde_json::Error),

    /// An outbound frame could not be serialized.
    #[error("failed to encode outbound frame: {0}")]
    Encode(#[source] serde_json::Error),

    /// No authentication callback was configured.
    #[error("authentication callback is not configured")]
    AuthFuncMissing,

    /// The connection has no stored auth token.
    #[error("connection auth token is missing")]
    AuthTokenMissing,

    /// The stored auth token has expired.
    #[error("auth token is expired")]
    AuthTokenExpired,

    /// The host's authentication callback rejected the token.
    #[error("auth token rejected: {0}")]
    AuthRejected(String),

    /// The engine configuration is invalid.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Returns true for the auth failures that make a private subscription
    /// unusable until the client re-subscribes with a fresh token.
    ///
    /// A rejection from the host callback is deliberately not included; the
    /// host decides what its own errors mean.
    #[must_use]
    pub fn is_auth_error(&self) -> bool {
        matches!(
            self,
            Self::AuthFuncMissing | Self::AuthTokenMissing | Self::AuthTokenExpired
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            Error::ConnectionClosed.to_string(),
            "websocket connection is closed"
        );
        assert_eq!(
            Error::OutboundBufferFull.to_string(),
            "connection outbound buffer is full"
        );
        assert_eq!(
            Error::AuthRejected("bad signature".to_string()).to_string(),
            "auth token rejected: bad signature"
        );
    }

    #[test]
    fn test_is_auth_error() {
        assert!(Error::AuthFuncMissing.is_auth_error());
        assert!(Error::AuthTokenMissing.is_auth_error());
        assert!(Error::AuthTokenExpired.is_auth_error());

        assert!(!Error::ConnectionClosed.is_auth_error());
        assert!(!Error::AuthRejected("nope".to_string()).is_auth_error());
        assert!(!Error::OutboundBufferFull.is_auth_error());
    }
}
