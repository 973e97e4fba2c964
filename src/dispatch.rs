//! Message dispatch: the public and private publish paths.
//!
//! Both paths snapshot the subscriber set, marshal the outbound frame once,
//! and enqueue the shared payload per recipient. Public fan-out treats
//! per-recipient failures as non-fatal; private dispatch surfaces them and
//! re-checks the recipient's token on every send.

use std::sync::Arc;

use axum::extract::ws::Utf8Bytes;
use serde::Serialize;
use tracing::warn;

use crate::channels::Channel;
use crate::error::Error;
use crate::helper::send_error_frame;
use crate::index::SubscriptionIndex;
use crate::messages;

pub(crate) struct Dispatch {
    index: Arc<SubscriptionIndex>,
}

impl Dispatch {
    pub(crate) fn new(index: Arc<SubscriptionIndex>) -> Self {
        Self { index }
    }

    /// Fans a message out to every current subscriber of a channel.
    ///
    /// No subscribers is a successful no-op. A recipient whose outbound
    /// queue is full or closed is logged and skipped; one slow client must
    /// never fail a publish for the others.
    pub(crate) async fn send_public<T: Serialize>(
        &self,
        channel: &Channel,
        message: &T,
    ) -> Result<(), Error> {
        let connections = self.index.connections(channel).await;
        if connections.is_empty() {
            return Ok(());
        }

        let payload = Utf8Bytes::from(messages::encode_frame(channel, message)?);

        for conn in connections {
            if let Err(err) = conn.send_message(payload.clone()) {
                warn!(
                    id = %conn.id(),
                    channel = %channel,
                    error = %err,
                    "failed to enqueue public message"
                );
            }
        }

        Ok(())
    }

    /// Sends a message to the one connection holding `user_id`'s token on a
    /// private channel.
    ///
    /// An absent recipient is a successful no-op. The stored token is
    /// re-validated before the send; an auth failure unsubscribes the
    /// `(user, channel)` pair so later sends become cheap no-ops until the
    /// client re-subscribes with a fresh token, and the client is told why
    /// on the error channel.
    pub(crate) async fn send_private<T: Serialize>(
        &self,
        channel: &Channel,
        user_id: &str,
        message: &T,
    ) -> Result<(), Error> {
        let Some(conn) = self.index.connection_by_user(channel, user_id).await else {
            return Ok(());
        };

        if let Err(err) = conn.authenticate() {
            if err.is_auth_error() {
                self.index.unsubscribe_user(conn.id(), user_id, channel).await;
                send_error_frame(
                    conn.as_ref(),
                    &serde_json::json!({
                        "error": err.to_string(),
                        "channel": channel.as_str(),
                    }),
                );
            }
            return Err(err);
        }

        let payload = Utf8Bytes::from(messages::encode_frame(channel, message)?);

        conn.send_message(payload).map_err(|err| {
            warn!(
                id = %conn.id(),
                channel = %channel,
                error = %err,
                "failed to enqueue private message"
            );
            err
        })
    }
}
