//! Glue between the connection loops and the subscription index.
//!
//! The helper decodes and validates inbound frames, authenticates tokens on
//! demand, and applies the resulting subscribe/unsubscribe/remove to the
//! index. Per-frame failures never tear the connection down; they are logged
//! and pushed back to the client on the reserved error channel.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::channels::{Channel, ChannelRegistry};
use crate::connection::Connection;
use crate::index::{Subscriber, SubscriptionIndex};
use crate::messages::{self, ClientFrame, FRAME_TYPE_SUBSCRIBE, FRAME_TYPE_UNSUBSCRIBE};

pub(crate) struct Helper {
    index: Arc<SubscriptionIndex>,
    registry: Arc<ChannelRegistry>,
}

impl Helper {
    pub(crate) fn new(index: Arc<SubscriptionIndex>, registry: Arc<ChannelRegistry>) -> Self {
        Self { index, registry }
    }

    /// Decodes, validates, and applies one inbound frame.
    ///
    /// A frame that fails to decode or validate, or whose token the host
    /// rejects, aborts processing of that frame only.
    pub(crate) async fn parse_message(&self, conn: &Arc<Connection>, data: &[u8]) {
        let frame = match ClientFrame::decode(data) {
            Ok(frame) => frame,
            Err(err) => {
                debug!(id = %conn.id(), error = %err, "failed to decode inbound frame");
                send_error_frame(conn.as_ref(), &serde_json::json!({ "error": err.to_string() }));
                return;
            }
        };

        let report = frame.validate(&self.registry);
        if !report.is_valid() {
            debug!(id = %conn.id(), "inbound frame failed validation");
            send_error_frame(conn.as_ref(), &report);
            return;
        }

        if frame.params.has_token() {
            if let Some(raw_token) = frame.params.token.as_deref() {
                if let Err(err) = conn.authenticate_and_store(raw_token) {
                    warn!(id = %conn.id(), error = %err, "failed to authenticate token");
                    send_error_frame(
                        conn.as_ref(),
                        &serde_json::json!({ "error": err.to_string() }),
                    );
                    return;
                }
            }
        }

        match frame.kind.as_str() {
            FRAME_TYPE_SUBSCRIBE => {
                self.index
                    .subscribe(Arc::clone(conn) as Arc<dyn Subscriber>, &frame.params.channels)
                    .await;
            }
            FRAME_TYPE_UNSUBSCRIBE => {
                self.index
                    .unsubscribe(conn.id(), &frame.params.channels)
                    .await;
            }
            // validation only lets the two supported types through
            _ => {}
        }
    }

    /// Purges a connection from the index.
    pub(crate) async fn remove(&self, id: Uuid, user_id: Option<String>) {
        self.index.remove(id, user_id.as_deref()).await;
    }
}

/// Best-effort write of an error payload onto the connection's reserved
/// error channel. Failures are logged and dropped; an error report must
/// never take the connection down with it.
pub(crate) fn send_error_frame<T: Serialize>(subscriber: &dyn Subscriber, payload: &T) {
    match messages::encode_frame(&Channel::error(), payload) {
        Ok(json) => {
            if let Err(err) = subscriber.send_message(json.into()) {
                debug!(id = %subscriber.id(), error = %err, "failed to enqueue error frame");
            }
        }
        Err(err) => {
            debug!(id = %subscriber.id(), error = %err, "failed to encode error frame");
        }
    }
}
