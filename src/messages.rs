//! Wire message types.
//!
//! Defines the inbound client frame, its validation, and the outbound frame
//! every publish is wrapped in.
//!
//! Inbound frames are UTF-8 JSON, one object per text frame:
//!
//! ```json
//! { "type": "subscribe",
//!   "params": { "channels": ["news"], "token": "optional" } }
//! ```

use serde::{Deserialize, Serialize};

use crate::channels::{Channel, ChannelRegistry};
use crate::error::Error;

/// Frame type that subscribes the client to the listed channels.
pub const FRAME_TYPE_SUBSCRIBE: &str = "subscribe";

/// Frame type that unsubscribes the client from the listed channels.
pub const FRAME_TYPE_UNSUBSCRIBE: &str = "unsubscribe";

const FIELD_TYPE: &str = "type";
const FIELD_CHANNELS: &str = "channels";

const ERR_UNSUPPORTED_TYPE: &str = "message type is not supported";
const ERR_CHANNELS_EMPTY: &str = "channels list is empty, minimum size is 1";
const ERR_UNSUPPORTED_CHANNEL: &str = "channel is not supported";
const ERR_INVALID_CHANNEL_TYPE: &str = "channel should be either private or public";
const ERR_TOKEN_MISSING: &str = "auth token is missing for the private channel";

/// Parameters carried by a client frame.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FrameParams {
    /// Channels the frame applies to.
    #[serde(default)]
    pub channels: Vec<Channel>,

    /// Optional auth token for private channels.
    #[serde(default)]
    pub token: Option<String>,
}

impl FrameParams {
    /// Returns true if a non-whitespace token is present.
    #[must_use]
    pub fn has_token(&self) -> bool {
        self.token
            .as_deref()
            .is_some_and(|token| !token.trim().is_empty())
    }
}

/// An inbound frame sent by a client.
///
/// The frame type is kept as a plain string so that an unknown type surfaces
/// as a validation error rather than a decode failure.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientFrame {
    /// The requested action, one of the `FRAME_TYPE_*` constants.
    #[serde(rename = "type", default)]
    pub kind: String,

    /// Action parameters.
    #[serde(default)]
    pub params: FrameParams,
}

impl ClientFrame {
    /// Decodes a frame from raw payload bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] if the payload is not valid JSON for the
    /// frame shape.
    pub fn decode(data: &[u8]) -> Result<Self, Error> {
        serde_json::from_slice(data).map_err(Error::Decode)
    }

    /// Validates the frame against the registry, accumulating field errors.
    #[must_use]
    pub fn validate(&self, registry: &ChannelRegistry) -> ValidationReport {
        let mut report = ValidationReport::default();

        if self.kind != FRAME_TYPE_SUBSCRIBE && self.kind != FRAME_TYPE_UNSUBSCRIBE {
            report.add_field_error(FIELD_TYPE, ERR_UNSUPPORTED_TYPE);
        }

        if self.params.channels.is_empty() {
            report.add_field_error(FIELD_CHANNELS, ERR_CHANNELS_EMPTY);
            return report;
        }

        for channel in &self.params.channels {
            let field = format!("{}[{}]", FIELD_CHANNELS, channel);

            if !registry.is_known(channel) {
                report.add_field_error(&field, ERR_UNSUPPORTED_CHANNEL);
                continue;
            }

            if !registry.is_public(channel) && !registry.is_private(channel) {
                report.add_field_error(&field, ERR_INVALID_CHANNEL_TYPE);
            }

            if registry.is_private(channel) && !self.params.has_token() {
                report.add_field_error(&field, ERR_TOKEN_MISSING);
            }
        }

        report
    }
}

/// A single field-level validation failure.
#[derive(Debug, Clone, Serialize)]
pub struct FieldError {
    /// The offending field, e.g. `channels[news]`.
    pub field: String,

    /// What was wrong with it.
    pub error: String,
}

/// Accumulated validation failures for one frame.
///
/// Serializes to `{"field_errors": [...]}` so it can be published back to
/// the client on the error channel.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    /// Per-field failures, in the order they were found.
    pub field_errors: Vec<FieldError>,
}

impl ValidationReport {
    /// Records a field failure.
    pub fn add_field_error(&mut self, field: impl Into<String>, error: impl Into<String>) {
        self.field_errors.push(FieldError {
            field: field.into(),
            error: error.into(),
        });
    }

    /// Returns true if no failures were recorded.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.field_errors.is_empty()
    }
}

/// The outbound frame wrapping every published message.
#[derive(Serialize)]
struct ServerFrame<'a, T: Serialize> {
    channel: &'a Channel,
    data: &'a T,
}

/// Serializes an outbound frame once, for fan-out to many recipients.
///
/// # Errors
///
/// Returns [`Error::Encode`] if the host-supplied payload cannot be
/// serialized.
pub(crate) fn encode_frame<T: Serialize>(channel: &Channel, data: &T) -> Result<String, Error> {
    serde_json::to_string(&ServerFrame { channel, data }).map_err(Error::Encode)
}
