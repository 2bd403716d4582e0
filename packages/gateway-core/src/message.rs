//! Wire-compatible message schemas for the fan-out gateway protocol.
//!
//! Two distinct wire formats share this module: the client-facing
//! WebSocket protocol (`ClientFrame`/`ServerFrame`, spec §6) and the
//! inter-gateway broker protocol (`RoutedMessage`, spec §3/§4.3). Both are
//! UTF-8 JSON, internally tagged on a `type` field, so unknown fields are
//! ignored on decode and forward compatibility comes for free from serde.

use serde::{Deserialize, Serialize};

/// Frame sent by a client over the `/ws` connection.
///
/// Valid transitions are enforced by the connection handler's state
/// machine, not by this type — `Register` is only meaningful in `UNAUTH`,
/// `Ping`/`Message` only in `ACTIVE`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientFrame {
    /// Claims a `userId` for this connection. Valid only in `UNAUTH`.
    Register {
        #[serde(rename = "userId")]
        user_id: String,
    },
    /// Heartbeat from an already-registered connection.
    Ping,
    /// A point-to-point send request.
    Message {
        to: String,
        content: String,
    },
}

/// Frame sent by the server to a client over the `/ws` connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerFrame {
    /// Acknowledges a successful `register`.
    Registered {
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<String>,
    },
    /// Acknowledges a `ping`.
    Pong,
    /// A delivered point-to-point message.
    Message { from: String, content: String },
    /// A protocol-level or routing-level error. The socket stays open.
    Error { error: String },
}

impl ServerFrame {
    #[must_use]
    pub fn registered() -> Self {
        Self::Registered { content: None }
    }

    #[must_use]
    pub fn error(reason: impl Into<String>) -> Self {
        Self::Error {
            error: reason.into(),
        }
    }

    /// Serializes to the JSON text frame sent on the wire.
    ///
    /// # Errors
    ///
    /// Never fails for well-formed `ServerFrame` values, but returns
    /// `serde_json::Error` for symmetry with `ClientFrame::decode`.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl ClientFrame {
    /// Decodes a client-sent text frame.
    ///
    /// # Errors
    ///
    /// Returns `serde_json::Error` on malformed JSON or an unrecognized
    /// `type` tag. Forward-compatible fields not named by a variant are
    /// ignored, per spec.
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Tag distinguishing routing semantics for a `RoutedMessage`.
///
/// Values other than `Direct`/`Broadcast` are passed through to the
/// handler unchanged (spec §4.3 forward-compatibility clause), so this
/// deserializes any string rather than rejecting unknown tags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutedMessageType {
    Direct,
    Broadcast,
    #[serde(other)]
    Unknown,
}

/// Inter-gateway wire object published to a broker channel/topic and
/// consumed by the owning gateway's router (spec §3, §4.3, §6).
///
/// `message_id` is reserved by spec but not required by the core; kept as
/// `Option<String>` so producers may omit it and consumers never choke on
/// its absence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutedMessage {
    pub from: String,
    pub to: String,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: RoutedMessageType,
    #[serde(rename = "messageId", skip_serializing_if = "Option::is_none", default)]
    pub message_id: Option<String>,
}

impl RoutedMessage {
    #[must_use]
    pub fn direct(from: impl Into<String>, to: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            content: content.into(),
            kind: RoutedMessageType::Direct,
            message_id: None,
        }
    }

    #[must_use]
    pub fn broadcast(from: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: String::new(),
            content: content.into(),
            kind: RoutedMessageType::Broadcast,
            message_id: None,
        }
    }

    /// # Errors
    ///
    /// Propagates `serde_json::Error` on encode failure (never expected
    /// for well-formed `String` fields).
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// # Errors
    ///
    /// Returns `serde_json::Error` on malformed JSON. A decode error is
    /// treated by the durable-log transport as a poison pill (spec §4.3):
    /// logged and skipped, never propagated as a fatal error.
    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Arbitrary user-supplied content must never break the wire
        /// encoding -- a message body is untrusted text, not a grid of
        /// hand-picked fixtures.
        #[test]
        fn direct_message_survives_arbitrary_content(
            from in "[a-zA-Z0-9_ \\PC]{0,64}",
            to in "[a-zA-Z0-9_ \\PC]{0,64}",
            content in "\\PC{0,256}",
        ) {
            let msg = RoutedMessage::direct(from, to, content);
            let bytes = msg.encode().expect("encode must not fail for valid UTF-8 fields");
            let decoded = RoutedMessage::decode(&bytes).expect("decode must round-trip what we just encoded");
            prop_assert_eq!(msg, decoded);
        }

        #[test]
        fn client_message_frame_survives_arbitrary_content(
            to in "\\PC{0,64}",
            content in "\\PC{0,256}",
        ) {
            let frame = ClientFrame::Message { to, content };
            let text = serde_json::to_string(&frame).expect("encode must not fail");
            let decoded = ClientFrame::decode(&text).expect("decode must round-trip what we just encoded");
            prop_assert_eq!(frame, decoded);
        }
    }
}
