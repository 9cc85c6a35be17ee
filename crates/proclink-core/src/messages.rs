//! Wire protocol for host <-> companion communication
//!
//! Every message crosses the transport wrapped in exactly one [`Envelope`].
//! Payloads form a closed, internally-tagged union serialized as JSON:
//! `{"Type": "MessageType", ...fields}`, PascalCase throughout, so a
//! receiver can resolve the payload's concrete type from the frame alone.

use crate::result::{WireError, WireResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Version tag carried by every envelope.
pub const PROTOCOL_VERSION: i64 = 1;

/// The wrapper around every transmitted payload.
///
/// `message_id` is assigned by the sender from a per-connection counter
/// starting at 1 and is never reused within a connection's lifetime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Envelope {
    pub protocol_version: i64,
    pub message_id: i64,
    pub payload: Payload,
}

impl Envelope {
    pub fn new(message_id: i64, payload: Payload) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            message_id,
            payload,
        }
    }
}

/// Messages exchanged between the host application and the companion process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "Type")]
pub enum Payload {
    /// Opening identification plus feature flags
    Handshake(HandshakeRequest),

    /// Running state, last error and optional identity info
    HandshakeResponse(HandshakeResponse),

    /// Correlated answer to a prior envelope; never auto-replied itself
    Response(ResponseResult),

    /// A serialized packet as it appeared on the game connection
    RawPacket(RawPacketMessage),

    /// A deserialized packet, carried as an opaque self-describing value
    Packet(PacketMessage),

    /// A command for the companion, opaque to the transport core
    Command(CommandMessage),

    /// Open or close the companion's console window
    Console(ConsoleMessage),

    /// Focus the given entity, unfocus if absent
    Focus(FocusMessage),

    /// Follow the given entity, unfollow if absent
    Follow(FollowMessage),

    /// Ask the companion to start its client
    RunClient(RunClientRequest),

    /// Outcome of a client start request
    RunClientResponse(RunClientResponse),
}

/// Discriminant of a [`Payload`], the key responders are registered under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadKind {
    Handshake,
    HandshakeResponse,
    Response,
    RawPacket,
    Packet,
    Command,
    Console,
    Focus,
    Follow,
    RunClient,
    RunClientResponse,
}

impl PayloadKind {
    /// The wire tag for this kind, matching the serde `Type` tag.
    pub fn tag(&self) -> &'static str {
        match self {
            PayloadKind::Handshake => "Handshake",
            PayloadKind::HandshakeResponse => "HandshakeResponse",
            PayloadKind::Response => "Response",
            PayloadKind::RawPacket => "RawPacket",
            PayloadKind::Packet => "Packet",
            PayloadKind::Command => "Command",
            PayloadKind::Console => "Console",
            PayloadKind::Focus => "Focus",
            PayloadKind::Follow => "Follow",
            PayloadKind::RunClient => "RunClient",
            PayloadKind::RunClientResponse => "RunClientResponse",
        }
    }

    /// Resolve a wire tag against the closed set of known payload types.
    pub fn from_tag(tag: &str) -> Option<PayloadKind> {
        Some(match tag {
            "Handshake" => PayloadKind::Handshake,
            "HandshakeResponse" => PayloadKind::HandshakeResponse,
            "Response" => PayloadKind::Response,
            "RawPacket" => PayloadKind::RawPacket,
            "Packet" => PayloadKind::Packet,
            "Command" => PayloadKind::Command,
            "Console" => PayloadKind::Console,
            "Focus" => PayloadKind::Focus,
            "Follow" => PayloadKind::Follow,
            "RunClient" => PayloadKind::RunClient,
            "RunClientResponse" => PayloadKind::RunClientResponse,
            _ => return None,
        })
    }
}

impl fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl Payload {
    pub fn kind(&self) -> PayloadKind {
        match self {
            Payload::Handshake(_) => PayloadKind::Handshake,
            Payload::HandshakeResponse(_) => PayloadKind::HandshakeResponse,
            Payload::Response(_) => PayloadKind::Response,
            Payload::RawPacket(_) => PayloadKind::RawPacket,
            Payload::Packet(_) => PayloadKind::Packet,
            Payload::Command(_) => PayloadKind::Command,
            Payload::Console(_) => PayloadKind::Console,
            Payload::Focus(_) => PayloadKind::Focus,
            Payload::Follow(_) => PayloadKind::Follow,
            Payload::RunClient(_) => PayloadKind::RunClient,
            Payload::RunClientResponse(_) => PayloadKind::RunClientResponse,
        }
    }
}

/// Typed extraction out of the closed payload union.
///
/// Implemented by every message type; responders and contract filters use it
/// to go from a dispatched [`Payload`] back to the concrete message without
/// runtime type inspection.
pub trait FromPayload: Send + Sync + 'static {
    /// Kind this message type is carried and dispatched under.
    const KIND: PayloadKind;

    fn from_payload(payload: &Payload) -> Option<&Self>;
}

macro_rules! payload_message {
    ($variant:ident, $message:ty) => {
        impl FromPayload for $message {
            const KIND: PayloadKind = PayloadKind::$variant;

            fn from_payload(payload: &Payload) -> Option<&Self> {
                match payload {
                    Payload::$variant(message) => Some(message),
                    _ => None,
                }
            }
        }

        impl From<$message> for Payload {
            fn from(message: $message) -> Self {
                Payload::$variant(message)
            }
        }
    };
}

payload_message!(Handshake, HandshakeRequest);
payload_message!(HandshakeResponse, HandshakeResponse);
payload_message!(Response, ResponseResult);
payload_message!(RawPacket, RawPacketMessage);
payload_message!(Packet, PacketMessage);
payload_message!(Command, CommandMessage);
payload_message!(Console, ConsoleMessage);
payload_message!(Focus, FocusMessage);
payload_message!(Follow, FollowMessage);
payload_message!(RunClient, RunClientRequest);
payload_message!(RunClientResponse, RunClientResponse);

/// Opening identification of a client plus what it wants forwarded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HandshakeRequest {
    /// Identification of the client, does not have to be unique
    pub identification: String,
    /// Whether to forward serialized packets via `RawPacket` messages
    pub send_raw_packets: bool,
    /// Whether to forward deserialized packets via `Packet` messages
    pub send_deserialized_packets: bool,
}

/// Answer to a [`HandshakeRequest`], sent under its own message id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HandshakeResponse {
    /// Whether the companion's client is running
    pub client_running: bool,
    /// Error obtained during companion initialization, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init_error: Option<WireError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub character_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub character_name: Option<String>,
}

/// A response to a received message; `message_id` echoes the id of the
/// envelope this response answers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResponseResult {
    pub message_id: i64,
    pub result: WireResult,
}

/// Which side of the game connection a packet comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PacketSource {
    Client,
    Server,
}

/// A serialized packet. May be used for sending or receiving.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RawPacketMessage {
    pub source: PacketSource,
    pub packet: String,
}

/// A deserialized packet; the schema is opaque to this layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PacketMessage {
    pub source: PacketSource,
    pub packet: serde_json::Value,
}

/// Send a command to the companion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CommandMessage {
    pub command: serde_json::Value,
}

/// Open or close the companion console.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ConsoleMessage {
    pub open: bool,
}

/// Focus the given entity, unfocus if `entity_id` is absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FocusMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<i64>,
}

/// Follow the given entity, unfollow if `entity_id` is absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FollowMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<i64>,
}

/// Ask the companion to start its client. Startup options ride through as
/// an opaque value; their schema belongs to the binding layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RunClientRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<serde_json::Value>,
}

/// Outcome of a [`RunClientRequest`]. A failed initialization result means
/// the client is not running.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RunClientResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initialization_result: Option<WireResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binding_result: Option<WireResult>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_wire_format() {
        let payload = Payload::Handshake(HandshakeRequest {
            identification: "probe".into(),
            send_raw_packets: true,
            send_deserialized_packets: false,
        });
        let json = serde_json::to_string(&payload).unwrap();
        assert!(json.contains(r#""Type":"Handshake""#));
        assert!(json.contains(r#""Identification":"probe""#));
        assert!(json.contains(r#""SendRawPackets":true"#));
    }

    #[test]
    fn response_from_exact_json() {
        // Exact JSON format expected on the wire
        let json = r#"{"Type":"Response","MessageId":42,"Result":{"Status":"Success"}}"#;
        let payload: Payload = serde_json::from_str(json).unwrap();
        match payload {
            Payload::Response(response) => {
                assert_eq!(response.message_id, 42);
                assert!(response.result.is_success());
            }
            other => panic!("wrong payload type: {other:?}"),
        }
    }

    #[test]
    fn kind_tags_are_bijective() {
        let kinds = [
            PayloadKind::Handshake,
            PayloadKind::HandshakeResponse,
            PayloadKind::Response,
            PayloadKind::RawPacket,
            PayloadKind::Packet,
            PayloadKind::Command,
            PayloadKind::Console,
            PayloadKind::Focus,
            PayloadKind::Follow,
            PayloadKind::RunClient,
            PayloadKind::RunClientResponse,
        ];
        for kind in kinds {
            assert_eq!(PayloadKind::from_tag(kind.tag()), Some(kind));
        }
        assert_eq!(PayloadKind::from_tag("Bogus"), None);
    }

    #[test]
    fn from_payload_extracts_matching_type_only() {
        let payload = Payload::Console(ConsoleMessage { open: true });
        assert!(ConsoleMessage::from_payload(&payload).is_some());
        assert!(FocusMessage::from_payload(&payload).is_none());
        assert_eq!(payload.kind(), PayloadKind::Console);
    }

    #[test]
    fn handshake_response_omits_absent_fields() {
        let response = HandshakeResponse {
            client_running: false,
            init_error: None,
            character_id: None,
            character_name: None,
        };
        let json = serde_json::to_string(&Payload::HandshakeResponse(response)).unwrap();
        assert_eq!(json, r#"{"Type":"HandshakeResponse","ClientRunning":false}"#);
    }
}
