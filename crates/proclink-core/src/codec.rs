//! Envelope encoding and decoding.
//!
//! Decoding runs in two stages so that a payload with an unknown type tag
//! surfaces as a distinct, recoverable error instead of a generic parse
//! failure: first the outer envelope with the payload left opaque, then the
//! tag lookup against the closed payload set, then the typed payload.

use crate::error::{LinkError, Result};
use crate::messages::{PROTOCOL_VERSION, Payload, PayloadKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A decoded envelope plus the resolved payload kind.
#[derive(Debug, Clone)]
pub struct Decoded {
    pub kind: PayloadKind,
    pub message_id: i64,
    pub payload: Payload,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct EnvelopeRef<'a> {
    protocol_version: i64,
    message_id: i64,
    payload: &'a Payload,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawEnvelope {
    protocol_version: i64,
    message_id: i64,
    payload: Value,
}

/// Serialize an envelope around `payload` to JSON bytes.
pub fn encode(payload: &Payload, message_id: i64) -> Result<Vec<u8>> {
    serde_json::to_vec(&EnvelopeRef {
        protocol_version: PROTOCOL_VERSION,
        message_id,
        payload,
    })
    .map_err(|e| LinkError::Codec(format!("failed to encode envelope: {e}")))
}

/// Deserialize an envelope from JSON bytes.
pub fn decode(bytes: &[u8]) -> Result<Decoded> {
    let raw: RawEnvelope = serde_json::from_slice(bytes)
        .map_err(|e| LinkError::Codec(format!("malformed envelope: {e}")))?;

    if raw.protocol_version != PROTOCOL_VERSION {
        return Err(LinkError::UnsupportedVersion(raw.protocol_version));
    }

    let tag = raw
        .payload
        .get("Type")
        .and_then(Value::as_str)
        .ok_or_else(|| LinkError::Codec("payload carries no type tag".into()))?;

    let kind = PayloadKind::from_tag(tag)
        .ok_or_else(|| LinkError::UnknownPayload(tag.to_string()))?;

    let payload: Payload = serde_json::from_value(raw.payload.clone())
        .map_err(|e| LinkError::Codec(format!("malformed {tag} payload: {e}")))?;

    Ok(Decoded {
        kind,
        message_id: raw.message_id,
        payload,
    })
}
