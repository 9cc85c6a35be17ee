//! # proclink-core
//!
//! Envelope protocol and shared types for the proclink communications layer.
//!
//! This crate provides the foundation used by the transport and comms crates:
//! - The versioned envelope and the closed payload union
//! - Handshake, response and packet message types
//! - The serializable wire result carried in responses
//! - The error taxonomy
//! - The envelope codec

pub mod codec;
pub mod error;
pub mod messages;
pub mod result;

pub use codec::{Decoded, decode, encode};
pub use error::{LinkError, Result};
pub use messages::{
    CommandMessage, ConsoleMessage, Envelope, FocusMessage, FollowMessage, FromPayload,
    HandshakeRequest, HandshakeResponse, PROTOCOL_VERSION, PacketMessage, PacketSource, Payload,
    PayloadKind, RawPacketMessage, ResponseResult, RunClientRequest, RunClientResponse,
};
pub use result::{WireError, WireResult};
