//! # proclink-transport
//!
//! Transports for the proclink communications layer:
//! - Length-prefixed message framing over any byte stream
//! - The connection abstraction (id, state, framed reader/writer)
//! - TCP client and server bindings
//! - Named-pipe (local socket) client and server bindings

pub mod connection;
pub mod frame;
pub mod pipe;
pub mod tcp;

pub use connection::{
    ClientTransport, Connection, ConnectionState, MessageReader, MessageWriter, ServerTransport,
    StateHandle,
};
pub use frame::{FrameReader, FrameWriter, MAX_FRAME_LEN};
pub use pipe::{PipeClientTransport, PipeServerTransport};
pub use tcp::{TcpClientTransport, TcpConfig, TcpServerTransport};
