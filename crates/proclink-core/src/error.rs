//! Error types for proclink

use crate::result::WireError;
use thiserror::Error;

/// Result type for proclink operations
pub type Result<T> = std::result::Result<T, LinkError>;

/// proclink error types
#[derive(Debug, Error)]
pub enum LinkError {
    /// Transport-level failure: connect, accept, read or write
    #[error("transport error: {0}")]
    Transport(String),

    /// Malformed frame or payload
    #[error("codec error: {0}")]
    Codec(String),

    /// Envelope carries a protocol version this node does not speak
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(i64),

    /// Frame decoded fine but its payload type tag is not registered
    #[error("unknown payload type: {0}")]
    UnknownPayload(String),

    /// A request-type message matched zero registered responders
    #[error("no responder registered for {0}")]
    NoResponder(String),

    /// An individual responder raised an unexpected fault
    #[error("responder fault: {0}")]
    ResponderFault(String),

    /// More than one concurrent failure
    #[error("aggregate of {} errors", .0.len())]
    Aggregate(Vec<LinkError>),

    /// Programmer misuse, reported before any I/O
    #[error("usage error: {0}")]
    Usage(String),

    /// The operation's cancellation signal fired
    #[error("operation cancelled")]
    Cancelled,

    /// A failure reported by the peer inside a response
    #[error("remote error: {0}")]
    Remote(WireError),

    /// The connection is closed
    #[error("connection closed")]
    ConnectionClosed,
}

impl From<serde_json::Error> for LinkError {
    fn from(err: serde_json::Error) -> Self {
        LinkError::Codec(err.to_string())
    }
}

impl LinkError {
    /// Fold concurrent failures: zero is success, one is that failure,
    /// more become an aggregate carrying all of them in order.
    pub fn aggregate(mut errors: Vec<LinkError>) -> Result<()> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(LinkError::Aggregate(errors)),
        }
    }

    /// Whether this failure is a cancellation rather than an application error.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, LinkError::Cancelled)
    }
}
