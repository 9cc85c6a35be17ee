//! Connection abstraction shared by all transports.
//!
//! A [`Connection`] is one duplex link: an opaque id stable for its
//! lifetime, an `Open -> Closed` state that never reverses, and a framed
//! reader/writer pair. Client and server transports only differ in how
//! they produce connections.

use crate::frame::{FrameReader, FrameWriter};
use async_trait::async_trait;
use proclink_core::Result;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncRead, AsyncWrite};
use uuid::Uuid;

/// State of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    Closed,
}

/// Shared view of a connection's state; transitions Open -> Closed once.
#[derive(Debug, Clone)]
pub struct StateHandle {
    open: Arc<AtomicBool>,
}

impl StateHandle {
    pub fn new() -> Self {
        Self {
            open: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn get(&self) -> ConnectionState {
        if self.open.load(Ordering::SeqCst) {
            ConnectionState::Open
        } else {
            ConnectionState::Closed
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    pub fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

impl Default for StateHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Object-safe framed reading off a transport.
#[async_trait]
pub trait MessageReader: Send {
    /// Read a complete frame from the transport.
    async fn read_frame(&mut self) -> Result<Vec<u8>>;
}

/// Object-safe framed writing onto a transport.
#[async_trait]
pub trait MessageWriter: Send {
    /// Write a complete frame to the transport.
    async fn write_frame(&mut self, data: &[u8]) -> Result<()>;

    /// Shut the write side down.
    async fn shutdown(&mut self) -> Result<()>;
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> MessageReader for FrameReader<R> {
    async fn read_frame(&mut self) -> Result<Vec<u8>> {
        FrameReader::read_frame(self).await
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> MessageWriter for FrameWriter<W> {
    async fn write_frame(&mut self, data: &[u8]) -> Result<()> {
        FrameWriter::write_frame(self, data).await
    }

    async fn shutdown(&mut self) -> Result<()> {
        FrameWriter::shutdown(self).await
    }
}

/// One duplex link between two processes.
pub struct Connection {
    id: Uuid,
    state: StateHandle,
    reader: Box<dyn MessageReader>,
    writer: Box<dyn MessageWriter>,
}

impl Connection {
    pub fn new(reader: Box<dyn MessageReader>, writer: Box<dyn MessageWriter>) -> Self {
        Self {
            id: Uuid::new_v4(),
            state: StateHandle::new(),
            reader,
            writer,
        }
    }

    /// Wrap split read/write halves of any byte stream.
    pub fn from_stream<R, W>(read: R, write: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Self::new(
            Box::new(FrameReader::new(read)),
            Box::new(FrameWriter::new(write)),
        )
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    /// Decompose into the pieces a connection handler owns separately.
    pub fn into_parts(
        self,
    ) -> (
        Uuid,
        StateHandle,
        Box<dyn MessageReader>,
        Box<dyn MessageWriter>,
    ) {
        (self.id, self.state, self.reader, self.writer)
    }
}

/// A transport that dials out and yields one connection.
#[async_trait]
pub trait ClientTransport: Send {
    /// Connect to the peer.
    async fn connect(&mut self) -> Result<Connection>;
}

/// A transport that listens and yields a new connection per accept.
#[async_trait]
pub trait ServerTransport: Send {
    /// Start the server.
    async fn listen(&mut self) -> Result<()>;

    /// Block until the next client connects.
    async fn accept(&mut self) -> Result<Connection>;

    /// Stop listening.
    fn close(&mut self);
}
