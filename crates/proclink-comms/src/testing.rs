//! In-memory transports and helpers shared by this crate's tests.

use async_trait::async_trait;
use proclink_core::{Decoded, LinkError, Payload, Result, codec};
use proclink_transport::{
    ClientTransport, Connection, FrameReader, FrameWriter, MessageReader, MessageWriter,
    ServerTransport,
};
use tokio::sync::mpsc;

/// The far end of an in-memory connection: raw framed access so a test can
/// play the peer without going through a handler.
pub(crate) struct RemoteEnd {
    pub reader: Box<dyn MessageReader>,
    pub writer: Box<dyn MessageWriter>,
}

impl RemoteEnd {
    /// Encode and write one envelope as the peer.
    pub async fn send(&mut self, payload: Payload, message_id: i64) {
        let bytes = codec::encode(&payload, message_id).unwrap();
        self.writer.write_frame(&bytes).await.unwrap();
    }
}

/// A connected `(Connection, RemoteEnd)` pair over an in-memory duplex
/// pipe. Dropping the remote end gives the connection EOF.
pub(crate) fn connected_pair() -> (Connection, RemoteEnd) {
    let (local, remote) = tokio::io::duplex(64 * 1024);
    let (local_read, local_write) = tokio::io::split(local);
    let (remote_read, remote_write) = tokio::io::split(remote);
    let connection = Connection::from_stream(local_read, local_write);
    let remote = RemoteEnd {
        reader: Box::new(FrameReader::new(remote_read)),
        writer: Box::new(FrameWriter::new(remote_write)),
    };
    (connection, remote)
}

/// Read and decode the next envelope the handler under test wrote.
pub(crate) async fn read_envelope(remote: &mut RemoteEnd) -> Decoded {
    let bytes = remote.reader.read_frame().await.unwrap();
    codec::decode(&bytes).unwrap()
}

/// Server transport fed from a channel of pre-built connections.
pub(crate) struct ChannelServerTransport {
    rx: mpsc::Receiver<Connection>,
}

pub(crate) fn channel_server(capacity: usize) -> (mpsc::Sender<Connection>, ChannelServerTransport) {
    let (tx, rx) = mpsc::channel(capacity);
    (tx, ChannelServerTransport { rx })
}

#[async_trait]
impl ServerTransport for ChannelServerTransport {
    async fn listen(&mut self) -> Result<()> {
        Ok(())
    }

    async fn accept(&mut self) -> Result<Connection> {
        self.rx.recv().await.ok_or(LinkError::ConnectionClosed)
    }

    fn close(&mut self) {
        self.rx.close();
    }
}

/// Client transport handing out one pre-built connection.
pub(crate) struct OneShotClientTransport {
    connection: Option<Connection>,
}

impl OneShotClientTransport {
    pub fn new(connection: Connection) -> Self {
        Self {
            connection: Some(connection),
        }
    }
}

#[async_trait]
impl ClientTransport for OneShotClientTransport {
    async fn connect(&mut self) -> Result<Connection> {
        self.connection.take().ok_or(LinkError::ConnectionClosed)
    }
}
