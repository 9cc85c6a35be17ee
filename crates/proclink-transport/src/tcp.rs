//! TCP transport bindings.

use crate::connection::{ClientTransport, Connection, ServerTransport};
use async_trait::async_trait;
use proclink_core::{LinkError, Result};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tracing::info;

/// Configuration for a TCP client connection.
#[derive(Debug, Clone)]
pub struct TcpConfig {
    /// Host to connect to (default: 127.0.0.1)
    pub host: String,
    /// Port to connect to (default: 19733)
    pub port: u16,
    /// Connection timeout
    pub connect_timeout: Duration,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 19733,
            connect_timeout: Duration::from_secs(30),
        }
    }
}

/// Client transport dialing a TCP peer.
pub struct TcpClientTransport {
    config: TcpConfig,
}

impl TcpClientTransport {
    pub fn new(config: TcpConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ClientTransport for TcpClientTransport {
    async fn connect(&mut self) -> Result<Connection> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        info!("connecting to {addr}");

        let stream = tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| LinkError::Transport(format!("connection timeout to {addr}")))?
            .map_err(|e| LinkError::Transport(format!("failed to connect to {addr}: {e}")))?;

        // Disable Nagle's algorithm for low latency
        stream
            .set_nodelay(true)
            .map_err(|e| LinkError::Transport(format!("failed to set TCP_NODELAY: {e}")))?;

        let (read, write) = stream.into_split();
        Ok(Connection::from_stream(read, write))
    }
}

/// Server transport accepting TCP peers.
pub struct TcpServerTransport {
    bind_addr: String,
    listener: Option<TcpListener>,
}

impl TcpServerTransport {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            bind_addr: format!("{host}:{port}"),
            listener: None,
        }
    }

    /// The bound address; useful when listening on port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }
}

#[async_trait]
impl ServerTransport for TcpServerTransport {
    async fn listen(&mut self) -> Result<()> {
        let listener = TcpListener::bind(&self.bind_addr)
            .await
            .map_err(|e| LinkError::Transport(format!("failed to bind {}: {e}", self.bind_addr)))?;
        info!("listening on {}", self.bind_addr);
        self.listener = Some(listener);
        Ok(())
    }

    async fn accept(&mut self) -> Result<Connection> {
        let listener = self
            .listener
            .as_ref()
            .ok_or_else(|| LinkError::Usage("accept called before listen".into()))?;
        let (stream, _peer) = listener
            .accept()
            .await
            .map_err(|e| LinkError::Transport(format!("accept failed: {e}")))?;
        stream
            .set_nodelay(true)
            .map_err(|e| LinkError::Transport(format!("failed to set TCP_NODELAY: {e}")))?;
        let (read, write) = stream.into_split();
        Ok(Connection::from_stream(read, write))
    }

    fn close(&mut self) {
        self.listener = None;
    }
}
