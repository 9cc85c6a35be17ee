//! Named-pipe transport bindings over local sockets.
//!
//! Uses `interprocess` namespaced local sockets: named pipes on Windows,
//! abstract-namespace or filesystem sockets elsewhere. Both ends address
//! the link by one pipe name.

use crate::connection::{ClientTransport, Connection, ServerTransport};
use async_trait::async_trait;
use interprocess::local_socket::{
    GenericNamespaced, ListenerOptions, ToNsName,
    tokio::{Listener, Stream, prelude::*},
};
use proclink_core::{LinkError, Result};
use tracing::info;

/// Client transport dialing a named pipe.
pub struct PipeClientTransport {
    name: String,
}

impl PipeClientTransport {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl ClientTransport for PipeClientTransport {
    async fn connect(&mut self) -> Result<Connection> {
        let name = self
            .name
            .clone()
            .to_ns_name::<GenericNamespaced>()
            .map_err(|e| LinkError::Transport(format!("invalid pipe name {}: {e}", self.name)))?;
        info!("connecting to pipe {}", self.name);
        let stream = Stream::connect(name).await.map_err(|e| {
            LinkError::Transport(format!("failed to connect to pipe {}: {e}", self.name))
        })?;
        let (read, write) = stream.split();
        Ok(Connection::from_stream(read, write))
    }
}

/// Server transport accepting connections on a named pipe.
pub struct PipeServerTransport {
    name: String,
    listener: Option<Listener>,
}

impl PipeServerTransport {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            listener: None,
        }
    }
}

#[async_trait]
impl ServerTransport for PipeServerTransport {
    async fn listen(&mut self) -> Result<()> {
        let name = self
            .name
            .clone()
            .to_ns_name::<GenericNamespaced>()
            .map_err(|e| LinkError::Transport(format!("invalid pipe name {}: {e}", self.name)))?;
        let listener = ListenerOptions::new().name(name).create_tokio().map_err(|e| {
            LinkError::Transport(format!("failed to create pipe listener {}: {e}", self.name))
        })?;
        info!("listening on pipe {}", self.name);
        self.listener = Some(listener);
        Ok(())
    }

    async fn accept(&mut self) -> Result<Connection> {
        let listener = self
            .listener
            .as_ref()
            .ok_or_else(|| LinkError::Usage("accept called before listen".into()))?;
        let stream = listener
            .accept()
            .await
            .map_err(|e| LinkError::Transport(format!("pipe accept failed: {e}")))?;
        let (read, write) = stream.split();
        Ok(Connection::from_stream(read, write))
    }

    fn close(&mut self) {
        self.listener = None;
    }
}
