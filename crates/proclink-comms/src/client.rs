//! Client-side connection establishment.
//!
//! Wraps a dialing transport into a running [`ConnectionHandler`] wired
//! for contracting, and offers the opening exchanges as one-call
//! conveniences.

use crate::contract::{Contractor, DefaultStates};
use crate::dispatch::{MessageDispatcher, Role};
use crate::handler::ConnectionHandler;
use crate::responder::ResponderRegistry;
use proclink_core::{HandshakeRequest, HandshakeResponse, Payload, Result, WireResult};
use proclink_transport::{
    ClientTransport, PipeClientTransport, TcpClientTransport, TcpConfig,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// A live client connection to a companion process.
pub struct Comms {
    pub handler: Arc<ConnectionHandler>,
}

impl Comms {
    /// Perform the opening handshake and await the typed reply.
    pub async fn handshake(
        &self,
        request: HandshakeRequest,
        ct: CancellationToken,
    ) -> Result<HandshakeResponse> {
        self.handler
            .contract_handshake(request)?
            .wait_for(DefaultStates::ResponseObtained, ct)
            .await
    }

    /// Send a payload and await its correlated response result.
    pub async fn request(
        &self,
        payload: impl Into<Payload>,
        ct: CancellationToken,
    ) -> Result<WireResult> {
        self.handler
            .contract_send_message(payload)?
            .wait_for(DefaultStates::ResponseObtained, ct)
            .await
    }

    /// Send a payload without awaiting any reply.
    pub async fn send(&self, payload: impl Into<Payload>, ct: CancellationToken) -> Result<i64> {
        self.handler.send_message(payload, ct).await
    }
}

/// Establish a client connection over `transport`: connect, wrap the
/// connection in a handler with a contractor (client role) and start its
/// read loop under `ct`.
pub async fn connect(
    mut transport: Box<dyn ClientTransport>,
    registry: ResponderRegistry,
    ct: CancellationToken,
) -> Result<Comms> {
    let connection = transport.connect().await?;
    let contractor = Arc::new(Contractor::new());
    let dispatcher = Arc::new(MessageDispatcher::new(
        registry,
        Role::Client,
        Some(contractor),
    ));
    let handler = ConnectionHandler::new(connection, dispatcher);
    handler.start_handler(ct);
    info!(connection = %handler.id(), "client connection established");
    Ok(Comms { handler })
}

/// Connect over TCP.
pub async fn connect_tcp(
    config: TcpConfig,
    registry: ResponderRegistry,
    ct: CancellationToken,
) -> Result<Comms> {
    connect(Box::new(TcpClientTransport::new(config)), registry, ct).await
}

/// Connect over a named pipe.
pub async fn connect_pipe(
    name: impl Into<String>,
    registry: ResponderRegistry,
    ct: CancellationToken,
) -> Result<Comms> {
    connect(Box::new(PipeClientTransport::new(name)), registry, ct).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::ServerManager;
    use crate::responder::Responder;
    use crate::testing::{OneShotClientTransport, channel_server, connected_pair};
    use async_trait::async_trait;
    use std::time::Duration;

    /// Answers a handshake the way the companion side does: a typed
    /// response under its own message id, reporting the running state.
    struct HandshakeResponder;

    #[async_trait]
    impl Responder<HandshakeRequest> for HandshakeResponder {
        async fn respond(
            &self,
            message: &HandshakeRequest,
            connection: &ConnectionHandler,
            ct: CancellationToken,
        ) -> Result<()> {
            tracing::info!(identification = %message.identification, "handshaked");
            connection
                .send_message(
                    HandshakeResponse {
                        client_running: false,
                        init_error: None,
                        character_id: None,
                        character_name: None,
                    },
                    ct,
                )
                .await
                .map(|_| ())
        }
    }

    #[tokio::test]
    async fn handshake_resolves_with_the_servers_exact_response() {
        // responding side
        let (tx, transport) = channel_server(1);
        let mut registry = ResponderRegistry::new();
        registry.register(HandshakeResponder);
        let dispatcher = Arc::new(MessageDispatcher::new(registry, Role::Server, None));
        let manager = ServerManager::new(Box::new(transport), dispatcher);
        manager.start_manager(CancellationToken::new());

        // requesting side over an in-memory pair
        let (client_conn, server_side) = connected_pair();
        let server_conn = {
            let (local, remote) = (server_side.reader, server_side.writer);
            proclink_transport::Connection::new(local, remote)
        };
        tx.send(server_conn).await.unwrap();

        let comms = connect(
            Box::new(OneShotClientTransport::new(client_conn)),
            ResponderRegistry::new(),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        let response = tokio::time::timeout(
            Duration::from_secs(2),
            comms.handshake(
                HandshakeRequest {
                    identification: "probe".into(),
                    send_raw_packets: true,
                    send_deserialized_packets: false,
                },
                CancellationToken::new(),
            ),
        )
        .await
        .expect("handshake must resolve")
        .unwrap();

        assert_eq!(
            response,
            HandshakeResponse {
                client_running: false,
                init_error: None,
                character_id: None,
                character_name: None,
            }
        );
        manager.request_stop();
    }

    #[tokio::test]
    async fn request_resolves_with_the_correlated_result() {
        // server with no responders answers every request with NoResponder
        let (tx, transport) = channel_server(1);
        let dispatcher = Arc::new(MessageDispatcher::new(
            ResponderRegistry::new(),
            Role::Server,
            None,
        ));
        let manager = ServerManager::new(Box::new(transport), dispatcher);
        manager.start_manager(CancellationToken::new());

        let (client_conn, server_side) = connected_pair();
        tx.send(proclink_transport::Connection::new(
            server_side.reader,
            server_side.writer,
        ))
        .await
        .unwrap();

        let comms = connect(
            Box::new(OneShotClientTransport::new(client_conn)),
            ResponderRegistry::new(),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        let result = tokio::time::timeout(
            Duration::from_secs(2),
            comms.request(
                proclink_core::ConsoleMessage { open: true },
                CancellationToken::new(),
            ),
        )
        .await
        .expect("request must resolve")
        .unwrap();

        match result {
            WireResult::Failure { error } => assert_eq!(error.kind, "NoResponder"),
            other => panic!("expected NoResponder failure, got {other:?}"),
        }
        manager.request_stop();
    }

    #[tokio::test]
    async fn request_with_no_reply_cancels_at_the_deadline() {
        // peer never answers: raw remote end, no server at all
        let (client_conn, _remote) = connected_pair();
        let comms = connect(
            Box::new(OneShotClientTransport::new(client_conn)),
            ResponderRegistry::new(),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        let deadline = CancellationToken::new();
        let canceller = deadline.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        });

        let result = tokio::time::timeout(
            Duration::from_secs(2),
            comms.request(proclink_core::ConsoleMessage { open: true }, deadline),
        )
        .await
        .expect("wait must end at the deadline, not hang");
        assert!(matches!(result, Err(proclink_core::LinkError::Cancelled)));
    }
}
