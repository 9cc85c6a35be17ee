//! proclink packet logger
//!
//! Client mode connects to a companion process, handshakes and logs every
//! packet it forwards. Serve mode runs the responding side for manual
//! testing: it answers handshakes and acknowledges console messages.
//!
//! Usage:
//!   proclink client tcp [HOST:PORT]
//!   proclink client pipe [NAME]
//!   proclink serve tcp [HOST:PORT]
//!   proclink serve pipe [NAME]

use anyhow::{Result, bail};
use async_trait::async_trait;
use proclink_comms::{
    Comms, ConnectionHandler, MessageDispatcher, Responder, ResponderRegistry, Role,
    ServerManager, connect_pipe, connect_tcp,
};
use proclink_core::{
    ConsoleMessage, HandshakeRequest, HandshakeResponse, PacketMessage, RawPacketMessage,
};
use proclink_transport::{PipeServerTransport, TcpConfig, TcpServerTransport};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

const DEFAULT_ADDR: &str = "127.0.0.1:19733";
const DEFAULT_PIPE: &str = "proclink.sock";

/// Logs every serialized packet the companion forwards.
struct RawPacketLogger;

#[async_trait]
impl Responder<RawPacketMessage> for RawPacketLogger {
    async fn respond(
        &self,
        message: &RawPacketMessage,
        _connection: &ConnectionHandler,
        _ct: CancellationToken,
    ) -> proclink_core::Result<()> {
        info!("[{:?}] {}", message.source, message.packet);
        Ok(())
    }
}

/// Logs every deserialized packet the companion forwards.
struct PacketLogger;

#[async_trait]
impl Responder<PacketMessage> for PacketLogger {
    async fn respond(
        &self,
        message: &PacketMessage,
        _connection: &ConnectionHandler,
        _ct: CancellationToken,
    ) -> proclink_core::Result<()> {
        info!("[{:?}] {}", message.source, message.packet);
        Ok(())
    }
}

/// Serve mode's handshake answer: a typed response under its own id.
struct HandshakeResponder;

#[async_trait]
impl Responder<HandshakeRequest> for HandshakeResponder {
    async fn respond(
        &self,
        message: &HandshakeRequest,
        connection: &ConnectionHandler,
        ct: CancellationToken,
    ) -> proclink_core::Result<()> {
        info!(
            identification = %message.identification,
            raw = message.send_raw_packets,
            deserialized = message.send_deserialized_packets,
            "handshaked"
        );
        connection
            .send_message(
                HandshakeResponse {
                    client_running: true,
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

/// Serve mode: log console open/close requests.
struct ConsoleResponder;

#[async_trait]
impl Responder<ConsoleMessage> for ConsoleResponder {
    async fn respond(
        &self,
        message: &ConsoleMessage,
        _connection: &ConnectionHandler,
        _ct: CancellationToken,
    ) -> proclink_core::Result<()> {
        info!(open = message.open, "console request");
        Ok(())
    }
}

fn tcp_config(addr: &str) -> Result<TcpConfig> {
    let Some((host, port)) = addr.rsplit_once(':') else {
        bail!("expected HOST:PORT, got {addr}");
    };
    Ok(TcpConfig {
        host: host.into(),
        port: port.parse()?,
        connect_timeout: Duration::from_secs(30),
    })
}

async fn run_client(transport: &str, target: Option<String>) -> Result<()> {
    let ct = CancellationToken::new();
    let mut registry = ResponderRegistry::new();
    registry.register(RawPacketLogger);
    registry.register(PacketLogger);

    let comms: Comms = match transport {
        "tcp" => {
            let addr = target.unwrap_or_else(|| DEFAULT_ADDR.into());
            connect_tcp(tcp_config(&addr)?, registry, ct.clone()).await?
        }
        "pipe" => {
            let name = target.unwrap_or_else(|| DEFAULT_PIPE.into());
            connect_pipe(name, registry, ct.clone()).await?
        }
        other => bail!("unknown transport {other}, expected tcp or pipe"),
    };

    let response = comms
        .handshake(
            HandshakeRequest {
                identification: "proclink packet logger".into(),
                send_raw_packets: true,
                send_deserialized_packets: false,
            },
            ct.clone(),
        )
        .await?;
    info!(
        running = response.client_running,
        character = response.character_name.as_deref().unwrap_or("-"),
        "connected"
    );
    if let Some(error) = &response.init_error {
        tracing::error!("companion failed to initialize: {error}");
    }

    // log packets until the companion hangs up or ctrl-c
    let handler = comms.handler.clone();
    tokio::select! {
        result = handler.run_handler(ct.clone()) => result?,
        _ = tokio::signal::ctrl_c() => ct.cancel(),
    }
    Ok(())
}

async fn run_server(transport: &str, target: Option<String>) -> Result<()> {
    let mut registry = ResponderRegistry::new();
    registry.register(HandshakeResponder);
    registry.register(ConsoleResponder);
    let dispatcher = std::sync::Arc::new(MessageDispatcher::new(registry, Role::Server, None));

    let manager = match transport {
        "tcp" => {
            let addr = target.unwrap_or_else(|| DEFAULT_ADDR.into());
            let Some((host, port)) = addr.rsplit_once(':') else {
                bail!("expected HOST:PORT, got {addr}");
            };
            ServerManager::new(
                Box::new(TcpServerTransport::new(host, port.parse()?)),
                dispatcher,
            )
        }
        "pipe" => {
            let name = target.unwrap_or_else(|| DEFAULT_PIPE.into());
            ServerManager::new(Box::new(PipeServerTransport::new(name)), dispatcher)
        }
        other => bail!("unknown transport {other}, expected tcp or pipe"),
    };

    let ct = CancellationToken::new();
    let run = {
        let manager = manager.clone();
        let ct = ct.clone();
        tokio::spawn(async move { manager.run_manager(ct).await })
    };

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    manager.request_stop();
    run.await??;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::DEBUG)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut args = std::env::args().skip(1);
    let mode = args.next().unwrap_or_default();
    let transport = args.next().unwrap_or_else(|| "tcp".into());
    let target = args.next();

    match mode.as_str() {
        "client" => run_client(&transport, target).await,
        "serve" => run_server(&transport, target).await,
        _ => bail!("usage: proclink <client|serve> <tcp|pipe> [HOST:PORT|NAME]"),
    }
}
