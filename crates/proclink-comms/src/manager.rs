//! Server connection manager: accepts connections, tracks live handlers,
//! broadcasts to all of them.

use crate::dispatch::MessageDispatcher;
use crate::handler::ConnectionHandler;
use futures::future::join_all;
use proclink_core::{LinkError, Payload, Result};
use proclink_transport::ServerTransport;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::{Mutex as AsyncMutex, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Manages a server: awaits connections, wraps each in a handler and
/// removes it again when its read loop exits.
pub struct ServerManager {
    server: AsyncMutex<Box<dyn ServerTransport>>,
    dispatcher: Arc<MessageDispatcher>,
    handlers: RwLock<Vec<Arc<ConnectionHandler>>>,
    started: AtomicBool,
    stop: CancellationToken,
    result_tx: Mutex<Option<oneshot::Sender<Result<()>>>>,
    result_rx: Mutex<Option<oneshot::Receiver<Result<()>>>>,
}

impl ServerManager {
    pub fn new(server: Box<dyn ServerTransport>, dispatcher: Arc<MessageDispatcher>) -> Arc<Self> {
        let (result_tx, result_rx) = oneshot::channel();
        Arc::new(Self {
            server: AsyncMutex::new(server),
            dispatcher,
            handlers: RwLock::new(Vec::new()),
            started: AtomicBool::new(false),
            stop: CancellationToken::new(),
            result_tx: Mutex::new(Some(result_tx)),
            result_rx: Mutex::new(Some(result_rx)),
        })
    }

    /// Snapshot of the currently registered handlers.
    pub fn handlers(&self) -> Vec<Arc<ConnectionHandler>> {
        self.handlers.read().unwrap().clone()
    }

    /// Launch the accept loop; subsequent calls are no-ops.
    pub fn start_manager(self: &Arc<Self>, ct: CancellationToken) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let result_tx = self.result_tx.lock().unwrap().take();
        let manager = self.clone();
        tokio::spawn(async move {
            let result = manager.manager_task(ct).await;
            if let Some(tx) = result_tx {
                let _ = tx.send(result);
            }
        });
    }

    /// Start the manager if needed and await its completion.
    pub async fn run_manager(self: &Arc<Self>, ct: CancellationToken) -> Result<()> {
        self.start_manager(ct);
        let result_rx = self.result_rx.lock().unwrap().take();
        match result_rx {
            Some(rx) => rx.await.unwrap_or(Err(LinkError::ConnectionClosed)),
            None => Err(LinkError::Usage("manager result already consumed".into())),
        }
    }

    /// Signal the accept loop and every handler to cease.
    pub fn request_stop(&self) {
        self.stop.cancel();
    }

    /// Send to every currently registered handler concurrently; partial
    /// failures are aggregated.
    pub async fn broadcast(
        &self,
        payload: impl Into<Payload>,
        ct: CancellationToken,
    ) -> Result<()> {
        let payload = payload.into();
        let handlers = self.handlers();
        let sends = handlers
            .iter()
            .map(|handler| handler.send_message(payload.clone(), ct.clone()));
        let errors: Vec<_> = join_all(sends)
            .await
            .into_iter()
            .filter_map(|result| result.err())
            .collect();
        LinkError::aggregate(errors)
    }

    async fn manager_task(self: &Arc<Self>, ct: CancellationToken) -> Result<()> {
        self.server.lock().await.listen().await?;

        loop {
            let accepted = tokio::select! {
                _ = ct.cancelled() => break,
                _ = self.stop.cancelled() => break,
                accepted = async { self.server.lock().await.accept().await } => accepted,
            };
            let connection = match accepted {
                Ok(connection) => connection,
                Err(e) => {
                    error!("failed to accept connection: {e}");
                    continue;
                }
            };

            let handler = ConnectionHandler::new(connection, self.dispatcher.clone());
            // subscribe before the read loop starts, so closure can never
            // slip between registration and watching
            let mut closed = handler.closed_signal();
            self.handlers.write().unwrap().push(handler.clone());
            info!(connection = %handler.id(), "connection established");

            let manager = self.clone();
            let closing = handler.clone();
            tokio::spawn(async move {
                while !*closed.borrow_and_update() {
                    if closed.changed().await.is_err() {
                        break;
                    }
                }
                info!(connection = %closing.id(), "connection closed");
                manager
                    .handlers
                    .write()
                    .unwrap()
                    .retain(|h| h.id() != closing.id());
            });

            handler.start_handler(self.stop.child_token());
        }

        // drain in-flight handler loops before returning
        self.stop.cancel();
        let handlers = self.handlers();
        let mut errors = Vec::new();
        for handler in handlers {
            if let Err(e) = handler.run_handler(self.stop.child_token()).await {
                if !matches!(e, LinkError::ConnectionClosed) {
                    errors.push(e);
                }
            }
        }
        self.handlers.write().unwrap().clear();
        self.server.lock().await.close();
        LinkError::aggregate(errors)
    }
}
