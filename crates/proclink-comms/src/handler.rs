//! Connection handler: owns one connection, runs its read loop and sends
//! enveloped messages.
//!
//! The send counter and the framed writer sit behind one lock, so id
//! assignment plus the write appear atomic to concurrent senders and
//! frames never interleave. Reads are strictly sequential in the single
//! background read task.

use crate::contract::{Contract, ContractBuilder, Contractor, DefaultStates};
use crate::dispatch::MessageDispatcher;
use proclink_core::{
    HandshakeRequest, HandshakeResponse, LinkError, Payload, Result, ResponseResult, WireResult,
    codec,
};
use proclink_transport::{Connection, ConnectionState, MessageReader, MessageWriter, StateHandle};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};
use uuid::Uuid;

struct Writer {
    writer: Box<dyn MessageWriter>,
    next_id: i64,
}

/// Manages one connection: decodes and dispatches what the peer sends,
/// wraps and writes what this side sends.
pub struct ConnectionHandler {
    id: Uuid,
    state: StateHandle,
    writer: AsyncMutex<Writer>,
    reader: Mutex<Option<Box<dyn MessageReader>>>,
    dispatcher: Arc<MessageDispatcher>,
    started: AtomicBool,
    closed_tx: watch::Sender<bool>,
    result_tx: Mutex<Option<oneshot::Sender<Result<()>>>>,
    result_rx: Mutex<Option<oneshot::Receiver<Result<()>>>>,
}

impl ConnectionHandler {
    pub fn new(connection: Connection, dispatcher: Arc<MessageDispatcher>) -> Arc<Self> {
        let (id, state, reader, writer) = connection.into_parts();
        let (closed_tx, _) = watch::channel(false);
        let (result_tx, result_rx) = oneshot::channel();
        Arc::new(Self {
            id,
            state,
            writer: AsyncMutex::new(Writer { writer, next_id: 1 }),
            reader: Mutex::new(Some(reader)),
            dispatcher,
            started: AtomicBool::new(false),
            closed_tx,
            result_tx: Mutex::new(Some(result_tx)),
            result_rx: Mutex::new(Some(result_rx)),
        })
    }

    /// Id of the connection, stable for its lifetime.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    pub fn contractor(&self) -> Option<&Arc<Contractor>> {
        self.dispatcher.contractor()
    }

    /// Flips to `true` when the read loop has exited and the transport is
    /// disconnected. Subscribe before starting the handler to observe the
    /// transition without racing it.
    pub fn closed_signal(&self) -> watch::Receiver<bool> {
        self.closed_tx.subscribe()
    }

    /// Launch the read loop; subsequent calls are no-ops.
    pub fn start_handler(self: &Arc<Self>, ct: CancellationToken) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(reader) = self.reader.lock().unwrap().take() else {
            return;
        };
        let result_tx = self.result_tx.lock().unwrap().take();
        let handler = self.clone();
        tokio::spawn(async move {
            let result = handler.read_loop(reader, ct).await;
            handler.state.close();
            {
                let mut writer = handler.writer.lock().await;
                if let Err(e) = writer.writer.shutdown().await {
                    debug!(connection = %handler.id, "writer shutdown failed: {e}");
                }
            }
            if let Some(tx) = result_tx {
                let _ = tx.send(result);
            }
            handler.closed_tx.send_replace(true);
        });
    }

    /// Start the handler if needed and await read-loop completion.
    pub async fn run_handler(self: &Arc<Self>, ct: CancellationToken) -> Result<()> {
        self.start_handler(ct);
        let result_rx = self.result_rx.lock().unwrap().take();
        match result_rx {
            Some(rx) => rx.await.unwrap_or(Err(LinkError::ConnectionClosed)),
            None => {
                // the loop result was already consumed; wait for closure
                let mut closed = self.closed_signal();
                while !*closed.borrow_and_update() {
                    if closed.changed().await.is_err() {
                        break;
                    }
                }
                Err(LinkError::ConnectionClosed)
            }
        }
    }

    /// Assign the next message id, encode the envelope and write it
    /// length-framed. A failed send does not close the connection.
    pub async fn send_message(
        &self,
        payload: impl Into<Payload>,
        ct: CancellationToken,
    ) -> Result<i64> {
        let payload = payload.into();
        let mut writer = self.writer.lock().await;
        let message_id = writer.next_id;
        writer.next_id += 1;

        let bytes = codec::encode(&payload, message_id)?;
        tokio::select! {
            result = writer.writer.write_frame(&bytes) => result?,
            _ = ct.cancelled() => return Err(LinkError::Cancelled),
        }
        debug!(connection = %self.id, message_id, kind = %payload.kind(), "sent message");
        Ok(message_id)
    }

    async fn read_loop(
        self: &Arc<Self>,
        mut reader: Box<dyn MessageReader>,
        ct: CancellationToken,
    ) -> Result<()> {
        while !ct.is_cancelled() && self.state.is_open() {
            let frame = tokio::select! {
                _ = ct.cancelled() => break,
                frame = reader.read_frame() => frame,
            };
            let bytes = match frame {
                Ok(bytes) => bytes,
                Err(e) => {
                    debug!(connection = %self.id, "read failed, closing: {e}");
                    break;
                }
            };

            // a single malformed frame must not terminate the loop
            let envelope = match codec::decode(&bytes) {
                Ok(envelope) => envelope,
                Err(e) => {
                    error!(connection = %self.id, "dropping malformed frame: {e}");
                    continue;
                }
            };

            debug!(
                connection = %self.id,
                message_id = envelope.message_id,
                kind = %envelope.kind,
                "received message"
            );
            if let Err(e) = self
                .dispatcher
                .handle_envelope(self, &envelope, ct.child_token())
                .await
            {
                error!(connection = %self.id, "message dispatch failed: {e}");
            }
        }
        Ok(())
    }

    /// Contract: send `payload`, await the `Response` correlated to the id
    /// this send gets assigned.
    ///
    /// Fails fast with a usage error when this side cannot receive
    /// responses (the pure responding role has no contractor).
    pub fn contract_send_message(
        self: &Arc<Self>,
        payload: impl Into<Payload>,
    ) -> Result<Contract<WireResult, DefaultStates>> {
        let contractor = self.contracting_supported()?;
        let payload = payload.into();
        let sent_id = Arc::new(AtomicI64::new(0));

        let handler = self.clone();
        let captured = sent_id.clone();
        Ok(ContractBuilder::new(contractor, DefaultStates::None)
            .set_move_action(
                DefaultStates::None,
                move |ct| {
                    let handler = handler.clone();
                    let payload = payload.clone();
                    let captured = captured.clone();
                    async move {
                        let message_id = handler.send_message(payload, ct).await?;
                        captured.store(message_id, Ordering::SeqCst);
                        Ok(())
                    }
                },
                DefaultStates::Requested,
            )
            .set_move_filter::<ResponseResult, _>(
                DefaultStates::Requested,
                move |response| response.message_id == sent_id.load(Ordering::SeqCst),
                DefaultStates::ResponseObtained,
            )
            .set_fill_data::<ResponseResult, _>(DefaultStates::ResponseObtained, |response| {
                response.result.clone()
            })
            .build())
    }

    /// Contract: send a handshake, await the typed handshake reply the
    /// responding side sends under its own message id.
    pub fn contract_handshake(
        self: &Arc<Self>,
        request: HandshakeRequest,
    ) -> Result<Contract<HandshakeResponse, DefaultStates>> {
        let contractor = self.contracting_supported()?;
        let handler = self.clone();
        Ok(ContractBuilder::new(contractor, DefaultStates::None)
            .set_move_action(
                DefaultStates::None,
                move |ct| {
                    let handler = handler.clone();
                    let request = request.clone();
                    async move { handler.send_message(request, ct).await.map(|_| ()) }
                },
                DefaultStates::Requested,
            )
            .set_move_filter_always::<HandshakeResponse>(
                DefaultStates::Requested,
                DefaultStates::ResponseObtained,
            )
            .set_fill_data::<HandshakeResponse, _>(DefaultStates::ResponseObtained, |response| {
                response.clone()
            })
            .build())
    }

    fn contracting_supported(&self) -> Result<Arc<Contractor>> {
        self.contractor().cloned().ok_or_else(|| {
            LinkError::Usage(
                "contracting is not supported, this side does not receive responses".into(),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::Role;
    use crate::responder::ResponderRegistry;
    use crate::testing::{connected_pair, read_envelope};
    use proclink_core::{ConsoleMessage, PayloadKind};
    use std::time::Duration;

    fn client_handler(connection: Connection) -> Arc<ConnectionHandler> {
        let dispatcher = Arc::new(MessageDispatcher::new(
            ResponderRegistry::new(),
            Role::Client,
            Some(Arc::new(Contractor::new())),
        ));
        ConnectionHandler::new(connection, dispatcher)
    }

    #[tokio::test]
    async fn message_ids_are_strictly_increasing() {
        let (local, mut remote) = connected_pair();
        let handler = client_handler(local);
        let ct = CancellationToken::new();

        let mut previous = 0;
        for _ in 0..5 {
            let id = handler
                .send_message(ConsoleMessage { open: true }, ct.clone())
                .await
                .unwrap();
            assert!(id > previous);
            previous = id;
        }

        // the peer observes the same ids in order
        for expected in 1..=5 {
            let envelope = read_envelope(&mut remote).await;
            assert_eq!(envelope.message_id, expected);
        }
    }

    #[tokio::test]
    async fn start_handler_is_idempotent() {
        let (local, _remote) = connected_pair();
        let handler = client_handler(local);
        let ct = CancellationToken::new();

        handler.start_handler(ct.clone());
        handler.start_handler(ct.clone());
        // only one read task exists; cancelling stops it and the handler
        // reports a clean exit
        ct.cancel();
        assert!(handler.run_handler(ct).await.is_ok());
        assert_eq!(handler.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn malformed_frame_does_not_stop_the_loop() {
        let (local, mut remote) = connected_pair();
        let handler = client_handler(local);
        let ct = CancellationToken::new();
        handler.start_handler(ct.clone());

        let contract = handler
            .contract_send_message(ConsoleMessage { open: true })
            .unwrap();
        let wait_ct = ct.clone();
        let waiter = tokio::spawn(async move {
            contract
                .wait_for(DefaultStates::ResponseObtained, wait_ct)
                .await
        });

        // the request reaches the peer first
        let envelope = read_envelope(&mut remote).await;
        assert_eq!(envelope.kind, PayloadKind::Console);
        assert_eq!(envelope.message_id, 1);

        // garbage frame, then the valid correlated response
        remote.writer.write_frame(b"garbage").await.unwrap();
        remote
            .send(
                Payload::Response(ResponseResult {
                    message_id: 1,
                    result: WireResult::Success,
                }),
                7,
            )
            .await;

        let result = tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .expect("loop must still dispatch after a malformed frame")
            .unwrap()
            .unwrap();
        assert!(result.is_success());
        ct.cancel();
    }

    #[tokio::test]
    async fn closed_signal_fires_on_peer_disconnect() {
        let (local, remote) = connected_pair();
        let handler = client_handler(local);
        let mut closed = handler.closed_signal();
        handler.start_handler(CancellationToken::new());

        drop(remote); // peer hangs up -> read loop sees EOF
        tokio::time::timeout(Duration::from_secs(2), async {
            while !*closed.borrow_and_update() {
                closed.changed().await.unwrap();
            }
        })
        .await
        .expect("closed signal must fire");
        assert_eq!(handler.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn contracting_without_contractor_is_a_usage_error() {
        let (local, _remote) = connected_pair();
        let dispatcher = Arc::new(MessageDispatcher::new(
            ResponderRegistry::new(),
            Role::Server,
            None,
        ));
        let handler = ConnectionHandler::new(local, dispatcher);
        assert!(matches!(
            handler.contract_send_message(ConsoleMessage { open: false }),
            Err(LinkError::Usage(_))
        ));
    }

    #[tokio::test]
    async fn pending_contract_cancels_cleanly() {
        let (local, _remote) = connected_pair();
        let handler = client_handler(local);
        handler.start_handler(CancellationToken::new());

        let contract = handler
            .contract_send_message(ConsoleMessage { open: true })
            .unwrap();
        let wait_ct = CancellationToken::new();
        let waiter_ct = wait_ct.clone();
        let waiter = tokio::spawn(async move {
            contract
                .wait_for(DefaultStates::ResponseObtained, waiter_ct)
                .await
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());
        wait_ct.cancel();
        let result = tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(LinkError::Cancelled)));
        // the connection itself is unaffected
        assert_eq!(handler.state(), ConnectionState::Open);
    }
}
