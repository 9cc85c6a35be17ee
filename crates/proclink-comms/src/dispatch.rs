//! Executes registered responders for decoded envelopes and, in the
//! auto-reply role, answers them with a correlated response.

use crate::contract::Contractor;
use crate::handler::ConnectionHandler;
use crate::responder::ResponderRegistry;
use proclink_core::{Decoded, LinkError, PayloadKind, ResponseResult, Result, WireResult};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Which side of the protocol this node plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Never answers dispatched messages with a `Response`.
    Client,
    /// Synthesizes a `Response` for every non-`Response` payload it
    /// dispatches.
    Server,
}

/// Routes decoded envelopes to contracts and responders.
pub struct MessageDispatcher {
    registry: ResponderRegistry,
    contractor: Option<Arc<Contractor>>,
    role: Role,
}

impl MessageDispatcher {
    pub fn new(
        registry: ResponderRegistry,
        role: Role,
        contractor: Option<Arc<Contractor>>,
    ) -> Self {
        Self {
            registry,
            contractor,
            role,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn contractor(&self) -> Option<&Arc<Contractor>> {
        self.contractor.as_ref()
    }

    /// Handle one decoded envelope: update live contracts, invoke every
    /// responder registered for the payload's kind concurrently, aggregate
    /// their failures and, in the server role, send the correlated
    /// response back.
    pub async fn handle_envelope(
        &self,
        connection: &Arc<ConnectionHandler>,
        envelope: &Decoded,
        ct: CancellationToken,
    ) -> Result<()> {
        if let Some(contractor) = &self.contractor {
            contractor.update(&envelope.payload, ct.clone()).await?;
        }

        let responders = self.registry.resolve(envelope.kind);
        let responder_count = responders.len();
        let payload = Arc::new(envelope.payload.clone());

        // each responder runs as its own task: concurrent, and isolated so
        // a panic in one becomes a failure while the rest still run
        let tasks: Vec<_> = responders
            .into_iter()
            .map(|responder| {
                let payload = payload.clone();
                let connection = connection.clone();
                let ct = ct.clone();
                tokio::spawn(async move { responder.respond(payload, connection, ct).await })
            })
            .collect();

        let mut errors = Vec::new();
        for task in tasks {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(error)) => errors.push(error),
                Err(join_error) => {
                    errors.push(LinkError::ResponderFault(join_error.to_string()))
                }
            }
        }

        if self.role == Role::Server && envelope.kind != PayloadKind::Response {
            let result = if responder_count == 0 {
                WireResult::failure(&LinkError::NoResponder(envelope.kind.to_string()))
            } else {
                WireResult::from_errors(&errors)
            };
            let response = ResponseResult {
                message_id: envelope.message_id,
                result,
            };
            if let Err(error) = connection.send_message(response, ct).await {
                warn!(
                    message_id = envelope.message_id,
                    "failed to send response: {error}"
                );
                errors.push(error);
            }
        }

        LinkError::aggregate(errors)
    }
}
