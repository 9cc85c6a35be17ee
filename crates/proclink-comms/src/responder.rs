//! Message responders and their registry.
//!
//! A responder is registered for one concrete payload type; the registry
//! keeps a type-erased invocation closure per registration, keyed by the
//! payload kind, so dispatch never inspects runtime types. Every responder
//! registered for a kind runs for every matching message.

use crate::handler::ConnectionHandler;
use async_trait::async_trait;
use futures::future::BoxFuture;
use proclink_core::{FromPayload, Payload, PayloadKind, Result};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A responder to a received message from client or server.
#[async_trait]
pub trait Responder<M>: Send + Sync {
    /// Respond to the given message. `connection` is the handler the
    /// message arrived on, usable for sending messages back.
    async fn respond(
        &self,
        message: &M,
        connection: &ConnectionHandler,
        ct: CancellationToken,
    ) -> Result<()>;
}

/// Type-erased invocation of one registered responder.
pub(crate) trait ErasedResponder: Send + Sync {
    fn respond(
        &self,
        payload: Arc<Payload>,
        connection: Arc<ConnectionHandler>,
        ct: CancellationToken,
    ) -> BoxFuture<'static, Result<()>>;
}

struct TypedResponder<M, R> {
    inner: Arc<R>,
    _message: PhantomData<fn() -> M>,
}

impl<M, R> ErasedResponder for TypedResponder<M, R>
where
    M: FromPayload,
    R: Responder<M> + 'static,
{
    fn respond(
        &self,
        payload: Arc<Payload>,
        connection: Arc<ConnectionHandler>,
        ct: CancellationToken,
    ) -> BoxFuture<'static, Result<()>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            match M::from_payload(&payload) {
                Some(message) => inner.respond(message, &connection, ct).await,
                // registry keys guarantee the kind matches; a mismatch
                // here means a stale registration, not an error
                None => Ok(()),
            }
        })
    }
}

/// Mapping from payload kind to the responders registered for it.
#[derive(Default)]
pub struct ResponderRegistry {
    responders: HashMap<PayloadKind, Vec<Arc<dyn ErasedResponder>>>,
}

impl ResponderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a responder for payload type `M`. Multiple responders may
    /// be registered for the same type; all of them run for every match.
    pub fn register<M, R>(&mut self, responder: R)
    where
        M: FromPayload,
        R: Responder<M> + 'static,
    {
        self.responders
            .entry(M::KIND)
            .or_default()
            .push(Arc::new(TypedResponder::<M, R> {
                inner: Arc::new(responder),
                _message: PhantomData,
            }));
    }

    pub(crate) fn resolve(&self, kind: PayloadKind) -> Vec<Arc<dyn ErasedResponder>> {
        self.responders.get(&kind).cloned().unwrap_or_default()
    }

    /// Number of responders registered for `kind`.
    pub fn registered(&self, kind: PayloadKind) -> usize {
        self.responders.get(&kind).map_or(0, Vec::len)
    }
}
