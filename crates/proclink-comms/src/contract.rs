//! Contracts: short-lived state machines correlating a fire-and-forget
//! send with its eventual reply.
//!
//! A contract is built from per-state move actions (side effects run once
//! on entering a state), move filters (inbound payloads that drive
//! transitions) and a fill-data extractor on the state the caller awaits.
//! The [`Contractor`] is the single mutation point: the dispatcher hands it
//! every inbound payload and it fans the payload to all live contracts.

use futures::future::BoxFuture;
use proclink_core::{FromPayload, LinkError, Payload, Result};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// State set a contract machine can run over.
pub trait ContractState: Copy + Eq + Hash + Send + Sync + 'static {}

impl<T: Copy + Eq + Hash + Send + Sync + 'static> ContractState for T {}

/// The default request/response state set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DefaultStates {
    None,
    Requested,
    ResponseObtained,
}

type MoveActionFn = Box<dyn Fn(CancellationToken) -> BoxFuture<'static, Result<()>> + Send + Sync>;
type FilterFn = Box<dyn Fn(&Payload) -> bool + Send + Sync>;
type FillFn<TData> = Box<dyn Fn(&Payload) -> Option<TData> + Send + Sync>;

struct MoveAction<S> {
    action: MoveActionFn,
    to: S,
}

struct MoveFilter<S> {
    from: S,
    to: S,
    matches: FilterFn,
}

/// Builder for a [`Contract`].
pub struct ContractBuilder<TData, S: ContractState> {
    contractor: Arc<Contractor>,
    initial: S,
    actions: HashMap<S, MoveAction<S>>,
    filters: Vec<MoveFilter<S>>,
    fills: HashMap<S, FillFn<TData>>,
}

impl<TData, S> ContractBuilder<TData, S>
where
    TData: Send + 'static,
    S: ContractState,
{
    pub fn new(contractor: Arc<Contractor>, initial: S) -> Self {
        Self {
            contractor,
            initial,
            actions: HashMap::new(),
            filters: Vec::new(),
            fills: HashMap::new(),
        }
    }

    /// Side effect executed exactly once on entering `from`; on success the
    /// contract advances to `to`, on failure it terminates with that error.
    pub fn set_move_action<F, Fut>(mut self, from: S, action: F, to: S) -> Self
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.actions.insert(
            from,
            MoveAction {
                action: Box::new(move |ct| Box::pin(action(ct))),
                to,
            },
        );
        self
    }

    /// While in `from`, any dispatched payload of type `P` satisfying
    /// `predicate` drives a transition to `to`; the payload is retained as
    /// that state's data.
    pub fn set_move_filter<P, F>(mut self, from: S, predicate: F, to: S) -> Self
    where
        P: FromPayload,
        F: Fn(&P) -> bool + Send + Sync + 'static,
    {
        self.filters.push(MoveFilter {
            from,
            to,
            matches: Box::new(move |payload| {
                P::from_payload(payload).is_some_and(|message| predicate(message))
            }),
        });
        self
    }

    /// Filter matching every payload of type `P`.
    pub fn set_move_filter_always<P: FromPayload>(self, from: S, to: S) -> Self {
        self.set_move_filter::<P, _>(from, |_| true, to)
    }

    /// How to produce the caller-visible result once `state` is reached.
    pub fn set_fill_data<P, F>(mut self, state: S, extract: F) -> Self
    where
        P: FromPayload,
        F: Fn(&P) -> TData + Send + Sync + 'static,
    {
        self.fills.insert(
            state,
            Box::new(move |payload| P::from_payload(payload).map(|message| extract(message))),
        );
        self
    }

    pub fn build(self) -> Contract<TData, S> {
        let (state_tx, _) = watch::channel(0u64);
        Contract {
            inner: Arc::new(ContractInner {
                id: self.contractor.next_contract_id(),
                contractor: self.contractor,
                actions: self.actions,
                filters: self.filters,
                fills: self.fills,
                runtime: Mutex::new(Runtime {
                    current: self.initial,
                    matched: None,
                    failure: None,
                    executed: HashSet::new(),
                    registered: false,
                }),
                state_tx,
            }),
        }
    }
}

struct Runtime<S> {
    current: S,
    /// Payload that drove the latest filter transition.
    matched: Option<Payload>,
    /// Terminal failure from a move action, delivered to the waiter once.
    failure: Option<LinkError>,
    /// States whose move action already ran.
    executed: HashSet<S>,
    registered: bool,
}

struct ContractInner<TData, S: ContractState> {
    id: u64,
    contractor: Arc<Contractor>,
    actions: HashMap<S, MoveAction<S>>,
    filters: Vec<MoveFilter<S>>,
    fills: HashMap<S, FillFn<TData>>,
    runtime: Mutex<Runtime<S>>,
    /// Version counter bumped on every state change; waiters re-inspect
    /// the runtime when it ticks.
    state_tx: watch::Sender<u64>,
}

impl<TData, S> ContractInner<TData, S>
where
    TData: Send + 'static,
    S: ContractState,
{
    /// Run move actions until the current state has none pending. The
    /// transition is applied before the action awaits, so a reply racing
    /// the sender's resumption still finds the contract in the next state.
    async fn advance(&self, ct: CancellationToken) -> Result<()> {
        loop {
            let action = {
                let mut runtime = self.runtime.lock().unwrap();
                let current = runtime.current;
                let Some(action) = self.actions.get(&current) else {
                    break;
                };
                if !runtime.executed.insert(current) {
                    break;
                }
                runtime.current = action.to;
                action
            };
            self.state_tx.send_modify(|version| *version += 1);
            (action.action)(ct.clone()).await?;
        }
        Ok(())
    }

    fn extract(&self, target: S) -> Result<TData> {
        let runtime = self.runtime.lock().unwrap();
        let fill = self
            .fills
            .get(&target)
            .ok_or_else(|| LinkError::Usage("no fill data registered for the awaited state".into()))?;
        runtime
            .matched
            .as_ref()
            .and_then(|payload| fill(payload))
            .ok_or_else(|| LinkError::Usage("awaited state holds no extractable data".into()))
    }

    fn detach(&self) {
        let mut runtime = self.runtime.lock().unwrap();
        runtime.registered = false;
        drop(runtime);
        self.contractor.unregister(self.id);
    }
}

/// Object-safe contract updates, what the contractor holds.
pub(crate) trait ContractUpdater: Send + Sync {
    fn contract_id(&self) -> u64;

    fn update<'a>(
        &'a self,
        payload: &'a Payload,
        ct: CancellationToken,
    ) -> BoxFuture<'a, Result<()>>;
}

impl<TData, S> ContractUpdater for ContractInner<TData, S>
where
    TData: Send + 'static,
    S: ContractState,
{
    fn contract_id(&self) -> u64 {
        self.id
    }

    fn update<'a>(
        &'a self,
        payload: &'a Payload,
        ct: CancellationToken,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let advanced = {
                let mut runtime = self.runtime.lock().unwrap();
                if runtime.failure.is_some() {
                    return Ok(());
                }
                let current = runtime.current;
                match self
                    .filters
                    .iter()
                    .find(|filter| filter.from == current && (filter.matches)(payload))
                {
                    Some(filter) => {
                        runtime.current = filter.to;
                        runtime.matched = Some(payload.clone());
                        true
                    }
                    // non-matching payloads are ignored
                    None => false,
                }
            };

            if advanced {
                self.state_tx.send_modify(|version| *version += 1);
                if let Err(error) = self.advance(ct).await {
                    debug!(contract = self.id, "move action failed: {error}");
                    let mut runtime = self.runtime.lock().unwrap();
                    runtime.failure = Some(error);
                    drop(runtime);
                    self.state_tx.send_modify(|version| *version += 1);
                }
            }
            Ok(())
        })
    }
}

/// An ephemeral state machine correlating a sent request with its reply.
/// Owned by the call site that created it; one terminal transition or a
/// cancellation finishes it.
pub struct Contract<TData, S: ContractState> {
    inner: Arc<ContractInner<TData, S>>,
}

impl<TData, S> Contract<TData, S>
where
    TData: Send + 'static,
    S: ContractState,
{
    /// Drive the contract: register with the contractor, run pending move
    /// actions, then suspend until `target` is reached (returns the
    /// extracted data), `ct` fires (detaches and returns
    /// [`LinkError::Cancelled`]) or a move action fails.
    pub async fn wait_for(&self, target: S, ct: CancellationToken) -> Result<TData> {
        let mut state_rx = self.inner.state_tx.subscribe();

        // register before the first move action runs so a reply can never
        // slip past while the request is still in flight
        {
            let mut runtime = self.inner.runtime.lock().unwrap();
            if !runtime.registered {
                runtime.registered = true;
                drop(runtime);
                let updater: Arc<dyn ContractUpdater> = self.inner.clone();
                self.inner.contractor.register(updater);
            }
        }

        if let Err(error) = self.inner.advance(ct.clone()).await {
            self.inner.detach();
            return Err(error);
        }

        loop {
            {
                let mut runtime = self.inner.runtime.lock().unwrap();
                if let Some(failure) = runtime.failure.take() {
                    drop(runtime);
                    self.inner.detach();
                    return Err(failure);
                }
                if runtime.current == target {
                    drop(runtime);
                    self.inner.detach();
                    return self.inner.extract(target);
                }
            }

            tokio::select! {
                _ = ct.cancelled() => {
                    self.inner.detach();
                    return Err(LinkError::Cancelled);
                }
                changed = state_rx.changed() => {
                    if changed.is_err() {
                        self.inner.detach();
                        return Err(LinkError::ConnectionClosed);
                    }
                }
            }
        }
    }
}

/// Holds all live contracts and fans inbound payloads to them.
pub struct Contractor {
    contracts: Mutex<Vec<Arc<dyn ContractUpdater>>>,
    next_id: AtomicU64,
}

impl Contractor {
    pub fn new() -> Self {
        Self {
            contracts: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn next_contract_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn register(&self, contract: Arc<dyn ContractUpdater>) {
        self.contracts.lock().unwrap().push(contract);
    }

    fn unregister(&self, id: u64) {
        self.contracts
            .lock()
            .unwrap()
            .retain(|contract| contract.contract_id() != id);
    }

    /// Number of contracts currently registered.
    pub fn live(&self) -> usize {
        self.contracts.lock().unwrap().len()
    }

    /// Hand an inbound payload to every live contract. Contracts with no
    /// matching filter ignore it; failures aggregate.
    pub async fn update(&self, payload: &Payload, ct: CancellationToken) -> Result<()> {
        let snapshot: Vec<_> = self.contracts.lock().unwrap().clone();
        let mut errors = Vec::new();
        for contract in snapshot {
            if let Err(error) = contract.update(payload, ct.clone()).await {
                errors.push(error);
            }
        }
        LinkError::aggregate(errors)
    }
}

impl Default for Contractor {
    fn default() -> Self {
        Self::new()
    }
}
