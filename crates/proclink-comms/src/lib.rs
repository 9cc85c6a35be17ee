//! # proclink-comms
//!
//! The communications core of proclink:
//! - Connection handler: read loop, id assignment, sending
//! - Responder registry and concurrent message dispatch
//! - Contracts: awaitable, cancellable request/response correlation
//! - Server connection manager: accept, track, broadcast
//! - Client connection establishment

pub mod client;
pub mod contract;
pub mod dispatch;
pub mod handler;
pub mod manager;
pub mod responder;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{Comms, connect, connect_pipe, connect_tcp};
pub use contract::{Contract, ContractBuilder, ContractState, Contractor, DefaultStates};
pub use dispatch::{MessageDispatcher, Role};
pub use handler::ConnectionHandler;
pub use manager::ServerManager;
pub use responder::{Responder, ResponderRegistry};
