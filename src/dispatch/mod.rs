//! The connection dispatcher: five cooperating loops over channels.
//!
//! # Architecture
//!
//! ```text
//!             perform(Request)
//!                   │  atomic two-queue enqueue
//!        ┌──────────┴──────────┐
//!        ▼                     ▼
//!  submit queue          processor queue
//!        │                     │
//!  ┌─────▼─────┐         ┌─────▼───────┐    unaffiliated
//!  │ Serializer│         │ Interpreter │───► sink
//!  └─────┬─────┘         └─────▲───────┘
//!        │ outgoing bytes      │ inbound messages
//!  ┌─────▼─────┐         ┌─────┴───────┐
//!  │  Sender   │         │   Slicer    │
//!  └─────┬─────┘         └─────▲───────┘
//!        │ write half          │ inbound chunks
//!        │               ┌─────┴───────┐
//!        └──────────────►│  Receiver   │  (socket)
//!                        └─────────────┘
//! ```
//!
//! Ordering is established once, at submission: requests admitted in some
//! order hit the wire in that order and their replies are parsed in that
//! order. Every loop preserves FIFO; the transport fuse is the only other
//! shared state, and it is write-once.

mod dispatcher;
mod fuse;
mod loops;
mod processor;

pub use dispatcher::Dispatcher;

use crate::error::BackendError;
use crate::protocol::backend::Notification;

/// A backend message not associated with any pending request.
///
/// Routed to the caller-supplied sink; never blocks the interpreter.
#[derive(Debug, Clone)]
pub enum AsyncMessage {
    /// Asynchronous NOTIFY.
    Notification(Notification),
    /// An ErrorResponse that arrived while no request was pending.
    Error(BackendError),
    /// A message that made no sense in the idle state, reported without
    /// tearing anything down.
    Protocol(String),
}
