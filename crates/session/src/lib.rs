//! Awaitable operations over an event-driven broker session.
//!
//! The broker reports the outcome of connects, guaranteed sends,
//! subscriptions and provisioning later, as events carrying the correlation
//! token of the call that caused them. [`CorrelationBridge`] registers a
//! single-assignment [`PendingOperation`] per call and resolves it from the
//! matching event.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod bridge;
mod error;
mod pending;

pub use bridge::{CorrelationBridge, SessionOptions};
pub use error::{Error, Result};
pub use pending::{Completer, PendingOperation, pending_operation};
