//! Bounded worker pool consuming a guaranteed-delivery flow.
//!
//! The flow's delivery window caps how many messages the broker has
//! outstanding; the [`Dispatcher`] keeps the window moving by acknowledging
//! each message as soon as its worker finishes with it.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod config;
mod dispatcher;
mod error;
mod processor;
mod stats;

pub use config::{DispatcherConfig, FailurePolicy};
pub use dispatcher::{Dispatcher, DispatcherState};
pub use error::{Error, Result};
pub use processor::{MessageProcessor, ProcessorError};
pub use stats::DispatcherStats;
