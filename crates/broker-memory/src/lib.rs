//! In-memory implementation of the broker crate.
//!
//! Queues, topic routing and flows live in process. Confirmation events can be
//! emitted automatically, or left to the test driving the broker so that
//! correlation paths can be exercised deterministically.
//!
//! Topic endpoints are stored as queues of the same name. Endpoint
//! permissions are accepted and ignored.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod flow;
mod session;
mod state;

pub use error::Error;
pub use flow::MemoryFlow;
pub use session::MemorySession;
pub use state::FlowSnapshot;

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use bytes::Bytes;
use courier_broker::{Capability, ConnectionProperties, ReceivedMessage};
use dashmap::DashMap;
use parking_lot::Mutex;

use state::BrokerState;

/// Function answering requests sent to a topic.
pub type Replier = Arc<dyn Fn(&ReceivedMessage) -> Bytes + Send + Sync>;

/// Whether the broker emits confirmation events on its own.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConfirmationPolicy {
    /// Connect, acknowledgement, subscribe and provision events are emitted
    /// as soon as the operation is processed.
    #[default]
    Automatic,

    /// Calls return `InProgress` and no events are emitted. Tests inject
    /// events with [`MemorySession::emit`].
    Manual,
}

/// Options for creating a new `MemoryBroker`.
#[derive(Clone, Debug)]
pub struct MemoryBrokerOptions {
    /// The only VPN name the broker accepts.
    pub vpn_name: String,

    /// Accepted user name and password. `None` accepts anyone.
    pub credentials: Option<(String, String)>,

    /// Capabilities advertised to sessions.
    pub capabilities: HashSet<Capability>,

    /// Whether confirmation events are emitted automatically.
    pub confirmation: ConfirmationPolicy,
}

impl Default for MemoryBrokerOptions {
    fn default() -> Self {
        Self {
            vpn_name: "default".to_string(),
            credentials: None,
            capabilities: [
                Capability::PubGuaranteed,
                Capability::SubFlowGuaranteed,
                Capability::EndpointManagement,
                Capability::QueueSubscriptions,
            ]
            .into_iter()
            .collect(),
            confirmation: ConfirmationPolicy::Automatic,
        }
    }
}

struct Inner {
    options: MemoryBrokerOptions,
    state: Mutex<BrokerState>,
    repliers: DashMap<String, Replier>,
    next_session_id: AtomicU64,
    unreachable_attempts: AtomicU32,
}

/// An in-process broker shared by any number of sessions.
#[derive(Clone)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

impl fmt::Debug for MemoryBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryBroker")
            .field("vpn_name", &self.inner.options.vpn_name)
            .field("confirmation", &self.inner.options.confirmation)
            .finish_non_exhaustive()
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new(MemoryBrokerOptions::default())
    }
}

impl MemoryBroker {
    /// Creates a new broker.
    #[must_use]
    pub fn new(options: MemoryBrokerOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                options,
                state: Mutex::new(BrokerState::default()),
                repliers: DashMap::new(),
                next_session_id: AtomicU64::new(0),
                unreachable_attempts: AtomicU32::new(0),
            }),
        }
    }

    /// Creates a session. The session is not connected until
    /// `Session::connect` succeeds.
    #[must_use]
    pub fn create_session(&self, properties: ConnectionProperties) -> MemorySession {
        let id = self.inner.next_session_id.fetch_add(1, Ordering::Relaxed);
        MemorySession::new(self.clone(), id, properties)
    }

    /// Answers requests published to `topic` with `replier`.
    pub fn register_replier<F>(&self, topic: impl Into<String>, replier: F)
    where
        F: Fn(&ReceivedMessage) -> Bytes + Send + Sync + 'static,
    {
        self.inner.repliers.insert(topic.into(), Arc::new(replier));
    }

    /// Makes the next `attempts` connect attempts, from any session, fail as
    /// if the broker could not be reached.
    pub fn fail_connect_attempts(&self, attempts: u32) {
        self.inner
            .unreachable_attempts
            .store(attempts, Ordering::SeqCst);
    }

    /// Number of messages waiting on a queue, excluding messages pushed to a
    /// flow and not yet acknowledged.
    #[must_use]
    pub fn queue_depth(&self, name: &str) -> Option<usize> {
        self.inner.state.lock().queue_depth(name)
    }

    pub(crate) fn options(&self) -> &MemoryBrokerOptions {
        &self.inner.options
    }

    pub(crate) fn state(&self) -> parking_lot::MutexGuard<'_, BrokerState> {
        self.inner.state.lock()
    }

    /// Consumes one injected connect failure, if any are left.
    pub(crate) fn take_connect_failure(&self) -> bool {
        self.inner
            .unreachable_attempts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| {
                left.checked_sub(1)
            })
            .is_ok()
    }

    pub(crate) fn replier(&self, topic: &str) -> Option<Replier> {
        self.inner
            .repliers
            .get(topic)
            .map(|entry| Arc::clone(entry.value()))
    }
}
