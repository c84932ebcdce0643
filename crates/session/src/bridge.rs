use std::fmt;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use courier_broker::{
    Capability, Confirmation, CorrelationToken, Endpoint, EndpointProperties, EventStream,
    FlowOptions, MessageStream, OutboundMessage, ProvisionFlags, ReceivedMessage, ReturnCode,
    Session, SessionEvent, Subscription,
};
use dashmap::DashMap;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, info, instrument, trace, warn};

use crate::error::{Error, Result};
use crate::pending::{Completer, pending_operation};

/// Options fixed for the lifetime of a bridge.
#[derive(Clone, Copy, Debug, Default)]
pub struct SessionOptions {
    /// Resolve `connect` as soon as the broker call returns, without waiting
    /// for the connect event.
    pub connect_blocking: bool,

    /// Resolve guaranteed sends as soon as the broker call returns, without
    /// waiting for the acknowledgement event.
    pub send_blocking: bool,
}

/// Which completion events may resolve a registered token.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum OperationKind {
    Send,
    Subscribe,
    Provision,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Send => write!(f, "send"),
            Self::Subscribe => write!(f, "subscribe"),
            Self::Provision => write!(f, "provision"),
        }
    }
}

impl OperationKind {
    fn rejection(self, info: String) -> Error {
        match self {
            Self::Send => Error::SendRejected(info),
            Self::Subscribe => Error::SubscribeRejected(info),
            Self::Provision => Error::ProvisionFailure(info),
        }
    }
}

#[derive(Debug)]
struct Registration {
    kind: OperationKind,
    completer: Completer,
}

#[derive(Debug)]
enum ConnectState {
    Idle,
    Connecting(Completer),
    Connected,
}

struct Inner<S: Session> {
    session: S,
    options: SessionOptions,
    pending: DashMap<CorrelationToken, Registration>,
    connect_state: Mutex<ConnectState>,
    shutdown_token: CancellationToken,
    task_tracker: TaskTracker,
}

impl<S: Session> Drop for Inner<S> {
    fn drop(&mut self) {
        self.shutdown_token.cancel();
    }
}

/// Removes a token from the pending map when the issuing call finishes or
/// is abandoned.
struct TokenGuard<'a> {
    pending: &'a DashMap<CorrelationToken, Registration>,
    token: CorrelationToken,
}

impl Drop for TokenGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.token);
    }
}

fn diagnostic(info: Option<String>) -> String {
    info.unwrap_or_else(|| "no diagnostic from broker".to_string())
}

impl<S: Session> Inner<S> {
    fn ensure_open(&self) -> Result<()> {
        if self.shutdown_token.is_cancelled() {
            Err(Error::SessionClosed)
        } else {
            Ok(())
        }
    }

    fn resolve_connect(&self, result: Result<ReturnCode>) -> bool {
        let mut state = self.connect_state.lock();
        let ConnectState::Connecting(completer) = &*state else {
            return false;
        };
        let completer = completer.clone();

        *state = if result.is_ok() {
            ConnectState::Connected
        } else {
            ConnectState::Idle
        };
        drop(state);

        match &result {
            Ok(_) => info!("session connected"),
            Err(e) => warn!("session connect failed: {e}"),
        }

        completer.complete(result)
    }

    fn resolve(
        &self,
        token: Option<CorrelationToken>,
        kind: OperationKind,
        result: Result<ReturnCode>,
    ) {
        let Some(token) = token else {
            debug!("{kind} event without correlation token, dropping");
            return;
        };

        match self
            .pending
            .remove_if(&token, |_, registration| registration.kind == kind)
        {
            Some((_, registration)) => {
                trace!("resolving {kind} operation {token}");
                registration.completer.complete(result);
            }
            None if self.pending.contains_key(&token) => {
                warn!("{kind} event for token {token} registered as a different operation, dropping");
            }
            None => {
                debug!("{kind} event for unknown or completed token {token}, dropping");
            }
        }
    }

    fn handle_event(&self, event: SessionEvent) {
        match event {
            SessionEvent::ConnectSucceeded => {
                if !self.resolve_connect(Ok(ReturnCode::Ok)) {
                    debug!("connect succeeded with no pending connect, dropping");
                }
            }
            SessionEvent::ConnectFailed { info } => {
                let reason = diagnostic(info);
                if !self.resolve_connect(Err(Error::ConnectFailure(reason.clone()))) {
                    warn!("connect failed with no pending connect: {reason}");
                }
            }
            SessionEvent::OperationAcknowledged { token } => {
                self.resolve(token, OperationKind::Send, Ok(ReturnCode::Ok));
            }
            SessionEvent::OperationRejected { token, info } => {
                let error = OperationKind::Send.rejection(diagnostic(info));
                self.resolve(token, OperationKind::Send, Err(error));
            }
            SessionEvent::SubscribeSucceeded { token } => {
                self.resolve(token, OperationKind::Subscribe, Ok(ReturnCode::Ok));
            }
            SessionEvent::SubscribeFailed { token, info } => {
                let error = OperationKind::Subscribe.rejection(diagnostic(info));
                self.resolve(token, OperationKind::Subscribe, Err(error));
            }
            SessionEvent::ProvisionSucceeded { token } => {
                self.resolve(token, OperationKind::Provision, Ok(ReturnCode::Ok));
            }
            SessionEvent::ProvisionFailed { token, info } => {
                let error = OperationKind::Provision.rejection(diagnostic(info));
                self.resolve(token, OperationKind::Provision, Err(error));
            }
            SessionEvent::Notice { info } => {
                info!("session notice: {info}");
            }
        }
    }

    fn fail_pending(&self) {
        let tokens: Vec<CorrelationToken> =
            self.pending.iter().map(|entry| *entry.key()).collect();

        let mut failed = 0;
        for token in tokens {
            let closed = self
                .pending
                .remove(&token)
                .is_some_and(|(_, registration)| {
                    registration.completer.complete(Err(Error::SessionClosed))
                });
            if closed {
                failed += 1;
            }
        }

        if self.resolve_connect(Err(Error::SessionClosed)) {
            failed += 1;
        }

        if failed > 0 {
            debug!("failed {failed} pending operation(s) on close");
        }
    }
}

async fn dispatch_events<S: Session>(
    inner: Weak<Inner<S>>,
    mut events: EventStream,
    shutdown_token: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = shutdown_token.cancelled() => {
                debug!("event dispatch cancelled");
                break;
            }
            event = events.next() => {
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                match event {
                    Some(event) => inner.handle_event(event),
                    None => {
                        info!("session event stream ended");
                        inner.shutdown_token.cancel();
                        inner.fail_pending();
                        break;
                    }
                }
            }
        }
    }
}

/// Adapts a [`Session`]'s "call now, hear the outcome later" interface into
/// awaitable operations.
///
/// A single task consumes the session's event stream in arrival order and
/// completes the operation registered under each event's correlation token.
/// Events with no matching pending operation are logged and dropped.
pub struct CorrelationBridge<S: Session> {
    inner: Arc<Inner<S>>,
}

impl<S: Session> Clone for CorrelationBridge<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: Session> fmt::Debug for CorrelationBridge<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CorrelationBridge")
            .field("session", &self.inner.session)
            .field("options", &self.inner.options)
            .field("pending", &self.inner.pending.len())
            .finish_non_exhaustive()
    }
}

impl<S: Session> CorrelationBridge<S> {
    /// Takes the session's event stream and starts dispatching it.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the session's event stream was already taken.
    pub fn new(session: S, options: SessionOptions) -> Result<Self> {
        let events = session
            .events()
            .map_err(|e| Error::Session(e.to_string()))?;

        let inner = Arc::new(Inner {
            session,
            options,
            pending: DashMap::new(),
            connect_state: Mutex::new(ConnectState::Idle),
            shutdown_token: CancellationToken::new(),
            task_tracker: TaskTracker::new(),
        });

        inner.task_tracker.spawn(
            dispatch_events(
                Arc::downgrade(&inner),
                events,
                inner.shutdown_token.clone(),
            )
            .in_current_span(),
        );
        inner.task_tracker.close();

        Ok(Self { inner })
    }

    /// The wrapped session.
    pub fn session(&self) -> &S {
        &self.inner.session
    }

    /// Number of operations waiting on a broker event.
    #[must_use]
    pub fn pending_operations(&self) -> usize {
        self.inner.pending.len()
    }

    /// Connects the session.
    ///
    /// Resolves when the broker reports the connection up, or straight away
    /// if the broker call completes it or `connect_blocking` is set.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyConnected`] or [`Error::ConnectInProgress`] on
    /// a repeated call, and [`Error::ConnectFailure`] if the broker refuses.
    #[instrument(skip(self))]
    pub async fn connect(&self) -> Result<ReturnCode> {
        self.inner.ensure_open()?;

        let (completer, pending) = pending_operation();
        {
            let mut state = self.inner.connect_state.lock();
            match &*state {
                ConnectState::Connected => return Err(Error::AlreadyConnected),
                ConnectState::Connecting(_) => return Err(Error::ConnectInProgress),
                ConnectState::Idle => *state = ConnectState::Connecting(completer),
            }
        }

        // Closed between the check above and entering `Connecting`.
        if self.inner.shutdown_token.is_cancelled() {
            self.inner.resolve_connect(Err(Error::SessionClosed));
            return pending.await;
        }

        match self.inner.session.connect().await {
            Ok(code) if self.inner.options.connect_blocking || code == ReturnCode::Ok => {
                self.inner.resolve_connect(Ok(code));
            }
            Ok(code) => debug!("connect returned {code:?}, awaiting connect event"),
            Err(e) => {
                self.inner
                    .resolve_connect(Err(Error::ConnectFailure(e.to_string())));
            }
        }

        pending.await
    }

    /// Publishes a message with a fresh correlation token.
    ///
    /// Direct messages resolve once the broker accepts them, as do all
    /// messages when `send_blocking` is set. Guaranteed messages otherwise
    /// resolve on the broker's acknowledgement or rejection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SendRejected`] with the broker's diagnostic text.
    #[instrument(skip(self, message), fields(destination = %message.destination))]
    pub async fn send(&self, mut message: OutboundMessage) -> Result<ReturnCode> {
        let token = CorrelationToken::new();
        message.correlation_token = Some(token);

        let await_event =
            message.delivery_mode.is_guaranteed() && !self.inner.options.send_blocking;

        self.issue(
            token,
            OperationKind::Send,
            await_event,
            self.inner.session.send(message),
        )
        .await
    }

    /// Adds a subscription.
    ///
    /// With [`Confirmation::Local`] this resolves once the broker accepts the
    /// call; with [`Confirmation::Broker`] it waits for the subscribe event.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SubscribeRejected`] with the broker's diagnostic text.
    #[instrument(skip(self, subscription), fields(pattern = subscription.pattern()))]
    pub async fn subscribe(
        &self,
        subscription: &Subscription,
        confirmation: Confirmation,
    ) -> Result<ReturnCode> {
        let token = CorrelationToken::new();
        let await_event = confirmation == Confirmation::Broker;

        self.issue(
            token,
            OperationKind::Subscribe,
            await_event,
            self.inner
                .session
                .subscribe(subscription, await_event.then_some(token)),
        )
        .await
    }

    /// Creates a durable endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProvisionFailure`] with the broker's diagnostic text.
    #[instrument(skip(self, properties))]
    pub async fn provision(
        &self,
        endpoint: &Endpoint,
        properties: &EndpointProperties,
        flags: ProvisionFlags,
    ) -> Result<ReturnCode> {
        let token = CorrelationToken::new();
        let await_event = flags.confirmation == Confirmation::Broker;

        self.issue(
            token,
            OperationKind::Provision,
            await_event,
            self.inner.session.provision(
                endpoint,
                properties,
                flags.ignore_if_exists,
                await_event.then_some(token),
            ),
        )
        .await
    }

    /// Sends a request and waits up to `timeout` for the reply.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OperationTimeout`] if no reply arrives in time.
    #[instrument(skip(self, message), fields(destination = %message.destination))]
    pub async fn request(
        &self,
        message: OutboundMessage,
        timeout: Duration,
    ) -> Result<ReceivedMessage> {
        self.inner.ensure_open()?;

        tokio::time::timeout(timeout, self.inner.session.request(message))
            .await
            .map_err(|_| {
                warn!("request timed out after {timeout:?}");
                Error::OperationTimeout(timeout)
            })?
            .map_err(|e| Error::Session(e.to_string()))
    }

    /// Checks that the session supports every capability in `capabilities`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingCapability`] naming the first one missing.
    pub fn require_capabilities(&self, capabilities: &[Capability]) -> Result<()> {
        capabilities
            .iter()
            .find(|capability| !self.inner.session.is_capable(**capability))
            .map_or(Ok(()), |capability| {
                Err(Error::MissingCapability(*capability))
            })
    }

    /// Takes the stream of messages delivered directly to the session.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream was already taken.
    pub fn messages(&self) -> Result<MessageStream> {
        self.inner
            .session
            .messages()
            .map_err(|e| Error::Session(e.to_string()))
    }

    /// Binds a consuming flow to `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns an error if the broker refuses the binding.
    pub async fn create_flow(&self, endpoint: &Endpoint, options: FlowOptions) -> Result<S::Flow> {
        self.inner.ensure_open()?;

        self.inner
            .session
            .create_flow(endpoint, options)
            .await
            .map_err(|e| Error::Session(e.to_string()))
    }

    /// Stops event dispatch, fails every pending operation with
    /// [`Error::SessionClosed`] and disconnects the session.
    ///
    /// # Errors
    ///
    /// Returns an error if the session fails to disconnect.
    pub async fn shutdown(&self) -> Result<()> {
        info!("correlation bridge shutting down...");

        self.inner.shutdown_token.cancel();
        self.inner.task_tracker.wait().await;
        self.inner.fail_pending();

        self.inner
            .session
            .disconnect()
            .await
            .map_err(|e| Error::Session(e.to_string()))?;

        info!("correlation bridge shutdown");

        Ok(())
    }

    async fn issue<Fut>(
        &self,
        token: CorrelationToken,
        kind: OperationKind,
        await_event: bool,
        call: Fut,
    ) -> Result<ReturnCode>
    where
        Fut: Future<Output = std::result::Result<ReturnCode, S::Error>> + Send,
    {
        self.inner.ensure_open()?;

        let (completer, pending) = pending_operation();

        // Registered before the call so an early event still finds it.
        let _guard = await_event.then(|| {
            self.inner.pending.insert(
                token,
                Registration {
                    kind,
                    completer: completer.clone(),
                },
            );
            TokenGuard {
                pending: &self.inner.pending,
                token,
            }
        });

        // Registration raced with close: nothing is left to resolve it.
        if self.inner.shutdown_token.is_cancelled() {
            self.inner.pending.remove(&token);
            return Err(Error::SessionClosed);
        }

        match call.await {
            Err(e) => {
                self.inner.pending.remove(&token);
                completer.complete(Err(kind.rejection(e.to_string())));
            }
            Ok(ReturnCode::WouldBlock) => {
                self.inner.pending.remove(&token);
                completer.complete(Err(kind.rejection("broker would block".to_string())));
            }
            Ok(code) if !await_event => {
                completer.complete(Ok(code));
            }
            Ok(code) => trace!("{kind} {token} returned {code:?}, awaiting event"),
        }

        pending.await
    }
}
