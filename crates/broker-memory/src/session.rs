use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use courier_broker::{
    Capability, ConnectionProperties, CorrelationToken, Destination, Endpoint,
    EndpointProperties, EventStream, FlowOptions, MessageStream, OutboundMessage,
    ReceivedMessage, ReturnCode, Session, SessionEvent, Subscription,
};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, trace, warn};

use crate::error::Error;
use crate::flow::MemoryFlow;
use crate::{ConfirmationPolicy, MemoryBroker};

#[derive(Debug)]
struct SessionShared {
    broker: MemoryBroker,
    id: u64,
    properties: ConnectionProperties,
    connected: AtomicBool,
    events_tx: Mutex<Option<mpsc::UnboundedSender<SessionEvent>>>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<SessionEvent>>>,
    messages_tx: mpsc::UnboundedSender<ReceivedMessage>,
    messages_rx: Mutex<Option<mpsc::UnboundedReceiver<ReceivedMessage>>>,
    sent: Mutex<Vec<OutboundMessage>>,
    awaiting: Mutex<Vec<CorrelationToken>>,
}

/// A session on a [`MemoryBroker`].
#[derive(Clone, Debug)]
pub struct MemorySession {
    shared: Arc<SessionShared>,
}

impl MemorySession {
    pub(crate) fn new(broker: MemoryBroker, id: u64, properties: ConnectionProperties) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (messages_tx, messages_rx) = mpsc::unbounded_channel();

        Self {
            shared: Arc::new(SessionShared {
                broker,
                id,
                properties,
                connected: AtomicBool::new(false),
                events_tx: Mutex::new(Some(events_tx)),
                events_rx: Mutex::new(Some(events_rx)),
                messages_tx,
                messages_rx: Mutex::new(Some(messages_rx)),
                sent: Mutex::new(Vec::new()),
                awaiting: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Pushes an event onto the session's event stream as if the broker had
    /// raised it.
    pub fn emit(&self, event: SessionEvent) {
        trace!("session {} emitting {:?}", self.shared.id, event.kind());
        let sent = self
            .shared
            .events_tx
            .lock()
            .as_ref()
            .is_some_and(|events| events.send(event).is_ok());
        if !sent {
            debug!("session {} event stream closed, event dropped", self.shared.id);
        }
    }

    /// Ends the session's event stream as if the broker had torn the session
    /// down. Later events are dropped.
    pub fn close_events(&self) {
        if self.shared.events_tx.lock().take().is_some() {
            info!("session {} event stream closed", self.shared.id);
        }
    }

    /// Every message accepted by `send`, in call order.
    #[must_use]
    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.shared.sent.lock().clone()
    }

    /// Tokens of operations left for the test to confirm with [`emit`], in
    /// call order. Only filled under [`ConfirmationPolicy::Manual`].
    ///
    /// [`emit`]: Self::emit
    #[must_use]
    pub fn awaiting_confirmation(&self) -> Vec<CorrelationToken> {
        self.shared.awaiting.lock().clone()
    }

    /// Whether the session is currently connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    fn automatic(&self) -> bool {
        self.shared.broker.options().confirmation == ConfirmationPolicy::Automatic
    }

    fn ensure_connected(&self) -> Result<(), Error> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }

    fn ensure_capable(&self, capability: Capability) -> Result<(), Error> {
        if self.is_capable(capability) {
            Ok(())
        } else {
            Err(Error::MissingCapability(capability))
        }
    }

    /// Reaches the broker, retrying failed attempts up to the session's
    /// `connect_retries`. Each retry is reported as a notice.
    fn reach(&self) -> Result<(), Error> {
        let properties = &self.shared.properties;
        let retries = properties.connect_retries;

        for attempt in 0..=retries {
            if !self.shared.broker.take_connect_failure() {
                return Ok(());
            }
            if attempt < retries {
                warn!(
                    "session {} could not reach {}, retrying ({} of {retries})",
                    self.shared.id,
                    properties.host,
                    attempt + 1
                );
                self.emit(SessionEvent::Notice {
                    info: format!(
                        "reconnecting to {} ({} of {retries})",
                        properties.host,
                        attempt + 1
                    ),
                });
            }
        }

        Err(Error::Unreachable(properties.host.clone()))
    }

    fn check_login(&self) -> Result<(), Error> {
        let options = self.shared.broker.options();
        let properties = &self.shared.properties;

        if properties.vpn != options.vpn_name {
            return Err(Error::ConnectRefused(format!(
                "unknown message VPN {}",
                properties.vpn
            )));
        }

        let refused = options.credentials.as_ref().is_some_and(|(user_name, password)| {
            &properties.user_name != user_name || &properties.password != password
        });
        if refused {
            return Err(Error::ConnectRefused(format!(
                "authentication failed for {}",
                properties.user_name
            )));
        }

        Ok(())
    }

    /// Turns the outcome of a tokened operation into its immediate return
    /// code, emitting the matching event when confirmations are automatic.
    fn finish(
        &self,
        token: Option<CorrelationToken>,
        result: Result<(), Error>,
        succeeded: impl FnOnce(Option<CorrelationToken>) -> SessionEvent,
        failed: impl FnOnce(Option<CorrelationToken>, Option<String>) -> SessionEvent,
    ) -> Result<ReturnCode, Error> {
        if token.is_none() {
            return result.map(|()| ReturnCode::Ok);
        }

        if self.automatic() {
            let event = match result {
                Ok(()) => succeeded(token),
                Err(error) => failed(token, Some(error.to_string())),
            };
            self.emit(event);
        } else {
            if let Err(error) = result {
                debug!("operation {token:?} failed, awaiting injected event: {error}");
            }
            self.hold(token);
        }

        Ok(ReturnCode::InProgress)
    }

    fn hold(&self, token: Option<CorrelationToken>) {
        if let Some(token) = token {
            self.shared.awaiting.lock().push(token);
        }
    }

    fn route(&self, message: &OutboundMessage) -> Result<(), Error> {
        let mut state = self.shared.broker.state();

        match (&message.destination, message.delivery_mode.is_guaranteed()) {
            (Destination::Queue(name), _) => state.spool_to_queue(name, &message.payload),
            (Destination::Topic(topic), true) => {
                let spooled = state.spool_to_topic(topic, &message.payload);
                let delivered = state.deliver_direct(topic, &message.payload);
                trace!("{topic}: spooled to {spooled} queue(s), delivered to {delivered} subscriber(s)");
                Ok(())
            }
            (Destination::Topic(topic), false) => {
                let delivered = state.deliver_direct(topic, &message.payload);
                trace!("{topic}: delivered to {delivered} subscriber(s)");
                Ok(())
            }
        }
    }
}

#[async_trait]
impl Session for MemorySession {
    type Error = Error;
    type Flow = MemoryFlow;

    fn events(&self) -> Result<EventStream, Self::Error> {
        let receiver = self
            .shared
            .events_rx
            .lock()
            .take()
            .ok_or(Error::StreamTaken("event"))?;

        Ok(Box::pin(UnboundedReceiverStream::new(receiver)))
    }

    fn messages(&self) -> Result<MessageStream, Self::Error> {
        let receiver = self
            .shared
            .messages_rx
            .lock()
            .take()
            .ok_or(Error::StreamTaken("message"))?;

        Ok(Box::pin(UnboundedReceiverStream::new(receiver)))
    }

    fn is_capable(&self, capability: Capability) -> bool {
        self.shared
            .broker
            .options()
            .capabilities
            .contains(&capability)
    }

    async fn connect(&self) -> Result<ReturnCode, Self::Error> {
        let result = self.reach().and_then(|()| self.check_login());

        if !self.automatic() {
            result?;
            self.shared.connected.store(true, Ordering::SeqCst);
            return Ok(ReturnCode::InProgress);
        }

        match result {
            Ok(()) => {
                self.shared.connected.store(true, Ordering::SeqCst);
                info!(
                    "session {} connected to {} on vpn {}",
                    self.shared.id, self.shared.properties.host, self.shared.properties.vpn
                );
                self.emit(SessionEvent::ConnectSucceeded);
                Ok(ReturnCode::Ok)
            }
            Err(error) => {
                warn!("session {} connect failed: {error}", self.shared.id);
                self.emit(SessionEvent::ConnectFailed {
                    info: Some(error.to_string()),
                });
                Err(error)
            }
        }
    }

    async fn send(&self, message: OutboundMessage) -> Result<ReturnCode, Self::Error> {
        self.ensure_connected()?;

        let guaranteed = message.delivery_mode.is_guaranteed();
        if guaranteed {
            self.ensure_capable(Capability::PubGuaranteed)?;
        }

        self.shared.sent.lock().push(message.clone());
        let result = self.route(&message);

        if !guaranteed {
            return result.map(|()| ReturnCode::Ok);
        }

        if self.automatic() {
            let token = message.correlation_token;
            let event = match result {
                Ok(()) => SessionEvent::OperationAcknowledged { token },
                Err(error) => SessionEvent::OperationRejected {
                    token,
                    info: Some(error.to_string()),
                },
            };
            self.emit(event);
        } else {
            self.hold(message.correlation_token);
        }

        Ok(ReturnCode::Ok)
    }

    async fn subscribe(
        &self,
        subscription: &Subscription,
        token: Option<CorrelationToken>,
    ) -> Result<ReturnCode, Self::Error> {
        self.ensure_connected()?;

        let result = match subscription {
            Subscription::Topic(pattern) => {
                self.shared.broker.state().add_topic_subscriber(
                    self.shared.id,
                    pattern,
                    self.shared.messages_tx.clone(),
                );
                Ok(())
            }
            Subscription::QueueMapping { queue, topic } => {
                self.ensure_capable(Capability::QueueSubscriptions)?;
                self.shared.broker.state().map_topic(queue.name(), topic)
            }
        };
        debug!("session {} subscribe to {}: {result:?}", self.shared.id, subscription.pattern());

        self.finish(
            token,
            result,
            |token| SessionEvent::SubscribeSucceeded { token },
            |token, info| SessionEvent::SubscribeFailed { token, info },
        )
    }

    async fn provision(
        &self,
        endpoint: &Endpoint,
        properties: &EndpointProperties,
        ignore_if_exists: bool,
        token: Option<CorrelationToken>,
    ) -> Result<ReturnCode, Self::Error> {
        self.ensure_connected()?;
        self.ensure_capable(Capability::EndpointManagement)?;

        let result = self
            .shared
            .broker
            .state()
            .provision(endpoint.name(), properties, ignore_if_exists);

        self.finish(
            token,
            result,
            |token| SessionEvent::ProvisionSucceeded { token },
            |token, info| SessionEvent::ProvisionFailed { token, info },
        )
    }

    async fn request(&self, message: OutboundMessage) -> Result<ReceivedMessage, Self::Error> {
        self.ensure_connected()?;

        let topic = match &message.destination {
            Destination::Topic(topic) | Destination::Queue(topic) => topic.clone(),
        };
        let request = ReceivedMessage {
            destination: message.destination,
            payload: message.payload,
        };

        let Some(replier) = self.shared.broker.replier(&topic) else {
            debug!("no replier on {topic}, request will not be answered");
            return futures::future::pending().await;
        };

        Ok(ReceivedMessage {
            destination: Destination::Topic(format!("{topic}/reply")),
            payload: replier(&request),
        })
    }

    async fn create_flow(
        &self,
        endpoint: &Endpoint,
        options: FlowOptions,
    ) -> Result<Self::Flow, Self::Error> {
        self.ensure_connected()?;
        self.ensure_capable(Capability::SubFlowGuaranteed)?;

        MemoryFlow::bind(self.shared.broker.clone(), endpoint.name(), options)
    }

    async fn disconnect(&self) -> Result<(), Self::Error> {
        if self.shared.connected.swap(false, Ordering::SeqCst) {
            self.shared
                .broker
                .state()
                .remove_topic_subscribers(self.shared.id);
            info!("session {} disconnected", self.shared.id);
        }

        Ok(())
    }
}
