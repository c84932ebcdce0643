use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Instant;

use bytes::Bytes;
use courier_broker::{
    AccessType, AckMode, DeliveryId, DeliveryWindow, Destination, EndpointProperties,
    InFlightMessage, ReceivedMessage, topic_matches,
};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::error::Error;

/// A message held on a queue, waiting for a flow with room.
#[derive(Clone, Debug)]
pub struct SpooledMessage {
    pub destination: Destination,
    pub payload: Bytes,
    pub redelivered: bool,
}

#[derive(Debug)]
pub struct QueueState {
    properties: EndpointProperties,
    messages: VecDeque<SpooledMessage>,
    mapped_topics: Vec<String>,
    flows: Vec<u64>,
}

#[derive(Debug)]
pub struct FlowState {
    queue: String,
    window: DeliveryWindow,
    ack_mode: AckMode,
    started: bool,
    // Ordered by delivery id so redelivery keeps the original order.
    outstanding: BTreeMap<DeliveryId, SpooledMessage>,
    max_outstanding: usize,
    acknowledged: Vec<DeliveryId>,
    sender: mpsc::UnboundedSender<InFlightMessage>,
}

#[derive(Debug)]
struct TopicSubscriber {
    session_id: u64,
    pattern: String,
    sender: mpsc::UnboundedSender<ReceivedMessage>,
}

/// Everything the broker spools and routes, guarded by one lock.
#[derive(Debug, Default)]
pub struct BrokerState {
    queues: HashMap<String, QueueState>,
    flows: HashMap<u64, FlowState>,
    topic_subscribers: Vec<TopicSubscriber>,
    next_flow_id: u64,
    next_delivery_id: u64,
}

/// Snapshot of one flow's bookkeeping.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FlowSnapshot {
    /// Messages pushed and not yet acknowledged.
    pub outstanding: usize,
    /// Highest outstanding count ever observed.
    pub max_outstanding: usize,
    /// Acknowledged delivery ids, in acknowledgement order.
    pub acknowledged: Vec<DeliveryId>,
}

impl BrokerState {
    pub fn queue_depth(&self, name: &str) -> Option<usize> {
        self.queues.get(name).map(|queue| queue.messages.len())
    }

    pub fn provision(
        &mut self,
        name: &str,
        properties: &EndpointProperties,
        ignore_if_exists: bool,
    ) -> Result<(), Error> {
        if self.queues.contains_key(name) {
            if ignore_if_exists {
                debug!("queue {name} already exists, ignoring");
                return Ok(());
            }
            return Err(Error::QueueExists(name.to_string()));
        }

        self.queues.insert(
            name.to_string(),
            QueueState {
                properties: properties.clone(),
                messages: VecDeque::new(),
                mapped_topics: Vec::new(),
                flows: Vec::new(),
            },
        );
        debug!("provisioned queue {name}");

        Ok(())
    }

    pub fn map_topic(&mut self, queue: &str, topic: &str) -> Result<(), Error> {
        let queue_state = self
            .queues
            .get_mut(queue)
            .ok_or_else(|| Error::QueueNotFound(queue.to_string()))?;

        if !queue_state.mapped_topics.iter().any(|t| t == topic) {
            queue_state.mapped_topics.push(topic.to_string());
        }

        Ok(())
    }

    pub fn add_topic_subscriber(
        &mut self,
        session_id: u64,
        pattern: &str,
        sender: mpsc::UnboundedSender<ReceivedMessage>,
    ) {
        self.topic_subscribers.push(TopicSubscriber {
            session_id,
            pattern: pattern.to_string(),
            sender,
        });
    }

    pub fn remove_topic_subscribers(&mut self, session_id: u64) {
        self.topic_subscribers
            .retain(|subscriber| subscriber.session_id != session_id);
    }

    /// Delivers a message to every direct subscriber whose pattern matches.
    pub fn deliver_direct(&mut self, topic: &str, payload: &Bytes) -> usize {
        let mut delivered = 0;

        self.topic_subscribers.retain(|subscriber| {
            if !topic_matches(&subscriber.pattern, topic) {
                return true;
            }
            let message = ReceivedMessage {
                destination: Destination::Topic(topic.to_string()),
                payload: payload.clone(),
            };
            if subscriber.sender.send(message).is_ok() {
                delivered += 1;
                true
            } else {
                false
            }
        });

        delivered
    }

    /// Spools a guaranteed message to a queue.
    pub fn spool_to_queue(&mut self, name: &str, payload: &Bytes) -> Result<(), Error> {
        let queue = self
            .queues
            .get_mut(name)
            .ok_or_else(|| Error::QueueNotFound(name.to_string()))?;

        if let Some(max) = queue.properties.max_message_size.filter(|max| payload.len() > *max) {
            return Err(Error::MessageTooLarge {
                queue: name.to_string(),
                size: payload.len(),
                max,
            });
        }

        queue.messages.push_back(SpooledMessage {
            destination: Destination::Queue(name.to_string()),
            payload: payload.clone(),
            redelivered: false,
        });
        self.pump(name);

        Ok(())
    }

    /// Spools a guaranteed message to every queue mapped to `topic`.
    pub fn spool_to_topic(&mut self, topic: &str, payload: &Bytes) -> usize {
        let matching: Vec<String> = self
            .queues
            .iter()
            .filter(|(_, queue)| {
                queue
                    .mapped_topics
                    .iter()
                    .any(|pattern| topic_matches(pattern, topic))
            })
            .map(|(name, _)| name.clone())
            .collect();

        for name in &matching {
            if let Some(queue) = self.queues.get_mut(name) {
                queue.messages.push_back(SpooledMessage {
                    destination: Destination::Topic(topic.to_string()),
                    payload: payload.clone(),
                    redelivered: false,
                });
            }
            self.pump(name);
        }

        matching.len()
    }

    pub fn bind_flow(
        &mut self,
        queue: &str,
        window: DeliveryWindow,
        ack_mode: AckMode,
        sender: mpsc::UnboundedSender<InFlightMessage>,
    ) -> Result<u64, Error> {
        let queue_state = self
            .queues
            .get_mut(queue)
            .ok_or_else(|| Error::QueueNotFound(queue.to_string()))?;

        if queue_state.properties.access_type == AccessType::Exclusive
            && !queue_state.flows.is_empty()
        {
            return Err(Error::QueueInUse(queue.to_string()));
        }

        let flow_id = self.next_flow_id;
        self.next_flow_id += 1;

        queue_state.flows.push(flow_id);
        self.flows.insert(
            flow_id,
            FlowState {
                queue: queue.to_string(),
                window,
                ack_mode,
                started: false,
                outstanding: BTreeMap::new(),
                max_outstanding: 0,
                acknowledged: Vec::new(),
                sender,
            },
        );
        debug!("bound flow {flow_id} to queue {queue} with window {}", window.capacity());

        Ok(flow_id)
    }

    pub fn set_started(&mut self, flow_id: u64, started: bool) -> Result<(), Error> {
        let flow = self.flows.get_mut(&flow_id).ok_or(Error::FlowClosed)?;
        flow.started = started;

        if started {
            let queue = flow.queue.clone();
            self.pump(&queue);
        }

        Ok(())
    }

    pub fn ack(&mut self, flow_id: u64, delivery_id: DeliveryId) -> Result<(), Error> {
        let flow = self.flows.get_mut(&flow_id).ok_or(Error::FlowClosed)?;

        if flow.ack_mode == AckMode::Auto {
            return Ok(());
        }

        flow.outstanding
            .remove(&delivery_id)
            .ok_or(Error::UnknownDelivery(delivery_id))?;
        flow.acknowledged.push(delivery_id);
        trace!("flow {flow_id} acknowledged {delivery_id}");

        let queue = flow.queue.clone();
        self.pump(&queue);

        Ok(())
    }

    /// Unbinds a flow, returning its unacknowledged messages to the head of
    /// the queue for redelivery.
    pub fn close_flow(&mut self, flow_id: u64) {
        let Some(flow) = self.flows.remove(&flow_id) else {
            return;
        };

        let Some(queue) = self.queues.get_mut(&flow.queue) else {
            return;
        };
        queue.flows.retain(|id| *id != flow_id);

        let returned = flow.outstanding.len();
        for (_, mut message) in flow.outstanding.into_iter().rev() {
            message.redelivered = true;
            queue.messages.push_front(message);
        }
        debug!(
            "closed flow {flow_id} on queue {}, {returned} message(s) returned for redelivery",
            flow.queue
        );

        self.pump(&flow.queue);
    }

    pub fn flow_snapshot(&self, flow_id: u64) -> Option<FlowSnapshot> {
        self.flows.get(&flow_id).map(|flow| FlowSnapshot {
            outstanding: flow.outstanding.len(),
            max_outstanding: flow.max_outstanding,
            acknowledged: flow.acknowledged.clone(),
        })
    }

    /// Pushes queued messages to started flows while their windows have room.
    fn pump(&mut self, name: &str) {
        let Self {
            queues,
            flows,
            next_delivery_id,
            ..
        } = self;

        let Some(queue) = queues.get_mut(name) else {
            return;
        };

        while !queue.messages.is_empty() {
            let Some(flow_id) = queue.flows.iter().copied().find(|id| {
                flows
                    .get(id)
                    .is_some_and(|flow| flow.started && flow.window.has_room(flow.outstanding.len()))
            }) else {
                break;
            };
            let Some(flow) = flows.get_mut(&flow_id) else {
                break;
            };
            let Some(message) = queue.messages.pop_front() else {
                break;
            };

            let delivery_id = DeliveryId::new(*next_delivery_id);
            *next_delivery_id += 1;

            let in_flight = InFlightMessage {
                payload: message.payload.clone(),
                delivery_id,
                received_at: Instant::now(),
                destination: message.destination.clone(),
                redelivered: message.redelivered,
            };

            if flow.sender.send(in_flight).is_err() {
                warn!("flow {flow_id} is no longer receiving, stopping it");
                queue.messages.push_front(message);
                flow.started = false;
                continue;
            }

            if flow.ack_mode == AckMode::Client {
                flow.outstanding.insert(delivery_id, message);
                flow.max_outstanding = flow.max_outstanding.max(flow.outstanding.len());
            }
            trace!("pushed {delivery_id} from queue {name} to flow {flow_id}");
        }
    }
}
