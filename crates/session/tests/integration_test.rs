use std::collections::HashSet;
use std::time::Duration;

use assert_matches::assert_matches;
use courier_broker::{
    Bytes, Capability, Confirmation, ConnectionProperties, CorrelationToken, Destination, Endpoint,
    EndpointProperties, OutboundMessage, ProvisionFlags, ReturnCode, SessionEvent, Subscription,
};
use courier_broker_memory::{ConfirmationPolicy, MemoryBroker, MemoryBrokerOptions, MemorySession};
use courier_session::{CorrelationBridge, Error, SessionOptions};
use proptest::prelude::*;
use tokio::time::timeout;

fn properties(vpn: &str) -> ConnectionProperties {
    ConnectionProperties::new("tcp://localhost:55555", vpn, "default", "default")
}

fn manual_broker() -> MemoryBroker {
    MemoryBroker::new(MemoryBrokerOptions {
        confirmation: ConfirmationPolicy::Manual,
        ..Default::default()
    })
}

fn bridge_for(
    broker: &MemoryBroker,
    options: SessionOptions,
) -> (CorrelationBridge<MemorySession>, MemorySession) {
    let session = broker.create_session(properties("default"));
    let bridge = CorrelationBridge::new(session.clone(), options).unwrap();
    (bridge, session)
}

/// Connects through a manual broker by injecting the connect event once the
/// broker call has been made.
async fn connect_manually(bridge: &CorrelationBridge<MemorySession>, session: &MemorySession) {
    let connecting = tokio::spawn({
        let bridge = bridge.clone();
        async move { bridge.connect().await }
    });

    timeout(Duration::from_secs(5), async {
        while !session.is_connected() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("connect never reached the broker");

    session.emit(SessionEvent::ConnectSucceeded);
    assert_eq!(connecting.await.unwrap(), Ok(ReturnCode::Ok));
}

async fn wait_for_sent(session: &MemorySession, count: usize) -> Vec<OutboundMessage> {
    timeout(Duration::from_secs(5), async {
        loop {
            let sent = session.sent();
            if sent.len() >= count {
                return sent;
            }
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("sends never reached the broker")
}

async fn wait_for_confirmation(session: &MemorySession, count: usize) -> CorrelationToken {
    timeout(Duration::from_secs(5), async {
        loop {
            if let Some(token) = session.awaiting_confirmation().get(count - 1) {
                return *token;
            }
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("operation never reached the broker")
}

fn token_of(message: &OutboundMessage) -> Option<CorrelationToken> {
    assert!(message.correlation_token.is_some());
    message.correlation_token
}

fn persistent(topic: &str, payload: &'static str) -> OutboundMessage {
    OutboundMessage::new(Destination::Topic(topic.to_string()), payload).persistent()
}

#[tokio::test]
async fn test_end_to_end_with_manual_confirmation() {
    let _ = tracing_subscriber::fmt::try_init();

    let broker = manual_broker();
    let (bridge, session) = bridge_for(&broker, SessionOptions::default());
    connect_manually(&bridge, &session).await;

    // Acknowledged send.
    let sending = tokio::spawn({
        let bridge = bridge.clone();
        async move { bridge.send(persistent("orders/created", "first")).await }
    });
    let sent = wait_for_sent(&session, 1).await;
    assert_eq!(bridge.pending_operations(), 1);
    session.emit(SessionEvent::OperationAcknowledged {
        token: token_of(&sent[0]),
    });
    assert_eq!(sending.await.unwrap(), Ok(ReturnCode::Ok));

    // Rejected send.
    let sending = tokio::spawn({
        let bridge = bridge.clone();
        async move { bridge.send(persistent("orders/created", "second")).await }
    });
    let sent = wait_for_sent(&session, 2).await;
    session.emit(SessionEvent::OperationRejected {
        token: token_of(&sent[1]),
        info: Some("spool over quota".to_string()),
    });
    assert_eq!(
        sending.await.unwrap(),
        Err(Error::SendRejected("spool over quota".to_string()))
    );

    assert_eq!(bridge.pending_operations(), 0);
    bridge.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_automatic_broker_round_trip() {
    let broker = MemoryBroker::default();
    let (bridge, _session) = bridge_for(&broker, SessionOptions::default());

    assert_eq!(bridge.connect().await, Ok(ReturnCode::Ok));

    let queue = Endpoint::queue("orders");
    let flags = ProvisionFlags {
        ignore_if_exists: false,
        confirmation: Confirmation::Broker,
    };
    bridge
        .provision(&queue, &EndpointProperties::default(), flags)
        .await
        .unwrap();
    assert_matches!(
        bridge
            .provision(&queue, &EndpointProperties::default(), flags)
            .await,
        Err(Error::ProvisionFailure(reason)) if reason.contains("already exists")
    );

    bridge
        .require_capabilities(&[Capability::QueueSubscriptions])
        .unwrap();
    bridge
        .subscribe(
            &Subscription::queue_mapping(queue.clone(), "orders/>"),
            Confirmation::Broker,
        )
        .await
        .unwrap();

    assert_matches!(
        bridge
            .subscribe(
                &Subscription::queue_mapping(Endpoint::queue("missing"), "audit/>"),
                Confirmation::Broker,
            )
            .await,
        Err(Error::SubscribeRejected(reason)) if reason.contains("missing")
    );

    bridge
        .send(persistent("orders/eu/created", "order"))
        .await
        .unwrap();
    assert_eq!(broker.queue_depth("orders"), Some(1));

    assert_matches!(
        bridge
            .send(OutboundMessage::new(Destination::Queue("missing".into()), "x").persistent())
            .await,
        Err(Error::SendRejected(reason)) if reason.contains("missing")
    );

    bridge.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_second_connect_is_rejected() {
    let broker = MemoryBroker::default();
    let (bridge, _session) = bridge_for(&broker, SessionOptions::default());

    bridge.connect().await.unwrap();
    assert_eq!(bridge.connect().await, Err(Error::AlreadyConnected));
}

#[tokio::test]
async fn test_connect_while_connecting_is_rejected() {
    let broker = manual_broker();
    let (bridge, session) = bridge_for(&broker, SessionOptions::default());

    let connecting = tokio::spawn({
        let bridge = bridge.clone();
        async move { bridge.connect().await }
    });
    while !session.is_connected() {
        tokio::task::yield_now().await;
    }

    assert_eq!(bridge.connect().await, Err(Error::ConnectInProgress));

    session.emit(SessionEvent::ConnectFailed {
        info: Some("host unreachable".to_string()),
    });
    assert_eq!(
        connecting.await.unwrap(),
        Err(Error::ConnectFailure("host unreachable".to_string()))
    );
}

#[tokio::test]
async fn test_refused_connect_can_be_retried() {
    let broker = MemoryBroker::default();
    let session = broker.create_session(properties("unknown-vpn"));
    let bridge = CorrelationBridge::new(session, SessionOptions::default()).unwrap();

    assert_matches!(bridge.connect().await, Err(Error::ConnectFailure(_)));
    assert_matches!(bridge.connect().await, Err(Error::ConnectFailure(_)));
}

#[tokio::test]
async fn test_event_of_another_family_does_not_resolve() {
    let broker = manual_broker();
    let (bridge, session) = bridge_for(&broker, SessionOptions::default());
    connect_manually(&bridge, &session).await;

    let mut sending = tokio::spawn({
        let bridge = bridge.clone();
        async move { bridge.send(persistent("a/b", "payload")).await }
    });
    let token = token_of(&wait_for_sent(&session, 1).await[0]);

    session.emit(SessionEvent::SubscribeSucceeded { token });
    assert!(
        timeout(Duration::from_millis(50), &mut sending)
            .await
            .is_err()
    );

    session.emit(SessionEvent::OperationAcknowledged { token });
    assert_eq!(sending.await.unwrap(), Ok(ReturnCode::Ok));
}

#[tokio::test]
async fn test_direct_and_blocking_sends_resolve_immediately() {
    let broker = manual_broker();
    let (bridge, session) = bridge_for(
        &broker,
        SessionOptions {
            send_blocking: true,
            ..Default::default()
        },
    );
    connect_manually(&bridge, &session).await;

    let direct = OutboundMessage::new(Destination::Topic("a/b".into()), "direct");
    assert_eq!(bridge.send(direct).await, Ok(ReturnCode::Ok));
    assert_eq!(bridge.send(persistent("a/b", "blocking")).await, Ok(ReturnCode::Ok));
    assert_eq!(bridge.pending_operations(), 0);

    // A late acknowledgement for an already resolved send is dropped.
    let sent = session.sent();
    session.emit(SessionEvent::OperationAcknowledged {
        token: token_of(&sent[1]),
    });
}

#[tokio::test]
async fn test_local_confirmation_does_not_wait_for_broker() {
    let broker = manual_broker();
    let (bridge, session) = bridge_for(&broker, SessionOptions::default());
    connect_manually(&bridge, &session).await;

    let flags = ProvisionFlags {
        ignore_if_exists: true,
        confirmation: Confirmation::Local,
    };
    assert_eq!(
        bridge
            .provision(&Endpoint::queue("q"), &EndpointProperties::default(), flags)
            .await,
        Ok(ReturnCode::Ok)
    );
    assert_eq!(
        bridge
            .subscribe(&Subscription::topic("a/*"), Confirmation::Local)
            .await,
        Ok(ReturnCode::Ok)
    );
    assert_eq!(bridge.pending_operations(), 0);
}

#[tokio::test]
async fn test_shutdown_fails_pending_operations() {
    let broker = manual_broker();
    let (bridge, session) = bridge_for(&broker, SessionOptions::default());
    connect_manually(&bridge, &session).await;

    let sending = tokio::spawn({
        let bridge = bridge.clone();
        async move { bridge.send(persistent("a/b", "payload")).await }
    });
    wait_for_sent(&session, 1).await;

    bridge.shutdown().await.unwrap();
    assert_eq!(sending.await.unwrap(), Err(Error::SessionClosed));
    assert!(!session.is_connected());
    assert_eq!(
        bridge.send(persistent("a/b", "late")).await,
        Err(Error::SessionClosed)
    );
}

#[tokio::test]
async fn test_operations_fail_once_event_stream_ends() {
    let broker = MemoryBroker::default();
    let (bridge, session) = bridge_for(&broker, SessionOptions::default());
    bridge.connect().await.unwrap();

    session.close_events();

    let sending = timeout(
        Duration::from_secs(5),
        bridge.send(persistent("orders/created", "lost")),
    )
    .await
    .expect("send outlived the event stream");
    assert_eq!(sending, Err(Error::SessionClosed));

    assert_eq!(
        bridge.send(persistent("orders/created", "later")).await,
        Err(Error::SessionClosed)
    );
    assert_eq!(
        bridge
            .subscribe(&Subscription::topic("orders/>"), Confirmation::Broker)
            .await,
        Err(Error::SessionClosed)
    );
    assert_eq!(
        bridge
            .provision(
                &Endpoint::queue("orders"),
                &EndpointProperties::default(),
                ProvisionFlags::default()
            )
            .await,
        Err(Error::SessionClosed)
    );
    assert_eq!(bridge.connect().await, Err(Error::SessionClosed));
    assert_eq!(bridge.pending_operations(), 0);

    bridge.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_operations_racing_shutdown_all_resolve() {
    let broker = manual_broker();
    let (bridge, session) = bridge_for(&broker, SessionOptions::default());
    connect_manually(&bridge, &session).await;

    let handles: Vec<_> = (0..64)
        .map(|index| {
            let bridge = bridge.clone();
            tokio::spawn(async move {
                bridge
                    .send(persistent(&format!("race/{index}"), "payload"))
                    .await
            })
        })
        .collect();
    bridge.shutdown().await.unwrap();

    for handle in handles {
        let result = timeout(Duration::from_secs(5), handle)
            .await
            .expect("send outlived shutdown")
            .unwrap();
        assert_eq!(result, Err(Error::SessionClosed));
    }
    assert_eq!(bridge.pending_operations(), 0);
}

#[tokio::test]
async fn test_connect_resolves_once_across_transport_retries() {
    let broker = MemoryBroker::default();
    broker.fail_connect_attempts(2);
    let (bridge, session) = bridge_for(&broker, SessionOptions::default());

    assert_eq!(bridge.connect().await, Ok(ReturnCode::Ok));
    assert!(session.is_connected());
    assert_eq!(bridge.connect().await, Err(Error::AlreadyConnected));
}

#[tokio::test]
async fn test_rejected_subscription_reports_broker_diagnostic() {
    let broker = manual_broker();
    let (bridge, session) = bridge_for(&broker, SessionOptions::default());
    connect_manually(&bridge, &session).await;

    let subscribing = tokio::spawn({
        let bridge = bridge.clone();
        async move {
            bridge
                .subscribe(&Subscription::topic("audit/>"), Confirmation::Broker)
                .await
        }
    });
    let token = wait_for_confirmation(&session, 1).await;
    assert_eq!(bridge.pending_operations(), 1);

    session.emit(SessionEvent::SubscribeFailed {
        token: Some(token),
        info: Some("subscription limit reached".to_string()),
    });
    assert_eq!(
        subscribing.await.unwrap(),
        Err(Error::SubscribeRejected(
            "subscription limit reached".to_string()
        ))
    );
    assert_eq!(bridge.pending_operations(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_request_times_out_without_reply() {
    let broker = MemoryBroker::default();
    let (bridge, _session) = bridge_for(&broker, SessionOptions::default());
    bridge.connect().await.unwrap();

    let request = OutboundMessage::new(Destination::Topic("nobody/home".into()), "ping");
    assert_eq!(
        bridge.request(request, Duration::from_secs(2)).await,
        Err(Error::OperationTimeout(Duration::from_secs(2)))
    );
}

#[tokio::test]
async fn test_request_receives_reply() {
    let broker = MemoryBroker::default();
    broker.register_replier("time/now", |_| Bytes::from_static(b"12:00"));
    let (bridge, _session) = bridge_for(&broker, SessionOptions::default());
    bridge.connect().await.unwrap();

    let reply = bridge
        .request(
            OutboundMessage::new(Destination::Topic("time/now".into()), "?"),
            Duration::from_secs(1),
        )
        .await
        .unwrap();
    assert_eq!(reply.payload, "12:00");
}

#[tokio::test]
async fn test_missing_capability_is_reported() {
    let broker = MemoryBroker::new(MemoryBrokerOptions {
        capabilities: HashSet::from([Capability::PubGuaranteed, Capability::SubFlowGuaranteed]),
        ..Default::default()
    });
    let (bridge, _session) = bridge_for(&broker, SessionOptions::default());

    assert_eq!(
        bridge.require_capabilities(&[
            Capability::PubGuaranteed,
            Capability::QueueSubscriptions,
            Capability::EndpointManagement,
        ]),
        Err(Error::MissingCapability(Capability::QueueSubscriptions))
    );
}

#[tokio::test]
async fn test_direct_messages_reach_subscriber() {
    use futures::StreamExt;

    let broker = MemoryBroker::default();
    let (bridge, _session) = bridge_for(&broker, SessionOptions::default());
    bridge.connect().await.unwrap();

    let mut messages = bridge.messages().unwrap();
    bridge
        .subscribe(&Subscription::topic("chat/>"), Confirmation::Broker)
        .await
        .unwrap();
    bridge
        .send(OutboundMessage::new(
            Destination::Topic("chat/room/1".into()),
            "hello",
        ))
        .await
        .unwrap();

    let received = timeout(Duration::from_secs(1), messages.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received.payload, "hello");
}

fn outcomes_and_order() -> impl Strategy<Value = (Vec<bool>, Vec<usize>)> {
    (1usize..24).prop_flat_map(|count| {
        (
            proptest::collection::vec(any::<bool>(), count),
            Just((0..count).collect::<Vec<_>>()).prop_shuffle(),
        )
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn concurrent_sends_resolve_by_their_own_token((outcomes, order) in outcomes_and_order()) {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async move {
            let broker = manual_broker();
            let (bridge, session) = bridge_for(&broker, SessionOptions::default());
            connect_manually(&bridge, &session).await;

            let handles: Vec<_> = (0..outcomes.len())
                .map(|index| {
                    let bridge = bridge.clone();
                    tokio::spawn(async move {
                        let topic = format!("sends/{index}");
                        bridge
                            .send(OutboundMessage::new(Destination::Topic(topic), "x").persistent())
                            .await
                    })
                })
                .collect();

            let sent = wait_for_sent(&session, outcomes.len()).await;

            for index in order {
                let destination = Destination::Topic(format!("sends/{index}"));
                let message = sent
                    .iter()
                    .find(|message| message.destination == destination)
                    .unwrap();
                let token = token_of(message);
                if outcomes[index] {
                    session.emit(SessionEvent::OperationAcknowledged { token });
                } else {
                    session.emit(SessionEvent::OperationRejected {
                        token,
                        info: Some(format!("rejected {index}")),
                    });
                }
            }

            for (index, handle) in handles.into_iter().enumerate() {
                let result = timeout(Duration::from_secs(5), handle)
                    .await
                    .unwrap()
                    .unwrap();
                if outcomes[index] {
                    assert_eq!(result, Ok(ReturnCode::Ok));
                } else {
                    assert_eq!(result, Err(Error::SendRejected(format!("rejected {index}"))));
                }
            }

            assert_eq!(bridge.pending_operations(), 0);
        });
    }
}
