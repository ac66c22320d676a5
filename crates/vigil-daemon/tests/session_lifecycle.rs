//! End-to-end agent session tests over an in-process transport pair.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::time::timeout;
use vigil_core::{Check, CheckRequest, Entity, Event, Namespace, ObjectMeta};
use vigil_daemon::agentd::{JsonCodec, Session, SessionConfig, SessionError};
use vigil_daemon::messaging::{
    subscription_topic, BusMessage, InMemoryBus, Mailbox, MessageBus, RingRouter, RouteOutcome,
    TOPIC_EVENT_RAW, TOPIC_KEEPALIVE,
};
use vigil_daemon::metrics::{BackendMetrics, MetricsRegistry};
use vigil_daemon::ring::{ring_path, Pool};
use vigil_daemon::store::kv::MemoryKv;
use vigil_daemon::store::{EntityStore, MemoryStore, NamespaceStore};
use vigil_daemon::transport::{
    ChannelTransport, Transport, TransportMessage, TYPE_CHECK_REQUEST, TYPE_EVENT, TYPE_KEEPALIVE,
};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

struct Backend {
    store: Arc<MemoryStore>,
    bus: Arc<InMemoryBus>,
    pool: Arc<Pool>,
    metrics: Arc<BackendMetrics>,
}

impl Backend {
    async fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        store
            .create_namespace(&Namespace::new("default"))
            .await
            .unwrap();
        Self {
            store,
            bus: Arc::new(InMemoryBus::new()),
            pool: Arc::new(Pool::new(
                Arc::new(MemoryKv::new()),
                Duration::from_secs(120),
            )),
            metrics: MetricsRegistry::new().unwrap().backend_metrics(),
        }
    }

    /// Builds and starts a session for an agent, returning the agent
    /// side of the transport.
    async fn connect_agent(&self, name: &str, subscriptions: &[&str]) -> (ChannelTransport, Arc<Session>) {
        let (agent, backend) = ChannelTransport::pair();
        let session = Session::new(
            SessionConfig {
                namespace: "default".into(),
                agent_name: name.into(),
                agent_addr: "127.0.0.1:0".into(),
                user: "agent".into(),
                subscriptions: subscriptions.iter().map(ToString::to_string).collect(),
                content_type: "application/json".into(),
            },
            Arc::new(backend),
            self.bus.clone(),
            self.store.clone(),
            Arc::clone(&self.pool),
            Arc::new(JsonCodec),
            Arc::clone(&self.metrics),
        )
        .await
        .unwrap();
        session.start().await.unwrap();
        (agent, session)
    }

    async fn observe(&self, topic: &str) -> Arc<Mailbox> {
        let mailbox = Mailbox::new(16);
        self.bus
            .subscribe(topic, "observer", Arc::clone(&mailbox))
            .await
            .unwrap();
        mailbox
    }
}

fn keepalive_frame(entity_name: &str, timestamp: i64, subscriptions: &[&str]) -> TransportMessage {
    let event = Event {
        timestamp,
        entity: Some(Entity {
            metadata: ObjectMeta::new(entity_name, "default"),
            subscriptions: subscriptions.iter().map(ToString::to_string).collect(),
            ..Entity::default()
        }),
        check: None,
        metrics: None,
    };
    TransportMessage::new(
        TYPE_KEEPALIVE,
        Bytes::from(serde_json::to_vec(&event).unwrap()),
    )
}

#[tokio::test]
async fn keepalive_happy_path() {
    let backend = Backend::new().await;
    let observed = backend.observe(TOPIC_KEEPALIVE).await;
    let (agent, session) = backend.connect_agent("srv-1", &["linux"]).await;
    assert_eq!(backend.metrics.active_sessions("default"), 1.0);

    agent
        .send(keepalive_frame("srv-1", 1_700_000_000, &["linux"]))
        .await
        .unwrap();

    let published = timeout(RECV_TIMEOUT, observed.recv()).await.unwrap().unwrap();
    let BusMessage::Event(event) = published else {
        panic!("expected an event on the keepalive topic");
    };
    assert_eq!(event.timestamp, 1_700_000_000);
    let entity = event.entity.expect("keepalive carries its entity");
    assert_eq!(
        entity.subscriptions,
        vec!["linux".to_string(), "entity:srv-1".to_string()]
    );

    session.stop().await;
}

#[tokio::test]
async fn unknown_namespace_is_rejected_without_side_effects() {
    let backend = Backend::new().await;
    let (_agent, conn) = ChannelTransport::pair();

    let result = Session::new(
        SessionConfig {
            namespace: "ghost".into(),
            agent_name: "srv-1".into(),
            subscriptions: vec!["linux".into()],
            ..SessionConfig::default()
        },
        Arc::new(conn),
        backend.bus.clone(),
        backend.store.clone(),
        Arc::clone(&backend.pool),
        Arc::new(JsonCodec),
        Arc::clone(&backend.metrics),
    )
    .await;

    assert!(matches!(result, Err(SessionError::NamespaceNotFound(_))));
    // No gauge increment, no bus subscription, no ring membership.
    assert_eq!(backend.metrics.active_sessions("ghost"), 0.0);
    assert_eq!(
        backend
            .bus
            .subscriber_count(&subscription_topic("ghost", "linux")),
        0
    );
    let ring = backend.pool.get(&ring_path("ghost", "linux"));
    assert_eq!(ring.next().await.unwrap(), None);
}

#[tokio::test]
async fn check_requests_dispatch_round_robin() {
    let backend = Backend::new().await;
    let (agent_a, session_a) = backend.connect_agent("a", &["web"]).await;
    let (agent_b, session_b) = backend.connect_agent("b", &["web"]).await;

    let router = RingRouter::new(
        backend.bus.clone(),
        Arc::clone(&backend.pool),
        Arc::clone(&backend.metrics),
    );
    let request = CheckRequest {
        config: Some(Check {
            metadata: ObjectMeta::new("check-cpu", "default"),
            ..Check::default()
        }),
        ..CheckRequest::default()
    };

    let first = router
        .route("default", "web", request.clone())
        .await
        .unwrap();
    assert_eq!(first, RouteOutcome::Delivered { agent: "a".into() });
    let frame = timeout(RECV_TIMEOUT, agent_a.receive())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(frame.message_type, TYPE_CHECK_REQUEST);
    let delivered: CheckRequest = serde_json::from_slice(&frame.payload).unwrap();
    assert_eq!(delivered, request);

    // The second publish rotates to the other agent.
    let second = router
        .route("default", "web", request.clone())
        .await
        .unwrap();
    assert_eq!(second, RouteOutcome::Delivered { agent: "b".into() });
    let frame = timeout(RECV_TIMEOUT, agent_b.receive())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(frame.message_type, TYPE_CHECK_REQUEST);

    session_a.stop().await;
    session_b.stop().await;
}

#[tokio::test]
async fn events_with_proxy_entities_are_rewritten() {
    let backend = Backend::new().await;
    let observed = backend.observe(TOPIC_EVENT_RAW).await;
    let (agent, session) = backend.connect_agent("srv-1", &["snmp"]).await;

    let event = Event {
        timestamp: 1_700_000_100,
        entity: Some(Entity {
            metadata: ObjectMeta::new("srv-1", "default"),
            ..Entity::default()
        }),
        check: Some(Check {
            metadata: ObjectMeta::new("check-if", "default"),
            proxy_entity_name: "router-1".into(),
            ..Check::default()
        }),
        metrics: None,
    };
    agent
        .send(TransportMessage::new(
            TYPE_EVENT,
            Bytes::from(serde_json::to_vec(&event).unwrap()),
        ))
        .await
        .unwrap();

    let published = timeout(RECV_TIMEOUT, observed.recv()).await.unwrap().unwrap();
    let BusMessage::Event(event) = published else {
        panic!("expected an event on the raw topic");
    };
    let entity = event.entity.expect("event carries its entity");
    assert_eq!(entity.metadata.name, "router-1");
    assert_eq!(entity.entity_class, "proxy");
    assert!(entity
        .subscriptions
        .contains(&"entity:router-1".to_string()));

    // The proxy entity was materialized in the store.
    assert!(backend
        .store
        .get_entity("default", "router-1")
        .await
        .unwrap()
        .is_some());

    session.stop().await;
}

#[tokio::test]
async fn invalid_events_are_dropped_without_stopping_the_session() {
    let backend = Backend::new().await;
    let observed = backend.observe(TOPIC_EVENT_RAW).await;
    let (agent, session) = backend.connect_agent("srv-1", &["linux"]).await;

    // Timestampless event: logged and dropped.
    let invalid = Event {
        entity: Some(Entity {
            metadata: ObjectMeta::new("srv-1", "default"),
            ..Entity::default()
        }),
        check: Some(Check {
            metadata: ObjectMeta::new("check-cpu", "default"),
            ..Check::default()
        }),
        ..Event::default()
    };
    agent
        .send(TransportMessage::new(
            TYPE_EVENT,
            Bytes::from(serde_json::to_vec(&invalid).unwrap()),
        ))
        .await
        .unwrap();

    // A valid event after the invalid one still flows.
    let mut valid = invalid.clone();
    valid.timestamp = 1_700_000_200;
    agent
        .send(TransportMessage::new(
            TYPE_EVENT,
            Bytes::from(serde_json::to_vec(&valid).unwrap()),
        ))
        .await
        .unwrap();

    let published = timeout(RECV_TIMEOUT, observed.recv()).await.unwrap().unwrap();
    let BusMessage::Event(event) = published else {
        panic!("expected an event on the raw topic");
    };
    assert_eq!(event.timestamp, 1_700_000_200);

    session.stop().await;
}

#[tokio::test]
async fn stop_tears_down_rings_subscriptions_and_gauge() {
    let backend = Backend::new().await;
    let (_agent, session) = backend.connect_agent("a", &["web", "db"]).await;

    let web_ring = backend.pool.get(&ring_path("default", "web"));
    assert_eq!(web_ring.next().await.unwrap().as_deref(), Some("a"));

    session.stop().await;

    // No ring entry for the agent remains.
    assert_eq!(web_ring.next().await.unwrap(), None);
    let db_ring = backend.pool.get(&ring_path("default", "db"));
    assert_eq!(db_ring.next().await.unwrap(), None);

    // Every bus subscription is gone.
    assert_eq!(
        backend
            .bus
            .subscriber_count(&subscription_topic("default", "web")),
        0
    );
    assert_eq!(
        backend
            .bus
            .subscriber_count(&subscription_topic("default", "entity:a")),
        0
    );
    assert_eq!(backend.metrics.active_sessions("default"), 0.0);

    // Stop is idempotent.
    session.stop().await;
    assert_eq!(backend.metrics.active_sessions("default"), 0.0);
}

#[tokio::test]
async fn transport_disconnect_stops_the_session() {
    let backend = Backend::new().await;
    let (agent, session) = backend.connect_agent("a", &["web"]).await;

    agent.close().await.unwrap();
    drop(agent);

    // The receive pump notices the disconnect and stops the session.
    let mut active = backend.metrics.active_sessions("default");
    for _ in 0..100 {
        if active == 0.0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        active = backend.metrics.active_sessions("default");
    }
    assert_eq!(active, 0.0);

    let ring = backend.pool.get(&ring_path("default", "web"));
    assert_eq!(ring.next().await.unwrap(), None);

    // A later explicit stop is still safe.
    session.stop().await;
}

#[tokio::test]
async fn reconnecting_agent_supersedes_its_bus_subscription() {
    let backend = Backend::new().await;
    let (_old_agent, old_session) = backend.connect_agent("a", &["web"]).await;
    let (new_agent, new_session) = backend.connect_agent("a", &["web"]).await;

    // Both sessions share the consumer identity; only the newer one is
    // subscribed, so a dispatched check is delivered exactly once.
    assert_eq!(
        backend
            .bus
            .subscriber_count(&subscription_topic("default", "web")),
        1
    );

    let router = RingRouter::new(
        backend.bus.clone(),
        Arc::clone(&backend.pool),
        Arc::clone(&backend.metrics),
    );
    let outcome = router
        .route("default", "web", CheckRequest::default())
        .await
        .unwrap();
    assert_eq!(outcome, RouteOutcome::Delivered { agent: "a".into() });

    let frame = timeout(RECV_TIMEOUT, new_agent.receive())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(frame.message_type, TYPE_CHECK_REQUEST);

    old_session.stop().await;
    new_session.stop().await;
}
