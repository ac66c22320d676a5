//! Agent sessions.
//!
//! A session is the server side of one agent connection. It multiplexes
//! the transport into three pumps — receive, send, and subscription —
//! bridges the connection to the message bus, validates keepalives and
//! events, and keeps the agent's subscription-ring memberships alive.
//!
//! # Lifecycle
//!
//! ```text
//!             +---------+  Session::new (validates namespace)
//!             | Created |-------------------------------+
//!             +----+----+                               |
//!                  | start()                            | construction
//!                  v                                    | fails
//!             +---------+   transport error             v
//!             | Running |----------------------->  (rejected: no
//!             +----+----+         |                 tasks, no bus
//!                  | stop()       |                 subscriptions)
//!                  v              v
//!             +---------+<-------+
//!             | Stopped |
//!             +---------+
//! ```
//!
//! Transitions are one-way. `stop` is idempotent and safe to call after
//! a failed `start`; concurrent callers block until teardown completes.
//! Cancellation is a single primitive: the session's
//! [`CancellationToken`] stops every pump, and a [`TaskTracker`] joins
//! them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use vigil_core::{add_entity_subscription, entity_subscription, ValidationError};

use super::codec::{CodecError, WireCodec};
use super::entity::get_proxy_entity;
use crate::messaging::{
    subscription_topic, BusError, BusMessage, Mailbox, MessageBus, Subscription, TOPIC_EVENT_RAW,
    TOPIC_KEEPALIVE,
};
use crate::metrics::BackendMetrics;
use crate::ring::{ring_path, Pool, RingError};
use crate::store::{SessionStore, StoreError};
use crate::transport::{Transport, TransportMessage, TYPE_CHECK_REQUEST, TYPE_EVENT, TYPE_KEEPALIVE};

/// Capacity of the outbound send queue.
const SEND_QUEUE_CAPACITY: usize = 10;

/// Capacity of the inbound check-request mailbox.
const CHECK_CHANNEL_CAPACITY: usize = 100;

/// Errors surfaced by session construction and message handling.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The namespace declared at handshake does not exist.
    #[error("could not retrieve namespace {0:?}: namespace not found")]
    NamespaceNotFound(String),

    /// The store failed while validating the session or resolving a
    /// proxy entity.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A bus subscription failed.
    #[error(transparent)]
    Bus(#[from] BusError),

    /// A ring membership operation failed.
    #[error(transparent)]
    Ring(#[from] RingError),

    /// A payload failed to decode.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// An event failed validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A keepalive arrived without an entity.
    #[error("keepalive does not contain an entity")]
    KeepaliveWithoutEntity,

    /// A keepalive arrived with a zero or negative timestamp.
    #[error("keepalive contains an invalid timestamp")]
    KeepaliveInvalidTimestamp,

    /// `start` was called more than once.
    #[error("session already started")]
    AlreadyStarted,
}

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Everything needed to initialize an agent session, as negotiated at
/// transport handshake.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// Namespace the agent operates in; must exist in the store.
    pub namespace: String,

    /// Agent (entity) name.
    pub agent_name: String,

    /// Remote address, for logging.
    pub agent_addr: String,

    /// User the agent authenticated as.
    pub user: String,

    /// Subscriptions declared by the agent. Empty entries are ignored;
    /// the implicit `entity:<agent>` subscription is added on start.
    pub subscriptions: Vec<String>,

    /// Negotiated payload content type.
    pub content_type: String,
}

/// A server-side agent connection.
///
/// The session relays messages from the agent to the message bus, and
/// check requests from the bus back to the agent. It owns no transport
/// teardown on construction failure: a rejected session spawns no
/// tasks, holds no bus subscriptions, and leaves the connection to the
/// caller.
pub struct Session {
    cfg: SessionConfig,
    session_id: String,
    conn: Arc<dyn Transport>,
    bus: Arc<dyn MessageBus>,
    store: Arc<dyn SessionStore>,
    ring_pool: Arc<Pool>,
    codec: Arc<dyn WireCodec>,
    metrics: Arc<BackendMetrics>,

    /// Inbound check requests delivered by the bus.
    mailbox: Arc<Mailbox>,
    sendq_tx: mpsc::Sender<TransportMessage>,
    sendq_rx: Mutex<Option<mpsc::Receiver<TransportMessage>>>,
    subscriptions: Mutex<Vec<Subscription>>,

    /// Single cancellation primitive for every pump.
    cancel: CancellationToken,
    tracker: TaskTracker,
    started: AtomicBool,
    stopped: AtomicBool,
    /// Fires once teardown has fully completed.
    done: CancellationToken,
}

impl Session {
    /// Creates a session for a handshaken connection after validating
    /// that the declared namespace exists.
    ///
    /// # Errors
    ///
    /// [`SessionError::NamespaceNotFound`] when the namespace does not
    /// resolve, or the underlying [`StoreError`] when the lookup fails.
    /// In both cases nothing has been spawned or subscribed and the
    /// connection is untouched.
    pub async fn new(
        cfg: SessionConfig,
        conn: Arc<dyn Transport>,
        bus: Arc<dyn MessageBus>,
        store: Arc<dyn SessionStore>,
        ring_pool: Arc<Pool>,
        codec: Arc<dyn WireCodec>,
        metrics: Arc<BackendMetrics>,
    ) -> SessionResult<Arc<Self>> {
        if store.get_namespace(&cfg.namespace).await?.is_none() {
            return Err(SessionError::NamespaceNotFound(cfg.namespace.clone()));
        }

        let session_id = format!("S-{}", Uuid::new_v4());
        info!(
            session = %session_id,
            addr = %cfg.agent_addr,
            namespace = %cfg.namespace,
            agent = %cfg.agent_name,
            subscriptions = ?cfg.subscriptions,
            "agent connected"
        );

        let (sendq_tx, sendq_rx) = mpsc::channel(SEND_QUEUE_CAPACITY);
        Ok(Arc::new(Self {
            cfg,
            session_id,
            conn,
            bus,
            store,
            ring_pool,
            codec,
            metrics,
            mailbox: Mailbox::new(CHECK_CHANNEL_CAPACITY),
            sendq_tx,
            sendq_rx: Mutex::new(Some(sendq_rx)),
            subscriptions: Mutex::new(Vec::new()),
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            done: CancellationToken::new(),
        }))
    }

    /// The mailbox the bus delivers this session's check requests into.
    #[must_use]
    pub fn receiver(&self) -> Arc<Mailbox> {
        Arc::clone(&self.mailbox)
    }

    /// Subscriptions the session dispatches on: the declared non-empty
    /// subscriptions plus the implicit entity subscription.
    fn topic_subscriptions(&self) -> Vec<String> {
        let mut subs: Vec<String> = self
            .cfg
            .subscriptions
            .iter()
            .filter(|s| !s.is_empty())
            .cloned()
            .collect();
        let implicit = entity_subscription(&self.cfg.agent_name);
        if !subs.contains(&implicit) {
            subs.push(implicit);
        }
        subs
    }

    /// Subscriptions that participate in round-robin rings. Entity
    /// subscriptions are single-agent by construction and stay out.
    fn ring_subscriptions(&self) -> Vec<String> {
        self.cfg
            .subscriptions
            .iter()
            .filter(|s| !s.is_empty() && !s.starts_with("entity:"))
            .cloned()
            .collect()
    }

    /// Starts the session: spawns the three pumps, subscribes to every
    /// subscription topic, and inserts the agent into its subscription
    /// rings.
    ///
    /// # Errors
    ///
    /// On the first subscription or ring failure the session is stopped
    /// and the error returned. [`SessionError::AlreadyStarted`] when
    /// called twice.
    pub async fn start(self: &Arc<Self>) -> SessionResult<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(SessionError::AlreadyStarted);
        }
        self.metrics.session_started(&self.cfg.namespace);

        self.tracker.spawn(Arc::clone(self).send_pump());
        self.tracker.spawn(Arc::clone(self).recv_pump());
        self.tracker.spawn(Arc::clone(self).sub_pump());

        let consumer = format!("{}:{}", self.cfg.namespace, self.cfg.agent_name);
        for sub in self.topic_subscriptions() {
            let topic = subscription_topic(&self.cfg.namespace, &sub);
            debug!(session = %self.session_id, topic = %topic, "subscribing to topic");
            match self
                .bus
                .subscribe(&topic, &consumer, Arc::clone(&self.mailbox))
                .await
            {
                Ok(subscription) => self.subscriptions.lock().await.push(subscription),
                Err(e) => {
                    error!(session = %self.session_id, topic = %topic, error = %e,
                        "error starting subscription");
                    self.stop().await;
                    return Err(e.into());
                }
            }
        }

        for sub in self.ring_subscriptions() {
            let ring = self.ring_pool.get(&ring_path(&self.cfg.namespace, &sub));
            if let Err(e) = ring.add(&self.cfg.agent_name).await {
                error!(session = %self.session_id, subscription = %sub, error = %e,
                    "error joining subscription ring");
                self.stop().await;
                return Err(e.into());
            }
        }

        Ok(())
    }

    /// Stops the session: cancels and joins the pumps, cancels every
    /// bus subscription, closes the check mailbox, and removes the
    /// agent from its subscription rings.
    ///
    /// Idempotent: the first caller performs teardown, later or
    /// concurrent callers block until it has completed. Safe after a
    /// failed `start`.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            self.done.cancelled().await;
            return;
        }
        if self.started.load(Ordering::SeqCst) {
            self.metrics.session_stopped(&self.cfg.namespace);
        }

        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;

        let subscriptions = std::mem::take(&mut *self.subscriptions.lock().await);
        for subscription in subscriptions {
            if let Err(e) = subscription.cancel() {
                error!(session = %self.session_id, topic = %subscription.topic(), error = %e,
                    "unable to unsubscribe from message bus");
            }
        }
        self.mailbox.close();

        for sub in self.ring_subscriptions() {
            let ring = self.ring_pool.get(&ring_path(&self.cfg.namespace, &sub));
            info!(
                session = %self.session_id,
                namespace = %self.cfg.namespace,
                agent = %self.cfg.agent_name,
                "removing agent from ring"
            );
            if let Err(e) = ring.remove(&self.cfg.agent_name).await {
                error!(session = %self.session_id, error = %e, "unable to remove agent from ring");
            }
        }

        info!(session = %self.session_id, agent = %self.cfg.agent_name, "session stopped");
        self.done.cancel();
    }

    /// Receive pump: reads frames sequentially and dispatches them by
    /// type. Disconnects stop the session; per-message errors are
    /// logged and the loop continues.
    async fn recv_pump(self: Arc<Self>) {
        loop {
            let message = tokio::select! {
                () = self.cancel.cancelled() => break,
                received = self.conn.receive() => match received {
                    Ok(message) => message,
                    Err(e) if e.is_disconnect() => {
                        warn!(
                            session = %self.session_id,
                            addr = %self.cfg.agent_addr,
                            agent = %self.cfg.agent_name,
                            error = %e,
                            "stopping session"
                        );
                        break;
                    }
                    Err(e) => {
                        error!(session = %self.session_id, error = %e, "recv error");
                        continue;
                    }
                },
            };

            if let Err(e) = self.handle_message(&message).await {
                error!(
                    session = %self.session_id,
                    error = %e,
                    message_type = %message.message_type,
                    payload = %String::from_utf8_lossy(&message.payload),
                    "error handling message"
                );
            }
        }

        info!(session = %self.session_id, "session disconnected - stopping recv pump");
        if !self.cancel.is_cancelled() {
            let session = Arc::clone(&self);
            tokio::spawn(async move { session.stop().await });
        }
    }

    /// Subscription pump: relays check requests from the bus mailbox to
    /// the send queue, backpressuring on a full queue.
    async fn sub_pump(self: Arc<Self>) {
        loop {
            let message = tokio::select! {
                () = self.cancel.cancelled() => break,
                received = self.mailbox.recv() => match received {
                    Some(message) => message,
                    None => break,
                },
            };

            let BusMessage::CheckRequest(request) = message else {
                error!(session = %self.session_id, "session received non-request over check channel");
                continue;
            };

            let payload = match self.codec.marshal_check_request(&request) {
                Ok(payload) => payload,
                Err(e) => {
                    error!(session = %self.session_id, error = %e,
                        "session failed to serialize check request");
                    continue;
                }
            };

            let outbound = TransportMessage::new(TYPE_CHECK_REQUEST, payload);
            tokio::select! {
                () = self.cancel.cancelled() => break,
                sent = self.sendq_tx.send(outbound) => {
                    if sent.is_err() {
                        break;
                    }
                }
            }
        }
        info!(session = %self.session_id, "shutting down - stopping sub pump");
    }

    /// Send pump: drains the send queue to the transport. Disconnects
    /// end the pump; other send errors are logged and the loop
    /// continues.
    async fn send_pump(self: Arc<Self>) {
        let Some(mut sendq) = self.sendq_rx.lock().await.take() else {
            return;
        };
        loop {
            let message = tokio::select! {
                () = self.cancel.cancelled() => break,
                queued = sendq.recv() => match queued {
                    Some(message) => message,
                    None => break,
                },
            };

            debug!(session = %self.session_id, payload_size = message.payload.len(),
                "session - sending message");
            if let Err(e) = self.conn.send(message).await {
                if e.is_disconnect() {
                    break;
                }
                error!(session = %self.session_id, error = %e, "send error");
            }
        }
        info!(session = %self.session_id, "shutting down - stopping send pump");
    }

    /// Dispatches one inbound frame by type. Unknown types are logged
    /// and ignored.
    async fn handle_message(&self, message: &TransportMessage) -> SessionResult<()> {
        match message.message_type.as_str() {
            TYPE_KEEPALIVE => self.handle_keepalive(&message.payload).await,
            TYPE_EVENT => self.handle_event(&message.payload).await,
            other => {
                debug!(session = %self.session_id, message_type = %other,
                    "ignoring message of unknown type");
                Ok(())
            }
        }
    }

    /// Keepalive handler: validates the event shape, ensures the
    /// implicit entity subscription, refreshes the agent's ring leases,
    /// and publishes to the keepalive topic.
    async fn handle_keepalive(&self, payload: &[u8]) -> SessionResult<()> {
        let mut keepalive = self.codec.unmarshal_event(payload)?;

        if keepalive.entity.is_none() {
            return Err(SessionError::KeepaliveWithoutEntity);
        }
        if keepalive.timestamp <= 0 {
            return Err(SessionError::KeepaliveInvalidTimestamp);
        }
        if let Some(entity) = keepalive.entity.as_mut() {
            let name = entity.metadata.name.clone();
            entity.subscriptions =
                add_entity_subscription(&name, std::mem::take(&mut entity.subscriptions));
        }

        self.refresh_ring_leases().await;
        self.metrics.session_event(TYPE_KEEPALIVE);
        self.bus
            .publish(TOPIC_KEEPALIVE, BusMessage::Event(keepalive))
            .await?;
        Ok(())
    }

    /// Event handler: validates the event, substitutes the proxy entity
    /// when the check names one, ensures the implicit entity
    /// subscription, and publishes to the raw-event topic.
    async fn handle_event(&self, payload: &[u8]) -> SessionResult<()> {
        let mut event = self.codec.unmarshal_event(payload)?;
        event.validate()?;

        if let Some(check) = &event.check {
            if !check.proxy_entity_name.is_empty() {
                let proxy = get_proxy_entity(
                    self.store.as_ref(),
                    &self.cfg.namespace,
                    &check.proxy_entity_name,
                )
                .await?;
                event.entity = Some(proxy);
            }
        }

        if let Some(entity) = event.entity.as_mut() {
            let name = entity.metadata.name.clone();
            entity.subscriptions =
                add_entity_subscription(&name, std::mem::take(&mut entity.subscriptions));
        }

        self.metrics.session_event(TYPE_EVENT);
        self.bus
            .publish(TOPIC_EVENT_RAW, BusMessage::Event(event))
            .await?;
        Ok(())
    }

    /// Refreshes the agent's membership lease in every subscription
    /// ring. Failures are logged; the keepalive still publishes.
    async fn refresh_ring_leases(&self) {
        for sub in self.ring_subscriptions() {
            let ring = self.ring_pool.get(&ring_path(&self.cfg.namespace, &sub));
            if let Err(e) = ring.add(&self.cfg.agent_name).await {
                warn!(
                    session = %self.session_id,
                    subscription = %sub,
                    error = %e,
                    "unable to refresh ring lease"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use vigil_core::{Entity, Event, Namespace, ObjectMeta};

    use super::*;
    use crate::agentd::codec::JsonCodec;
    use crate::messaging::InMemoryBus;
    use crate::metrics::MetricsRegistry;
    use crate::store::kv::MemoryKv;
    use crate::store::{MemoryStore, NamespaceStore};
    use crate::transport::ChannelTransport;

    async fn fixture_session() -> (Arc<Session>, Arc<InMemoryBus>, Arc<BackendMetrics>) {
        let store = Arc::new(MemoryStore::new());
        store
            .create_namespace(&Namespace::new("default"))
            .await
            .unwrap();
        let bus = Arc::new(InMemoryBus::new());
        let pool = Arc::new(Pool::new(
            Arc::new(MemoryKv::new()),
            Duration::from_secs(120),
        ));
        let metrics = MetricsRegistry::new().unwrap().backend_metrics();
        let (_agent, backend) = ChannelTransport::pair();

        let session = Session::new(
            SessionConfig {
                namespace: "default".into(),
                agent_name: "srv-1".into(),
                agent_addr: "127.0.0.1:9".into(),
                subscriptions: vec!["linux".into(), String::new()],
                ..SessionConfig::default()
            },
            Arc::new(backend),
            bus.clone(),
            store,
            pool,
            Arc::new(JsonCodec),
            metrics.clone(),
        )
        .await
        .unwrap();
        (session, bus, metrics)
    }

    #[tokio::test]
    async fn construction_fails_for_unknown_namespace() {
        let store = Arc::new(MemoryStore::new());
        let bus = Arc::new(InMemoryBus::new());
        let pool = Arc::new(Pool::new(
            Arc::new(MemoryKv::new()),
            Duration::from_secs(120),
        ));
        let metrics = MetricsRegistry::new().unwrap().backend_metrics();
        let (_agent, backend) = ChannelTransport::pair();

        let result = Session::new(
            SessionConfig {
                namespace: "ghost".into(),
                agent_name: "srv-1".into(),
                ..SessionConfig::default()
            },
            Arc::new(backend),
            bus,
            store,
            pool,
            Arc::new(JsonCodec),
            metrics.clone(),
        )
        .await;

        assert!(matches!(result, Err(SessionError::NamespaceNotFound(ns)) if ns == "ghost"));
        assert_eq!(metrics.active_sessions("ghost"), 0.0);
    }

    #[tokio::test]
    async fn keepalive_requires_entity_and_timestamp() {
        let (session, _bus, _metrics) = fixture_session().await;

        let missing_entity = serde_json::to_vec(&Event {
            timestamp: 1,
            ..Event::default()
        })
        .unwrap();
        assert!(matches!(
            session.handle_keepalive(&missing_entity).await,
            Err(SessionError::KeepaliveWithoutEntity)
        ));

        let missing_timestamp = serde_json::to_vec(&Event {
            entity: Some(Entity {
                metadata: ObjectMeta::new("srv-1", "default"),
                ..Entity::default()
            }),
            ..Event::default()
        })
        .unwrap();
        assert!(matches!(
            session.handle_keepalive(&missing_timestamp).await,
            Err(SessionError::KeepaliveInvalidTimestamp)
        ));
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_safe_without_start() {
        let (session, _bus, metrics) = fixture_session().await;
        session.stop().await;
        session.stop().await;
        assert_eq!(metrics.active_sessions("default"), 0.0);
    }

    #[tokio::test]
    async fn start_twice_is_rejected() {
        let (session, _bus, _metrics) = fixture_session().await;
        session.start().await.unwrap();
        assert!(matches!(
            session.start().await,
            Err(SessionError::AlreadyStarted)
        ));
        session.stop().await;
    }
}
