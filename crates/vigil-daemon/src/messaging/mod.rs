//! In-process message bus.
//!
//! The bus carries typed messages between the subsystems of one
//! backend process: sessions publish keepalives and raw events, and the
//! check dispatch path publishes check requests onto per-subscription
//! topics that sessions subscribe to.
//!
//! # Delivery contract
//!
//! - A consumer identity is unique per topic: re-subscribing with the
//!   same id supersedes the previous subscription, so a reconnecting
//!   agent never receives duplicate deliveries.
//! - Delivery is at-least-once within the process lifetime, FIFO per
//!   topic for a single publisher.
//! - Each subscriber owns a bounded [`Mailbox`]; when it is full the
//!   oldest message is dropped and counted. Publishers never block.

pub mod memory;
pub mod router;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Notify;
use vigil_core::{CheckRequest, Event};

pub use memory::InMemoryBus;
pub use router::{RingRouter, RouteOutcome, RouterError};

/// Topic carrying validated keepalive events.
pub const TOPIC_KEEPALIVE: &str = "vigil:keepalive";

/// Topic carrying validated raw events bound for the event pipeline.
pub const TOPIC_EVENT_RAW: &str = "vigil:event-raw";

/// Topic name for a subscription within a namespace.
#[must_use]
pub fn subscription_topic(namespace: &str, subscription: &str) -> String {
    format!("{namespace}/{subscription}")
}

/// A message carried by the bus.
#[derive(Debug, Clone, PartialEq)]
pub enum BusMessage {
    /// A keepalive or check-result event.
    Event(Event),

    /// A check execution request bound for an agent.
    CheckRequest(CheckRequest),
}

/// Errors surfaced by bus operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    /// The subscription was already canceled or superseded by a newer
    /// subscriber with the same consumer id.
    #[error("consumer {consumer:?} is not subscribed to topic {topic:?}")]
    NotSubscribed {
        /// Topic of the stale subscription.
        topic: String,
        /// Consumer id of the stale subscription.
        consumer: String,
    },

    /// The bus has shut down.
    #[error("message bus is closed")]
    Closed,
}

/// Result type for bus operations.
pub type BusResult<T> = Result<T, BusError>;

/// Publish/subscribe over typed topics.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publishes a message to a topic. Publishing to a topic with no
    /// subscribers succeeds and delivers nothing.
    async fn publish(&self, topic: &str, message: BusMessage) -> BusResult<()>;

    /// Subscribes `consumer_id` to a topic, delivering into `mailbox`.
    /// An existing subscription under the same id is superseded.
    async fn subscribe(
        &self,
        topic: &str,
        consumer_id: &str,
        mailbox: Arc<Mailbox>,
    ) -> BusResult<Subscription>;
}

/// A bounded, drop-oldest delivery queue owned by one subscriber.
///
/// Pushing never blocks: when the mailbox is at capacity the oldest
/// message is discarded and counted. A closed mailbox silently drops
/// pushes; `recv` drains what remains, then returns `None`.
pub struct Mailbox {
    queue: Mutex<MailboxQueue>,
    notify: Notify,
    capacity: usize,
    dropped: AtomicU64,
}

struct MailboxQueue {
    messages: VecDeque<BusMessage>,
    closed: bool,
}

impl Mailbox {
    /// Creates a mailbox holding at most `capacity` messages.
    #[must_use]
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            queue: Mutex::new(MailboxQueue {
                messages: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            notify: Notify::new(),
            capacity: capacity.max(1),
            dropped: AtomicU64::new(0),
        })
    }

    /// Enqueues a message, evicting the oldest one when full. Returns
    /// whether an eviction happened.
    pub fn push(&self, message: BusMessage) -> bool {
        let mut evicted = false;
        {
            let mut queue = match self.queue.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if queue.closed {
                return false;
            }
            if queue.messages.len() >= self.capacity {
                queue.messages.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
                evicted = true;
            }
            queue.messages.push_back(message);
        }
        self.notify.notify_one();
        evicted
    }

    /// Receives the next message, waiting until one arrives. Returns
    /// `None` once the mailbox is closed and drained.
    pub async fn recv(&self) -> Option<BusMessage> {
        loop {
            {
                let mut queue = match self.queue.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                if let Some(message) = queue.messages.pop_front() {
                    return Some(message);
                }
                if queue.closed {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Closes the mailbox: further pushes are dropped and `recv`
    /// returns `None` once the queue drains.
    pub fn close(&self) {
        {
            let mut queue = match self.queue.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            queue.closed = true;
        }
        self.notify.notify_one();
    }

    /// Number of messages evicted because the mailbox was full.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Handle to an active bus subscription.
///
/// Canceling removes the subscriber from the topic; canceling a handle
/// that was superseded or already canceled reports
/// [`BusError::NotSubscribed`].
pub struct Subscription {
    pub(crate) cancel: Box<dyn Fn() -> BusResult<()> + Send + Sync>,
    pub(crate) topic: String,
}

impl Subscription {
    /// Topic this subscription is attached to.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Cancels the subscription.
    ///
    /// # Errors
    ///
    /// [`BusError::NotSubscribed`] when the subscription was already
    /// canceled or superseded.
    pub fn cancel(&self) -> BusResult<()> {
        (self.cancel)()
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event_message(timestamp: i64) -> BusMessage {
        BusMessage::Event(Event {
            timestamp,
            ..Event::default()
        })
    }

    #[tokio::test]
    async fn mailbox_delivers_in_order() {
        let mailbox = Mailbox::new(10);
        mailbox.push(event_message(1));
        mailbox.push(event_message(2));

        assert_eq!(mailbox.recv().await, Some(event_message(1)));
        assert_eq!(mailbox.recv().await, Some(event_message(2)));
    }

    #[tokio::test]
    async fn mailbox_drops_oldest_when_full() {
        let mailbox = Mailbox::new(2);
        assert!(!mailbox.push(event_message(1)));
        assert!(!mailbox.push(event_message(2)));
        assert!(mailbox.push(event_message(3)));

        assert_eq!(mailbox.dropped(), 1);
        assert_eq!(mailbox.recv().await, Some(event_message(2)));
        assert_eq!(mailbox.recv().await, Some(event_message(3)));
    }

    #[tokio::test]
    async fn closed_mailbox_drains_then_ends() {
        let mailbox = Mailbox::new(10);
        mailbox.push(event_message(1));
        mailbox.close();
        mailbox.push(event_message(2));

        assert_eq!(mailbox.recv().await, Some(event_message(1)));
        assert_eq!(mailbox.recv().await, None);
    }
}
