//! In-memory implementation of the message bus.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

use async_trait::async_trait;
use tracing::debug;

use super::{BusError, BusMessage, BusResult, Mailbox, MessageBus, Subscription};

struct SubscriberEntry {
    generation: u64,
    mailbox: Arc<Mailbox>,
}

#[derive(Default)]
struct BusState {
    /// Subscribers per topic, keyed by consumer id.
    topics: HashMap<String, HashMap<String, SubscriberEntry>>,
}

/// Shared internals referenced by the bus and by subscription handles.
#[derive(Default)]
struct BusInner {
    state: RwLock<BusState>,
    next_generation: AtomicU64,
    dropped: AtomicU64,
}

impl BusInner {
    fn unsubscribe(&self, topic: &str, consumer: &str, generation: u64) -> BusResult<()> {
        let mut state = match self.state.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let Some(subscribers) = state.topics.get_mut(topic) else {
            return Err(BusError::NotSubscribed {
                topic: topic.to_string(),
                consumer: consumer.to_string(),
            });
        };
        match subscribers.get(consumer) {
            Some(entry) if entry.generation == generation => {
                subscribers.remove(consumer);
                if subscribers.is_empty() {
                    state.topics.remove(topic);
                }
                Ok(())
            }
            // Superseded by a newer subscription, or already gone.
            _ => Err(BusError::NotSubscribed {
                topic: topic.to_string(),
                consumer: consumer.to_string(),
            }),
        }
    }
}

/// Process-local publish/subscribe bus.
///
/// Delivery fans out to every subscriber of the topic through its own
/// bounded mailbox; slow consumers lose their oldest messages rather
/// than stalling publishers.
#[derive(Default)]
pub struct InMemoryBus {
    inner: Arc<BusInner>,
}

impl InMemoryBus {
    /// Creates an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total messages evicted from subscriber mailboxes on this bus.
    #[must_use]
    pub fn dropped_messages(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    /// Number of subscribers currently attached to a topic.
    #[must_use]
    pub fn subscriber_count(&self, topic: &str) -> usize {
        let state = match self.inner.state.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.topics.get(topic).map_or(0, HashMap::len)
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn publish(&self, topic: &str, message: BusMessage) -> BusResult<()> {
        let mailboxes: Vec<Arc<Mailbox>> = {
            let state = match self.inner.state.read() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            match state.topics.get(topic) {
                Some(subscribers) => subscribers
                    .values()
                    .map(|e| Arc::clone(&e.mailbox))
                    .collect(),
                None => return Ok(()),
            }
        };

        for mailbox in mailboxes {
            if mailbox.push(message.clone()) {
                self.inner.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
        consumer_id: &str,
        mailbox: Arc<Mailbox>,
    ) -> BusResult<Subscription> {
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        {
            let mut state = match self.inner.state.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            let subscribers = state.topics.entry(topic.to_string()).or_default();
            if subscribers
                .insert(
                    consumer_id.to_string(),
                    SubscriberEntry {
                        generation,
                        mailbox,
                    },
                )
                .is_some()
            {
                debug!(topic, consumer = consumer_id, "superseding bus subscription");
            }
        }

        let weak: Weak<BusInner> = Arc::downgrade(&self.inner);
        let cancel_topic = topic.to_string();
        let cancel_consumer = consumer_id.to_string();
        Ok(Subscription {
            topic: topic.to_string(),
            cancel: Box::new(move || match weak.upgrade() {
                Some(inner) => inner.unsubscribe(&cancel_topic, &cancel_consumer, generation),
                None => Err(BusError::Closed),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_core::Event;

    fn message(timestamp: i64) -> BusMessage {
        BusMessage::Event(Event {
            timestamp,
            ..Event::default()
        })
    }

    #[tokio::test]
    async fn publish_fans_out_to_all_subscribers() {
        let bus = InMemoryBus::new();
        let a = Mailbox::new(10);
        let b = Mailbox::new(10);
        bus.subscribe("default/web", "default:a", Arc::clone(&a))
            .await
            .unwrap();
        bus.subscribe("default/web", "default:b", Arc::clone(&b))
            .await
            .unwrap();

        bus.publish("default/web", message(1)).await.unwrap();

        assert_eq!(a.recv().await, Some(message(1)));
        assert_eq!(b.recv().await, Some(message(1)));
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_a_noop() {
        let bus = InMemoryBus::new();
        bus.publish("default/web", message(1)).await.unwrap();
        assert_eq!(bus.subscriber_count("default/web"), 0);
    }

    #[tokio::test]
    async fn resubscribe_supersedes_previous_consumer() {
        let bus = InMemoryBus::new();
        let old = Mailbox::new(10);
        let new = Mailbox::new(10);

        let first = bus
            .subscribe("default/web", "default:a", Arc::clone(&old))
            .await
            .unwrap();
        let second = bus
            .subscribe("default/web", "default:a", Arc::clone(&new))
            .await
            .unwrap();
        assert_eq!(bus.subscriber_count("default/web"), 1);

        bus.publish("default/web", message(1)).await.unwrap();
        assert_eq!(new.recv().await, Some(message(1)));

        // The superseded handle cannot cancel the live subscription.
        assert!(matches!(
            first.cancel(),
            Err(BusError::NotSubscribed { .. })
        ));
        assert_eq!(bus.subscriber_count("default/web"), 1);

        second.cancel().unwrap();
        assert_eq!(bus.subscriber_count("default/web"), 0);
    }

    #[tokio::test]
    async fn cancel_is_not_idempotent_but_safe() {
        let bus = InMemoryBus::new();
        let sub = bus
            .subscribe("default/web", "default:a", Mailbox::new(10))
            .await
            .unwrap();

        sub.cancel().unwrap();
        assert!(matches!(sub.cancel(), Err(BusError::NotSubscribed { .. })));
    }

    #[tokio::test]
    async fn slow_subscriber_loses_oldest_messages() {
        let bus = InMemoryBus::new();
        let mailbox = Mailbox::new(2);
        bus.subscribe("default/web", "default:a", Arc::clone(&mailbox))
            .await
            .unwrap();

        for i in 1..=5 {
            bus.publish("default/web", message(i)).await.unwrap();
        }

        assert_eq!(bus.dropped_messages(), 3);
        assert_eq!(mailbox.recv().await, Some(message(4)));
        assert_eq!(mailbox.recv().await, Some(message(5)));
    }
}
