//! Ring-routed check dispatch.
//!
//! A plain publish to a subscription topic fans out to every subscribed
//! agent. Round-robin checks instead go through the [`RingRouter`]: it
//! asks the subscription's ring which agent's turn it is and publishes
//! the request to that agent's entity topic, so each scheduled tick
//! fires on exactly one agent across the whole backend fleet.

use std::sync::Arc;

use thiserror::Error;
use tracing::debug;
use vigil_core::{entity_subscription, CheckRequest};

use super::{subscription_topic, BusError, BusMessage, MessageBus};
use crate::metrics::BackendMetrics;
use crate::ring::{ring_path, Pool, RingError};

/// Errors surfaced by ring-routed dispatch.
#[derive(Debug, Clone, Error)]
pub enum RouterError {
    /// The ring rotation failed.
    #[error(transparent)]
    Ring(#[from] RingError),

    /// The bus publish failed.
    #[error(transparent)]
    Bus(#[from] BusError),
}

/// Where a routed check request went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// The request was published to this agent's entity topic.
    Delivered {
        /// Agent whose turn it was.
        agent: String,
    },

    /// The subscription's ring has no live members.
    NoAgents,
}

/// Dispatches check requests to one agent at a time per subscription.
pub struct RingRouter {
    bus: Arc<dyn MessageBus>,
    pool: Arc<Pool>,
    metrics: Arc<BackendMetrics>,
}

impl RingRouter {
    /// Creates a router over the given bus and ring pool.
    #[must_use]
    pub fn new(bus: Arc<dyn MessageBus>, pool: Arc<Pool>, metrics: Arc<BackendMetrics>) -> Self {
        Self { bus, pool, metrics }
    }

    /// Routes a check request to the next agent of
    /// `(namespace, subscription)`.
    ///
    /// # Errors
    ///
    /// Returns a [`RouterError`] when the ring rotation or the bus
    /// publish fails.
    pub async fn route(
        &self,
        namespace: &str,
        subscription: &str,
        request: CheckRequest,
    ) -> Result<RouteOutcome, RouterError> {
        let ring = self.pool.get(&ring_path(namespace, subscription));
        let Some(agent) = ring.next().await? else {
            debug!(namespace, subscription, "no live agents for subscription");
            return Ok(RouteOutcome::NoAgents);
        };

        let topic = subscription_topic(namespace, &entity_subscription(&agent));
        debug!(namespace, subscription, agent, topic, "routing check request");
        self.bus
            .publish(&topic, BusMessage::CheckRequest(request))
            .await?;
        self.metrics.check_routed();
        Ok(RouteOutcome::Delivered { agent })
    }
}
