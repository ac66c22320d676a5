//! Events: the unit of observation flowing from agents to the backend.

use serde::{Deserialize, Serialize};

use crate::check::Check;
use crate::entity::Entity;
use crate::meta::ValidationError;
use crate::metrics::Metrics;

/// An observation reported by an agent: a check result, a metrics
/// payload, or a keepalive. Every event names the entity it was
/// observed on.
#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
pub struct Event {
    /// Unix timestamp of the observation. Must be positive.
    #[prost(int64, tag = "1")]
    pub timestamp: i64,

    /// The entity the event was observed on.
    #[prost(message, optional, tag = "2")]
    pub entity: Option<Entity>,

    /// The executed check, when the event is a check result.
    #[prost(message, optional, tag = "3")]
    pub check: Option<Check>,

    /// Metrics collected with the event, when present.
    #[prost(message, optional, tag = "4")]
    pub metrics: Option<Metrics>,
}

impl Event {
    /// True when the event carries a check.
    #[must_use]
    pub fn has_check(&self) -> bool {
        self.check.is_some()
    }

    /// True when the event is a keepalive: no check, or the builtin
    /// keepalive check.
    #[must_use]
    pub fn is_keepalive(&self) -> bool {
        self.check.as_ref().is_none_or(Check::is_keepalive)
    }

    /// Validates the event: it must name a valid entity, carry a
    /// positive timestamp, and hold at least one of a check or metrics.
    ///
    /// # Errors
    ///
    /// Returns the first failing [`ValidationError`].
    pub fn validate(&self) -> Result<(), ValidationError> {
        let entity = self.entity.as_ref().ok_or(ValidationError::MissingEntity)?;
        entity.validate()?;
        if self.timestamp <= 0 {
            return Err(ValidationError::InvalidTimestamp);
        }
        if self.check.is_none() && self.metrics.is_none() {
            return Err(ValidationError::MissingCheckAndMetrics);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::ObjectMeta;

    fn check_event() -> Event {
        Event {
            timestamp: 1_700_000_000,
            entity: Some(Entity {
                metadata: ObjectMeta::new("srv-1", "default"),
                ..Entity::default()
            }),
            check: Some(Check {
                metadata: ObjectMeta::new("check-cpu", "default"),
                ..Check::default()
            }),
            metrics: None,
        }
    }

    #[test]
    fn valid_check_event() {
        assert!(check_event().validate().is_ok());
    }

    #[test]
    fn event_without_entity_is_invalid() {
        let mut event = check_event();
        event.entity = None;
        assert_eq!(event.validate(), Err(ValidationError::MissingEntity));
    }

    #[test]
    fn event_without_timestamp_is_invalid() {
        let mut event = check_event();
        event.timestamp = 0;
        assert_eq!(event.validate(), Err(ValidationError::InvalidTimestamp));
    }

    #[test]
    fn event_needs_check_or_metrics() {
        let mut event = check_event();
        event.check = None;
        assert_eq!(
            event.validate(),
            Err(ValidationError::MissingCheckAndMetrics)
        );

        event.metrics = Some(Metrics::default());
        assert!(event.validate().is_ok());
    }

    #[test]
    fn json_encoding_roundtrips() {
        let event = check_event();
        let encoded = serde_json::to_vec(&event).unwrap();
        let decoded: Event = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn keepalive_detection() {
        let mut event = check_event();
        assert!(!event.is_keepalive());

        event.check = None;
        assert!(event.is_keepalive());

        event.check = Some(Check {
            metadata: ObjectMeta::new("keepalive", "default"),
            ..Check::default()
        });
        assert!(event.is_keepalive());
    }
}
