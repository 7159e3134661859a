//! Event envelope and the typed domain event contract.

use crate::error::EventResult;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

/// Trait for typed domain events.
///
/// Implementations describe something significant that happened in the
/// marketplace; the bus carries them as [`Event`] envelopes.
pub trait DomainEvent: Send + Sync {
    /// Returns the event type name, one of [`crate::names`].
    fn event_type(&self) -> &'static str;

    /// Returns the aggregate ID that this event belongs to.
    fn aggregate_id(&self) -> String;

    /// Returns when the event happened.
    fn occurred_at(&self) -> DateTime<Utc>;

    /// Serializes the event payload.
    fn to_payload(&self) -> EventResult<serde_json::Value>;
}

/// Envelope delivered to handlers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique event ID.
    pub id: Uuid,

    /// Event type name.
    #[serde(rename = "type")]
    pub event_type: String,

    /// Aggregate the event belongs to.
    pub aggregate_id: String,

    /// JSON payload.
    pub payload: serde_json::Value,

    /// When the event happened.
    pub occurred_at: DateTime<Utc>,
}

impl Event {
    /// Creates an envelope stamped now.
    pub fn new(
        event_type: impl Into<String>,
        aggregate_id: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type: event_type.into(),
            aggregate_id: aggregate_id.into(),
            payload,
            occurred_at: Utc::now(),
        }
    }

    /// Wraps a typed domain event.
    pub fn from_domain(event: &dyn DomainEvent) -> EventResult<Self> {
        Ok(Self {
            id: Uuid::new_v4(),
            event_type: event.event_type().to_string(),
            aggregate_id: event.aggregate_id(),
            payload: event.to_payload()?,
            occurred_at: event.occurred_at(),
        })
    }

    /// Decodes the payload into a typed event.
    pub fn payload_as<T: DeserializeOwned>(&self) -> EventResult<T> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PolicyIssued;
    use crate::error::EventError;

    #[test]
    fn test_from_domain_keeps_metadata() {
        let issued = PolicyIssued::new("pol-1", "quote-7", "user-3", "AUTO-BASIC");
        let event = Event::from_domain(&issued).unwrap();

        assert_eq!(event.event_type, "policy.issued");
        assert_eq!(event.aggregate_id, "pol-1");
        assert_eq!(event.occurred_at, issued.occurred_at);

        let decoded: PolicyIssued = event.payload_as().unwrap();
        assert_eq!(decoded.policy_id, "pol-1");
        assert_eq!(decoded.product_code, "AUTO-BASIC");
    }

    #[test]
    fn test_payload_as_wrong_shape() {
        let event = Event::new("policy.issued", "pol-1", serde_json::json!({ "unexpected": 1 }));
        let err = event.payload_as::<PolicyIssued>().unwrap_err();
        assert!(matches!(err, EventError::Payload(_)));
    }

    #[test]
    fn test_envelope_uses_type_key() {
        let event = Event::new("user.registered", "user-1", serde_json::json!({}));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "user.registered");
    }
}
