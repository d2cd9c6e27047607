//! Messages committed together with the events that caused them.
//!
//! A message stays in the outbox until a dispatcher confirms delivery, so a
//! publish that fails after the commit is retried instead of lost.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use uuid::Uuid;

use crate::{AggregateId, Result};

/// One message waiting to be published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxMessage {
    pub id: Uuid,
    /// Stream whose append recorded the message.
    pub aggregate_id: AggregateId,
    pub message_type: String,
    pub payload: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}

impl OutboxMessage {
    /// Serializes `payload` into a new message.
    pub fn new<T: Serialize>(
        aggregate_id: AggregateId,
        message_type: impl Into<String>,
        payload: &T,
    ) -> Result<Self> {
        Ok(Self {
            id: Uuid::new_v4(),
            aggregate_id,
            message_type: message_type.into(),
            payload: serde_json::to_value(payload)?,
            recorded_at: Utc::now(),
        })
    }

    /// Deserializes the payload back into its message type.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Requested {
        sku: String,
        quantity: u32,
    }

    #[test]
    fn new_message_keeps_its_payload() {
        let aggregate_id = AggregateId::new();
        let payload = Requested {
            sku: "SKU-1".to_string(),
            quantity: 2,
        };

        let message = OutboxMessage::new(aggregate_id, "StockReservationRequested", &payload).unwrap();

        assert_eq!(message.aggregate_id, aggregate_id);
        assert_eq!(message.message_type, "StockReservationRequested");
        assert_eq!(message.decode::<Requested>().unwrap(), payload);
    }

    #[test]
    fn decode_into_the_wrong_shape_fails() {
        let message = OutboxMessage::new(AggregateId::new(), "Note", &"just text").unwrap();
        assert!(message.decode::<Requested>().is_err());
    }
}
