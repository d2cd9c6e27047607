//! Domain error types.

use event_store::EventStoreError;
use thiserror::Error;

/// Errors that can occur during domain operations.
///
/// Business rule violations never surface here; the command handler turns
/// them into notifications. What remains are infrastructure faults.
#[derive(Debug, Error)]
pub enum DomainError {
    /// An error occurred in the event store.
    #[error("Event store error: {0}")]
    EventStore(#[from] EventStoreError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored stream could not be rebuilt into an aggregate.
    #[error("Corrupt stream for {aggregate_type} {aggregate_id}: {reason}")]
    CorruptStream {
        aggregate_type: &'static str,
        aggregate_id: String,
        reason: String,
    },
}

impl DomainError {
    /// Returns true if the command lost an optimistic concurrency race and
    /// can be retried.
    pub fn is_conflict(&self) -> bool {
        matches!(self, DomainError::EventStore(e) if e.is_conflict())
    }
}

/// Failure to hand a message to the messaging substrate.
#[derive(Debug, Error)]
pub enum PublishError {
    /// The receiving side has shut down.
    #[error("channel closed")]
    ChannelClosed,

    #[error("publish rejected: {0}")]
    Rejected(String),
}
