use async_trait::async_trait;
use uuid::Uuid;

use crate::{AggregateId, EventEnvelope, EventQuery, EventStoreError, OutboxMessage, Result, Version};

/// Concurrency guard for an append.
#[derive(Debug, Clone, Copy, Default)]
pub struct AppendOptions {
    /// Version the stream must be at before the append. `None` skips the check.
    pub expected_version: Option<Version>,
}

impl AppendOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expect_version(version: Version) -> Self {
        Self {
            expected_version: Some(version),
        }
    }

    /// The stream must not exist yet.
    pub fn expect_new() -> Self {
        Self::expect_version(Version::initial())
    }
}

/// Storage for aggregate event streams.
///
/// Implementations must be safe to share between concurrently running command
/// handlers.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Appends a batch of events to one stream, all or nothing.
    ///
    /// Fails with [`EventStoreError::ConcurrencyConflict`] when
    /// `options.expected_version` doesn't match the stream. Returns the stream
    /// version after the append.
    async fn append(&self, events: Vec<EventEnvelope>, options: AppendOptions) -> Result<Version> {
        self.append_with_outbox(events, options, Vec::new()).await
    }

    /// Like [`append`](Self::append), and records `outbox` in the same write.
    /// Either the events and the messages are all stored or none are.
    async fn append_with_outbox(
        &self,
        events: Vec<EventEnvelope>,
        options: AppendOptions,
        outbox: Vec<OutboxMessage>,
    ) -> Result<Version>;

    /// Messages not yet marked dispatched, oldest first.
    async fn pending_outbox(&self) -> Result<Vec<OutboxMessage>>;

    /// Drops a delivered message. Unknown ids are ignored.
    async fn mark_dispatched(&self, id: Uuid) -> Result<()>;

    /// All events of one stream, oldest first.
    async fn load_stream(&self, aggregate_id: AggregateId) -> Result<Vec<EventEnvelope>>;

    /// Events across all streams matching `query`, in recording order.
    async fn query_events(&self, query: EventQuery) -> Result<Vec<EventEnvelope>>;

    /// Current version of a stream, `None` if it has no events.
    async fn stream_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>>;
}

/// Checks that a batch targets a single stream with consecutive versions.
pub fn validate_batch(events: &[EventEnvelope]) -> Result<()> {
    let Some(first) = events.first() else {
        return Err(EventStoreError::InvalidAppend(
            "cannot append an empty batch".to_string(),
        ));
    };

    let mut expected = first.version;
    for event in &events[1..] {
        if event.aggregate_id != first.aggregate_id {
            return Err(EventStoreError::InvalidAppend(
                "all events must belong to the same aggregate".to_string(),
            ));
        }
        expected = expected.next();
        if event.version != expected {
            return Err(EventStoreError::InvalidAppend(format!(
                "versions must be consecutive: expected {expected}, got {}",
                event.version
            )));
        }
    }

    Ok(())
}
