use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    AggregateId, EventEnvelope, EventQuery, EventStoreError, OutboxMessage, Result, Version,
    store::{AppendOptions, EventStore, validate_batch},
};

/// Event store kept entirely in memory.
///
/// Clones share the same log. Used by tests and by the worker binary; it
/// honours the same concurrency contract a durable store would.
#[derive(Clone, Default)]
pub struct InMemoryEventStore {
    log: Arc<RwLock<Vec<EventEnvelope>>>,
    /// Always locked after `log` when both are held.
    outbox: Arc<RwLock<Vec<OutboxMessage>>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of events across all streams.
    pub async fn event_count(&self) -> usize {
        self.log.read().await.len()
    }

    /// Makes every subsequent call fail with [`EventStoreError::Unavailable`]
    /// until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(EventStoreError::Unavailable);
        }
        Ok(())
    }

    fn current_version(log: &[EventEnvelope], aggregate_id: AggregateId) -> Version {
        log.iter()
            .filter(|e| e.aggregate_id == aggregate_id)
            .map(|e| e.version)
            .max()
            .unwrap_or_default()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append_with_outbox(
        &self,
        events: Vec<EventEnvelope>,
        options: AppendOptions,
        outbox: Vec<OutboxMessage>,
    ) -> Result<Version> {
        self.check_available()?;
        validate_batch(&events)?;

        let aggregate_id = events[0].aggregate_id;
        let first_version = events[0].version;

        let mut log = self.log.write().await;
        let actual = Self::current_version(&log, aggregate_id);

        if let Some(expected) = options.expected_version
            && actual != expected
        {
            metrics::counter!("event_store_conflicts_total").increment(1);
            return Err(EventStoreError::ConcurrencyConflict {
                aggregate_id,
                expected,
                actual,
            });
        }

        if first_version != actual.next() {
            return Err(EventStoreError::ConcurrencyConflict {
                aggregate_id,
                expected: first_version,
                actual,
            });
        }

        let new_version = events
            .last()
            .map(|e| e.version)
            .unwrap_or(actual);
        tracing::trace!(
            %aggregate_id,
            count = events.len(),
            outbox = outbox.len(),
            %new_version,
            "events appended"
        );
        if !outbox.is_empty() {
            self.outbox.write().await.extend(outbox);
        }
        log.extend(events);

        Ok(new_version)
    }

    async fn pending_outbox(&self) -> Result<Vec<OutboxMessage>> {
        self.check_available()?;
        Ok(self.outbox.read().await.clone())
    }

    async fn mark_dispatched(&self, id: Uuid) -> Result<()> {
        self.check_available()?;
        self.outbox.write().await.retain(|m| m.id != id);
        Ok(())
    }

    async fn load_stream(&self, aggregate_id: AggregateId) -> Result<Vec<EventEnvelope>> {
        self.check_available()?;
        let log = self.log.read().await;
        let mut events: Vec<_> = log
            .iter()
            .filter(|e| e.aggregate_id == aggregate_id)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.version);
        Ok(events)
    }

    async fn query_events(&self, query: EventQuery) -> Result<Vec<EventEnvelope>> {
        self.check_available()?;
        let log = self.log.read().await;
        Ok(log.iter().filter(|e| query.matches(e)).cloned().collect())
    }

    async fn stream_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>> {
        self.check_available()?;
        let log = self.log.read().await;
        let version = Self::current_version(&log, aggregate_id);
        Ok((version != Version::initial()).then_some(version))
    }
}
