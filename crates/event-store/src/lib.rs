//! Append-only event storage.
//!
//! Orders are persisted as streams of domain events. A commit appends the
//! events produced by one command, guarded by the stream version the command
//! observed when it loaded the aggregate. Outbox messages recorded in the
//! same append are kept until they are marked dispatched.

pub mod error;
pub mod event;
pub mod memory;
pub mod outbox;
pub mod query;
pub mod store;

pub use common::AggregateId;
pub use error::{EventStoreError, Result};
pub use event::{EventEnvelope, EventEnvelopeBuilder, Version};
pub use memory::InMemoryEventStore;
pub use outbox::OutboxMessage;
pub use query::EventQuery;
pub use store::{AppendOptions, EventStore};
