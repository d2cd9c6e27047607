//! Shared types for the order fulfillment workspace.

pub mod ids;
pub mod notification;

pub use ids::{AggregateId, CustomerId};
pub use notification::DomainNotification;
