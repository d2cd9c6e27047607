//! Saga error types.

use domain::{DomainError, PublishError};
use thiserror::Error;

/// Errors that can occur while reacting to events or talking to the
/// inventory and payment collaborators.
#[derive(Debug, Error)]
pub enum SagaError {
    /// Not enough stock to debit a line.
    #[error("Insufficient stock for {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: String,
        requested: u32,
        available: u32,
    },

    /// Inventory service error.
    #[error("Inventory service error: {0}")]
    InventoryService(String),

    /// The charge was refused.
    #[error("Payment declined: {0}")]
    PaymentDeclined(String),

    /// Domain error.
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    /// A message could not be handed to the next stage.
    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
