//! Order fulfillment workflow.
//!
//! Starting an order asks inventory to reserve stock and payment to charge
//! the card. Their answers come back as integration events which the
//! [`OrderEventReactor`] turns into follow-up order commands:
//!
//! 1. Stock rejected: the order returns to draft.
//! 2. Payment accepted: the order is finalized.
//! 3. Payment rejected: the order returns to draft and its stock is released.
//!
//! [`FulfillmentPipeline`] runs all of this in process on tokio tasks, with
//! in-memory stand-ins for the inventory and payment contexts.

pub mod collaborators;
pub mod error;
pub mod pipeline;
pub mod reactor;
pub mod services;

pub use collaborators::CollaboratorStage;
pub use error::SagaError;
pub use pipeline::{
    ChannelCommandSender, FanOutPublisher, FulfillmentPipeline, PipelineConfig, handle_with_retry,
};
pub use reactor::OrderEventReactor;
pub use services::{
    InMemoryInventoryService, InMemoryPaymentService, InventoryService, PaymentResult,
    PaymentService,
};
