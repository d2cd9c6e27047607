//! Order-fulfillment domain.
//!
//! This crate provides:
//! - the `Aggregate`/`DomainEvent` traits for event-sourced entities
//! - the order aggregate, its items and vouchers
//! - commands with structural validation
//! - integration events exchanged with inventory and payment
//! - the repository/unit of work over an event store
//! - the command handler

pub mod aggregate;
pub mod command;
pub mod error;
pub mod handler;
pub mod integration;
pub mod messaging;
pub mod order;
pub mod repository;
pub mod validation;

pub use aggregate::{Aggregate, DomainEvent};
pub use command::Command;
pub use error::{DomainError, PublishError};
pub use handler::OrderCommandHandler;
pub use integration::IntegrationEvent;
pub use messaging::{CommandSender, EventPublisher, NotificationLog, Notifier, RecordingPublisher};
pub use order::{
    AddItem, ApplyVoucher, CancelProcessing, CancelProcessingAndReverseStock, CardInfo,
    FinalizeOrder, MAX_UNIT_PRICE, Money, Order, OrderCommand, OrderError, OrderEvent, OrderItem,
    OrderLine, OrderStatus, ProductId, RemoveItem, RevertReason, StartOrder, UpdateItem, Voucher,
    VoucherDiscount,
};
pub use repository::{InMemoryVoucherStore, OrderRepository, UnitOfWork, VoucherStore};
pub use validation::{ValidationFailure, ValidationResult};
