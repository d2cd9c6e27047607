//! Order aggregate and related types.

mod aggregate;
mod commands;
mod events;
mod status;
mod value_objects;
mod voucher;

pub use aggregate::Order;
pub use commands::*;
pub use events::{
    DraftOrderStartedData, ItemAddedData, ItemQuantityUpdatedData, ItemRemovedData,
    OrderEvent, OrderFinalizedData, OrderRevertedData, OrderStartedData, RevertReason,
    VoucherAppliedData,
};
pub use status::OrderStatus;
pub use value_objects::{
    CardInfo, MAX_ITEM_QUANTITY, MAX_UNIT_PRICE, MIN_ITEM_QUANTITY, Money, OrderItem, OrderLine, ProductId,
    is_valid_item_quantity,
};
pub use voucher::{Voucher, VoucherDiscount};

use thiserror::Error;

use crate::validation::ValidationResult;

/// Business rule violations raised by the order aggregate.
#[derive(Debug, Error)]
pub enum OrderError {
    /// Order is not in a status that allows the action.
    #[error("Invalid state transition: cannot {action} from {current_state} state")]
    InvalidStateTransition {
        current_state: OrderStatus,
        action: &'static str,
    },

    #[error("Item not found: {product_id}")]
    ItemNotFound { product_id: String },

    #[error("Invalid quantity: {quantity} (must be between 1 and 15)")]
    InvalidQuantity { quantity: u32 },

    #[error("Invalid price: {price} (must be between 1 and 100000000 cents)")]
    InvalidPrice { price: i64 },

    /// The order total would not fit in a [`Money`].
    #[error("Order total is too large")]
    TotalTooLarge,

    #[error("Order has no items")]
    NoItems,

    /// Every applicability rule the voucher broke.
    #[error("Voucher not applicable: {0}")]
    VoucherNotApplicable(ValidationResult),
}
