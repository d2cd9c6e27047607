//! Order domain events.

use chrono::{DateTime, Utc};
use common::{AggregateId, CustomerId};
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;

use super::{Money, OrderItem, OrderLine, ProductId, Voucher};

/// Events that can occur on an order aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum OrderEvent {
    /// A customer started a new draft.
    DraftOrderStarted(DraftOrderStartedData),

    /// Item was added. Merges into an existing row with the same product.
    ItemAdded(ItemAddedData),

    ItemQuantityUpdated(ItemQuantityUpdatedData),

    ItemRemoved(ItemRemovedData),

    VoucherApplied(VoucherAppliedData),

    /// Customer confirmed the order; stock and payment processing begins.
    OrderStarted(OrderStartedData),

    /// Payment was accepted.
    OrderFinalized(OrderFinalizedData),

    /// Processing was abandoned and the order is a draft again.
    OrderReverted(OrderRevertedData),
}

impl DomainEvent for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::DraftOrderStarted(_) => "DraftOrderStarted",
            OrderEvent::ItemAdded(_) => "ItemAdded",
            OrderEvent::ItemQuantityUpdated(_) => "ItemQuantityUpdated",
            OrderEvent::ItemRemoved(_) => "ItemRemoved",
            OrderEvent::VoucherApplied(_) => "VoucherApplied",
            OrderEvent::OrderStarted(_) => "OrderStarted",
            OrderEvent::OrderFinalized(_) => "OrderFinalized",
            OrderEvent::OrderReverted(_) => "OrderReverted",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftOrderStartedData {
    pub order_id: AggregateId,
    pub customer_id: CustomerId,

    /// Sequential business reference.
    pub code: u64,

    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemAddedData {
    pub product_id: ProductId,
    pub name: String,
    pub quantity: u32,

    /// Unit price at the time of adding.
    pub unit_price: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemQuantityUpdatedData {
    pub product_id: ProductId,
    pub old_quantity: u32,
    pub new_quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRemovedData {
    pub product_id: ProductId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoucherAppliedData {
    /// The voucher as it was when applied.
    pub voucher: Voucher,
    pub applied_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderStartedData {
    /// Everything the inventory context must reserve.
    pub items: Vec<OrderLine>,

    /// Total at confirmation time.
    pub total_value: Money,

    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderFinalizedData {
    pub finalized_at: DateTime<Utc>,
}

/// Why an order went back to draft.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RevertReason {
    /// Inventory could not reserve the items; nothing was debited.
    StockRejected,

    /// Payment was declined after stock had been debited.
    PaymentRejected,
}

impl RevertReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RevertReason::StockRejected => "StockRejected",
            RevertReason::PaymentRejected => "PaymentRejected",
        }
    }
}

impl std::fmt::Display for RevertReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRevertedData {
    pub reason: RevertReason,
    pub reverted_at: DateTime<Utc>,
}

// Convenience constructors for events
impl OrderEvent {
    pub fn draft_order_started(order_id: AggregateId, customer_id: CustomerId, code: u64) -> Self {
        OrderEvent::DraftOrderStarted(DraftOrderStartedData {
            order_id,
            customer_id,
            code,
            started_at: Utc::now(),
        })
    }

    pub fn item_added(item: &OrderItem) -> Self {
        OrderEvent::ItemAdded(ItemAddedData {
            product_id: item.product_id.clone(),
            name: item.name.clone(),
            quantity: item.quantity,
            unit_price: item.unit_price,
        })
    }

    pub fn item_quantity_updated(
        product_id: ProductId,
        old_quantity: u32,
        new_quantity: u32,
    ) -> Self {
        OrderEvent::ItemQuantityUpdated(ItemQuantityUpdatedData {
            product_id,
            old_quantity,
            new_quantity,
        })
    }

    pub fn item_removed(product_id: ProductId) -> Self {
        OrderEvent::ItemRemoved(ItemRemovedData { product_id })
    }

    pub fn voucher_applied(voucher: Voucher) -> Self {
        OrderEvent::VoucherApplied(VoucherAppliedData {
            voucher,
            applied_at: Utc::now(),
        })
    }

    pub fn order_started(items: Vec<OrderLine>, total_value: Money) -> Self {
        OrderEvent::OrderStarted(OrderStartedData {
            items,
            total_value,
            started_at: Utc::now(),
        })
    }

    pub fn order_finalized() -> Self {
        OrderEvent::OrderFinalized(OrderFinalizedData {
            finalized_at: Utc::now(),
        })
    }

    pub fn order_reverted(reason: RevertReason) -> Self {
        OrderEvent::OrderReverted(OrderRevertedData {
            reason,
            reverted_at: Utc::now(),
        })
    }
}
