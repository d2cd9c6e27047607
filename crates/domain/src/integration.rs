//! Messages exchanged with the inventory and payment contexts.

use chrono::{DateTime, Utc};
use common::{AggregateId, CustomerId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::order::{CardInfo, Money, OrderLine, ProductId};

/// An event that crosses a bounded-context boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum IntegrationEvent {
    DraftOrderStarted {
        order_id: AggregateId,
        customer_id: CustomerId,
        product_id: ProductId,
        occurred_at: DateTime<Utc>,
    },

    OrderItemAdded {
        order_id: AggregateId,
        customer_id: CustomerId,
        product_id: ProductId,
        name: String,
        unit_price: Money,
        quantity: u32,
        occurred_at: DateTime<Utc>,
    },

    OrderItemUpdated {
        order_id: AggregateId,
        customer_id: CustomerId,
        product_id: ProductId,
        quantity: u32,
        occurred_at: DateTime<Utc>,
    },

    OrderItemRemoved {
        order_id: AggregateId,
        customer_id: CustomerId,
        product_id: ProductId,
        occurred_at: DateTime<Utc>,
    },

    VoucherApplied {
        order_id: AggregateId,
        customer_id: CustomerId,
        voucher_id: Uuid,
        occurred_at: DateTime<Utc>,
    },

    /// Inventory should debit these lines.
    StockReservationRequested {
        order_id: AggregateId,
        customer_id: CustomerId,
        items: Vec<OrderLine>,
        occurred_at: DateTime<Utc>,
    },

    /// Payment should charge `total_value` to `card`.
    OrderStarted {
        order_id: AggregateId,
        customer_id: CustomerId,
        items: Vec<OrderLine>,
        total_value: Money,
        card: CardInfo,
        occurred_at: DateTime<Utc>,
    },

    /// Inventory could not debit the order's lines.
    StockReservationRejected {
        order_id: AggregateId,
        customer_id: CustomerId,
        occurred_at: DateTime<Utc>,
    },

    PaymentAccepted {
        order_id: AggregateId,
        customer_id: CustomerId,
        occurred_at: DateTime<Utc>,
    },

    PaymentRejected {
        order_id: AggregateId,
        customer_id: CustomerId,
        occurred_at: DateTime<Utc>,
    },

    /// Inventory should credit these previously debited lines back.
    StockReversalRequested {
        order_id: AggregateId,
        customer_id: CustomerId,
        items: Vec<OrderLine>,
        occurred_at: DateTime<Utc>,
    },

    OrderFinalized {
        order_id: AggregateId,
        customer_id: CustomerId,
        occurred_at: DateTime<Utc>,
    },
}

impl IntegrationEvent {
    pub fn name(&self) -> &'static str {
        match self {
            IntegrationEvent::DraftOrderStarted { .. } => "DraftOrderStarted",
            IntegrationEvent::OrderItemAdded { .. } => "OrderItemAdded",
            IntegrationEvent::OrderItemUpdated { .. } => "OrderItemUpdated",
            IntegrationEvent::OrderItemRemoved { .. } => "OrderItemRemoved",
            IntegrationEvent::VoucherApplied { .. } => "VoucherApplied",
            IntegrationEvent::StockReservationRequested { .. } => "StockReservationRequested",
            IntegrationEvent::OrderStarted { .. } => "OrderStarted",
            IntegrationEvent::StockReservationRejected { .. } => "StockReservationRejected",
            IntegrationEvent::PaymentAccepted { .. } => "PaymentAccepted",
            IntegrationEvent::PaymentRejected { .. } => "PaymentRejected",
            IntegrationEvent::StockReversalRequested { .. } => "StockReversalRequested",
            IntegrationEvent::OrderFinalized { .. } => "OrderFinalized",
        }
    }

    pub fn order_id(&self) -> AggregateId {
        match self {
            IntegrationEvent::DraftOrderStarted { order_id, .. }
            | IntegrationEvent::OrderItemAdded { order_id, .. }
            | IntegrationEvent::OrderItemUpdated { order_id, .. }
            | IntegrationEvent::OrderItemRemoved { order_id, .. }
            | IntegrationEvent::VoucherApplied { order_id, .. }
            | IntegrationEvent::StockReservationRequested { order_id, .. }
            | IntegrationEvent::OrderStarted { order_id, .. }
            | IntegrationEvent::StockReservationRejected { order_id, .. }
            | IntegrationEvent::PaymentAccepted { order_id, .. }
            | IntegrationEvent::PaymentRejected { order_id, .. }
            | IntegrationEvent::StockReversalRequested { order_id, .. }
            | IntegrationEvent::OrderFinalized { order_id, .. } => *order_id,
        }
    }

    pub fn customer_id(&self) -> CustomerId {
        match self {
            IntegrationEvent::DraftOrderStarted { customer_id, .. }
            | IntegrationEvent::OrderItemAdded { customer_id, .. }
            | IntegrationEvent::OrderItemUpdated { customer_id, .. }
            | IntegrationEvent::OrderItemRemoved { customer_id, .. }
            | IntegrationEvent::VoucherApplied { customer_id, .. }
            | IntegrationEvent::StockReservationRequested { customer_id, .. }
            | IntegrationEvent::OrderStarted { customer_id, .. }
            | IntegrationEvent::StockReservationRejected { customer_id, .. }
            | IntegrationEvent::PaymentAccepted { customer_id, .. }
            | IntegrationEvent::PaymentRejected { customer_id, .. }
            | IntegrationEvent::StockReversalRequested { customer_id, .. }
            | IntegrationEvent::OrderFinalized { customer_id, .. } => *customer_id,
        }
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            IntegrationEvent::DraftOrderStarted { occurred_at, .. }
            | IntegrationEvent::OrderItemAdded { occurred_at, .. }
            | IntegrationEvent::OrderItemUpdated { occurred_at, .. }
            | IntegrationEvent::OrderItemRemoved { occurred_at, .. }
            | IntegrationEvent::VoucherApplied { occurred_at, .. }
            | IntegrationEvent::StockReservationRequested { occurred_at, .. }
            | IntegrationEvent::OrderStarted { occurred_at, .. }
            | IntegrationEvent::StockReservationRejected { occurred_at, .. }
            | IntegrationEvent::PaymentAccepted { occurred_at, .. }
            | IntegrationEvent::PaymentRejected { occurred_at, .. }
            | IntegrationEvent::StockReversalRequested { occurred_at, .. }
            | IntegrationEvent::OrderFinalized { occurred_at, .. } => *occurred_at,
        }
    }
}

// Constructors for the events other contexts send back
impl IntegrationEvent {
    pub fn stock_reservation_rejected(order_id: AggregateId, customer_id: CustomerId) -> Self {
        IntegrationEvent::StockReservationRejected {
            order_id,
            customer_id,
            occurred_at: Utc::now(),
        }
    }

    pub fn payment_accepted(order_id: AggregateId, customer_id: CustomerId) -> Self {
        IntegrationEvent::PaymentAccepted {
            order_id,
            customer_id,
            occurred_at: Utc::now(),
        }
    }

    pub fn payment_rejected(order_id: AggregateId, customer_id: CustomerId) -> Self {
        IntegrationEvent::PaymentRejected {
            order_id,
            customer_id,
            occurred_at: Utc::now(),
        }
    }
}
