//! The order aggregate: a customer's cart and its checkout lifecycle.

use chrono::{DateTime, Utc};
use common::{AggregateId, CustomerId};
use event_store::Version;
use serde::{Deserialize, Serialize};

use crate::aggregate::Aggregate;

use super::{
    MAX_UNIT_PRICE, Money, OrderError, OrderEvent, OrderItem, OrderLine, OrderStatus, ProductId,
    RevertReason, Voucher, is_valid_item_quantity,
    events::{DraftOrderStartedData, ItemAddedData, ItemQuantityUpdatedData},
};

/// A customer order, from draft cart to paid.
///
/// Owns its items (insertion ordered, unique by product) and at most one
/// voucher. `total_value` is always derived from them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Order {
    id: Option<AggregateId>,

    /// Version of the last persisted event.
    #[serde(default)]
    version: Version,

    customer_id: Option<CustomerId>,

    /// Sequential business reference.
    code: u64,

    status: OrderStatus,

    items: Vec<OrderItem>,

    voucher: Option<Voucher>,

    discount: Money,

    total_value: Money,

    created_at: Option<DateTime<Utc>>,

    #[serde(skip)]
    pending_events: Vec<OrderEvent>,
}

impl Aggregate for Order {
    type Event = OrderEvent;
    type Error = OrderError;

    fn aggregate_type() -> &'static str {
        "Order"
    }

    fn id(&self) -> Option<AggregateId> {
        self.id
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            OrderEvent::DraftOrderStarted(data) => self.apply_draft_started(data),
            OrderEvent::ItemAdded(data) => self.apply_item_added(data),
            OrderEvent::ItemQuantityUpdated(data) => self.apply_item_quantity_updated(data),
            OrderEvent::ItemRemoved(data) => {
                self.items.retain(|i| i.product_id != data.product_id);
                self.recalculate();
            }
            OrderEvent::VoucherApplied(data) => {
                self.voucher = Some(data.voucher);
                self.recalculate();
            }
            OrderEvent::OrderStarted(_) => self.status = OrderStatus::Started,
            OrderEvent::OrderFinalized(_) => self.status = OrderStatus::Paid,
            OrderEvent::OrderReverted(_) => self.status = OrderStatus::Draft,
        }
    }

    fn pending_events(&self) -> &[Self::Event] {
        &self.pending_events
    }

    fn take_pending_events(&mut self) -> Vec<Self::Event> {
        std::mem::take(&mut self.pending_events)
    }
}

// Accessors
impl Order {
    pub fn customer_id(&self) -> Option<CustomerId> {
        self.customer_id
    }

    pub fn code(&self) -> u64 {
        self.code
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    /// Items in insertion order.
    pub fn items(&self) -> &[OrderItem] {
        &self.items
    }

    pub fn get_item(&self, product_id: &ProductId) -> Option<&OrderItem> {
        self.items.iter().find(|i| &i.product_id == product_id)
    }

    pub fn has_item(&self, product_id: &ProductId) -> bool {
        self.get_item(product_id).is_some()
    }

    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    pub fn has_items(&self) -> bool {
        !self.items.is_empty()
    }

    /// Product and quantity of every row.
    pub fn lines(&self) -> Vec<OrderLine> {
        self.items.iter().map(OrderItem::to_line).collect()
    }

    /// Sum of the line totals before any discount.
    pub fn subtotal(&self) -> Money {
        self.items.iter().map(OrderItem::line_total).sum()
    }

    pub fn voucher(&self) -> Option<&Voucher> {
        self.voucher.as_ref()
    }

    pub fn discount_applied(&self) -> bool {
        self.voucher.is_some()
    }

    pub fn discount(&self) -> Money {
        self.discount
    }

    pub fn total_value(&self) -> Money {
        self.total_value
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }
}

// Command methods
impl Order {
    /// Starts a new draft order for a customer.
    ///
    /// # Panics
    ///
    /// Panics if either id is nil; commands carrying a nil customer are
    /// rejected before they reach the aggregate.
    pub fn start_draft(order_id: AggregateId, customer_id: CustomerId, code: u64) -> Self {
        assert!(!order_id.is_nil(), "order id must not be nil");
        assert!(!customer_id.is_nil(), "customer id must not be nil");

        let mut order = Order::default();
        order.record(vec![OrderEvent::draft_order_started(
            order_id,
            customer_id,
            code,
        )]);
        order
    }

    /// Adds an item, merging its quantity into an existing row for the same
    /// product.
    pub fn add_item(&mut self, item: OrderItem) -> Result<(), OrderError> {
        self.ensure_modifiable("add item")?;

        if !item.unit_price.is_positive() || item.unit_price > MAX_UNIT_PRICE {
            return Err(OrderError::InvalidPrice {
                price: item.unit_price.cents(),
            });
        }

        let event = match self.get_item(&item.product_id) {
            Some(existing) => {
                let new_quantity = existing.quantity.saturating_add(item.quantity);
                if item.quantity == 0 || !is_valid_item_quantity(new_quantity) {
                    return Err(OrderError::InvalidQuantity {
                        quantity: new_quantity,
                    });
                }
                self.ensure_total_fits(&item.product_id, new_quantity, existing.unit_price)?;
                OrderEvent::item_quantity_updated(item.product_id, existing.quantity, new_quantity)
            }
            None => {
                if !is_valid_item_quantity(item.quantity) {
                    return Err(OrderError::InvalidQuantity {
                        quantity: item.quantity,
                    });
                }
                self.ensure_total_fits(&item.product_id, item.quantity, item.unit_price)?;
                OrderEvent::item_added(&item)
            }
        };

        self.record(vec![event]);
        Ok(())
    }

    /// Sets the quantity of an existing row.
    pub fn update_item_quantity(
        &mut self,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<(), OrderError> {
        self.ensure_modifiable("update item quantity")?;

        let existing = self
            .get_item(&product_id)
            .ok_or_else(|| OrderError::ItemNotFound {
                product_id: product_id.to_string(),
            })?;

        if !is_valid_item_quantity(quantity) {
            return Err(OrderError::InvalidQuantity { quantity });
        }

        let old_quantity = existing.quantity;
        self.ensure_total_fits(&product_id, quantity, existing.unit_price)?;
        self.record(vec![OrderEvent::item_quantity_updated(
            product_id,
            old_quantity,
            quantity,
        )]);
        Ok(())
    }

    /// Removes a row. Removing the last one leaves an empty draft.
    pub fn remove_item(&mut self, product_id: ProductId) -> Result<(), OrderError> {
        self.ensure_modifiable("remove item")?;

        if !self.has_item(&product_id) {
            return Err(OrderError::ItemNotFound {
                product_id: product_id.to_string(),
            });
        }

        self.record(vec![OrderEvent::item_removed(product_id)]);
        Ok(())
    }

    /// Attaches a voucher, replacing any previous one.
    ///
    /// All applicability violations are returned together in
    /// [`OrderError::VoucherNotApplicable`]; nothing changes on failure.
    pub fn apply_voucher(&mut self, voucher: Voucher) -> Result<(), OrderError> {
        self.ensure_modifiable("apply voucher")?;

        let validation = voucher.validate_applicable();
        if !validation.is_valid() {
            return Err(OrderError::VoucherNotApplicable(validation));
        }

        self.record(vec![OrderEvent::voucher_applied(voucher)]);
        Ok(())
    }

    /// Confirms the order. Requires a draft with at least one item.
    pub fn start(&mut self) -> Result<(), OrderError> {
        if !self.status.can_start() {
            return Err(OrderError::InvalidStateTransition {
                current_state: self.status,
                action: "start",
            });
        }

        if !self.has_items() {
            return Err(OrderError::NoItems);
        }

        self.record(vec![OrderEvent::order_started(
            self.lines(),
            self.total_value,
        )]);
        Ok(())
    }

    /// Marks a started order as paid. Already paid orders are left alone.
    pub fn finalize(&mut self) -> Result<(), OrderError> {
        if self.status == OrderStatus::Paid {
            return Ok(());
        }

        if !self.status.can_finalize() {
            return Err(OrderError::InvalidStateTransition {
                current_state: self.status,
                action: "finalize",
            });
        }

        self.record(vec![OrderEvent::order_finalized()]);
        Ok(())
    }

    /// Returns a started order to draft. Drafts are left alone.
    ///
    /// Does not give back any debited stock.
    pub fn revert_to_draft(&mut self, reason: RevertReason) -> Result<(), OrderError> {
        if self.status == OrderStatus::Draft {
            return Ok(());
        }

        if !self.status.can_revert_to_draft() {
            return Err(OrderError::InvalidStateTransition {
                current_state: self.status,
                action: "revert to draft",
            });
        }

        self.record(vec![OrderEvent::order_reverted(reason)]);
        Ok(())
    }

    fn ensure_modifiable(&self, action: &'static str) -> Result<(), OrderError> {
        if self.status.can_modify_items() {
            Ok(())
        } else {
            Err(OrderError::InvalidStateTransition {
                current_state: self.status,
                action,
            })
        }
    }

    fn record(&mut self, events: Vec<OrderEvent>) {
        for event in events {
            self.apply(event.clone());
            self.pending_events.push(event);
        }
    }
}

// State transitions driven by events
impl Order {
    fn apply_draft_started(&mut self, data: DraftOrderStartedData) {
        self.id = Some(data.order_id);
        self.customer_id = Some(data.customer_id);
        self.code = data.code;
        self.created_at = Some(data.started_at);
        self.status = OrderStatus::Draft;
    }

    fn apply_item_added(&mut self, data: ItemAddedData) {
        self.items.push(OrderItem::new(
            data.product_id,
            data.name,
            data.quantity,
            data.unit_price,
        ));
        self.recalculate();
    }

    fn apply_item_quantity_updated(&mut self, data: ItemQuantityUpdatedData) {
        if let Some(item) = self
            .items
            .iter_mut()
            .find(|i| i.product_id == data.product_id)
        {
            item.quantity = data.new_quantity;
        }
        self.recalculate();
    }

    /// Fails unless the subtotal, with the row for `product_id` holding
    /// `quantity` at `unit_price`, fits in a [`Money`].
    fn ensure_total_fits(
        &self,
        product_id: &ProductId,
        quantity: u32,
        unit_price: Money,
    ) -> Result<(), OrderError> {
        let row = unit_price
            .checked_times(quantity)
            .ok_or(OrderError::TotalTooLarge)?;
        self.items
            .iter()
            .filter(|i| &i.product_id != product_id)
            .try_fold(row, |total, i| {
                i.checked_line_total().and_then(|line| total.checked_add(line))
            })
            .map(|_| ())
            .ok_or(OrderError::TotalTooLarge)
    }

    /// Re-derives the discount from the attached voucher and the total from
    /// the current rows.
    fn recalculate(&mut self) {
        let subtotal = self.subtotal();
        self.discount = self
            .voucher
            .as_ref()
            .map(|v| v.discount().amount_for(subtotal))
            .unwrap_or_default();
        self.total_value = subtotal.saturating_sub(self.discount);
    }
}
