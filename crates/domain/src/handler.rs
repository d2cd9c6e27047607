//! Order command handling.
//!
//! Every command runs the same shape: structural validation, load (or create)
//! the order, one aggregate operation, one commit, then publication of the
//! resulting integration events. Problems the caller can act on become
//! notifications and a `false` result; only infrastructure faults are errors.
//!
//! Integration events are committed to the store's outbox together with the
//! order's events and published from there. An event whose publish fails
//! stays in the outbox until [`OrderCommandHandler::dispatch_pending`]
//! delivers it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use chrono::Utc;
use common::{AggregateId, CustomerId, DomainNotification};
use event_store::EventStore;
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

use crate::aggregate::Aggregate;
use crate::command::Command;
use crate::error::DomainError;
use crate::integration::IntegrationEvent;
use crate::messaging::{EventPublisher, Notifier};
use crate::order::{
    AddItem, ApplyVoucher, CancelProcessing, CancelProcessingAndReverseStock, FinalizeOrder,
    Order, OrderCommand, OrderError, OrderStatus, RemoveItem, RevertReason, StartOrder,
    UpdateItem,
};
use crate::repository::{OrderRepository, UnitOfWork};

const ORDER_KEY: &str = "order";
const ORDER_NOT_FOUND: &str = "Order not found";
const ITEM_NOT_FOUND: &str = "Order item not found";
const VOUCHER_NOT_FOUND: &str = "Voucher not found";

type CustomerLocks = Mutex<HashMap<CustomerId, Arc<tokio::sync::Mutex<()>>>>;

/// Handles every [`OrderCommand`].
///
/// Commands for the same customer are serialized by a per-customer lock;
/// the commit's version check catches anything that slips past it. A lock
/// is dropped from the map once no command holds or awaits it.
pub struct OrderCommandHandler<S: EventStore> {
    repository: OrderRepository<S>,
    publisher: Arc<dyn EventPublisher>,
    notifier: Arc<dyn Notifier>,
    customer_locks: CustomerLocks,
    /// One dispatcher drains the outbox at a time so events keep their order.
    dispatch_lock: tokio::sync::Mutex<()>,
}

/// A held customer lock.
struct CustomerGuard<'a> {
    locks: &'a CustomerLocks,
    customer_id: CustomerId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for CustomerGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // Only the map's own handle left: nobody holds or waits for it.
        if let Some(lock) = locks.get(&self.customer_id)
            && Arc::strong_count(lock) == 1
        {
            locks.remove(&self.customer_id);
        }
    }
}

impl<S: EventStore> OrderCommandHandler<S> {
    pub fn new(
        repository: OrderRepository<S>,
        publisher: Arc<dyn EventPublisher>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            repository,
            publisher,
            notifier,
            customer_locks: Mutex::new(HashMap::new()),
            dispatch_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn repository(&self) -> &OrderRepository<S> {
        &self.repository
    }

    /// Dispatches a command to its handler.
    ///
    /// `Ok(false)` means the command was refused and notifications explain
    /// why. `Err` means nothing was persisted because of a store fault or a
    /// lost concurrency race.
    #[tracing::instrument(skip(self, command), fields(command = command.name()))]
    pub async fn handle(&self, command: OrderCommand) -> Result<bool, DomainError> {
        let name = command.name();
        let started = Instant::now();

        let result = match command {
            OrderCommand::AddItem(c) => self.add_item(c).await,
            OrderCommand::UpdateItem(c) => self.update_item(c).await,
            OrderCommand::RemoveItem(c) => self.remove_item(c).await,
            OrderCommand::ApplyVoucher(c) => self.apply_voucher(c).await,
            OrderCommand::StartOrder(c) => self.start_order(c).await,
            OrderCommand::FinalizeOrder(c) => self.finalize_order(c).await,
            OrderCommand::CancelProcessing(c) => self.cancel_processing(c).await,
            OrderCommand::CancelProcessingAndReverseStock(c) => {
                self.cancel_processing_and_reverse_stock(c).await
            }
        };

        let outcome = match &result {
            Ok(true) => "accepted",
            Ok(false) => "refused",
            Err(_) => "failed",
        };
        metrics::counter!("order_commands_total", "command" => name, "outcome" => outcome)
            .increment(1);
        metrics::histogram!("order_command_duration_seconds", "command" => name)
            .record(started.elapsed().as_secs_f64());

        if let Err(ref e) = result {
            tracing::warn!(command = name, error = %e, "command failed");
        }
        result
    }

    /// Adds an item to the customer's draft, starting a draft if there is
    /// none.
    #[tracing::instrument(skip(self, command), fields(customer_id = %command.customer_id))]
    pub async fn add_item(&self, command: AddItem) -> Result<bool, DomainError> {
        if !self.validate(&command).await {
            return Ok(false);
        }
        let _guard = self.lock_customer(command.customer_id).await;

        let mut uow = self.repository.unit_of_work(command.name());
        let mut events = Vec::with_capacity(2);

        let (mut order, is_new) = match self
            .repository
            .find_draft_by_customer(command.customer_id)
            .await?
        {
            Some(order) => (order, false),
            None => {
                let order = Order::start_draft(
                    AggregateId::new(),
                    command.customer_id,
                    self.repository.next_code().await?,
                );
                (order, true)
            }
        };
        let order_id = require_id(&order)?;

        if let Err(e) = order.add_item(command.to_item()) {
            self.reject(e).await;
            return Ok(false);
        }

        if is_new {
            tracing::info!(%order_id, code = order.code(), "draft order started");
            events.push(IntegrationEvent::DraftOrderStarted {
                order_id,
                customer_id: command.customer_id,
                product_id: command.product_id.clone(),
                occurred_at: Utc::now(),
            });
            uow.add(order);
        } else {
            uow.update(order);
        }
        events.push(IntegrationEvent::OrderItemAdded {
            order_id,
            customer_id: command.customer_id,
            product_id: command.product_id,
            name: command.name,
            unit_price: command.unit_price,
            quantity: command.quantity,
            occurred_at: Utc::now(),
        });

        self.commit_and_publish(uow, events).await
    }

    #[tracing::instrument(skip(self, command), fields(customer_id = %command.customer_id))]
    pub async fn update_item(&self, command: UpdateItem) -> Result<bool, DomainError> {
        if !self.validate(&command).await {
            return Ok(false);
        }
        let _guard = self.lock_customer(command.customer_id).await;

        let Some(mut order) = self.draft_or_notify(command.customer_id).await? else {
            return Ok(false);
        };
        let order_id = require_id(&order)?;

        if self
            .repository
            .find_item(order_id, &command.product_id)
            .await?
            .is_none()
        {
            self.notify(ORDER_KEY, ITEM_NOT_FOUND).await;
            return Ok(false);
        }

        if let Err(e) = order.update_item_quantity(command.product_id.clone(), command.quantity) {
            self.reject(e).await;
            return Ok(false);
        }

        let mut uow = self.repository.unit_of_work(command.name());
        uow.update(order);
        let event = IntegrationEvent::OrderItemUpdated {
            order_id,
            customer_id: command.customer_id,
            product_id: command.product_id,
            quantity: command.quantity,
            occurred_at: Utc::now(),
        };
        self.commit_and_publish(uow, vec![event]).await
    }

    #[tracing::instrument(skip(self, command), fields(customer_id = %command.customer_id))]
    pub async fn remove_item(&self, command: RemoveItem) -> Result<bool, DomainError> {
        if !self.validate(&command).await {
            return Ok(false);
        }
        let _guard = self.lock_customer(command.customer_id).await;

        let Some(mut order) = self.draft_or_notify(command.customer_id).await? else {
            return Ok(false);
        };
        let order_id = require_id(&order)?;

        if self
            .repository
            .find_item(order_id, &command.product_id)
            .await?
            .is_none()
        {
            self.notify(ORDER_KEY, ITEM_NOT_FOUND).await;
            return Ok(false);
        }

        if let Err(e) = order.remove_item(command.product_id.clone()) {
            self.reject(e).await;
            return Ok(false);
        }

        let mut uow = self.repository.unit_of_work(command.name());
        uow.update(order);
        let event = IntegrationEvent::OrderItemRemoved {
            order_id,
            customer_id: command.customer_id,
            product_id: command.product_id,
            occurred_at: Utc::now(),
        };
        self.commit_and_publish(uow, vec![event]).await
    }

    #[tracing::instrument(skip(self, command), fields(customer_id = %command.customer_id, code = %command.code))]
    pub async fn apply_voucher(&self, command: ApplyVoucher) -> Result<bool, DomainError> {
        if !self.validate(&command).await {
            return Ok(false);
        }
        let _guard = self.lock_customer(command.customer_id).await;

        let Some(mut order) = self.draft_or_notify(command.customer_id).await? else {
            return Ok(false);
        };
        let order_id = require_id(&order)?;

        let Some(voucher) = self.repository.find_voucher_by_code(&command.code).await? else {
            self.notify(ORDER_KEY, VOUCHER_NOT_FOUND).await;
            return Ok(false);
        };
        let voucher_id = voucher.id();

        if let Err(e) = order.apply_voucher(voucher) {
            self.reject(e).await;
            return Ok(false);
        }

        let mut uow = self.repository.unit_of_work(command.name());
        uow.update(order);
        let event = IntegrationEvent::VoucherApplied {
            order_id,
            customer_id: command.customer_id,
            voucher_id,
            occurred_at: Utc::now(),
        };
        if !self.commit_and_publish(uow, vec![event]).await? {
            return Ok(false);
        }

        if let Some(voucher) = self.repository.redeem_voucher(&command.code).await? {
            tracing::debug!(
                code = voucher.code(),
                remaining = voucher.remaining_quantity(),
                "voucher redeemed"
            );
        }
        Ok(true)
    }

    /// Confirms the customer's draft and asks inventory and payment to act.
    #[tracing::instrument(skip(self, command), fields(customer_id = %command.customer_id))]
    pub async fn start_order(&self, command: StartOrder) -> Result<bool, DomainError> {
        if !self.validate(&command).await {
            return Ok(false);
        }
        let _guard = self.lock_customer(command.customer_id).await;

        let Some(mut order) = self.draft_or_notify(command.customer_id).await? else {
            return Ok(false);
        };
        let order_id = require_id(&order)?;

        if let Err(e) = order.start() {
            self.reject(e).await;
            return Ok(false);
        }

        let items = order.lines();
        let total_value = order.total_value();
        let mut uow = self.repository.unit_of_work(command.name());
        uow.update(order);

        let now = Utc::now();
        let events = vec![
            IntegrationEvent::StockReservationRequested {
                order_id,
                customer_id: command.customer_id,
                items: items.clone(),
                occurred_at: now,
            },
            IntegrationEvent::OrderStarted {
                order_id,
                customer_id: command.customer_id,
                items,
                total_value,
                card: command.card,
                occurred_at: now,
            },
        ];
        tracing::info!(%order_id, %total_value, "order started");
        self.commit_and_publish(uow, events).await
    }

    /// Marks the order paid. Re-delivery on a paid order succeeds without
    /// writing anything.
    #[tracing::instrument(skip(self, command), fields(order_id = %command.order_id))]
    pub async fn finalize_order(&self, command: FinalizeOrder) -> Result<bool, DomainError> {
        if !self.validate(&command).await {
            return Ok(false);
        }
        let _guard = self.lock_customer(command.customer_id).await;

        let Some(mut order) = self.order_or_notify(command.order_id).await? else {
            return Ok(false);
        };

        if order.status() == OrderStatus::Paid {
            tracing::debug!("order already finalized");
            return Ok(true);
        }

        if let Err(e) = order.finalize() {
            self.reject(e).await;
            return Ok(false);
        }

        let customer_id = order.customer_id().unwrap_or(command.customer_id);
        let mut uow = self.repository.unit_of_work(command.name());
        uow.update(order);
        let event = IntegrationEvent::OrderFinalized {
            order_id: command.order_id,
            customer_id,
            occurred_at: Utc::now(),
        };
        tracing::info!("order finalized");
        self.commit_and_publish(uow, vec![event]).await
    }

    /// Compensation after a stock rejection: back to draft, nothing to give
    /// back.
    #[tracing::instrument(skip(self, command), fields(order_id = %command.order_id))]
    pub async fn cancel_processing(&self, command: CancelProcessing) -> Result<bool, DomainError> {
        if !self.validate(&command).await {
            return Ok(false);
        }
        let _guard = self.lock_customer(command.customer_id).await;

        let Some(mut order) = self.order_or_notify(command.order_id).await? else {
            return Ok(false);
        };

        if let Err(e) = order.revert_to_draft(RevertReason::StockRejected) {
            self.reject(e).await;
            return Ok(false);
        }
        if !order.has_pending_events() {
            tracing::debug!("order already in draft");
            return Ok(true);
        }

        let mut uow = self.repository.unit_of_work(command.name());
        uow.update(order);
        tracing::info!("order reverted to draft after stock rejection");
        self.commit_and_publish(uow, Vec::new()).await
    }

    /// Compensation after a payment rejection: back to draft and ask
    /// inventory to credit the reserved items.
    ///
    /// The reversal is requested only when the order actually reverted, so a
    /// re-delivered rejection does not credit stock twice.
    #[tracing::instrument(skip(self, command), fields(order_id = %command.order_id))]
    pub async fn cancel_processing_and_reverse_stock(
        &self,
        command: CancelProcessingAndReverseStock,
    ) -> Result<bool, DomainError> {
        if !self.validate(&command).await {
            return Ok(false);
        }
        let _guard = self.lock_customer(command.customer_id).await;

        let Some(mut order) = self.order_or_notify(command.order_id).await? else {
            return Ok(false);
        };

        let items = order.lines();
        let customer_id = order.customer_id().unwrap_or(command.customer_id);

        if let Err(e) = order.revert_to_draft(RevertReason::PaymentRejected) {
            self.reject(e).await;
            return Ok(false);
        }
        if !order.has_pending_events() {
            tracing::debug!("order already in draft");
            return Ok(true);
        }

        let mut uow = self.repository.unit_of_work(command.name());
        uow.update(order);
        let event = IntegrationEvent::StockReversalRequested {
            order_id: command.order_id,
            customer_id,
            items,
            occurred_at: Utc::now(),
        };
        tracing::info!("order reverted to draft after payment rejection");
        self.commit_and_publish(uow, vec![event]).await
    }
}

// Shared steps
impl<S: EventStore> OrderCommandHandler<S> {
    async fn validate(&self, command: &impl Command) -> bool {
        let validation = command.validate();
        if validation.is_valid() {
            return true;
        }

        tracing::debug!(command = command.name(), %validation, "command rejected");
        for failure in validation.failures() {
            self.notify(command.name(), failure.message.clone()).await;
        }
        false
    }

    async fn lock_customer(&self, customer_id: CustomerId) -> CustomerGuard<'_> {
        let lock = {
            let mut locks = self
                .customer_locks
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            locks.entry(customer_id).or_default().clone()
        };
        CustomerGuard {
            locks: &self.customer_locks,
            customer_id,
            guard: Some(lock.lock_owned().await),
        }
    }

    #[cfg(test)]
    fn tracked_customers(&self) -> usize {
        self.customer_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    async fn draft_or_notify(&self, customer_id: CustomerId) -> Result<Option<Order>, DomainError> {
        let order = self.repository.find_draft_by_customer(customer_id).await?;
        if order.is_none() {
            self.notify(ORDER_KEY, ORDER_NOT_FOUND).await;
        }
        Ok(order)
    }

    async fn order_or_notify(&self, order_id: AggregateId) -> Result<Option<Order>, DomainError> {
        let order = self.repository.find_by_id(order_id).await?;
        if order.is_none() {
            self.notify(ORDER_KEY, ORDER_NOT_FOUND).await;
        }
        Ok(order)
    }

    async fn notify(&self, key: impl Into<String>, message: impl Into<String>) {
        self.notifier
            .notify(DomainNotification::new(key, message))
            .await;
    }

    async fn reject(&self, error: OrderError) {
        tracing::debug!(error = %error, "business rule violated");
        match error {
            OrderError::VoucherNotApplicable(validation) => {
                for notification in validation.to_notifications() {
                    self.notifier.notify(notification).await;
                }
            }
            other => self.notify(ORDER_KEY, other.to_string()).await,
        }
    }

    /// Commits the order together with its integration events, then
    /// publishes from the outbox. Nothing is published unless something was
    /// written. A failed publish leaves the event in the outbox and does not
    /// fail the command.
    async fn commit_and_publish(
        &self,
        mut uow: UnitOfWork<'_, S>,
        events: Vec<IntegrationEvent>,
    ) -> Result<bool, DomainError> {
        for event in events {
            uow.record(event);
        }
        if !uow.commit().await? {
            tracing::warn!("commit persisted no changes");
            return Ok(false);
        }

        if let Err(e) = self.dispatch_pending().await {
            tracing::error!(error = %e, "outbox dispatch failed, events stay queued");
        }
        Ok(true)
    }
}

// Outbox dispatch
impl<S: EventStore> OrderCommandHandler<S> {
    /// Publishes every committed integration event not yet delivered, oldest
    /// first, and returns how many went out.
    ///
    /// Stops at the first publish failure so later events never overtake an
    /// earlier one; the rest are retried on the next call. Delivery is at
    /// least once: an event may be published again if confirming it fails.
    pub async fn dispatch_pending(&self) -> Result<usize, DomainError> {
        let _dispatching = self.dispatch_lock.lock().await;

        let pending = self.repository.undelivered_events().await?;
        let queued = pending.len();
        let mut delivered = 0;
        for (id, event) in pending {
            if !self.deliver(id, event).await? {
                break;
            }
            delivered += 1;
        }
        metrics::gauge!("outbox_pending_events").set((queued - delivered) as f64);
        Ok(delivered)
    }

    async fn deliver(&self, id: Uuid, event: IntegrationEvent) -> Result<bool, DomainError> {
        let name = event.name();
        let order_id = event.order_id();
        if let Err(e) = self.publisher.publish(event).await {
            metrics::counter!("order_dispatch_failures_total", "event" => name).increment(1);
            tracing::error!(event = name, %order_id, error = %e, "failed to publish integration event");
            return Ok(false);
        }

        metrics::counter!("integration_events_published_total", "event" => name).increment(1);
        self.repository.confirm_delivery(id).await?;
        Ok(true)
    }
}

fn require_id(order: &Order) -> Result<AggregateId, DomainError> {
    order.id().ok_or_else(|| DomainError::CorruptStream {
        aggregate_type: Order::aggregate_type(),
        aggregate_id: "<none>".to_string(),
        reason: "order has no id".to_string(),
    })
}
