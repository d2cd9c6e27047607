//! Loading and persisting orders and vouchers.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{AggregateId, CustomerId};
use event_store::{AppendOptions, EventEnvelope, EventQuery, EventStore, OutboxMessage, Version};
use tokio::sync::{OnceCell, RwLock};
use uuid::Uuid;

use crate::aggregate::{Aggregate, DomainEvent};
use crate::error::DomainError;
use crate::integration::IntegrationEvent;
use crate::order::{Order, OrderEvent, OrderItem, OrderStatus, ProductId, Voucher};

/// First business code handed out to a new order.
pub const FIRST_ORDER_CODE: u64 = 1000;

/// Lookup and redemption of vouchers by code.
#[async_trait]
pub trait VoucherStore: Send + Sync {
    async fn find_by_code(&self, code: &str) -> Result<Option<Voucher>, DomainError>;

    /// Consumes one use of the voucher in a single step and returns it as
    /// stored afterwards. `None` if the code is unknown.
    async fn redeem(&self, code: &str, at: DateTime<Utc>) -> Result<Option<Voucher>, DomainError>;
}

/// Voucher store kept in memory, keyed by code.
#[derive(Clone, Default)]
pub struct InMemoryVoucherStore {
    vouchers: Arc<RwLock<HashMap<String, Voucher>>>,
}

impl InMemoryVoucherStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn with_vouchers(vouchers: impl IntoIterator<Item = Voucher>) -> Self {
        let store = Self::new();
        {
            let mut map = store.vouchers.write().await;
            for voucher in vouchers {
                map.insert(voucher.code().to_string(), voucher);
            }
        }
        store
    }
}

#[async_trait]
impl VoucherStore for InMemoryVoucherStore {
    async fn find_by_code(&self, code: &str) -> Result<Option<Voucher>, DomainError> {
        Ok(self.vouchers.read().await.get(code).cloned())
    }

    async fn redeem(&self, code: &str, at: DateTime<Utc>) -> Result<Option<Voucher>, DomainError> {
        let mut vouchers = self.vouchers.write().await;
        Ok(vouchers.get_mut(code).map(|voucher| {
            voucher.redeem(at);
            voucher.clone()
        }))
    }
}

/// Order persistence on top of an event store.
///
/// Clones share the store, the voucher lookup and the code sequence. The
/// sequence is seeded from the store on first use, so a repository opened
/// over existing orders continues after the highest code. Repositories
/// writing to the same store at the same time must be clones of one another.
#[derive(Clone)]
pub struct OrderRepository<S: EventStore> {
    store: S,
    vouchers: Arc<dyn VoucherStore>,
    next_code: Arc<OnceCell<AtomicU64>>,
}

impl<S: EventStore> OrderRepository<S> {
    pub fn new(store: S, vouchers: Arc<dyn VoucherStore>) -> Self {
        Self {
            store,
            vouchers,
            next_code: Arc::new(OnceCell::new()),
        }
    }

    /// Returns a reference to the underlying event store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Next sequential order code.
    pub async fn next_code(&self) -> Result<u64, DomainError> {
        let sequence = self
            .next_code
            .get_or_try_init(|| self.seed_code_sequence())
            .await?;
        Ok(sequence.fetch_add(1, Ordering::SeqCst))
    }

    async fn seed_code_sequence(&self) -> Result<AtomicU64, DomainError> {
        let started = self
            .store
            .query_events(
                EventQuery::new()
                    .aggregate_type(Order::aggregate_type())
                    .event_type("DraftOrderStarted"),
            )
            .await?;

        let mut next = FIRST_ORDER_CODE;
        for envelope in &started {
            if let OrderEvent::DraftOrderStarted(data) = envelope.decode::<OrderEvent>()? {
                next = next.max(data.code.saturating_add(1));
            }
        }
        tracing::debug!(next_code = next, orders = started.len(), "order code sequence seeded");
        Ok(AtomicU64::new(next))
    }

    /// Rebuilds an order from its stream. `None` if the stream is empty.
    #[tracing::instrument(skip(self))]
    pub async fn find_by_id(&self, order_id: AggregateId) -> Result<Option<Order>, DomainError> {
        let envelopes = self.store.load_stream(order_id).await?;
        let Some(last) = envelopes.last() else {
            return Ok(None);
        };
        let version = last.version;

        let events = envelopes
            .iter()
            .map(EventEnvelope::decode::<OrderEvent>)
            .collect::<Result<Vec<_>, _>>()?;

        let order = Order::from_history(events, version);
        if order.id() != Some(order_id) {
            return Err(DomainError::CorruptStream {
                aggregate_type: Order::aggregate_type(),
                aggregate_id: order_id.to_string(),
                reason: "stream does not start with DraftOrderStarted".to_string(),
            });
        }
        Ok(Some(order))
    }

    /// The customer's current draft, the most recently started one if there
    /// are several.
    #[tracing::instrument(skip(self))]
    pub async fn find_draft_by_customer(
        &self,
        customer_id: CustomerId,
    ) -> Result<Option<Order>, DomainError> {
        let started = self
            .store
            .query_events(
                EventQuery::new()
                    .aggregate_type(Order::aggregate_type())
                    .event_type("DraftOrderStarted"),
            )
            .await?;

        for envelope in started.iter().rev() {
            let OrderEvent::DraftOrderStarted(data) = envelope.decode::<OrderEvent>()? else {
                continue;
            };
            if data.customer_id != customer_id {
                continue;
            }
            if let Some(order) = self.find_by_id(data.order_id).await?
                && order.status() == OrderStatus::Draft
            {
                return Ok(Some(order));
            }
        }

        Ok(None)
    }

    pub async fn find_item(
        &self,
        order_id: AggregateId,
        product_id: &ProductId,
    ) -> Result<Option<OrderItem>, DomainError> {
        Ok(self
            .find_by_id(order_id)
            .await?
            .and_then(|order| order.get_item(product_id).cloned()))
    }

    pub async fn find_voucher_by_code(&self, code: &str) -> Result<Option<Voucher>, DomainError> {
        self.vouchers.find_by_code(code).await
    }

    /// Consumes one use of a voucher.
    pub async fn redeem_voucher(&self, code: &str) -> Result<Option<Voucher>, DomainError> {
        self.vouchers.redeem(code, Utc::now()).await
    }

    /// Committed integration events not yet delivered, oldest first, with
    /// the outbox id to confirm each one.
    pub async fn undelivered_events(&self) -> Result<Vec<(Uuid, IntegrationEvent)>, DomainError> {
        self.store
            .pending_outbox()
            .await?
            .iter()
            .map(|message| Ok((message.id, message.decode::<IntegrationEvent>()?)))
            .collect()
    }

    /// Removes a delivered event from the outbox.
    pub async fn confirm_delivery(&self, id: Uuid) -> Result<(), DomainError> {
        Ok(self.store.mark_dispatched(id).await?)
    }

    /// Starts a unit of work for one command.
    pub fn unit_of_work(&self, command: &'static str) -> UnitOfWork<'_, S> {
        UnitOfWork {
            repository: self,
            command,
            orders: Vec::new(),
            messages: Vec::new(),
        }
    }
}

/// Collects the orders a command touched and persists them in one commit.
///
/// Each order's pending events are appended as one batch guarded by the
/// version the order was loaded at, so an order's state and its events are
/// written together or not at all. Recorded integration events go to the
/// outbox in the first order's append.
pub struct UnitOfWork<'a, S: EventStore> {
    repository: &'a OrderRepository<S>,
    command: &'static str,
    orders: Vec<Order>,
    messages: Vec<IntegrationEvent>,
}

impl<S: EventStore> UnitOfWork<'_, S> {
    /// Registers a newly created order.
    pub fn add(&mut self, order: Order) {
        self.orders.push(order);
    }

    /// Registers a loaded order that was changed.
    pub fn update(&mut self, order: Order) {
        self.orders.push(order);
    }

    /// Queues an integration event to be committed with the orders.
    pub fn record(&mut self, event: IntegrationEvent) {
        self.messages.push(event);
    }

    /// Persists every registered order's pending events.
    ///
    /// Returns `Ok(false)` when there was nothing to write.
    pub async fn commit(mut self) -> Result<bool, DomainError> {
        let mut written = 0;

        for order in &mut self.orders {
            let Some(order_id) = order.id() else {
                continue;
            };
            let events = order.take_pending_events();
            if events.is_empty() {
                continue;
            }

            let loaded_version = order.version();
            let envelopes = build_envelopes(
                order_id,
                order.customer_id(),
                loaded_version,
                &events,
                self.command,
            )?;
            let options = if loaded_version == Version::initial() {
                AppendOptions::expect_new()
            } else {
                AppendOptions::expect_version(loaded_version)
            };
            let outbox = std::mem::take(&mut self.messages)
                .iter()
                .map(|event| OutboxMessage::new(order_id, event.name(), event))
                .collect::<Result<Vec<_>, _>>()?;

            let new_version = self
                .repository
                .store
                .append_with_outbox(envelopes, options, outbox)
                .await?;
            order.set_version(new_version);
            written += events.len();

            tracing::debug!(
                %order_id,
                command = self.command,
                events = events.len(),
                %new_version,
                "order committed"
            );
        }

        Ok(written > 0)
    }
}

fn build_envelopes(
    order_id: AggregateId,
    customer_id: Option<CustomerId>,
    loaded_version: Version,
    events: &[OrderEvent],
    command: &'static str,
) -> Result<Vec<EventEnvelope>, DomainError> {
    let mut envelopes = Vec::with_capacity(events.len());
    let mut version = loaded_version;

    for event in events {
        version = version.next();
        let mut builder = EventEnvelope::builder()
            .aggregate_id(order_id)
            .aggregate_type(Order::aggregate_type())
            .event_type(event.event_type())
            .version(version)
            .payload(event)?
            .metadata("command", command);
        if let Some(customer_id) = customer_id {
            builder = builder.metadata("customer_id", customer_id.to_string());
        }
        envelopes.push(builder.build()?);
    }

    Ok(envelopes)
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use event_store::InMemoryEventStore;

    use super::*;
    use crate::order::{Money, VoucherDiscount};

    fn repository() -> OrderRepository<InMemoryEventStore> {
        OrderRepository::new(
            InMemoryEventStore::new(),
            Arc::new(InMemoryVoucherStore::new()),
        )
    }

    async fn draft_with_item(
        repo: &OrderRepository<InMemoryEventStore>,
        customer: CustomerId,
    ) -> Order {
        let code = repo.next_code().await.unwrap();
        let mut order = Order::start_draft(AggregateId::new(), customer, code);
        order
            .add_item(OrderItem::new("SKU-1", "Widget", 2, Money::from_cents(1000)))
            .unwrap();
        order
    }

    #[tokio::test]
    async fn commit_persists_and_reload_rebuilds() {
        let repo = repository();
        let customer = CustomerId::new();
        let order = draft_with_item(&repo, customer).await;
        let order_id = order.id().unwrap();

        let mut uow = repo.unit_of_work("AddItem");
        uow.add(order);
        assert!(uow.commit().await.unwrap());

        let loaded = repo.find_by_id(order_id).await.unwrap().unwrap();
        assert_eq!(loaded.version(), Version::new(2));
        assert_eq!(loaded.total_value().cents(), 2000);
        assert_eq!(loaded.code(), FIRST_ORDER_CODE);

        let stream = repo.store().load_stream(order_id).await.unwrap();
        assert_eq!(
            stream[0].metadata.get("command").map(String::as_str),
            Some("AddItem")
        );
    }

    #[tokio::test]
    async fn commit_without_changes_returns_false() {
        let repo = repository();
        let mut uow = repo.unit_of_work("FinalizeOrder");
        uow.update(Order::default());
        assert!(!uow.commit().await.unwrap());
    }

    #[tokio::test]
    async fn stale_order_commit_conflicts() {
        let repo = repository();
        let customer = CustomerId::new();
        let order = draft_with_item(&repo, customer).await;
        let order_id = order.id().unwrap();
        let mut uow = repo.unit_of_work("AddItem");
        uow.add(order);
        uow.commit().await.unwrap();

        let mut first = repo.find_by_id(order_id).await.unwrap().unwrap();
        let mut second = repo.find_by_id(order_id).await.unwrap().unwrap();
        first.remove_item(ProductId::new("SKU-1")).unwrap();
        second
            .update_item_quantity(ProductId::new("SKU-1"), 4)
            .unwrap();

        let mut uow = repo.unit_of_work("RemoveItem");
        uow.update(first);
        assert!(uow.commit().await.unwrap());

        let mut uow = repo.unit_of_work("UpdateItem");
        uow.update(second);
        let err = uow.commit().await.unwrap_err();
        assert!(err.is_conflict());

        let reloaded = repo.find_by_id(order_id).await.unwrap().unwrap();
        assert!(!reloaded.has_items());
    }

    #[tokio::test]
    async fn finds_latest_draft_for_customer_only() {
        let repo = repository();
        let customer = CustomerId::new();
        assert!(repo.find_draft_by_customer(customer).await.unwrap().is_none());

        let mut started = draft_with_item(&repo, customer).await;
        started.start().unwrap();
        let newer = draft_with_item(&repo, customer).await;
        let newer_id = newer.id().unwrap();
        let other = draft_with_item(&repo, CustomerId::new()).await;

        let mut uow = repo.unit_of_work("AddItem");
        uow.add(started);
        uow.add(newer);
        uow.add(other);
        uow.commit().await.unwrap();

        let found = repo.find_draft_by_customer(customer).await.unwrap().unwrap();
        assert_eq!(found.id(), Some(newer_id));
    }

    #[tokio::test]
    async fn find_item_and_voucher() {
        let vouchers = InMemoryVoucherStore::with_vouchers([Voucher::new(
            "PROMO-10",
            VoucherDiscount::Percentage(10),
            3,
            Utc::now() + Duration::days(1),
        )])
        .await;
        let repo = OrderRepository::new(InMemoryEventStore::new(), Arc::new(vouchers));
        let order = draft_with_item(&repo, CustomerId::new()).await;
        let order_id = order.id().unwrap();
        let mut uow = repo.unit_of_work("AddItem");
        uow.add(order);
        uow.commit().await.unwrap();

        let item = repo
            .find_item(order_id, &ProductId::new("SKU-1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(item.quantity, 2);
        assert!(
            repo.find_item(order_id, &ProductId::new("SKU-9"))
                .await
                .unwrap()
                .is_none()
        );
        assert!(repo.find_voucher_by_code("PROMO-10").await.unwrap().is_some());
        assert!(repo.find_voucher_by_code("NOPE").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn codes_are_sequential() {
        let repo = repository();
        assert_eq!(repo.next_code().await.unwrap(), 1000);
        assert_eq!(repo.next_code().await.unwrap(), 1001);
        assert_eq!(repo.clone().next_code().await.unwrap(), 1002);
    }

    #[tokio::test]
    async fn reopened_repository_continues_after_the_highest_code() {
        let store = InMemoryEventStore::new();
        let repo = OrderRepository::new(store.clone(), Arc::new(InMemoryVoucherStore::new()));
        let mut uow = repo.unit_of_work("AddItem");
        uow.add(draft_with_item(&repo, CustomerId::new()).await);
        uow.add(draft_with_item(&repo, CustomerId::new()).await);
        uow.commit().await.unwrap();

        let reopened = OrderRepository::new(store, Arc::new(InMemoryVoucherStore::new()));

        assert_eq!(reopened.next_code().await.unwrap(), 1002);
        assert_eq!(reopened.next_code().await.unwrap(), 1003);
    }

    #[tokio::test]
    async fn recorded_events_are_committed_to_the_outbox() {
        let repo = repository();
        let customer = CustomerId::new();
        let order = draft_with_item(&repo, customer).await;
        let order_id = order.id().unwrap();

        let mut uow = repo.unit_of_work("AddItem");
        uow.add(order);
        uow.record(IntegrationEvent::payment_accepted(order_id, customer));
        assert!(uow.commit().await.unwrap());

        let undelivered = repo.undelivered_events().await.unwrap();
        assert_eq!(undelivered.len(), 1);
        assert_eq!(undelivered[0].1.name(), "PaymentAccepted");
        assert_eq!(undelivered[0].1.order_id(), order_id);

        repo.confirm_delivery(undelivered[0].0).await.unwrap();
        assert!(repo.undelivered_events().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_commit_leaves_no_outbox_entry() {
        let repo = repository();
        let customer = CustomerId::new();
        let order = draft_with_item(&repo, customer).await;
        let order_id = order.id().unwrap();
        let stale = order.clone();
        let mut uow = repo.unit_of_work("AddItem");
        uow.add(order);
        uow.commit().await.unwrap();

        let mut uow = repo.unit_of_work("AddItem");
        uow.add(stale);
        uow.record(IntegrationEvent::payment_accepted(order_id, customer));
        assert!(uow.commit().await.unwrap_err().is_conflict());

        assert!(repo.undelivered_events().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn redeeming_consumes_voucher_uses() {
        let vouchers = InMemoryVoucherStore::with_vouchers([Voucher::new(
            "ONCE",
            VoucherDiscount::Percentage(10),
            1,
            Utc::now() + Duration::days(1),
        )])
        .await;
        let repo = OrderRepository::new(InMemoryEventStore::new(), Arc::new(vouchers));

        let redeemed = repo.redeem_voucher("ONCE").await.unwrap().unwrap();
        assert_eq!(redeemed.remaining_quantity(), 0);
        assert!(redeemed.is_used());

        let stored = repo.find_voucher_by_code("ONCE").await.unwrap().unwrap();
        assert!(stored.validate_applicable().has_failure("VoucherUnavailable"));
        assert!(repo.redeem_voucher("NOPE").await.unwrap().is_none());
    }
}
