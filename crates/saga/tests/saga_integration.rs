//! End-to-end tests for the fulfillment pipeline.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::{AggregateId, CustomerId};
use domain::{
    Aggregate, AddItem, ApplyVoucher, CardInfo, InMemoryVoucherStore, Money, NotificationLog, Order,
    OrderCommand, OrderCommandHandler, OrderRepository, OrderStatus, ProductId, StartOrder, Voucher,
    VoucherDiscount,
};
use event_store::{EventStore, InMemoryEventStore};
use saga::{
    FanOutPublisher, FulfillmentPipeline, InMemoryInventoryService, InMemoryPaymentService,
    PipelineConfig,
};

const SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

struct TestHarness {
    pipeline: FulfillmentPipeline<InMemoryEventStore>,
    store: InMemoryEventStore,
    inventory: InMemoryInventoryService,
    payment: InMemoryPaymentService,
    notifications: NotificationLog,
}

impl TestHarness {
    async fn new() -> Self {
        Self::with_store(InMemoryEventStore::new()).await
    }

    async fn with_store(store: InMemoryEventStore) -> Self {
        let vouchers = InMemoryVoucherStore::with_vouchers([Voucher::new(
            "TEN-PERCENT",
            VoucherDiscount::Percentage(10),
            5,
            Utc::now() + chrono::Duration::days(7),
        )])
        .await;
        let inventory = InMemoryInventoryService::with_stock([("SKU-001", 10), ("SKU-002", 4)]);
        let payment = InMemoryPaymentService::new();
        let notifications = NotificationLog::new();

        let pipeline = FulfillmentPipeline::start(
            PipelineConfig::default(),
            OrderRepository::new(store.clone(), Arc::new(vouchers)),
            Arc::new(notifications.clone()),
            inventory.clone(),
            payment.clone(),
        );

        Self {
            pipeline,
            store,
            inventory,
            payment,
            notifications,
        }
    }

    /// Fills a cart with 2 x SKU-001 at $10 and 1 x SKU-002 at $25 and
    /// starts it. Returns the order id.
    async fn checkout(&self, customer: CustomerId) -> AggregateId {
        for command in [
            AddItem::new(customer, "SKU-001", "Widget", 2, Money::from_cents(1000)),
            AddItem::new(customer, "SKU-002", "Gadget", 1, Money::from_cents(2500)),
        ] {
            assert!(self.pipeline.execute(command.into()).await.unwrap());
        }

        let order_id = self
            .pipeline
            .handler()
            .repository()
            .find_draft_by_customer(customer)
            .await
            .unwrap()
            .and_then(|o| o.id())
            .expect("draft should exist");

        let card = CardInfo::new("Ada Lovelace", "4111 1111 1111 1111", "12/30", "123");
        assert!(
            self.pipeline
                .execute(StartOrder::new(customer, card).into())
                .await
                .unwrap()
        );
        order_id
    }

    async fn settle(&self, order_id: AggregateId, statuses: &[OrderStatus]) -> Order {
        self.pipeline
            .wait_for_status(order_id, statuses, SETTLE_TIMEOUT)
            .await
            .unwrap()
            .expect("order should exist")
    }

    async fn eventually(&self, condition: impl Fn() -> bool) -> bool {
        let deadline = tokio::time::Instant::now() + SETTLE_TIMEOUT;
        while tokio::time::Instant::now() < deadline {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        condition()
    }

    fn stock(&self, sku: &str) -> u32 {
        self.inventory.stock_of(&ProductId::new(sku))
    }
}

#[tokio::test]
async fn test_happy_path_reaches_paid() {
    let h = TestHarness::new().await;
    let order_id = h.checkout(CustomerId::new()).await;

    let order = h.settle(order_id, &[OrderStatus::Paid]).await;

    assert_eq!(order.status(), OrderStatus::Paid);
    assert_eq!(h.stock("SKU-001"), 8);
    assert_eq!(h.stock("SKU-002"), 3);
    assert_eq!(h.payment.payment_count(), 1);
    assert_eq!(h.payment.total_charged(), Money::from_cents(4500));
    assert!(!h.notifications.has_notifications());

    h.pipeline.shutdown().await;
}

#[tokio::test]
async fn test_voucher_discount_is_what_gets_charged() {
    let h = TestHarness::new().await;
    let customer = CustomerId::new();

    assert!(
        h.pipeline
            .execute(AddItem::new(customer, "SKU-001", "Widget", 3, Money::from_cents(1000)).into())
            .await
            .unwrap()
    );
    assert!(
        h.pipeline
            .execute(ApplyVoucher::new(customer, "TEN-PERCENT").into())
            .await
            .unwrap()
    );
    let order_id = h
        .pipeline
        .handler()
        .repository()
        .find_draft_by_customer(customer)
        .await
        .unwrap()
        .and_then(|o| o.id())
        .unwrap();
    let card = CardInfo::new("Ada Lovelace", "4111111111111111", "12/30", "123");
    assert!(
        h.pipeline
            .execute(StartOrder::new(customer, card).into())
            .await
            .unwrap()
    );

    let order = h.settle(order_id, &[OrderStatus::Paid]).await;
    assert_eq!(order.total_value(), Money::from_cents(2700));
    assert_eq!(h.payment.total_charged(), Money::from_cents(2700));

    h.pipeline.shutdown().await;
}

#[tokio::test]
async fn test_declined_payment_returns_to_draft_and_restores_stock() {
    let h = TestHarness::new().await;
    h.payment.set_decline_all(true);
    let order_id = h.checkout(CustomerId::new()).await;

    let order = h.settle(order_id, &[OrderStatus::Draft]).await;
    assert_eq!(order.status(), OrderStatus::Draft);
    assert_eq!(order.item_count(), 2);

    assert!(h.eventually(|| h.inventory.credit_count() == 1).await);
    assert_eq!(h.stock("SKU-001"), 10);
    assert_eq!(h.stock("SKU-002"), 4);
    assert_eq!(h.payment.payment_count(), 0);

    let names: Vec<&str> = h.pipeline.published().iter().map(|e| e.name()).collect();
    assert_eq!(
        names
            .iter()
            .filter(|n| **n == "StockReversalRequested")
            .count(),
        1
    );

    h.pipeline.shutdown().await;
}

#[tokio::test]
async fn test_rejected_stock_returns_to_draft_without_charge() {
    let h = TestHarness::new().await;
    h.inventory.set_reject_all(true);
    let order_id = h.checkout(CustomerId::new()).await;

    let order = h.settle(order_id, &[OrderStatus::Draft]).await;
    assert_eq!(order.status(), OrderStatus::Draft);
    assert_eq!(order.item_count(), 2);

    assert_eq!(h.payment.payment_count(), 0);
    assert_eq!(h.stock("SKU-001"), 10);
    assert!(
        !h.pipeline
            .published()
            .iter()
            .any(|e| e.name() == "StockReversalRequested")
    );

    h.pipeline.shutdown().await;
}

#[tokio::test]
async fn test_reverted_order_can_be_started_again() {
    let h = TestHarness::new().await;
    h.inventory.set_reject_all(true);
    let customer = CustomerId::new();
    let order_id = h.checkout(customer).await;
    h.settle(order_id, &[OrderStatus::Draft]).await;

    h.inventory.set_reject_all(false);
    let card = CardInfo::new("Ada Lovelace", "4111111111111111", "12/30", "123");
    assert!(
        h.pipeline
            .execute(StartOrder::new(customer, card).into())
            .await
            .unwrap()
    );

    let order = h.settle(order_id, &[OrderStatus::Paid]).await;
    assert_eq!(order.status(), OrderStatus::Paid);
    assert_eq!(h.payment.payment_count(), 1);

    h.pipeline.shutdown().await;
}

#[tokio::test]
async fn test_redelivered_payment_outcome_is_harmless() {
    let h = TestHarness::new().await;
    let customer = CustomerId::new();
    let order_id = h.checkout(customer).await;
    h.settle(order_id, &[OrderStatus::Paid]).await;
    let stream_len = h.store.load_stream(order_id).await.unwrap().len();

    h.pipeline
        .publish(domain::IntegrationEvent::payment_accepted(order_id, customer))
        .await
        .unwrap();
    h.pipeline
        .publish(domain::IntegrationEvent::payment_rejected(order_id, customer))
        .await
        .unwrap();

    // Give the command stage time to handle both queued commands.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let order = h.settle(order_id, &[OrderStatus::Paid]).await;
    assert_eq!(order.status(), OrderStatus::Paid);
    assert_eq!(h.store.load_stream(order_id).await.unwrap().len(), stream_len);

    h.pipeline.shutdown().await;
}

#[tokio::test]
async fn test_queued_commands_are_handled() {
    let h = TestHarness::new().await;
    let customer = CustomerId::new();

    h.pipeline
        .submit(AddItem::new(customer, "SKU-001", "Widget", 1, Money::from_cents(1000)).into())
        .await
        .unwrap();

    let repository = h.pipeline.handler().repository().clone();
    let mut found = None;
    let deadline = tokio::time::Instant::now() + SETTLE_TIMEOUT;
    while found.is_none() && tokio::time::Instant::now() < deadline {
        found = repository.find_draft_by_customer(customer).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let order = found.expect("queued AddItem should create a draft");
    assert_eq!(order.item_count(), 1);

    h.pipeline.shutdown().await;
}

#[tokio::test]
async fn test_events_left_in_the_outbox_are_delivered_by_the_next_pipeline() {
    let store = InMemoryEventStore::new();
    let offline = FanOutPublisher::new();
    offline.close();
    let handler = OrderCommandHandler::new(
        OrderRepository::new(store.clone(), Arc::new(InMemoryVoucherStore::new())),
        Arc::new(offline),
        Arc::new(NotificationLog::new()),
    );
    let customer = CustomerId::new();
    let card = CardInfo::new("Ada Lovelace", "4111111111111111", "12/30", "123");
    let script: [OrderCommand; 2] = [
        AddItem::new(customer, "SKU-001", "Widget", 2, Money::from_cents(1000)).into(),
        StartOrder::new(customer, card).into(),
    ];
    for command in script {
        assert!(handler.handle(command).await.unwrap());
    }
    let order_id = handler
        .repository()
        .undelivered_events()
        .await
        .unwrap()
        .first()
        .map(|(_, event)| event.order_id())
        .expect("events should be waiting in the outbox");

    let h = TestHarness::with_store(store).await;
    let order = h.settle(order_id, &[OrderStatus::Paid]).await;

    assert_eq!(order.status(), OrderStatus::Paid);
    assert_eq!(h.stock("SKU-001"), 8);
    assert_eq!(h.payment.total_charged(), Money::from_cents(2000));
    assert!(
        h.pipeline
            .handler()
            .repository()
            .undelivered_events()
            .await
            .unwrap()
            .is_empty()
    );

    h.pipeline.shutdown().await;
}

#[tokio::test]
async fn test_idle_pipeline_shuts_down() {
    let h = TestHarness::new().await;
    let repository = h.pipeline.handler().repository().clone();

    tokio::time::timeout(SETTLE_TIMEOUT, h.pipeline.shutdown())
        .await
        .expect("every stage should stop");

    assert!(
        repository
            .find_draft_by_customer(CustomerId::new())
            .await
            .unwrap()
            .is_none()
    );
    assert_eq!(h.store.event_count().await, 0);
}
