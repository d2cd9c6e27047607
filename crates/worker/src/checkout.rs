//! Scripted checkout driven through the fulfillment pipeline.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use common::{AggregateId, CustomerId, DomainNotification};
use domain::{
    Aggregate, AddItem, ApplyVoucher, CardInfo, Command, DomainError, InMemoryVoucherStore, Money, NotificationLog,
    OrderCommand, OrderRepository, OrderStatus, StartOrder, UpdateItem, Voucher, VoucherDiscount,
};
use event_store::InMemoryEventStore;
use saga::{FulfillmentPipeline, InMemoryInventoryService, InMemoryPaymentService};
use thiserror::Error;

use crate::config::Config;

pub const WELCOME_VOUCHER: &str = "WELCOME10";
const SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    #[error("{command} was refused: {notifications:?}")]
    Refused {
        command: &'static str,
        notifications: Vec<DomainNotification>,
    },

    #[error("Customer {0} has no draft order")]
    NoDraft(CustomerId),

    #[error("Order {0} did not settle in time")]
    Unsettled(AggregateId),
}

/// Where the scripted order ended up.
#[derive(Debug, Clone)]
pub struct CheckoutSummary {
    pub order_id: AggregateId,
    pub code: u64,
    pub status: OrderStatus,
    pub total_value: Money,
    pub charged: Money,
    pub published: Vec<&'static str>,
    pub notifications: Vec<DomainNotification>,
}

/// Seeds stock and a voucher, then runs one customer's checkout to a
/// settled state.
///
/// Counts runs in `checkout_runs_total` by outcome (`paid`, `reverted` or
/// `failed`) and records `checkout_duration_seconds`.
pub async fn run(config: &Config) -> Result<CheckoutSummary, CheckoutError> {
    let started = Instant::now();
    let result = checkout(config).await;

    let outcome = match &result {
        Ok(summary) if summary.status == OrderStatus::Paid => "paid",
        Ok(_) => "reverted",
        Err(_) => "failed",
    };
    metrics::counter!("checkout_runs_total", "outcome" => outcome).increment(1);
    metrics::histogram!("checkout_duration_seconds").record(started.elapsed().as_secs_f64());
    result
}

async fn checkout(config: &Config) -> Result<CheckoutSummary, CheckoutError> {
    let vouchers = InMemoryVoucherStore::with_vouchers([Voucher::new(
        WELCOME_VOUCHER,
        VoucherDiscount::Percentage(10),
        100,
        Utc::now() + chrono::Duration::days(30),
    )])
    .await;
    let inventory = InMemoryInventoryService::with_stock([("SKU-1001", 20), ("SKU-1002", 5)]);
    inventory.set_reject_all(config.inventory_rejects);
    let payment = InMemoryPaymentService::new();
    payment.set_decline_all(config.payment_declines);
    let notifications = NotificationLog::new();

    let pipeline = FulfillmentPipeline::start(
        config.pipeline(),
        OrderRepository::new(InMemoryEventStore::new(), Arc::new(vouchers)),
        Arc::new(notifications.clone()),
        inventory.clone(),
        payment.clone(),
    );

    let result = drive(&pipeline, &notifications, &inventory, config).await;
    let published = pipeline.published().iter().map(|e| e.name()).collect();
    pipeline.shutdown().await;

    let (order_id, code, status, total_value) = result?;
    Ok(CheckoutSummary {
        order_id,
        code,
        status,
        total_value,
        charged: payment.total_charged(),
        published,
        notifications: notifications.notifications(),
    })
}

async fn drive(
    pipeline: &FulfillmentPipeline<InMemoryEventStore>,
    notifications: &NotificationLog,
    inventory: &InMemoryInventoryService,
    config: &Config,
) -> Result<(AggregateId, u64, OrderStatus, Money), CheckoutError> {
    let customer = CustomerId::new();
    let card = CardInfo::new("Ada Lovelace", "4111 1111 1111 1111", "12/30", "123");

    let script: Vec<OrderCommand> = vec![
        AddItem::new(customer, "SKU-1001", "Mechanical keyboard", 1, Money::from_cents(8900)).into(),
        AddItem::new(customer, "SKU-1002", "Desk mat", 1, Money::from_cents(2500)).into(),
        UpdateItem::new(customer, "SKU-1002", 2).into(),
        ApplyVoucher::new(customer, WELCOME_VOUCHER).into(),
        StartOrder::new(customer, card).into(),
    ];

    let mut order_id = None;
    for command in script {
        let name = command.name();
        if !pipeline.execute(command).await? {
            return Err(CheckoutError::Refused {
                command: name,
                notifications: notifications.notifications(),
            });
        }
        if order_id.is_none() {
            order_id = pipeline
                .handler()
                .repository()
                .find_draft_by_customer(customer)
                .await?
                .and_then(|o| o.id());
        }
        tracing::info!(command = name, "checkout step accepted");
    }
    let order_id = order_id.ok_or(CheckoutError::NoDraft(customer))?;

    let order = pipeline
        .wait_for_status(
            order_id,
            &[OrderStatus::Paid, OrderStatus::Draft],
            SETTLE_TIMEOUT,
        )
        .await?
        .filter(|o| o.status() != OrderStatus::Started)
        .ok_or(CheckoutError::Unsettled(order_id))?;

    // A declined payment releases stock after the order is already back in draft.
    if config.payment_declines && !config.inventory_rejects {
        let deadline = tokio::time::Instant::now() + SETTLE_TIMEOUT;
        while inventory.credit_count() == 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    Ok((order_id, order.code(), order.status(), order.total_value()))
}
