use std::sync::Arc;

use chrono::{Duration, Utc};
use common::{AggregateId, CustomerId};
use criterion::{Criterion, criterion_group, criterion_main};
use domain::{
    AddItem, Aggregate, ApplyVoucher, InMemoryVoucherStore, Money, NotificationLog, Order,
    OrderCommandHandler, OrderItem, OrderRepository, RecordingPublisher, Voucher,
    VoucherDiscount,
};
use event_store::{InMemoryEventStore, Version};

fn handler(rt: &tokio::runtime::Runtime) -> OrderCommandHandler<InMemoryEventStore> {
    let vouchers = rt.block_on(InMemoryVoucherStore::with_vouchers([Voucher::new(
        "BENCH",
        VoucherDiscount::Percentage(15),
        u32::MAX,
        Utc::now() + Duration::days(365),
    )]));
    OrderCommandHandler::new(
        OrderRepository::new(InMemoryEventStore::new(), Arc::new(vouchers)),
        Arc::new(RecordingPublisher::new()),
        Arc::new(NotificationLog::new()),
    )
}

fn bench_aggregate_mutations(c: &mut Criterion) {
    c.bench_function("domain/aggregate_add_update_voucher", |b| {
        b.iter(|| {
            let mut order = Order::start_draft(AggregateId::new(), CustomerId::new(), 1000);
            for i in 0..10 {
                order
                    .add_item(OrderItem::new(
                        format!("SKU-{i}"),
                        "Widget",
                        2,
                        Money::from_cents(1000),
                    ))
                    .unwrap();
            }
            order
                .apply_voucher(Voucher::new(
                    "BENCH",
                    VoucherDiscount::Percentage(10),
                    1,
                    Utc::now() + Duration::days(1),
                ))
                .unwrap();
            order.take_pending_events()
        });
    });
}

fn bench_replay(c: &mut Criterion) {
    let mut order = Order::start_draft(AggregateId::new(), CustomerId::new(), 1000);
    for i in 0..15 {
        order
            .add_item(OrderItem::new(
                format!("SKU-{i}"),
                "Widget",
                1,
                Money::from_cents(500),
            ))
            .unwrap();
    }
    let history = order.take_pending_events();
    let version = Version::new(history.len() as i64);

    c.bench_function("domain/replay_16_events", |b| {
        b.iter(|| Order::from_history(history.clone(), version));
    });
}

fn bench_handle_commands(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let handler = handler(&rt);

    c.bench_function("domain/handle_add_item_and_voucher", |b| {
        b.iter(|| {
            rt.block_on(async {
                let customer = CustomerId::new();
                handler
                    .handle(
                        AddItem::new(customer, "SKU-1", "Widget", 3, Money::from_cents(1000))
                            .into(),
                    )
                    .await
                    .unwrap();
                handler
                    .handle(ApplyVoucher::new(customer, "BENCH").into())
                    .await
                    .unwrap();
            });
        });
    });
}

criterion_group!(
    benches,
    bench_aggregate_mutations,
    bench_replay,
    bench_handle_commands
);
criterion_main!(benches);
