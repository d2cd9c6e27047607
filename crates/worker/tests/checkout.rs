//! Scripted checkout outcomes under each collaborator setting.

use domain::{Money, OrderStatus};
use worker::Config;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_checkout_reaches_paid() {
    let summary = worker::checkout::run(&Config::default()).await.unwrap();

    // 89.00 + 2 x 25.00 = 139.00, less 10%.
    assert_eq!(summary.status, OrderStatus::Paid);
    assert_eq!(summary.total_value, Money::from_cents(12510));
    assert_eq!(summary.charged, Money::from_cents(12510));
    assert_eq!(summary.code, 1000);
    assert!(summary.notifications.is_empty());
    assert!(summary.published.contains(&"PaymentAccepted"));
}

#[tokio::test]
async fn test_checkout_with_declined_payment_returns_to_draft() {
    let config = Config {
        payment_declines: true,
        ..Config::default()
    };
    let summary = worker::checkout::run(&config).await.unwrap();

    assert_eq!(summary.status, OrderStatus::Draft);
    assert_eq!(summary.charged, Money::zero());
    assert!(summary.published.contains(&"PaymentRejected"));
    assert!(summary.published.contains(&"StockReversalRequested"));
}

#[tokio::test]
async fn test_checkout_with_rejected_stock_returns_to_draft() {
    let config = Config {
        inventory_rejects: true,
        ..Config::default()
    };
    let summary = worker::checkout::run(&config).await.unwrap();

    assert_eq!(summary.status, OrderStatus::Draft);
    assert_eq!(summary.charged, Money::zero());
    assert!(summary.published.contains(&"StockReservationRejected"));
    assert!(!summary.published.contains(&"PaymentAccepted"));
}
