//! Metrics recorded by a checkout run.
//!
//! Lives in its own test binary because it installs the global recorder.

use metrics_exporter_prometheus::PrometheusBuilder;
use worker::Config;

#[tokio::test]
async fn test_checkout_records_run_and_command_metrics() {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("recorder should install once per test binary");

    worker::checkout::run(&Config::default()).await.unwrap();
    let declined = Config {
        payment_declines: true,
        ..Config::default()
    };
    worker::checkout::run(&declined).await.unwrap();

    let rendered = handle.render();
    assert!(rendered.contains(r#"checkout_runs_total{outcome="paid"} 1"#));
    assert!(rendered.contains(r#"checkout_runs_total{outcome="reverted"} 1"#));
    assert!(rendered.contains("checkout_duration_seconds"));
    assert!(rendered.contains(r#"order_commands_total{command="StartOrder",outcome="accepted"} 2"#));
    assert!(rendered.contains("integration_events_published_total"));
}
