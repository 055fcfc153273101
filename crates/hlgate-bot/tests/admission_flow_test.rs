//! End-to-end admission and execution tests.
//!
//! Covers the main operator flows:
//! - Oversized orders rejected with a clip candidate
//! - Resubmitted intents recognized as duplicates
//! - Small orders admitted, audited once and sent once
//! - Repeated network failures tripping the order path breaker

mod integration;
use integration::common::harness::Harness;

use hlgate_bot::{AppConfig, Application};
use hlgate_core::{
    AuditEventKind, DenialKind, OrderIntent, OrderSide, OrderStatus, Price, Size, Symbol,
};
use hlgate_executor::{DowngradeReason, ErrorType, ExchangeError};
use hlgate_persistence::JsonLinesAuditSink;
use hlgate_risk::{BreakerConfig, DataHealth, LiveGuardReason};
use rust_decimal_macros::dec;

fn btc_buy(size: rust_decimal::Decimal) -> OrderIntent {
    OrderIntent::market(Symbol::Btc, OrderSide::Buy, Size::new(size)).unwrap()
}

#[tokio::test]
async fn test_oversized_order_rejected_with_clip_candidate() {
    let mut h = Harness::live();
    h.app.set_reference_price(Symbol::Btc, Price::new(dec!(50000)));

    let intent = btc_buy(dec!(5000));
    let outcome = h.app.handle_intent(&intent).await.unwrap();

    assert!(!outcome.enqueued.success);
    assert!(!outcome.enqueued.idempotent);
    assert_eq!(
        outcome.enqueued.classification,
        Some(DenialKind::ValidationFailed)
    );
    let validation = outcome.enqueued.validation.unwrap();
    assert!(!validation.valid);
    assert_eq!(validation.clipped_size, Some(Size::new(dec!(0.2))));
    assert!(outcome.execution.is_none());

    assert_eq!(h.events(AuditEventKind::OrderRejected).len(), 1);
    assert!(h.events(AuditEventKind::OrderSubmitted).is_empty());
    assert_eq!(h.exchange.call_count(), 0);

    // the rejected intent id is remembered
    let again = h.app.handle_intent(&intent).await.unwrap();
    assert!(again.enqueued.idempotent);
    assert_eq!(h.events(AuditEventKind::OrderRejected).len(), 1);
}

#[tokio::test]
async fn test_auto_clip_admits_clipped_order() {
    let mut config = AppConfig::default();
    config.trading.enabled = true;
    config.risk.auto_clip = true;
    let mut h = Harness::with_config(config);

    let outcome = h.app.handle_intent(&btc_buy(dec!(5000))).await.unwrap();

    assert!(outcome.enqueued.success);
    assert_eq!(outcome.enqueued.classification, Some(DenialKind::RiskClipped));
    let payloads = h.exchange.payloads();
    assert_eq!(payloads.len(), 1);
    assert_eq!(payloads[0].size, dec!(0.2));
}

#[tokio::test]
async fn test_resubmitted_intent_is_idempotent() {
    let mut h = Harness::live();
    let intent = btc_buy(dec!(0.01)).with_intent_id("intent-repeat");

    let first = h.app.handle_intent(&intent).await.unwrap();
    let events_after_first = h.sink.len();
    let second = h.app.handle_intent(&intent).await.unwrap();

    assert!(first.enqueued.success);
    assert!(second.enqueued.idempotent);
    assert!(!second.enqueued.success);
    assert_eq!(
        second.enqueued.classification,
        Some(DenialKind::DuplicateIntent)
    );
    assert!(second.execution.is_none());
    assert_eq!(h.sink.len(), events_after_first);
    assert_eq!(h.exchange.call_count(), 1);
    assert_eq!(h.app.stats().duplicates, 1);
}

#[tokio::test]
async fn test_small_order_submitted_and_audited_once() {
    let mut h = Harness::live();
    let intent = btc_buy(dec!(0.01));

    let outcome = h.app.handle_intent(&intent).await.unwrap();

    assert!(outcome.enqueued.success);
    let order_id = outcome.enqueued.order_id.clone().unwrap();
    let exec = outcome.execution.unwrap();
    assert!(!exec.dry_run);
    assert_eq!(exec.status, OrderStatus::Submitted);
    assert!(exec.send_result.success);

    let submitted = h.events(AuditEventKind::OrderSubmitted);
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0].order_id.as_ref(), Some(&order_id));
    assert_eq!(submitted[0].intent_id.as_ref(), Some(&intent.intent_id));
    assert_eq!(h.exchange.call_count(), 1);

    let order = h.app.bus().order(&order_id).unwrap();
    assert_eq!(order.status, OrderStatus::Submitted);
}

#[tokio::test]
async fn test_network_failures_trip_breaker_then_downgrade() {
    let mut config = AppConfig::default();
    config.trading.enabled = true;
    config.breaker.defaults = BreakerConfig {
        failure_threshold: 2,
        ..Default::default()
    };
    config.retry.max_retries = 0;
    let mut h = Harness::with_config(config);
    h.exchange
        .set_default_result(Err(ExchangeError::Transport("connection reset".into())));

    for _ in 0..2 {
        let exec = h
            .app
            .handle_intent(&btc_buy(dec!(0.01)))
            .await
            .unwrap()
            .execution
            .unwrap();
        assert_eq!(exec.status, OrderStatus::Failed);
        assert_eq!(exec.send_result.error_type, Some(ErrorType::Network));
    }
    assert_eq!(h.app.breakers().tripped_paths(), vec!["order-api".to_string()]);

    let exec = h
        .app
        .handle_intent(&btc_buy(dec!(0.01)))
        .await
        .unwrap()
        .execution
        .unwrap();
    assert!(exec.dry_run);
    assert_eq!(
        exec.downgrade,
        Some(DowngradeReason::Guard(LiveGuardReason::BreakerActive))
    );
    assert_eq!(h.exchange.call_count(), 2);
    assert_eq!(h.events(AuditEventKind::ExecutionDowngraded).len(), 1);
}

#[tokio::test]
async fn test_degraded_data_downgrades_to_dry_run() {
    let mut h = Harness::live();
    h.app.set_data_health(DataHealth::Degraded);

    let exec = h
        .app
        .handle_intent(&btc_buy(dec!(0.01)))
        .await
        .unwrap()
        .execution
        .unwrap();

    assert!(exec.dry_run);
    assert_eq!(
        exec.downgrade,
        Some(DowngradeReason::Guard(LiveGuardReason::DataDegraded))
    );
    assert_eq!(h.exchange.call_count(), 0);
}

#[tokio::test]
async fn test_run_reads_intents_file_and_persists_audit() {
    let dir = tempfile::tempdir().unwrap();
    let intents = dir.path().join("intents.jsonl");
    std::fs::write(
        &intents,
        concat!(
            r#"{"intent_id":"f-1","symbol":"ETH","side":"BUY","size":"0.5","type":"limit","limit_px":"3000"}"#,
            "\n",
            r#"{"intent_id":"f-2","symbol":"BTC","side":"SELL","size":"5000","type":"market"}"#,
            "\n",
        ),
    )
    .unwrap();

    let mut config = AppConfig::default();
    config.audit.dir = dir.path().join("audit");
    let app = Application::new(config).unwrap();
    let stats = app.run(Some(intents.as_path())).await.unwrap();

    assert_eq!(stats.lines, 2);
    assert_eq!(stats.accepted, 1);
    assert_eq!(stats.rejected, 1);
    assert_eq!(stats.executed, 1);

    let mut events = Vec::new();
    for entry in std::fs::read_dir(dir.path().join("audit")).unwrap() {
        events.extend(JsonLinesAuditSink::read_file(entry.unwrap().path()).unwrap());
    }
    let count = |kind| events.iter().filter(|e| e.kind == kind).count();
    assert_eq!(count(AuditEventKind::OrderSubmitted), 1);
    assert_eq!(count(AuditEventKind::OrderRejected), 1);
    // trading disabled by default
    assert_eq!(count(AuditEventKind::ExecutionDowngraded), 1);
    assert_eq!(count(AuditEventKind::OrderStatusUpdate), 1);
}
