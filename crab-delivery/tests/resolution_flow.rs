//! 错误解析引擎集成测试

mod common;

use common::*;
use crab_delivery::adapters::AdapterError;
use crab_delivery::orders::{RemediationOutcome, ResolutionError, RetryOutcome};
use crab_delivery::reference::{ReferenceSnapshot, UNCLASSIFIED_CODE};
use shared::order::{FailureClass, OrderStatus};
use shared::{ErrorSolution, ItemKind, RemediationKind};

fn catalog_snapshot(solutions: Vec<ErrorSolution>) -> ReferenceSnapshot {
    ReferenceSnapshot::from_parts(vec![policy(3)], solutions)
}

#[tokio::test]
async fn test_stoplist_error_suspends_product_and_notifies() {
    let h = Harness::new(vec![policy(3)], vec![stoplist_solution()]);
    let order = h.seed(&failed_order("glovo-1", 0, "previous failure"));
    h.pos
        .push_create_result(Err(AdapterError::Business(STOPLIST_ERROR.to_string())));

    let outcome = h.reconciler.handle_retry("glovo-1").await.unwrap();

    assert_eq!(
        outcome,
        RetryOutcome::VendorRejected {
            order_id: order.id.clone(),
            code: "21".to_string(),
            remediation: RemediationOutcome::Suspended {
                item_id: "4711".to_string(),
                kind: ItemKind::Product,
            },
        }
    );

    let stored = h.load(&order.id);
    assert_eq!(stored.status, OrderStatus::Failed);
    let reason = stored.fail_reason.unwrap();
    assert_eq!(reason.code, "21");
    assert_eq!(reason.classification, FailureClass::Business);
    assert_eq!(reason.message, STOPLIST_ERROR);
    assert_eq!(
        reason.remediation_description.as_deref(),
        Some("product 4711 added to stop list")
    );

    assert_eq!(h.aggregator.suspend_calls(), 1);
    let stop_list = h.reconciler.stop_list(STORE_ID).await.unwrap();
    assert_eq!(stop_list.len(), 1);
    assert!(stop_list[0].suspended);
    assert_eq!(stop_list[0].item_name.as_deref(), Some("Margherita"));
    assert_eq!(stop_list[0].reason_code.as_deref(), Some("21"));

    let notices = h.notifier.notices();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].code, "21");
    assert_eq!(notices[0].item_name.as_deref(), Some("Margherita"));
}

#[tokio::test]
async fn test_same_occurrence_suspends_once() {
    let h = Harness::new(vec![policy(3)], vec![]);
    let order = h.seed(&failed_order("glovo-1", 1, "previous failure"));
    let snapshot = catalog_snapshot(vec![stoplist_solution()]);
    let resolver = h.resolver();

    let first = resolver
        .resolve(h.load(&order.id), STOPLIST_ERROR, snapshot.catalog(), 1_000)
        .await
        .unwrap();
    let second = resolver
        .resolve(h.load(&order.id), STOPLIST_ERROR, snapshot.catalog(), 2_000)
        .await
        .unwrap();

    assert!(matches!(first.remediation, RemediationOutcome::Suspended { .. }));
    assert!(matches!(second.remediation, RemediationOutcome::AlreadyApplied { .. }));
    assert_eq!(h.aggregator.suspend_calls(), 1);
    assert_eq!(h.storage.get_stats().unwrap().occurrence_count, 1);

    // History only grows; FAILED -> FAILED adds no entry
    assert_eq!(second.order.status_history.len(), first.order.status_history.len());
}

#[tokio::test]
async fn test_write_during_resolution_is_reapplied() {
    let h = Harness::new(vec![policy(3)], vec![]);
    let order = h.seed(&failed_order("glovo-1", 1, "previous failure"));
    let snapshot = catalog_snapshot(vec![stoplist_solution()]);

    // The attempt was claimed and counted from version 0
    let mut attempted = h.load(&order.id);
    attempted.retry_count = 2;
    attempted.is_retry = true;

    // A webhook lands before the resolution commits
    let mut webhook = h.load(&order.id);
    webhook.estimated_pickup_time = Some(5_000);
    h.storage.save_if_version(&webhook).unwrap();

    let resolution = h
        .resolver()
        .resolve(attempted, STOPLIST_ERROR, snapshot.catalog(), 1_000)
        .await
        .unwrap();

    assert!(matches!(resolution.remediation, RemediationOutcome::Suspended { .. }));
    assert!(resolution.notified);
    assert_eq!(h.aggregator.suspend_calls(), 1);

    let stored = h.load(&order.id);
    assert_eq!(stored.version, 2);
    assert_eq!(stored.status, OrderStatus::Failed);
    assert_eq!(stored.retry_count, 2);
    assert!(stored.is_retry);
    assert_eq!(stored.estimated_pickup_time, Some(5_000));
    assert_eq!(stored.fail_reason.unwrap().message, STOPLIST_ERROR);
}

#[tokio::test]
async fn test_suspension_failure_aborts_but_records_failure() {
    let h = Harness::new(vec![policy(3)], vec![]);
    let order = h.seed(&new_order("glovo-1", shared::util::now_millis()));
    h.aggregator
        .fail_suspensions(AdapterError::Transient("menu API down".into()));
    let snapshot = catalog_snapshot(vec![stoplist_solution()]);

    let err = h
        .resolver()
        .resolve(h.load(&order.id), STOPLIST_ERROR, snapshot.catalog(), 1_000)
        .await
        .unwrap_err();

    assert!(matches!(err, ResolutionError::Suspension { .. }));
    let stored = h.load(&order.id);
    assert_eq!(stored.status, OrderStatus::Failed);
    let description = stored.fail_reason.unwrap().remediation_description.unwrap();
    assert!(description.contains("remediation not applied"));

    assert!(h.reconciler.stop_list(STORE_ID).await.unwrap().is_empty());
    assert!(h.notifier.notices().is_empty());
}

#[tokio::test]
async fn test_unmatched_error_is_unclassified() {
    let h = Harness::new(vec![policy(3)], vec![]);
    let order = h.seed(&new_order("glovo-1", shared::util::now_millis()));
    let snapshot = catalog_snapshot(vec![stoplist_solution()]);

    let resolution = h
        .resolver()
        .resolve(h.load(&order.id), "Terminal offline", snapshot.catalog(), 1_000)
        .await
        .unwrap();

    assert_eq!(resolution.code, UNCLASSIFIED_CODE);
    assert!(!resolution.matched);
    assert_eq!(resolution.remediation, RemediationOutcome::NotRequired);
    assert!(!resolution.notified);
    let reason = resolution.order.fail_reason.unwrap();
    assert_eq!(reason.classification, FailureClass::Unclassified);
    assert_eq!(h.aggregator.suspend_calls(), 0);
}

#[tokio::test]
async fn test_unextractable_item_downgrades_remediation() {
    let h = Harness::new(vec![policy(3)], vec![]);
    let order = h.seed(&new_order("glovo-1", shared::util::now_millis()));
    let solution = ErrorSolution {
        code: "22".to_string(),
        match_pattern: "is not available".to_string(),
        item_pattern: Some(r"item #(\d+)".to_string()),
        reason: "Modifier on stop list".to_string(),
        business_description: String::new(),
        remediation_kind: RemediationKind::AttributeStoplist,
        notify_operator: false,
    };
    let snapshot = catalog_snapshot(vec![solution]);

    let resolution = h
        .resolver()
        .resolve(h.load(&order.id), "Extra cheese is not available", snapshot.catalog(), 1_000)
        .await
        .unwrap();

    assert_eq!(resolution.code, "22");
    assert_eq!(resolution.remediation, RemediationOutcome::ItemNotFound);
    assert_eq!(resolution.order.status, OrderStatus::Failed);
    assert_eq!(h.aggregator.suspend_calls(), 0);
}

#[tokio::test]
async fn test_restore_item_clears_suspension() {
    let h = Harness::new(vec![policy(3)], vec![]);
    let order = h.seed(&new_order("glovo-1", shared::util::now_millis()));
    let snapshot = catalog_snapshot(vec![stoplist_solution()]);
    h.resolver()
        .resolve(h.load(&order.id), STOPLIST_ERROR, snapshot.catalog(), 1_000)
        .await
        .unwrap();

    let restored = h
        .reconciler
        .restore_item(STORE_ID, DELIVERY_SERVICE, "4711", ItemKind::Product)
        .await
        .unwrap();

    assert!(restored);
    assert_eq!(h.aggregator.restored.lock().unwrap().len(), 1);
    let stop_list = h.reconciler.stop_list(STORE_ID).await.unwrap();
    assert!(!stop_list[0].suspended);
}
