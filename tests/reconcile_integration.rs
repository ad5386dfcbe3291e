use httpmock::Method::{GET, POST};
use httpmock::MockServer;
use serde_json::json;

use panel_shop::fanout::FanOut;
use panel_shop::journal::TxnKind;
use panel_shop::models::PanelId;
use panel_shop::orchestrator::PurchaseOptions;
use panel_shop::reconcile::{ReconcileSummary, Reconciler};

mod support;

use support::{panel_config, user_json};

const GB: i64 = 1024 * 1024 * 1024;

#[tokio::test]
async fn reachability_and_usage_alerts_are_recorded() {
    let de = MockServer::start_async().await;
    let nl = MockServer::start_async().await;
    de.mock_async(|when, then| {
        when.method(POST).path("/api/users");
        then.status(201).json_body(user_json("de-1"));
    })
    .await;
    nl.mock_async(|when, then| {
        when.method(POST).path("/api/users");
        then.status(201).json_body(user_json("nl-1"));
    })
    .await;
    de.mock_async(|when, then| {
        when.method(GET).path("/api/users/de-1");
        then.status(200).json_body(json!({
            "id": "de-1",
            "username": "u",
            "used_bytes": 45 * GB,
            "data_limit_bytes": 50 * GB
        }));
    })
    .await;
    nl.mock_async(|when, then| {
        when.method(GET).path("/api/users/nl-1");
        then.status(500);
    })
    .await;

    let test_db = support::init_test_db().await;
    let state = support::build_state(
        test_db.pool.clone(),
        vec![panel_config("de", &de), panel_config("nl", &nl)],
    );
    support::seed_account(&state, 1, 100_000).await;
    let plan = support::seed_plan(&state, 10_000, 30).await;
    let service_id = state
        .orchestrator
        .purchase(
            1,
            plan.id,
            PurchaseOptions {
                panels: vec![PanelId::new("de"), PanelId::new("nl")],
                display_name: None,
            },
        )
        .await
        .expect("purchase")
        .service()
        .id;

    let summary = state.reconciler.run_once().await.expect("reconcile");
    assert_eq!(
        summary,
        ReconcileSummary {
            services_checked: 1,
            endpoints_reachable: 1,
            endpoints_unreachable: 1,
            unreachable_services: 0,
            low_usage_alerts: 1,
            stale_transactions: 0,
        }
    );

    let service = state.store.get_service(service_id).await.unwrap();
    assert!(service.low_usage_alert_sent);
    let de_endpoint = service.endpoint(&PanelId::new("de")).unwrap();
    let nl_endpoint = service.endpoint(&PanelId::new("nl")).unwrap();
    assert!(de_endpoint.reachable);
    assert!(de_endpoint.last_checked_at.is_some());
    assert!(!nl_endpoint.reachable);

    // The alert is sent once per service.
    let again = state.reconciler.run_once().await.expect("reconcile");
    assert_eq!(again.low_usage_alerts, 0);
    assert_eq!(support::open_tasks(&state, "no_reachable_endpoint").await, 0);
}

#[tokio::test]
async fn unreachable_service_is_queued_once() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/api/users");
            then.status(201).json_body(user_json("abc123"));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api/users/abc123");
            then.status(404);
        })
        .await;

    let test_db = support::init_test_db().await;
    let state = support::build_state(test_db.pool.clone(), vec![panel_config("de", &server)]);
    support::seed_account(&state, 1, 100_000).await;
    let plan = support::seed_plan(&state, 10_000, 30).await;
    state
        .orchestrator
        .purchase(1, plan.id, PurchaseOptions::default())
        .await
        .expect("purchase");

    let first = state.reconciler.run_once().await.expect("reconcile");
    assert_eq!(first.unreachable_services, 1);
    let second = state.reconciler.run_once().await.expect("reconcile");
    assert_eq!(second.unreachable_services, 1);

    assert_eq!(support::open_tasks(&state, "no_reachable_endpoint").await, 1);
}

#[tokio::test]
async fn endpoints_on_removed_panels_count_as_unreachable() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/api/users");
            then.status(201).json_body(user_json("abc123"));
        })
        .await;

    let test_db = support::init_test_db().await;
    let state = support::build_state(test_db.pool.clone(), vec![panel_config("de", &server)]);
    support::seed_account(&state, 1, 100_000).await;
    let plan = support::seed_plan(&state, 10_000, 30).await;
    state
        .orchestrator
        .purchase(1, plan.id, PurchaseOptions::default())
        .await
        .expect("purchase");

    assert!(state.registry.remove(&PanelId::new("de")));

    let summary = state.reconciler.run_once().await.expect("reconcile");
    assert_eq!(summary.endpoints_unreachable, 1);
    assert_eq!(summary.unreachable_services, 1);
}

#[tokio::test]
async fn active_service_without_endpoints_is_queued() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/api/users");
            then.status(201).json_body(user_json("abc123"));
        })
        .await;

    let test_db = support::init_test_db().await;
    let state = support::build_state(test_db.pool.clone(), vec![panel_config("de", &server)]);
    support::seed_account(&state, 1, 100_000).await;
    let plan = support::seed_plan(&state, 10_000, 30).await;
    let service_id = state
        .orchestrator
        .purchase(1, plan.id, PurchaseOptions::default())
        .await
        .expect("purchase")
        .service()
        .id;

    state
        .store
        .remove_endpoint(service_id, &PanelId::new("de"))
        .await
        .expect("detach");

    let summary = state.reconciler.run_once().await.expect("reconcile");
    assert_eq!(summary.services_checked, 1);
    assert_eq!(summary.endpoints_reachable, 0);
    assert_eq!(summary.endpoints_unreachable, 0);
    assert_eq!(summary.unreachable_services, 1);
    assert_eq!(support::open_tasks(&state, "no_reachable_endpoint").await, 1);
}

#[tokio::test]
async fn stuck_transactions_are_reported() {
    let test_db = support::init_test_db().await;
    let state = support::build_state(test_db.pool.clone(), Vec::new());
    support::seed_account(&state, 1, 0).await;

    state
        .journal
        .begin(TxnKind::Purchase, 1, None, None, None)
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    let reconciler = Reconciler::new(
        state.store.clone(),
        state.journal.clone(),
        state.registry.clone(),
        FanOut::new(support::fanout_config()),
    )
    .with_stale_after(chrono::Duration::zero());

    let summary = reconciler.run_once().await.expect("reconcile");
    assert_eq!(summary.services_checked, 0);
    assert_eq!(summary.stale_transactions, 1);

    assert_eq!(state.reconciler.run_once().await.unwrap().stale_transactions, 0);
}
