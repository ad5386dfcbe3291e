use std::collections::BTreeMap;

use chrono::{Duration, Utc};

use panel_shop::credentials::{CredentialStore, NewEndpoint, NewService, PlanInput, StoreError};
use panel_shop::journal::{Journal, TxnKind, TxnState};
use panel_shop::ledger::Ledger;
use panel_shop::models::PanelId;

mod support;

async fn store() -> (support::TestDb, CredentialStore) {
    let test_db = support::init_test_db().await;
    Ledger::new(test_db.pool.clone())
        .ensure_account(1)
        .await
        .expect("account");
    let store = CredentialStore::new(test_db.pool.clone());
    (test_db, store)
}

fn new_service(days: i64) -> NewService {
    NewService {
        account_id: 1,
        plan_id: None,
        display_name: "u1_test".to_string(),
        quota_gb: 50,
        expires_at: Utc::now() + Duration::days(days),
    }
}

#[tokio::test]
async fn endpoints_can_be_mirrored_and_detached() {
    let (_db, store) = store().await;

    let service = store
        .create_service(new_service(30), PanelId::new("de"), "de-1".to_string())
        .await
        .expect("create");
    assert_eq!(service.status, "active");
    assert_eq!(service.endpoints.len(), 1);

    store
        .add_endpoint(
            service.id,
            NewEndpoint {
                panel_id: PanelId::new("nl"),
                external_id: "nl-1".to_string(),
                expires_at: service.expires_at,
            },
        )
        .await
        .expect("mirror");
    let service = store.get_service(service.id).await.unwrap();
    assert_eq!(service.endpoints.len(), 2);
    assert_eq!(
        service.endpoint(&PanelId::new("nl")).unwrap().external_id,
        "nl-1"
    );

    store
        .remove_endpoint(service.id, &PanelId::new("de"))
        .await
        .expect("detach");
    assert!(matches!(
        store.remove_endpoint(service.id, &PanelId::new("de")).await,
        Err(StoreError::EndpointNotFound { .. })
    ));
    assert!(matches!(
        store
            .add_endpoint(
                9_999,
                NewEndpoint {
                    panel_id: PanelId::new("de"),
                    external_id: "x".to_string(),
                    expires_at: Utc::now(),
                },
            )
            .await,
        Err(StoreError::ServiceNotFound(9_999))
    ));

    let listed = store.list_services(1).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].endpoints.len(), 1);
}

#[tokio::test]
async fn renewal_clears_the_usage_alert() {
    let (_db, store) = store().await;
    let plan = store
        .create_plan(&PlanInput {
            name: "90d".to_string(),
            price: 120_000,
            duration_days: 90,
            quota_gb: 200,
            visible: true,
            category: Some("long".to_string()),
        })
        .await
        .unwrap();
    let service = store
        .create_service(new_service(1), PanelId::new("de"), "de-1".to_string())
        .await
        .unwrap();

    assert!(store.mark_low_usage_alert(service.id).await.unwrap());
    assert!(!store.mark_low_usage_alert(service.id).await.unwrap());

    let new_expiry = service.expires_at + Duration::days(90);
    let extended = BTreeMap::from([(PanelId::new("de"), new_expiry)]);
    store
        .record_renewal(service.id, &plan, new_expiry, &extended)
        .await
        .unwrap();

    let renewed = store.get_service(service.id).await.unwrap();
    assert!(!renewed.low_usage_alert_sent);
    assert_eq!(renewed.plan_id, Some(plan.id));
    assert_eq!(renewed.quota_gb, 200);
    assert!(
        (renewed.endpoints[0].expires_at - new_expiry)
            .num_seconds()
            .abs()
            < 1
    );

    assert!(matches!(
        store.record_renewal(9_999, &plan, new_expiry, &extended).await,
        Err(StoreError::ServiceNotFound(9_999))
    ));
}

#[tokio::test]
async fn renewal_write_is_all_or_nothing() {
    let (db, store) = store().await;
    let plan = store
        .create_plan(&PlanInput {
            name: "30d".to_string(),
            price: 40_000,
            duration_days: 30,
            quota_gb: 100,
            visible: true,
            category: None,
        })
        .await
        .unwrap();
    let service = store
        .create_service(new_service(1), PanelId::new("de"), "de-1".to_string())
        .await
        .unwrap();
    store.mark_low_usage_alert(service.id).await.unwrap();

    let new_expiry = service.expires_at + Duration::days(30);

    // Unknown endpoint: the service update must roll back with it.
    let extended = BTreeMap::from([(PanelId::new("fi"), new_expiry)]);
    assert!(matches!(
        store.record_renewal(service.id, &plan, new_expiry, &extended).await,
        Err(StoreError::EndpointNotFound { .. })
    ));

    // Storage failure on the endpoint rows.
    support::break_endpoint_updates(&db.pool).await;
    let extended = BTreeMap::from([(PanelId::new("de"), new_expiry)]);
    assert!(matches!(
        store.record_renewal(service.id, &plan, new_expiry, &extended).await,
        Err(StoreError::Db(_))
    ));

    let after = store.get_service(service.id).await.unwrap();
    assert_eq!(after.plan_id, None);
    assert_eq!(after.quota_gb, 50);
    assert!(after.low_usage_alert_sent);
    assert!((after.expires_at - service.expires_at).num_seconds().abs() < 1);
    assert!(
        (after.endpoints[0].expires_at - service.endpoints[0].expires_at)
            .num_seconds()
            .abs()
            < 1
    );
}

#[tokio::test]
async fn delete_removes_service_and_endpoints() {
    let (_db, store) = store().await;
    let service = store
        .create_service(new_service(30), PanelId::new("de"), "de-1".to_string())
        .await
        .unwrap();

    store.delete_service(service.id).await.unwrap();
    assert!(matches!(
        store.get_service(service.id).await,
        Err(StoreError::ServiceNotFound(_))
    ));
    assert!(matches!(
        store.delete_service(service.id).await,
        Err(StoreError::ServiceNotFound(_))
    ));
    assert!(store.list_all_services().await.unwrap().is_empty());
}

#[tokio::test]
async fn hidden_plans_are_listed_only_on_request() {
    let (_db, store) = store().await;
    for (name, price, visible) in [("cheap", 10_000, true), ("secret", 5_000, false)] {
        store
            .create_plan(&PlanInput {
                name: name.to_string(),
                price,
                duration_days: 30,
                quota_gb: 0,
                visible,
                category: None,
            })
            .await
            .unwrap();
    }

    let visible = store.list_plans(true).await.unwrap();
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0].name, "cheap");

    let all = store.list_plans(false).await.unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].name, "secret");
}

#[tokio::test]
async fn journal_rows_move_through_their_states() {
    let (db, _store) = store().await;
    let journal = Journal::new(db.pool.clone());

    let id = journal
        .begin(TxnKind::Renewal, 1, None, None, None)
        .await
        .unwrap();
    journal
        .advance(id, TxnState::Provisioned, None, None)
        .await
        .unwrap();
    journal
        .advance(id, TxnState::Cancelled, None, Some("panel down"))
        .await
        .unwrap();

    let record = journal.get(id).await.unwrap().expect("row");
    assert_eq!(record.kind, "renewal");
    assert_eq!(record.state, "cancelled");
    assert_eq!(record.detail.as_deref(), Some("panel down"));
    assert!(journal.get(uuid::Uuid::new_v4()).await.unwrap().is_none());
}
