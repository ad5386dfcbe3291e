#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use httpmock::MockServer;
use serde_json::{json, Value};
use sqlx::SqlitePool;

use panel_shop::credentials::PlanInput;
use panel_shop::fanout::FanOutConfig;
use panel_shop::models::{AccountId, Amount, EntryReason, PanelId, Plan};
use panel_shop::orchestrator::OrchestratorConfig;
use panel_shop::panel::{ClientSettings, PanelAuth, PanelConfig, PanelRegistry, RetryPolicy};
use panel_shop::{db, AppState};

pub const PANEL_TOKEN: &str = "test-token";

pub struct TestDb {
    pub pool: SqlitePool,
}

pub async fn init_test_db() -> TestDb {
    let pool = db::connect_in_memory().await.expect("connect test db");
    db::migrate(&pool).await.expect("migrations");
    TestDb { pool }
}

/// WAL database file behind the production multi-connection pool.
pub struct FileDb {
    pub pool: SqlitePool,
    path: PathBuf,
}

impl Drop for FileDb {
    fn drop(&mut self) {
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{suffix}", self.path.display()));
        }
    }
}

pub async fn init_file_db() -> FileDb {
    let path = std::env::temp_dir().join(format!("panel-shop-{}.db", uuid::Uuid::new_v4()));
    let url = format!("sqlite://{}?mode=rwc", path.display());
    let pool = db::connect(&url).await.expect("connect file db");
    db::migrate(&pool).await.expect("migrations");
    FileDb { pool, path }
}

pub fn panel_config(id: &str, server: &MockServer) -> PanelConfig {
    PanelConfig {
        id: PanelId::new(id),
        name: id.to_uppercase(),
        base_url: server.base_url(),
        auth: PanelAuth::Bearer {
            token: PANEL_TOKEN.to_string(),
        },
        enabled: true,
    }
}

/// Real retry budget, near-zero sleeps.
pub fn fast_client_settings() -> ClientSettings {
    ClientSettings {
        call_timeout: Duration::from_secs(5),
        retry: RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        },
    }
}

pub fn fanout_config() -> FanOutConfig {
    FanOutConfig {
        concurrency: 8,
        deadline: Duration::from_secs(10),
    }
}

pub fn build_state(pool: SqlitePool, panels: Vec<PanelConfig>) -> AppState {
    build_state_with(pool, panels, fanout_config(), OrchestratorConfig::default())
}

pub fn build_state_with(
    pool: SqlitePool,
    panels: Vec<PanelConfig>,
    fanout: FanOutConfig,
    orchestrator: OrchestratorConfig,
) -> AppState {
    build_state_with_client(pool, panels, fast_client_settings(), fanout, orchestrator)
}

pub fn build_state_with_client(
    pool: SqlitePool,
    panels: Vec<PanelConfig>,
    client: ClientSettings,
    fanout: FanOutConfig,
    orchestrator: OrchestratorConfig,
) -> AppState {
    let default_panel = panels.first().map(|p| p.id.clone());
    let registry =
        PanelRegistry::with_panels(client, default_panel, panels).expect("valid panels");
    AppState::new(pool, Arc::new(registry), fanout, orchestrator)
}

pub async fn seed_account(state: &AppState, account_id: AccountId, balance: Amount) {
    state
        .ledger
        .ensure_account(account_id)
        .await
        .expect("ensure account");
    if balance > 0 {
        state
            .ledger
            .credit(account_id, balance, EntryReason::AdminAdjustment, Some("seed"))
            .await
            .expect("seed balance");
    }
}

pub async fn seed_plan(state: &AppState, price: Amount, duration_days: i64) -> Plan {
    state
        .store
        .create_plan(&PlanInput {
            name: format!("{duration_days}d"),
            price,
            duration_days,
            quota_gb: 50,
            visible: true,
            category: None,
        })
        .await
        .expect("seed plan")
}

/// Panel answer for a created or renewed user.
pub fn user_json(id: &str) -> Value {
    json!({
        "id": id,
        "username": format!("user-{id}"),
        "status": "active",
        "used_bytes": 0,
        "data_limit_bytes": 53687091200i64,
        "subscription_url": format!("https://sub.example.com/{id}")
    })
}

/// Makes every INSERT into `services` fail, as a full disk would.
pub async fn break_service_writes(pool: &SqlitePool) {
    sqlx::query(
        r#"CREATE TRIGGER fail_service_insert BEFORE INSERT ON services
           BEGIN
               SELECT RAISE(FAIL, 'disk full');
           END"#,
    )
    .execute(pool)
    .await
    .expect("create trigger");
}

/// Makes every UPDATE of an `endpoints` row fail.
pub async fn break_endpoint_updates(pool: &SqlitePool) {
    sqlx::query(
        r#"CREATE TRIGGER fail_endpoint_update BEFORE UPDATE ON endpoints
           BEGIN
               SELECT RAISE(FAIL, 'disk full');
           END"#,
    )
    .execute(pool)
    .await
    .expect("create trigger");
}

/// Makes every UPDATE of a `reservations` row fail, so holds cannot be closed.
pub async fn break_reservation_updates(pool: &SqlitePool) {
    sqlx::query(
        r#"CREATE TRIGGER fail_reservation_update BEFORE UPDATE ON reservations
           BEGIN
               SELECT RAISE(FAIL, 'disk full');
           END"#,
    )
    .execute(pool)
    .await
    .expect("create trigger");
}

pub async fn open_tasks(state: &AppState, kind: &str) -> usize {
    state
        .store
        .list_reconciliation(false)
        .await
        .expect("list reconciliation")
        .into_iter()
        .filter(|t| t.kind == kind)
        .count()
}
