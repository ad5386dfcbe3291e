// src/credentials.rs
//
// Local record of issued services and their per-panel endpoints. Pure storage:
// nothing here talks to a panel, the orchestrator does that before and after.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use thiserror::Error;
use utoipa::ToSchema;

use crate::models::{
    AccountId, Amount, Endpoint, PanelId, Plan, PlanId, ReconciliationTask, Service, ServiceId,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("service {0} not found")]
    ServiceNotFound(ServiceId),
    #[error("plan {0} not found")]
    PlanNotFound(PlanId),
    #[error("endpoint {panel_id} of service {service_id} not found")]
    EndpointNotFound {
        service_id: ServiceId,
        panel_id: PanelId,
    },
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

#[derive(Debug, Clone)]
pub struct NewService {
    pub account_id: AccountId,
    pub plan_id: Option<PlanId>,
    pub display_name: String,
    pub quota_gb: i64,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewEndpoint {
    pub panel_id: PanelId,
    pub external_id: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct PlanInput {
    pub name: String,
    pub price: Amount,
    pub duration_days: i64,
    #[serde(default)]
    pub quota_gb: i64,
    #[serde(default = "default_visible")]
    pub visible: bool,
    pub category: Option<String>,
}

fn default_visible() -> bool {
    true
}

#[derive(Clone)]
pub struct CredentialStore {
    pool: SqlitePool,
}

impl CredentialStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Single-endpoint form of [`CredentialStore::create_service_with_endpoints`].
    pub async fn create_service(
        &self,
        service: NewService,
        panel_id: PanelId,
        external_id: String,
    ) -> Result<Service, StoreError> {
        let endpoint = NewEndpoint {
            panel_id,
            external_id,
            expires_at: service.expires_at,
        };
        self.create_service_with_endpoints(service, &[endpoint]).await
    }

    /// Writes the service and every endpoint in one transaction.
    pub async fn create_service_with_endpoints(
        &self,
        service: NewService,
        endpoints: &[NewEndpoint],
    ) -> Result<Service, StoreError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"INSERT INTO services
                   (account_id, plan_id, display_name, status, quota_gb, expires_at,
                    low_usage_alert_sent, created_at, updated_at)
               VALUES (?, ?, ?, 'active', ?, ?, 0, ?, ?)
               RETURNING id"#,
        )
        .bind(service.account_id)
        .bind(service.plan_id)
        .bind(&service.display_name)
        .bind(service.quota_gb)
        .bind(service.expires_at)
        .bind(now)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;
        let service_id: ServiceId = row.get("id");

        for endpoint in endpoints {
            sqlx::query(
                r#"INSERT INTO endpoints (service_id, panel_id, external_id, expires_at, reachable)
                   VALUES (?, ?, ?, ?, 1)"#,
            )
            .bind(service_id)
            .bind(endpoint.panel_id.as_str())
            .bind(&endpoint.external_id)
            .bind(endpoint.expires_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        log::info!(
            "store created service_id={} account_id={} endpoints={}",
            service_id,
            service.account_id,
            endpoints.len()
        );
        self.get_service(service_id).await
    }

    /// Attaches a mirrored endpoint to an existing service.
    pub async fn add_endpoint(
        &self,
        service_id: ServiceId,
        endpoint: NewEndpoint,
    ) -> Result<(), StoreError> {
        self.ensure_service(service_id).await?;

        sqlx::query(
            r#"INSERT INTO endpoints (service_id, panel_id, external_id, expires_at, reachable)
               VALUES (?, ?, ?, ?, 1)
               ON CONFLICT (service_id, panel_id)
               DO UPDATE SET external_id = excluded.external_id,
                             expires_at = excluded.expires_at,
                             reachable = 1"#,
        )
        .bind(service_id)
        .bind(endpoint.panel_id.as_str())
        .bind(&endpoint.external_id)
        .bind(endpoint.expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn remove_endpoint(
        &self,
        service_id: ServiceId,
        panel_id: &PanelId,
    ) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM endpoints WHERE service_id = ? AND panel_id = ?")
            .bind(service_id)
            .bind(panel_id.as_str())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::EndpointNotFound {
                service_id,
                panel_id: panel_id.clone(),
            });
        }
        Ok(())
    }

    pub async fn get_service(&self, service_id: ServiceId) -> Result<Service, StoreError> {
        let row = sqlx::query(
            r#"SELECT id, account_id, plan_id, display_name, status, quota_gb, expires_at,
                      low_usage_alert_sent, created_at, updated_at
               FROM services
               WHERE id = ?"#,
        )
        .bind(service_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::ServiceNotFound(service_id))?;

        let endpoints = self.endpoints_of(service_id).await?;
        Ok(service_from_row(&row, endpoints))
    }

    pub async fn list_services(&self, account_id: AccountId) -> Result<Vec<Service>, StoreError> {
        let rows = sqlx::query(
            r#"SELECT id, account_id, plan_id, display_name, status, quota_gb, expires_at,
                      low_usage_alert_sent, created_at, updated_at
               FROM services
               WHERE account_id = ?
               ORDER BY id ASC"#,
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        self.with_endpoints(rows).await
    }

    pub async fn list_all_services(&self) -> Result<Vec<Service>, StoreError> {
        let rows = sqlx::query(
            r#"SELECT id, account_id, plan_id, display_name, status, quota_gb, expires_at,
                      low_usage_alert_sent, created_at, updated_at
               FROM services
               ORDER BY id ASC"#,
        )
        .fetch_all(&self.pool)
        .await?;

        self.with_endpoints(rows).await
    }

    /// Drops the local record. External de-provisioning is the caller's job.
    pub async fn delete_service(&self, service_id: ServiceId) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM endpoints WHERE service_id = ?")
            .bind(service_id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM services WHERE id = ?")
            .bind(service_id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(StoreError::ServiceNotFound(service_id));
        }

        tx.commit().await?;
        log::info!("store deleted service_id={}", service_id);
        Ok(())
    }

    /// Records a renewal in one transaction: the service moves to `plan`
    /// with the new expiry and a cleared low-usage alert, and every endpoint
    /// in `extended` gets its own new expiry. Nothing is written on failure.
    pub async fn record_renewal(
        &self,
        service_id: ServiceId,
        plan: &Plan,
        expires_at: DateTime<Utc>,
        extended: &BTreeMap<PanelId, DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"UPDATE services
               SET plan_id = ?, quota_gb = ?, expires_at = ?, status = 'active',
                   low_usage_alert_sent = 0, updated_at = ?
               WHERE id = ?"#,
        )
        .bind(plan.id)
        .bind(plan.quota_gb)
        .bind(expires_at)
        .bind(now)
        .bind(service_id)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(StoreError::ServiceNotFound(service_id));
        }

        for (panel_id, endpoint_expiry) in extended {
            let result = sqlx::query(
                "UPDATE endpoints SET expires_at = ?, reachable = 1 WHERE service_id = ? AND panel_id = ?",
            )
            .bind(endpoint_expiry)
            .bind(service_id)
            .bind(panel_id.as_str())
            .execute(&mut *tx)
            .await?;
            if result.rows_affected() == 0 {
                tx.rollback().await?;
                return Err(StoreError::EndpointNotFound {
                    service_id,
                    panel_id: panel_id.clone(),
                });
            }
        }

        tx.commit().await?;

        log::info!(
            "store renewed service_id={} plan_id={} endpoints={}",
            service_id,
            plan.id,
            extended.len()
        );
        Ok(())
    }

    pub async fn set_endpoint_reachability(
        &self,
        service_id: ServiceId,
        panel_id: &PanelId,
        reachable: bool,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"UPDATE endpoints SET reachable = ?, last_checked_at = ?
               WHERE service_id = ? AND panel_id = ?"#,
        )
        .bind(reachable)
        .bind(Utc::now())
        .bind(service_id)
        .bind(panel_id.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Returns `true` if the flag was newly set.
    pub async fn mark_low_usage_alert(&self, service_id: ServiceId) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE services SET low_usage_alert_sent = 1 WHERE id = ? AND low_usage_alert_sent = 0",
        )
        .bind(service_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn create_plan(&self, input: &PlanInput) -> Result<Plan, StoreError> {
        let row = sqlx::query(
            r#"INSERT INTO plans (name, price, duration_days, quota_gb, visible, category, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)
               RETURNING id"#,
        )
        .bind(&input.name)
        .bind(input.price)
        .bind(input.duration_days)
        .bind(input.quota_gb)
        .bind(input.visible)
        .bind(input.category.as_deref())
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        self.get_plan(row.get("id")).await
    }

    /// Already-issued services keep what they were provisioned with.
    pub async fn update_plan(&self, plan_id: PlanId, input: &PlanInput) -> Result<Plan, StoreError> {
        let result = sqlx::query(
            r#"UPDATE plans
               SET name = ?, price = ?, duration_days = ?, quota_gb = ?, visible = ?, category = ?
               WHERE id = ?"#,
        )
        .bind(&input.name)
        .bind(input.price)
        .bind(input.duration_days)
        .bind(input.quota_gb)
        .bind(input.visible)
        .bind(input.category.as_deref())
        .bind(plan_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::PlanNotFound(plan_id));
        }
        self.get_plan(plan_id).await
    }

    pub async fn get_plan(&self, plan_id: PlanId) -> Result<Plan, StoreError> {
        let row = sqlx::query(
            r#"SELECT id, name, price, duration_days, quota_gb, visible, category, created_at
               FROM plans
               WHERE id = ?"#,
        )
        .bind(plan_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::PlanNotFound(plan_id))?;

        Ok(plan_from_row(&row))
    }

    pub async fn list_plans(&self, visible_only: bool) -> Result<Vec<Plan>, StoreError> {
        let rows = sqlx::query(
            r#"SELECT id, name, price, duration_days, quota_gb, visible, category, created_at
               FROM plans
               WHERE visible = 1 OR ? = 0
               ORDER BY price ASC"#,
        )
        .bind(visible_only)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(plan_from_row).collect())
    }

    /// Queues an inconsistency for an operator.
    pub async fn record_reconciliation(
        &self,
        kind: &str,
        service_id: Option<ServiceId>,
        panel_id: Option<&PanelId>,
        external_id: Option<&str>,
        detail: &str,
    ) -> Result<i64, StoreError> {
        let row = sqlx::query(
            r#"INSERT INTO reconciliation_tasks
                   (kind, service_id, panel_id, external_id, detail, resolved, created_at)
               VALUES (?, ?, ?, ?, ?, 0, ?)
               RETURNING id"#,
        )
        .bind(kind)
        .bind(service_id)
        .bind(panel_id.map(|p| p.as_str()))
        .bind(external_id)
        .bind(detail)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        let id: i64 = row.get("id");
        log::warn!(
            "reconciliation task id={} kind={} service_id={:?} panel_id={:?} detail={}",
            id,
            kind,
            service_id,
            panel_id,
            detail
        );
        Ok(id)
    }

    pub async fn list_reconciliation(
        &self,
        include_resolved: bool,
    ) -> Result<Vec<ReconciliationTask>, StoreError> {
        let rows = sqlx::query(
            r#"SELECT id, kind, service_id, panel_id, external_id, detail, resolved, created_at
               FROM reconciliation_tasks
               WHERE resolved = 0 OR ? = 1
               ORDER BY id ASC"#,
        )
        .bind(include_resolved)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| ReconciliationTask {
                id: r.get("id"),
                kind: r.get("kind"),
                service_id: r.get("service_id"),
                panel_id: r.get("panel_id"),
                external_id: r.get("external_id"),
                detail: r.get("detail"),
                resolved: r.get("resolved"),
                created_at: r.get("created_at"),
            })
            .collect())
    }

    pub async fn has_open_reconciliation(
        &self,
        kind: &str,
        service_id: ServiceId,
    ) -> Result<bool, StoreError> {
        let row = sqlx::query(
            r#"SELECT 1 FROM reconciliation_tasks
               WHERE kind = ? AND service_id = ? AND resolved = 0
               LIMIT 1"#,
        )
        .bind(kind)
        .bind(service_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    /// Returns `false` when the task does not exist or was already resolved.
    pub async fn resolve_reconciliation(&self, task_id: i64) -> Result<bool, StoreError> {
        let result =
            sqlx::query("UPDATE reconciliation_tasks SET resolved = 1 WHERE id = ? AND resolved = 0")
                .bind(task_id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn ensure_service(&self, service_id: ServiceId) -> Result<(), StoreError> {
        sqlx::query("SELECT 1 FROM services WHERE id = ?")
            .bind(service_id)
            .fetch_optional(&self.pool)
            .await?
            .map(|_| ())
            .ok_or(StoreError::ServiceNotFound(service_id))
    }

    async fn endpoints_of(&self, service_id: ServiceId) -> Result<Vec<Endpoint>, StoreError> {
        let rows = sqlx::query(
            r#"SELECT service_id, panel_id, external_id, expires_at, reachable, last_checked_at
               FROM endpoints
               WHERE service_id = ?
               ORDER BY id ASC"#,
        )
        .bind(service_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| Endpoint {
                service_id: r.get("service_id"),
                panel_id: PanelId(r.get("panel_id")),
                external_id: r.get("external_id"),
                expires_at: r.get("expires_at"),
                reachable: r.get("reachable"),
                last_checked_at: r.get("last_checked_at"),
            })
            .collect())
    }

    async fn with_endpoints(&self, rows: Vec<SqliteRow>) -> Result<Vec<Service>, StoreError> {
        let mut services = Vec::with_capacity(rows.len());
        for row in rows {
            let endpoints = self.endpoints_of(row.get("id")).await?;
            services.push(service_from_row(&row, endpoints));
        }
        Ok(services)
    }
}

fn service_from_row(r: &SqliteRow, endpoints: Vec<Endpoint>) -> Service {
    Service {
        id: r.get("id"),
        account_id: r.get("account_id"),
        plan_id: r.get("plan_id"),
        display_name: r.get("display_name"),
        status: r.get("status"),
        quota_gb: r.get("quota_gb"),
        expires_at: r.get("expires_at"),
        low_usage_alert_sent: r.get("low_usage_alert_sent"),
        created_at: r.get("created_at"),
        updated_at: r.get("updated_at"),
        endpoints,
    }
}

fn plan_from_row(r: &SqliteRow) -> Plan {
    Plan {
        id: r.get("id"),
        name: r.get("name"),
        price: r.get("price"),
        duration_days: r.get("duration_days"),
        quota_gb: r.get("quota_gb"),
        visible: r.get("visible"),
        category: r.get("category"),
        created_at: r.get("created_at"),
    }
}
