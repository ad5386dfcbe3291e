// src/journal.rs
//
// Audit trail for purchase/renewal/trial attempts:
// initiated -> provisioned -> finalized | cancelled.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::{AccountId, PlanId, ServiceId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnKind {
    Purchase,
    Renewal,
    Trial,
}

impl TxnKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxnKind::Purchase => "purchase",
            TxnKind::Renewal => "renewal",
            TxnKind::Trial => "trial",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    Initiated,
    Provisioned,
    Finalized,
    Cancelled,
}

impl TxnState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxnState::Initiated => "initiated",
            TxnState::Provisioned => "provisioned",
            TxnState::Finalized => "finalized",
            TxnState::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TransactionRecord {
    pub id: String,
    pub kind: String,
    pub account_id: AccountId,
    pub plan_id: Option<PlanId>,
    pub service_id: Option<ServiceId>,
    pub reservation_id: Option<String>,
    pub state: String,
    pub detail: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct Journal {
    pool: SqlitePool,
}

impl Journal {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn begin(
        &self,
        kind: TxnKind,
        account_id: AccountId,
        plan_id: Option<PlanId>,
        service_id: Option<ServiceId>,
        reservation_id: Option<Uuid>,
    ) -> Result<Uuid, sqlx::Error> {
        let id = Uuid::new_v4();
        let now = Utc::now();

        sqlx::query(
            r#"INSERT INTO transactions
                   (id, kind, account_id, plan_id, service_id, reservation_id, state, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(id.to_string())
        .bind(kind.as_str())
        .bind(account_id)
        .bind(plan_id)
        .bind(service_id)
        .bind(reservation_id.map(|r| r.to_string()))
        .bind(TxnState::Initiated.as_str())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    pub async fn advance(
        &self,
        id: Uuid,
        state: TxnState,
        service_id: Option<ServiceId>,
        detail: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"UPDATE transactions
               SET state = ?,
                   service_id = COALESCE(?, service_id),
                   detail = COALESCE(?, detail),
                   updated_at = ?
               WHERE id = ?"#,
        )
        .bind(state.as_str())
        .bind(service_id)
        .bind(detail)
        .bind(Utc::now())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<TransactionRecord>, sqlx::Error> {
        let row = sqlx::query(
            r#"SELECT id, kind, account_id, plan_id, service_id, reservation_id, state, detail,
                      created_at, updated_at
               FROM transactions
               WHERE id = ?"#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(record_from_row))
    }

    pub async fn for_account(&self, account_id: AccountId) -> Result<Vec<TransactionRecord>, sqlx::Error> {
        let rows = sqlx::query(
            r#"SELECT id, kind, account_id, plan_id, service_id, reservation_id, state, detail,
                      created_at, updated_at
               FROM transactions
               WHERE account_id = ?
               ORDER BY created_at DESC"#,
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(record_from_row).collect())
    }

    /// Transactions that never reached a terminal state and have not moved since `before`.
    pub async fn stale(&self, before: DateTime<Utc>) -> Result<Vec<TransactionRecord>, sqlx::Error> {
        let rows = sqlx::query(
            r#"SELECT id, kind, account_id, plan_id, service_id, reservation_id, state, detail,
                      created_at, updated_at
               FROM transactions
               WHERE state IN ('initiated', 'provisioned') AND updated_at < ?
               ORDER BY updated_at ASC"#,
        )
        .bind(before)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(record_from_row).collect())
    }
}

fn record_from_row(r: &SqliteRow) -> TransactionRecord {
    TransactionRecord {
        id: r.get("id"),
        kind: r.get("kind"),
        account_id: r.get("account_id"),
        plan_id: r.get("plan_id"),
        service_id: r.get("service_id"),
        reservation_id: r.get("reservation_id"),
        state: r.get("state"),
        detail: r.get("detail"),
        created_at: r.get("created_at"),
        updated_at: r.get("updated_at"),
    }
}
