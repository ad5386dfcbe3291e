// src/gifts.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::ledger::{self, LedgerError};
use crate::models::{AccountId, Amount, EntryReason};

#[derive(Debug, Error)]
pub enum GiftError {
    #[error("gift code {0} not found")]
    NotFound(String),
    #[error("gift code {0} has no uses left")]
    Exhausted(String),
    #[error("gift code {0} expired")]
    Expired(String),
    #[error("gift code {0} already redeemed by this account")]
    AlreadyRedeemed(String),
    #[error("account {0} is banned")]
    Banned(AccountId),
    #[error("amount must be positive, got {0}")]
    InvalidAmount(Amount),
    #[error("gift code {0} already exists")]
    Duplicate(String),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct GiftCode {
    pub code: String,
    pub amount: Amount,
    pub max_uses: i64,
    pub uses: i64,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewGiftCode {
    /// Generated when omitted.
    pub code: Option<String>,
    pub amount: Amount,
    #[serde(default = "one")]
    pub max_uses: i64,
    pub expires_at: Option<DateTime<Utc>>,
}

fn one() -> i64 {
    1
}

#[derive(Clone)]
pub struct GiftCodes {
    pool: SqlitePool,
}

impl GiftCodes {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, input: NewGiftCode) -> Result<GiftCode, GiftError> {
        if input.amount <= 0 {
            return Err(GiftError::InvalidAmount(input.amount));
        }
        let code = input
            .code
            .map(|c| c.trim().to_uppercase())
            .filter(|c| !c.is_empty())
            .unwrap_or_else(generate_code);

        let result = sqlx::query(
            r#"INSERT INTO gift_codes (code, amount, max_uses, uses, expires_at, created_at)
               VALUES (?, ?, ?, 0, ?, ?)
               ON CONFLICT (code) DO NOTHING"#,
        )
        .bind(&code)
        .bind(input.amount)
        .bind(input.max_uses.max(1))
        .bind(input.expires_at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(GiftError::Duplicate(code));
        }

        log::info!("gift code created code={} amount={}", code, input.amount);
        self.get(&code).await
    }

    pub async fn get(&self, code: &str) -> Result<GiftCode, GiftError> {
        let row = sqlx::query(
            r#"SELECT code, amount, max_uses, uses, expires_at, created_at
               FROM gift_codes
               WHERE code = ?"#,
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| GiftError::NotFound(code.to_string()))?;

        Ok(gift_from_row(&row))
    }

    /// Credits the code's amount once per account, in one SQL transaction.
    /// Returns the new balance.
    pub async fn redeem(&self, account_id: AccountId, code: &str) -> Result<Amount, GiftError> {
        let code = code.trim().to_uppercase();
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        // Write first so the transaction holds the write lock from the start.
        let bumped = sqlx::query(
            r#"UPDATE gift_codes SET uses = uses + 1
               WHERE code = ? AND uses < max_uses AND (expires_at IS NULL OR expires_at > ?)"#,
        )
        .bind(&code)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let gift = sqlx::query(
            r#"SELECT code, amount, max_uses, uses, expires_at, created_at
               FROM gift_codes
               WHERE code = ?"#,
        )
        .bind(&code)
        .fetch_optional(&mut *tx)
        .await?
        .map(|r| gift_from_row(&r))
        .ok_or_else(|| GiftError::NotFound(code.clone()))?;

        if bumped.rows_affected() == 0 {
            if gift.expires_at.is_some_and(|at| at <= now) {
                return Err(GiftError::Expired(code));
            }
            return Err(GiftError::Exhausted(code));
        }

        let banned: Option<bool> = sqlx::query("SELECT banned FROM accounts WHERE id = ?")
            .bind(account_id)
            .fetch_optional(&mut *tx)
            .await?
            .map(|r| r.get("banned"));
        match banned {
            None => return Err(LedgerError::NotFound(account_id).into()),
            Some(true) => return Err(GiftError::Banned(account_id)),
            Some(false) => {}
        }

        let inserted = sqlx::query(
            r#"INSERT INTO gift_redemptions (code, account_id, redeemed_at)
               VALUES (?, ?, ?)
               ON CONFLICT (code, account_id) DO NOTHING"#,
        )
        .bind(&code)
        .bind(account_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        if inserted.rows_affected() == 0 {
            return Err(GiftError::AlreadyRedeemed(code));
        }

        ledger::apply(
            &mut tx,
            account_id,
            gift.amount,
            EntryReason::GiftRedemption,
            Some(&code),
        )
        .await?;

        let balance: Amount = sqlx::query("SELECT balance FROM accounts WHERE id = ?")
            .bind(account_id)
            .fetch_one(&mut *tx)
            .await?
            .get("balance");

        tx.commit().await?;

        log::info!(
            "gift redeemed code={} account_id={} amount={}",
            code,
            account_id,
            gift.amount
        );
        Ok(balance)
    }
}

fn generate_code() -> String {
    Uuid::new_v4().simple().to_string()[..12].to_uppercase()
}

fn gift_from_row(r: &SqliteRow) -> GiftCode {
    GiftCode {
        code: r.get("code"),
        amount: r.get("amount"),
        max_uses: r.get("max_uses"),
        uses: r.get("uses"),
        expires_at: r.get("expires_at"),
        created_at: r.get("created_at"),
    }
}
