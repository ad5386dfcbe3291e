// src/ledger.rs
//
// Wallet balances. Every mutation is a single conditional UPDATE plus a
// ledger_entries row written in the same SQL transaction, so the stored
// balance always equals the sum of the account's entries.

use chrono::Utc;
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Account, AccountId, Amount, EntryReason, LedgerEntry};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("insufficient funds on account {0}")]
    InsufficientFunds(AccountId),
    #[error("account {0} not found")]
    NotFound(AccountId),
    #[error("amount must be positive, got {0}")]
    InvalidAmount(Amount),
    #[error("cannot transfer to the same account {0}")]
    SameAccount(AccountId),
    #[error("reservation {0} not found")]
    UnknownReservation(Uuid),
    #[error("reservation {0} was already released")]
    ReservationClosed(Uuid),
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

/// Proof that `amount` was taken off the account at reserve time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReservationToken {
    pub id: Uuid,
    pub account_id: AccountId,
    pub amount: Amount,
}

#[derive(Clone)]
pub struct Ledger {
    pool: SqlitePool,
}

impl Ledger {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Creates the account with a zero balance if it does not exist yet.
    pub async fn ensure_account(&self, account_id: AccountId) -> Result<Account, LedgerError> {
        sqlx::query(
            r#"INSERT INTO accounts (id, balance, banned, trial_used, created_at)
               VALUES (?, 0, 0, 0, ?)
               ON CONFLICT (id) DO NOTHING"#,
        )
        .bind(account_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        self.get_account(account_id).await
    }

    pub async fn get_account(&self, account_id: AccountId) -> Result<Account, LedgerError> {
        let row = sqlx::query(
            r#"SELECT id, balance, banned, trial_used, created_at
               FROM accounts
               WHERE id = ?"#,
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| account_from_row(&r))
            .ok_or(LedgerError::NotFound(account_id))
    }

    pub async fn balance(&self, account_id: AccountId) -> Result<Amount, LedgerError> {
        Ok(self.get_account(account_id).await?.balance)
    }

    /// Atomically checks `balance >= amount` and takes the amount off.
    ///
    /// The check and the decrement are the same statement, so two concurrent
    /// reservations can never both pass against the same funds.
    pub async fn reserve(
        &self,
        account_id: AccountId,
        amount: Amount,
        reason: EntryReason,
    ) -> Result<ReservationToken, LedgerError> {
        ensure_positive(amount)?;

        let id = Uuid::new_v4();
        let mut tx = self.pool.begin().await?;

        apply(&mut tx, account_id, -amount, reason, Some(&id.to_string())).await?;

        sqlx::query(
            r#"INSERT INTO reservations (id, account_id, amount, reason, status, created_at)
               VALUES (?, ?, ?, ?, 'held', ?)"#,
        )
        .bind(id.to_string())
        .bind(account_id)
        .bind(amount)
        .bind(reason.as_str())
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        log::debug!(
            "ledger reserve account_id={} amount={} reservation={}",
            account_id,
            amount,
            id
        );

        Ok(ReservationToken {
            id,
            account_id,
            amount,
        })
    }

    /// Puts a held reservation back on the balance.
    ///
    /// Returns `false` when the reservation was already released or finalized,
    /// so calling it twice credits the amount exactly once.
    pub async fn release(&self, token: &ReservationToken) -> Result<bool, LedgerError> {
        let mut tx = self.pool.begin().await?;

        let closed = close_reservation(&mut tx, token.id, "released").await?;
        if !closed {
            tx.rollback().await?;
            reservation_status(&self.pool, token.id).await?;
            return Ok(false);
        }

        apply(
            &mut tx,
            token.account_id,
            token.amount,
            EntryReason::Release,
            Some(&token.id.to_string()),
        )
        .await?;

        tx.commit().await?;

        log::info!(
            "ledger release account_id={} amount={} reservation={}",
            token.account_id,
            token.amount,
            token.id
        );
        Ok(true)
    }

    /// Marks the reservation as consumed. The balance already moved at reserve time.
    pub async fn finalize(&self, token: &ReservationToken) -> Result<(), LedgerError> {
        self.settle(token, token.amount).await
    }

    /// Finalizes the reservation keeping only `consumed`; the rest is refunded.
    pub async fn settle(&self, token: &ReservationToken, consumed: Amount) -> Result<(), LedgerError> {
        if consumed < 0 || consumed > token.amount {
            return Err(LedgerError::InvalidAmount(consumed));
        }

        let mut tx = self.pool.begin().await?;

        if !close_reservation(&mut tx, token.id, "finalized").await? {
            tx.rollback().await?;
            return match reservation_status(&self.pool, token.id).await?.as_str() {
                "finalized" => Ok(()),
                _ => Err(LedgerError::ReservationClosed(token.id)),
            };
        }

        let refund = token.amount - consumed;
        if refund > 0 {
            apply(
                &mut tx,
                token.account_id,
                refund,
                EntryReason::Refund,
                Some(&token.id.to_string()),
            )
            .await?;
        }

        tx.commit().await?;

        log::debug!(
            "ledger settle account_id={} consumed={} refunded={} reservation={}",
            token.account_id,
            consumed,
            refund,
            token.id
        );
        Ok(())
    }

    /// Unconditional top-up. Returns the new balance.
    pub async fn credit(
        &self,
        account_id: AccountId,
        amount: Amount,
        reason: EntryReason,
        reference: Option<&str>,
    ) -> Result<Amount, LedgerError> {
        ensure_positive(amount)?;

        let mut tx = self.pool.begin().await?;
        apply(&mut tx, account_id, amount, reason, reference).await?;
        let balance = balance_in(&mut tx, account_id).await?;
        tx.commit().await?;

        log::info!(
            "ledger credit account_id={} amount={} reason={}",
            account_id,
            amount,
            reason.as_str()
        );
        Ok(balance)
    }

    /// Conditional decrease used for admin adjustments. Returns the new balance.
    pub async fn debit(
        &self,
        account_id: AccountId,
        amount: Amount,
        reason: EntryReason,
        reference: Option<&str>,
    ) -> Result<Amount, LedgerError> {
        ensure_positive(amount)?;

        let mut tx = self.pool.begin().await?;
        apply(&mut tx, account_id, -amount, reason, reference).await?;
        let balance = balance_in(&mut tx, account_id).await?;
        tx.commit().await?;

        log::info!(
            "ledger debit account_id={} amount={} reason={}",
            account_id,
            amount,
            reason.as_str()
        );
        Ok(balance)
    }

    /// Moves funds between two existing accounts in one SQL transaction.
    pub async fn transfer(
        &self,
        from: AccountId,
        to: AccountId,
        amount: Amount,
    ) -> Result<(), LedgerError> {
        ensure_positive(amount)?;
        if from == to {
            return Err(LedgerError::SameAccount(from));
        }

        // Both sides must exist before anything moves.
        self.get_account(from).await?;
        self.get_account(to).await?;

        let mut tx = self.pool.begin().await?;
        apply(
            &mut tx,
            from,
            -amount,
            EntryReason::Transfer,
            Some(&format!("to:{to}")),
        )
        .await?;
        apply(
            &mut tx,
            to,
            amount,
            EntryReason::Transfer,
            Some(&format!("from:{from}")),
        )
        .await?;
        tx.commit().await?;

        log::info!("ledger transfer from={} to={} amount={}", from, to, amount);
        Ok(())
    }

    /// Sum of every entry applied to the account; equals the stored balance.
    pub async fn entry_sum(&self, account_id: AccountId) -> Result<Amount, LedgerError> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(amount), 0) AS total FROM ledger_entries WHERE account_id = ?",
        )
        .bind(account_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get("total"))
    }

    pub async fn entries(
        &self,
        account_id: AccountId,
        limit: i64,
    ) -> Result<Vec<LedgerEntry>, LedgerError> {
        let rows = sqlx::query(
            r#"SELECT id, account_id, amount, reason, reference, created_at
               FROM ledger_entries
               WHERE account_id = ?
               ORDER BY id DESC
               LIMIT ?"#,
        )
        .bind(account_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| LedgerEntry {
                id: r.get("id"),
                account_id: r.get("account_id"),
                amount: r.get("amount"),
                reason: r.get("reason"),
                reference: r.get("reference"),
                created_at: r.get("created_at"),
            })
            .collect())
    }

    pub async fn set_banned(&self, account_id: AccountId, banned: bool) -> Result<(), LedgerError> {
        let result = sqlx::query("UPDATE accounts SET banned = ? WHERE id = ?")
            .bind(banned)
            .bind(account_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::NotFound(account_id));
        }
        Ok(())
    }

    /// Flips `trial_used` from false to true. Returns `false` if it was already used.
    pub async fn claim_trial(&self, account_id: AccountId) -> Result<bool, LedgerError> {
        let result = sqlx::query("UPDATE accounts SET trial_used = 1 WHERE id = ? AND trial_used = 0")
            .bind(account_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            self.get_account(account_id).await?;
            return Ok(false);
        }
        Ok(true)
    }

    pub async fn restore_trial(&self, account_id: AccountId) -> Result<(), LedgerError> {
        sqlx::query("UPDATE accounts SET trial_used = 0 WHERE id = ?")
            .bind(account_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn ensure_positive(amount: Amount) -> Result<(), LedgerError> {
    if amount <= 0 {
        return Err(LedgerError::InvalidAmount(amount));
    }
    Ok(())
}

/// Applies a signed delta and records the matching entry.
/// Negative deltas only go through when the balance covers them.
pub(crate) async fn apply(
    conn: &mut SqliteConnection,
    account_id: AccountId,
    delta: Amount,
    reason: EntryReason,
    reference: Option<&str>,
) -> Result<(), LedgerError> {
    let result = if delta < 0 {
        sqlx::query("UPDATE accounts SET balance = balance - ? WHERE id = ? AND balance >= ?")
            .bind(-delta)
            .bind(account_id)
            .bind(-delta)
            .execute(&mut *conn)
            .await?
    } else {
        sqlx::query("UPDATE accounts SET balance = balance + ? WHERE id = ?")
            .bind(delta)
            .bind(account_id)
            .execute(&mut *conn)
            .await?
    };

    if result.rows_affected() == 0 {
        let exists = sqlx::query("SELECT 1 FROM accounts WHERE id = ?")
            .bind(account_id)
            .fetch_optional(&mut *conn)
            .await?
            .is_some();
        return Err(if exists {
            LedgerError::InsufficientFunds(account_id)
        } else {
            LedgerError::NotFound(account_id)
        });
    }

    sqlx::query(
        r#"INSERT INTO ledger_entries (account_id, amount, reason, reference, created_at)
           VALUES (?, ?, ?, ?, ?)"#,
    )
    .bind(account_id)
    .bind(delta)
    .bind(reason.as_str())
    .bind(reference)
    .bind(Utc::now())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

async fn balance_in(conn: &mut SqliteConnection, account_id: AccountId) -> Result<Amount, LedgerError> {
    let row = sqlx::query("SELECT balance FROM accounts WHERE id = ?")
        .bind(account_id)
        .fetch_one(&mut *conn)
        .await?;
    Ok(row.get("balance"))
}

async fn close_reservation(
    conn: &mut SqliteConnection,
    id: Uuid,
    status: &str,
) -> Result<bool, LedgerError> {
    let result = sqlx::query(
        "UPDATE reservations SET status = ?, closed_at = ? WHERE id = ? AND status = 'held'",
    )
    .bind(status)
    .bind(Utc::now())
    .bind(id.to_string())
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

async fn reservation_status(pool: &SqlitePool, id: Uuid) -> Result<String, LedgerError> {
    let row = sqlx::query("SELECT status FROM reservations WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;

    row.map(|r| r.get("status"))
        .ok_or(LedgerError::UnknownReservation(id))
}

pub(crate) fn account_from_row(r: &SqliteRow) -> Account {
    Account {
        id: r.get("id"),
        balance: r.get("balance"),
        banned: r.get("banned"),
        trial_used: r.get("trial_used"),
        created_at: r.get("created_at"),
    }
}
