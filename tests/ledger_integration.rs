use std::sync::Arc;

use panel_shop::ledger::{Ledger, LedgerError};
use panel_shop::models::EntryReason;

mod support;

async fn ledger_with(balance: i64) -> (support::TestDb, Ledger) {
    let test_db = support::init_test_db().await;
    let ledger = Ledger::new(test_db.pool.clone());
    ledger.ensure_account(1).await.expect("account");
    if balance > 0 {
        ledger
            .credit(1, balance, EntryReason::AdminAdjustment, None)
            .await
            .expect("credit");
    }
    (test_db, ledger)
}

#[tokio::test]
async fn reserve_then_finalize_keeps_the_charge() {
    let (_db, ledger) = ledger_with(100_000).await;

    let token = ledger
        .reserve(1, 50_000, EntryReason::Purchase)
        .await
        .expect("reserve");
    assert_eq!(ledger.balance(1).await.unwrap(), 50_000);

    ledger.finalize(&token).await.expect("finalize");
    ledger.finalize(&token).await.expect("finalize is idempotent");
    assert_eq!(ledger.balance(1).await.unwrap(), 50_000);

    // A finalized reservation can no longer be released.
    assert!(!ledger.release(&token).await.unwrap());
    assert_eq!(ledger.balance(1).await.unwrap(), 50_000);
    assert_eq!(ledger.entry_sum(1).await.unwrap(), 50_000);
}

#[tokio::test]
async fn release_returns_funds_exactly_once() {
    let (_db, ledger) = ledger_with(100_000).await;

    let token = ledger
        .reserve(1, 30_000, EntryReason::Purchase)
        .await
        .expect("reserve");
    assert!(ledger.release(&token).await.unwrap());
    assert!(!ledger.release(&token).await.unwrap());
    assert_eq!(ledger.balance(1).await.unwrap(), 100_000);

    assert!(matches!(
        ledger.finalize(&token).await,
        Err(LedgerError::ReservationClosed(id)) if id == token.id
    ));
    assert_eq!(ledger.entry_sum(1).await.unwrap(), 100_000);
}

#[tokio::test]
async fn settle_refunds_the_unused_part() {
    let (_db, ledger) = ledger_with(100_000).await;

    let token = ledger
        .reserve(1, 50_000, EntryReason::Renewal)
        .await
        .expect("reserve");
    ledger.settle(&token, 25_000).await.expect("settle");
    assert_eq!(ledger.balance(1).await.unwrap(), 75_000);

    let entries = ledger.entries(1, 10).await.unwrap();
    assert_eq!(entries[0].reason, "refund");
    assert_eq!(entries[0].amount, 25_000);
    assert_eq!(ledger.entry_sum(1).await.unwrap(), 75_000);

    let other = ledger
        .reserve(1, 10_000, EntryReason::Renewal)
        .await
        .expect("reserve");
    assert!(matches!(
        ledger.settle(&other, 10_001).await,
        Err(LedgerError::InvalidAmount(10_001))
    ));
}

#[tokio::test]
async fn reserve_refuses_to_overdraw() {
    let (_db, ledger) = ledger_with(10_000).await;

    assert!(matches!(
        ledger.reserve(1, 10_001, EntryReason::Purchase).await,
        Err(LedgerError::InsufficientFunds(1))
    ));
    assert!(matches!(
        ledger.reserve(2, 1, EntryReason::Purchase).await,
        Err(LedgerError::NotFound(2))
    ));
    assert!(matches!(
        ledger.reserve(1, 0, EntryReason::Purchase).await,
        Err(LedgerError::InvalidAmount(0))
    ));
    assert_eq!(ledger.balance(1).await.unwrap(), 10_000);
}

#[tokio::test]
async fn concurrent_reservations_never_double_spend() {
    let (_db, ledger) = ledger_with(100_000).await;
    let ledger = Arc::new(ledger);

    let mut handles = Vec::new();
    for _ in 0..10 {
        let ledger = ledger.clone();
        handles.push(tokio::spawn(async move {
            ledger.reserve(1, 20_000, EntryReason::Purchase).await
        }));
    }

    let mut granted = 0;
    let mut refused = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => granted += 1,
            Err(LedgerError::InsufficientFunds(_)) => refused += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    assert_eq!(granted, 5);
    assert_eq!(refused, 5);
    assert_eq!(ledger.balance(1).await.unwrap(), 0);
    assert_eq!(ledger.entry_sum(1).await.unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_reservations_never_double_spend_on_a_shared_file() {
    let file_db = support::init_file_db().await;
    let ledger = Arc::new(Ledger::new(file_db.pool.clone()));
    ledger.ensure_account(1).await.expect("account");
    ledger
        .credit(1, 100_000, EntryReason::AdminAdjustment, None)
        .await
        .expect("seed");

    let mut handles = Vec::new();
    for _ in 0..16 {
        let ledger = ledger.clone();
        handles.push(tokio::spawn(async move {
            ledger.reserve(1, 20_000, EntryReason::Purchase).await
        }));
    }

    let mut tokens = Vec::new();
    let mut refused = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(token) => tokens.push(token),
            Err(LedgerError::InsufficientFunds(_)) => refused += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    assert_eq!(tokens.len(), 5);
    assert_eq!(refused, 11);
    assert_eq!(ledger.balance(1).await.unwrap(), 0);
    assert_eq!(ledger.entry_sum(1).await.unwrap(), 0);

    // Settling and releasing from several connections at once stays consistent too.
    let mut handles = Vec::new();
    for (i, token) in tokens.into_iter().enumerate() {
        let ledger = ledger.clone();
        handles.push(tokio::spawn(async move {
            if i % 2 == 0 {
                ledger.finalize(&token).await.map(|_| ())
            } else {
                ledger.release(&token).await.map(|_| ())
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap().expect("close reservation");
    }

    assert_eq!(ledger.balance(1).await.unwrap(), 40_000);
    assert_eq!(ledger.entry_sum(1).await.unwrap(), 40_000);
}

#[tokio::test]
async fn transfer_moves_funds_atomically() {
    let (_db, ledger) = ledger_with(5_000).await;
    ledger.ensure_account(2).await.unwrap();

    ledger.transfer(1, 2, 2_000).await.expect("transfer");
    assert_eq!(ledger.balance(1).await.unwrap(), 3_000);
    assert_eq!(ledger.balance(2).await.unwrap(), 2_000);

    assert!(matches!(
        ledger.transfer(1, 2, 3_001).await,
        Err(LedgerError::InsufficientFunds(1))
    ));
    assert!(matches!(
        ledger.transfer(1, 1, 10).await,
        Err(LedgerError::SameAccount(1))
    ));
    assert!(matches!(
        ledger.transfer(1, 99, 10).await,
        Err(LedgerError::NotFound(99))
    ));

    assert_eq!(ledger.balance(1).await.unwrap(), 3_000);
    assert_eq!(ledger.balance(2).await.unwrap(), 2_000);
    assert_eq!(ledger.entry_sum(1).await.unwrap(), 3_000);
    assert_eq!(ledger.entry_sum(2).await.unwrap(), 2_000);
}

#[tokio::test]
async fn debit_is_conditional_and_credit_requires_account() {
    let (_db, ledger) = ledger_with(1_000).await;

    assert_eq!(
        ledger
            .debit(1, 400, EntryReason::AdminAdjustment, Some("chargeback"))
            .await
            .unwrap(),
        600
    );
    assert!(matches!(
        ledger.debit(1, 601, EntryReason::AdminAdjustment, None).await,
        Err(LedgerError::InsufficientFunds(1))
    ));
    assert!(matches!(
        ledger.credit(42, 10, EntryReason::ReferralBonus, None).await,
        Err(LedgerError::NotFound(42))
    ));
    assert!(matches!(
        ledger.credit(1, -5, EntryReason::AdminAdjustment, None).await,
        Err(LedgerError::InvalidAmount(-5))
    ));
}

#[tokio::test]
async fn trial_flag_is_claimed_once() {
    let (_db, ledger) = ledger_with(0).await;

    assert!(ledger.claim_trial(1).await.unwrap());
    assert!(!ledger.claim_trial(1).await.unwrap());
    ledger.restore_trial(1).await.unwrap();
    assert!(ledger.claim_trial(1).await.unwrap());

    assert!(matches!(
        ledger.claim_trial(7).await,
        Err(LedgerError::NotFound(7))
    ));
}
