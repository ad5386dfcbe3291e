use chrono::{Duration, Utc};

use panel_shop::gifts::{GiftCodes, GiftError, NewGiftCode};
use panel_shop::ledger::{Ledger, LedgerError};
use panel_shop::models::EntryReason;

mod support;

async fn setup() -> (support::TestDb, Ledger, GiftCodes) {
    let test_db = support::init_test_db().await;
    let ledger = Ledger::new(test_db.pool.clone());
    let gifts = GiftCodes::new(test_db.pool.clone());
    for id in 1..=3 {
        ledger.ensure_account(id).await.expect("account");
    }
    (test_db, ledger, gifts)
}

fn gift(code: &str, amount: i64, max_uses: i64) -> NewGiftCode {
    NewGiftCode {
        code: Some(code.to_string()),
        amount,
        max_uses,
        expires_at: None,
    }
}

#[tokio::test]
async fn redeem_credits_the_balance_through_the_ledger() {
    let (_db, ledger, gifts) = setup().await;
    let created = gifts.create(gift("spring", 15_000, 10)).await.expect("create");
    assert_eq!(created.code, "SPRING");
    assert_eq!(created.uses, 0);

    let balance = gifts.redeem(1, " spring ").await.expect("redeem");
    assert_eq!(balance, 15_000);
    assert_eq!(ledger.entry_sum(1).await.unwrap(), 15_000);

    let entries = ledger.entries(1, 10).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].reason, EntryReason::GiftRedemption.as_str());
    assert_eq!(gifts.get("SPRING").await.unwrap().uses, 1);
}

#[tokio::test]
async fn each_account_redeems_a_code_once() {
    let (_db, ledger, gifts) = setup().await;
    gifts.create(gift("ONCE", 1_000, 10)).await.unwrap();

    gifts.redeem(1, "ONCE").await.expect("first");
    assert!(matches!(
        gifts.redeem(1, "ONCE").await,
        Err(GiftError::AlreadyRedeemed(code)) if code == "ONCE"
    ));

    // The refused attempt rolled back its use counter and credited nothing.
    assert_eq!(gifts.get("ONCE").await.unwrap().uses, 1);
    assert_eq!(ledger.balance(1).await.unwrap(), 1_000);
}

#[tokio::test]
async fn exhausted_and_expired_codes_are_refused() {
    let (_db, ledger, gifts) = setup().await;
    gifts.create(gift("SINGLE", 500, 1)).await.unwrap();
    gifts
        .create(NewGiftCode {
            code: Some("OLD".to_string()),
            amount: 500,
            max_uses: 5,
            expires_at: Some(Utc::now() - Duration::hours(1)),
        })
        .await
        .unwrap();

    gifts.redeem(1, "SINGLE").await.expect("only use");
    assert!(matches!(
        gifts.redeem(2, "SINGLE").await,
        Err(GiftError::Exhausted(_))
    ));
    assert!(matches!(
        gifts.redeem(2, "OLD").await,
        Err(GiftError::Expired(_))
    ));
    assert!(matches!(
        gifts.redeem(2, "MISSING").await,
        Err(GiftError::NotFound(_))
    ));
    assert_eq!(ledger.balance(2).await.unwrap(), 0);
}

#[tokio::test]
async fn banned_or_unknown_accounts_cannot_redeem() {
    let (_db, ledger, gifts) = setup().await;
    gifts.create(gift("PROMO", 700, 5)).await.unwrap();
    ledger.set_banned(3, true).await.unwrap();

    assert!(matches!(
        gifts.redeem(3, "PROMO").await,
        Err(GiftError::Banned(3))
    ));
    assert!(matches!(
        gifts.redeem(99, "PROMO").await,
        Err(GiftError::Ledger(LedgerError::NotFound(99)))
    ));
    assert_eq!(gifts.get("PROMO").await.unwrap().uses, 0);
}

#[tokio::test]
async fn create_validates_and_generates_codes() {
    let (_db, _ledger, gifts) = setup().await;

    assert!(matches!(
        gifts.create(gift("ZERO", 0, 1)).await,
        Err(GiftError::InvalidAmount(0))
    ));

    gifts.create(gift("DUP", 100, 1)).await.unwrap();
    assert!(matches!(
        gifts.create(gift("dup", 100, 1)).await,
        Err(GiftError::Duplicate(code)) if code == "DUP"
    ));

    let generated = gifts
        .create(NewGiftCode {
            code: None,
            amount: 100,
            max_uses: 0,
            expires_at: None,
        })
        .await
        .unwrap();
    assert_eq!(generated.code.len(), 12);
    assert_eq!(generated.max_uses, 1);
}
