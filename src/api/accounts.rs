// src/api/accounts.rs

use actix_web::{get, post, web, HttpResponse, Responder};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use super::{gift_error, ledger_error, order_error};
use crate::gifts::NewGiftCode;
use crate::models::{AccountId, Amount, EntryReason};
use crate::AppState;

#[derive(Debug, Deserialize, ToSchema)]
pub struct AmountRequest {
    pub amount: Amount,
    /// Defaults to `admin_adjustment`.
    pub reason: Option<EntryReason>,
    pub reference: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BalanceResponse {
    pub account_id: AccountId,
    pub balance: Amount,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct BanRequest {
    pub banned: bool,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct TransferRequest {
    pub from: AccountId,
    pub to: AccountId,
    pub amount: Amount,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RedeemRequest {
    pub code: String,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct EntriesQuery {
    /// Newest first, default 50.
    pub limit: Option<i64>,
}

#[utoipa::path(
    get,
    path = "/api/accounts/{account_id}",
    tag = "accounts",
    params(("account_id" = i64, Path, description = "Account id")),
    responses(
        (status = 200, description = "Account", body = crate::models::Account),
        (status = 404, description = "Unknown account", body = super::ErrorBody)
    )
)]
#[get("/accounts/{account_id}")]
pub async fn get_account(path: web::Path<AccountId>, state: web::Data<AppState>) -> impl Responder {
    match state.ledger.get_account(path.into_inner()).await {
        Ok(account) => HttpResponse::Ok().json(account),
        Err(e) => ledger_error(e),
    }
}

#[utoipa::path(
    post,
    path = "/api/accounts/{account_id}",
    tag = "accounts",
    params(("account_id" = i64, Path, description = "Account id")),
    responses((status = 200, description = "Existing or newly created account", body = crate::models::Account))
)]
#[post("/accounts/{account_id}")]
pub async fn ensure_account(
    path: web::Path<AccountId>,
    state: web::Data<AppState>,
) -> impl Responder {
    match state.ledger.ensure_account(path.into_inner()).await {
        Ok(account) => HttpResponse::Ok().json(account),
        Err(e) => ledger_error(e),
    }
}

#[utoipa::path(
    post,
    path = "/api/accounts/{account_id}/credit",
    tag = "accounts",
    params(("account_id" = i64, Path, description = "Account id")),
    request_body = AmountRequest,
    responses(
        (status = 200, description = "New balance", body = BalanceResponse),
        (status = 400, description = "Non-positive amount", body = super::ErrorBody),
        (status = 404, description = "Unknown account", body = super::ErrorBody)
    )
)]
#[post("/accounts/{account_id}/credit")]
pub async fn credit(
    path: web::Path<AccountId>,
    body: web::Json<AmountRequest>,
    state: web::Data<AppState>,
) -> impl Responder {
    let account_id = path.into_inner();
    let reason = body.reason.unwrap_or(EntryReason::AdminAdjustment);

    match state
        .ledger
        .credit(account_id, body.amount, reason, body.reference.as_deref())
        .await
    {
        Ok(balance) => HttpResponse::Ok().json(BalanceResponse {
            account_id,
            balance,
        }),
        Err(e) => ledger_error(e),
    }
}

#[utoipa::path(
    post,
    path = "/api/accounts/{account_id}/debit",
    tag = "accounts",
    params(("account_id" = i64, Path, description = "Account id")),
    request_body = AmountRequest,
    responses(
        (status = 200, description = "New balance", body = BalanceResponse),
        (status = 402, description = "Balance too low", body = super::ErrorBody)
    )
)]
#[post("/accounts/{account_id}/debit")]
pub async fn debit(
    path: web::Path<AccountId>,
    body: web::Json<AmountRequest>,
    state: web::Data<AppState>,
) -> impl Responder {
    let account_id = path.into_inner();
    let reason = body.reason.unwrap_or(EntryReason::AdminAdjustment);

    match state
        .ledger
        .debit(account_id, body.amount, reason, body.reference.as_deref())
        .await
    {
        Ok(balance) => HttpResponse::Ok().json(BalanceResponse {
            account_id,
            balance,
        }),
        Err(e) => ledger_error(e),
    }
}

#[utoipa::path(
    post,
    path = "/api/accounts/{account_id}/ban",
    tag = "accounts",
    params(("account_id" = i64, Path, description = "Account id")),
    request_body = BanRequest,
    responses((status = 204, description = "Flag updated"))
)]
#[post("/accounts/{account_id}/ban")]
pub async fn set_banned(
    path: web::Path<AccountId>,
    body: web::Json<BanRequest>,
    state: web::Data<AppState>,
) -> impl Responder {
    match state.ledger.set_banned(path.into_inner(), body.banned).await {
        Ok(()) => HttpResponse::NoContent().finish(),
        Err(e) => ledger_error(e),
    }
}

#[utoipa::path(
    get,
    path = "/api/accounts/{account_id}/entries",
    tag = "accounts",
    params(("account_id" = i64, Path, description = "Account id"), EntriesQuery),
    responses((status = 200, description = "Ledger entries, newest first", body = [crate::models::LedgerEntry]))
)]
#[get("/accounts/{account_id}/entries")]
pub async fn list_entries(
    path: web::Path<AccountId>,
    query: web::Query<EntriesQuery>,
    state: web::Data<AppState>,
) -> impl Responder {
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    match state.ledger.entries(path.into_inner(), limit).await {
        Ok(entries) => HttpResponse::Ok().json(entries),
        Err(e) => ledger_error(e),
    }
}

#[utoipa::path(
    get,
    path = "/api/accounts/{account_id}/transactions",
    tag = "accounts",
    params(("account_id" = i64, Path, description = "Account id")),
    responses((status = 200, description = "Purchase, renewal and trial attempts", body = [crate::journal::TransactionRecord]))
)]
#[get("/accounts/{account_id}/transactions")]
pub async fn list_transactions(
    path: web::Path<AccountId>,
    state: web::Data<AppState>,
) -> impl Responder {
    match state.journal.for_account(path.into_inner()).await {
        Ok(records) => HttpResponse::Ok().json(records),
        Err(e) => {
            log::error!("list_transactions db error: {e}");
            HttpResponse::InternalServerError().finish()
        }
    }
}

#[utoipa::path(
    post,
    path = "/api/transfers",
    tag = "accounts",
    request_body = TransferRequest,
    responses(
        (status = 204, description = "Funds moved"),
        (status = 402, description = "Sender balance too low", body = super::ErrorBody)
    )
)]
#[post("/transfers")]
pub async fn transfer(body: web::Json<TransferRequest>, state: web::Data<AppState>) -> impl Responder {
    match state.ledger.transfer(body.from, body.to, body.amount).await {
        Ok(()) => HttpResponse::NoContent().finish(),
        Err(e) => ledger_error(e),
    }
}

#[utoipa::path(
    post,
    path = "/api/accounts/{account_id}/trial",
    tag = "accounts",
    params(("account_id" = i64, Path, description = "Account id")),
    responses(
        (status = 201, description = "Trial service issued", body = crate::models::Service),
        (status = 409, description = "Trial already used", body = super::ErrorBody),
        (status = 502, description = "Panel failed", body = super::ErrorBody)
    )
)]
#[post("/accounts/{account_id}/trial")]
pub async fn issue_trial(path: web::Path<AccountId>, state: web::Data<AppState>) -> impl Responder {
    match state.orchestrator.issue_trial(path.into_inner()).await {
        Ok(service) => HttpResponse::Created().json(service),
        Err(e) => order_error(e),
    }
}

#[utoipa::path(
    post,
    path = "/api/accounts/{account_id}/gifts/redeem",
    tag = "gifts",
    params(("account_id" = i64, Path, description = "Account id")),
    request_body = RedeemRequest,
    responses(
        (status = 200, description = "Credited", body = BalanceResponse),
        (status = 404, description = "Unknown code", body = super::ErrorBody),
        (status = 409, description = "Already redeemed", body = super::ErrorBody),
        (status = 410, description = "Expired or used up", body = super::ErrorBody)
    )
)]
#[post("/accounts/{account_id}/gifts/redeem")]
pub async fn redeem_gift(
    path: web::Path<AccountId>,
    body: web::Json<RedeemRequest>,
    state: web::Data<AppState>,
) -> impl Responder {
    let account_id = path.into_inner();
    match state.gifts.redeem(account_id, &body.code).await {
        Ok(balance) => HttpResponse::Ok().json(BalanceResponse {
            account_id,
            balance,
        }),
        Err(e) => gift_error(e),
    }
}

#[utoipa::path(
    post,
    path = "/api/gifts",
    tag = "gifts",
    request_body = NewGiftCode,
    responses(
        (status = 201, description = "Gift code created", body = crate::gifts::GiftCode),
        (status = 409, description = "Code already exists", body = super::ErrorBody)
    )
)]
#[post("/gifts")]
pub async fn create_gift(body: web::Json<NewGiftCode>, state: web::Data<AppState>) -> impl Responder {
    match state.gifts.create(body.into_inner()).await {
        Ok(gift) => HttpResponse::Created().json(gift),
        Err(e) => gift_error(e),
    }
}
