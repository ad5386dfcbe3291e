// src/api/mod.rs
//
// JSON surface. Handlers only translate; every rule lives in the components.

pub mod accounts;
pub mod panels;
pub mod plans;
pub mod reconciliation;
pub mod services;

use std::collections::BTreeMap;

use actix_web::http::StatusCode;
use actix_web::{web, HttpResponse};
use serde::Serialize;
use utoipa::ToSchema;

use crate::credentials::StoreError;
use crate::gifts::GiftError;
use crate::ledger::LedgerError;
use crate::models::PanelId;
use crate::orchestrator::OrderError;
use crate::panel::PanelError;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .service(accounts::get_account)
            .service(accounts::ensure_account)
            .service(accounts::credit)
            .service(accounts::debit)
            .service(accounts::set_banned)
            .service(accounts::list_entries)
            .service(accounts::list_transactions)
            .service(accounts::transfer)
            .service(accounts::issue_trial)
            .service(accounts::redeem_gift)
            .service(accounts::create_gift)
            .service(plans::list_plans)
            .service(plans::create_plan)
            .service(plans::update_plan)
            .service(services::purchase)
            .service(services::list_services)
            .service(services::get_service)
            .service(services::renew)
            .service(services::delete_service)
            .service(panels::list_panels)
            .service(panels::upsert_panel)
            .service(panels::remove_panel)
            .service(reconciliation::list_tasks)
            .service(reconciliation::resolve_task)
            .service(reconciliation::run_now),
    );
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    pub error: String,
    pub code: String,
    /// Per-panel failure messages, when panels were involved.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub failures: BTreeMap<String, String>,
}

pub(crate) fn error(status: StatusCode, code: &str, message: impl ToString) -> HttpResponse {
    HttpResponse::build(status).json(ErrorBody {
        error: message.to_string(),
        code: code.to_string(),
        failures: BTreeMap::new(),
    })
}

pub(crate) fn failure_map(failures: &BTreeMap<PanelId, PanelError>) -> BTreeMap<String, String> {
    failures
        .iter()
        .map(|(panel_id, e)| (panel_id.to_string(), e.to_string()))
        .collect()
}

fn internal(context: &str, e: &dyn std::fmt::Display) -> HttpResponse {
    log::error!("{context} error: {e}");
    error(StatusCode::INTERNAL_SERVER_ERROR, "internal", "internal error")
}

pub(crate) fn ledger_error(e: LedgerError) -> HttpResponse {
    match &e {
        LedgerError::InsufficientFunds(_) => {
            error(StatusCode::PAYMENT_REQUIRED, "insufficient_funds", &e)
        }
        LedgerError::NotFound(_) | LedgerError::UnknownReservation(_) => {
            error(StatusCode::NOT_FOUND, "not_found", &e)
        }
        LedgerError::InvalidAmount(_) | LedgerError::SameAccount(_) => {
            error(StatusCode::BAD_REQUEST, "invalid_request", &e)
        }
        LedgerError::ReservationClosed(_) => error(StatusCode::CONFLICT, "conflict", &e),
        LedgerError::Db(_) => internal("ledger", &e),
    }
}

pub(crate) fn store_error(e: StoreError) -> HttpResponse {
    match &e {
        StoreError::ServiceNotFound(_)
        | StoreError::PlanNotFound(_)
        | StoreError::EndpointNotFound { .. } => error(StatusCode::NOT_FOUND, "not_found", &e),
        StoreError::Db(_) => internal("store", &e),
    }
}

pub(crate) fn order_error(e: OrderError) -> HttpResponse {
    match e {
        OrderError::InsufficientFunds => {
            error(StatusCode::PAYMENT_REQUIRED, "insufficient_funds", &e)
        }
        OrderError::Banned(_) => error(StatusCode::FORBIDDEN, "banned", &e),
        OrderError::AccountNotFound(_)
        | OrderError::PlanNotFound(_)
        | OrderError::ServiceNotFound(_) => error(StatusCode::NOT_FOUND, "not_found", &e),
        OrderError::PlanUnavailable(_) | OrderError::NoPanel(_) => {
            error(StatusCode::UNPROCESSABLE_ENTITY, "unavailable", &e)
        }
        OrderError::TrialAlreadyUsed => error(StatusCode::CONFLICT, "trial_used", &e),
        OrderError::ProvisioningFailed { ref failures } => {
            HttpResponse::BadGateway().json(ErrorBody {
                error: "provisioning failed on every panel".to_string(),
                code: "provisioning_failed".to_string(),
                failures: failure_map(failures),
            })
        }
        OrderError::Inconsistent { .. } => {
            log::error!("order left for reconciliation: {e}");
            error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "inconsistent",
                "operation rolled back, an operator will reconcile",
            )
        }
        OrderError::Ledger(inner) => ledger_error(inner),
        OrderError::Store(inner) => store_error(inner),
        OrderError::Journal(_) => internal("journal", &e),
    }
}

pub(crate) fn gift_error(e: GiftError) -> HttpResponse {
    match e {
        GiftError::NotFound(_) => error(StatusCode::NOT_FOUND, "not_found", &e),
        GiftError::Exhausted(_) | GiftError::Expired(_) => {
            error(StatusCode::GONE, "gift_unavailable", &e)
        }
        GiftError::AlreadyRedeemed(_) | GiftError::Duplicate(_) => {
            error(StatusCode::CONFLICT, "conflict", &e)
        }
        GiftError::Banned(_) => error(StatusCode::FORBIDDEN, "banned", &e),
        GiftError::InvalidAmount(_) => error(StatusCode::BAD_REQUEST, "invalid_request", &e),
        GiftError::Ledger(inner) => ledger_error(inner),
        GiftError::Db(_) => internal("gifts", &e),
    }
}
