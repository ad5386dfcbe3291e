// src/api/services.rs

use std::collections::BTreeMap;

use actix_web::http::StatusCode;
use actix_web::{delete, get, post, web, HttpResponse, Responder};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{failure_map, order_error, store_error};
use crate::models::{AccountId, PanelId, PlanId, Service, ServiceId};
use crate::orchestrator::{PurchaseOptions, PurchaseOutcome, RenewOutcome};
use crate::AppState;

#[derive(Debug, Deserialize, ToSchema)]
pub struct PurchaseRequest {
    pub plan_id: PlanId,
    /// Locations to provision on; the default panel when empty.
    #[serde(default)]
    pub panels: Vec<PanelId>,
    pub display_name: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RenewRequest {
    pub plan_id: PlanId,
}

/// A service plus the panels that did not take part.
#[derive(Debug, Serialize, ToSchema)]
pub struct ServiceOutcome {
    pub service: Service,
    pub partial: bool,
    pub failures: BTreeMap<String, String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DeleteResponse {
    pub service_id: ServiceId,
    pub removed: Vec<PanelId>,
    /// Panels left for reconciliation.
    pub failures: BTreeMap<String, String>,
}

fn outcome(service: Service, failures: BTreeMap<String, String>, ok: StatusCode) -> HttpResponse {
    let partial = !failures.is_empty();
    let status = if partial { StatusCode::MULTI_STATUS } else { ok };
    HttpResponse::build(status).json(ServiceOutcome {
        service,
        partial,
        failures,
    })
}

#[utoipa::path(
    post,
    path = "/api/accounts/{account_id}/services",
    tag = "services",
    params(("account_id" = i64, Path, description = "Buyer")),
    request_body = PurchaseRequest,
    responses(
        (status = 201, description = "Provisioned on every requested panel", body = ServiceOutcome),
        (status = 207, description = "Provisioned on some panels", body = ServiceOutcome),
        (status = 402, description = "Insufficient funds", body = super::ErrorBody),
        (status = 403, description = "Account banned", body = super::ErrorBody),
        (status = 404, description = "Unknown account or plan", body = super::ErrorBody),
        (status = 502, description = "Every panel failed; nothing charged", body = super::ErrorBody)
    )
)]
#[post("/accounts/{account_id}/services")]
pub async fn purchase(
    path: web::Path<AccountId>,
    body: web::Json<PurchaseRequest>,
    state: web::Data<AppState>,
) -> impl Responder {
    let body = body.into_inner();
    let options = PurchaseOptions {
        panels: body.panels,
        display_name: body.display_name,
    };

    match state
        .orchestrator
        .purchase(path.into_inner(), body.plan_id, options)
        .await
    {
        Ok(PurchaseOutcome::Provisioned(service)) => {
            outcome(service, BTreeMap::new(), StatusCode::CREATED)
        }
        Ok(PurchaseOutcome::PartiallyProvisioned { service, failures }) => {
            outcome(service, failure_map(&failures), StatusCode::CREATED)
        }
        Err(e) => order_error(e),
    }
}

#[utoipa::path(
    get,
    path = "/api/accounts/{account_id}/services",
    tag = "services",
    params(("account_id" = i64, Path, description = "Owner")),
    responses((status = 200, description = "Services of the account", body = [crate::models::Service]))
)]
#[get("/accounts/{account_id}/services")]
pub async fn list_services(path: web::Path<AccountId>, state: web::Data<AppState>) -> impl Responder {
    match state.store.list_services(path.into_inner()).await {
        Ok(services) => HttpResponse::Ok().json(services),
        Err(e) => store_error(e),
    }
}

#[utoipa::path(
    get,
    path = "/api/accounts/{account_id}/services/{service_id}",
    tag = "services",
    params(
        ("account_id" = i64, Path, description = "Owner"),
        ("service_id" = i64, Path, description = "Service id")
    ),
    responses(
        (status = 200, description = "Service with its endpoints", body = crate::models::Service),
        (status = 404, description = "Unknown service or not owned by the account", body = super::ErrorBody)
    )
)]
#[get("/accounts/{account_id}/services/{service_id}")]
pub async fn get_service(
    path: web::Path<(AccountId, ServiceId)>,
    state: web::Data<AppState>,
) -> impl Responder {
    let (account_id, service_id) = path.into_inner();
    match state.store.get_service(service_id).await {
        Ok(service) if service.account_id == account_id => HttpResponse::Ok().json(service),
        Ok(_) => store_error(crate::credentials::StoreError::ServiceNotFound(service_id)),
        Err(e) => store_error(e),
    }
}

#[utoipa::path(
    post,
    path = "/api/accounts/{account_id}/services/{service_id}/renew",
    tag = "services",
    params(
        ("account_id" = i64, Path, description = "Owner"),
        ("service_id" = i64, Path, description = "Service id")
    ),
    request_body = RenewRequest,
    responses(
        (status = 200, description = "Every endpoint renewed", body = ServiceOutcome),
        (status = 207, description = "Some endpoints renewed", body = ServiceOutcome),
        (status = 402, description = "Insufficient funds", body = super::ErrorBody),
        (status = 502, description = "No endpoint renewed; nothing charged", body = super::ErrorBody)
    )
)]
#[post("/accounts/{account_id}/services/{service_id}/renew")]
pub async fn renew(
    path: web::Path<(AccountId, ServiceId)>,
    body: web::Json<RenewRequest>,
    state: web::Data<AppState>,
) -> impl Responder {
    let (account_id, service_id) = path.into_inner();
    match state
        .orchestrator
        .renew(account_id, service_id, body.plan_id)
        .await
    {
        Ok(RenewOutcome::Renewed(service)) => outcome(service, BTreeMap::new(), StatusCode::OK),
        Ok(RenewOutcome::PartiallyRenewed { service, failures }) => {
            outcome(service, failure_map(&failures), StatusCode::OK)
        }
        Err(e) => order_error(e),
    }
}

#[utoipa::path(
    delete,
    path = "/api/accounts/{account_id}/services/{service_id}",
    tag = "services",
    params(
        ("account_id" = i64, Path, description = "Owner"),
        ("service_id" = i64, Path, description = "Service id")
    ),
    responses(
        (status = 200, description = "Removed everywhere", body = DeleteResponse),
        (status = 207, description = "Removed locally; some panels queued for reconciliation", body = DeleteResponse),
        (status = 404, description = "Unknown service", body = super::ErrorBody)
    )
)]
#[delete("/accounts/{account_id}/services/{service_id}")]
pub async fn delete_service(
    path: web::Path<(AccountId, ServiceId)>,
    state: web::Data<AppState>,
) -> impl Responder {
    let (account_id, service_id) = path.into_inner();
    match state.orchestrator.delete_owned(account_id, service_id).await {
        Ok(report) => {
            let status = if report.failures.is_empty() {
                StatusCode::OK
            } else {
                StatusCode::MULTI_STATUS
            };
            HttpResponse::build(status).json(DeleteResponse {
                service_id: report.service_id,
                removed: report.removed,
                failures: failure_map(&report.failures),
            })
        }
        Err(e) => order_error(e),
    }
}
