// src/api/plans.rs

use actix_web::{get, post, put, web, HttpResponse, Responder};
use serde::Deserialize;
use utoipa::IntoParams;

use super::store_error;
use crate::credentials::PlanInput;
use crate::models::PlanId;
use crate::AppState;

#[derive(Debug, Deserialize, IntoParams)]
pub struct PlansQuery {
    /// Include hidden plans (operator view).
    #[serde(default)]
    pub all: bool,
}

#[utoipa::path(
    get,
    path = "/api/plans",
    tag = "plans",
    params(PlansQuery),
    responses((status = 200, description = "Plans ordered by price", body = [crate::models::Plan]))
)]
#[get("/plans")]
pub async fn list_plans(query: web::Query<PlansQuery>, state: web::Data<AppState>) -> impl Responder {
    match state.store.list_plans(!query.all).await {
        Ok(plans) => HttpResponse::Ok().json(plans),
        Err(e) => store_error(e),
    }
}

#[utoipa::path(
    post,
    path = "/api/plans",
    tag = "plans",
    request_body = PlanInput,
    responses(
        (status = 201, description = "Plan created", body = crate::models::Plan),
        (status = 400, description = "Invalid plan", body = super::ErrorBody)
    )
)]
#[post("/plans")]
pub async fn create_plan(body: web::Json<PlanInput>, state: web::Data<AppState>) -> impl Responder {
    if let Err(resp) = validate(&body) {
        return resp;
    }
    match state.store.create_plan(&body).await {
        Ok(plan) => HttpResponse::Created().json(plan),
        Err(e) => store_error(e),
    }
}

#[utoipa::path(
    put,
    path = "/api/plans/{plan_id}",
    tag = "plans",
    params(("plan_id" = i64, Path, description = "Plan id")),
    request_body = PlanInput,
    responses(
        (status = 200, description = "Plan updated; issued services are untouched", body = crate::models::Plan),
        (status = 404, description = "Unknown plan", body = super::ErrorBody)
    )
)]
#[put("/plans/{plan_id}")]
pub async fn update_plan(
    path: web::Path<PlanId>,
    body: web::Json<PlanInput>,
    state: web::Data<AppState>,
) -> impl Responder {
    if let Err(resp) = validate(&body) {
        return resp;
    }
    match state.store.update_plan(path.into_inner(), &body).await {
        Ok(plan) => HttpResponse::Ok().json(plan),
        Err(e) => store_error(e),
    }
}

fn validate(input: &PlanInput) -> Result<(), HttpResponse> {
    use actix_web::http::StatusCode;

    let problem = if input.name.trim().is_empty() {
        Some("name must not be empty")
    } else if input.price < 0 {
        Some("price must not be negative")
    } else if input.duration_days <= 0 {
        Some("duration_days must be positive")
    } else if input.quota_gb < 0 {
        Some("quota_gb must not be negative")
    } else {
        None
    };

    match problem {
        Some(msg) => Err(super::error(StatusCode::BAD_REQUEST, "invalid_request", msg)),
        None => Ok(()),
    }
}
