// src/api/reconciliation.rs

use actix_web::http::StatusCode;
use actix_web::{get, post, web, HttpResponse, Responder};
use serde::Deserialize;
use utoipa::IntoParams;

use super::{error, store_error};
use crate::AppState;

#[derive(Debug, Deserialize, IntoParams)]
pub struct TasksQuery {
    #[serde(default)]
    pub include_resolved: bool,
}

#[utoipa::path(
    get,
    path = "/api/reconciliation",
    tag = "reconciliation",
    params(TasksQuery),
    responses((status = 200, description = "Inconsistencies awaiting an operator", body = [crate::models::ReconciliationTask]))
)]
#[get("/reconciliation")]
pub async fn list_tasks(query: web::Query<TasksQuery>, state: web::Data<AppState>) -> impl Responder {
    match state.store.list_reconciliation(query.include_resolved).await {
        Ok(tasks) => HttpResponse::Ok().json(tasks),
        Err(e) => store_error(e),
    }
}

#[utoipa::path(
    post,
    path = "/api/reconciliation/{task_id}/resolve",
    tag = "reconciliation",
    params(("task_id" = i64, Path, description = "Task id")),
    responses(
        (status = 204, description = "Marked resolved"),
        (status = 404, description = "Unknown or already resolved", body = super::ErrorBody)
    )
)]
#[post("/reconciliation/{task_id}/resolve")]
pub async fn resolve_task(path: web::Path<i64>, state: web::Data<AppState>) -> impl Responder {
    let task_id = path.into_inner();
    match state.store.resolve_reconciliation(task_id).await {
        Ok(true) => HttpResponse::NoContent().finish(),
        Ok(false) => error(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("open task {task_id} not found"),
        ),
        Err(e) => store_error(e),
    }
}

#[utoipa::path(
    post,
    path = "/api/reconciliation/run",
    tag = "reconciliation",
    responses((status = 200, description = "One sweep over every service", body = crate::reconcile::ReconcileSummary))
)]
#[post("/reconciliation/run")]
pub async fn run_now(state: web::Data<AppState>) -> impl Responder {
    match state.reconciler.run_once().await {
        Ok(summary) => HttpResponse::Ok().json(summary),
        Err(e) => store_error(e),
    }
}
