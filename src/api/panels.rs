// src/api/panels.rs

use actix_web::http::StatusCode;
use actix_web::{delete, get, put, web, HttpResponse, Responder};

use super::error;
use crate::db;
use crate::models::PanelId;
use crate::panel::PanelConfig;
use crate::AppState;

#[utoipa::path(
    get,
    path = "/api/panels",
    tag = "panels",
    responses((status = 200, description = "Configured panels, credentials redacted", body = [crate::panel::PanelConfig]))
)]
#[get("/panels")]
pub async fn list_panels(state: web::Data<AppState>) -> impl Responder {
    let panels: Vec<PanelConfig> = state
        .registry
        .list()
        .into_iter()
        .map(|p| p.redacted())
        .collect();
    HttpResponse::Ok().json(panels)
}

#[utoipa::path(
    put,
    path = "/api/panels/{panel_id}",
    tag = "panels",
    params(("panel_id" = String, Path, description = "Panel id")),
    request_body = crate::panel::PanelConfig,
    responses(
        (status = 200, description = "Panel stored and live", body = crate::panel::PanelConfig),
        (status = 400, description = "Invalid configuration", body = super::ErrorBody)
    )
)]
#[put("/panels/{panel_id}")]
pub async fn upsert_panel(
    path: web::Path<String>,
    body: web::Json<PanelConfig>,
    state: web::Data<AppState>,
) -> impl Responder {
    let mut config = body.into_inner();
    config.id = PanelId(path.into_inner());

    if let Err(e) = config.validate() {
        return error(StatusCode::BAD_REQUEST, "invalid_panel", e);
    }
    if let Err(e) = db::save_panel(&state.pool, &config).await {
        log::error!("save_panel db error: {e}");
        return HttpResponse::InternalServerError().finish();
    }
    if let Err(e) = state.registry.upsert(config.clone()) {
        return error(StatusCode::BAD_REQUEST, "invalid_panel", e);
    }

    HttpResponse::Ok().json(config.redacted())
}

#[utoipa::path(
    delete,
    path = "/api/panels/{panel_id}",
    tag = "panels",
    params(("panel_id" = String, Path, description = "Panel id")),
    responses(
        (status = 204, description = "Panel removed; its endpoints become unconfigured"),
        (status = 404, description = "Unknown panel", body = super::ErrorBody)
    )
)]
#[delete("/panels/{panel_id}")]
pub async fn remove_panel(path: web::Path<String>, state: web::Data<AppState>) -> impl Responder {
    let id = PanelId(path.into_inner());

    let stored = match db::delete_panel(&state.pool, &id).await {
        Ok(stored) => stored,
        Err(e) => {
            log::error!("delete_panel db error: {e}");
            return HttpResponse::InternalServerError().finish();
        }
    };
    let live = state.registry.remove(&id);

    if stored || live {
        HttpResponse::NoContent().finish()
    } else {
        error(StatusCode::NOT_FOUND, "not_found", format!("panel {id} not found"))
    }
}
